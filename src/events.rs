//! Observer registry: events, preventable events, and sequential hooks.
//!
//! Subscribers are keyed by a monotonic token and invoked in subscription
//! order. A preventable event stops emitting as soon as one subscriber
//! vetoes; a sequential hook threads a value through every tap in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token identifying one subscription; pass it back to `unsubscribe`.
pub type SubscriberToken = u64;

fn next_token(counter: &AtomicU64) -> SubscriberToken {
  counter.fetch_add(1, Ordering::Relaxed)
}

/// A plain notification with any number of subscribers.
pub struct Event<T> {
  next_token: AtomicU64,
  listeners: Mutex<Vec<(SubscriberToken, Arc<dyn Fn(&T) + Send + Sync>)>>,
}

impl<T> Event<T> {
  pub fn new() -> Self {
    Self {
      next_token: AtomicU64::new(0),
      listeners: Mutex::new(Vec::new()),
    }
  }

  pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriberToken {
    let token = next_token(&self.next_token);
    self
      .listeners
      .lock()
      .expect("event listener list poisoned")
      .push((token, Arc::new(listener)));
    token
  }

  pub fn unsubscribe(&self, token: SubscriberToken) {
    self
      .listeners
      .lock()
      .expect("event listener list poisoned")
      .retain(|(t, _)| *t != token);
  }

  /// Invokes all subscribers in subscription order.
  ///
  /// The listener list is snapshotted first, so a subscriber may subscribe,
  /// unsubscribe, or re-emit without deadlocking.
  pub fn emit(&self, payload: &T) {
    let listeners: Vec<_> = self
      .listeners
      .lock()
      .expect("event listener list poisoned")
      .iter()
      .map(|(_, l)| l.clone())
      .collect();
    for listener in listeners {
      listener(payload);
    }
  }
}

impl<T> Default for Event<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// A notification whose subscribers may veto the action being announced.
///
/// A subscriber returns `false` to veto. Emission happens in subscription
/// order and halts at the first veto; later subscribers are not invoked.
pub struct PreventableEvent<T> {
  next_token: AtomicU64,
  listeners: Mutex<Vec<(SubscriberToken, Arc<dyn Fn(&T) -> bool + Send + Sync>)>>,
}

impl<T> PreventableEvent<T> {
  pub fn new() -> Self {
    Self {
      next_token: AtomicU64::new(0),
      listeners: Mutex::new(Vec::new()),
    }
  }

  pub fn subscribe(
    &self,
    listener: impl Fn(&T) -> bool + Send + Sync + 'static,
  ) -> SubscriberToken {
    let token = next_token(&self.next_token);
    self
      .listeners
      .lock()
      .expect("event listener list poisoned")
      .push((token, Arc::new(listener)));
    token
  }

  pub fn unsubscribe(&self, token: SubscriberToken) {
    self
      .listeners
      .lock()
      .expect("event listener list poisoned")
      .retain(|(t, _)| *t != token);
  }

  /// Returns `true` if any subscriber prevented the event.
  pub fn emit(&self, payload: &T) -> bool {
    let listeners: Vec<_> = self
      .listeners
      .lock()
      .expect("event listener list poisoned")
      .iter()
      .map(|(_, l)| l.clone())
      .collect();
    for listener in listeners {
      if !listener(payload) {
        return true;
      }
    }
    false
  }
}

impl<T> Default for PreventableEvent<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// An ordered chain of transformers: the output of one tap becomes the
/// input of the next.
pub struct SequentialHook<T> {
  next_token: AtomicU64,
  taps: Mutex<Vec<(SubscriberToken, Arc<dyn Fn(T) -> T + Send + Sync>)>>,
}

impl<T> SequentialHook<T> {
  pub fn new() -> Self {
    Self {
      next_token: AtomicU64::new(0),
      taps: Mutex::new(Vec::new()),
    }
  }

  pub fn tap(&self, tap: impl Fn(T) -> T + Send + Sync + 'static) -> SubscriberToken {
    let token = next_token(&self.next_token);
    self
      .taps
      .lock()
      .expect("hook tap list poisoned")
      .push((token, Arc::new(tap)));
    token
  }

  pub fn untap(&self, token: SubscriberToken) {
    self
      .taps
      .lock()
      .expect("hook tap list poisoned")
      .retain(|(t, _)| *t != token);
  }

  /// Threads `value` through all taps in registration order.
  pub fn execute(&self, value: T) -> T {
    let taps: Vec<_> = self
      .taps
      .lock()
      .expect("hook tap list poisoned")
      .iter()
      .map(|(_, tap)| tap.clone())
      .collect();
    taps.into_iter().fold(value, |acc, tap| tap(acc))
  }
}

impl<T> Default for SequentialHook<T> {
  fn default() -> Self {
    Self::new()
  }
}
