//! A directed edge between two node interfaces.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{NodeInterface, Value};

/// Hook applied to every value propagated across a connection.
pub type TransferHook = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A directed edge from one output interface to one input interface.
///
/// Each connection carries exactly one transfer hook that may transform the
/// value in transit; the default hook is the identity. An input interface
/// has at most one incoming connection at any time; the graph model
/// removes the prior one before installing a replacement.
#[derive(Clone)]
pub struct Connection {
  /// Unique connection id.
  pub id: String,
  /// Source (output) interface.
  pub from: Arc<NodeInterface>,
  /// Destination (input) interface.
  pub to: Arc<NodeInterface>,
  transfer: TransferHook,
}

impl Connection {
  /// Creates a connection with the identity transfer hook.
  pub fn new(from: Arc<NodeInterface>, to: Arc<NodeInterface>) -> Self {
    Self::with_transfer(from, to, |value| value)
  }

  /// Creates a connection with a custom transfer hook.
  pub fn with_transfer(
    from: Arc<NodeInterface>,
    to: Arc<NodeInterface>,
    transfer: impl Fn(Value) -> Value + Send + Sync + 'static,
  ) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      from,
      to,
      transfer: Arc::new(transfer),
    }
  }

  /// Applies the transfer hook to a value in transit.
  pub fn transfer(&self, value: Value) -> Value {
    (self.transfer)(value)
  }

  /// Copy of this connection with rewritten endpoints, sharing the same
  /// transfer hook. Used when flattening rewires a boundary connection.
  pub(crate) fn rewired(&self, from: Arc<NodeInterface>, to: Arc<NodeInterface>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      from,
      to,
      transfer: self.transfer.clone(),
    }
  }
}

impl fmt::Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Connection")
      .field("id", &self.id)
      .field("from", &self.from.id)
      .field("to", &self.to.id)
      .finish()
  }
}
