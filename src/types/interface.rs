//! A single input or output interface on a node.

use std::sync::Mutex;

use uuid::Uuid;

use super::Value;

/// A named input or output slot on a node, holding its current value.
///
/// An interface belongs to exactly one node; the owning node exposes it by
/// name through its input and output maps. An interface may carry a
/// template identity: an opaque id shared between an outer subgraph-node
/// interface and the corresponding inner boundary interface, used to
/// resolve connections that cross a subgraph boundary during flattening.
#[derive(Debug)]
pub struct NodeInterface {
  /// Unique interface id.
  pub id: String,
  /// Shared opaque id linking this interface to its counterpart across a
  /// subgraph boundary, if any.
  pub template_id: Option<String>,
  value: Mutex<Value>,
}

impl NodeInterface {
  /// Creates an interface with a null value and no template identity.
  pub fn new() -> Self {
    Self::with_value(Value::Null)
  }

  /// Creates an interface with an initial value.
  pub fn with_value(value: Value) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      template_id: None,
      value: Mutex::new(value),
    }
  }

  /// Creates a boundary interface carrying a template identity.
  pub fn templated(template_id: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      template_id: Some(template_id.into()),
      value: Mutex::new(Value::Null),
    }
  }

  /// Returns a clone of the current value.
  pub fn value(&self) -> Value {
    self.value.lock().expect("interface value poisoned").clone()
  }

  /// Replaces the current value.
  pub fn set_value(&self, value: Value) {
    *self.value.lock().expect("interface value poisoned") = value;
  }
}

impl Default for NodeInterface {
  fn default() -> Self {
    Self::new()
  }
}
