//! Tests for `interface`.

use serde_json::json;

use super::interface::NodeInterface;

#[test]
fn new_interface_starts_null_without_template() {
  let intf = NodeInterface::new();
  assert!(intf.value().is_null());
  assert!(intf.template_id.is_none());
  assert!(!intf.id.is_empty());
}

#[test]
fn with_value_holds_initial_value() {
  let intf = NodeInterface::with_value(json!(42));
  assert_eq!(intf.value(), json!(42));
}

#[test]
fn set_value_replaces_current_value() {
  let intf = NodeInterface::new();
  intf.set_value(json!("hello"));
  assert_eq!(intf.value(), json!("hello"));
  intf.set_value(json!([1, 2]));
  assert_eq!(intf.value(), json!([1, 2]));
}

#[test]
fn templated_interface_carries_template_id() {
  let intf = NodeInterface::templated("boundary-a");
  assert_eq!(intf.template_id.as_deref(), Some("boundary-a"));
}

#[test]
fn interface_ids_are_unique() {
  let a = NodeInterface::new();
  let b = NodeInterface::new();
  assert_ne!(a.id, b.id);
}
