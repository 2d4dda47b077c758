//! Structured result of one node calculation step.

use std::collections::HashMap;

use serde::Serialize;

use super::Value;

/// What a calculation step returned: nothing, or a set of values for the
/// node's output interfaces keyed by interface name.
///
/// Output-name validity is a registration-time contract: the node builder
/// declares the output interface set, and a step is expected to return only
/// those names. At run time an unknown name is logged and skipped rather
/// than failing the pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CalculationResult {
  /// The step produced no structured output (or the node has no step).
  None,
  /// Values to write into the node's output interfaces.
  Outputs(HashMap<String, Value>),
}

impl CalculationResult {
  /// Result carrying a single named output value.
  pub fn single(name: impl Into<String>, value: Value) -> Self {
    let mut outputs = HashMap::new();
    outputs.insert(name.into(), value);
    Self::Outputs(outputs)
  }

  /// Result carrying the given named output values.
  pub fn outputs<I, K>(values: I) -> Self
  where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
  {
    Self::Outputs(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
  }
}
