//! Error taxonomy for the graph model and the calculation engine.

use thiserror::Error;

/// Open error type for user-authored calculation steps.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// The flattened graph is not a DAG; no calculation order exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("graph contains a cycle; no valid calculation order exists")]
pub struct CycleError;

/// Errors surfaced by graph model mutations.
#[derive(Error, Debug)]
pub enum GraphError {
  /// A subscriber of the connection-proposal notification vetoed the edge
  /// (it would introduce a cycle in the flattened graph).
  #[error("connection from interface '{from_id}' to interface '{to_id}' was rejected")]
  ConnectionRejected { from_id: String, to_id: String },
}

/// Errors surfaced by a calculation pass.
///
/// A vetoed pass is not an error; `Engine::calculate` signals it with
/// `Ok(None)` instead.
#[derive(Error, Debug)]
pub enum EngineError {
  #[error(transparent)]
  Cycle(#[from] CycleError),

  /// A node's calculation step failed. The rest of the pass is aborted:
  /// downstream nodes would otherwise run on stale input values.
  #[error("calculation step of node '{node_id}' failed: {source}")]
  Step {
    node_id: String,
    #[source]
    source: StepError,
  },
}
