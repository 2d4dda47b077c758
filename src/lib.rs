//! # nodeflow
//!
//! Dependency-graph execution engine for node-based computation models:
//! given a directed graph of computational nodes connected through typed
//! interfaces, nodeflow determines a valid execution order, propagates
//! values along connections, and re-validates acyclicity whenever the
//! graph is edited.
//!
//! ## Architecture
//!
//! - [graph]: the graph model: nodes, interfaces, connections, and the
//!   change notifications the engine tracks.
//! - [flatten]: expands subgraph-bearing nodes into a flat view, resolving
//!   boundary connections through template identities.
//! - [order]: cycle detection and the topological orderer producing the
//!   cached calculation order.
//! - [engine]: the calculation engine: one mutex-serialized pass at a
//!   time, with a preventable before-calculate notification, a
//!   data-gathering hook chain, and per-connection value transfer.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use nodeflow::{
//!   CalculationResult, Engine, FnStep, Graph, Node, StepError, StepInputs, Value,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let graph = Arc::new(Graph::new());
//! let source = graph.add_node(
//!   Node::builder("constant")
//!     .output("out")
//!     .step(FnStep(
//!       |_inputs: StepInputs, _data: &Value| -> Result<CalculationResult, StepError> {
//!         Ok(CalculationResult::single("out", json!(21)))
//!       },
//!     ))
//!     .build(),
//! );
//! let double = graph.add_node(
//!   Node::builder("double")
//!     .input("in")
//!     .output("out")
//!     .step(FnStep(
//!       |inputs: StepInputs, _data: &Value| -> Result<CalculationResult, StepError> {
//!         let n = inputs["in"].as_i64().unwrap_or(0);
//!         Ok(CalculationResult::single("out", json!(n * 2)))
//!       },
//!     ))
//!     .build(),
//! );
//! graph
//!   .add_connection(&source.outputs["out"], &double.inputs["in"])
//!   .unwrap();
//!
//! let engine = Engine::new(graph, false);
//! let results = engine.calculate(Value::Null).await.unwrap().unwrap();
//! assert_eq!(
//!   results[&double.id],
//!   CalculationResult::single("out", json!(42))
//! );
//! # }
//! ```

pub mod engine;
#[cfg(test)]
mod engine_test;
pub mod error;
pub mod events;
pub mod flatten;
pub mod graph;
pub mod order;
pub mod types;

pub use engine::{Engine, EngineEvents, EngineHooks};
pub use error::{CycleError, EngineError, GraphError, StepError};
pub use events::{Event, PreventableEvent, SequentialHook, SubscriberToken};
pub use flatten::{FlatGraph, expand_graph};
pub use graph::{ConnectionProposal, Graph, GraphEvents};
pub use order::{CalculationOrder, calculate_order, contains_cycle};
pub use types::{
  CalculationResult, CalculationResults, CalculationStep, Connection, FnStep, Node,
  NodeBuilder, NodeInterface, StepInputs, TransferHook, Value,
};
