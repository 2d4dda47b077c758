//! Data model: nodes, interfaces, connections, and step results.
//!
//! Interface values and calculation data are dynamic `serde_json` values;
//! the engine moves them between interfaces without inspecting them.

use std::collections::HashMap;

mod calculation_result;
mod connection;
mod interface;
#[cfg(test)]
mod interface_test;
mod node;

pub use calculation_result::CalculationResult;
pub use connection::{Connection, TransferHook};
pub use interface::NodeInterface;
pub use node::{CalculationStep, FnStep, Node, NodeBuilder, StepInputs};

/// Dynamic value carried by interfaces and calculation data.
pub type Value = serde_json::Value;

/// Result map of one calculation pass: raw step results of the resolved
/// root nodes, keyed by node id.
pub type CalculationResults = HashMap<String, CalculationResult>;
