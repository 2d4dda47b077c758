//! A computational node with named input and output interfaces.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::StepError;
use crate::graph::Graph;

use super::{CalculationResult, NodeInterface, Value};

/// Snapshot of a node's current input values, keyed by interface name.
pub type StepInputs = HashMap<String, Value>;

/// The asynchronous calculation step of a node.
///
/// `inputs` is a snapshot of the node's input interface values taken just
/// before the call; `data` is the calculation data for the whole pass,
/// after the engine's gathering hooks ran. A step that suspends (awaits)
/// suspends the entire pass; nodes never execute concurrently.
#[async_trait]
pub trait CalculationStep: Send + Sync {
  async fn calculate(
    &self,
    inputs: StepInputs,
    data: &Value,
  ) -> Result<CalculationResult, StepError>;
}

/// Adapter turning a synchronous closure into a [CalculationStep].
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F> CalculationStep for FnStep<F>
where
  F: for<'a> Fn(StepInputs, &'a Value) -> Result<CalculationResult, StepError> + Send + Sync,
{
  async fn calculate(
    &self,
    inputs: StepInputs,
    data: &Value,
  ) -> Result<CalculationResult, StepError> {
    (self.0)(inputs, data)
  }
}

/// A computational unit in the graph.
///
/// Interfaces are held in insertion order; the orderer relies on graph
/// insertion order for deterministic tie-breaking, and input snapshots
/// preserve declaration order. A node without a calculation step is inert:
/// it is skipped during execution but still occupies a graph position and
/// its outgoing connections still propagate whatever values its outputs
/// hold. A node may own a subgraph; the flattener replaces such a node with
/// the subgraph's contents before ordering.
pub struct Node {
  /// Unique node id.
  pub id: String,
  /// Type name of the node (e.g. `"math.add"`).
  pub node_type: String,
  /// Input interfaces keyed by name, in declaration order.
  pub inputs: IndexMap<String, Arc<NodeInterface>>,
  /// Output interfaces keyed by name, in declaration order.
  pub outputs: IndexMap<String, Arc<NodeInterface>>,
  /// Inner graph for subgraph-bearing nodes.
  pub subgraph: Option<Arc<Graph>>,
  step: Option<Box<dyn CalculationStep>>,
}

impl Node {
  /// Starts building a node of the given type.
  pub fn builder(node_type: impl Into<String>) -> NodeBuilder {
    NodeBuilder {
      node_type: node_type.into(),
      inputs: IndexMap::new(),
      outputs: IndexMap::new(),
      subgraph: None,
      step: None,
    }
  }

  /// The node's calculation step, if it has one.
  pub fn step(&self) -> Option<&dyn CalculationStep> {
    self.step.as_deref()
  }

  /// Whether this node has a calculation step (inert nodes do not).
  pub fn has_step(&self) -> bool {
    self.step.is_some()
  }

  /// Snapshot of the current input interface values, keyed by name.
  pub fn input_values(&self) -> StepInputs {
    self
      .inputs
      .iter()
      .map(|(name, intf)| (name.clone(), intf.value()))
      .collect()
  }

  /// Iterates all interfaces of the node, inputs first.
  pub fn interfaces(&self) -> impl Iterator<Item = &Arc<NodeInterface>> {
    self.inputs.values().chain(self.outputs.values())
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("id", &self.id)
      .field("node_type", &self.node_type)
      .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
      .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
      .field("has_step", &self.step.is_some())
      .field("has_subgraph", &self.subgraph.is_some())
      .finish()
  }
}

/// Builder assembling a [Node].
///
/// Declaring the interface sets here is what fixes the registration-time
/// contract for step results: a step should only return names declared via
/// [NodeBuilder::output].
pub struct NodeBuilder {
  node_type: String,
  inputs: IndexMap<String, Arc<NodeInterface>>,
  outputs: IndexMap<String, Arc<NodeInterface>>,
  subgraph: Option<Arc<Graph>>,
  step: Option<Box<dyn CalculationStep>>,
}

impl NodeBuilder {
  /// Declares an input interface.
  pub fn input(self, name: impl Into<String>) -> Self {
    self.add_input(name, NodeInterface::new())
  }

  /// Declares an input interface carrying a template identity.
  pub fn templated_input(self, name: impl Into<String>, template_id: impl Into<String>) -> Self {
    self.add_input(name, NodeInterface::templated(template_id))
  }

  /// Declares an output interface.
  pub fn output(self, name: impl Into<String>) -> Self {
    self.add_output(name, NodeInterface::new())
  }

  /// Declares an output interface holding an initial value.
  pub fn output_with_value(self, name: impl Into<String>, value: Value) -> Self {
    self.add_output(name, NodeInterface::with_value(value))
  }

  /// Declares an output interface carrying a template identity.
  pub fn templated_output(self, name: impl Into<String>, template_id: impl Into<String>) -> Self {
    self.add_output(name, NodeInterface::templated(template_id))
  }

  /// Attaches the node's calculation step.
  pub fn step(mut self, step: impl CalculationStep + 'static) -> Self {
    self.step = Some(Box::new(step));
    self
  }

  /// Marks the node as subgraph-bearing.
  pub fn subgraph(mut self, graph: Arc<Graph>) -> Self {
    self.subgraph = Some(graph);
    self
  }

  pub fn build(self) -> Arc<Node> {
    Arc::new(Node {
      id: Uuid::new_v4().to_string(),
      node_type: self.node_type,
      inputs: self.inputs,
      outputs: self.outputs,
      subgraph: self.subgraph,
      step: self.step,
    })
  }

  fn add_input(mut self, name: impl Into<String>, intf: NodeInterface) -> Self {
    self.inputs.insert(name.into(), Arc::new(intf));
    self
  }

  fn add_output(mut self, name: impl Into<String>, intf: NodeInterface) -> Self {
    self.outputs.insert(name.into(), Arc::new(intf));
    self
  }
}
