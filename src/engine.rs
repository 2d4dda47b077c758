//! Calculation engine: mutex-serialized execution of the node order.
//!
//! One engine owns one graph for the lifetime of a session. It tracks
//! structural changes through the graph's notifications, lazily recomputes
//! the cached calculation order, and runs calculation passes strictly
//! sequentially: a second `calculate` queues behind the in-flight one on
//! the pass mutex (FIFO, as provided by tokio).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::events::{Event, PreventableEvent, SequentialHook, SubscriberToken};
use crate::flatten::expand_graph;
use crate::graph::Graph;
use crate::order::{self, CalculationOrder};
use crate::types::{
  CalculationResult, CalculationResults, Connection, NodeInterface, Value,
};

/// Notifications produced by the engine.
#[derive(Default)]
pub struct EngineEvents {
  /// Fired before a pass starts, carrying the calculation data. A
  /// subscriber returning `false` vetoes the pass; `calculate` then
  /// returns `Ok(None)` with no side effects.
  pub before_calculate: PreventableEvent<Value>,
  /// Fired after a completed pass, carrying the result map.
  pub calculated: Event<CalculationResults>,
}

/// Hook chains consumed by the engine.
#[derive(Default)]
pub struct EngineHooks {
  /// Ordered chain of calculation-data transformers applied before each
  /// pass; the output of one tap is the input of the next.
  pub gather_calculation_data: SequentialHook<Value>,
}

/// Tokens of the engine's graph subscriptions, kept for [Engine::detach].
struct GraphSubscriptions {
  node_added: SubscriberToken,
  node_removed: SubscriberToken,
  node_updated: SubscriberToken,
  check_connection: SubscriberToken,
  connection_added: SubscriberToken,
  connection_removed: SubscriberToken,
}

/// Clears the in-progress flag on every exit path, including step failure.
struct InProgressGuard<'a>(&'a AtomicBool);

impl<'a> InProgressGuard<'a> {
  fn arm(flag: &'a AtomicBool) -> Self {
    flag.store(true, Ordering::SeqCst);
    Self(flag)
  }
}

impl Drop for InProgressGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// The dependency-graph execution engine.
///
/// Create one with [Engine::new]; it subscribes to the graph's
/// notifications and stays attached until dropped or [Engine::detach]ed.
pub struct Engine {
  graph: Arc<Graph>,
  pub events: EngineEvents,
  pub hooks: EngineHooks,
  calculate_on_change: bool,
  order: StdMutex<Option<Arc<CalculationOrder>>>,
  recalculate_order: AtomicBool,
  calculation_in_progress: AtomicBool,
  pass_mutex: Mutex<()>,
  root_nodes: StdMutex<Option<Vec<String>>>,
  subscriptions: StdMutex<Option<GraphSubscriptions>>,
}

impl Engine {
  /// Creates an engine attached to `graph`.
  ///
  /// With `calculate_on_change`, every observed graph change triggers an
  /// automatic pass while no pass is in progress (requires an active tokio
  /// runtime at the time of the change).
  pub fn new(graph: Arc<Graph>, calculate_on_change: bool) -> Arc<Self> {
    let engine = Arc::new(Self {
      graph,
      events: EngineEvents::default(),
      hooks: EngineHooks::default(),
      calculate_on_change,
      order: StdMutex::new(None),
      recalculate_order: AtomicBool::new(false),
      calculation_in_progress: AtomicBool::new(false),
      pass_mutex: Mutex::new(()),
      root_nodes: StdMutex::new(None),
      subscriptions: StdMutex::new(None),
    });
    Self::attach(&engine);
    engine
  }

  /// The graph this engine is attached to.
  pub fn graph(&self) -> &Arc<Graph> {
    &self.graph
  }

  /// The declared root-node ids, if any.
  pub fn root_nodes(&self) -> Option<Vec<String>> {
    self.root_nodes.lock().expect("root node list poisoned").clone()
  }

  /// Declares which nodes' calculation results the caller wants.
  ///
  /// `None` falls back to treating every sink as a root. Setting the list
  /// marks the cached order stale.
  pub fn set_root_nodes(&self, roots: Option<Vec<String>>) {
    *self.root_nodes.lock().expect("root node list poisoned") = roots;
    self.recalculate_order.store(true, Ordering::SeqCst);
  }

  /// Runs one calculation pass.
  ///
  /// Passes serialize on the engine's mutex: a call made while another
  /// pass is in flight waits its turn (FIFO). Returns `Ok(None)` when a
  /// `before_calculate` subscriber vetoed the pass, otherwise the raw step
  /// results of the resolved root nodes keyed by node id.
  pub async fn calculate(
    &self,
    calculation_data: Value,
  ) -> Result<Option<CalculationResults>, EngineError> {
    let _pass = self.pass_mutex.lock().await;
    self.run_pass(calculation_data).await
  }

  /// Forces recomputation of the cached calculation order.
  ///
  /// Normally the order recomputes lazily on the next pass after a
  /// structural change; this is the escape hatch for changes the automatic
  /// tracking cannot see.
  pub fn calculate_order(&self) -> Result<(), EngineError> {
    self.recompute_order().map(|_| ())
  }

  /// Whether committing a connection `from -> to` would keep the flattened
  /// graph acyclic.
  ///
  /// Endpoints carrying a template identity are first resolved against the
  /// flattened graph; an endpoint that cannot be resolved yet does not
  /// reject the proposal. A connection already targeting the same input is
  /// excluded from the tested set, since committing would supersede it.
  pub fn check_connection(
    &self,
    from: &Arc<NodeInterface>,
    to: &Arc<NodeInterface>,
  ) -> bool {
    let flat = expand_graph(&self.graph);

    let from = match &from.template_id {
      Some(template_id) => match flat.resolve_template(template_id) {
        Some(resolved) => resolved,
        None => return true,
      },
      None => from.clone(),
    };
    let to = match &to.template_id {
      Some(template_id) => match flat.resolve_template(template_id) {
        Some(resolved) => resolved,
        None => return true,
      },
      None => to.clone(),
    };

    let mut candidate: Vec<Arc<Connection>> = flat
      .connections
      .iter()
      .filter(|conn| conn.to.id != to.id)
      .cloned()
      .collect();
    candidate.push(Arc::new(Connection::new(from, to)));

    !order::contains_cycle(&flat.nodes, &candidate)
  }

  /// Unhooks the engine from the graph's notifications.
  pub fn detach(&self) {
    let subscriptions = self
      .subscriptions
      .lock()
      .expect("subscription list poisoned")
      .take();
    if let Some(subs) = subscriptions {
      let events = &self.graph.events;
      events.node_added.unsubscribe(subs.node_added);
      events.node_removed.unsubscribe(subs.node_removed);
      events.node_updated.unsubscribe(subs.node_updated);
      events.check_connection.unsubscribe(subs.check_connection);
      events.connection_added.unsubscribe(subs.connection_added);
      events.connection_removed.unsubscribe(subs.connection_removed);
    }
  }

  fn attach(engine: &Arc<Self>) {
    let events = &engine.graph.events;
    let subs = GraphSubscriptions {
      node_added: {
        let weak = Arc::downgrade(engine);
        events.node_added.subscribe(move |_| {
          if let Some(engine) = weak.upgrade() {
            engine.on_change(true);
          }
        })
      },
      node_removed: {
        let weak = Arc::downgrade(engine);
        events.node_removed.subscribe(move |_| {
          if let Some(engine) = weak.upgrade() {
            engine.on_change(true);
          }
        })
      },
      // A plain value update does not invalidate the order; an update of a
      // subgraph-bearing node may have changed its inner structure.
      node_updated: {
        let weak = Arc::downgrade(engine);
        events.node_updated.subscribe(move |node| {
          if let Some(engine) = weak.upgrade() {
            engine.on_change(node.subgraph.is_some());
          }
        })
      },
      check_connection: {
        let weak = Arc::downgrade(engine);
        events.check_connection.subscribe(move |proposal| {
          match weak.upgrade() {
            Some(engine) => engine.check_connection(&proposal.from, &proposal.to),
            None => true,
          }
        })
      },
      connection_added: {
        let weak = Arc::downgrade(engine);
        events.connection_added.subscribe(move |_| {
          if let Some(engine) = weak.upgrade() {
            engine.on_change(true);
          }
        })
      },
      connection_removed: {
        let weak = Arc::downgrade(engine);
        events.connection_removed.subscribe(move |_| {
          if let Some(engine) = weak.upgrade() {
            engine.on_change(true);
          }
        })
      },
    };
    *engine
      .subscriptions
      .lock()
      .expect("subscription list poisoned") = Some(subs);
  }

  fn on_change(self: Arc<Self>, structural: bool) {
    if structural {
      self.recalculate_order.store(true, Ordering::SeqCst);
    }
    if self.calculate_on_change && !self.calculation_in_progress.load(Ordering::SeqCst) {
      match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
          let engine = self.clone();
          handle.spawn(async move {
            if let Err(error) = engine.calculate(Value::Null).await {
              warn!(%error, "auto-triggered calculation failed");
            }
          });
        }
        Err(_) => {
          warn!("calculate_on_change is set but no tokio runtime is active; skipping automatic pass");
        }
      }
    }
  }

  #[instrument(level = "trace", skip(self, calculation_data))]
  async fn run_pass(
    &self,
    calculation_data: Value,
  ) -> Result<Option<CalculationResults>, EngineError> {
    if self.events.before_calculate.emit(&calculation_data) {
      debug!("calculation pass vetoed");
      return Ok(None);
    }
    let calculation_data = self.hooks.gather_calculation_data.execute(calculation_data);

    let in_progress = InProgressGuard::arm(&self.calculation_in_progress);

    let cached = self.order.lock().expect("order cache poisoned").clone();
    let order = match cached {
      Some(order) if !self.recalculate_order.load(Ordering::SeqCst) => order,
      _ => self.recompute_order()?,
    };

    let root_ids: HashSet<&str> = order.root_nodes.iter().map(|n| n.id.as_str()).collect();
    let mut results = CalculationResults::new();

    for node in &order.calculation_order {
      let step_result = match node.step() {
        Some(step) => {
          debug!(node_id = %node.id, node_type = %node.node_type, "calculating node");
          let result = step
            .calculate(node.input_values(), &calculation_data)
            .await
            .map_err(|source| EngineError::Step {
              node_id: node.id.clone(),
              source,
            })?;
          if let CalculationResult::Outputs(fields) = &result {
            for (name, value) in fields {
              match node.outputs.get(name) {
                Some(output) => output.set_value(value.clone()),
                None => warn!(
                  node_id = %node.id,
                  output = %name,
                  "step returned a value for an undeclared output interface"
                ),
              }
            }
          }
          result
        }
        None => CalculationResult::None,
      };

      // Transfer runs whether or not the node has a step: an inert node's
      // last-set outputs still flow downstream.
      if let Some(connections) = order.connections_from_node.get(&node.id) {
        for conn in connections {
          conn.to.set_value(conn.transfer(conn.from.value()));
        }
      }

      if root_ids.contains(node.id.as_str()) {
        results.insert(node.id.clone(), step_result);
      }
    }

    drop(in_progress);
    info!(nodes = order.calculation_order.len(), roots = results.len(), "calculation pass complete");
    self.events.calculated.emit(&results);
    Ok(Some(results))
  }

  fn recompute_order(&self) -> Result<Arc<CalculationOrder>, EngineError> {
    let flat = expand_graph(&self.graph);
    let roots = self.root_nodes.lock().expect("root node list poisoned").clone();
    let order = Arc::new(order::calculate_order(&flat, roots.as_deref())?);
    debug!(
      nodes = order.calculation_order.len(),
      roots = order.root_nodes.len(),
      "calculation order recomputed"
    );
    *self.order.lock().expect("order cache poisoned") = Some(order.clone());
    self.recalculate_order.store(false, Ordering::SeqCst);
    Ok(order)
  }
}
