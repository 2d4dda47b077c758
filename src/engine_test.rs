//! Tests for the calculation engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::engine::Engine;
use crate::error::{EngineError, GraphError, StepError};
use crate::graph::Graph;
use crate::types::{
  CalculationResult, CalculationResults, CalculationStep, FnStep, Node, NodeInterface,
  StepInputs, Value,
};

/// `(tag, input value seen)` per executed step, in execution order.
type ExecutionLog = Arc<Mutex<Vec<(String, i64)>>>;

fn source(tag: &str, value: i64, log: ExecutionLog) -> Arc<Node> {
  let tag = tag.to_string();
  Node::builder("test.source")
    .input("in")
    .output("out")
    .step(FnStep(
      move |_inputs: StepInputs, _data: &Value| -> Result<CalculationResult, StepError> {
        log.lock().unwrap().push((tag.clone(), value));
        Ok(CalculationResult::single("out", json!(value)))
      },
    ))
    .build()
}

fn add_one(tag: &str, log: ExecutionLog) -> Arc<Node> {
  let tag = tag.to_string();
  Node::builder("test.add_one")
    .input("in")
    .output("out")
    .step(FnStep(
      move |inputs: StepInputs, _data: &Value| -> Result<CalculationResult, StepError> {
        let seen = inputs["in"].as_i64().unwrap_or(-1);
        log.lock().unwrap().push((tag.clone(), seen));
        Ok(CalculationResult::single("out", json!(seen + 1)))
      },
    ))
    .build()
}

/// a(=1) -> b(+1) -> c(+1), in one graph, engine not yet attached.
fn linear_graph(log: &ExecutionLog) -> (Arc<Graph>, Arc<Node>, Arc<Node>, Arc<Node>) {
  let graph = Arc::new(Graph::new());
  let a = graph.add_node(source("a", 1, log.clone()));
  let b = graph.add_node(add_one("b", log.clone()));
  let c = graph.add_node(add_one("c", log.clone()));
  graph
    .add_connection(&a.outputs["out"], &b.inputs["in"])
    .expect("a->b");
  graph
    .add_connection(&b.outputs["out"], &c.inputs["in"])
    .expect("b->c");
  (graph, a, b, c)
}

#[tokio::test]
async fn linear_pass_runs_nodes_in_order_and_propagates_values() {
  let log: ExecutionLog = Arc::default();
  let (graph, _a, _b, c) = linear_graph(&log);
  let engine = Engine::new(graph, false);
  engine.set_root_nodes(Some(vec![c.id.clone()]));

  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");

  // a ran first; b saw a's output before running; c saw b's.
  assert_eq!(
    *log.lock().unwrap(),
    vec![
      ("a".to_string(), 1),
      ("b".to_string(), 1),
      ("c".to_string(), 2)
    ]
  );
  assert_eq!(results.len(), 1);
  assert_eq!(results[&c.id], CalculationResult::single("out", json!(3)));
}

#[tokio::test]
async fn result_keys_equal_the_resolved_root_set() {
  let log: ExecutionLog = Arc::default();
  let (graph, _a, b, c) = linear_graph(&log);
  let engine = Engine::new(graph, false);
  engine.set_root_nodes(Some(vec![b.id.clone(), c.id.clone()]));

  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  let mut keys: Vec<&String> = results.keys().collect();
  keys.sort();
  let mut expected = [&b.id, &c.id];
  expected.sort();
  assert_eq!(keys, expected);
}

#[tokio::test]
async fn inert_root_records_an_empty_result() {
  let log: ExecutionLog = Arc::default();
  let graph = Arc::new(Graph::new());
  let s = graph.add_node(source("s", 5, log));
  let sink = graph.add_node(Node::builder("inert.sink").input("in").build());
  graph
    .add_connection(&s.outputs["out"], &sink.inputs["in"])
    .expect("s->sink");
  let engine = Engine::new(graph, false);

  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  assert_eq!(results.len(), 1);
  assert_eq!(results[&sink.id], CalculationResult::None);
}

#[tokio::test]
async fn inert_node_values_flow_downstream() {
  let log: ExecutionLog = Arc::default();
  let graph = Arc::new(Graph::new());
  let s = graph.add_node(source("s", 100, log.clone()));
  // Inert pass-through: no step, output holds a previously set value.
  let relay = graph.add_node(
    Node::builder("inert.relay")
      .input("in")
      .output_with_value("out", json!(7))
      .build(),
  );
  let consumer = graph.add_node(add_one("consumer", log.clone()));
  graph
    .add_connection(&s.outputs["out"], &relay.inputs["in"])
    .expect("s->relay");
  graph
    .add_connection(&relay.outputs["out"], &consumer.inputs["in"])
    .expect("relay->consumer");
  let engine = Engine::new(graph, false);

  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");

  // The relay kept its prior output (no step ran), yet the value still
  // propagated; the consumer executed with it.
  assert_eq!(relay.outputs["out"].value(), json!(7));
  assert_eq!(relay.inputs["in"].value(), json!(100));
  assert!(log.lock().unwrap().contains(&("consumer".to_string(), 7)));
  assert_eq!(results[&consumer.id], CalculationResult::single("out", json!(8)));
}

#[tokio::test]
async fn vetoed_pass_returns_none_and_runs_no_step() {
  let log: ExecutionLog = Arc::default();
  let (graph, _a, _b, _c) = linear_graph(&log);
  let engine = Engine::new(graph, false);
  engine.events.before_calculate.subscribe(|_| false);

  let result = engine.calculate(Value::Null).await.expect("no error");
  assert!(result.is_none());
  assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gathering_hooks_transform_data_in_order() {
  let graph = Arc::new(Graph::new());
  let probe = graph.add_node(
    Node::builder("test.probe")
      .output("out")
      .step(FnStep(
        |_inputs: StepInputs, data: &Value| -> Result<CalculationResult, StepError> {
          Ok(CalculationResult::single("out", data.clone()))
        },
      ))
      .build(),
  );
  let engine = Engine::new(graph, false);
  engine
    .hooks
    .gather_calculation_data
    .tap(|data| json!(data.as_i64().unwrap_or(0) + 1));
  engine
    .hooks
    .gather_calculation_data
    .tap(|data| json!(data.as_i64().unwrap_or(0) * 10));

  let results = engine
    .calculate(json!(4))
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  assert_eq!(results[&probe.id], CalculationResult::single("out", json!(50)));
}

#[tokio::test]
async fn repeated_passes_on_unchanged_graph_are_idempotent() {
  let log: ExecutionLog = Arc::default();
  let (graph, _a, _b, _c) = linear_graph(&log);
  let engine = Engine::new(graph, false);

  let first = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  let second = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  assert_eq!(first, second);
}

#[tokio::test]
async fn step_failure_aborts_the_pass_and_engine_recovers() {
  let log: ExecutionLog = Arc::default();
  let graph = Arc::new(Graph::new());
  let fail_once = Arc::new(AtomicBool::new(true));
  let flaky = {
    let fail_once = fail_once.clone();
    graph.add_node(
      Node::builder("test.flaky")
        .output("out")
        .step(FnStep(
          move |_inputs: StepInputs, _data: &Value| -> Result<CalculationResult, StepError> {
            if fail_once.swap(false, Ordering::SeqCst) {
              return Err("deliberate failure".into());
            }
            Ok(CalculationResult::single("out", json!(1)))
          },
        ))
        .build(),
    )
  };
  let downstream = graph.add_node(add_one("downstream", log.clone()));
  graph
    .add_connection(&flaky.outputs["out"], &downstream.inputs["in"])
    .expect("flaky->downstream");
  let engine = Engine::new(graph, false);

  let err = engine
    .calculate(Value::Null)
    .await
    .expect_err("first pass fails");
  match err {
    EngineError::Step { node_id, .. } => assert_eq!(node_id, flaky.id),
    other => panic!("expected step failure, got {other:?}"),
  }
  // The failing step aborted the pass before downstream ran.
  assert!(log.lock().unwrap().is_empty());

  // The in-progress flag was cleared: the next pass runs normally.
  let results = engine
    .calculate(Value::Null)
    .await
    .expect("second pass succeeds")
    .expect("not vetoed");
  assert_eq!(
    results[&downstream.id],
    CalculationResult::single("out", json!(2))
  );
}

#[tokio::test]
async fn calculate_fails_hard_on_a_cyclic_graph() {
  // Build the cycle before the engine attaches its veto subscriber.
  let graph = Arc::new(Graph::new());
  let a = graph.add_node(Node::builder("a").input("in").output("out").build());
  let b = graph.add_node(Node::builder("b").input("in").output("out").build());
  graph
    .add_connection(&a.outputs["out"], &b.inputs["in"])
    .expect("a->b");
  graph
    .add_connection(&b.outputs["out"], &a.inputs["in"])
    .expect("b->a commits: nothing vetoes yet");
  let engine = Engine::new(graph, false);

  let err = engine.calculate(Value::Null).await.expect_err("cycle");
  assert!(matches!(err, EngineError::Cycle(_)));
}

#[test]
fn check_connection_rejects_a_cycle_closing_edge() {
  let log: ExecutionLog = Arc::default();
  let (graph, a, b, _c) = linear_graph(&log);
  let engine = Engine::new(graph.clone(), false);

  assert!(!engine.check_connection(&b.outputs["out"], &a.inputs["in"]));
  let rejected = graph.add_connection(&b.outputs["out"], &a.inputs["in"]);
  assert!(matches!(
    rejected,
    Err(GraphError::ConnectionRejected { .. })
  ));
}

#[test]
fn check_connection_ignores_the_superseded_connection() {
  // a -> b and b -> a exist (built unobserved): the graph is cyclic. A
  // proposal replacing the edge into a's input is tested without it, so
  // the replacement that breaks the cycle is allowed.
  let graph = Arc::new(Graph::new());
  let a = graph.add_node(Node::builder("a").input("in").output("out").build());
  let b = graph.add_node(Node::builder("b").input("in").output("out").build());
  let fresh = graph.add_node(Node::builder("fresh").output("out").build());
  graph
    .add_connection(&a.outputs["out"], &b.inputs["in"])
    .expect("a->b");
  graph
    .add_connection(&b.outputs["out"], &a.inputs["in"])
    .expect("b->a commits: nothing vetoes yet");
  let engine = Engine::new(graph, false);

  assert!(engine.check_connection(&fresh.outputs["out"], &a.inputs["in"]));
}

#[test]
fn check_connection_allows_unresolved_template_endpoints() {
  let log: ExecutionLog = Arc::default();
  let (graph, a, _b, _c) = linear_graph(&log);
  let engine = Engine::new(graph, false);

  let dangling = Arc::new(NodeInterface::templated("not-flattened-yet"));
  assert!(engine.check_connection(&dangling, &a.inputs["in"]));
}

#[tokio::test]
async fn structural_change_triggers_an_automatic_pass() {
  let log: ExecutionLog = Arc::default();
  let graph = Arc::new(Graph::new());
  graph.add_node(source("s", 5, log));
  let engine = Engine::new(graph.clone(), true);

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  engine.events.calculated.subscribe(move |results: &CalculationResults| {
    let _ = tx.send(results.len());
  });

  graph.add_node(Node::builder("late.inert").build());

  let roots = tokio::time::timeout(Duration::from_secs(2), rx.recv())
    .await
    .expect("automatic pass should run")
    .expect("channel open");
  assert!(roots >= 1);
}

#[tokio::test]
async fn change_during_a_pass_only_marks_the_order_stale() {
  let graph = Arc::new(Graph::new());
  let mutator = {
    let graph = graph.clone();
    Node::builder("test.mutator")
      .output("out")
      .step(FnStep(
        move |_inputs: StepInputs, _data: &Value| -> Result<CalculationResult, StepError> {
          graph.add_node(Node::builder("added.mid.pass").build());
          Ok(CalculationResult::None)
        },
      ))
      .build()
  };
  graph.add_node(mutator);
  let engine = Engine::new(graph.clone(), true);

  let passes = Arc::new(AtomicUsize::new(0));
  {
    let passes = passes.clone();
    engine.events.calculated.subscribe(move |_| {
      passes.fetch_add(1, Ordering::SeqCst);
    });
  }

  let results = engine.calculate(Value::Null).await.expect("pass succeeds");
  assert!(results.is_some());

  // The mid-pass change must not have spawned a second pass.
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(passes.load(Ordering::SeqCst), 1);
  // The next pass picks up the added node.
  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  assert!(results.contains_key(&graph.nodes()[1].id));
}

struct SlowStep {
  running: Arc<AtomicBool>,
  overlapped: Arc<AtomicBool>,
}

#[async_trait]
impl CalculationStep for SlowStep {
  async fn calculate(
    &self,
    _inputs: StepInputs,
    _data: &Value,
  ) -> Result<CalculationResult, StepError> {
    if self.running.swap(true, Ordering::SeqCst) {
      self.overlapped.store(true, Ordering::SeqCst);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    self.running.store(false, Ordering::SeqCst);
    Ok(CalculationResult::None)
  }
}

#[tokio::test]
async fn concurrent_calculate_calls_serialize_on_the_pass_mutex() {
  let graph = Arc::new(Graph::new());
  let running = Arc::new(AtomicBool::new(false));
  let overlapped = Arc::new(AtomicBool::new(false));
  graph.add_node(
    Node::builder("test.slow")
      .output("out")
      .step(SlowStep {
        running: running.clone(),
        overlapped: overlapped.clone(),
      })
      .build(),
  );
  let engine = Engine::new(graph, false);

  let (first, second) = tokio::join!(
    engine.calculate(Value::Null),
    engine.calculate(Value::Null)
  );
  assert!(first.expect("first pass").is_some());
  assert!(second.expect("second pass").is_some());
  assert!(!overlapped.load(Ordering::SeqCst), "passes must not overlap");
}

#[tokio::test]
async fn set_root_nodes_invalidates_the_cached_order() {
  let log: ExecutionLog = Arc::default();
  let (graph, a, _b, c) = linear_graph(&log);
  let engine = Engine::new(graph, false);

  engine.set_root_nodes(Some(vec![a.id.clone()]));
  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  assert_eq!(results.len(), 1);
  assert!(results.contains_key(&a.id));

  engine.set_root_nodes(Some(vec![c.id.clone()]));
  let results = engine
    .calculate(Value::Null)
    .await
    .expect("pass succeeds")
    .expect("not vetoed");
  assert_eq!(results.len(), 1);
  assert!(results.contains_key(&c.id));
  assert_eq!(engine.root_nodes(), Some(vec![c.id.clone()]));
}

#[tokio::test]
async fn calculate_order_is_an_explicit_escape_hatch() {
  let log: ExecutionLog = Arc::default();
  let (graph, _a, _b, _c) = linear_graph(&log);
  let engine = Engine::new(graph, false);

  engine.calculate_order().expect("order computes");
  let results = engine.calculate(Value::Null).await.expect("pass succeeds");
  assert!(results.is_some());
}

#[test]
fn detach_stops_change_tracking() {
  let log: ExecutionLog = Arc::default();
  let (graph, a, b, _c) = linear_graph(&log);
  let engine = Engine::new(graph.clone(), false);
  engine.detach();

  // Without the engine's veto subscriber, a cycle-closing edge commits.
  assert!(
    graph
      .add_connection(&b.outputs["out"], &a.inputs["in"])
      .is_ok()
  );
}
