//! Graph model: nodes and connections at one level, with change
//! notifications.
//!
//! The model is interior-mutable so one `Arc<Graph>` can be shared between
//! the embedding application (which edits it) and the engine (which
//! observes it). Mutations emit their notifications after the internal
//! locks are released, so a subscriber may re-read the graph freely.

use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::error::GraphError;
use crate::events::{Event, PreventableEvent};
use crate::types::{Connection, Node, NodeInterface, Value};

/// A proposed connection, announced before it is committed.
#[derive(Debug, Clone)]
pub struct ConnectionProposal {
  pub from: Arc<NodeInterface>,
  pub to: Arc<NodeInterface>,
}

/// Notifications produced by the graph model.
#[derive(Default)]
pub struct GraphEvents {
  pub node_added: Event<Arc<Node>>,
  pub node_removed: Event<Arc<Node>>,
  /// Fired by the embedding application when a node changed in place
  /// (e.g. a user edited an interface value).
  pub node_updated: Event<Arc<Node>>,
  /// Preventable: fired before a connection is committed. A subscriber
  /// returning `false` vetoes the connection.
  pub check_connection: PreventableEvent<ConnectionProposal>,
  pub connection_added: Event<Arc<Connection>>,
  pub connection_removed: Event<Arc<Connection>>,
}

/// The set of nodes and connections at one level, in insertion order.
///
/// Nodes may themselves own subgraphs; the flattener expands those before
/// ordering. Lifetime matches the embedding session.
pub struct Graph {
  /// Unique graph id.
  pub id: String,
  pub events: GraphEvents,
  nodes: Mutex<Vec<Arc<Node>>>,
  connections: Mutex<Vec<Arc<Connection>>>,
}

impl Graph {
  pub fn new() -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      events: GraphEvents::default(),
      nodes: Mutex::new(Vec::new()),
      connections: Mutex::new(Vec::new()),
    }
  }

  /// Snapshot of the nodes, in insertion order.
  pub fn nodes(&self) -> Vec<Arc<Node>> {
    self.nodes.lock().expect("graph node list poisoned").clone()
  }

  /// Snapshot of the connections, in insertion order.
  pub fn connections(&self) -> Vec<Arc<Connection>> {
    self
      .connections
      .lock()
      .expect("graph connection list poisoned")
      .clone()
  }

  /// Finds a node by id.
  pub fn node(&self, id: &str) -> Option<Arc<Node>> {
    self
      .nodes
      .lock()
      .expect("graph node list poisoned")
      .iter()
      .find(|n| n.id == id)
      .cloned()
  }

  /// Adds a node and emits `node_added`.
  pub fn add_node(&self, node: Arc<Node>) -> Arc<Node> {
    self
      .nodes
      .lock()
      .expect("graph node list poisoned")
      .push(node.clone());
    debug!(node_id = %node.id, node_type = %node.node_type, "node added");
    self.events.node_added.emit(&node);
    node
  }

  /// Removes a node together with every connection touching one of its
  /// interfaces, emitting `connection_removed` for each and `node_removed`
  /// for the node itself.
  pub fn remove_node(&self, node: &Arc<Node>) {
    let attached: Vec<Arc<Connection>> = {
      let connections = self
        .connections
        .lock()
        .expect("graph connection list poisoned");
      connections
        .iter()
        .filter(|c| {
          node
            .interfaces()
            .any(|intf| intf.id == c.from.id || intf.id == c.to.id)
        })
        .cloned()
        .collect()
    };
    for conn in &attached {
      self.remove_connection(conn);
    }

    let removed = {
      let mut nodes = self.nodes.lock().expect("graph node list poisoned");
      let before = nodes.len();
      nodes.retain(|n| n.id != node.id);
      nodes.len() != before
    };
    if removed {
      debug!(node_id = %node.id, "node removed");
      self.events.node_removed.emit(node);
    }
  }

  /// Proposes and, unless vetoed, commits a connection with the identity
  /// transfer hook.
  ///
  /// The preventable `check_connection` notification fires first; a veto
  /// yields [GraphError::ConnectionRejected] and nothing is changed. An
  /// accepted connection first displaces any existing connection into the
  /// same input interface (emitting its `connection_removed`), then is
  /// installed and announced via `connection_added`.
  pub fn add_connection(
    &self,
    from: &Arc<NodeInterface>,
    to: &Arc<NodeInterface>,
  ) -> Result<Arc<Connection>, GraphError> {
    self.commit_connection(Connection::new(from.clone(), to.clone()))
  }

  /// Like [Graph::add_connection], with a custom transfer hook.
  pub fn add_connection_with_transfer(
    &self,
    from: &Arc<NodeInterface>,
    to: &Arc<NodeInterface>,
    transfer: impl Fn(Value) -> Value + Send + Sync + 'static,
  ) -> Result<Arc<Connection>, GraphError> {
    self.commit_connection(Connection::with_transfer(from.clone(), to.clone(), transfer))
  }

  /// Removes a connection and emits `connection_removed`.
  pub fn remove_connection(&self, conn: &Arc<Connection>) {
    let removed = {
      let mut connections = self
        .connections
        .lock()
        .expect("graph connection list poisoned");
      let before = connections.len();
      connections.retain(|c| c.id != conn.id);
      connections.len() != before
    };
    if removed {
      debug!(connection_id = %conn.id, "connection removed");
      self.events.connection_removed.emit(conn);
    }
  }

  /// Announces an in-place node change (e.g. an edited interface value).
  pub fn notify_node_updated(&self, node: &Arc<Node>) {
    self.events.node_updated.emit(node);
  }

  fn commit_connection(&self, conn: Connection) -> Result<Arc<Connection>, GraphError> {
    let proposal = ConnectionProposal {
      from: conn.from.clone(),
      to: conn.to.clone(),
    };
    if self.events.check_connection.emit(&proposal) {
      debug!(from = %conn.from.id, to = %conn.to.id, "connection vetoed");
      return Err(GraphError::ConnectionRejected {
        from_id: conn.from.id.clone(),
        to_id: conn.to.id.clone(),
      });
    }

    // One incoming connection per input: displace the old one first.
    let superseded: Vec<Arc<Connection>> = {
      let connections = self
        .connections
        .lock()
        .expect("graph connection list poisoned");
      connections
        .iter()
        .filter(|c| c.to.id == conn.to.id)
        .cloned()
        .collect()
    };
    for old in &superseded {
      self.remove_connection(old);
    }

    let conn = Arc::new(conn);
    self
      .connections
      .lock()
      .expect("graph connection list poisoned")
      .push(conn.clone());
    debug!(connection_id = %conn.id, from = %conn.from.id, to = %conn.to.id, "connection added");
    self.events.connection_added.emit(&conn);
    Ok(conn)
  }
}

impl Default for Graph {
  fn default() -> Self {
    Self::new()
  }
}
