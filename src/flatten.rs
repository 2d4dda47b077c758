//! Graph flattener: expands subgraph-bearing nodes into a flat view.
//!
//! Connections that cross a subgraph boundary are rewritten by matching
//! template identities between the outer node's interfaces and the inner
//! graph's boundary interfaces. Flattening never mutates the source graph;
//! rewritten connections are fresh records sharing the original transfer
//! hook.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{instrument, warn};

use crate::graph::Graph;
use crate::types::{Connection, Node, NodeInterface};

/// Flat view of a graph: no subgraph-bearing nodes remain.
///
/// Carries the template-identity lookup table built during flattening, used
/// to resolve proposed connection endpoints that still reference a
/// not-yet-flattened subgraph boundary.
pub struct FlatGraph {
  /// Flattened nodes, original insertion order preserved level by level.
  pub nodes: Vec<Arc<Node>>,
  /// Flattened connections, boundary edges rewritten to inner interfaces.
  pub connections: Vec<Arc<Connection>>,
  templates: HashMap<String, Arc<NodeInterface>>,
}

impl FlatGraph {
  /// Assembles a flat view and indexes its template identities.
  pub fn new(nodes: Vec<Arc<Node>>, connections: Vec<Arc<Connection>>) -> Self {
    let mut templates = HashMap::new();
    for node in &nodes {
      for intf in node.interfaces() {
        if let Some(template_id) = &intf.template_id {
          templates.insert(template_id.clone(), intf.clone());
        }
      }
    }
    Self {
      nodes,
      connections,
      templates,
    }
  }

  /// Looks up the flat interface carrying a template identity.
  pub fn resolve_template(&self, template_id: &str) -> Option<Arc<NodeInterface>> {
    self.templates.get(template_id).cloned()
  }
}

/// Expands every subgraph-bearing node into its constituent nodes and
/// connections, recursively, producing a flat view of `graph`.
#[instrument(level = "trace", skip(graph), fields(graph_id = %graph.id))]
pub fn expand_graph(graph: &Graph) -> FlatGraph {
  let (nodes, connections) = expand_level(graph.nodes(), graph.connections());
  FlatGraph::new(nodes, connections)
}

fn expand_level(
  nodes: Vec<Arc<Node>>,
  connections: Vec<Arc<Connection>>,
) -> (Vec<Arc<Node>>, Vec<Arc<Connection>>) {
  let mut flat_nodes = Vec::new();
  let mut flat_connections = connections;

  for node in nodes {
    let Some(subgraph) = node.subgraph.clone() else {
      flat_nodes.push(node);
      continue;
    };

    let (inner_nodes, inner_connections) =
      expand_level(subgraph.nodes(), subgraph.connections());

    // Template table of the inner view: template id -> inner interface.
    let mut inner_templates: HashMap<String, Arc<NodeInterface>> = HashMap::new();
    for inner in &inner_nodes {
      for intf in inner.interfaces() {
        if let Some(template_id) = &intf.template_id {
          inner_templates.insert(template_id.clone(), intf.clone());
        }
      }
    }

    // Outer boundary: interface id -> resolved inner interface, if any.
    let boundary: HashMap<String, Option<Arc<NodeInterface>>> = node
      .interfaces()
      .map(|intf| {
        let resolved = intf
          .template_id
          .as_ref()
          .and_then(|template_id| inner_templates.get(template_id).cloned());
        (intf.id.clone(), resolved)
      })
      .collect();

    flat_connections = flat_connections
      .into_iter()
      .filter_map(|conn| {
        let from_hit = boundary.get(&conn.from.id);
        let to_hit = boundary.get(&conn.to.id);
        if from_hit.is_none() && to_hit.is_none() {
          return Some(conn);
        }
        let from = match from_hit {
          None => conn.from.clone(),
          Some(Some(inner)) => inner.clone(),
          Some(None) => {
            warn!(
              node_id = %node.id,
              interface_id = %conn.from.id,
              "dropping boundary connection with unresolved template identity"
            );
            return None;
          }
        };
        let to = match to_hit {
          None => conn.to.clone(),
          Some(Some(inner)) => inner.clone(),
          Some(None) => {
            warn!(
              node_id = %node.id,
              interface_id = %conn.to.id,
              "dropping boundary connection with unresolved template identity"
            );
            return None;
          }
        };
        Some(Arc::new(conn.rewired(from, to)))
      })
      .collect();

    flat_nodes.extend(inner_nodes);
    flat_connections.extend(inner_connections);
  }

  (flat_nodes, flat_connections)
}
