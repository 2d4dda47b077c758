//! Topological orderer and cycle detector over a flattened graph.
//!
//! The orderer produces the cached artifact the engine executes from: the
//! calculation order, the resolved root set, and each node's outgoing
//! connections. Ties between simultaneously ready nodes break on original
//! graph insertion order, so the order is stable and deterministic.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::CycleError;
use crate::flatten::FlatGraph;
use crate::types::{Connection, Node};

/// Computed calculation order for one flat-graph snapshot.
///
/// Valid only for the snapshot it was derived from; the engine discards and
/// recomputes it on structural change, never patches it in place.
#[derive(Debug)]
pub struct CalculationOrder {
  /// Nodes in dependency-first execution order.
  pub calculation_order: Vec<Arc<Node>>,
  /// Resolved root nodes, in graph insertion order.
  pub root_nodes: Vec<Arc<Node>>,
  /// Outgoing connections of each ordered node, keyed by node id. Only
  /// connections between ordered nodes appear.
  pub connections_from_node: HashMap<String, Vec<Arc<Connection>>>,
}

/// Node-level edges of a flat graph: `(from index, to index, connection)`.
/// Connections whose endpoints do not belong to any known node are skipped.
fn node_edges(
  nodes: &[Arc<Node>],
  connections: &[Arc<Connection>],
) -> Vec<(usize, usize, Arc<Connection>)> {
  let mut owner_of: HashMap<&str, usize> = HashMap::new();
  for (index, node) in nodes.iter().enumerate() {
    for intf in node.interfaces() {
      owner_of.insert(intf.id.as_str(), index);
    }
  }

  connections
    .iter()
    .filter_map(|conn| {
      let from = owner_of.get(conn.from.id.as_str())?;
      let to = owner_of.get(conn.to.id.as_str())?;
      Some((*from, *to, conn.clone()))
    })
    .collect()
}

/// Whether the flat node/connection set contains a directed cycle.
///
/// Kahn-residue check: if peeling zero-in-degree nodes cannot consume the
/// whole graph, the remainder is cyclic.
#[instrument(level = "trace", skip_all, fields(nodes = nodes.len(), connections = connections.len()))]
pub fn contains_cycle(nodes: &[Arc<Node>], connections: &[Arc<Connection>]) -> bool {
  let edges = node_edges(nodes, connections);

  let mut in_degree = vec![0usize; nodes.len()];
  let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
  for (from, to, _) in &edges {
    in_degree[*to] += 1;
    outgoing[*from].push(*to);
  }

  let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|i| in_degree[*i] == 0).collect();
  let mut peeled = 0usize;
  while let Some(index) = queue.pop_front() {
    peeled += 1;
    for &to in &outgoing[index] {
      in_degree[to] -= 1;
      if in_degree[to] == 0 {
        queue.push_back(to);
      }
    }
  }
  peeled != nodes.len()
}

/// Computes the calculation order of a flat graph.
///
/// With declared roots, the order is restricted to those nodes plus every
/// node reachable by following connections backward from them; everything
/// else is excluded. Without declared roots, every sink is a root and the
/// order covers the whole flat graph. Fails with [CycleError] if the
/// restricted graph is not a DAG; no partial order is produced.
#[instrument(level = "trace", skip_all, fields(nodes = flat.nodes.len(), declared_roots = root_ids.map(|r| r.len())))]
pub fn calculate_order(
  flat: &FlatGraph,
  root_ids: Option<&[String]>,
) -> Result<CalculationOrder, CycleError> {
  let nodes = &flat.nodes;
  let edges = node_edges(nodes, &flat.connections);

  let mut outgoing: Vec<Vec<(usize, Arc<Connection>)>> = vec![Vec::new(); nodes.len()];
  let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
  for (from, to, conn) in &edges {
    outgoing[*from].push((*to, conn.clone()));
    incoming[*to].push(*from);
  }

  let index_of: HashMap<&str, usize> = nodes
    .iter()
    .enumerate()
    .map(|(index, node)| (node.id.as_str(), index))
    .collect();

  // Resolve roots: declared ids, or every sink when none are declared.
  let declared = root_ids.filter(|ids| !ids.is_empty());
  let root_indices: HashSet<usize> = match declared {
    Some(ids) => ids
      .iter()
      .filter_map(|id| {
        let index = index_of.get(id.as_str()).copied();
        if index.is_none() {
          debug!(node_id = %id, "declared root node is not part of the flattened graph");
        }
        index
      })
      .collect(),
    None => (0..nodes.len()).filter(|i| outgoing[*i].is_empty()).collect(),
  };

  // Restrict to the roots and their transitive dependencies.
  let included: HashSet<usize> = if declared.is_some() {
    let mut reachable: HashSet<usize> = HashSet::new();
    let mut queue: VecDeque<usize> = root_indices.iter().copied().collect();
    while let Some(index) = queue.pop_front() {
      if !reachable.insert(index) {
        continue;
      }
      for &from in &incoming[index] {
        queue.push_back(from);
      }
    }
    reachable
  } else {
    (0..nodes.len()).collect()
  };

  // Kahn's algorithm over the restricted set; among ready candidates the
  // lowest insertion index always goes first.
  let mut in_degree = vec![0usize; nodes.len()];
  for (from, to, _) in &edges {
    if included.contains(from) && included.contains(to) {
      in_degree[*to] += 1;
    }
  }
  let mut ready: BTreeSet<usize> = included
    .iter()
    .copied()
    .filter(|i| in_degree[*i] == 0)
    .collect();

  let mut calculation_order = Vec::with_capacity(included.len());
  while let Some(index) = ready.pop_first() {
    calculation_order.push(nodes[index].clone());
    for (to, _) in &outgoing[index] {
      if included.contains(to) {
        in_degree[*to] -= 1;
        if in_degree[*to] == 0 {
          ready.insert(*to);
        }
      }
    }
  }

  if calculation_order.len() != included.len() {
    return Err(CycleError);
  }

  let connections_from_node: HashMap<String, Vec<Arc<Connection>>> = included
    .iter()
    .map(|&index| {
      let conns = outgoing[index]
        .iter()
        .filter(|(to, _)| included.contains(to))
        .map(|(_, conn)| conn.clone())
        .collect();
      (nodes[index].id.clone(), conns)
    })
    .collect();

  let root_nodes: Vec<Arc<Node>> = nodes
    .iter()
    .enumerate()
    .filter(|(index, _)| root_indices.contains(index))
    .map(|(_, node)| node.clone())
    .collect();

  Ok(CalculationOrder {
    calculation_order,
    root_nodes,
    connections_from_node,
  })
}
