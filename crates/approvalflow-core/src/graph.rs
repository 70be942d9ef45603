//! Acyclic dependency graph.
//!
//! Nodes live in an arena indexed by insertion order and edges are kept as an
//! explicit list plus a child adjacency table. An edge that would close a
//! cycle is rejected at insertion time, so the graph is a DAG at every point.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use thiserror::Error;

use approvalflow_protocols::EngineError;

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;

/// Graph construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Edge endpoint was never added as a node.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Edge from a node to itself.
    #[error("Node {0} cannot depend on itself")]
    SelfLoop(String),

    /// Edge would close a cycle.
    #[error("Dependency {parent} -> {dependent} would create a cycle")]
    Cycle { parent: String, dependent: String },
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

/// Directed acyclic graph over node keys `K`.
///
/// An edge `parent -> dependent` means the dependent waits for the parent.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    nodes: Vec<K>,
    index: HashMap<K, usize>,
    edges: Vec<(usize, usize)>,
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
}

impl<K> DependencyGraph<K>
where
    K: Copy + Eq + Hash + std::fmt::Display,
{
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Add a node, returning its arena slot. Adding twice is a no-op.
    pub fn add_node(&mut self, key: K) -> usize {
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.nodes.len();
        self.nodes.push(key);
        self.index.insert(key, slot);
        self.children.push(Vec::new());
        self.parents.push(Vec::new());
        slot
    }

    /// Whether `key` is a node.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add `parent -> dependent`.
    ///
    /// Returns `Ok(false)` when the edge already exists.
    pub fn add_edge(&mut self, parent: K, dependent: K) -> Result<bool, GraphError> {
        let p = self.slot(&parent)?;
        let d = self.slot(&dependent)?;

        if p == d {
            return Err(GraphError::SelfLoop(parent.to_string()));
        }
        if self.children[p].contains(&d) {
            return Ok(false);
        }
        if self.reaches(d, p) {
            return Err(GraphError::Cycle {
                parent: parent.to_string(),
                dependent: dependent.to_string(),
            });
        }

        self.edges.push((p, d));
        self.children[p].push(d);
        self.parents[d].push(p);
        Ok(true)
    }

    /// Whether adding `parent -> dependent` would close a cycle.
    pub fn would_create_cycle(&self, parent: &K, dependent: &K) -> bool {
        match (self.index.get(parent), self.index.get(dependent)) {
            (Some(&p), Some(&d)) => p == d || self.reaches(d, p),
            _ => false,
        }
    }

    /// Direct parents of `key`.
    pub fn parents(&self, key: &K) -> Vec<K> {
        self.index
            .get(key)
            .map(|&slot| self.parents[slot].iter().map(|&p| self.nodes[p]).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `key`.
    pub fn children(&self, key: &K) -> Vec<K> {
        self.index
            .get(key)
            .map(|&slot| self.children[slot].iter().map(|&c| self.nodes[c]).collect())
            .unwrap_or_default()
    }

    /// All edges as `(parent, dependent)` pairs, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (K, K)> + '_ {
        self.edges.iter().map(|&(p, d)| (self.nodes[p], self.nodes[d]))
    }

    /// Nodes ordered so that every parent precedes its dependents.
    ///
    /// Ties keep insertion order.
    pub fn topological_order(&self) -> Vec<K> {
        let mut in_degree: Vec<usize> = self.parents.iter().map(|p| p.len()).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&n| in_degree[n] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(slot) = queue.pop_front() {
            order.push(self.nodes[slot]);
            for &child in &self.children[slot] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }
        order
    }

    fn slot(&self, key: &K) -> Result<usize, GraphError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(key.to_string()))
    }

    /// Depth-first reachability from `from` to `to` along child edges.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];

        while let Some(slot) = stack.pop() {
            if slot == to {
                return true;
            }
            if visited[slot] {
                continue;
            }
            visited[slot] = true;
            stack.extend(self.children[slot].iter().copied());
        }
        false
    }
}

impl<K> Default for DependencyGraph<K>
where
    K: Copy + Eq + Hash + std::fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}
