//! Subgraph pattern detection.
//!
//! A [`Pattern`] is plain data: a list of role-tagged node specs and the
//! edges expected between them. [`GraphPatternDetector`] enumerates every
//! placement of the pattern in an [`IrGraph`] with a backtracking search and
//! hands each one to a caller-supplied handler as a [`Subgraph`].
//!
//! Enumeration is deterministic: the search is anchored at the first
//! operator node of the pattern and visits candidates in ascending
//! [`NodeId`] order, so matches are reported in first-discovery order.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;
use weld_core::{Error, IrGraph, Node, NodeId, Result};

/// How a matched node relates to the rest of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// No role-specific checks.
    Plain,

    /// Boundary input: survives the rewrite and feeds the new operator.
    Input,

    /// Interior node eliminated by the rewrite.
    ///
    /// It belongs to at most one reported match. For variables, every
    /// consumer must also lie inside the match.
    Intermediate,

    /// Boundary output: survives the rewrite with its identity unchanged.
    Output,
}

/// What kind of graph node a pattern node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMatcher {
    /// An operator of the given type.
    Op(&'static str),

    /// Any variable.
    Var,
}

/// Extra node-local conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// The variable is (or is not) persistable.
    Persistable(bool),

    /// Exact number of outgoing edges (consumers of a variable, outputs of
    /// an operator).
    OutputCount(usize),
}

/// One node of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    /// Role name used to fetch the bound node from a [`Subgraph`].
    pub name: &'static str,
    pub matcher: NodeMatcher,
    pub role: NodeRole,
    pub constraints: Vec<Constraint>,
}

impl PatternNode {
    /// An operator node of the given type.
    pub fn op(name: &'static str, op_type: &'static str) -> Self {
        Self {
            name,
            matcher: NodeMatcher::Op(op_type),
            role: NodeRole::Plain,
            constraints: Vec::new(),
        }
    }

    /// A variable node.
    pub fn var(name: &'static str) -> Self {
        Self {
            name,
            matcher: NodeMatcher::Var,
            role: NodeRole::Plain,
            constraints: Vec::new(),
        }
    }

    pub fn as_input(mut self) -> Self {
        self.role = NodeRole::Input;
        self
    }

    pub fn as_intermediate(mut self) -> Self {
        self.role = NodeRole::Intermediate;
        self
    }

    pub fn as_output(mut self) -> Self {
        self.role = NodeRole::Output;
        self
    }

    /// Require a persistable variable (a weight).
    pub fn persistable(mut self) -> Self {
        self.constraints.push(Constraint::Persistable(true));
        self
    }

    /// Require exactly `n` outgoing edges.
    pub fn output_count(mut self, n: usize) -> Self {
        self.constraints.push(Constraint::OutputCount(n));
        self
    }

    /// Node-local check: kind, operator type and constraints.
    fn accepts(&self, graph: &IrGraph, id: NodeId) -> bool {
        let Ok(node) = graph.node(id) else {
            return false;
        };

        let kind_ok = match (self.matcher, node) {
            (NodeMatcher::Op(op_type), Node::Op(desc)) => desc.op_type == op_type,
            (NodeMatcher::Var, Node::Var(_)) => true,
            _ => false,
        };

        kind_ok
            && self.constraints.iter().all(|c| match *c {
                Constraint::Persistable(expected) => {
                    matches!(node, Node::Var(var) if var.persistable == expected)
                }
                Constraint::OutputCount(n) => graph.outputs_of(id).len() == n,
            })
    }
}

/// A directed edge the pattern requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternEdge {
    pub from: &'static str,
    pub to: &'static str,

    /// Argument slot on the operator end. When set, the variable must be
    /// bound to that slot of the operator's descriptor.
    pub slot: Option<&'static str>,
}

impl PatternEdge {
    /// An edge without a slot requirement.
    pub fn link(from: &'static str, to: &'static str) -> Self {
        Self {
            from,
            to,
            slot: None,
        }
    }

    /// An edge bound to an argument slot of its operator end.
    pub fn arg(from: &'static str, to: &'static str, slot: &'static str) -> Self {
        Self {
            from,
            to,
            slot: Some(slot),
        }
    }
}

/// A declarative subgraph template.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Name used in log messages.
    pub name: &'static str,
    pub nodes: Vec<PatternNode>,
    pub edges: Vec<PatternEdge>,
}

impl Pattern {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Check the pattern is well formed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if:
    /// - Two nodes share a role name
    /// - An edge references an unknown role
    /// - An edge connects two nodes of the same kind
    /// - The pattern has no operator node
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name) {
                return Err(Error::InvalidArgument(format!(
                    "pattern {}: duplicate role '{}'",
                    self.name, node.name
                )));
            }
        }

        for edge in &self.edges {
            let (Some(from), Some(to)) = (self.index_of(edge.from), self.index_of(edge.to)) else {
                return Err(Error::InvalidArgument(format!(
                    "pattern {}: edge {} -> {} references an unknown role",
                    self.name, edge.from, edge.to
                )));
            };
            let from_is_op = matches!(self.nodes[from].matcher, NodeMatcher::Op(_));
            let to_is_op = matches!(self.nodes[to].matcher, NodeMatcher::Op(_));
            if from_is_op == to_is_op {
                return Err(Error::InvalidArgument(format!(
                    "pattern {}: edge {} -> {} must connect an operator and a variable",
                    self.name, edge.from, edge.to
                )));
            }
        }

        if !self
            .nodes
            .iter()
            .any(|n| matches!(n.matcher, NodeMatcher::Op(_)))
        {
            return Err(Error::InvalidArgument(format!(
                "pattern {}: needs at least one operator node",
                self.name
            )));
        }

        Ok(())
    }
}

/// A successful match: role name -> bound graph node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subgraph {
    bindings: BTreeMap<&'static str, NodeId>,
}

impl Subgraph {
    /// Get the node bound to a role.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the pattern has no such role.
    pub fn get(&self, role: &str) -> Result<NodeId> {
        self.bindings
            .get(role)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("no node bound to role '{}'", role)))
    }

    /// Check whether a graph node is part of this match.
    pub fn contains(&self, id: NodeId) -> bool {
        self.bindings.values().any(|&n| n == id)
    }

    /// Iterate over `(role, node)` pairs in role-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, NodeId)> + '_ {
        self.bindings.iter().map(|(&role, &id)| (role, id))
    }

    /// The bound nodes.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.bindings.values().copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Finds placements of a [`Pattern`] in a graph.
#[derive(Debug, Clone)]
pub struct GraphPatternDetector {
    pattern: Pattern,

    /// Pattern-node visit order for the search; each node after the first
    /// of its component is adjacent to an earlier one.
    order: Vec<usize>,
}

impl GraphPatternDetector {
    /// Create a detector for a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern fails [`Pattern::validate`].
    pub fn new(pattern: Pattern) -> Result<Self> {
        pattern.validate()?;
        let order = search_order(&pattern);
        Ok(Self { pattern, order })
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Enumerate all matches without touching the graph.
    ///
    /// Duplicate placements (same node set) are reported once, placements
    /// whose intermediate nodes have consumers outside the match are dropped,
    /// and an intermediate node is claimed by the first match that contains
    /// it.
    pub fn detect(&self, graph: &IrGraph) -> Vec<Subgraph> {
        let candidates: Vec<Vec<NodeId>> = self
            .pattern
            .nodes
            .iter()
            .map(|pnode| {
                graph
                    .nodes()
                    .map(|(id, _)| id)
                    .filter(|&id| pnode.accepts(graph, id))
                    .collect()
            })
            .collect();

        let mut raw = Vec::new();
        let mut bound = vec![None; self.pattern.nodes.len()];
        self.search(graph, &candidates, 0, &mut bound, &mut raw);

        let mut seen_sets = HashSet::new();
        let mut claimed: HashSet<NodeId> = HashSet::new();
        let mut used: HashSet<NodeId> = HashSet::new();
        let mut matches = Vec::new();

        for assignment in raw {
            let node_set: BTreeSet<NodeId> = assignment.iter().copied().collect();
            if !seen_sets.insert(node_set.clone()) {
                continue;
            }

            let intermediates: Vec<NodeId> = self
                .pattern
                .nodes
                .iter()
                .zip(&assignment)
                .filter(|(pnode, _)| pnode.role == NodeRole::Intermediate)
                .map(|(_, &id)| id)
                .collect();

            let escapes = intermediates.iter().any(|&id| {
                graph.var(id).is_ok()
                    && graph
                        .outputs_of(id)
                        .iter()
                        .any(|consumer| !node_set.contains(consumer))
            });
            if escapes {
                debug!(pattern = self.pattern.name, "intermediate node read outside the match");
                continue;
            }

            let overlaps = intermediates.iter().any(|id| used.contains(id))
                || node_set.iter().any(|id| claimed.contains(id));
            if overlaps {
                debug!(pattern = self.pattern.name, "match overlaps a claimed intermediate node");
                continue;
            }

            claimed.extend(intermediates);
            used.extend(node_set);
            matches.push(Subgraph {
                bindings: self
                    .pattern
                    .nodes
                    .iter()
                    .zip(assignment)
                    .map(|(pnode, id)| (pnode.name, id))
                    .collect(),
            });
        }

        matches
    }

    /// Detect all matches, then call `handler` on each in order.
    ///
    /// Matches are collected before the first handler runs. A match that an
    /// earlier handler invalidated (by removing or rewiring one of its nodes)
    /// is skipped.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first handler error.
    pub fn apply<F>(&self, graph: &mut IrGraph, mut handler: F) -> Result<()>
    where
        F: FnMut(&Subgraph, &mut IrGraph) -> Result<()>,
    {
        let matches = self.detect(graph);
        debug!(
            pattern = self.pattern.name,
            count = matches.len(),
            "pattern matches"
        );

        for subgraph in &matches {
            if !self.still_matches(graph, subgraph) {
                debug!(pattern = self.pattern.name, "skipping invalidated match");
                continue;
            }
            handler(subgraph, graph)?;
        }

        Ok(())
    }

    /// Re-check a previously found match against the current graph.
    fn still_matches(&self, graph: &IrGraph, subgraph: &Subgraph) -> bool {
        let bound: Vec<Option<NodeId>> = self
            .pattern
            .nodes
            .iter()
            .map(|pnode| subgraph.bindings.get(pnode.name).copied())
            .collect();

        self.pattern
            .nodes
            .iter()
            .zip(&bound)
            .all(|(pnode, id)| id.is_some_and(|id| pnode.accepts(graph, id)))
            && self.pattern.edges.iter().all(|edge| {
                let (Some(from), Some(to)) =
                    (self.pattern.index_of(edge.from), self.pattern.index_of(edge.to))
                else {
                    return false;
                };
                match (bound[from], bound[to]) {
                    (Some(a), Some(b)) => edge_holds(graph, a, b, edge.slot),
                    _ => false,
                }
            })
    }

    fn search(
        &self,
        graph: &IrGraph,
        candidates: &[Vec<NodeId>],
        depth: usize,
        bound: &mut [Option<NodeId>],
        out: &mut Vec<Vec<NodeId>>,
    ) {
        if depth == self.order.len() {
            out.push(bound.iter().flatten().copied().collect());
            return;
        }

        let current = self.order[depth];
        for id in self.expand(graph, candidates, current, bound) {
            if bound.contains(&Some(id)) {
                continue;
            }
            if !self.edges_consistent(graph, current, id, bound) {
                continue;
            }

            bound[current] = Some(id);
            self.search(graph, candidates, depth + 1, bound, out);
            bound[current] = None;
        }
    }

    /// Candidates for `current`: neighbours of an already bound adjacent
    /// node when there is one, otherwise every node-local candidate.
    fn expand(
        &self,
        graph: &IrGraph,
        candidates: &[Vec<NodeId>],
        current: usize,
        bound: &[Option<NodeId>],
    ) -> Vec<NodeId> {
        let pivot = self.pattern.edges.iter().find_map(|edge| {
            let from = self.pattern.index_of(edge.from)?;
            let to = self.pattern.index_of(edge.to)?;
            if to == current {
                bound[from].map(|id| graph.outputs_of(id))
            } else if from == current {
                bound[to].map(|id| graph.inputs_of(id))
            } else {
                None
            }
        });

        match pivot {
            Some(neighbors) => neighbors
                .into_iter()
                .filter(|id| candidates[current].binary_search(id).is_ok())
                .collect(),
            None => candidates[current].clone(),
        }
    }

    /// Every pattern edge between `current` and an already bound node exists
    /// in the graph.
    fn edges_consistent(
        &self,
        graph: &IrGraph,
        current: usize,
        id: NodeId,
        bound: &[Option<NodeId>],
    ) -> bool {
        self.pattern.edges.iter().all(|edge| {
            let (Some(from), Some(to)) =
                (self.pattern.index_of(edge.from), self.pattern.index_of(edge.to))
            else {
                return false;
            };

            if from == current {
                match bound[to] {
                    Some(other) => edge_holds(graph, id, other, edge.slot),
                    None => true,
                }
            } else if to == current {
                match bound[from] {
                    Some(other) => edge_holds(graph, other, id, edge.slot),
                    None => true,
                }
            } else {
                true
            }
        })
    }
}

/// The graph edge `from -> to` exists and, when a slot is given, the
/// variable end is bound to that slot of the operator end.
fn edge_holds(graph: &IrGraph, from: NodeId, to: NodeId, slot: Option<&str>) -> bool {
    if !graph.has_edge(from, to) {
        return false;
    }

    let Some(slot) = slot else {
        return true;
    };

    match (graph.node(from), graph.node(to)) {
        (Ok(Node::Var(var)), Ok(Node::Op(op))) => op.input(slot).contains(&var.name),
        (Ok(Node::Op(op)), Ok(Node::Var(var))) => op.output(slot).contains(&var.name),
        _ => false,
    }
}

/// Breadth-first order over the undirected pattern, starting at the first
/// operator node. Disconnected components follow in declaration order.
fn search_order(pattern: &Pattern) -> Vec<usize> {
    let n = pattern.nodes.len();
    let anchor = pattern
        .nodes
        .iter()
        .position(|p| matches!(p.matcher, NodeMatcher::Op(_)))
        .unwrap_or(0);

    let mut order = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let starts = std::iter::once(anchor).chain(0..n);

    for start in starts {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut queue = std::collections::VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for edge in &pattern.edges {
                let (Some(from), Some(to)) = (pattern.index_of(edge.from), pattern.index_of(edge.to))
                else {
                    continue;
                };
                let next = if from == current {
                    to
                } else if to == current {
                    from
                } else {
                    continue;
                };
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
    }

    order
}
