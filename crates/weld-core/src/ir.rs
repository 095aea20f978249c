//! Intermediate representation for the optimizer graph.
//!
//! The IR is a bipartite directed graph where:
//! - **Operator nodes** (`Node::Op`) own an [`OpDesc`]
//! - **Variable nodes** (`Node::Var`) own a [`VarDesc`]
//!
//! Edges run operator → variable (the operator produces the variable) and
//! variable → operator (the operator consumes it). Nodes live in a
//! `StableGraph` arena, so removing a node invalidates only its own
//! [`NodeId`]; every other handle stays valid across passes.

use crate::op_desc::{OpDesc, VarDesc};
use crate::{Error, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, Topo};
use std::collections::BTreeMap;

/// Type alias for IR node identifiers (backed by petgraph NodeIndex).
pub type NodeId = NodeIndex;

// ──────────────────────────────── Node ───────────────────────────────────

/// A node in the IR graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Op(OpDesc),
    Var(VarDesc),
}

impl Node {
    pub fn is_op(&self) -> bool {
        matches!(self, Node::Op(_))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Node::Var(_))
    }

    pub fn as_op(&self) -> Option<&OpDesc> {
        match self {
            Node::Op(desc) => Some(desc),
            Node::Var(_) => None,
        }
    }

    pub fn as_var(&self) -> Option<&VarDesc> {
        match self {
            Node::Var(desc) => Some(desc),
            Node::Op(_) => None,
        }
    }

    /// Display name: the operator type for operators, the variable name for
    /// variables.
    pub fn name(&self) -> &str {
        match self {
            Node::Op(desc) => &desc.op_type,
            Node::Var(desc) => &desc.name,
        }
    }
}

// ──────────────────────────────── IrGraph ────────────────────────────────

/// Intermediate representation graph.
///
/// Owns every node. Passes hold `NodeId` handles only for the duration of
/// one rewrite.
#[derive(Debug, Clone, Default)]
pub struct IrGraph {
    graph: StableGraph<Node, ()>,

    /// Per-pass fuse statistics (pass name -> rewrites applied).
    statistics: BTreeMap<String, usize>,
}

impl IrGraph {
    /// Create a new empty IR graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.graph.node_weight(id).ok_or(Error::NodeNotFound(id))
    }

    /// Check whether a handle still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    /// Get the operator descriptor of an operator node.
    pub fn op(&self, id: NodeId) -> Result<&OpDesc> {
        self.node(id)?
            .as_op()
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} is not an operator", id)))
    }

    /// Get a mutable operator descriptor.
    pub fn op_mut(&mut self, id: NodeId) -> Result<&mut OpDesc> {
        match self.graph.node_weight_mut(id) {
            Some(Node::Op(desc)) => Ok(desc),
            Some(Node::Var(_)) => Err(Error::InvalidGraph(format!(
                "Node {:?} is not an operator",
                id
            ))),
            None => Err(Error::NodeNotFound(id)),
        }
    }

    /// Get the variable descriptor of a variable node.
    pub fn var(&self, id: NodeId) -> Result<&VarDesc> {
        self.node(id)?
            .as_var()
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} is not a variable", id)))
    }

    /// Iterate over all nodes in ascending handle order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|node| (id, node)))
    }

    /// Iterate over operator nodes.
    pub fn ops(&self) -> impl Iterator<Item = (NodeId, &OpDesc)> {
        self.nodes()
            .filter_map(|(id, node)| node.as_op().map(|desc| (id, desc)))
    }

    /// Find the first live variable with the given name.
    pub fn find_var(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|(_, node)| matches!(node, Node::Var(var) if var.name == name))
            .map(|(id, _)| id)
    }

    /// Nodes with an edge into `id`, in ascending handle order.
    ///
    /// For an operator these are the variables it reads; for a variable, the
    /// operator that writes it.
    pub fn inputs_of(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Nodes `id` has an edge into, in ascending handle order.
    ///
    /// For an operator these are the variables it writes; for a variable, the
    /// operators that read it.
    pub fn outputs_of(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.graph.neighbors_directed(id, direction).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Check whether the edge `from -> to` exists.
    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.contains_edge(from, to)
    }

    // ── Graph mutation ──

    /// Add a variable node and return its handle.
    pub fn add_var(&mut self, var: VarDesc) -> NodeId {
        self.graph.add_node(Node::Var(var))
    }

    /// Add an operator node and return its handle.
    ///
    /// The node starts unlinked; connect it with [`IrGraph::link`].
    pub fn add_op(&mut self, op: OpDesc) -> NodeId {
        self.graph.add_node(Node::Op(op))
    }

    /// Alias for [`IrGraph::add_op`].
    pub fn create_op_node(&mut self, op: OpDesc) -> NodeId {
        self.add_op(op)
    }

    /// Add the directed edge `from -> to`.
    ///
    /// Linking an existing edge again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if either node does not exist or both endpoints are
    /// of the same kind (edges alternate between operators and variables).
    pub fn link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let from_is_op = self.node(from)?.is_op();
        let to_is_op = self.node(to)?.is_op();

        if from_is_op == to_is_op {
            return Err(Error::InvalidGraph(format!(
                "Cannot link {:?} -> {:?}: edges must connect an operator and a variable",
                from, to
            )));
        }

        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }

        Ok(())
    }

    /// Remove the directed edge `from -> to`, if present.
    pub fn unlink(&mut self, from: NodeId, to: NodeId) -> bool {
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }

    /// Remove a set of nodes and every edge touching them.
    ///
    /// Handles that are already dead (or repeated) are ignored. Returns the
    /// number of nodes actually removed.
    pub fn safe_remove_nodes(&mut self, ids: &[NodeId]) -> usize {
        let mut removed = 0;

        for &id in ids {
            if !self.graph.contains_node(id) {
                continue;
            }

            // Detach first so no edge can outlive either endpoint
            let edges: Vec<_> = self
                .graph
                .edges_directed(id, Direction::Incoming)
                .chain(self.graph.edges_directed(id, Direction::Outgoing))
                .map(|edge| edge.id())
                .collect();
            for edge in edges {
                self.graph.remove_edge(edge);
            }

            self.graph.remove_node(id);
            removed += 1;
        }

        removed
    }

    // ── Statistics ──

    /// Record how many rewrites a pass applied to this graph.
    ///
    /// Overwrites the previous count for the same pass.
    pub fn add_statis(&mut self, pass: &str, count: usize) {
        self.statistics.insert(pass.to_string(), count);
    }

    /// Per-pass fuse statistics.
    pub fn statistics(&self) -> &BTreeMap<String, usize> {
        &self.statistics
    }

    // ── Graph queries ──

    /// Get the topological order of nodes in the graph.
    ///
    /// Every variable precedes its consumers and follows its producer.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }

        order
    }

    /// Get the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of operator nodes.
    pub fn op_count(&self) -> usize {
        self.nodes().filter(|(_, node)| node.is_op()).count()
    }

    /// Get the number of variable nodes.
    pub fn var_count(&self) -> usize {
        self.nodes().filter(|(_, node)| node.is_var()).count()
    }

    /// Get the number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check that operator descriptors and graph edges agree.
    ///
    /// Every variable name bound in an operator's descriptor must correspond
    /// to a linked variable node of that name, and every linked variable must
    /// be bound in the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidGraph` describing the first disagreement.
    pub fn validate(&self) -> Result<()> {
        for (id, desc) in self.ops() {
            let linked_inputs = self.linked_names(self.inputs_of(id))?;
            let linked_outputs = self.linked_names(self.outputs_of(id))?;

            for (declared, linked, what) in [
                (
                    desc.input_names().collect::<Vec<_>>(),
                    &linked_inputs,
                    "input",
                ),
                (
                    desc.output_names().collect::<Vec<_>>(),
                    &linked_outputs,
                    "output",
                ),
            ] {
                for name in &declared {
                    if !linked.iter().any(|l| l.as_str() == *name) {
                        return Err(Error::InvalidGraph(format!(
                            "Operator {} ({:?}) declares {} '{}' but no such variable is linked",
                            desc.op_type, id, what, name
                        )));
                    }
                }
                for name in linked {
                    if !declared.contains(&name.as_str()) {
                        return Err(Error::InvalidGraph(format!(
                            "Operator {} ({:?}) is linked to {} '{}' it does not declare",
                            desc.op_type, id, what, name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn linked_names(&self, ids: Vec<NodeId>) -> Result<Vec<String>> {
        ids.into_iter()
            .map(|id| self.var(id).map(|var| var.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(graph: &mut IrGraph, op_type: &str, input: NodeId, output: &str) -> (NodeId, NodeId) {
        let in_name = graph.var(input).unwrap().name.clone();
        let mut desc = OpDesc::new(op_type);
        desc.set_input("X", [in_name]);
        desc.set_output("Out", [output]);
        let op = graph.add_op(desc);
        let out = graph.add_var(VarDesc::new(output, [2]));
        graph.link(input, op).unwrap();
        graph.link(op, out).unwrap();
        (op, out)
    }

    #[test]
    fn test_create_empty_graph() {
        let graph = IrGraph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.statistics().is_empty());
    }

    #[test]
    fn test_add_and_link() {
        let mut graph = IrGraph::new();
        let x = graph.add_var(VarDesc::new("x", [1, 2]));
        let (relu, out) = chain(&mut graph, "relu", x, "out");

        assert_eq!(graph.op_count(), 1);
        assert_eq!(graph.var_count(), 2);
        assert_eq!(graph.op(relu).unwrap().op_type(), "relu");
        assert_eq!(graph.inputs_of(relu), vec![x]);
        assert_eq!(graph.outputs_of(relu), vec![out]);
        assert_eq!(graph.outputs_of(x), vec![relu]);
        assert_eq!(graph.find_var("out"), Some(out));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_link_rejects_same_kind() {
        let mut graph = IrGraph::new();
        let a = graph.add_var(VarDesc::new("a", [1]));
        let b = graph.add_var(VarDesc::new("b", [1]));
        assert!(matches!(graph.link(a, b), Err(Error::InvalidGraph(_))));

        let relu = graph.add_op(OpDesc::new("relu"));
        graph.safe_remove_nodes(&[b]);
        assert!(matches!(graph.link(relu, b), Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut graph = IrGraph::new();
        let a = graph.add_var(VarDesc::new("a", [1]));
        let relu = graph.add_op(OpDesc::new("relu"));
        graph.link(a, relu).unwrap();
        graph.link(a, relu).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.unlink(a, relu));
        assert!(!graph.unlink(a, relu));
    }

    #[test]
    fn test_safe_remove_nodes() {
        let mut graph = IrGraph::new();
        let x = graph.add_var(VarDesc::new("x", [2]));
        let (relu, out) = chain(&mut graph, "relu", x, "out");
        let (tanh, _) = chain(&mut graph, "tanh", out, "y");

        let removed = graph.safe_remove_nodes(&[relu, out, relu]);
        assert_eq!(removed, 2);

        // Surviving handles stay valid and no edge references a dead node
        assert!(graph.node(x).is_ok());
        assert!(graph.node(tanh).is_ok());
        assert!(graph.outputs_of(x).is_empty());
        assert!(graph.inputs_of(tanh).is_empty());
        assert!(matches!(graph.node(relu), Err(Error::NodeNotFound(_))));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_topological_order() {
        let mut graph = IrGraph::new();
        let t0 = graph.add_var(VarDesc::new("t0", [2]));
        let (a, t1) = chain(&mut graph, "A", t0, "t1");
        let (b, t2) = chain(&mut graph, "B", t1, "t2");

        let order = graph.topological_order();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(t0) < pos(a));
        assert!(pos(a) < pos(t1));
        assert!(pos(t1) < pos(b));
        assert!(pos(b) < pos(t2));
    }

    #[test]
    fn test_validate_detects_unlinked_binding() {
        let mut graph = IrGraph::new();
        let x = graph.add_var(VarDesc::new("x", [2]));
        let (relu, _) = chain(&mut graph, "relu", x, "out");
        graph.op_mut(relu).unwrap().set_input("X", ["missing"]);

        assert!(matches!(graph.validate(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn test_statistics_overwrite() {
        let mut graph = IrGraph::new();
        graph.add_statis("map_matmul_to_mul_pass", 2);
        graph.add_statis("map_matmul_to_mul_pass", 0);
        assert_eq!(graph.statistics()["map_matmul_to_mul_pass"], 0);
    }
}
