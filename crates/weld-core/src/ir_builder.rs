//! Build IR graphs from descriptor lists.

use crate::ir::{IrGraph, NodeId};
use crate::op_desc::{OpDesc, VarDesc};
use crate::{Error, Result};
use std::collections::HashMap;

/// Assembles an [`IrGraph`] from variable and operator descriptors.
///
/// Operators reference variables by name; edges are derived from those
/// names when the graph is built, so callers never link nodes by hand.
///
/// # Example
///
/// ```
/// use weld_core::{GraphBuilder, OpDesc, VarDesc};
///
/// let mut relu = OpDesc::new("relu");
/// relu.set_input("X", ["x"]);
/// relu.set_output("Out", ["y"]);
///
/// let graph = GraphBuilder::new()
///     .var(VarDesc::new("x", [1, 4]))
///     .var(VarDesc::new("y", [1, 4]))
///     .op(relu)
///     .build()
///     .unwrap();
///
/// assert_eq!(graph.op_count(), 1);
/// assert_eq!(graph.edge_count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    vars: Vec<VarDesc>,
    ops: Vec<OpDesc>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable.
    pub fn var(mut self, var: VarDesc) -> Self {
        self.vars.push(var);
        self
    }

    /// Declare an operator. Operators are created in declaration order.
    pub fn op(mut self, op: OpDesc) -> Self {
        self.ops.push(op);
        self
    }

    /// Build the graph.
    ///
    /// Variables are created first (in declaration order), then each operator
    /// followed by its edges.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Two variables share a name
    /// - An operator references a variable that was never declared
    pub fn build(self) -> Result<IrGraph> {
        let mut graph = IrGraph::new();
        let mut var_ids: HashMap<String, NodeId> = HashMap::new();

        for var in self.vars {
            let name = var.name.clone();
            let id = graph.add_var(var);
            if var_ids.insert(name.clone(), id).is_some() {
                return Err(Error::InvalidGraph(format!(
                    "Variable '{}' declared twice",
                    name
                )));
            }
        }

        for op in self.ops {
            let lookup = |name: &str| {
                var_ids.get(name).copied().ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "Operator {} references unknown variable: {}",
                        op.op_type, name
                    ))
                })
            };

            let inputs = op.input_names().map(lookup).collect::<Result<Vec<_>>>()?;
            let outputs = op.output_names().map(lookup).collect::<Result<Vec<_>>>()?;

            let op_id = graph.add_op(op);
            for input in inputs {
                graph.link(input, op_id)?;
            }
            for output in outputs {
                graph.link(op_id, output)?;
            }
        }

        Ok(graph)
    }
}
