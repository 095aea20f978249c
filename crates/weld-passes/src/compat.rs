//! Operator contracts and the compatibility checker.
//!
//! An [`OpCompat`] describes what a pass expects an operator of one type to
//! look like: which argument slots it may bind, which of them are required,
//! and predicates over its attributes. A pass registers the contracts of
//! every operator it matches or produces in an [`OpCompatChecker`] and asks
//! it to judge matched subgraphs before rewriting and new descriptors before
//! (or after) splicing them in.
//!
//! The checker never fails loudly: every violation is logged at `debug`
//! level and reported as `false`. Callers decide whether to warn.

use crate::pattern::Subgraph;
use std::collections::HashMap;
use tracing::debug;
use weld_core::{AttrKind, AttributeValue, IrGraph, NodeId, OpDefRegistry, OpDesc};

// ── Attribute predicates ──

/// A condition on one attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrPredicate {
    /// Numeric value `>=` bound.
    NumGe(f64),
    /// Numeric value `>` bound.
    NumGt(f64),
    /// Numeric value `<=` bound.
    NumLe(f64),
    /// Numeric value `<` bound.
    NumLt(f64),
    /// Numeric value exactly equal.
    NumEq(f64),
    BoolEq(bool),
    /// Value has the given kind (e.g. `int[]`).
    IsType(AttrKind),
    /// String value is one of the listed options.
    StringIn(Vec<String>),
}

impl AttrPredicate {
    pub fn holds(&self, value: &AttributeValue) -> bool {
        match self {
            AttrPredicate::NumGe(bound) => value.as_f64().is_some_and(|v| v >= *bound),
            AttrPredicate::NumGt(bound) => value.as_f64().is_some_and(|v| v > *bound),
            AttrPredicate::NumLe(bound) => value.as_f64().is_some_and(|v| v <= *bound),
            AttrPredicate::NumLt(bound) => value.as_f64().is_some_and(|v| v < *bound),
            AttrPredicate::NumEq(expected) => value.as_f64().is_some_and(|v| v == *expected),
            AttrPredicate::BoolEq(expected) => value.as_bool() == Some(*expected),
            AttrPredicate::IsType(kind) => value.kind() == *kind,
            AttrPredicate::StringIn(options) => value
                .as_str()
                .is_some_and(|s| options.iter().any(|o| o == s)),
        }
    }
}

// ── Slot and attribute specs ──

/// Contract for one input or output slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: String,
    pub optional: bool,

    /// Exactly one dense tensor variable is bound to the slot.
    pub is_tensor: bool,
}

impl Arg {
    /// A required slot holding a single tensor.
    pub fn tensor(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: false,
            is_tensor: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn check(&self, names: &[String], op_type: &str) -> bool {
        if names.is_empty() {
            if !self.optional {
                debug!(op = op_type, slot = %self.name, "required slot is empty");
            }
            return self.optional;
        }
        if self.is_tensor && names.len() != 1 {
            debug!(
                op = op_type,
                slot = %self.name,
                bound = names.len(),
                "tensor slot must bind exactly one variable"
            );
            return false;
        }
        true
    }
}

/// Contract for one attribute: a conjunction of predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub optional: bool,
    pub predicates: Vec<AttrPredicate>,
}

impl Attr {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: false,
            predicates: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn num_ge(self, bound: f64) -> Self {
        self.with(AttrPredicate::NumGe(bound))
    }

    pub fn num_gt(self, bound: f64) -> Self {
        self.with(AttrPredicate::NumGt(bound))
    }

    pub fn num_le(self, bound: f64) -> Self {
        self.with(AttrPredicate::NumLe(bound))
    }

    pub fn num_lt(self, bound: f64) -> Self {
        self.with(AttrPredicate::NumLt(bound))
    }

    pub fn num_eq(self, expected: f64) -> Self {
        self.with(AttrPredicate::NumEq(expected))
    }

    pub fn bool_eq(self, expected: bool) -> Self {
        self.with(AttrPredicate::BoolEq(expected))
    }

    pub fn is_type(self, kind: AttrKind) -> Self {
        self.with(AttrPredicate::IsType(kind))
    }

    pub fn string_in(self, options: &[&str]) -> Self {
        self.with(AttrPredicate::StringIn(
            options.iter().map(|s| s.to_string()).collect(),
        ))
    }

    pub fn with(mut self, predicate: AttrPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn holds(&self, value: &AttributeValue) -> bool {
        self.predicates.iter().all(|p| p.holds(value))
    }
}

// ── OpCompat ──

/// The contract for one operator type.
///
/// ```
/// use weld_passes::compat::{Arg, Attr, OpCompat};
///
/// let compat = OpCompat::new("matmul")
///     .input(Arg::tensor("X"))
///     .input(Arg::tensor("Y"))
///     .output(Arg::tensor("Out"))
///     .attr(Attr::new("alpha").num_ge(0.99).num_le(1.01).optional())
///     .attr(Attr::new("transpose_X").bool_eq(false));
///
/// assert_eq!(compat.op_type, "matmul");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OpCompat {
    pub op_type: String,
    pub inputs: Vec<Arg>,
    pub outputs: Vec<Arg>,
    pub attrs: Vec<Attr>,
}

impl OpCompat {
    pub fn new(op_type: &str) -> Self {
        Self {
            op_type: op_type.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Vec::new(),
        }
    }

    pub fn input(mut self, arg: Arg) -> Self {
        self.inputs.push(arg);
        self
    }

    pub fn output(mut self, arg: Arg) -> Self {
        self.outputs.push(arg);
        self
    }

    pub fn attr(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }
}

// ── Checker ──

/// Judges operators against registered contracts.
#[derive(Debug, Clone)]
pub struct OpCompatChecker {
    contracts: HashMap<String, OpCompat>,
    defs: OpDefRegistry,
}

impl Default for OpCompatChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCompatChecker {
    /// A checker with no contracts over the built-in operator definitions.
    pub fn new() -> Self {
        Self::with_defs(OpDefRegistry::with_defaults())
    }

    pub fn with_defs(defs: OpDefRegistry) -> Self {
        Self {
            contracts: HashMap::new(),
            defs,
        }
    }

    /// Register a contract, replacing any previous one for the same type.
    pub fn add(&mut self, compat: OpCompat) -> &mut Self {
        self.contracts.insert(compat.op_type.clone(), compat);
        self
    }

    pub fn contract(&self, op_type: &str) -> Option<&OpCompat> {
        self.contracts.get(op_type)
    }

    /// Judge every operator of a matched subgraph.
    ///
    /// An operator type with no registered contract fails when it has an
    /// operator definition and is skipped otherwise. Slots are additionally
    /// checked against the graph: each bound variable must be linked to the
    /// operator and be a dense tensor.
    pub fn is_compat_subgraph(&self, subgraph: &Subgraph, graph: &IrGraph) -> bool {
        for (role, id) in subgraph.iter() {
            let Ok(desc) = graph.op(id) else {
                continue;
            };

            match self.contracts.get(&desc.op_type) {
                Some(compat) => {
                    if !self.judge(compat, desc, Some((graph, id))) {
                        debug!(role, op = %desc.op_type, "matched operator violates its contract");
                        return false;
                    }
                }
                None if self.defs.contains(&desc.op_type) => {
                    debug!(role, op = %desc.op_type, "no contract registered for operator");
                    return false;
                }
                None => {}
            }
        }
        true
    }

    /// Judge a standalone descriptor, typically a freshly built replacement.
    ///
    /// Fails when no contract is registered for its type.
    pub fn is_compat_desc(&self, desc: &OpDesc) -> bool {
        match self.contracts.get(&desc.op_type) {
            Some(compat) => self.judge(compat, desc, None),
            None => {
                debug!(op = %desc.op_type, "no contract registered for operator");
                false
            }
        }
    }

    fn judge(&self, compat: &OpCompat, desc: &OpDesc, graph: Option<(&IrGraph, NodeId)>) -> bool {
        let op_type = desc.op_type.as_str();

        // Bound slots must be declared
        let undeclared = |bound: &std::collections::BTreeMap<String, Vec<String>>, specs: &[Arg]| {
            bound
                .iter()
                .filter(|(_, names)| !names.is_empty())
                .find(|(slot, _)| !specs.iter().any(|a| &a.name == *slot))
                .map(|(slot, _)| slot.clone())
        };
        if let Some(slot) = undeclared(&desc.inputs, &compat.inputs) {
            debug!(op = op_type, slot = %slot, "input slot not in contract");
            return false;
        }
        if let Some(slot) = undeclared(&desc.outputs, &compat.outputs) {
            debug!(op = op_type, slot = %slot, "output slot not in contract");
            return false;
        }

        for arg in &compat.inputs {
            let names = desc.input(&arg.name);
            if !arg.check(names, op_type) {
                return false;
            }
            if let Some((graph, id)) = graph
                && !linked_tensors(graph, &graph.inputs_of(id), names, arg.is_tensor)
            {
                debug!(op = op_type, slot = %arg.name, "input variable is not a linked tensor");
                return false;
            }
        }

        for arg in &compat.outputs {
            let names = desc.output(&arg.name);
            if !arg.check(names, op_type) {
                return false;
            }
            if let Some((graph, id)) = graph
                && !linked_tensors(graph, &graph.outputs_of(id), names, arg.is_tensor)
            {
                debug!(op = op_type, slot = %arg.name, "output variable is not a linked tensor");
                return false;
            }
        }

        let def = self.defs.get(op_type);

        for attr in &compat.attrs {
            let value = desc
                .get_attr(&attr.name)
                .or_else(|| if attr.optional { None } else { def?.default_of(&attr.name) });

            match value {
                Some(value) if !attr.holds(value) => {
                    debug!(op = op_type, attr = %attr.name, ?value, "attribute predicate failed");
                    return false;
                }
                Some(_) => {}
                None if attr.optional => {}
                None => {
                    debug!(op = op_type, attr = %attr.name, "required attribute missing");
                    return false;
                }
            }
        }

        // Undeclared attributes must keep their defined default
        if let Some(def) = def {
            for (name, value) in &desc.attributes {
                if compat.attrs.iter().any(|a| &a.name == name) {
                    continue;
                }
                if let Some(default) = def.default_of(name)
                    && default != value
                {
                    debug!(
                        op = op_type,
                        attr = %name,
                        ?value,
                        ?default,
                        "undeclared attribute differs from its default"
                    );
                    return false;
                }
            }
        }

        true
    }
}

/// Every name refers to a variable among `linked`, and with `tensor_only`
/// each of them is a dense tensor.
fn linked_tensors(graph: &IrGraph, linked: &[NodeId], names: &[String], tensor_only: bool) -> bool {
    names.iter().all(|name| {
        linked.iter().any(|&id| {
            graph
                .var(id)
                .is_ok_and(|var| &var.name == name && (!tensor_only || var.is_tensor()))
        })
    })
}
