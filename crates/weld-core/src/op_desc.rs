//! Operator and variable descriptors.
//!
//! An [`OpDesc`] names its inputs and outputs by argument slot (`"X"`, `"Y"`,
//! `"Out"`, ...), each slot bound to a list of variable names. Slots and
//! attributes are kept in ordered maps so descriptors compare and print
//! deterministically.

use crate::attribute::{AttributeValue, KindMismatch};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Operator descriptor: type, argument bindings and attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpDesc {
    /// Operator type (e.g., "matmul", "reshape2").
    pub op_type: String,

    /// Input slot -> bound variable names.
    pub inputs: BTreeMap<String, Vec<String>>,

    /// Output slot -> bound variable names.
    pub outputs: BTreeMap<String, Vec<String>>,

    /// Operator attributes.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl OpDesc {
    /// Create a descriptor with no arguments or attributes.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    /// Get the operator type.
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn set_type(&mut self, op_type: impl Into<String>) {
        self.op_type = op_type.into();
    }

    /// Bind an input slot, replacing any previous binding.
    pub fn set_input<S: Into<String>>(
        &mut self,
        slot: impl Into<String>,
        names: impl IntoIterator<Item = S>,
    ) {
        self.inputs
            .insert(slot.into(), names.into_iter().map(Into::into).collect());
    }

    /// Bind an output slot, replacing any previous binding.
    pub fn set_output<S: Into<String>>(
        &mut self,
        slot: impl Into<String>,
        names: impl IntoIterator<Item = S>,
    ) {
        self.outputs
            .insert(slot.into(), names.into_iter().map(Into::into).collect());
    }

    /// Variable names bound to an input slot (empty if unbound).
    pub fn input(&self, slot: &str) -> &[String] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    /// Variable names bound to an output slot (empty if unbound).
    pub fn output(&self, slot: &str) -> &[String] {
        self.outputs.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    /// All input variable names, in slot order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().flatten().map(String::as_str)
    }

    /// All output variable names, in slot order.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.values().flatten().map(String::as_str)
    }

    /// Number of non-empty input slots.
    pub fn bound_input_slots(&self) -> usize {
        self.inputs.values().filter(|names| !names.is_empty()).count()
    }

    /// Slots of the input arguments that reference `var`.
    pub fn input_slots_of<'a>(&'a self, var: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inputs
            .iter()
            .filter(move |(_, names)| names.iter().any(|n| n == var))
            .map(|(slot, _)| slot.as_str())
    }

    /// Slots of the output arguments that reference `var`.
    pub fn output_slots_of<'a>(&'a self, var: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.outputs
            .iter()
            .filter(move |(_, names)| names.iter().any(|n| n == var))
            .map(|(slot, _)| slot.as_str())
    }

    /// Set an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Get an attribute.
    pub fn get_attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Check if an attribute exists.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attr(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Get an attribute converted to `T`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingAttribute` if the attribute is absent and
    /// `Error::AttributeType` if it holds a different kind of value.
    pub fn attr<T>(&self, name: &str) -> Result<T>
    where
        T: for<'a> TryFrom<&'a AttributeValue, Error = KindMismatch>,
    {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| Error::MissingAttribute(format!("{}.{}", self.op_type, name)))?;

        T::try_from(value).map_err(|mismatch| Error::AttributeType {
            name: name.to_string(),
            expected: mismatch.expected,
            actual: mismatch.actual,
        })
    }

    /// Get an attribute converted to `T`, or `default` when absent.
    ///
    /// A present attribute of the wrong kind is still an error.
    pub fn attr_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: for<'a> TryFrom<&'a AttributeValue, Error = KindMismatch>,
    {
        if self.has_attr(name) {
            self.attr(name)
        } else {
            Ok(default)
        }
    }
}

/// Storage class of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VarKind {
    /// Dense tensor with a (possibly partially unknown) shape.
    #[default]
    DenseTensor,

    /// Array of tensors (control-flow carried values).
    TensorArray,

    /// Host-side scalar.
    Scalar,
}

/// Variable descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarDesc {
    /// Variable name (unique within the graph).
    pub name: String,

    /// Dimension sizes; `-1` marks a dimension unknown until runtime.
    pub shape: Vec<i64>,

    pub kind: VarKind,

    /// Whether the variable is a parameter that outlives one execution.
    pub persistable: bool,
}

impl VarDesc {
    /// Create a dense tensor variable.
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<i64>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            kind: VarKind::DenseTensor,
            persistable: false,
        }
    }

    /// Create a persistable dense tensor (a weight).
    pub fn persistable(name: impl Into<String>, shape: impl Into<Vec<i64>>) -> Self {
        Self {
            persistable: true,
            ..Self::new(name, shape)
        }
    }

    pub fn with_kind(mut self, kind: VarKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_tensor(&self) -> bool {
        self.kind == VarKind::DenseTensor
    }
}
