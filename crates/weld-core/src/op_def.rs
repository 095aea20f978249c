//! Operator definitions: declared argument slots and attribute defaults.

use crate::attribute::AttributeValue;
use std::collections::{BTreeMap, HashMap};

/// Static definition of an operator type.
///
/// Records the argument slots the operator accepts and the default value of
/// each attribute it declares. Attributes without a default (for example
/// quantization metadata attached by calibration tools) are not listed.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDef {
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attr_defaults: BTreeMap<String, AttributeValue>,
}

impl OpDef {
    pub fn new(op_type: &str) -> Self {
        Self {
            op_type: op_type.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attr_defaults: BTreeMap::new(),
        }
    }

    pub fn input(mut self, slot: &str) -> Self {
        self.inputs.push(slot.to_string());
        self
    }

    pub fn output(mut self, slot: &str) -> Self {
        self.outputs.push(slot.to_string());
        self
    }

    pub fn attr(mut self, name: &str, default: impl Into<AttributeValue>) -> Self {
        self.attr_defaults.insert(name.to_string(), default.into());
        self
    }

    /// Default value of an attribute, if the definition declares one.
    pub fn default_of(&self, name: &str) -> Option<&AttributeValue> {
        self.attr_defaults.get(name)
    }
}

/// Registry of operator definitions.
///
/// Maps operator type names (e.g., "matmul", "reshape2") to their
/// [`OpDef`]s.
///
/// # Example
///
/// ```
/// use weld_core::{OpDef, OpDefRegistry};
///
/// let mut registry = OpDefRegistry::new();
/// registry
///     .register(OpDef::new("relu").input("X").output("Out"))
///     .register(OpDef::new("tanh").input("X").output("Out"));
///
/// assert!(registry.contains("relu"));
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpDefRegistry {
    /// Map from op_type string to definition.
    defs: HashMap<String, OpDef>,
}

impl OpDefRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
        }
    }

    /// Create a registry with the definitions of every operator the built-in
    /// passes read or produce.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                OpDef::new("matmul")
                    .input("X")
                    .input("Y")
                    .output("Out")
                    .attr("transpose_X", false)
                    .attr("transpose_Y", false)
                    .attr("alpha", 1.0f32),
            )
            .register(
                OpDef::new("matmul_v2")
                    .input("X")
                    .input("Y")
                    .output("Out")
                    .attr("trans_x", false)
                    .attr("trans_y", false),
            )
            .register(
                OpDef::new("mul")
                    .input("X")
                    .input("Y")
                    .output("Out")
                    .attr("x_num_col_dims", 1i32)
                    .attr("y_num_col_dims", 1i32),
            )
            .register(
                OpDef::new("reshape2")
                    .input("X")
                    .input("Shape")
                    .input("ShapeTensor")
                    .output("Out")
                    .output("XShape")
                    .attr("shape", Vec::<i32>::new()),
            )
            .register(
                OpDef::new("flatten2")
                    .input("X")
                    .output("Out")
                    .output("XShape")
                    .attr("axis", 1i32),
            )
            .register(
                OpDef::new("squeeze2")
                    .input("X")
                    .output("Out")
                    .output("XShape")
                    .attr("axes", Vec::<i32>::new()),
            )
            .register(
                OpDef::new("elementwise_add")
                    .input("X")
                    .input("Y")
                    .output("Out")
                    .attr("axis", -1i32),
            )
            .register(
                OpDef::new("batch_norm")
                    .input("X")
                    .input("Scale")
                    .input("Bias")
                    .input("Mean")
                    .input("Variance")
                    .input("MomentumTensor")
                    .output("Y")
                    .output("MeanOut")
                    .output("VarianceOut")
                    .output("SavedMean")
                    .output("SavedVariance")
                    .output("ReserveSpace")
                    .attr("momentum", 0.9f32)
                    .attr("epsilon", 1e-5f32)
                    .attr("data_layout", "NCHW")
                    .attr("is_test", false)
                    .attr("use_global_stats", false)
                    .attr("trainable_statistics", false)
                    .attr("fuse_with_relu", false),
            )
            .register(OpDef::new("relu").input("X").output("Out"))
            .register(
                OpDef::new("grid_sampler")
                    .input("X")
                    .input("Grid")
                    .output("Output")
                    .attr("use_cudnn", true),
            );
        registry
    }

    /// Register a definition, replacing any previous one for the same type.
    ///
    /// Returns `self` for method chaining.
    pub fn register(&mut self, def: OpDef) -> &mut Self {
        self.defs.insert(def.op_type.clone(), def);
        self
    }

    /// Look up a definition by operator type.
    ///
    /// Returns `None` if no definition is registered with the given name.
    pub fn get(&self, op_type: &str) -> Option<&OpDef> {
        self.defs.get(op_type)
    }

    /// Check if a definition is registered.
    pub fn contains(&self, op_type: &str) -> bool {
        self.defs.contains_key(op_type)
    }

    /// Get the number of registered definitions.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Iterate over all registered operator types.
    pub fn op_types(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(|s| s.as_str())
    }
}
