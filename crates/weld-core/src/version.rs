//! Operator-version capability declarations.
//!
//! Operators evolve (new attributes, changed semantics) and each change bumps
//! the operator's version. A pass declares which version combinations it was
//! written against; the pipeline compares that declaration with the versions
//! a model was saved with.

use std::collections::BTreeMap;
use std::fmt;

/// Operator type -> version, as recorded by a model.
///
/// Operators absent from the map are treated as version 0.
pub type OpVersionMap = BTreeMap<String, u32>;

/// Comparison applied between a model's operator version and a declared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Le,
    Lt,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CompareOp {
    /// Evaluate `actual <op> expected`.
    pub fn holds(self, actual: u32, expected: u32) -> bool {
        match self {
            CompareOp::Le => actual <= expected,
            CompareOp::Lt => actual < expected,
            CompareOp::Eq => actual == expected,
            CompareOp::Ne => actual != expected,
            CompareOp::Ge => actual >= expected,
            CompareOp::Gt => actual > expected,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Le => "<=",
            CompareOp::Lt => "<",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Ge => ">=",
            CompareOp::Gt => ">",
        })
    }
}

/// One `(operator, comparator, version)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpVersionRequirement {
    pub op_type: String,
    pub op: CompareOp,
    pub version: u32,
}

impl OpVersionRequirement {
    pub fn is_satisfied_by(&self, versions: &OpVersionMap) -> bool {
        let actual = versions.get(&self.op_type).copied().unwrap_or(0);
        self.op.holds(actual, self.version)
    }
}

impl fmt::Display for OpVersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.op_type, self.op, self.version)
    }
}

/// A conjunction of version requirements.
///
/// ```
/// use weld_core::{OpVersionCombination, OpVersionMap};
///
/// let combo = OpVersionCombination::new().le("matmul", 1).eq("mul", 0);
/// let versions = OpVersionMap::from([("matmul".to_string(), 1)]);
/// assert!(combo.is_satisfied_by(&versions));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpVersionCombination {
    requirements: Vec<OpVersionRequirement>,
}

impl OpVersionCombination {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, op_type: &str, op: CompareOp, version: u32) -> Self {
        self.requirements.push(OpVersionRequirement {
            op_type: op_type.to_string(),
            op,
            version,
        });
        self
    }

    pub fn le(self, op_type: &str, version: u32) -> Self {
        self.with(op_type, CompareOp::Le, version)
    }

    pub fn lt(self, op_type: &str, version: u32) -> Self {
        self.with(op_type, CompareOp::Lt, version)
    }

    pub fn eq(self, op_type: &str, version: u32) -> Self {
        self.with(op_type, CompareOp::Eq, version)
    }

    pub fn ne(self, op_type: &str, version: u32) -> Self {
        self.with(op_type, CompareOp::Ne, version)
    }

    pub fn ge(self, op_type: &str, version: u32) -> Self {
        self.with(op_type, CompareOp::Ge, version)
    }

    pub fn gt(self, op_type: &str, version: u32) -> Self {
        self.with(op_type, CompareOp::Gt, version)
    }

    pub fn requirements(&self) -> &[OpVersionRequirement] {
        &self.requirements
    }

    /// All requirements hold.
    pub fn is_satisfied_by(&self, versions: &OpVersionMap) -> bool {
        self.requirements
            .iter()
            .all(|req| req.is_satisfied_by(versions))
    }
}

impl fmt::Display for OpVersionCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", req)?;
        }
        Ok(())
    }
}

/// The operator-version combinations a pass supports.
///
/// Satisfied when any one combination holds. A capability with no
/// combinations places no constraint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PassCapability {
    combinations: Vec<OpVersionCombination>,
}

impl PassCapability {
    /// A capability that accepts every model.
    pub fn any() -> Self {
        Self::default()
    }

    /// Add an accepted combination.
    pub fn add_combination(mut self, combination: OpVersionCombination) -> Self {
        self.combinations.push(combination);
        self
    }

    pub fn combinations(&self) -> &[OpVersionCombination] {
        &self.combinations
    }

    pub fn is_satisfied_by(&self, versions: &OpVersionMap) -> bool {
        self.combinations.is_empty()
            || self
                .combinations
                .iter()
                .any(|combo| combo.is_satisfied_by(versions))
    }
}
