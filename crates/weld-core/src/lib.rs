//! Core intermediate representation and pass traits for weld.
//!
//! This crate provides the foundational abstractions the fusion passes in
//! `weld-passes` are written against:
//! - Bipartite IR graph (`IrGraph`) of operator and variable nodes
//! - Operator and variable descriptors (`OpDesc`, `VarDesc`)
//! - Tagged attribute values with checked accessors (`AttributeValue`)
//! - Operator definitions with attribute defaults (`OpDefRegistry`)
//! - The `Pass` trait, its stages, and operator-version capabilities

pub mod attribute;
pub mod ir;
pub mod ir_builder;
pub mod op_def;
pub mod op_desc;
pub mod pass;
pub mod version;

// Re-export commonly used types
pub use attribute::{AttrKind, AttributeValue};
pub use ir::{IrGraph, Node, NodeId};
pub use ir_builder::GraphBuilder;
pub use op_def::{OpDef, OpDefRegistry};
pub use op_desc::{OpDesc, VarDesc, VarKind};
pub use pass::{Pass, Stage};
pub use version::{
    CompareOp, OpVersionCombination, OpVersionMap, OpVersionRequirement, PassCapability,
};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for weld operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Node {0:?} not found")]
    NodeNotFound(NodeId),

    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    #[error("Attribute '{name}' has type {actual}, expected {expected}")]
    AttributeType {
        name: String,
        expected: AttrKind,
        actual: AttrKind,
    },

    #[error("Unknown pass: {0}")]
    UnknownPass(String),

    #[error("Pass '{0}' is already registered")]
    DuplicatePass(String),

    #[error("Pass '{pass}' failed: {message}")]
    Pass { pass: String, message: String },
}
