//! Workflow graph definition and compilation.
//!
//! Two representations live here:
//!
//! - [`VisualGraph`]: the editor-facing form (ordered nodes/edges, labels,
//!   declared inputs, per-edge mappings, entity-movement rules)
//! - [`ExecutionGraph`]: the compiled, indexed, immutable runtime form
//!
//! [`compile`] turns the former into the latter, collecting every
//! validation error instead of failing fast.

mod compiler;
mod oeg;
mod visual;

pub use compiler::{compile, CompileError, CompileErrorKind, CompileFailure};
pub use oeg::{ExecutionGraph, OegNode, OutboundEdge};
pub use visual::{
    CompleteAs, EdgeData, EntityKind, EntityMovement, InputDecl, MovementRule, NodeData,
    VisualEdge, VisualGraph, VisualNode,
};

#[cfg(test)]
mod tests;
