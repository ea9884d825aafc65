//! Optimization passes over the Sea-of-Nodes IR.
//!
//! # Passes
//!
//! - **Escape** (`escape/`): connection-graph escape analysis, scalar
//!   replaceability, and per-instance memory splitting

pub mod escape;

pub use escape::{Escape, EscapeConfig, EscapeError, EscapeResult, EscapeSummary};

use crate::ir::graph::Graph;

/// A pass that transforms a graph in place.
pub trait OptimizationPass {
    /// Short identifier used in logs and statistics.
    fn name(&self) -> &'static str;

    /// Run the pass. Returns true if the graph changed.
    fn run(&mut self, graph: &mut Graph) -> bool;
}
