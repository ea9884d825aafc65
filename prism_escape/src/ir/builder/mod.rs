//! IR Graph Builder module.
//!
//! [`GraphBuilder`] threads the current control and memory state while
//! nodes are appended, so callers describe a method body as a straight
//! sequence of operations. Each concern lives in its own trait:
//!
//! - [`ValueBuilder`]: constants, casts, pointer comparisons
//! - [`MemoryBuilder`]: allocations, loads, stores, atomics, locks, copies
//! - [`CallBuilder`]: calls, boxing, safepoints
//! - [`ControlBuilder`]: branches, merges, phis, returns

use crate::ir::graph::Graph;
use crate::ir::meta::{CallSummary, Klass, KlassId, KlassTable, MethodId, MethodTable};
use crate::ir::node::NodeId;
use crate::ir::operators::{Operator, ProjKind};
use crate::ir::types::Type;

pub mod calls;
pub mod control;
pub mod memory;
pub mod values;


pub use calls::{CallBuilder, CallSite};
pub use control::ControlBuilder;
pub use memory::{MemoryBuilder, NewObject};
pub use values::ValueBuilder;

// =============================================================================
// Frame State
// =============================================================================

/// Control and memory state at the current insertion point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    pub control: NodeId,
    pub memory: NodeId,
}

// =============================================================================
// Graph Builder
// =============================================================================

/// Builder for constructing IR graphs one operation at a time.
pub struct GraphBuilder {
    /// The graph being built.
    pub(crate) graph: Graph,

    /// Current insertion state.
    pub(crate) state: FrameState,

    /// Parameter nodes, by position.
    parameters: Vec<NodeId>,
}

impl GraphBuilder {
    /// Builder over an empty class and method table.
    pub fn new() -> Self {
        Self::with_metadata(KlassTable::new(), MethodTable::new())
    }

    pub fn with_metadata(klasses: KlassTable, methods: MethodTable) -> Self {
        let mut graph = Graph::with_metadata(klasses, methods);
        let start = graph.start;
        let control = graph.add_node(Operator::Proj(ProjKind::Control), &[start]);
        let memory = graph.add_node(Operator::Proj(ProjKind::Memory), &[start]);

        GraphBuilder {
            graph,
            state: FrameState { control, memory },
            parameters: Vec::new(),
        }
    }

    /// Get the constructed graph.
    pub fn finish(self) -> Graph {
        self.graph
    }

    /// Get a reference to the graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Get a mutable reference to the graph.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn define_class(&mut self, klass: Klass) -> KlassId {
        self.graph.klasses_mut().define(klass)
    }

    pub fn define_method(
        &mut self,
        name: impl Into<String>,
        summary: Option<CallSummary>,
    ) -> MethodId {
        self.graph.methods_mut().define(name, summary)
    }

    // =========================================================================
    // State Management
    // =========================================================================

    /// Append an incoming argument of type `ty`.
    pub fn parameter(&mut self, ty: Type) -> NodeId {
        let index = self.parameters.len() as u16;
        let start = self.graph.start;
        let param = self
            .graph
            .add_node_with_type(Operator::Parm(index), &[start], ty);
        self.parameters.push(param);
        param
    }

    #[inline]
    pub fn control(&self) -> NodeId {
        self.state.control
    }

    #[inline]
    pub fn set_control(&mut self, control: NodeId) {
        self.state.control = control;
    }

    #[inline]
    pub fn memory(&self) -> NodeId {
        self.state.memory
    }

    #[inline]
    pub fn set_memory(&mut self, memory: NodeId) {
        self.state.memory = memory;
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Resume building at a previously captured state.
    #[inline]
    pub fn restore(&mut self, state: FrameState) {
        self.state = state;
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
