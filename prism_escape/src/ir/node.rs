//! IR node definitions.
//!
//! Each node has:
//! - **Operator**: what the node computes (see [`Operator`])
//! - **Inputs**: use-def edges, in the operator's documented layout
//! - **Type**: the current best known result type; escape analysis
//!   narrows pointer types in place
//! - **Flags**: bookkeeping bits set by passes

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::Operator;
use super::types::Type;

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Inputs of one node; most nodes have at most four.
pub type InputList = SmallVec<[NodeId; 4]>;

// =============================================================================
// Node
// =============================================================================

#[derive(Clone)]
pub struct Node {
    pub op: Operator,
    pub inputs: InputList,
    pub ty: Type,
    pub flags: NodeFlags,
}

impl Node {
    /// Node typed with the operator's default result type.
    pub fn new(op: Operator, inputs: InputList) -> Self {
        let ty = op.result_type();
        Node::with_type(op, inputs, ty)
    }

    pub fn with_type(op: Operator, inputs: InputList, ty: Type) -> Self {
        Node {
            op,
            inputs,
            ty,
            flags: NodeFlags::empty(),
        }
    }

    /// Input at `index`, if present.
    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index).copied()
    }

    /// Memory state read by this node, for single-memory consumers.
    #[inline]
    pub fn memory(&self) -> Option<NodeId> {
        self.input(self.op.memory_input()?)
    }

    #[inline]
    pub fn is_ptr(&self) -> bool {
        self.ty.is_ptr()
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self.op {
            Operator::ConInt(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs.as_slice())?;
        }
        write!(f, " : {:?}", self.ty)
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Bits recorded on nodes by passes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Type narrowed to a unique instance by memory splitting.
        const RETYPED = 0b0000_0001;
        /// Memory phi cloned for one instance slice by memory splitting.
        const SPLIT_PHI = 0b0000_0010;
    }
}
