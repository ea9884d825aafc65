//! Sea-of-Nodes Intermediate Representation.
//!
//! A compact IR carrying exactly what escape analysis reads and rewrites:
//!
//! # Core Components
//!
//! - **Types** (`types.rs`): pointer type lattice with offsets and
//!   unique-instance ids
//! - **Operators** (`operators.rs`): control, pointer-flow, memory and
//!   call operators
//! - **Arena** (`arena.rs`): dense id allocation and side tables
//! - **Node** (`node.rs`): IR node definitions
//! - **Meta** (`meta.rs`): class layouts and callee summaries
//! - **Alias** (`alias.rs`): memory alias classes
//! - **Graph** (`graph.rs`): Sea-of-Nodes graph structure
//! - **Builder** (`builder/`): construction helpers for tests and tools
//!
//! # Design Principles
//!
//! - **Arena allocation**: O(1) node creation, cache-friendly traversal
//! - **Use-def chains**: every input edge is mirrored in a use list
//! - **Explicit mutation**: passes change existing nodes only through the
//!   graph's mutation primitives

pub mod alias;
pub mod arena;
pub mod builder;
pub mod graph;
pub mod meta;
pub mod node;
pub mod operators;
pub mod types;

// Re-export commonly used types
pub use alias::{ALIAS_BOT, ALIAS_RAW, AliasIdx, AliasKey, AliasTable};
pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::{
    CallBuilder, CallSite, ControlBuilder, FrameState, GraphBuilder, MemoryBuilder, NewObject,
    ValueBuilder,
};
pub use graph::Graph;
pub use meta::{
    ArgBehavior, CallSummary, FieldInfo, Klass, KlassId, KlassTable, MethodId, MethodTable,
};
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{CallKind, ControlOp, MemoryOp, Operator, ProjKind};
pub use types::{BasicType, OopType, Offset, Type};
