//! Operators of the Sea-of-Nodes IR.
//!
//! Only the operation categories that affect pointer flow or memory
//! state are modelled. Everything else a real front end produces is
//! represented by the few scalar operators here (`ConInt`, `AddI`).
//!
//! # Input Layouts
//!
//! | Operator | Inputs |
//! |----------|--------|
//! | `Start` | none |
//! | `End` | every `Return` / `Rethrow` |
//! | `Region` | control predecessors |
//! | `If` | control, condition |
//! | `IfTrue`, `IfFalse`, `Proj`, `Parm` | producer |
//! | `Return` | control, memory, optional value |
//! | `Rethrow` | control, memory, exception |
//! | `SafePoint` | control, memory, live values |
//! | `AddP` | base, offset |
//! | casts | value |
//! | `Phi`, `MemPhi` | region, one value per predecessor |
//! | `Load` | control, memory, address |
//! | `Store` | control, memory, address, value |
//! | `CompareAndSwap` | control, memory, address, expected, new |
//! | `Allocate` | control, memory |
//! | `AllocateArray` | control, memory, length |
//! | `Initialize` | control, memory, raw address |
//! | `MergeMem` | base memory, then one slot per alias index |
//! | `Lock`, `Unlock` | control, memory, object |
//! | `ArrayCopy` | control, memory, src, src pos, dst, dst pos, length |
//! | `Call` | control, memory, arguments |

use super::alias::AliasIdx;
use super::meta::{KlassId, MethodId};
use super::types::{BasicType, Type};

/// Input index of the memory state on memory consumers.
pub const MEMORY_INPUT: usize = 1;

/// Input index of the address on loads and stores.
pub const ADDRESS_INPUT: usize = 2;

/// Input index of the stored value on stores.
pub const VALUE_INPUT: usize = 3;

/// First argument on calls.
pub const CALL_ARGS: usize = 2;

// =============================================================================
// Control Operators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    Start,
    End,
    Region,
    If,
    IfTrue,
    IfFalse,
    Return,
    Rethrow,
    /// Deoptimization point: records the values live in the frame.
    SafePoint,
}

/// Which result of a multi-result node a projection selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjKind {
    Control,
    Memory,
    /// The value result (call return, allocation address).
    Result,
}

// =============================================================================
// Memory Operators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    Load {
        bt: BasicType,
        /// Access type differs from the declared slot type.
        mismatched: bool,
    },
    Store {
        bt: BasicType,
        mismatched: bool,
    },
    /// Atomic compare-and-swap yielding a success flag; memory through
    /// `Proj(Memory)`.
    CompareAndSwap { bt: BasicType },
    Allocate(KlassId),
    AllocateArray(KlassId),
    /// Zeroes the object produced by an allocation.
    Initialize,
    /// Memory state assembled from per-alias slices.
    MergeMem,
    /// Memory merge at a region for one alias class.
    MemPhi(AliasIdx),
    Lock,
    Unlock,
    /// Bulk copy; `validated` copies have statically checked bounds and types.
    ArrayCopy { validated: bool },
}

/// How a call is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Statically bound; may have an interprocedural summary.
    Static(MethodId),
    /// Virtual or interface dispatch: the callee is unknown.
    Dynamic,
    /// Runtime stub that does not safepoint.
    Leaf,
    /// Boxes a primitive into a fresh object of the class.
    Boxing(KlassId),
}

// =============================================================================
// Operator
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Control(ControlOp),
    Proj(ProjKind),
    /// Incoming argument.
    Parm(u16),
    ConInt(i64),
    ConNull,
    /// Constant object, such as the mirror holding a class's statics.
    ConP(KlassId),
    /// Placeholder for absent inputs (empty merge-memory slots).
    Top,
    AddI,
    /// Pointer comparison.
    CmpP,
    /// Address computation: base object plus byte offset.
    AddP,
    /// Pins the exact type of a fresh allocation.
    CheckCastPP,
    CastPP,
    EncodeP,
    DecodeN,
    /// Value merge.
    Phi,
    /// Exception object at a handler entry.
    CreateEx,
    /// Class mirror loaded from an object's header.
    LoadKlass,
    Memory(MemoryOp),
    Call(CallKind),
}

impl Operator {
    /// Result type when the node does not carry an explicit one.
    pub fn result_type(&self) -> Type {
        match self {
            Operator::Control(ControlOp::Start) => Type::Tuple,
            Operator::Control(_) => Type::Control,
            Operator::Proj(ProjKind::Control) => Type::Control,
            Operator::Proj(ProjKind::Memory) => Type::Memory,
            Operator::ConInt(_)
            | Operator::AddI
            | Operator::CmpP
            | Operator::Memory(MemoryOp::CompareAndSwap { .. }) => Type::Int,
            Operator::ConNull => Type::Null,
            Operator::Top => Type::Top,
            Operator::Memory(MemoryOp::Load { bt, .. }) => Type::from_basic(*bt),
            Operator::Memory(MemoryOp::Allocate(_))
            | Operator::Memory(MemoryOp::AllocateArray(_))
            | Operator::Call(_) => Type::Tuple,
            Operator::Memory(_) => Type::Memory,
            _ => Type::Bottom,
        }
    }

    /// Input slot holding the memory state this node reads, if any.
    ///
    /// `MergeMem` and `MemPhi` read memory through every input and are not
    /// covered here.
    pub fn memory_input(&self) -> Option<usize> {
        match self {
            Operator::Control(ControlOp::Return)
            | Operator::Control(ControlOp::Rethrow)
            | Operator::Control(ControlOp::SafePoint)
            | Operator::Call(_) => Some(MEMORY_INPUT),
            Operator::Memory(op) => match op {
                MemoryOp::MergeMem | MemoryOp::MemPhi(_) => None,
                _ => Some(MEMORY_INPUT),
            },
            _ => None,
        }
    }

    /// Loads, stores and atomics: accesses through an address input.
    #[inline]
    pub fn is_access(&self) -> bool {
        matches!(
            self,
            Operator::Memory(
                MemoryOp::Load { .. } | MemoryOp::Store { .. } | MemoryOp::CompareAndSwap { .. }
            )
        )
    }

    /// Accesses whose type disagrees with the slot they touch.
    #[inline]
    pub fn is_mismatched_access(&self) -> bool {
        matches!(
            self,
            Operator::Memory(
                MemoryOp::Load {
                    mismatched: true,
                    ..
                } | MemoryOp::Store {
                    mismatched: true,
                    ..
                }
            )
        )
    }

    #[inline]
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            Operator::Memory(MemoryOp::Allocate(_) | MemoryOp::AllocateArray(_))
        )
    }

    /// Pointer-to-pointer conversions that keep the referent.
    #[inline]
    pub fn is_cast(&self) -> bool {
        matches!(
            self,
            Operator::CheckCastPP | Operator::CastPP | Operator::EncodeP | Operator::DecodeN
        )
    }

    #[inline]
    pub fn is_call(&self) -> bool {
        matches!(self, Operator::Call(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_input_slots() {
        let load = Operator::Memory(MemoryOp::Load {
            bt: BasicType::Int,
            mismatched: false,
        });
        assert_eq!(load.memory_input(), Some(MEMORY_INPUT));
        assert_eq!(Operator::Call(CallKind::Dynamic).memory_input(), Some(MEMORY_INPUT));
        assert_eq!(Operator::Memory(MemoryOp::MergeMem).memory_input(), None);
        assert_eq!(Operator::AddP.memory_input(), None);
    }

    #[test]
    fn test_access_classification() {
        let store = Operator::Memory(MemoryOp::Store {
            bt: BasicType::Object,
            mismatched: true,
        });
        assert!(store.is_access());
        assert!(store.is_mismatched_access());
        assert!(Operator::Memory(MemoryOp::CompareAndSwap { bt: BasicType::Int }).is_access());
        assert!(!Operator::Memory(MemoryOp::Initialize).is_access());
    }

    #[test]
    fn test_default_result_types() {
        assert_eq!(Operator::Control(ControlOp::Start).result_type(), Type::Tuple);
        assert_eq!(Operator::Memory(MemoryOp::Lock).result_type(), Type::Memory);
        assert_eq!(Operator::ConNull.result_type(), Type::Null);
        assert!(Operator::EncodeP.is_cast());
        assert!(!Operator::Phi.is_cast());
    }
}
