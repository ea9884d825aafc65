//! Type lattice for the Sea-of-Nodes IR.
//!
//! Escape analysis reads types to decide which values are pointers and
//! which memory slice an address belongs to. Memory splitting writes
//! types back: a pointer proven to reference exactly one non-escaping
//! allocation is narrowed to an *instance* type carrying that
//! allocation's id.
//!
//! ```text
//!                      Top
//!        /      /      |        \          \
//!      Int   Long   Float..   RawPtr    Oop(klass, offset, instance)
//!                                         |
//!                                        Null
//!        \      \      |        /          /
//!                     Bottom
//! ```

use std::fmt;

use super::meta::KlassId;
use super::node::NodeId;

// =============================================================================
// Basic Types
// =============================================================================

/// Storage type of a field, array element or memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    /// Object reference.
    Object,
}

impl BasicType {
    /// Whether values of this type are references.
    #[inline]
    pub const fn is_oop(self) -> bool {
        matches!(self, BasicType::Object)
    }
}

// =============================================================================
// Offsets
// =============================================================================

/// Byte offset of an address from its base object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    Known(i32),
    /// Unknown offset: covers every field or element of the base.
    Bot,
}

impl Offset {
    #[inline]
    pub const fn is_bot(self) -> bool {
        matches!(self, Offset::Bot)
    }

    #[inline]
    pub const fn known(self) -> Option<i32> {
        match self {
            Offset::Known(o) => Some(o),
            Offset::Bot => None,
        }
    }

    /// Whether two accesses at these offsets may touch the same slot.
    #[inline]
    pub fn may_overlap(self, other: Offset) -> bool {
        self == other || self.is_bot() || other.is_bot()
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Known(o) => write!(f, "+{}", o),
            Offset::Bot => write!(f, "+bot"),
        }
    }
}

// =============================================================================
// Object Pointer Types
// =============================================================================

/// A (possibly offset) pointer into a Java-style heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OopType {
    /// Static class; `None` is "any object".
    pub klass: Option<KlassId>,
    /// The dynamic class is exactly `klass`.
    pub exact: bool,
    /// Offset from the object start (0 for the object pointer itself).
    pub offset: Offset,
    /// Unique allocation this pointer refers to, once proven.
    pub instance: Option<NodeId>,
}

impl OopType {
    /// Pointer to an object of some subclass of `klass`.
    pub const fn of(klass: KlassId) -> Self {
        OopType {
            klass: Some(klass),
            exact: false,
            offset: Offset::Known(0),
            instance: None,
        }
    }

    /// Pointer to an object whose class is exactly `klass`.
    pub const fn exact(klass: KlassId) -> Self {
        OopType {
            klass: Some(klass),
            exact: true,
            offset: Offset::Known(0),
            instance: None,
        }
    }

    /// Pointer to any object.
    pub const fn any() -> Self {
        OopType {
            klass: None,
            exact: false,
            offset: Offset::Known(0),
            instance: None,
        }
    }

    pub const fn with_offset(self, offset: Offset) -> Self {
        OopType { offset, ..self }
    }

    pub const fn with_instance(self, instance: NodeId) -> Self {
        OopType {
            instance: Some(instance),
            ..self
        }
    }

    #[inline]
    pub const fn is_known_instance(&self) -> bool {
        self.instance.is_some()
    }

    fn meet(self, other: OopType) -> OopType {
        if self == other {
            return self;
        }
        let klass = if self.klass == other.klass { self.klass } else { None };
        OopType {
            klass,
            exact: self.exact && other.exact && klass.is_some(),
            offset: if self.offset == other.offset {
                self.offset
            } else {
                Offset::Bot
            },
            instance: if self.instance == other.instance {
                self.instance
            } else {
                None
            },
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// The type of an IR node's result.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value yet (top of the lattice).
    Top,
    /// Conflicting values.
    Bottom,
    Control,
    /// A memory state (whole heap or one alias slice).
    Memory,
    /// Multi-result node; values are read through projections.
    Tuple,
    Int,
    Long,
    Float,
    Double,
    /// Untyped machine address.
    RawPtr,
    /// The null reference.
    Null,
    Oop(OopType),
    /// Compressed form of an `Oop`.
    NarrowOop(OopType),
}

impl Type {
    /// Value type of a load or store of `bt`.
    pub const fn from_basic(bt: BasicType) -> Type {
        match bt {
            BasicType::Boolean | BasicType::Int => Type::Int,
            BasicType::Long => Type::Long,
            BasicType::Float => Type::Float,
            BasicType::Double => Type::Double,
            BasicType::Object => Type::Oop(OopType::any()),
        }
    }

    /// Reference-typed values: the ones escape analysis tracks.
    #[inline]
    pub const fn is_ptr(&self) -> bool {
        matches!(self, Type::Null | Type::Oop(_) | Type::NarrowOop(_))
    }

    #[inline]
    pub const fn is_raw(&self) -> bool {
        matches!(self, Type::RawPtr)
    }

    /// The object pointer part of an `Oop` or `NarrowOop`.
    #[inline]
    pub const fn oop(&self) -> Option<OopType> {
        match self {
            Type::Oop(t) | Type::NarrowOop(t) => Some(*t),
            _ => None,
        }
    }

    /// Replace the pointer part, keeping narrowness.
    pub const fn with_oop(self, oop: OopType) -> Type {
        match self {
            Type::NarrowOop(_) => Type::NarrowOop(oop),
            _ => Type::Oop(oop),
        }
    }

    /// Compress an `Oop` (other types are unchanged).
    pub const fn narrow(self) -> Type {
        match self {
            Type::Oop(t) => Type::NarrowOop(t),
            other => other,
        }
    }

    /// Decompress a `NarrowOop` (other types are unchanged).
    pub const fn widen(self) -> Type {
        match self {
            Type::NarrowOop(t) => Type::Oop(t),
            other => other,
        }
    }

    /// Lattice meet, used for phi types.
    pub fn meet(self, other: Type) -> Type {
        use Type::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Top, t) | (t, Top) => t,
            (Null, Oop(t)) | (Oop(t), Null) => Oop(t),
            (Null, NarrowOop(t)) | (NarrowOop(t), Null) => NarrowOop(t),
            (Oop(a), Oop(b)) => Oop(a.meet(b)),
            (NarrowOop(a), NarrowOop(b)) => NarrowOop(a.meet(b)),
            _ => Bottom,
        }
    }
}

impl Default for Type {
    fn default() -> Self {
        Type::Top
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = |f: &mut fmt::Formatter<'_>, prefix: &str, t: &OopType| {
            write!(f, "{}", prefix)?;
            match t.klass {
                Some(k) => write!(f, "{}", k)?,
                None => write!(f, "any")?,
            }
            if t.exact {
                write!(f, ":exact")?;
            }
            write!(f, "{}", t.offset)?;
            if let Some(inst) = t.instance {
                write!(f, ":inst{}", inst)?;
            }
            Ok(())
        };
        match self {
            Type::Top => write!(f, "top"),
            Type::Bottom => write!(f, "bottom"),
            Type::Control => write!(f, "control"),
            Type::Memory => write!(f, "memory"),
            Type::Tuple => write!(f, "tuple"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::RawPtr => write!(f, "rawptr"),
            Type::Null => write!(f, "null"),
            Type::Oop(t) => ptr(f, "oop:", t),
            Type::NarrowOop(t) => ptr(f, "narrowoop:", t),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn k(i: u32) -> KlassId {
        KlassId::new(i)
    }

    #[test]
    fn test_offset_overlap() {
        assert!(Offset::Known(8).may_overlap(Offset::Known(8)));
        assert!(!Offset::Known(8).may_overlap(Offset::Known(12)));
        assert!(Offset::Bot.may_overlap(Offset::Known(12)));
        assert_eq!(Offset::Known(16).known(), Some(16));
        assert_eq!(Offset::Bot.known(), None);
    }

    #[test]
    fn test_meet_null_with_oop_keeps_klass() {
        let t = Type::Oop(OopType::exact(k(1)));
        assert_eq!(Type::Null.meet(t), t);
        assert_eq!(t.meet(Type::Top), t);
    }

    #[test]
    fn test_meet_distinct_klasses_loses_exactness() {
        let a = Type::Oop(OopType::exact(k(1)));
        let b = Type::Oop(OopType::exact(k(2)));
        assert_eq!(a.meet(b), Type::Oop(OopType::any()));
        assert_eq!(a.meet(Type::Int), Type::Bottom);
    }

    #[test]
    fn test_meet_drops_mismatched_instance() {
        let a = Type::Oop(OopType::exact(k(1)).with_instance(NodeId::new(5)));
        let b = Type::Oop(OopType::exact(k(1)).with_instance(NodeId::new(6)));
        let m = a.meet(b).oop().unwrap();
        assert_eq!(m.klass, Some(k(1)));
        assert!(m.exact);
        assert!(!m.is_known_instance());
    }

    #[test]
    fn test_narrow_round_trip_preserves_instance() {
        let t = Type::Oop(OopType::exact(k(3)).with_instance(NodeId::new(9)));
        assert!(matches!(t.narrow(), Type::NarrowOop(_)));
        assert_eq!(t.narrow().widen(), t);
        assert_eq!(
            t.narrow().with_oop(OopType::any()),
            Type::NarrowOop(OopType::any())
        );
    }

    #[test]
    fn test_from_basic() {
        assert!(Type::from_basic(BasicType::Object).is_ptr());
        assert_eq!(Type::from_basic(BasicType::Boolean), Type::Int);
        assert!(!Type::RawPtr.is_ptr());
        assert!(Type::RawPtr.is_raw());
    }
}
