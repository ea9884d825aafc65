//! Compile-time class and method metadata.
//!
//! The IR refers to classes and callees by id. This module holds what
//! the optimizer knows about them statically: field layouts (which
//! offsets hold references), class properties that force an allocation
//! to escape, and interprocedural summaries of callee behavior.

use super::arena::{Arena, Id};
use super::types::{BasicType, Offset};

/// Id of a class in the [`KlassTable`].
pub type KlassId = Id<Klass>;

/// Id of a callee in the [`MethodTable`].
pub type MethodId = Id<MethodInfo>;

// =============================================================================
// Classes
// =============================================================================

/// One declared instance field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub offset: i32,
    pub ty: BasicType,
}

/// Shape of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KlassKind {
    Instance { fields: Vec<FieldInfo> },
    Array { elem: BasicType },
}

/// A loaded class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Klass {
    pub name: String,
    pub kind: KlassKind,
    /// Instances are registered for finalization on allocation.
    pub has_finalizer: bool,
    /// Thread or Reference subtype: instances are visible to the runtime.
    pub runtime_visible: bool,
}

impl Klass {
    pub fn instance(name: impl Into<String>, fields: Vec<FieldInfo>) -> Self {
        Klass {
            name: name.into(),
            kind: KlassKind::Instance { fields },
            has_finalizer: false,
            runtime_visible: false,
        }
    }

    pub fn array(name: impl Into<String>, elem: BasicType) -> Self {
        Klass {
            name: name.into(),
            kind: KlassKind::Array { elem },
            has_finalizer: false,
            runtime_visible: false,
        }
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, KlassKind::Array { .. })
    }

    /// Number of declared instance fields (0 for arrays).
    pub fn field_count(&self) -> usize {
        match &self.kind {
            KlassKind::Instance { fields } => fields.len(),
            KlassKind::Array { .. } => 0,
        }
    }

    /// Storage type at `offset`, if statically known.
    ///
    /// Every element of an array has the element type, whatever the offset.
    pub fn type_at(&self, offset: Offset) -> Option<BasicType> {
        match &self.kind {
            KlassKind::Array { elem } => Some(*elem),
            KlassKind::Instance { fields } => {
                let off = offset.known()?;
                fields.iter().find(|f| f.offset == off).map(|f| f.ty)
            }
        }
    }

    /// Whether any slot of this class can hold a reference.
    pub fn has_oop_slots(&self) -> bool {
        match &self.kind {
            KlassKind::Array { elem } => elem.is_oop(),
            KlassKind::Instance { fields } => fields.iter().any(|f| f.ty.is_oop()),
        }
    }
}

/// All classes known to one compilation.
#[derive(Debug, Clone, Default)]
pub struct KlassTable {
    klasses: Arena<Klass>,
}

impl KlassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, klass: Klass) -> KlassId {
        self.klasses.alloc(klass)
    }

    pub fn get(&self, id: KlassId) -> Option<&Klass> {
        self.klasses.get(id)
    }

    /// Storage type at `offset` within `klass`; `None` when unknown.
    pub fn type_at(&self, klass: Option<KlassId>, offset: Offset) -> Option<BasicType> {
        self.get(klass?)?.type_at(offset)
    }

    pub fn is_array(&self, klass: Option<KlassId>) -> bool {
        klass
            .and_then(|k| self.get(k))
            .is_some_and(|k| k.is_array())
    }
}

// =============================================================================
// Methods
// =============================================================================

/// What a callee does with one pointer argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgBehavior {
    /// Neither stored nor leaked; the caller's view is unchanged.
    NotRetained,
    /// Only reachable from the callee's frame while it runs.
    StackOnly,
    /// May be stored somewhere globally reachable.
    Escapes,
}

/// Interprocedural summary of a statically bound callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    /// Behavior per argument position; missing entries mean `Escapes`.
    pub args: Vec<ArgBehavior>,
    /// Argument positions the callee may return.
    pub returns_args: Vec<usize>,
    /// The callee returns an object it allocated and did not publish.
    pub returns_fresh: bool,
}

impl CallSummary {
    /// A callee that leaves every argument untouched and returns nothing
    /// interesting.
    pub fn pure(arg_count: usize) -> Self {
        CallSummary {
            args: vec![ArgBehavior::NotRetained; arg_count],
            returns_args: Vec::new(),
            returns_fresh: false,
        }
    }

    pub fn arg(&self, index: usize) -> ArgBehavior {
        self.args.get(index).copied().unwrap_or(ArgBehavior::Escapes)
    }
}

/// A callee known to the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    /// `None` when the callee was not analyzed.
    pub summary: Option<CallSummary>,
}

/// All callees referenced by one compilation.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: Arena<MethodInfo>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, summary: Option<CallSummary>) -> MethodId {
        self.methods.alloc(MethodInfo {
            name: name.into(),
            summary,
        })
    }

    pub fn get(&self, id: MethodId) -> Option<&MethodInfo> {
        self.methods.get(id)
    }

    pub fn summary(&self, id: MethodId) -> Option<&CallSummary> {
        self.get(id)?.summary.as_ref()
    }
}
