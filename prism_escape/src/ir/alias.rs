//! Alias classes: the partition of memory into disjoint slices.
//!
//! Every memory access belongs to one alias class, identified by a dense
//! [`AliasIdx`]. Two accesses with different indices never touch the same
//! bytes, so later passes may reorder them freely and memory phis and
//! merge-memory nodes may carry one state per index.
//!
//! Classes are keyed by `(class, offset, instance)`:
//! - **General** classes (`instance == None`) cover a field of every
//!   object of a class
//! - **Instance** classes cover one field of one unique allocation; they
//!   are created by memory splitting for non-escaping objects
//!
//! Array elements are not told apart by offset: all elements of one array
//! class share a single class.

use rustc_hash::FxHashMap;

use super::meta::{KlassId, KlassTable};
use super::node::NodeId;
use super::types::{OopType, Offset, Type};

/// Dense alias class index.
pub type AliasIdx = u32;

/// The whole heap: every access may alias it.
pub const ALIAS_BOT: AliasIdx = 0;

/// Raw (untyped) memory.
pub const ALIAS_RAW: AliasIdx = 1;

/// What an alias class covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AliasKey {
    pub klass: KlassId,
    pub offset: Offset,
    pub instance: Option<NodeId>,
}

impl AliasKey {
    /// The same slot across all objects of the class.
    pub const fn general(self) -> AliasKey {
        AliasKey {
            instance: None,
            ..self
        }
    }
}

/// One registered alias class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasType {
    pub index: AliasIdx,
    /// `None` for the reserved bottom and raw classes.
    pub key: Option<AliasKey>,
    /// Index of the class with the instance stripped (itself if general).
    pub general: AliasIdx,
}

/// Compilation-wide alias table.
#[derive(Debug, Clone)]
pub struct AliasTable {
    types: Vec<AliasType>,
    lookup: FxHashMap<AliasKey, AliasIdx>,
}

impl AliasTable {
    pub fn new() -> Self {
        AliasTable {
            types: vec![
                AliasType {
                    index: ALIAS_BOT,
                    key: None,
                    general: ALIAS_BOT,
                },
                AliasType {
                    index: ALIAS_RAW,
                    key: None,
                    general: ALIAS_RAW,
                },
            ],
            lookup: FxHashMap::default(),
        }
    }

    /// Number of registered classes, reserved ones included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, idx: AliasIdx) -> Option<&AliasType> {
        self.types.get(idx as usize)
    }

    pub fn find(&self, key: &AliasKey) -> Option<AliasIdx> {
        self.lookup.get(key).copied()
    }

    /// Index for `key`, registering a new class (and its general class)
    /// on first use.
    pub fn find_or_create(&mut self, key: AliasKey) -> AliasIdx {
        if let Some(idx) = self.find(&key) {
            return idx;
        }
        let general = if key.instance.is_some() {
            self.find_or_create(key.general())
        } else {
            self.types.len() as AliasIdx
        };
        let index = self.types.len() as AliasIdx;
        self.types.push(AliasType {
            index,
            key: Some(key),
            general,
        });
        self.lookup.insert(key, index);
        index
    }

    /// Key of an address with pointer type `oop`; `None` when the class
    /// is unknown.
    pub fn key_for(klasses: &KlassTable, oop: &OopType) -> Option<AliasKey> {
        let klass = oop.klass?;
        let offset = if klasses.is_array(Some(klass)) && oop.offset != Offset::Known(0) {
            Offset::Bot
        } else {
            oop.offset
        };
        Some(AliasKey {
            klass,
            offset,
            instance: oop.instance,
        })
    }

    /// Alias class of an access through an address of type `ty`.
    pub fn index_of(&mut self, klasses: &KlassTable, ty: &Type) -> AliasIdx {
        match ty {
            Type::RawPtr => ALIAS_RAW,
            Type::Oop(oop) | Type::NarrowOop(oop) => match Self::key_for(klasses, oop) {
                Some(key) => self.find_or_create(key),
                None => ALIAS_BOT,
            },
            _ => ALIAS_BOT,
        }
    }

    /// The general class of `idx` (itself for general and reserved classes).
    pub fn general_index(&self, idx: AliasIdx) -> AliasIdx {
        self.get(idx).map_or(ALIAS_BOT, |t| t.general)
    }

    /// The unique allocation an instance class belongs to.
    pub fn instance_of(&self, idx: AliasIdx) -> Option<NodeId> {
        self.get(idx)?.key?.instance
    }

    #[inline]
    pub fn is_instance(&self, idx: AliasIdx) -> bool {
        self.instance_of(idx).is_some()
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::meta::Klass;
    use crate::ir::types::BasicType;

    #[test]
    fn test_reserved_classes() {
        let table = AliasTable::new();
        assert_eq!(table.len(), 2);
        assert_eq!(table.general_index(ALIAS_BOT), ALIAS_BOT);
        assert!(!table.is_instance(ALIAS_RAW));
    }

    #[test]
    fn test_instance_class_registers_general() {
        let mut table = AliasTable::new();
        let key = AliasKey {
            klass: KlassId::new(0),
            offset: Offset::Known(12),
            instance: Some(NodeId::new(7)),
        };
        let inst = table.find_or_create(key);
        let general = table.general_index(inst);

        assert_ne!(inst, general);
        assert_eq!(table.find(&key.general()), Some(general));
        assert_eq!(table.instance_of(inst), Some(NodeId::new(7)));
        assert!(!table.is_instance(general));
        assert_eq!(table.find_or_create(key), inst);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_array_elements_flatten() {
        let mut klasses = KlassTable::new();
        let arr = klasses.define(Klass::array("int[]", BasicType::Int));
        let mut table = AliasTable::new();

        let e0 = Type::Oop(OopType::exact(arr).with_offset(Offset::Known(16)));
        let e1 = Type::Oop(OopType::exact(arr).with_offset(Offset::Known(20)));
        let any = Type::Oop(OopType::exact(arr).with_offset(Offset::Bot));
        let a = table.index_of(&klasses, &e0);
        assert_eq!(table.index_of(&klasses, &e1), a);
        assert_eq!(table.index_of(&klasses, &any), a);
        assert_eq!(table.index_of(&klasses, &Type::RawPtr), ALIAS_RAW);
        assert_eq!(table.index_of(&klasses, &Type::Oop(OopType::any())), ALIAS_BOT);
    }
}
