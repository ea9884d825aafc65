use super::{FrameState, GraphBuilder};
use super::values::ValueBuilder;
use crate::ir::meta::KlassId;
use crate::ir::node::NodeId;
use crate::ir::operators::{MemoryOp, Operator, ProjKind};
use crate::ir::types::{BasicType, OopType, Offset, Type};

/// Byte offset of element 0 in an array.
pub const ARRAY_BASE_OFFSET: i32 = 16;

/// Element stride used for constant-index addresses.
pub const ARRAY_ELEMENT_SIZE: i32 = 8;

/// Nodes produced by one allocation sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewObject {
    /// The `Allocate` / `AllocateArray` node.
    pub alloc: NodeId,
    /// The `Initialize` node; the memory state after the allocation.
    pub init: NodeId,
    /// The typed object pointer (`CheckCastPP`).
    pub obj: NodeId,
}

/// Builder trait for heap operations.
pub trait MemoryBuilder {
    // Allocation
    fn new_instance(&mut self, klass: KlassId) -> NewObject;
    fn new_array(&mut self, klass: KlassId, length: NodeId) -> NewObject;

    // Addresses
    fn field_address(&mut self, obj: NodeId, offset: i32) -> NodeId;
    fn element_address(&mut self, array: NodeId, index: NodeId) -> NodeId;

    // Raw Accesses
    fn load(&mut self, address: NodeId, bt: BasicType) -> NodeId;
    fn store(&mut self, address: NodeId, value: NodeId, bt: BasicType) -> NodeId;
    fn compare_and_swap(&mut self, address: NodeId, expected: NodeId, new: NodeId) -> NodeId;

    // Typed Accesses
    fn load_field(&mut self, obj: NodeId, offset: i32) -> NodeId;
    fn store_field(&mut self, obj: NodeId, offset: i32, value: NodeId) -> NodeId;
    fn store_static(&mut self, klass: KlassId, offset: i32, value: NodeId) -> NodeId;
    fn load_element(&mut self, array: NodeId, index: NodeId) -> NodeId;
    fn store_element(&mut self, array: NodeId, index: NodeId, value: NodeId) -> NodeId;

    // Bulk And Monitors
    fn array_copy(
        &mut self,
        src: NodeId,
        src_pos: NodeId,
        dst: NodeId,
        dst_pos: NodeId,
        length: NodeId,
        validated: bool,
    ) -> NodeId;
    fn lock(&mut self, obj: NodeId) -> NodeId;
    fn unlock(&mut self, obj: NodeId) -> NodeId;
}

impl GraphBuilder {
    /// Allocate, project its memory and raw address, initialize, and pin
    /// the exact type.
    fn allocation(&mut self, op: MemoryOp, klass: KlassId, extra: Option<NodeId>) -> NewObject {
        let FrameState { control, memory } = self.state;
        let alloc = match extra {
            Some(length) => self
                .graph
                .add_node(Operator::Memory(op), &[control, memory, length]),
            None => self.graph.add_node(Operator::Memory(op), &[control, memory]),
        };
        let alloc_mem = self.graph.add_node(Operator::Proj(ProjKind::Memory), &[alloc]);
        let raw = self
            .graph
            .add_node_with_type(Operator::Proj(ProjKind::Result), &[alloc], Type::RawPtr);
        let init = self.graph.add_node(
            Operator::Memory(MemoryOp::Initialize),
            &[control, alloc_mem, raw],
        );
        let obj = self.graph.add_node_with_type(
            Operator::CheckCastPP,
            &[raw],
            Type::Oop(OopType::exact(klass)),
        );
        self.state.memory = init;
        NewObject { alloc, init, obj }
    }

    /// Declared storage type at an address, if the class layout knows it.
    fn declared_type(&self, address: NodeId) -> Option<BasicType> {
        let oop = self.graph.ty(address).oop()?;
        self.graph.klasses().type_at(oop.klass, oop.offset)
    }

    fn value_basic_type(&self, value: NodeId) -> BasicType {
        match self.graph.ty(value) {
            t if t.is_ptr() => BasicType::Object,
            Type::Long => BasicType::Long,
            Type::Float => BasicType::Float,
            Type::Double => BasicType::Double,
            _ => BasicType::Int,
        }
    }

    fn address(&mut self, base: NodeId, offset: Offset, offset_node: NodeId) -> NodeId {
        let oop = self.graph.ty(base).oop().unwrap_or_else(OopType::any);
        self.graph.add_node_with_type(
            Operator::AddP,
            &[base, offset_node],
            Type::Oop(oop.with_offset(offset)),
        )
    }
}

impl MemoryBuilder for GraphBuilder {
    fn new_instance(&mut self, klass: KlassId) -> NewObject {
        self.allocation(MemoryOp::Allocate(klass), klass, None)
    }

    fn new_array(&mut self, klass: KlassId, length: NodeId) -> NewObject {
        self.allocation(MemoryOp::AllocateArray(klass), klass, Some(length))
    }

    fn field_address(&mut self, obj: NodeId, offset: i32) -> NodeId {
        let off = self.const_int(offset as i64);
        self.address(obj, Offset::Known(offset), off)
    }

    /// Constant indices get a precise offset; anything else, including
    /// indices whose offset does not fit an `i32`, is `Bot`.
    fn element_address(&mut self, array: NodeId, index: NodeId) -> NodeId {
        let offset = self
            .graph
            .node(index)
            .as_int()
            .and_then(|i| i32::try_from(i).ok())
            .and_then(|i| i.checked_mul(ARRAY_ELEMENT_SIZE))
            .and_then(|o| o.checked_add(ARRAY_BASE_OFFSET));
        match offset {
            Some(offset) => {
                let off = self.const_int(offset as i64);
                self.address(array, Offset::Known(offset), off)
            }
            None => self.address(array, Offset::Bot, index),
        }
    }

    fn load(&mut self, address: NodeId, bt: BasicType) -> NodeId {
        let mismatched = self.declared_type(address).is_some_and(|d| d != bt);
        let FrameState { control, memory } = self.state;
        self.graph.add_node(
            Operator::Memory(MemoryOp::Load { bt, mismatched }),
            &[control, memory, address],
        )
    }

    fn store(&mut self, address: NodeId, value: NodeId, bt: BasicType) -> NodeId {
        let mismatched = self.declared_type(address).is_some_and(|d| d != bt);
        let FrameState { control, memory } = self.state;
        let store = self.graph.add_node(
            Operator::Memory(MemoryOp::Store { bt, mismatched }),
            &[control, memory, address, value],
        );
        self.state.memory = store;
        store
    }

    /// Returns the success flag; memory continues from its projection.
    fn compare_and_swap(&mut self, address: NodeId, expected: NodeId, new: NodeId) -> NodeId {
        let bt = self.value_basic_type(new);
        let FrameState { control, memory } = self.state;
        let cas = self.graph.add_node(
            Operator::Memory(MemoryOp::CompareAndSwap { bt }),
            &[control, memory, address, expected, new],
        );
        self.state.memory = self.graph.add_node(Operator::Proj(ProjKind::Memory), &[cas]);
        cas
    }

    /// Fields of unknown layout load as references.
    fn load_field(&mut self, obj: NodeId, offset: i32) -> NodeId {
        let address = self.field_address(obj, offset);
        let bt = self.declared_type(address).unwrap_or(BasicType::Object);
        self.load(address, bt)
    }

    fn store_field(&mut self, obj: NodeId, offset: i32, value: NodeId) -> NodeId {
        let address = self.field_address(obj, offset);
        let bt = self
            .declared_type(address)
            .unwrap_or_else(|| self.value_basic_type(value));
        self.store(address, value, bt)
    }

    fn store_static(&mut self, klass: KlassId, offset: i32, value: NodeId) -> NodeId {
        let mirror = self.class_constant(klass);
        let address = self.field_address(mirror, offset);
        let bt = self.value_basic_type(value);
        self.store(address, value, bt)
    }

    fn load_element(&mut self, array: NodeId, index: NodeId) -> NodeId {
        let address = self.element_address(array, index);
        let bt = self.declared_type(address).unwrap_or(BasicType::Object);
        self.load(address, bt)
    }

    fn store_element(&mut self, array: NodeId, index: NodeId, value: NodeId) -> NodeId {
        let address = self.element_address(array, index);
        let bt = self
            .declared_type(address)
            .unwrap_or_else(|| self.value_basic_type(value));
        self.store(address, value, bt)
    }

    fn array_copy(
        &mut self,
        src: NodeId,
        src_pos: NodeId,
        dst: NodeId,
        dst_pos: NodeId,
        length: NodeId,
        validated: bool,
    ) -> NodeId {
        let FrameState { control, memory } = self.state;
        let copy = self.graph.add_node(
            Operator::Memory(MemoryOp::ArrayCopy { validated }),
            &[control, memory, src, src_pos, dst, dst_pos, length],
        );
        self.state.memory = copy;
        copy
    }

    fn lock(&mut self, obj: NodeId) -> NodeId {
        let FrameState { control, memory } = self.state;
        let lock = self
            .graph
            .add_node(Operator::Memory(MemoryOp::Lock), &[control, memory, obj]);
        self.state.memory = lock;
        lock
    }

    fn unlock(&mut self, obj: NodeId) -> NodeId {
        let FrameState { control, memory } = self.state;
        let unlock = self
            .graph
            .add_node(Operator::Memory(MemoryOp::Unlock), &[control, memory, obj]);
        self.state.memory = unlock;
        unlock
    }
}
