use super::GraphBuilder;
use crate::ir::meta::KlassId;
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;
use crate::ir::types::{OopType, Type};

/// Builder trait for constants and pointer conversions.
pub trait ValueBuilder {
    // Constants
    fn const_int(&mut self, value: i64) -> NodeId;
    fn null(&mut self) -> NodeId;
    fn class_constant(&mut self, klass: KlassId) -> NodeId;

    // Scalars
    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn cmp_ptr(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;

    // Pointer Conversions
    fn cast(&mut self, value: NodeId, ty: Type) -> NodeId;
    fn encode(&mut self, value: NodeId) -> NodeId;
    fn decode(&mut self, value: NodeId) -> NodeId;

    // Opaque Objects
    fn load_klass(&mut self, obj: NodeId) -> NodeId;
    fn create_exception(&mut self) -> NodeId;
}

impl ValueBuilder for GraphBuilder {
    fn const_int(&mut self, value: i64) -> NodeId {
        self.graph.add_node(Operator::ConInt(value), &[])
    }

    fn null(&mut self) -> NodeId {
        self.graph.add_node(Operator::ConNull, &[])
    }

    /// The class mirror; static fields live at offsets within it.
    fn class_constant(&mut self, klass: KlassId) -> NodeId {
        self.graph
            .add_node_with_type(Operator::ConP(klass), &[], Type::Oop(OopType::exact(klass)))
    }

    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph.add_node(Operator::AddI, &[lhs, rhs])
    }

    fn cmp_ptr(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph.add_node(Operator::CmpP, &[lhs, rhs])
    }

    fn cast(&mut self, value: NodeId, ty: Type) -> NodeId {
        self.graph.add_node_with_type(Operator::CastPP, &[value], ty)
    }

    fn encode(&mut self, value: NodeId) -> NodeId {
        let ty = self.graph.ty(value).narrow();
        self.graph.add_node_with_type(Operator::EncodeP, &[value], ty)
    }

    fn decode(&mut self, value: NodeId) -> NodeId {
        let ty = self.graph.ty(value).widen();
        self.graph.add_node_with_type(Operator::DecodeN, &[value], ty)
    }

    fn load_klass(&mut self, obj: NodeId) -> NodeId {
        self.graph
            .add_node_with_type(Operator::LoadKlass, &[obj], Type::Oop(OopType::any()))
    }

    fn create_exception(&mut self) -> NodeId {
        let ctrl = self.state.control;
        self.graph
            .add_node_with_type(Operator::CreateEx, &[ctrl], Type::Oop(OopType::any()))
    }
}
