use super::{FrameState, GraphBuilder};
use crate::ir::meta::{KlassId, MethodId};
use crate::ir::node::NodeId;
use crate::ir::operators::{CallKind, ControlOp, Operator, ProjKind};
use crate::ir::types::{OopType, Type};

/// A call node and its value projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub call: NodeId,
    /// `None` for calls without a result.
    pub result: Option<NodeId>,
}

/// Builder trait for calls and deoptimization points.
pub trait CallBuilder {
    fn call_static(&mut self, method: MethodId, args: &[NodeId], ret: Option<Type>) -> CallSite;
    fn call_dynamic(&mut self, args: &[NodeId], ret: Option<Type>) -> CallSite;
    fn call_leaf(&mut self, args: &[NodeId]) -> CallSite;
    fn box_value(&mut self, klass: KlassId, value: NodeId) -> CallSite;

    /// Deoptimization point keeping `live` reachable.
    fn safepoint(&mut self, live: &[NodeId]) -> NodeId;
}

impl GraphBuilder {
    fn call(&mut self, kind: CallKind, args: &[NodeId], ret: Option<Type>) -> CallSite {
        let FrameState { control, memory } = self.state;
        let mut inputs = Vec::with_capacity(args.len() + 2);
        inputs.push(control);
        inputs.push(memory);
        inputs.extend_from_slice(args);

        let call = self.graph.add_node(Operator::Call(kind), &inputs);
        self.state.control = self.graph.add_node(Operator::Proj(ProjKind::Control), &[call]);
        self.state.memory = self.graph.add_node(Operator::Proj(ProjKind::Memory), &[call]);
        let result = ret.map(|ty| {
            self.graph
                .add_node_with_type(Operator::Proj(ProjKind::Result), &[call], ty)
        });
        CallSite { call, result }
    }
}

impl CallBuilder for GraphBuilder {
    fn call_static(&mut self, method: MethodId, args: &[NodeId], ret: Option<Type>) -> CallSite {
        self.call(CallKind::Static(method), args, ret)
    }

    fn call_dynamic(&mut self, args: &[NodeId], ret: Option<Type>) -> CallSite {
        self.call(CallKind::Dynamic, args, ret)
    }

    fn call_leaf(&mut self, args: &[NodeId]) -> CallSite {
        self.call(CallKind::Leaf, args, None)
    }

    fn box_value(&mut self, klass: KlassId, value: NodeId) -> CallSite {
        self.call(
            CallKind::Boxing(klass),
            &[value],
            Some(Type::Oop(OopType::exact(klass))),
        )
    }

    fn safepoint(&mut self, live: &[NodeId]) -> NodeId {
        let FrameState { control, memory } = self.state;
        let mut inputs = Vec::with_capacity(live.len() + 2);
        inputs.push(control);
        inputs.push(memory);
        inputs.extend_from_slice(live);

        let sp = self
            .graph
            .add_node(Operator::Control(ControlOp::SafePoint), &inputs);
        self.state.control = sp;
        sp
    }
}
