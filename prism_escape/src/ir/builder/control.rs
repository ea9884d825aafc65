use super::{FrameState, GraphBuilder};
use crate::ir::alias::{ALIAS_BOT, AliasIdx};
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, MemoryOp, Operator};
use crate::ir::types::Type;

/// Builder trait for control flow operations.
pub trait ControlBuilder {
    // Basic Control Flow
    fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId);
    fn region(&mut self, preds: &[NodeId]) -> NodeId;
    fn merge(&mut self, preds: &[FrameState]) -> NodeId;

    // Phi Nodes
    fn phi(&mut self, region: NodeId, values: &[NodeId]) -> NodeId;
    fn mem_phi(&mut self, region: NodeId, alias: AliasIdx, memories: &[NodeId]) -> NodeId;
    fn merge_memory(&mut self, base: NodeId, slices: &[(AliasIdx, NodeId)]) -> NodeId;

    // Exits
    fn return_value(&mut self, value: Option<NodeId>) -> NodeId;
    fn throw(&mut self, exception: NodeId) -> NodeId;
}

impl ControlBuilder for GraphBuilder {
    /// Returns the `(true, false)` projections; the current control is
    /// left for the caller to pick.
    fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId) {
        let ctrl = self.state.control;
        let iff = self
            .graph
            .add_node(Operator::Control(ControlOp::If), &[ctrl, condition]);
        let if_true = self.graph.add_node(Operator::Control(ControlOp::IfTrue), &[iff]);
        let if_false = self.graph.add_node(Operator::Control(ControlOp::IfFalse), &[iff]);
        (if_true, if_false)
    }

    fn region(&mut self, preds: &[NodeId]) -> NodeId {
        let region = self
            .graph
            .add_node(Operator::Control(ControlOp::Region), preds);
        self.state.control = region;
        region
    }

    /// Join several paths; memory gets a bottom memory phi unless every
    /// path carries the same state.
    fn merge(&mut self, preds: &[FrameState]) -> NodeId {
        let controls: Vec<NodeId> = preds.iter().map(|s| s.control).collect();
        let region = self.region(&controls);

        let memories: Vec<NodeId> = preds.iter().map(|s| s.memory).collect();
        match memories.split_first() {
            Some((first, rest)) if rest.iter().all(|m| m == first) => {
                self.state.memory = *first;
            }
            Some(_) => {
                self.mem_phi(region, ALIAS_BOT, &memories);
            }
            None => {}
        }
        region
    }

    /// Value phi typed with the meet of its inputs.
    fn phi(&mut self, region: NodeId, values: &[NodeId]) -> NodeId {
        let ty = values
            .iter()
            .fold(Type::Top, |acc, &v| acc.meet(self.graph.ty(v)));
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(region);
        inputs.extend_from_slice(values);
        self.graph.add_node_with_type(Operator::Phi, &inputs, ty)
    }

    fn mem_phi(&mut self, region: NodeId, alias: AliasIdx, memories: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(memories.len() + 1);
        inputs.push(region);
        inputs.extend_from_slice(memories);
        let phi = self
            .graph
            .add_node(Operator::Memory(MemoryOp::MemPhi(alias)), &inputs);
        self.state.memory = phi;
        phi
    }

    fn merge_memory(&mut self, base: NodeId, slices: &[(AliasIdx, NodeId)]) -> NodeId {
        let mm = self
            .graph
            .add_node(Operator::Memory(MemoryOp::MergeMem), &[base]);
        for &(alias, mem) in slices {
            self.graph.set_memory_at(mm, alias, mem);
        }
        self.state.memory = mm;
        mm
    }

    fn return_value(&mut self, value: Option<NodeId>) -> NodeId {
        let FrameState { control, memory } = self.state;
        let ret = match value {
            Some(v) => self
                .graph
                .add_node(Operator::Control(ControlOp::Return), &[control, memory, v]),
            None => self
                .graph
                .add_node(Operator::Control(ControlOp::Return), &[control, memory]),
        };
        self.graph.add_exit(ret);
        ret
    }

    fn throw(&mut self, exception: NodeId) -> NodeId {
        let FrameState { control, memory } = self.state;
        let throw = self.graph.add_node(
            Operator::Control(ControlOp::Rethrow),
            &[control, memory, exception],
        );
        self.graph.add_exit(throw);
        throw
    }
}
