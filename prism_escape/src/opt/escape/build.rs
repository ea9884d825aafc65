//! Connection graph construction.
//!
//! One breadth-first walk over node inputs from the graph's exit creates
//! a points-to node for every reference-relevant IR node together with
//! the edges that can be added immediately. Edges whose target may not
//! exist yet (casts, phis, address bases, stored values, call arguments)
//! are deferred: the IR node is queued and revisited in a second pass
//! once every points-to node exists.

use std::collections::VecDeque;

use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::meta::{ArgBehavior, KlassId};
use crate::ir::node::NodeId;
use crate::ir::operators::{
    ADDRESS_INPUT, CALL_ARGS, CallKind, ControlOp, MemoryOp, Operator, ProjKind, VALUE_INPUT,
};
use crate::ir::types::BasicType;

use super::EscapeConfig;
use super::observer::EscapeObserver;
use super::points_to::{ConnectionGraph, EscapeState, PointsToFlags, PtId};

/// Input index of the new value on `CompareAndSwap`.
const CAS_NEW_VALUE: usize = 4;

/// Input indices of source and destination on `ArrayCopy`.
const COPY_SRC: usize = 2;
pub(super) const COPY_DST: usize = 4;

/// Per-run construction state.
struct Construction<'a> {
    cg: ConnectionGraph,
    graph: &'a Graph,
    config: &'a EscapeConfig,
    observer: &'a mut dyn EscapeObserver,
    /// IR nodes with deferred edges, in discovery order.
    delayed: Vec<NodeId>,
}

impl ConnectionGraph {
    /// Build the connection graph of `graph`: nodes and simple edges,
    /// not yet completed.
    pub fn build(
        graph: &Graph,
        config: &EscapeConfig,
        observer: &mut dyn EscapeObserver,
    ) -> ConnectionGraph {
        let mut cons = Construction {
            cg: ConnectionGraph::new(graph.len()),
            graph,
            config,
            observer,
            delayed: Vec::new(),
        };

        let mut queue = VecDeque::new();
        let mut visited = BitSet::with_capacity(graph.len());
        queue.push_back(graph.end);
        visited.insert(graph.end.as_usize());
        while let Some(n) = queue.pop_front() {
            cons.add_node(n);
            for &input in graph.node(n).inputs.iter() {
                if visited.insert(input.as_usize()) {
                    queue.push_back(input);
                }
            }
        }

        let delayed = std::mem::take(&mut cons.delayed);
        for n in delayed {
            cons.add_final_edges(n);
        }

        let mut cg = cons.cg;
        cg.finish_collecting();
        log::debug!(
            "escape: built connection graph: {} nodes, {} objects, {} oop fields",
            cg.len(),
            cg.java_objects.len(),
            cg.oop_fields.len()
        );
        cg
    }
}

impl Construction<'_> {
    // =========================================================================
    // Pass 1: Nodes
    // =========================================================================

    fn add_node(&mut self, n: NodeId) {
        let graph = self.graph;
        let node = graph.node(n);
        match node.op {
            Operator::Memory(MemoryOp::Allocate(k)) => self.add_instance(n, k),
            Operator::Memory(MemoryOp::AllocateArray(k)) => self.add_array(n, k),
            Operator::Call(kind) => {
                self.add_call(n, kind);
                self.cg.safepoints.push(n);
                self.delayed.push(n);
            }
            Operator::Proj(ProjKind::Result) => {
                let producer = node.input(0).map(|p| graph.op(p));
                match producer {
                    Some(op) if op.is_allocation() => self.add_deferred_local(n),
                    Some(Operator::Call(_)) if node.is_ptr() => self.add_deferred_local(n),
                    _ if node.is_ptr() => self.map_to_phantom(n),
                    _ => {}
                }
            }
            Operator::Parm(_) if node.is_ptr() => {
                let obj = self.cg.add_java_object(n, EscapeState::ArgEscape);
                self.cg.set_fields_escape_state(obj, EscapeState::GlobalEscape);
            }
            Operator::CreateEx | Operator::LoadKlass | Operator::ConP(_) => {
                self.cg.add_java_object(n, EscapeState::GlobalEscape);
            }
            Operator::ConNull => {
                let null = self.cg.null();
                self.cg.map_ideal(n, null);
            }
            op if op.is_cast() && node.is_ptr() => self.add_deferred_local(n),
            Operator::Phi if node.is_ptr() => self.add_deferred_local(n),
            Operator::AddP => self.add_address(n),
            Operator::Memory(MemoryOp::Load { .. }) if node.is_ptr() => {
                self.add_deferred_local(n)
            }
            Operator::Memory(MemoryOp::Store { .. }) => {
                if self.is_ptr_input(n, VALUE_INPUT) {
                    self.delayed.push(n);
                }
            }
            Operator::Memory(MemoryOp::CompareAndSwap { .. }) => {
                if self.is_ptr_input(n, CAS_NEW_VALUE) {
                    self.delayed.push(n);
                }
            }
            Operator::Memory(MemoryOp::ArrayCopy { .. }) => self.delayed.push(n),
            Operator::Memory(MemoryOp::Lock | MemoryOp::Unlock) => self.cg.locks.push(n),
            Operator::Control(ControlOp::Return | ControlOp::Rethrow) => {
                if self.is_ptr_input(n, 2) {
                    self.cg.add_local_var(n, EscapeState::GlobalEscape);
                    self.delayed.push(n);
                }
            }
            Operator::Control(ControlOp::SafePoint) => self.cg.safepoints.push(n),
            _ if node.is_ptr() => {
                log::trace!("escape: unclassified pointer {:?} {:?}", n, node.op);
                self.map_to_phantom(n);
            }
            _ => {}
        }
    }

    fn add_deferred_local(&mut self, n: NodeId) {
        self.cg.add_local_var(n, EscapeState::NoEscape);
        self.delayed.push(n);
    }

    fn map_to_phantom(&mut self, n: NodeId) {
        let phantom = self.cg.phantom();
        self.cg.map_ideal(n, phantom);
    }

    fn is_ptr_input(&self, n: NodeId, index: usize) -> bool {
        self.graph
            .input(n, index)
            .is_some_and(|v| self.graph.ty(v).is_ptr())
    }

    fn add_instance(&mut self, n: NodeId, k: KlassId) {
        let klass = self.graph.klasses().get(k);
        let escapes = klass.is_none_or(|k| k.has_finalizer || k.runtime_visible);
        if escapes {
            self.cg.add_allocation(n, EscapeState::GlobalEscape);
            return;
        }
        let obj = self.cg.add_allocation(n, EscapeState::NoEscape);
        self.add_candidate(obj);
        let fields = klass.map_or(0, |k| k.field_count());
        if fields > self.config.max_instance_fields {
            self.cg
                .set_not_scalar_replaceable(obj, "too many fields", self.observer);
        }
    }

    fn add_array(&mut self, n: NodeId, k: KlassId) {
        if !self.graph.klasses().is_array(Some(k)) {
            self.cg.add_allocation(n, EscapeState::GlobalEscape);
            return;
        }
        let obj = self.cg.add_allocation(n, EscapeState::NoEscape);
        self.add_candidate(obj);
        let length = self
            .graph
            .input(n, 2)
            .and_then(|len| self.graph.node(len).as_int());
        match length {
            None => {
                self.cg
                    .set_not_scalar_replaceable(obj, "non-constant array length", self.observer)
            }
            Some(len) if len < 0 || len as u64 > self.config.max_array_length as u64 => {
                self.cg
                    .set_not_scalar_replaceable(obj, "array too large", self.observer)
            }
            Some(_) => {}
        }
    }

    /// Track an object that may end up not escaping.
    fn add_candidate(&mut self, obj: PtId) {
        self.cg.candidates.push(obj);
        if !self.config.eliminate_allocations {
            self.cg
                .set_not_scalar_replaceable(obj, "allocation elimination disabled", self.observer);
        }
    }

    /// The call's own node models its pointer result, if it has one.
    fn add_call(&mut self, n: NodeId, kind: CallKind) {
        let graph = self.graph;
        let returns_ptr = graph.uses(n).iter().any(|&u| {
            graph.op(u) == Operator::Proj(ProjKind::Result) && graph.ty(u).is_ptr()
        });
        if !returns_ptr {
            return;
        }
        match kind {
            CallKind::Boxing(_) => {
                let obj = self.cg.add_java_object(n, EscapeState::NoEscape);
                self.add_candidate(obj);
                self.cg
                    .set_not_scalar_replaceable(obj, "boxed value", self.observer);
            }
            CallKind::Static(m) => match graph.methods().summary(m) {
                Some(summary) if !summary.returns_args.is_empty() => {
                    self.cg.add_local_var(n, EscapeState::NoEscape);
                }
                Some(summary) if summary.returns_fresh => {
                    let obj = self.cg.add_java_object(n, EscapeState::NoEscape);
                    self.add_candidate(obj);
                    self.cg
                        .set_not_scalar_replaceable(obj, "returned from a call", self.observer);
                }
                _ => {
                    self.cg.add_java_object(n, EscapeState::GlobalEscape);
                }
            },
            CallKind::Dynamic | CallKind::Leaf => {
                self.cg.add_java_object(n, EscapeState::GlobalEscape);
            }
        }
    }

    /// Field node for an address computation.
    fn add_address(&mut self, n: NodeId) {
        let graph = self.graph;
        let Some(oop) = graph.ty(n).oop() else {
            return;
        };
        let offset = oop.offset;
        let is_oop = match graph.klasses().type_at(oop.klass, offset) {
            Some(bt) => bt.is_oop(),
            None => self.accessed_as_oop(n),
        };
        self.cg.add_field(n, EscapeState::NoEscape, offset, is_oop);
        self.delayed.push(n);
    }

    /// Whether some access through address `n` moves a reference.
    fn accessed_as_oop(&self, n: NodeId) -> bool {
        let graph = self.graph;
        graph.uses(n).iter().any(|&u| {
            if graph.input(u, ADDRESS_INPUT) != Some(n) {
                return false;
            }
            match graph.op(u) {
                Operator::Memory(MemoryOp::Load { bt, .. })
                | Operator::Memory(MemoryOp::Store { bt, .. })
                | Operator::Memory(MemoryOp::CompareAndSwap { bt }) => bt == BasicType::Object,
                _ => false,
            }
        })
    }

    // =========================================================================
    // Pass 2: Deferred Edges
    // =========================================================================

    /// Points-to node of a value input: `None` for non-pointers, phantom
    /// for pointers the walk never classified.
    fn value_pt(&self, v: NodeId) -> Option<PtId> {
        match self.cg.ptnode(v) {
            Some(pt) => Some(pt),
            None if self.graph.ty(v).is_ptr() => {
                debug_assert!(false, "pointer {:?} has no points-to node", v);
                Some(self.cg.phantom())
            }
            None => None,
        }
    }

    fn add_final_edges(&mut self, n: NodeId) {
        match self.graph.op(n) {
            Operator::Memory(MemoryOp::Store { .. }) => self.add_stored_value(n, VALUE_INPUT),
            Operator::Memory(MemoryOp::CompareAndSwap { .. }) => {
                self.add_stored_value(n, CAS_NEW_VALUE)
            }
            Operator::Memory(MemoryOp::ArrayCopy { validated }) => self.add_copy(n, validated),
            Operator::Call(kind) => self.add_call_arguments(n, kind),
            _ => {
                if let Some(pt) = self.cg.ptnode(n) {
                    self.add_value_edges(n, pt);
                }
            }
        }
    }

    /// Deferred edges of a node that has its own points-to node.
    fn add_value_edges(&mut self, n: NodeId, pt: PtId) {
        let node = self.graph.node(n);
        match node.op {
            Operator::Proj(ProjKind::Result) => {
                let producer = node.input(0).and_then(|p| self.cg.ptnode(p));
                let target = producer.unwrap_or(self.cg.phantom());
                self.cg.add_edge(pt, target);
            }
            Operator::Phi => {
                for &v in node.inputs.iter().skip(1) {
                    if let Some(target) = self.value_pt(v) {
                        self.cg.add_edge(pt, target);
                    }
                }
            }
            op if op.is_cast() => {
                let target = node
                    .input(0)
                    .and_then(|v| self.value_pt(v))
                    .unwrap_or(self.cg.phantom());
                self.cg.add_edge(pt, target);
            }
            Operator::AddP => self.add_field_base(n, pt),
            Operator::Memory(MemoryOp::Load { .. }) => {
                let field = node
                    .input(ADDRESS_INPUT)
                    .and_then(|adr| self.cg.ptnode(adr))
                    .filter(|&f| self.cg.node(f).is_oop_field());
                let target = field.unwrap_or(self.cg.phantom());
                self.cg.add_edge(pt, target);
            }
            Operator::Control(ControlOp::Return | ControlOp::Rethrow) => {
                if let Some(target) = node.input(2).and_then(|v| self.value_pt(v)) {
                    self.cg.add_edge(pt, target);
                }
            }
            _ => {}
        }
    }

    /// Record the container of field `pt`. Addresses off non-pointers
    /// get the phantom base and escape.
    fn add_field_base(&mut self, n: NodeId, pt: PtId) {
        let base = self
            .graph
            .input(n, 0)
            .filter(|&b| self.graph.ty(b).is_ptr())
            .and_then(|b| self.value_pt(b));
        match base {
            Some(base) => {
                self.cg.add_base(pt, base);
            }
            None => {
                let phantom = self.cg.phantom();
                self.cg.add_base(pt, phantom);
                self.cg.set_escape_state(pt, EscapeState::GlobalEscape);
            }
        }
    }

    /// Edge from the address field to the stored reference. Stores
    /// through raw or unknown addresses publish the value.
    fn add_stored_value(&mut self, n: NodeId, value_index: usize) {
        let graph = self.graph;
        let Some(value) = graph.input(n, value_index).and_then(|v| self.value_pt(v)) else {
            return;
        };
        let field = graph
            .input(n, ADDRESS_INPUT)
            .and_then(|adr| self.cg.ptnode(adr))
            .filter(|&f| self.cg.node(f).is_oop_field());
        match field {
            Some(field) => {
                self.cg.add_edge(field, value);
            }
            None => {
                log::trace!("escape: {:?} stores through an unknown address", n);
                self.cg.set_escape_state(value, EscapeState::GlobalEscape);
            }
        }
    }

    fn add_copy(&mut self, n: NodeId, validated: bool) {
        let graph = self.graph;
        let src = graph.input(n, COPY_SRC).and_then(|v| self.cg.ptnode(v));
        let dst = graph.input(n, COPY_DST).and_then(|v| self.cg.ptnode(v));
        let null = self.cg.null();
        let (Some(src), Some(dst)) = (src, dst) else {
            return;
        };
        if src == null || dst == null {
            return;
        }
        let es = if validated {
            EscapeState::NoEscape
        } else {
            EscapeState::ArgEscape
        };
        let copy = self.cg.add_arraycopy(n, es);
        self.cg.add_edge(copy, src);
        self.cg.set_flag(src, PointsToFlags::ARRAYCOPY_SRC);
        self.cg.add_edge(dst, copy);
        self.cg.set_flag(dst, PointsToFlags::ARRAYCOPY_DST);
        if !validated {
            self.cg.set_escape_state(dst, EscapeState::ArgEscape);
        }
    }

    fn add_call_arguments(&mut self, n: NodeId, kind: CallKind) {
        let graph = self.graph;
        let summary = match kind {
            CallKind::Static(m) => graph.methods().summary(m),
            _ => None,
        };
        let result = self.cg.ptnode(n);

        for (i, &arg) in graph.node(n).inputs.iter().enumerate().skip(CALL_ARGS) {
            let Some(arg_pt) = self.value_pt(arg) else {
                continue;
            };
            let index = i - CALL_ARGS;
            match (kind, summary) {
                (CallKind::Leaf, _) => {
                    self.cg.set_escape_state(arg_pt, EscapeState::ArgEscape);
                    self.cg
                        .set_fields_escape_state(arg_pt, EscapeState::GlobalEscape);
                }
                (CallKind::Static(_), Some(summary)) => {
                    match summary.arg(index) {
                        ArgBehavior::NotRetained => self.cg.materialized.push(arg_pt),
                        ArgBehavior::StackOnly => {
                            self.cg.set_escape_state(arg_pt, EscapeState::ArgEscape);
                        }
                        ArgBehavior::Escapes => {
                            self.cg.set_escape_state(arg_pt, EscapeState::GlobalEscape);
                        }
                    }
                    match result {
                        Some(result) if summary.returns_args.contains(&index) => {
                            self.cg.add_edge(result, arg_pt);
                        }
                        _ => {}
                    }
                }
                // Boxing calls take primitives; a reference argument is
                // passed to runtime code like any unknown callee.
                _ => {
                    self.cg.set_escape_state(arg_pt, EscapeState::GlobalEscape);
                }
            }
        }

        // A callee returning an argument or a fresh object it built.
        if let (Some(result), Some(summary)) = (result, summary) {
            if !summary.returns_args.is_empty() && summary.returns_fresh {
                let phantom = self.cg.phantom();
                self.cg.add_edge(result, phantom);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
