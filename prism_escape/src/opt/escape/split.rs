//! Unique-instance memory splitting.
//!
//! Every non-escaping, scalar-replaceable allocation gets its own alias
//! identity. Pointer and address types are narrowed to the instance, and
//! loads and stores through those addresses are rewired onto a memory
//! chain that only carries the instance's slice.
//!
//! The rewrite runs in four steps:
//!
//! 1. **Plan**: walk the users of each instance pointer and reject any use
//!    the rewrite cannot express. Nothing is mutated before this succeeds.
//! 2. **Retype**: narrow the planned types and register alias classes.
//! 3. **Memory plan**: find the instance memory state for each access,
//!    cloning memory phis per slice. Rewires are only recorded.
//! 4. **Apply**: install the recorded inputs and merge-memory slots.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::alias::{ALIAS_BOT, ALIAS_RAW, AliasIdx, AliasTable};
use crate::ir::graph::Graph;
use crate::ir::meta::KlassId;
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::operators::{
    ADDRESS_INPUT, CALL_ARGS, ControlOp, MEMORY_INPUT, MemoryOp, Operator, ProjKind,
    VALUE_INPUT,
};
use crate::ir::types::{OopType, Type};

use super::build::COPY_DST;
use super::points_to::{ConnectionGraph, EscapeState, PtId};
use super::{EscapeError, EscapeResult};

/// One allocation being split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Instance {
    alloc: NodeId,
    klass: KlassId,
    obj: PtId,
}

/// Narrow pointer types to unique instances and split memory per instance
/// alias class.
///
/// Returns the alias indices created by this call. On
/// [`EscapeError::SplitInvalidated`] the graph is untouched and the caller
/// should recompile without escape analysis.
pub fn split_unique_types(cg: &ConnectionGraph, graph: &mut Graph) -> EscapeResult<Vec<AliasIdx>> {
    let plan = Planner::new(cg, graph).run()?;
    if plan.pointers.is_empty() {
        return Ok(Vec::new());
    }

    let new_aliases = retype(graph, &plan);

    let mut splitter = MemorySplitter::new(cg, graph, &plan);
    splitter.plan_instance_memory(&plan);
    splitter.plan_general_memory();
    let (rewires, slots) = splitter.finish();

    for &(node, index, mem) in &rewires {
        graph.replace_input(node, index, mem);
    }
    for &(mm, alias, mem) in &slots {
        graph.set_memory_at(mm, alias, mem);
    }

    log::debug!(
        "escape: split {} pointers, {} accesses, {} new alias classes, {} rewires",
        plan.pointers.len(),
        plan.accesses.len(),
        new_aliases.len(),
        rewires.len() + slots.len()
    );
    Ok(new_aliases)
}

// =============================================================================
// Plan
// =============================================================================

/// Validated rewrite, computed without touching the graph.
#[derive(Debug, Default)]
struct SplitPlan {
    /// Pointer and address nodes to narrow, in discovery order.
    pointers: Vec<(NodeId, Instance)>,
    /// Loads and stores through instance addresses.
    accesses: Vec<(NodeId, Instance)>,
}

struct Planner<'a> {
    cg: &'a ConnectionGraph,
    graph: &'a Graph,
    worklist: VecDeque<(NodeId, Instance)>,
    /// Planned node to its allocation.
    planned: FxHashMap<NodeId, NodeId>,
    accessed: FxHashSet<NodeId>,
    plan: SplitPlan,
}

fn invalid(node: NodeId, reason: &'static str) -> EscapeError {
    EscapeError::SplitInvalidated { node, reason }
}

impl<'a> Planner<'a> {
    fn new(cg: &'a ConnectionGraph, graph: &'a Graph) -> Self {
        Planner {
            cg,
            graph,
            worklist: VecDeque::new(),
            planned: FxHashMap::default(),
            accessed: FxHashSet::default(),
            plan: SplitPlan::default(),
        }
    }

    fn run(mut self) -> EscapeResult<SplitPlan> {
        let cg = self.cg;
        let mut instances: FxHashMap<PtId, Instance> = FxHashMap::default();
        for &obj in cg.allocations() {
            let node = cg.node(obj);
            if node.escape_state() != EscapeState::NoEscape || !node.is_scalar_replaceable() {
                continue;
            }
            let alloc = node.ideal();
            let klass = match self.graph.op(alloc) {
                Operator::Memory(MemoryOp::Allocate(k) | MemoryOp::AllocateArray(k)) => k,
                _ => continue,
            };
            let inst = Instance { alloc, klass, obj };
            instances.insert(obj, inst);
            if let Some(cast) = checked_cast_of(self.graph, alloc) {
                self.enqueue(cast, inst)?;
            }
        }
        if instances.is_empty() {
            return Ok(self.plan);
        }

        // References read back out of fields reach the object without
        // passing through its own cast.
        for (_, node) in cg.iter() {
            if !node.is_local_var() {
                continue;
            }
            let load = node.ideal();
            if !matches!(self.graph.op(load), Operator::Memory(MemoryOp::Load { .. })) {
                continue;
            }
            let targets: SmallVec<[PtId; 4]> = node
                .edges()
                .iter()
                .copied()
                .filter(|&t| cg.node(t).is_java_object())
                .collect();
            match targets.as_slice() {
                [only] => {
                    if let Some(&inst) = instances.get(only) {
                        self.enqueue(load, inst)?;
                    }
                }
                many => {
                    if many.iter().any(|t| instances.contains_key(t)) {
                        return Err(invalid(load, "loaded value merges several objects"));
                    }
                }
            }
        }

        while let Some((n, inst)) = self.worklist.pop_front() {
            if self.graph.op(n) == Operator::AddP {
                self.visit_address(n, inst)?;
            } else {
                self.visit_pointer(n, inst)?;
            }
        }
        Ok(self.plan)
    }

    fn enqueue(&mut self, n: NodeId, inst: Instance) -> EscapeResult<()> {
        match self.planned.get(&n) {
            Some(&alloc) if alloc == inst.alloc => Ok(()),
            Some(_) => Err(invalid(n, "refers to two split objects")),
            None => {
                self.planned.insert(n, inst.alloc);
                if self.graph.ty(n).oop().is_some() {
                    self.plan.pointers.push((n, inst));
                }
                self.worklist.push_back((n, inst));
                Ok(())
            }
        }
    }

    fn visit_pointer(&mut self, n: NodeId, inst: Instance) -> EscapeResult<()> {
        let (cg, graph) = (self.cg, self.graph);
        for &u in graph.uses(n) {
            match graph.op(u) {
                Operator::AddP => {
                    if graph.input(u, 0) != Some(n) {
                        return Err(invalid(u, "object used as an offset"));
                    }
                    self.enqueue(u, inst)?;
                }
                Operator::Phi | Operator::CheckCastPP | Operator::CastPP | Operator::EncodeP
                | Operator::DecodeN => {
                    // Unreachable users were never mapped.
                    let Some(pt) = cg.ptnode(u) else {
                        continue;
                    };
                    let mut targets = cg.pointees(pt);
                    if targets.next() != Some(inst.obj) || targets.next().is_some() {
                        return Err(invalid(u, "merged with another object"));
                    }
                    self.enqueue(u, inst)?;
                }
                Operator::Memory(
                    MemoryOp::Load { .. } | MemoryOp::Store { .. } | MemoryOp::CompareAndSwap { .. },
                ) => {
                    if graph.input(u, ADDRESS_INPUT) == Some(n) {
                        return Err(invalid(u, "accessed without an address"));
                    }
                }
                Operator::Control(ControlOp::SafePoint)
                | Operator::Memory(MemoryOp::Lock | MemoryOp::Unlock | MemoryOp::Initialize)
                | Operator::CmpP
                | Operator::LoadKlass => {}
                _ => return Err(invalid(u, "unsupported use of a split object")),
            }
        }
        Ok(())
    }

    fn visit_address(&mut self, adr: NodeId, inst: Instance) -> EscapeResult<()> {
        if let Some(pt) = self.cg.ptnode(adr) {
            let shared = self
                .cg
                .node(pt)
                .bases()
                .iter()
                .any(|&b| b != inst.obj && self.cg.node(b).is_java_object());
            if shared {
                return Err(invalid(adr, "address shared with another object"));
            }
        }

        let graph = self.graph;
        for &u in graph.uses(adr) {
            let op = graph.op(u);
            let is_address = graph.input(u, ADDRESS_INPUT) == Some(adr);
            match op {
                Operator::Memory(MemoryOp::Load { .. }) if is_address => {}
                Operator::Memory(MemoryOp::Store { .. })
                    if is_address && graph.input(u, VALUE_INPUT) != Some(adr) => {}
                Operator::Memory(MemoryOp::CompareAndSwap { .. }) => {
                    return Err(invalid(u, "atomic access to a split object"));
                }
                _ => return Err(invalid(u, "unsupported address use")),
            }
            if self.accessed.insert(u) {
                self.plan.accesses.push((u, inst));
            }
        }
        Ok(())
    }
}

/// The exact-typed pointer an allocation hands out, if it is used.
fn checked_cast_of(graph: &Graph, alloc: NodeId) -> Option<NodeId> {
    let raw = graph
        .uses(alloc)
        .iter()
        .copied()
        .find(|&u| graph.op(u) == Operator::Proj(ProjKind::Result))?;
    graph
        .uses(raw)
        .iter()
        .copied()
        .find(|&u| graph.op(u) == Operator::CheckCastPP)
}

// =============================================================================
// Retype
// =============================================================================

fn retype(graph: &mut Graph, plan: &SplitPlan) -> Vec<AliasIdx> {
    let known = graph.aliases().len();
    let mut seen = FxHashSet::default();
    let mut new_aliases = Vec::new();

    for &(n, inst) in &plan.pointers {
        let ty = graph.ty(n);
        let Some(oop) = ty.oop() else {
            continue;
        };
        let narrowed = ty.with_oop(
            OopType::exact(inst.klass)
                .with_offset(oop.offset)
                .with_instance(inst.alloc),
        );
        log::trace!("escape: retype {:?} to {:?}", n, narrowed);
        graph.set_type(n, narrowed);

        if graph.op(n) == Operator::AddP {
            let idx = graph.alias_index_of(&narrowed);
            if idx as usize >= known && seen.insert(idx) {
                new_aliases.push(idx);
            }
        }
    }
    new_aliases
}

/// Alias class of an address type, without registering new classes.
fn alias_of_type(graph: &Graph, ty: Type) -> AliasIdx {
    match ty {
        Type::RawPtr => ALIAS_RAW,
        Type::Oop(oop) | Type::NarrowOop(oop) => AliasTable::key_for(graph.klasses(), &oop)
            .and_then(|key| graph.aliases().find(&key))
            .unwrap_or(ALIAS_BOT),
        _ => ALIAS_BOT,
    }
}

fn alias_of_access(graph: &Graph, access: NodeId) -> AliasIdx {
    graph
        .input(access, ADDRESS_INPUT)
        .map_or(ALIAS_BOT, |adr| alias_of_type(graph, graph.ty(adr)))
}

// =============================================================================
// Memory Plan
// =============================================================================

struct MemorySplitter<'a> {
    cg: &'a ConnectionGraph,
    graph: &'a mut Graph,
    /// Nodes that existed before any clone was added.
    original: Vec<NodeId>,
    instance_accesses: FxHashSet<NodeId>,
    instance_stores: FxHashSet<NodeId>,
    /// Slice clones of memory phis, by (phi, alias).
    clones: FxHashMap<(NodeId, AliasIdx), NodeId>,
    pending: VecDeque<(NodeId, NodeId, AliasIdx, Instance)>,
    rewires: Vec<(NodeId, usize, NodeId)>,
    slots: Vec<(NodeId, AliasIdx, NodeId)>,
    slotted: FxHashSet<(NodeId, AliasIdx)>,
}

impl<'a> MemorySplitter<'a> {
    fn new(cg: &'a ConnectionGraph, graph: &'a mut Graph, plan: &SplitPlan) -> Self {
        let original = graph.ids().collect();
        let instance_accesses = plan.accesses.iter().map(|&(n, _)| n).collect();
        let instance_stores = plan
            .accesses
            .iter()
            .map(|&(n, _)| n)
            .filter(|&n| matches!(graph.op(n), Operator::Memory(MemoryOp::Store { .. })))
            .collect();
        MemorySplitter {
            cg,
            graph,
            original,
            instance_accesses,
            instance_stores,
            clones: FxHashMap::default(),
            pending: VecDeque::new(),
            rewires: Vec::new(),
            slots: Vec::new(),
            slotted: FxHashSet::default(),
        }
    }

    fn finish(self) -> (Vec<(NodeId, usize, NodeId)>, Vec<(NodeId, AliasIdx, NodeId)>) {
        (self.rewires, self.slots)
    }

    fn plan_instance_memory(&mut self, plan: &SplitPlan) {
        for &(access, inst) in &plan.accesses {
            let alias = alias_of_access(self.graph, access);
            let Some(mem) = self.graph.input(access, MEMORY_INPUT) else {
                continue;
            };
            let found = self.find_inst_mem(mem, alias, inst);
            if found != mem {
                self.rewires.push((access, MEMORY_INPUT, found));
            }
        }

        while let Some((clone, phi, alias, inst)) = self.pending.pop_front() {
            let inputs: SmallVec<[NodeId; 4]> =
                self.graph.node(phi).inputs.iter().skip(1).copied().collect();
            for mem in inputs {
                let found = self.find_inst_mem(mem, alias, inst);
                self.graph.add_input(clone, found);
            }
        }
    }

    /// Route general memory consumers around instance stores.
    fn plan_general_memory(&mut self) {
        let top = self.graph.top;
        for i in 0..self.original.len() {
            let n = self.original[i];
            if self.instance_accesses.contains(&n) {
                continue;
            }
            let op = self.graph.op(n);
            match op {
                Operator::Memory(MemoryOp::MemPhi(alias)) => {
                    if self.graph.aliases().is_instance(alias) {
                        continue;
                    }
                    for index in 1..self.graph.node(n).inputs.len() {
                        self.rewire_general(n, index);
                    }
                }
                Operator::Memory(MemoryOp::MergeMem) => {
                    for index in 0..self.graph.node(n).inputs.len() {
                        let slot = self.graph.node(n).inputs[index];
                        let instance = self.graph.aliases().is_instance(index as AliasIdx);
                        if index != 0 && (slot == top || instance) {
                            continue;
                        }
                        self.rewire_general(n, index);
                    }
                }
                _ => {
                    if let Some(index) = op.memory_input() {
                        self.rewire_general(n, index);
                    }
                }
            }
        }
    }

    fn rewire_general(&mut self, n: NodeId, index: usize) {
        let Some(mem) = self.graph.input(n, index) else {
            return;
        };
        let found = self.find_general_mem(mem);
        if found != mem {
            self.rewires.push((n, index, found));
        }
    }

    fn find_general_mem(&self, mut mem: NodeId) -> NodeId {
        while self.instance_stores.contains(&mem) {
            match self.graph.input(mem, MEMORY_INPUT) {
                Some(next) => mem = next,
                None => break,
            }
        }
        mem
    }

    /// Nearest memory state that defines the `alias` slice of `inst`.
    fn find_inst_mem(&mut self, start: NodeId, alias: AliasIdx, inst: Instance) -> NodeId {
        let mut mem = start;
        let mut crossed: SmallVec<[NodeId; 2]> = SmallVec::new();
        let found = loop {
            let next = match self.graph.op(mem) {
                Operator::Proj(ProjKind::Memory) => self.through_projection(mem, alias, inst),
                Operator::Memory(MemoryOp::Initialize) => {
                    let raw = self.graph.input(mem, 2);
                    if raw.and_then(|r| self.graph.input(r, 0)) == Some(inst.alloc) {
                        None
                    } else {
                        self.graph.input(mem, MEMORY_INPUT)
                    }
                }
                Operator::Memory(MemoryOp::Store { .. }) => {
                    if alias_of_access(self.graph, mem) == alias {
                        None
                    } else {
                        self.graph.input(mem, MEMORY_INPUT)
                    }
                }
                Operator::Memory(MemoryOp::ArrayCopy { .. }) => {
                    if self.may_reference(self.graph.input(mem, COPY_DST), inst) {
                        None
                    } else {
                        self.graph.input(mem, MEMORY_INPUT)
                    }
                }
                Operator::Memory(MemoryOp::Lock | MemoryOp::Unlock) => {
                    self.graph.input(mem, MEMORY_INPUT)
                }
                Operator::Memory(MemoryOp::MergeMem) => {
                    crossed.push(mem);
                    Some(self.merge_slot(mem, alias))
                }
                Operator::Memory(MemoryOp::MemPhi(phi_alias)) => {
                    if phi_alias == alias {
                        None
                    } else {
                        break self.split_phi(mem, alias, inst);
                    }
                }
                _ => None,
            };
            match next {
                Some(n) => mem = n,
                None => break mem,
            }
        };

        for mm in crossed {
            if !self.graph.has_memory_slot(mm, alias) && self.slotted.insert((mm, alias)) {
                self.slots.push((mm, alias, found));
            }
        }
        found
    }

    fn through_projection(&self, proj: NodeId, alias: AliasIdx, inst: Instance) -> Option<NodeId> {
        let src = self.graph.input(proj, 0)?;
        match self.graph.op(src) {
            Operator::Memory(MemoryOp::Allocate(_) | MemoryOp::AllocateArray(_)) => {
                if src == inst.alloc {
                    None
                } else {
                    self.graph.input(src, MEMORY_INPUT)
                }
            }
            Operator::Call(_) => {
                let args = self.graph.node(src).inputs.len();
                let touches =
                    (CALL_ARGS..args).any(|i| self.may_reference(self.graph.input(src, i), inst));
                if touches {
                    None
                } else {
                    self.graph.input(src, MEMORY_INPUT)
                }
            }
            Operator::Memory(MemoryOp::CompareAndSwap { .. }) => {
                if alias_of_access(self.graph, src) == alias {
                    None
                } else {
                    self.graph.input(src, MEMORY_INPUT)
                }
            }
            _ => None,
        }
    }

    /// Slice `alias` of a merge, falling back to its general class and then
    /// to the base memory.
    fn merge_slot(&self, mm: NodeId, alias: AliasIdx) -> NodeId {
        if self.graph.has_memory_slot(mm, alias) {
            return self.graph.memory_at(mm, alias);
        }
        let general = self.graph.aliases().general_index(alias);
        if self.graph.has_memory_slot(mm, general) {
            return self.graph.memory_at(mm, general);
        }
        self.graph.memory_at(mm, ALIAS_BOT)
    }

    fn split_phi(&mut self, phi: NodeId, alias: AliasIdx, inst: Instance) -> NodeId {
        if let Some(&clone) = self.clones.get(&(phi, alias)) {
            return clone;
        }
        let region = self.graph.input(phi, 0).unwrap_or(self.graph.top);
        let clone = self
            .graph
            .add_node(Operator::Memory(MemoryOp::MemPhi(alias)), &[region]);
        self.graph.mark(clone, NodeFlags::SPLIT_PHI);
        self.clones.insert((phi, alias), clone);
        self.pending.push_back((clone, phi, alias, inst));
        clone
    }

    fn may_reference(&self, value: Option<NodeId>, inst: Instance) -> bool {
        value
            .and_then(|v| self.cg.ptnode(v))
            .is_some_and(|pt| self.cg.pointees(pt).any(|o| o == inst.obj))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ControlBuilder, GraphBuilder, MemoryBuilder, ValueBuilder};
    use crate::ir::meta::{FieldInfo, Klass};
    use crate::ir::operators::CallKind;
    use crate::ir::types::BasicType;
    use crate::opt::escape::EscapeConfig;
    use crate::opt::escape::observer::NoopObserver;

    fn point(b: &mut GraphBuilder) -> KlassId {
        b.define_class(Klass::instance(
            "Point",
            vec![
                FieldInfo {
                    name: "x".into(),
                    offset: 12,
                    ty: BasicType::Int,
                },
                FieldInfo {
                    name: "next".into(),
                    offset: 16,
                    ty: BasicType::Object,
                },
            ],
        ))
    }

    fn analyze(graph: &Graph) -> ConnectionGraph {
        ConnectionGraph::compute(graph, &EscapeConfig::default(), &mut NoopObserver)
            .expect("analysis should complete")
    }

    fn instance_of(graph: &Graph, n: NodeId) -> Option<NodeId> {
        graph.ty(n).oop().and_then(|o| o.instance)
    }

    #[test]
    fn test_split_retypes_pointer_and_addresses() {
        let mut b = GraphBuilder::new();
        let k = point(&mut b);
        let p = b.new_instance(k);
        let one = b.const_int(1);
        let store = b.store_field(p.obj, 12, one);
        let x = b.load_field(p.obj, 12);
        b.return_value(Some(x));
        let mut g = b.finish();

        let cg = analyze(&g);
        let aliases = split_unique_types(&cg, &mut g).unwrap();

        assert_eq!(aliases.len(), 1);
        assert_eq!(instance_of(&g, p.obj), Some(p.alloc));
        let adr = g.input(x, ADDRESS_INPUT).unwrap();
        assert_eq!(instance_of(&g, adr), Some(p.alloc));
        assert!(g.aliases().is_instance(aliases[0]));
        assert_eq!(g.aliases().instance_of(aliases[0]), Some(p.alloc));
        assert_eq!(g.input(x, MEMORY_INPUT), Some(store));
        assert!(g.node(p.obj).flags.contains(NodeFlags::RETYPED));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_instance_load_skips_unrelated_stores() {
        let mut b = GraphBuilder::new();
        let k = point(&mut b);
        let other = b.parameter(Type::Oop(OopType::of(k)));
        let p = b.new_instance(k);
        let one = b.const_int(1);
        let two = b.const_int(2);
        let own = b.store_field(p.obj, 12, one);
        let foreign = b.store_field(other, 12, two);
        let x = b.load_field(p.obj, 12);
        b.return_value(Some(x));
        let mut g = b.finish();

        let cg = analyze(&g);
        split_unique_types(&cg, &mut g).unwrap();

        assert_eq!(g.input(x, MEMORY_INPUT), Some(own));
        // The general chain no longer passes through the instance store.
        assert_eq!(g.input(foreign, MEMORY_INPUT), Some(p.init));
        assert_ne!(
            alias_of_access(&g, foreign),
            alias_of_access(&g, own),
            "instance and general slices must differ"
        );
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_memory_phi_is_cloned_per_slice() {
        let mut b = GraphBuilder::new();
        let k = point(&mut b);
        let other = b.parameter(Type::Oop(OopType::of(k)));
        let cond = b.parameter(Type::Int);
        let p = b.new_instance(k);
        let one = b.const_int(1);
        let own = b.store_field(p.obj, 12, one);

        let entry = b.state();
        let (if_true, if_false) = b.branch(cond);
        b.set_control(if_true);
        let seven = b.const_int(7);
        b.store_field(other, 12, seven);
        let left = b.state();
        b.restore(entry);
        b.set_control(if_false);
        let right = b.state();
        b.merge(&[left, right]);
        let phi = b.memory();

        let x = b.load_field(p.obj, 12);
        b.return_value(Some(x));
        let mut g = b.finish();

        let cg = analyze(&g);
        let aliases = split_unique_types(&cg, &mut g).unwrap();

        let mem = g.input(x, MEMORY_INPUT).unwrap();
        assert_ne!(mem, phi);
        assert_eq!(g.op(mem), Operator::Memory(MemoryOp::MemPhi(aliases[0])));
        assert!(g.node(mem).flags.contains(NodeFlags::SPLIT_PHI));
        assert_eq!(g.input(mem, 0), g.input(phi, 0));
        assert_eq!(&g.node(mem).inputs[1..], &[own, own]);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_unsupported_use_aborts_without_mutation() {
        let mut b = GraphBuilder::new();
        let k = point(&mut b);
        let p = b.new_instance(k);
        let x = b.load_field(p.obj, 12);
        b.return_value(Some(x));
        let mut g = b.finish();

        let cg = analyze(&g);
        // A later rewrite hands the object to a call the analysis never saw.
        let (start, init) = (g.start, p.init);
        let call = g.add_node(Operator::Call(CallKind::Dynamic), &[start, init, p.obj]);
        let before = g.ty(p.obj);

        let err = split_unique_types(&cg, &mut g).unwrap_err();
        assert_eq!(
            err,
            EscapeError::SplitInvalidated {
                node: call,
                reason: "unsupported use of a split object",
            }
        );
        assert!(err.requires_retry());
        assert_eq!(g.ty(p.obj), before);
        assert!(!g.node(p.obj).flags.contains(NodeFlags::RETYPED));
    }

    #[test]
    fn test_escaping_objects_keep_general_types() {
        let mut b = GraphBuilder::new();
        let k = point(&mut b);
        let p = b.new_instance(k);
        b.return_value(Some(p.obj));
        let mut g = b.finish();

        let cg = analyze(&g);
        let aliases = split_unique_types(&cg, &mut g).unwrap();
        assert!(aliases.is_empty());
        assert_eq!(instance_of(&g, p.obj), None);
    }
}
