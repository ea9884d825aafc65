//! Points-to nodes and the connection graph that owns them.
//!
//! The connection graph is an annotation layer over the IR. Each IR node
//! that can hold or produce a reference is modelled by one
//! [`PointsToNode`] of one of four kinds:
//!
//! - **JavaObject**: an allocation site, incoming argument, call result
//!   or other opaque object
//! - **LocalVar**: an SSA value (cast, phi, load, call result) that may
//!   refer to several objects
//! - **Field**: an address computation `base + offset`
//! - **Arraycopy**: a bulk copy between two objects
//!
//! # Edges
//!
//! | Source | `edges` hold |
//! |--------|--------------|
//! | JavaObject | its Field nodes and the Arraycopy nodes copying into it |
//! | LocalVar, Field | the nodes it may point to |
//! | Arraycopy | the copy's source objects |
//!
//! Every edge `A -> B` added through [`ConnectionGraph::add_edge`] is
//! mirrored in `B.uses`. A Field's containers are kept in its own base
//! list, mirrored by `base_uses` on LocalVar bases and by an edge on
//! JavaObject bases.
//!
//! # Singletons
//!
//! The null object (NoEscape) and the phantom object (GlobalEscape, the
//! stand-in for any unknown reference) are created with the graph and
//! their escape states never change.

use smallvec::SmallVec;

use crate::ir::arena::{Arena, BitSet, Id, SecondaryMap};
use crate::ir::node::{Node, NodeId};
use crate::ir::types::Offset;

use super::observer::EscapeObserver;

/// Id of a node in the connection graph.
pub type PtId = Id<PointsToNode>;

/// Adjacency list with set semantics.
pub type EdgeList = SmallVec<[PtId; 4]>;

// =============================================================================
// Escape State
// =============================================================================

/// How far a reference can be observed to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EscapeState {
    /// Not yet classified; never a final answer.
    #[default]
    UnknownEscape,
    /// Confined to the compiled method and thread.
    NoEscape,
    /// Passed to callees but not stored anywhere they outlive.
    ArgEscape,
    /// Reachable from global state or other threads.
    GlobalEscape,
}

impl EscapeState {
    /// Merge two escape states (takes the more conservative one).
    #[inline]
    pub fn merge(self, other: EscapeState) -> EscapeState {
        std::cmp::max(self, other)
    }

    /// The object may be seen outside the compiled method.
    #[inline]
    pub fn escapes(self) -> bool {
        self > EscapeState::NoEscape
    }
}

impl std::fmt::Display for EscapeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscapeState::UnknownEscape => write!(f, "UnknownEscape"),
            EscapeState::NoEscape => write!(f, "NoEscape"),
            EscapeState::ArgEscape => write!(f, "ArgEscape"),
            EscapeState::GlobalEscape => write!(f, "GlobalEscape"),
        }
    }
}

// =============================================================================
// Node Kinds
// =============================================================================

/// Data carried only by Field nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldData {
    /// Byte offset within the base; `Bot` for unknown array elements.
    pub offset: Offset,
    /// Only reference-typed fields take part in points-to propagation.
    pub is_oop: bool,
    bases: SmallVec<[PtId; 2]>,
}

impl FieldData {
    #[inline]
    pub fn bases(&self) -> &[PtId] {
        &self.bases
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointsToKind {
    JavaObject,
    LocalVar,
    Field(FieldData),
    Arraycopy,
}

bitflags::bitflags! {
    /// Per-node analysis bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PointsToFlags: u8 {
        /// Fields may be split into scalars; only ever cleared.
        const SCALAR_REPLACEABLE = 0b0000_0001;
        /// Has an edge to the phantom object.
        const POINTS_TO_UNKNOWN = 0b0000_0010;
        /// Source of an arraycopy.
        const ARRAYCOPY_SRC = 0b0000_0100;
        /// Destination of an arraycopy.
        const ARRAYCOPY_DST = 0b0000_1000;
        /// Field with the phantom object among its bases.
        const HAS_UNKNOWN_BASE = 0b0001_0000;
    }
}

// =============================================================================
// Points-To Node
// =============================================================================

#[derive(Debug, Clone)]
pub struct PointsToNode {
    kind: PointsToKind,
    ideal: NodeId,
    escape: EscapeState,
    fields_escape: EscapeState,
    flags: PointsToFlags,
    edges: EdgeList,
    uses: EdgeList,
    base_uses: EdgeList,
}

impl PointsToNode {
    fn new(kind: PointsToKind, ideal: NodeId, es: EscapeState, fields_es: EscapeState) -> Self {
        let mut flags = PointsToFlags::empty();
        if matches!(kind, PointsToKind::JavaObject) && es <= EscapeState::NoEscape {
            flags.insert(PointsToFlags::SCALAR_REPLACEABLE);
        }
        PointsToNode {
            kind,
            ideal,
            escape: es,
            fields_escape: fields_es.merge(es),
            flags,
            edges: EdgeList::new(),
            uses: EdgeList::new(),
            base_uses: EdgeList::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> &PointsToKind {
        &self.kind
    }

    /// The IR node this models; `INVALID` for the singletons.
    #[inline]
    pub fn ideal(&self) -> NodeId {
        self.ideal
    }

    #[inline]
    pub fn escape_state(&self) -> EscapeState {
        self.escape
    }

    #[inline]
    pub fn fields_escape_state(&self) -> EscapeState {
        self.fields_escape
    }

    #[inline]
    pub fn flags(&self) -> PointsToFlags {
        self.flags
    }

    #[inline]
    pub fn has_flag(&self, flag: PointsToFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    pub fn is_scalar_replaceable(&self) -> bool {
        self.flags.contains(PointsToFlags::SCALAR_REPLACEABLE)
    }

    #[inline]
    pub fn edges(&self) -> &[PtId] {
        &self.edges
    }

    #[inline]
    pub fn uses(&self) -> &[PtId] {
        &self.uses
    }

    /// Fields that have this LocalVar as a base.
    #[inline]
    pub fn base_uses(&self) -> &[PtId] {
        &self.base_uses
    }

    #[inline]
    pub fn is_java_object(&self) -> bool {
        matches!(self.kind, PointsToKind::JavaObject)
    }

    #[inline]
    pub fn is_local_var(&self) -> bool {
        matches!(self.kind, PointsToKind::LocalVar)
    }

    #[inline]
    pub fn is_field(&self) -> bool {
        matches!(self.kind, PointsToKind::Field(_))
    }

    #[inline]
    pub fn is_arraycopy(&self) -> bool {
        matches!(self.kind, PointsToKind::Arraycopy)
    }

    #[inline]
    pub fn field(&self) -> Option<&FieldData> {
        match &self.kind {
            PointsToKind::Field(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub fn is_oop_field(&self) -> bool {
        self.field().is_some_and(|f| f.is_oop)
    }

    /// Field offset; `Bot` for non-fields.
    #[inline]
    pub fn offset(&self) -> Offset {
        self.field().map_or(Offset::Bot, |f| f.offset)
    }

    /// Field bases; empty for non-fields.
    #[inline]
    pub fn bases(&self) -> &[PtId] {
        self.field().map_or(&[], |f| f.bases())
    }
}

fn push_unique(list: &mut EdgeList, id: PtId) -> bool {
    if list.contains(&id) {
        false
    } else {
        list.push(id);
        true
    }
}

// =============================================================================
// Connection Graph
// =============================================================================

/// Points-to graph for one compilation unit.
///
/// Construction lives in `build.rs`, propagation in `complete.rs` and
/// scalar-replaceability in `classify.rs`.
pub struct ConnectionGraph {
    pub(super) nodes: Arena<PointsToNode>,
    map: SecondaryMap<Node, PtId>,
    /// IR nodes at or past this index were created after construction.
    node_limit: usize,
    collecting: bool,
    phantom: PtId,
    null: PtId,

    /// Every JavaObject except the phantom, null first.
    pub(super) java_objects: Vec<PtId>,
    /// Reference-typed Field nodes.
    pub(super) oop_fields: Vec<PtId>,
    /// Allocations and call results that did not start out escaping.
    pub(super) candidates: Vec<PtId>,
    /// JavaObjects of `Allocate` and `AllocateArray` nodes.
    allocations: Vec<PtId>,
    allocation_set: BitSet,
    /// SafePoint and Call nodes, for deoptimization metadata.
    pub(super) safepoints: Vec<NodeId>,
    /// Lock and Unlock nodes.
    pub(super) locks: Vec<NodeId>,
    /// Values passed to callees that need the object in memory.
    pub(super) materialized: Vec<PtId>,
    /// Completion reached its fixed point (not cut short for lack of
    /// candidates).
    pub(super) completed: bool,
}

impl ConnectionGraph {
    /// Empty graph for an IR of `node_limit` nodes, holding the null and
    /// phantom objects.
    pub fn new(node_limit: usize) -> Self {
        let mut nodes = Arena::with_capacity(node_limit / 2 + 2);
        let phantom = nodes.alloc(PointsToNode::new(
            PointsToKind::JavaObject,
            NodeId::INVALID,
            EscapeState::GlobalEscape,
            EscapeState::GlobalEscape,
        ));
        let mut null_node = PointsToNode::new(
            PointsToKind::JavaObject,
            NodeId::INVALID,
            EscapeState::NoEscape,
            EscapeState::NoEscape,
        );
        null_node.flags.remove(PointsToFlags::SCALAR_REPLACEABLE);
        let null = nodes.alloc(null_node);

        ConnectionGraph {
            nodes,
            map: SecondaryMap::with_capacity(node_limit),
            node_limit,
            collecting: true,
            phantom,
            null,
            java_objects: vec![null],
            oop_fields: Vec::new(),
            candidates: Vec::new(),
            allocations: Vec::new(),
            allocation_set: BitSet::new(),
            safepoints: Vec::new(),
            locks: Vec::new(),
            materialized: Vec::new(),
            completed: false,
        }
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn phantom(&self) -> PtId {
        self.phantom
    }

    #[inline]
    pub fn null(&self) -> PtId {
        self.null
    }

    #[inline]
    pub fn node(&self, id: PtId) -> &PointsToNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the two singletons exist.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 2
    }

    pub fn iter(&self) -> impl Iterator<Item = (PtId, &PointsToNode)> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = PtId> + use<> {
        self.nodes.ids()
    }

    /// Node modelling IR node `n`, if any.
    ///
    /// IR nodes created after construction are never in the graph.
    pub fn ptnode(&self, n: NodeId) -> Option<PtId> {
        if n.as_usize() >= self.node_limit {
            return None;
        }
        self.map.get(n).copied().filter(|id| id.is_valid())
    }

    /// Whether construction is still adding nodes.
    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    pub(super) fn finish_collecting(&mut self) {
        self.collecting = false;
    }

    /// Whether completion ran to its fixed point, so that points-to sets
    /// are final for every node.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// JavaObjects `pt` refers to: itself for objects, its direct
    /// JavaObject edges otherwise.
    pub fn pointees(&self, pt: PtId) -> impl Iterator<Item = PtId> + '_ {
        let node = &self.nodes[pt];
        let own = node.is_java_object().then_some(pt);
        let edges: &[PtId] = if node.is_java_object() { &[] } else { node.edges() };
        own.into_iter()
            .chain(edges.iter().copied().filter(|&e| self.nodes[e].is_java_object()))
    }

    /// Whether `pt` models an allocation node.
    #[inline]
    pub fn is_allocation(&self, pt: PtId) -> bool {
        self.allocation_set.contains(pt.as_usize())
    }

    /// JavaObjects of all allocation nodes, in discovery order.
    pub fn allocations(&self) -> &[PtId] {
        &self.allocations
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    fn add_pt_node(
        &mut self,
        kind: PointsToKind,
        ideal: NodeId,
        es: EscapeState,
        fields_es: EscapeState,
    ) -> PtId {
        debug_assert!(self.collecting, "connection graph is frozen");
        debug_assert!(ideal.as_usize() < self.node_limit);
        let id = self.nodes.alloc(PointsToNode::new(kind, ideal, es, fields_es));
        self.map.set(ideal, id);
        id
    }

    pub(super) fn add_java_object(&mut self, ideal: NodeId, es: EscapeState) -> PtId {
        if let Some(existing) = self.ptnode(ideal) {
            return existing;
        }
        let id = self.add_pt_node(PointsToKind::JavaObject, ideal, es, es);
        self.java_objects.push(id);
        id
    }

    /// JavaObject for an allocation node.
    pub(super) fn add_allocation(&mut self, ideal: NodeId, es: EscapeState) -> PtId {
        let id = self.add_java_object(ideal, es);
        if self.allocation_set.insert(id.as_usize()) {
            self.allocations.push(id);
        }
        id
    }

    pub(super) fn add_local_var(&mut self, ideal: NodeId, es: EscapeState) -> PtId {
        if let Some(existing) = self.ptnode(ideal) {
            return existing;
        }
        self.add_pt_node(PointsToKind::LocalVar, ideal, es, es)
    }

    pub(super) fn add_field(
        &mut self,
        ideal: NodeId,
        es: EscapeState,
        offset: Offset,
        is_oop: bool,
    ) -> PtId {
        if let Some(existing) = self.ptnode(ideal) {
            return existing;
        }
        let data = FieldData {
            offset,
            is_oop,
            bases: SmallVec::new(),
        };
        let id = self.add_pt_node(PointsToKind::Field(data), ideal, es, es);
        if is_oop {
            self.oop_fields.push(id);
        }
        id
    }

    pub(super) fn add_arraycopy(&mut self, ideal: NodeId, es: EscapeState) -> PtId {
        if let Some(existing) = self.ptnode(ideal) {
            return existing;
        }
        self.add_pt_node(PointsToKind::Arraycopy, ideal, es, es)
    }

    /// Model IR node `n` by an existing node (null, phantom).
    pub(super) fn map_ideal(&mut self, n: NodeId, pt: PtId) {
        debug_assert!(self.collecting, "connection graph is frozen");
        if n.as_usize() < self.node_limit {
            self.map.set(n, pt);
        }
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Add `from -> to` and the matching use. Returns true if new.
    pub fn add_edge(&mut self, from: PtId, to: PtId) -> bool {
        if to == self.phantom {
            if self.nodes[from].has_flag(PointsToFlags::POINTS_TO_UNKNOWN) {
                return false;
            }
            self.nodes[from].flags.insert(PointsToFlags::POINTS_TO_UNKNOWN);
        }
        let is_new = push_unique(&mut self.nodes[from].edges, to);
        if is_new {
            push_unique(&mut self.nodes[to].uses, from);
        }
        is_new
    }

    /// Record `base` as a container of `field`. Returns true if new.
    ///
    /// JavaObject bases list the field among their edges; LocalVar bases
    /// list it among their base uses. The null object gets neither.
    pub fn add_base(&mut self, field: PtId, base: PtId) -> bool {
        if base == self.phantom {
            if self.nodes[field].has_flag(PointsToFlags::HAS_UNKNOWN_BASE) {
                return false;
            }
            self.nodes[field].flags.insert(PointsToFlags::HAS_UNKNOWN_BASE);
        }
        let is_new = match &mut self.nodes[field].kind {
            PointsToKind::Field(data) => {
                if data.bases.contains(&base) {
                    false
                } else {
                    data.bases.push(base);
                    true
                }
            }
            _ => {
                debug_assert!(false, "base added to a non-field node");
                false
            }
        };
        if is_new && base != self.null {
            if self.nodes[base].is_java_object() {
                push_unique(&mut self.nodes[base].edges, field);
            } else {
                push_unique(&mut self.nodes[base].base_uses, field);
            }
        }
        is_new
    }

    pub(super) fn set_flag(&mut self, pt: PtId, flag: PointsToFlags) {
        self.nodes[pt].flags.insert(flag);
    }

    // =========================================================================
    // Escape States
    // =========================================================================

    /// Raise the escape state of `pt`; the fields state rises with it.
    ///
    /// Escaping objects lose scalar replaceability. The singletons are
    /// never changed.
    pub fn set_escape_state(&mut self, pt: PtId, es: EscapeState) -> bool {
        if pt == self.phantom || pt == self.null {
            return false;
        }
        let node = &mut self.nodes[pt];
        if es <= node.escape {
            return false;
        }
        node.escape = es;
        node.fields_escape = node.fields_escape.merge(es);
        if es.escapes() {
            node.flags.remove(PointsToFlags::SCALAR_REPLACEABLE);
        }
        true
    }

    /// Raise the state forced onto everything reachable through `pt`.
    pub fn set_fields_escape_state(&mut self, pt: PtId, es: EscapeState) -> bool {
        if pt == self.phantom || pt == self.null {
            return false;
        }
        let node = &mut self.nodes[pt];
        if es <= node.fields_escape {
            return false;
        }
        node.fields_escape = es;
        true
    }

    /// Clear scalar replaceability of `pt`, reporting `reason` once.
    pub(super) fn set_not_scalar_replaceable(
        &mut self,
        pt: PtId,
        reason: &'static str,
        observer: &mut dyn EscapeObserver,
    ) {
        let node = &mut self.nodes[pt];
        if !node.flags.contains(PointsToFlags::SCALAR_REPLACEABLE) {
            return;
        }
        node.flags.remove(PointsToFlags::SCALAR_REPLACEABLE);
        let ideal = node.ideal;
        log::trace!("escape: {:?} not scalar replaceable: {}", ideal, reason);
        if ideal.is_valid() {
            observer.on_not_scalar_replaceable(ideal, reason);
        }
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check that every edge, use and base is mirrored on the other side.
    pub fn verify(&self) -> Result<(), String> {
        for (id, node) in self.iter() {
            for &e in node.edges() {
                let target = &self.nodes[e];
                let mirrored = if node.is_java_object() && target.is_field() {
                    target.bases().contains(&id)
                } else {
                    target.uses().contains(&id)
                };
                if !mirrored {
                    return Err(format!("edge {:?} -> {:?} has no matching use", id, e));
                }
            }
            for &u in node.uses() {
                if !self.nodes[u].edges().contains(&id) {
                    return Err(format!("use {:?} of {:?} has no matching edge", u, id));
                }
            }
            for &f in node.base_uses() {
                if !self.nodes[f].bases().contains(&id) {
                    return Err(format!("base use {:?} of {:?} has no matching base", f, id));
                }
            }
            for &b in node.bases() {
                if b == self.null {
                    continue;
                }
                let base = &self.nodes[b];
                let mirrored = if base.is_java_object() {
                    base.edges().contains(&id)
                } else {
                    base.base_uses().contains(&id)
                };
                if !mirrored {
                    return Err(format!("base {:?} of field {:?} is not mirrored", b, id));
                }
            }
        }
        if self.nodes[self.phantom].escape_state() != EscapeState::GlobalEscape {
            return Err("phantom object changed state".into());
        }
        if self.nodes[self.null].escape_state() != EscapeState::NoEscape {
            return Err("null object changed state".into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ConnectionGraph ({} nodes)", self.len())?;
        for (id, node) in self.iter() {
            let kind = match node.kind() {
                PointsToKind::JavaObject => "JavaObject",
                PointsToKind::LocalVar => "LocalVar",
                PointsToKind::Field(_) => "Field",
                PointsToKind::Arraycopy => "Arraycopy",
            };
            writeln!(
                f,
                "  {:?} {} ideal={:?} es={} fes={} edges={:?}",
                id,
                kind,
                node.ideal(),
                node.escape_state(),
                node.fields_escape_state(),
                node.edges()
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::escape::observer::NoopObserver;

    fn graph() -> ConnectionGraph {
        ConnectionGraph::new(64)
    }

    #[test]
    fn test_escape_state_ordering() {
        assert!(EscapeState::UnknownEscape < EscapeState::NoEscape);
        assert!(EscapeState::NoEscape < EscapeState::ArgEscape);
        assert!(EscapeState::ArgEscape < EscapeState::GlobalEscape);
        assert_eq!(
            EscapeState::NoEscape.merge(EscapeState::ArgEscape),
            EscapeState::ArgEscape
        );
        assert!(!EscapeState::NoEscape.escapes());
        assert!(EscapeState::ArgEscape.escapes());
    }

    #[test]
    fn test_singletons() {
        let cg = graph();
        assert_eq!(cg.len(), 2);
        assert!(cg.is_empty());
        assert_eq!(
            cg.node(cg.phantom()).escape_state(),
            EscapeState::GlobalEscape
        );
        assert_eq!(cg.node(cg.null()).escape_state(), EscapeState::NoEscape);
        assert!(!cg.node(cg.null()).is_scalar_replaceable());
        assert!(cg.verify().is_ok());
    }

    #[test]
    fn test_singleton_states_are_fixed() {
        let mut cg = graph();
        let (phantom, null) = (cg.phantom(), cg.null());
        assert!(!cg.set_escape_state(null, EscapeState::GlobalEscape));
        assert!(!cg.set_fields_escape_state(phantom, EscapeState::NoEscape));
        assert_eq!(cg.node(null).escape_state(), EscapeState::NoEscape);
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut cg = graph();
        let obj = cg.add_java_object(NodeId::new(3), EscapeState::NoEscape);
        let var = cg.add_local_var(NodeId::new(4), EscapeState::NoEscape);

        assert!(cg.add_edge(var, obj));
        assert!(!cg.add_edge(var, obj));
        assert_eq!(cg.node(var).edges(), &[obj]);
        assert_eq!(cg.node(obj).uses(), &[var]);
        assert!(cg.verify().is_ok());
    }

    #[test]
    fn test_edge_to_phantom_sets_flag() {
        let mut cg = graph();
        let var = cg.add_local_var(NodeId::new(4), EscapeState::NoEscape);
        let phantom = cg.phantom();
        assert!(cg.add_edge(var, phantom));
        assert!(cg.node(var).has_flag(PointsToFlags::POINTS_TO_UNKNOWN));
        assert!(!cg.add_edge(var, phantom));
        assert_eq!(cg.pointees(var).collect::<Vec<_>>(), vec![phantom]);
    }

    #[test]
    fn test_add_base_mirrors() {
        let mut cg = graph();
        let obj = cg.add_java_object(NodeId::new(3), EscapeState::NoEscape);
        let var = cg.add_local_var(NodeId::new(4), EscapeState::NoEscape);
        let field = cg.add_field(NodeId::new(5), EscapeState::NoEscape, Offset::Known(12), true);
        let null = cg.null();

        assert!(cg.add_base(field, var));
        assert!(cg.add_base(field, obj));
        assert!(cg.add_base(field, null));
        assert!(!cg.add_base(field, obj));

        assert_eq!(cg.node(field).bases(), &[var, obj, null]);
        assert_eq!(cg.node(var).base_uses(), &[field]);
        assert_eq!(cg.node(obj).edges(), &[field]);
        assert!(cg.node(null).edges().is_empty());
        assert_eq!(cg.oop_fields, vec![field]);
        assert!(cg.verify().is_ok());
    }

    #[test]
    fn test_escape_state_monotonic() {
        let mut cg = graph();
        let obj = cg.add_java_object(NodeId::new(3), EscapeState::NoEscape);
        assert!(cg.node(obj).is_scalar_replaceable());

        assert!(cg.set_escape_state(obj, EscapeState::ArgEscape));
        assert!(!cg.set_escape_state(obj, EscapeState::NoEscape));
        assert_eq!(cg.node(obj).escape_state(), EscapeState::ArgEscape);
        assert_eq!(cg.node(obj).fields_escape_state(), EscapeState::ArgEscape);
        assert!(!cg.node(obj).is_scalar_replaceable());
    }

    #[test]
    fn test_ptnode_respects_limit() {
        let mut cg = ConnectionGraph::new(8);
        let obj = cg.add_java_object(NodeId::new(7), EscapeState::NoEscape);
        assert_eq!(cg.ptnode(NodeId::new(7)), Some(obj));
        assert_eq!(cg.ptnode(NodeId::new(6)), None);
        assert_eq!(cg.ptnode(NodeId::new(100)), None);
    }

    #[test]
    fn test_not_scalar_replaceable_reported_once() {
        struct Count(usize);
        impl EscapeObserver for Count {
            fn on_not_scalar_replaceable(&mut self, _alloc: NodeId, _reason: &str) {
                self.0 += 1;
            }
        }
        let mut cg = graph();
        let obj = cg.add_java_object(NodeId::new(3), EscapeState::NoEscape);
        let mut count = Count(0);
        cg.set_not_scalar_replaceable(obj, "test", &mut count);
        cg.set_not_scalar_replaceable(obj, "test", &mut count);
        assert_eq!(count.0, 1);

        let mut noop = NoopObserver;
        cg.set_not_scalar_replaceable(cg.null(), "null", &mut noop);
    }
}
