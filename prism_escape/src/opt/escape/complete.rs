//! Fixed-point completion of the connection graph.
//!
//! Two propagations run until neither changes anything:
//!
//! - **References**: every JavaObject is pushed through the uses of its
//!   uses, so each LocalVar and Field ends up with a direct edge to every
//!   object it may refer to, and each Field with every object that may
//!   contain it. Sibling fields (same container, overlapping offset) are
//!   revisited so a store through one is seen through all of them.
//! - **Escape states**: states of at least ArgEscape flow along edges.
//!   Arraycopy edges carry only the fields state.
//!
//! The outer loop is bounded by an iteration count and a wall-clock
//! budget; hitting either abandons the analysis. A round that adds no
//! edges ends the propagation, so a limit of `n` admits `n - 1`
//! productive rounds followed by the empty one.

use std::collections::VecDeque;
use std::time::Instant;

use crate::ir::arena::BitSet;
use crate::ir::types::Offset;

use super::observer::EscapeObserver;
use super::points_to::{ConnectionGraph, EscapeState, PointsToFlags, PtId};
use super::{EscapeConfig, EscapeError, EscapeResult};

/// Objects processed between time checks.
const TIMEOUT_CHECK_INTERVAL: usize = 4;

// =============================================================================
// Propagation Worklist
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Node that should get an edge to the current object.
    Edge(PtId),
    /// Field that should get the current object as a base.
    Base(PtId),
}

/// Deduplicating worklist shared by one reference propagation.
struct Worklist {
    items: Vec<Pending>,
    queued: BitSet,
    /// Number of points-to nodes; `Base` entries are keyed past it.
    limit: usize,
}

impl Worklist {
    fn new(limit: usize) -> Self {
        Worklist {
            items: Vec::new(),
            queued: BitSet::with_capacity(limit * 2),
            limit,
        }
    }

    fn push(&mut self, item: Pending) {
        let key = match item {
            Pending::Edge(id) => id.as_usize(),
            Pending::Base(id) => self.limit + id.as_usize(),
        };
        if self.queued.insert(key) {
            self.items.push(item);
        }
    }

    fn clear(&mut self) {
        self.items.clear();
        self.queued.clear();
    }
}

// =============================================================================
// Completion
// =============================================================================

impl ConnectionGraph {
    /// Run both propagations to their fixed point.
    ///
    /// Returns `Ok(false)` when no object can avoid escaping; the graph is
    /// then left partially propagated and [`ConnectionGraph::is_complete`]
    /// stays false.
    pub fn complete(
        &mut self,
        config: &EscapeConfig,
        observer: &mut dyn EscapeObserver,
    ) -> EscapeResult<bool> {
        let mut wl = Worklist::new(self.len());
        if !self.find_non_escaped_objects(&mut wl) {
            log::debug!("escape: no candidate survives initial propagation");
            return Ok(false);
        }

        let phantom = self.phantom();
        let objects: Vec<PtId> = std::iter::once(phantom)
            .chain(self.java_objects.iter().copied())
            .collect();
        let oop_fields = self.oop_fields.clone();
        let start = Instant::now();
        let mut timed_out = false;
        let mut iterations = 0;
        let mut new_edges = 1;

        loop {
            while new_edges > 0 && iterations < config.max_iterations {
                iterations += 1;
                // Nodes queued by the previous round point to the phantom.
                new_edges = self.add_java_object_edges(phantom, false, &mut wl);
                for (next, &obj) in objects.iter().enumerate() {
                    new_edges += self.add_java_object_edges(obj, true, &mut wl);
                    if next % TIMEOUT_CHECK_INTERVAL != 0 {
                        continue;
                    }
                    if observer.should_abort() {
                        log::debug!("escape: cancelled in iteration {}", iterations);
                        return Err(EscapeError::Cancelled);
                    }
                    let elapsed = start.elapsed();
                    let per_object = elapsed / (next as u32 + 1);
                    let remaining = per_object * (objects.len() - next) as u32;
                    if elapsed + remaining >= config.timeout {
                        timed_out = true;
                        break;
                    }
                }
                observer.on_iteration(iterations, new_edges);
                log::trace!("escape: iteration {} added {} edges", iterations, new_edges);

                if timed_out {
                    break;
                }
                if new_edges > 0 && !self.find_non_escaped_objects(&mut wl) {
                    log::debug!("escape: no candidate survives iteration {}", iterations);
                    return Ok(false);
                }
                if start.elapsed() >= config.timeout {
                    timed_out = true;
                    break;
                }
            }

            // Leaving the rounds with edges still pending means the limit hit.
            if timed_out || new_edges > 0 {
                break;
            }
            for &field in &oop_fields {
                if self.nodes[field].edges().is_empty() {
                    new_edges += self.find_field_value(field, &mut wl);
                }
            }
            if new_edges == 0 {
                break;
            }
        }

        if timed_out {
            let elapsed = start.elapsed();
            log::debug!("escape: timed out after {:?}", elapsed);
            return Err(EscapeError::Timeout { elapsed });
        }
        if new_edges > 0 {
            log::debug!("escape: iteration limit {} reached", config.max_iterations);
            return Err(EscapeError::IterationLimit { iterations });
        }

        let mut null_edges = 0;
        for i in 0..self.candidates.len() {
            let obj = self.candidates[i];
            if self.nodes[obj].escape_state() == EscapeState::NoEscape
                && self.is_allocation(obj)
            {
                null_edges += self.find_init_values_null(obj, &mut wl);
            }
        }
        if null_edges > 0 {
            let null = self.null();
            self.add_java_object_edges(null, false, &mut wl);
        }

        self.completed = true;
        log::debug!(
            "escape: completed in {} iterations ({:?})",
            iterations,
            start.elapsed()
        );
        Ok(true)
    }

    // =========================================================================
    // Reference Propagation
    // =========================================================================

    /// Push `jobj` through the nodes queued on `wl` (and, when `populate`
    /// is set, through the uses of its own uses first). Returns the number
    /// of edges added.
    fn add_java_object_edges(&mut self, jobj: PtId, populate: bool, wl: &mut Worklist) -> usize {
        let mut new_edges = 0;
        if populate {
            let uses = self.nodes[jobj].uses().to_vec();
            for u in uses {
                if self.nodes[u].is_arraycopy() {
                    continue;
                }
                self.add_uses_to_worklist(u, wl);
                if self.nodes[u].is_oop_field() {
                    self.add_field_uses_to_worklist(u, wl);
                }
            }
        }

        let mut i = 0;
        while i < wl.items.len() {
            let item = wl.items[i];
            i += 1;
            let u = match item {
                Pending::Base(field) => {
                    if self.add_base(field, jobj) {
                        new_edges += 1;
                    }
                    continue;
                }
                Pending::Edge(u) => u,
            };

            if self.nodes[u].is_arraycopy() {
                if jobj == self.null() {
                    continue;
                }
                if self.add_edge(u, jobj) {
                    self.set_flag(jobj, PointsToFlags::ARRAYCOPY_SRC);
                    new_edges += 1;
                }
                continue;
            }

            if !self.add_edge(u, jobj) {
                continue;
            }
            new_edges += 1;
            if self.nodes[u].is_local_var() {
                self.add_uses_to_worklist(u, wl);
                if self.nodes[u].has_flag(PointsToFlags::ARRAYCOPY_DST) && jobj != self.null() {
                    let copies: Vec<PtId> = self.nodes[u]
                        .edges()
                        .iter()
                        .copied()
                        .filter(|&e| self.nodes[e].is_arraycopy())
                        .collect();
                    for copy in copies {
                        if self.add_edge(jobj, copy) {
                            self.set_flag(jobj, PointsToFlags::ARRAYCOPY_DST);
                            new_edges += 1;
                        }
                    }
                }
            } else if self.nodes[u].is_field() {
                self.add_field_uses_to_worklist(u, wl);
            }
        }
        wl.clear();
        new_edges
    }

    fn add_uses_to_worklist(&self, pt: PtId, wl: &mut Worklist) {
        let node = &self.nodes[pt];
        for &u in node.uses() {
            wl.push(Pending::Edge(u));
        }
        for &f in node.base_uses() {
            wl.push(Pending::Base(f));
        }
    }

    /// Queue the readers of `field` and every sibling field that may hold
    /// the same value.
    fn add_field_uses_to_worklist(&self, field: PtId, wl: &mut Worklist) {
        self.add_uses_to_worklist(field, wl);
        let offset = self.nodes[field].offset();
        for &base in self.nodes[field].bases() {
            self.add_fields_to_worklist(field, base, offset, wl);
            self.add_copied_fields_to_worklist(field, base, wl);
        }
    }

    /// Queue the element fields of every array copied to or from `base`.
    ///
    /// Source and destination positions are not tracked, so an element
    /// may land at any offset of the other array.
    fn add_copied_fields_to_worklist(&self, field: PtId, base: PtId, wl: &mut Worklist) {
        let node = &self.nodes[base];
        if node.has_flag(PointsToFlags::ARRAYCOPY_SRC) {
            for &copy in node.uses() {
                if !self.nodes[copy].is_arraycopy() {
                    continue;
                }
                for &dst in self.nodes[copy].uses() {
                    if dst != base && self.nodes[dst].has_flag(PointsToFlags::ARRAYCOPY_DST) {
                        self.add_fields_to_worklist(field, dst, Offset::Bot, wl);
                    }
                }
            }
        }
        if node.has_flag(PointsToFlags::ARRAYCOPY_DST) {
            for &copy in node.edges() {
                if !self.nodes[copy].is_arraycopy() {
                    continue;
                }
                for &src in self.nodes[copy].edges() {
                    if src != base {
                        self.add_fields_to_worklist(field, src, Offset::Bot, wl);
                    }
                }
            }
        }
    }

    /// Queue oop fields of `base` whose offset may overlap `offset`.
    fn add_fields_to_worklist(&self, field: PtId, base: PtId, offset: Offset, wl: &mut Worklist) {
        let base_node = &self.nodes[base];
        let siblings: &[PtId] = if base_node.is_local_var() {
            base_node.base_uses()
        } else if base_node.is_java_object() && base != self.phantom() && base != self.null() {
            base_node.edges()
        } else {
            &[]
        };
        for &f in siblings {
            let sibling = &self.nodes[f];
            if f != field && sibling.is_oop_field() && sibling.offset().may_overlap(offset) {
                wl.push(Pending::Edge(f));
            }
        }
    }

    // =========================================================================
    // Escape Propagation
    // =========================================================================

    /// Propagate ArgEscape and GlobalEscape along edges, then drop escaped
    /// candidates. Returns whether any candidate is left.
    fn find_non_escaped_objects(&mut self, wl: &mut Worklist) -> bool {
        let mut worklist: VecDeque<PtId> = self
            .nodes
            .iter()
            .filter(|(_, n)| {
                n.escape_state() >= EscapeState::ArgEscape
                    || n.fields_escape_state() >= EscapeState::ArgEscape
            })
            .map(|(id, _)| id)
            .collect();

        while let Some(ptn) = worklist.pop_front() {
            let es = self.nodes[ptn].escape_state();
            let field_es = self.nodes[ptn].fields_escape_state();
            let ptn_is_object = self.nodes[ptn].is_java_object();

            if self.nodes[ptn].is_oop_field() && es >= EscapeState::ArgEscape {
                // An escaped field may hold anything.
                let phantom = self.phantom();
                if self.add_edge(ptn, phantom) {
                    self.add_field_uses_to_worklist(ptn, wl);
                }
            }

            let edges = self.nodes[ptn].edges().to_vec();
            for e in edges {
                let changed = if self.nodes[e].is_arraycopy() {
                    self.set_fields_escape_state(e, field_es)
                } else if es >= field_es {
                    self.set_escape_state(e, es)
                } else {
                    let fields_changed = self.set_fields_escape_state(e, field_es);
                    let target = if ptn_is_object && self.nodes[e].is_oop_field() {
                        field_es
                    } else {
                        es
                    };
                    self.set_escape_state(e, target) || fields_changed
                };
                if changed {
                    worklist.push_back(e);
                }
            }
        }

        let mut i = 0;
        while i < self.candidates.len() {
            let obj = self.candidates[i];
            let es = self.nodes[obj].escape_state();
            if es >= EscapeState::GlobalEscape {
                self.candidates.swap_remove(i);
                continue;
            }
            if es == EscapeState::NoEscape {
                self.find_init_values_phantom(obj, wl);
            }
            i += 1;
        }
        !self.candidates.is_empty()
    }

    // =========================================================================
    // Unknown Field Values
    // =========================================================================

    /// Fields of objects made by a callee may hold anything.
    fn find_init_values_phantom(&mut self, obj: PtId, wl: &mut Worklist) {
        if self.is_allocation(obj) {
            return;
        }
        let fields: Vec<PtId> = self.nodes[obj].edges().to_vec();
        let phantom = self.phantom();
        for f in fields {
            if self.nodes[f].is_oop_field() && self.add_edge(f, phantom) {
                self.add_field_uses_to_worklist(f, wl);
            }
        }
    }

    /// A field never written by a visible store, off something other than
    /// an allocation, was set elsewhere.
    fn find_field_value(&mut self, field: PtId, wl: &mut Worklist) -> usize {
        let from_allocation = self.nodes[field]
            .bases()
            .iter()
            .any(|&b| self.nodes[b].is_java_object() && self.is_allocation(b));
        if from_allocation {
            return 0;
        }
        let phantom = self.phantom();
        if self.add_edge(field, phantom) {
            self.add_field_uses_to_worklist(field, wl);
            1
        } else {
            0
        }
    }

    /// Never-written fields of a fresh allocation still hold null.
    fn find_init_values_null(&mut self, obj: PtId, wl: &mut Worklist) -> usize {
        let fields: Vec<PtId> = self.nodes[obj].edges().to_vec();
        let null = self.null();
        let mut new_edges = 0;
        for f in fields {
            let node = &self.nodes[f];
            if node.is_oop_field() && node.edges().is_empty() && self.add_edge(f, null) {
                self.add_field_uses_to_worklist(f, wl);
                new_edges += 1;
            }
        }
        new_edges
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{
        CallBuilder, ControlBuilder, GraphBuilder, MemoryBuilder, ValueBuilder,
    };
    use crate::ir::graph::Graph;
    use crate::ir::meta::{FieldInfo, Klass, KlassId};
    use crate::ir::types::{BasicType, OopType, Type};
    use crate::opt::escape::Escape;
    use crate::opt::escape::observer::NoopObserver;

    fn link(b: &mut GraphBuilder) -> KlassId {
        b.define_class(Klass::instance(
            "Link",
            vec![
                FieldInfo {
                    name: "value".into(),
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

    fn compute(g: &Graph) -> ConnectionGraph {
        ConnectionGraph::compute(g, &EscapeConfig::default(), &mut NoopObserver).unwrap()
    }

    #[test]
    fn test_unwritten_field_off_unknown_base_reads_phantom() {
        let mut b = GraphBuilder::new();
        let k = link(&mut b);
        let obj = b.new_instance(k);
        let inner = b.field_address(obj.obj, 16);
        let next = b.load(inner, BasicType::Object);
        let outer = b.field_address(next, 16);
        let value = b.load(outer, BasicType::Object);
        b.safepoint(&[value]);
        b.return_value(None);
        let g = b.finish();
        let cg = compute(&g);
        assert!(cg.is_complete());

        // `next` is never stored, so `next.next` has no allocation to
        // come from.
        let outer_pt = cg.ptnode(outer).unwrap();
        assert!(cg.node(outer_pt).edges().contains(&cg.phantom()));
        let value_pt = cg.ptnode(value).unwrap();
        assert!(cg.pointees(value_pt).any(|o| o == cg.phantom()));

        // The allocation's own field keeps its default instead.
        let inner_pt = cg.ptnode(inner).unwrap();
        assert_eq!(cg.node(inner_pt).edges(), &[cg.null()]);
    }

    #[test]
    fn test_unwritten_fields_of_local_allocation_hold_null() {
        let mut b = GraphBuilder::new();
        let k = link(&mut b);
        let obj = b.new_instance(k);
        let written = b.new_instance(k);
        let other = b.new_instance(k);
        b.store_field(written.obj, 16, other.obj);
        let empty = b.load_field(obj.obj, 16);
        let full = b.load_field(written.obj, 16);
        b.safepoint(&[empty, full]);
        b.return_value(None);
        let g = b.finish();
        let cg = compute(&g);

        let null = cg.null();
        let empty_pt = cg.ptnode(empty).unwrap();
        assert_eq!(cg.pointees(empty_pt).collect::<Vec<_>>(), vec![null]);

        let full_pt = cg.ptnode(full).unwrap();
        let other_pt = cg.ptnode(other.alloc).unwrap();
        assert_eq!(cg.pointees(full_pt).collect::<Vec<_>>(), vec![other_pt]);
        assert!(cg.verify().is_ok());
    }

    #[test]
    fn test_store_is_seen_through_sibling_address() {
        let mut b = GraphBuilder::new();
        let k = link(&mut b);
        let obj = b.new_instance(k);
        let value = b.new_instance(k);
        let store_adr = b.field_address(obj.obj, 16);
        let load_adr = b.field_address(obj.obj, 16);
        b.store(store_adr, value.obj, BasicType::Object);
        let loaded = b.load(load_adr, BasicType::Object);
        let x = b.load_field(loaded, 12);
        b.return_value(Some(x));
        let g = b.finish();
        let cg = compute(&g);

        let store_pt = cg.ptnode(store_adr).unwrap();
        let load_pt = cg.ptnode(load_adr).unwrap();
        assert_ne!(store_pt, load_pt);

        let value_pt = cg.ptnode(value.alloc).unwrap();
        assert!(cg.node(load_pt).edges().contains(&value_pt));
        let loaded_pt = cg.ptnode(loaded).unwrap();
        assert_eq!(cg.pointees(loaded_pt).collect::<Vec<_>>(), vec![value_pt]);
        assert_eq!(cg.node(value_pt).escape_state(), EscapeState::NoEscape);
    }

    #[test]
    fn test_array_copy_passes_only_fields_state() {
        let mut b = GraphBuilder::new();
        let k = link(&mut b);
        let arr = b.define_class(Klass::array("Object[]", BasicType::Object));
        let dst = b.parameter(Type::Oop(OopType::of(arr)));
        let len = b.const_int(1);
        let zero = b.const_int(0);
        let src = b.new_array(arr, len);
        let elem = b.new_instance(k);
        b.store_element(src.obj, zero, elem.obj);
        let copy = b.array_copy(src.obj, zero, dst, zero, len, true);
        b.return_value(None);
        let g = b.finish();
        let cg = compute(&g);

        let copy_pt = cg.ptnode(copy).unwrap();
        assert_eq!(cg.node(copy_pt).escape_state(), EscapeState::NoEscape);
        assert_eq!(
            cg.node(copy_pt).fields_escape_state(),
            EscapeState::GlobalEscape
        );

        // The source array stays local; what it holds does not.
        let src_pt = cg.ptnode(src.alloc).unwrap();
        assert_eq!(cg.node(src_pt).escape_state(), EscapeState::NoEscape);
        assert_eq!(
            cg.node(src_pt).fields_escape_state(),
            EscapeState::GlobalEscape
        );
        let elem_pt = cg.ptnode(elem.alloc).unwrap();
        assert_eq!(cg.node(elem_pt).escape_state(), EscapeState::GlobalEscape);
    }

    #[test]
    fn test_array_copy_at_shifted_position_carries_elements() {
        let mut b = GraphBuilder::new();
        let k = link(&mut b);
        let arr = b.define_class(Klass::array("Object[]", BasicType::Object));
        let len = b.const_int(2);
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let src = b.new_array(arr, len);
        let dst = b.new_array(arr, len);
        let obj = b.new_instance(k);
        b.store_element(src.obj, zero, obj.obj);
        b.array_copy(src.obj, zero, dst.obj, one, one, true);
        let lock = b.lock(obj.obj);
        let unlock = b.unlock(obj.obj);
        let copied = b.load_element(dst.obj, one);
        b.return_value(Some(copied));
        let mut g = b.finish();
        let cg = compute(&g);

        let obj_pt = cg.ptnode(obj.alloc).unwrap();
        let copied_pt = cg.ptnode(copied).unwrap();
        assert!(cg.pointees(copied_pt).any(|o| o == obj_pt));
        assert_eq!(cg.node(obj_pt).escape_state(), EscapeState::GlobalEscape);
        assert!(!cg.node(obj_pt).is_scalar_replaceable());

        let mut pass = Escape::new();
        let summary = pass.analyze(&mut g).unwrap();
        assert!(!summary.does_not_escape(obj.alloc));
        assert!(!summary.eliminable_locks().contains(&lock));
        assert!(!summary.eliminable_locks().contains(&unlock));
    }

    #[test]
    fn test_array_copy_destination_store_reaches_source_reads() {
        let mut b = GraphBuilder::new();
        let k = link(&mut b);
        let arr = b.define_class(Klass::array("Object[]", BasicType::Object));
        let len = b.const_int(2);
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let src = b.new_array(arr, len);
        let dst = b.new_array(arr, len);
        let obj = b.new_instance(k);
        b.array_copy(src.obj, zero, dst.obj, zero, len, true);
        b.store_element(dst.obj, one, obj.obj);
        let read = b.load_element(src.obj, zero);
        b.safepoint(&[read]);
        b.return_value(None);
        let g = b.finish();
        let cg = compute(&g);

        let obj_pt = cg.ptnode(obj.alloc).unwrap();
        let read_pt = cg.ptnode(read).unwrap();
        assert!(cg.pointees(read_pt).any(|o| o == obj_pt));
    }
}
