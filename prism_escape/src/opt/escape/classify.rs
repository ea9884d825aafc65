//! Scalar-replaceability classification.
//!
//! Runs on the completed graph and only clears flags. A non-escaping
//! object stays scalar replaceable when its fields form a fixed, named
//! set reachable through addresses that belong to it alone.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ADDRESS_INPUT, MemoryOp, Operator};

use super::observer::EscapeObserver;
use super::points_to::{ConnectionGraph, EscapeState, PointsToFlags, PtId};

impl ConnectionGraph {
    /// Clear scalar replaceability of every non-escaping object whose
    /// fields cannot be split into independent values.
    pub fn classify(&mut self, graph: &Graph, observer: &mut dyn EscapeObserver) {
        for i in 0..self.materialized.len() {
            let value = self.materialized[i];
            let targets: Vec<PtId> = self.pointees(value).collect();
            for obj in targets {
                self.set_not_scalar_replaceable(obj, "passed to a call", observer);
            }
        }

        let objects: Vec<PtId> = self
            .candidates
            .iter()
            .copied()
            .filter(|&obj| self.nodes[obj].escape_state() == EscapeState::NoEscape)
            .collect();

        for &obj in &objects {
            if self.nodes[obj].is_scalar_replaceable() {
                self.adjust_scalar_replaceable_state(obj, graph, observer);
            }
        }

        // Objects stored into fields of non-replaceable objects must stay
        // in memory with them.
        let mut changed = true;
        while changed {
            changed = false;
            for &obj in &objects {
                if self.nodes[obj].is_scalar_replaceable() && self.stored_into_nsr_base(obj) {
                    self.set_not_scalar_replaceable(
                        obj,
                        "stored into a field of a non-replaceable object",
                        observer,
                    );
                    changed = true;
                }
            }
        }

        let replaceable = objects
            .iter()
            .filter(|&&obj| self.nodes[obj].is_scalar_replaceable())
            .count();
        log::debug!(
            "escape: {} of {} non-escaping objects are scalar replaceable",
            replaceable,
            objects.len()
        );
    }

    fn adjust_scalar_replaceable_state(
        &mut self,
        obj: PtId,
        graph: &Graph,
        observer: &mut dyn EscapeObserver,
    ) {
        let node = &self.nodes[obj];
        if node.has_flag(PointsToFlags::ARRAYCOPY_SRC) || node.has_flag(PointsToFlags::ARRAYCOPY_DST)
        {
            self.set_not_scalar_replaceable(obj, "used by an array copy", observer);
            return;
        }

        // Where the object is stored or merged.
        let uses = self.nodes[obj].uses().to_vec();
        for u in uses {
            let use_node = &self.nodes[u];
            if use_node.is_arraycopy() {
                continue;
            }
            if let Some(field) = use_node.field() {
                if field.offset.is_bot() {
                    self.set_not_scalar_replaceable(obj, "stored at an unknown offset", observer);
                    return;
                }
                let null = self.null();
                if field.bases().len() > 1 && field.bases().contains(&null) {
                    self.set_not_scalar_replaceable(
                        obj,
                        "stored into a field of null or another object",
                        observer,
                    );
                    return;
                }
            }
            let merged: Vec<PtId> = self.nodes[u]
                .edges()
                .iter()
                .copied()
                .filter(|&e| e != obj && self.nodes[e].is_java_object())
                .collect();
            for other in merged {
                self.set_not_scalar_replaceable(obj, "merged with another object", observer);
                self.set_not_scalar_replaceable(other, "merged with another object", observer);
            }
            if !self.nodes[obj].is_scalar_replaceable() {
                return;
            }
        }

        // How its own fields are addressed.
        let fields = self.nodes[obj].edges().to_vec();
        for f in fields {
            let Some(field) = self.nodes[f].field() else {
                continue;
            };
            if field.offset.is_bot() {
                self.set_not_scalar_replaceable(obj, "field at an unknown offset", observer);
                return;
            }
            if let Some(reason) = address_use_blocker(graph, self.nodes[f].ideal()) {
                self.set_not_scalar_replaceable(obj, reason, observer);
                return;
            }
            if field.bases().len() > 1 {
                let others: Vec<PtId> = field
                    .bases()
                    .iter()
                    .copied()
                    .filter(|&b| b != obj && self.nodes[b].is_java_object())
                    .collect();
                for other in others {
                    self.set_not_scalar_replaceable(obj, "field shared with another object", observer);
                    self.set_not_scalar_replaceable(other, "field shared with another object", observer);
                }
                if !self.nodes[obj].is_scalar_replaceable() {
                    return;
                }
            }
        }
    }

    fn stored_into_nsr_base(&self, obj: PtId) -> bool {
        let null = self.null();
        self.nodes[obj].uses().iter().any(|&u| {
            self.nodes[u].bases().iter().any(|&base| {
                base != null
                    && base != obj
                    && self.nodes[base].is_java_object()
                    && !self.nodes[base].is_scalar_replaceable()
            })
        })
    }
}

/// Why an address cannot be replaced by a scalar, judging by its users.
fn address_use_blocker(graph: &Graph, adr: NodeId) -> Option<&'static str> {
    if !adr.is_valid() {
        return None;
    }
    graph.uses(adr).iter().find_map(|&u| {
        if graph.input(u, ADDRESS_INPUT) != Some(adr) {
            return None;
        }
        let op = graph.op(u);
        if matches!(op, Operator::Memory(MemoryOp::CompareAndSwap { .. })) {
            Some("field used by an atomic update")
        } else if op.is_mismatched_access() {
            Some("mismatched field access")
        } else {
            None
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::ir::builder::{
        CallBuilder, ControlBuilder, GraphBuilder, MemoryBuilder, ValueBuilder,
    };
    use crate::ir::meta::{CallSummary, FieldInfo, Klass, KlassId};
    use crate::ir::node::NodeId;
    use crate::ir::types::{BasicType, Type};
    use crate::ir::graph::Graph;
    use crate::opt::escape::observer::{EscapeStats, NoopObserver};
    use crate::opt::escape::{ConnectionGraph, EscapeConfig};

    fn pair(b: &mut GraphBuilder) -> KlassId {
        b.define_class(Klass::instance(
            "Pair",
            vec![
                FieldInfo {
                    name: "count".into(),
                    offset: 12,
                    ty: BasicType::Int,
                },
                FieldInfo {
                    name: "first".into(),
                    offset: 16,
                    ty: BasicType::Object,
                },
                FieldInfo {
                    name: "second".into(),
                    offset: 20,
                    ty: BasicType::Object,
                },
            ],
        ))
    }

    fn analyze(g: &Graph) -> ConnectionGraph {
        ConnectionGraph::compute(g, &EscapeConfig::default(), &mut NoopObserver)
            .expect("analysis should complete")
    }

    fn replaceable(cg: &ConnectionGraph, alloc: NodeId) -> bool {
        cg.node(cg.ptnode(alloc).unwrap()).is_scalar_replaceable()
    }

    #[test]
    fn test_plain_object_stays_replaceable() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let obj = b.new_instance(k);
        let one = b.const_int(1);
        b.store_field(obj.obj, 12, one);
        let v = b.load_field(obj.obj, 12);
        b.return_value(Some(v));
        let cg = analyze(&b.finish());
        assert!(replaceable(&cg, obj.alloc));
    }

    #[test]
    fn test_nested_objects_stay_replaceable() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let outer = b.new_instance(k);
        let inner = b.new_instance(k);
        b.store_field(outer.obj, 16, inner.obj);
        let loaded = b.load_field(outer.obj, 16);
        let v = b.load_field(loaded, 12);
        b.return_value(Some(v));
        let cg = analyze(&b.finish());
        assert!(replaceable(&cg, outer.alloc));
        assert!(replaceable(&cg, inner.alloc));
    }

    #[test]
    fn test_atomic_field_update_blocks_replacement() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let obj = b.new_instance(k);
        let other = b.new_instance(k);
        let adr = b.field_address(obj.obj, 16);
        let null = b.null();
        let ok = b.compare_and_swap(adr, null, other.obj);
        b.return_value(Some(ok));
        let cg = analyze(&b.finish());
        assert!(!replaceable(&cg, obj.alloc));
    }

    #[test]
    fn test_mismatched_access_blocks_replacement() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let obj = b.new_instance(k);
        let adr = b.field_address(obj.obj, 12);
        let v = b.load(adr, BasicType::Long);
        b.return_value(Some(v));
        let cg = analyze(&b.finish());
        assert!(!replaceable(&cg, obj.alloc));
    }

    #[test]
    fn test_call_argument_is_materialized() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let pure = b.define_method("inspect", Some(CallSummary::pure(1)));
        let obj = b.new_instance(k);
        b.call_static(pure, &[obj.obj], None);
        b.return_value(None);

        let g = b.finish();
        let mut stats = EscapeStats::new();
        let cg = ConnectionGraph::compute(&g, &EscapeConfig::default(), &mut stats).unwrap();
        let pt = cg.ptnode(obj.alloc).unwrap();
        assert_eq!(
            cg.node(pt).escape_state(),
            crate::opt::escape::EscapeState::NoEscape
        );
        assert!(!cg.node(pt).is_scalar_replaceable());
        assert_eq!(stats.rejections_for("passed to a call"), 1);
    }

    #[test]
    fn test_store_into_nsr_container() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let arr = b.define_class(Klass::array("Object[]", BasicType::Object));
        let n = b.parameter(Type::Int);
        let array = b.new_array(arr, n);
        let obj = b.new_instance(k);
        let zero = b.const_int(0);
        b.store_element(array.obj, zero, obj.obj);
        let v = b.load_element(array.obj, zero);
        b.safepoint(&[v]);
        b.return_value(None);
        let cg = analyze(&b.finish());
        assert!(!replaceable(&cg, array.alloc));
        assert!(!replaceable(&cg, obj.alloc));
    }

    #[test]
    fn test_disabled_elimination() {
        let mut b = GraphBuilder::new();
        let k = pair(&mut b);
        let obj = b.new_instance(k);
        let v = b.load_field(obj.obj, 12);
        b.return_value(Some(v));
        let g = b.finish();
        let config = EscapeConfig::analysis_only();
        let cg = ConnectionGraph::compute(&g, &config, &mut NoopObserver).unwrap();
        assert!(!replaceable(&cg, obj.alloc));
        assert!(cg.node(cg.ptnode(obj.alloc).unwrap()).escape_state()
            == crate::opt::escape::EscapeState::NoEscape);
    }
}
