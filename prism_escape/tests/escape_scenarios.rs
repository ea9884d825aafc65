//! End-to-end escape analysis scenarios over builder-made graphs.

use std::time::Duration;

use pretty_assertions::assert_eq;

use prism_escape::ir::operators::ADDRESS_INPUT;
use prism_escape::ir::{
    ALIAS_BOT, BasicType, CallBuilder, CallSummary, ControlBuilder, FieldInfo, Graph,
    GraphBuilder, Klass, KlassId, MemoryBuilder, NodeFlags, NodeId, OopType, Operator, Type,
    ValueBuilder,
};
use prism_escape::opt::OptimizationPass;
use prism_escape::opt::escape::{
    ConnectionGraph, Escape, EscapeConfig, EscapeError, EscapeState, EscapeStats, NoopObserver,
};

// =============================================================================
// Helpers
// =============================================================================

fn pair(b: &mut GraphBuilder) -> KlassId {
    b.define_class(Klass::instance(
        "Pair",
        vec![
            FieldInfo {
                name: "left".into(),
                offset: 12,
                ty: BasicType::Int,
            },
            FieldInfo {
                name: "right".into(),
                offset: 16,
                ty: BasicType::Int,
            },
            FieldInfo {
                name: "next".into(),
                offset: 20,
                ty: BasicType::Object,
            },
        ],
    ))
}

fn object_array(b: &mut GraphBuilder) -> KlassId {
    b.define_class(Klass::array("Object[]", BasicType::Object))
}

fn types_of(g: &Graph) -> Vec<Type> {
    g.ids().map(|n| g.ty(n)).collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn analyze(g: &Graph) -> ConnectionGraph {
    init_logging();
    ConnectionGraph::compute(g, &EscapeConfig::default(), &mut NoopObserver)
        .expect("analysis should complete")
}

/// Local pair: two int fields written, read back and summed.
fn local_pair() -> (Graph, NodeId, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let p = b.new_instance(k);
    let three = b.const_int(3);
    let four = b.const_int(4);
    b.store_field(p.obj, 12, three);
    b.store_field(p.obj, 16, four);
    let left = b.load_field(p.obj, 12);
    let right = b.load_field(p.obj, 16);
    let sum = b.int_add(left, right);
    b.return_value(Some(sum));
    (b.finish(), p.alloc, left, right)
}

/// `depth` single-input phis stacked on a local object.
fn phi_chain(depth: usize) -> (Graph, NodeId) {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let p = b.new_instance(k);
    let mut value = p.obj;
    for _ in 0..depth {
        let ctrl = b.control();
        let region = b.region(&[ctrl]);
        value = b.phi(region, &[value]);
    }
    let v = b.load_field(value, 12);
    b.return_value(Some(v));
    (b.finish(), p.alloc)
}

/// Two lists of `n + 1` local objects walked to their last link and read.
///
/// One list is linked in allocation order and the other against it, so
/// whichever order the objects are visited in, one list gains a single
/// link per propagation round.
fn linked_chains(n: usize) -> (Graph, Vec<NodeId>) {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let forward: Vec<_> = (0..=n).map(|_| b.new_instance(k)).collect();
    let backward: Vec<_> = (0..=n).map(|_| b.new_instance(k)).collect();
    for i in 0..n {
        b.store_field(forward[i].obj, 20, forward[i + 1].obj);
        b.store_field(backward[i + 1].obj, 20, backward[i].obj);
    }
    let mut ahead = forward[0].obj;
    let mut behind = backward[n].obj;
    for _ in 0..n {
        ahead = b.load_field(ahead, 20);
        behind = b.load_field(behind, 20);
    }
    let left = b.load_field(ahead, 12);
    let right = b.load_field(behind, 12);
    let sum = b.int_add(left, right);
    b.return_value(Some(sum));
    let allocs = forward.iter().chain(&backward).map(|o| o.alloc).collect();
    (b.finish(), allocs)
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_local_pair_is_split_into_fields() {
    init_logging();
    let (mut g, alloc, left, right) = local_pair();

    let mut pass = Escape::new();
    let summary = pass.analyze(&mut g).unwrap().clone();
    let info = summary.allocation(alloc).unwrap();
    assert_eq!(info.escape_state, EscapeState::NoEscape);
    assert!(info.scalar_replaceable);
    assert_eq!(summary.new_alias_indices().len(), 2);

    let left_alias = g.access_alias(left);
    let right_alias = g.access_alias(right);
    assert_ne!(left_alias, right_alias);
    for alias in [left_alias, right_alias] {
        assert_ne!(alias, ALIAS_BOT);
        assert_ne!(g.aliases().general_index(alias), alias);
        assert_eq!(g.aliases().instance_of(alias), Some(alloc));
    }
    assert!(g.verify().is_ok());
}

#[test]
fn test_object_published_to_static_escapes() {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let holder = b.define_class(Klass::instance(
        "Holder",
        vec![FieldInfo {
            name: "INSTANCE".into(),
            offset: 8,
            ty: BasicType::Object,
        }],
    ));
    let p = b.new_instance(k);
    let three = b.const_int(3);
    b.store_field(p.obj, 12, three);
    b.store_static(holder, 8, p.obj);
    let left = b.load_field(p.obj, 12);
    b.return_value(Some(left));
    let mut g = b.finish();
    let before = types_of(&g);

    let mut pass = Escape::new();
    assert!(!pass.run(&mut g));
    let summary = pass.summary().unwrap();
    let info = summary.allocation(p.alloc).unwrap();
    assert_eq!(info.escape_state, EscapeState::GlobalEscape);
    assert!(!info.scalar_replaceable);
    assert!(summary.new_alias_indices().is_empty());
    assert_eq!(types_of(&g), before);
}

#[test]
fn test_argument_of_non_retaining_callee_stays_local() {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let inspect = b.define_method("inspect", Some(CallSummary::pure(1)));
    let p = b.new_instance(k);
    b.call_static(inspect, &[p.obj], None);
    b.return_value(None);
    let mut g = b.finish();

    let mut pass = Escape::new();
    let summary = pass.analyze(&mut g).unwrap();
    assert!(summary.does_not_escape(p.alloc));
}

#[test]
fn test_unknown_array_index_blocks_replacement() {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let arr = object_array(&mut b);
    let cond = b.parameter(Type::Int);
    let four = b.const_int(4);
    let array = b.new_array(arr, four);
    let zero = b.const_int(0);

    let entry = b.control();
    let head = b.region(&[entry]);
    let index = b.phi(head, &[zero]);
    let entry_mem = b.memory();
    let mem = b.mem_phi(head, ALIAS_BOT, &[entry_mem]);
    let p = b.new_instance(k);
    b.store_element(array.obj, index, p.obj);
    let one = b.const_int(1);
    let next = b.int_add(index, one);
    let (back, exit) = b.branch(cond);
    let body_mem = b.memory();
    b.graph_mut().add_input(head, back);
    b.graph_mut().add_input(index, next);
    b.graph_mut().add_input(mem, body_mem);
    b.set_control(exit);
    b.return_value(None);
    let mut g = b.finish();

    let mut pass = Escape::new();
    let summary = pass.analyze(&mut g).unwrap();
    let info = summary.allocation(p.alloc).unwrap();
    assert_eq!(info.escape_state, EscapeState::NoEscape);
    assert!(!info.scalar_replaceable);
    assert!(!summary.is_scalar_replaceable(array.alloc));
}

#[test]
fn test_phi_merged_allocations_are_not_replaceable() {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let cond = b.parameter(Type::Int);
    let entry = b.state();
    let (if_true, if_false) = b.branch(cond);

    b.set_control(if_true);
    let first = b.new_instance(k);
    let left = b.state();

    b.restore(entry);
    b.set_control(if_false);
    let second = b.new_instance(k);
    let right = b.state();

    let region = b.merge(&[left, right]);
    let merged = b.phi(region, &[first.obj, second.obj]);
    let v = b.load_field(merged, 12);
    b.return_value(Some(v));
    let mut g = b.finish();

    let mut pass = Escape::new();
    let summary = pass.analyze(&mut g).unwrap();
    for alloc in [first.alloc, second.alloc] {
        assert!(summary.does_not_escape(alloc));
        assert!(!summary.is_scalar_replaceable(alloc));
    }
    assert!(summary.new_alias_indices().is_empty());
}

#[test]
fn test_iteration_limit_bails_before_fixed_point() {
    init_logging();
    let (g, allocs) = linked_chains(8);

    // Every propagation round but the last reaches one link further.
    let mut stats = EscapeStats::new();
    ConnectionGraph::compute(&g, &EscapeConfig::default(), &mut stats)
        .expect("analysis should complete");
    let rounds = stats.iterations;
    assert!(rounds > 3, "chain converged in {} rounds", rounds);

    let short = EscapeConfig {
        max_iterations: rounds - 1,
        ..EscapeConfig::default()
    };
    let mut bailed = g.clone();
    let before = types_of(&bailed);
    let mut pass = Escape::with_config(short);
    let err = pass.analyze(&mut bailed).unwrap_err();
    assert_eq!(err, EscapeError::IterationLimit { iterations: rounds - 1 });
    assert!(!err.requires_retry());
    assert_eq!(types_of(&bailed), before);
    assert!(
        bailed
            .ids()
            .all(|n| !bailed.node(n).flags.contains(NodeFlags::RETYPED))
    );
    let summary = pass.summary().unwrap();
    assert_eq!(summary.bailout(), Some(&err));
    assert!(allocs.iter().all(|&a| !summary.does_not_escape(a)));

    // One more round is enough to finish.
    let exact = EscapeConfig {
        max_iterations: rounds,
        ..EscapeConfig::default()
    };
    let mut converged = g.clone();
    let mut pass = Escape::with_config(exact);
    let summary = pass.analyze(&mut converged).unwrap();
    assert!(allocs.iter().all(|&a| summary.does_not_escape(a)));
    assert!(allocs.iter().all(|&a| summary.is_scalar_replaceable(a)));
}

#[test]
fn test_zero_timeout_bails_out() {
    let (mut g, _) = phi_chain(8);
    let before = types_of(&g);

    let config = EscapeConfig {
        timeout: Duration::ZERO,
        ..EscapeConfig::default()
    };
    let err = Escape::with_config(config).analyze(&mut g).unwrap_err();
    assert!(matches!(err, EscapeError::Timeout { .. }));
    assert_eq!(types_of(&g), before);
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_escape_states_only_grow() {
    let (g, _, _, _) = local_pair();
    let mut cg = ConnectionGraph::build(&g, &EscapeConfig::default(), &mut NoopObserver);
    let built: Vec<EscapeState> = cg.ids().map(|id| cg.node(id).escape_state()).collect();

    assert!(cg.complete(&EscapeConfig::default(), &mut NoopObserver).unwrap());
    for (id, &before) in cg.ids().zip(&built) {
        assert!(cg.node(id).escape_state() >= before);
    }
    assert_eq!(cg.node(cg.null()).escape_state(), EscapeState::NoEscape);
    assert_eq!(cg.node(cg.phantom()).escape_state(), EscapeState::GlobalEscape);
}

#[test]
fn test_edges_mirror_uses() {
    let graphs = [local_pair().0, phi_chain(4).0];
    for g in &graphs {
        let cg = analyze(g);
        assert_eq!(cg.verify(), Ok(()));
    }
}

#[test]
fn test_repeated_edge_is_ignored() {
    let (g, alloc, _, _) = local_pair();
    let mut cg = analyze(&g);
    let obj = cg.ptnode(alloc).unwrap();
    let local = cg
        .node(obj)
        .uses()
        .iter()
        .copied()
        .find(|&u| cg.node(u).is_local_var())
        .unwrap();

    let edges = cg.node(local).edges().len();
    assert!(!cg.add_edge(local, obj));
    assert_eq!(cg.node(local).edges().len(), edges);
    assert_eq!(cg.verify(), Ok(()));
}

#[test]
fn test_escaping_objects_are_never_replaceable() {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let param = b.parameter(Type::Oop(OopType::of(k)));
    let stored = b.new_instance(k);
    b.store_field(param, 20, stored.obj);
    let returned = b.new_instance(k);
    let local = b.new_instance(k);
    b.store_field(returned.obj, 20, local.obj);
    b.return_value(Some(returned.obj));
    let g = b.finish();

    let cg = analyze(&g);
    for (_, node) in cg.iter() {
        if node.is_scalar_replaceable() {
            assert!(node.is_java_object());
            assert!(!node.escape_state().escapes());
        }
    }
    assert_eq!(
        cg.node(cg.ptnode(stored.alloc).unwrap()).escape_state(),
        EscapeState::GlobalEscape
    );
    assert_eq!(
        cg.node(cg.ptnode(local.alloc).unwrap()).escape_state(),
        EscapeState::GlobalEscape
    );
}

#[test]
fn test_split_aliases_stay_with_their_allocation() {
    let mut b = GraphBuilder::new();
    let k = pair(&mut b);
    let x = b.new_instance(k);
    let y = b.new_instance(k);
    let one = b.const_int(1);
    let two = b.const_int(2);
    b.store_field(x.obj, 12, one);
    b.store_field(y.obj, 12, two);
    let xv = b.load_field(x.obj, 12);
    let yv = b.load_field(y.obj, 12);
    let sum = b.int_add(xv, yv);
    b.return_value(Some(sum));
    let mut g = b.finish();

    Escape::new().analyze(&mut g).unwrap();

    let accesses: Vec<NodeId> = g
        .ids()
        .filter(|&n| g.op(n).is_access())
        .collect();
    assert_eq!(accesses.len(), 4);
    for access in accesses {
        let adr = g.input(access, ADDRESS_INPUT).unwrap();
        assert_eq!(g.op(adr), Operator::AddP);
        let owner = g.ty(adr).oop().and_then(|o| o.instance);
        let alias = g.access_alias(access);
        assert_eq!(g.aliases().instance_of(alias), owner);
        assert!(owner == Some(x.alloc) || owner == Some(y.alloc));
    }
    assert!(g.verify().is_ok());
}
