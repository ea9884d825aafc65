//! Escape Analysis.
//!
//! Connection-graph escape analysis over the Sea-of-Nodes IR. For every
//! allocation the pass decides whether the object can be seen outside the
//! compiled method, whether its fields can be replaced by scalars, and
//! then gives each replaceable object its own alias class so later passes
//! see its memory as disjoint from the rest of the heap.
//!
//! # Phases
//!
//! 1. [`build`]: map pointer-producing IR nodes to a points-to graph.
//! 2. [`complete`]: propagate references and escape states to a fixed
//!    point, within an iteration and time budget.
//! 3. [`classify`]: clear scalar replaceability where field identity
//!    cannot be preserved.
//! 4. [`split`]: retype instance pointers and split memory per instance.
//!
//! The first three phases only read the IR. A bailout in any phase leaves
//! the graph unmodified and produces a pessimistic [`EscapeSummary`].

mod build;
mod classify;
mod complete;
pub mod observer;
pub mod points_to;
pub mod split;

pub use observer::{EscapeObserver, EscapePhase, EscapeStats, NoopObserver};
pub use points_to::{
    ConnectionGraph, EscapeState, FieldData, PointsToFlags, PointsToKind, PointsToNode, PtId,
};
pub use split::split_unique_types;

use std::fmt;
use std::time::Duration;

use rustc_hash::FxHashMap;

use super::OptimizationPass;
use crate::ir::alias::AliasIdx;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{CALL_ARGS, ControlOp, Operator};

/// Input index of the object on `Lock` and `Unlock`.
const LOCK_OBJECT: usize = 2;

/// Input index of the first live value on a `SafePoint`.
const SAFEPOINT_LIVE: usize = 2;

// =============================================================================
// Configuration
// =============================================================================

/// Escape analysis configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeConfig {
    /// Propagation rounds allowed, counting the final round that adds
    /// nothing.
    pub max_iterations: usize,
    /// Wall-clock budget for completion.
    pub timeout: Duration,
    /// Longest constant-length array that may be scalar replaced.
    pub max_array_length: usize,
    /// Most declared fields an instance may have and still be replaced.
    pub max_instance_fields: usize,
    /// Mark non-escaping allocations scalar replaceable.
    pub eliminate_allocations: bool,
    /// Retype replaceable objects and split their memory.
    pub split_unique_types: bool,
}

impl Default for EscapeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            timeout: Duration::from_secs(20),
            max_array_length: 64,
            max_instance_fields: 512,
            eliminate_allocations: true,
            split_unique_types: true,
        }
    }
}

impl EscapeConfig {
    /// Escape states only: nothing is marked replaceable and the IR is
    /// never rewritten.
    pub fn analysis_only() -> Self {
        Self {
            eliminate_allocations: false,
            split_unique_types: false,
            ..Self::default()
        }
    }

    /// Larger budgets for hot methods.
    pub fn aggressive() -> Self {
        Self {
            max_iterations: 40,
            timeout: Duration::from_secs(60),
            max_array_length: 128,
            ..Self::default()
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Why escape analysis gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeError {
    /// Completion did not converge within the configured rounds.
    IterationLimit { iterations: usize },
    /// Completion ran out of its time budget.
    Timeout { elapsed: Duration },
    /// The observer asked to stop.
    Cancelled,
    /// Memory splitting met a use it cannot rewrite.
    SplitInvalidated { node: NodeId, reason: &'static str },
}

impl EscapeError {
    /// The compilation must be retried with escape analysis disabled.
    pub fn requires_retry(&self) -> bool {
        matches!(self, EscapeError::SplitInvalidated { .. })
    }
}

impl fmt::Display for EscapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscapeError::IterationLimit { iterations } => {
                write!(f, "Escape analysis did not converge after {} iterations", iterations)
            }
            EscapeError::Timeout { elapsed } => {
                write!(f, "Escape analysis timed out after {:?}", elapsed)
            }
            EscapeError::Cancelled => write!(f, "Escape analysis cancelled"),
            EscapeError::SplitInvalidated { node, reason } => {
                write!(f, "Memory split invalidated at {}: {}", node, reason)
            }
        }
    }
}

impl std::error::Error for EscapeError {}

/// Result type for escape analysis operations.
pub type EscapeResult<T> = Result<T, EscapeError>;

impl ConnectionGraph {
    /// Build, complete and classify the connection graph of `graph`.
    ///
    /// Classification only runs when completion reached its fixed point.
    pub fn compute(
        graph: &Graph,
        config: &EscapeConfig,
        observer: &mut dyn EscapeObserver,
    ) -> EscapeResult<ConnectionGraph> {
        observer.on_phase(EscapePhase::Build);
        let mut cg = ConnectionGraph::build(graph, config, observer);

        observer.on_phase(EscapePhase::Complete);
        if cg.complete(config, observer)? {
            observer.on_phase(EscapePhase::Classify);
            cg.classify(graph, observer);
        }
        Ok(cg)
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Outcome for one allocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    /// The `Allocate` or `AllocateArray` node.
    pub node: NodeId,
    pub escape_state: EscapeState,
    pub scalar_replaceable: bool,
}

/// What is live at a safepoint or call, for deoptimization metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafepointEscapeInfo {
    /// Every live reference points only to non-escaping objects.
    pub only_local_objects: bool,
    /// Some live reference points to a non-escaping object.
    pub has_non_escaping_obj: bool,
}

/// Results handed to later passes.
#[derive(Debug, Clone, Default)]
pub struct EscapeSummary {
    allocations: Vec<AllocationInfo>,
    by_node: FxHashMap<NodeId, usize>,
    eliminable_locks: Vec<NodeId>,
    safepoints: FxHashMap<NodeId, SafepointEscapeInfo>,
    call_args: FxHashMap<NodeId, Vec<EscapeState>>,
    new_aliases: Vec<AliasIdx>,
    bailout: Option<EscapeError>,
}

impl EscapeSummary {
    /// Summary of an analysis run. Answers are pessimistic where
    /// completion stopped before its fixed point.
    pub fn new(cg: &ConnectionGraph, graph: &Graph, new_aliases: Vec<AliasIdx>) -> Self {
        let complete = cg.is_complete();
        let mut summary = EscapeSummary {
            new_aliases,
            ..Self::default()
        };

        for (n, node) in graph.iter() {
            if !node.op.is_allocation() {
                continue;
            }
            let info = match cg.ptnode(n) {
                Some(pt) => {
                    let obj = cg.node(pt);
                    let es = obj.escape_state();
                    AllocationInfo {
                        node: n,
                        escape_state: es,
                        scalar_replaceable: complete
                            && es == EscapeState::NoEscape
                            && obj.is_scalar_replaceable(),
                    }
                }
                None => AllocationInfo {
                    node: n,
                    escape_state: EscapeState::GlobalEscape,
                    scalar_replaceable: false,
                },
            };
            summary.push_allocation(info);
        }

        if !complete {
            summary.fill_pessimistic_sites(graph);
            return summary;
        }

        for &lock in &cg.locks {
            if points_only_to_local(cg, graph.input(lock, LOCK_OBJECT)) {
                summary.eliminable_locks.push(lock);
            }
        }

        for &site in &cg.safepoints {
            let first = if graph.op(site).is_call() {
                CALL_ARGS
            } else {
                SAFEPOINT_LIVE
            };
            let live = &graph.node(site).inputs[first.min(graph.node(site).inputs.len())..];

            let mut info = SafepointEscapeInfo {
                only_local_objects: true,
                has_non_escaping_obj: false,
            };
            for &v in live {
                if !graph.ty(v).is_ptr() {
                    continue;
                }
                let Some(pt) = cg.ptnode(v) else {
                    info.only_local_objects = false;
                    continue;
                };
                for obj in cg.pointees(pt) {
                    if obj == cg.null() {
                        continue;
                    }
                    if cg.node(obj).escape_state() == EscapeState::NoEscape {
                        info.has_non_escaping_obj = true;
                    } else {
                        info.only_local_objects = false;
                    }
                }
            }
            summary.safepoints.insert(site, info);

            if graph.op(site).is_call() {
                let states = live
                    .iter()
                    .map(|&v| arg_escape_state(cg, graph, v))
                    .collect();
                summary.call_args.insert(site, states);
            }
        }
        summary
    }

    /// Summary after a bailout: everything escapes and nothing was split.
    pub fn pessimistic(graph: &Graph, error: EscapeError) -> Self {
        let mut summary = EscapeSummary {
            bailout: Some(error),
            ..Self::default()
        };
        for (n, node) in graph.iter() {
            if node.op.is_allocation() {
                summary.push_allocation(AllocationInfo {
                    node: n,
                    escape_state: EscapeState::GlobalEscape,
                    scalar_replaceable: false,
                });
            }
        }
        summary.fill_pessimistic_sites(graph);
        summary
    }

    fn push_allocation(&mut self, info: AllocationInfo) {
        self.by_node.insert(info.node, self.allocations.len());
        self.allocations.push(info);
    }

    fn fill_pessimistic_sites(&mut self, graph: &Graph) {
        for (n, node) in graph.iter() {
            let is_call = node.op.is_call();
            if !is_call && node.op != Operator::Control(ControlOp::SafePoint) {
                continue;
            }
            self.safepoints.insert(n, SafepointEscapeInfo::default());
            if is_call {
                let states = node
                    .inputs
                    .iter()
                    .skip(CALL_ARGS)
                    .map(|&v| {
                        if graph.ty(v).is_ptr() {
                            EscapeState::GlobalEscape
                        } else {
                            EscapeState::NoEscape
                        }
                    })
                    .collect();
                self.call_args.insert(n, states);
            }
        }
    }

    /// All allocation sites, in node order.
    pub fn allocations(&self) -> &[AllocationInfo] {
        &self.allocations
    }

    pub fn allocation(&self, alloc: NodeId) -> Option<&AllocationInfo> {
        self.by_node.get(&alloc).map(|&i| &self.allocations[i])
    }

    /// The object allocated at `alloc` never leaves the compiled method.
    pub fn does_not_escape(&self, alloc: NodeId) -> bool {
        self.allocation(alloc)
            .is_some_and(|a| a.escape_state == EscapeState::NoEscape)
    }

    /// The fields of the object allocated at `alloc` can become scalars.
    pub fn is_scalar_replaceable(&self, alloc: NodeId) -> bool {
        self.allocation(alloc).is_some_and(|a| a.scalar_replaceable)
    }

    /// Lock and unlock nodes whose object never escapes.
    pub fn eliminable_locks(&self) -> &[NodeId] {
        &self.eliminable_locks
    }

    /// Alias classes created for split instances.
    pub fn new_alias_indices(&self) -> &[AliasIdx] {
        &self.new_aliases
    }

    pub fn safepoint(&self, node: NodeId) -> Option<SafepointEscapeInfo> {
        self.safepoints.get(&node).copied()
    }

    /// Escape state of each argument of `call`, in argument order.
    pub fn call_arg_escape(&self, call: NodeId) -> Option<&[EscapeState]> {
        self.call_args.get(&call).map(Vec::as_slice)
    }

    /// The error that made this summary pessimistic, if any.
    pub fn bailout(&self) -> Option<&EscapeError> {
        self.bailout.as_ref()
    }
}

fn points_only_to_local(cg: &ConnectionGraph, value: Option<NodeId>) -> bool {
    let Some(pt) = value.and_then(|v| cg.ptnode(v)) else {
        return false;
    };
    let mut any = false;
    for obj in cg.pointees(pt) {
        if cg.node(obj).escape_state() != EscapeState::NoEscape {
            return false;
        }
        any = true;
    }
    any
}

fn arg_escape_state(cg: &ConnectionGraph, graph: &Graph, arg: NodeId) -> EscapeState {
    if !graph.ty(arg).is_ptr() {
        return EscapeState::NoEscape;
    }
    match cg.ptnode(arg) {
        Some(pt) => cg
            .pointees(pt)
            .map(|obj| cg.node(obj).escape_state())
            .fold(EscapeState::NoEscape, EscapeState::merge),
        None => EscapeState::GlobalEscape,
    }
}

// =============================================================================
// Escape Analysis Pass
// =============================================================================

/// Escape analysis optimization pass.
pub struct Escape<O: EscapeObserver = NoopObserver> {
    config: EscapeConfig,
    observer: O,
    summary: Option<EscapeSummary>,
}

impl Escape {
    /// Create a new escape analysis pass.
    pub fn new() -> Self {
        Self::with_config(EscapeConfig::default())
    }

    pub fn with_config(config: EscapeConfig) -> Self {
        Self::with_observer(config, NoopObserver)
    }
}

impl Default for Escape {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: EscapeObserver> Escape<O> {
    /// Create a pass that reports to `observer`.
    pub fn with_observer(config: EscapeConfig, observer: O) -> Self {
        Self {
            config,
            observer,
            summary: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &EscapeConfig {
        &self.config
    }

    #[inline]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    #[inline]
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Summary of the last run, if any.
    #[inline]
    pub fn summary(&self) -> Option<&EscapeSummary> {
        self.summary.as_ref()
    }

    /// Analyze `graph` and split the memory of replaceable objects.
    ///
    /// On error the graph is unchanged and [`Escape::summary`] holds a
    /// pessimistic summary.
    pub fn analyze(&mut self, graph: &mut Graph) -> EscapeResult<&EscapeSummary> {
        match self.run_phases(graph) {
            Ok(summary) => Ok(&*self.summary.insert(summary)),
            Err(error) => {
                log::debug!("escape: bailout: {}", error);
                self.observer.on_bailout(&error);
                self.summary = Some(EscapeSummary::pessimistic(graph, error.clone()));
                Err(error)
            }
        }
    }

    fn run_phases(&mut self, graph: &mut Graph) -> EscapeResult<EscapeSummary> {
        let cg = ConnectionGraph::compute(graph, &self.config, &mut self.observer)?;
        debug_assert_eq!(cg.verify(), Ok(()));

        let mut new_aliases = Vec::new();
        if self.config.split_unique_types && cg.is_complete() {
            self.observer.on_phase(EscapePhase::Split);
            new_aliases = split_unique_types(&cg, graph)?;
        }
        Ok(EscapeSummary::new(&cg, graph, new_aliases))
    }
}

impl<O: EscapeObserver> OptimizationPass for Escape<O> {
    fn name(&self) -> &'static str {
        "escape"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        self.analyze(graph)
            .is_ok_and(|summary| !summary.new_alias_indices().is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================
