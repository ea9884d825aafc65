//! Sea-of-Nodes graph for one compilation unit.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are addressed by [`NodeId`]
//! - **Use-def chains**: every input edge is mirrored in a use list
//! - **Compilation metadata**: the class, method and alias tables the
//!   nodes refer to
//! - **Mutation primitives**: the only ways passes change existing nodes
//!   (`set_type`, `replace_input`, `set_memory_at`, `alias_index_of`)
//!
//! The graph is exclusively owned by the compilation; analyses borrow it
//! immutably and only the memory-splitting phase borrows it mutably.

use super::alias::{AliasIdx, AliasTable};
use super::arena::{Arena, SecondaryMap};
use super::meta::{KlassTable, MethodTable};
use super::node::{InputList, Node, NodeFlags, NodeId};
use super::operators::{ADDRESS_INPUT, ControlOp, MemoryOp, Operator};
use super::types::Type;

// =============================================================================
// Graph Structure
// =============================================================================

#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    uses: SecondaryMap<Node, Vec<NodeId>>,

    /// Entry node; projections give initial control, memory and arguments.
    pub start: NodeId,
    /// Exit sink; inputs are the method's returns and throws.
    pub end: NodeId,
    /// Shared placeholder for empty merge-memory slots.
    pub top: NodeId,

    klasses: KlassTable,
    methods: MethodTable,
    aliases: AliasTable,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_metadata(KlassTable::new(), MethodTable::new())
    }

    /// Graph over existing class and method tables.
    pub fn with_metadata(klasses: KlassTable, methods: MethodTable) -> Self {
        let mut nodes = Arena::with_capacity(256);
        let start = nodes.alloc(Node::new(
            Operator::Control(ControlOp::Start),
            InputList::new(),
        ));
        let top = nodes.alloc(Node::new(Operator::Top, InputList::new()));
        let end = nodes.alloc(Node::new(
            Operator::Control(ControlOp::End),
            InputList::new(),
        ));

        Graph {
            nodes,
            uses: SecondaryMap::with_capacity(256),
            start,
            end,
            top,
            klasses,
            methods,
            aliases: AliasTable::new(),
        }
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    #[inline]
    pub fn ty(&self, id: NodeId) -> Type {
        self.nodes[id].ty
    }

    /// Input `index` of `id`, if present.
    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id].input(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the fixed start/top/end nodes exist.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 3
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Snapshot of the current ids; stays valid while nodes are added.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        self.nodes.ids()
    }

    pub fn klasses(&self) -> &KlassTable {
        &self.klasses
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn klasses_mut(&mut self) -> &mut KlassTable {
        &mut self.klasses
    }

    pub fn methods_mut(&mut self) -> &mut MethodTable {
        &mut self.methods
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node typed with its operator's default type.
    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        self.add_node_with_type(op, inputs, op.result_type())
    }

    pub fn add_node_with_type(&mut self, op: Operator, inputs: &[NodeId], ty: Type) -> NodeId {
        let id = self
            .nodes
            .alloc(Node::with_type(op, InputList::from_slice(inputs), ty));
        for &input in inputs {
            self.add_use(input, id);
        }
        id
    }

    /// Register a return or throw with the exit node.
    pub fn add_exit(&mut self, exit: NodeId) {
        let end = self.end;
        self.add_input(end, exit);
    }

    // =========================================================================
    // Use-Def Chains
    // =========================================================================

    /// Nodes that have `id` as an input (once per input slot).
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn add_use(&mut self, def: NodeId, user: NodeId) {
        self.uses.resize(def.as_usize() + 1);
        if let Some(uses) = self.uses.get_mut(def) {
            uses.push(user);
        }
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        if let Some(uses) = self.uses.get_mut(def) {
            if let Some(pos) = uses.iter().position(|&u| u == user) {
                uses.swap_remove(pos);
            }
        }
    }

    // =========================================================================
    // Mutation Primitives
    // =========================================================================

    /// Narrow the type of `id` (retype node).
    pub fn set_type(&mut self, id: NodeId, ty: Type) {
        let node = &mut self.nodes[id];
        node.ty = ty;
        node.flags.insert(NodeFlags::RETYPED);
    }

    /// Record `flags` on `id`.
    pub fn mark(&mut self, id: NodeId, flags: NodeFlags) {
        self.nodes[id].flags.insert(flags);
    }

    /// Replace input `index` of `node` (rewire a memory or value input).
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let Some(old) = self.nodes[node].input(index) else {
            return;
        };
        if old == new_input {
            return;
        }
        self.remove_use(old, node);
        self.nodes[node].inputs[index] = new_input;
        self.add_use(new_input, node);
    }

    /// Append an input to `node`.
    pub fn add_input(&mut self, node: NodeId, input: NodeId) {
        self.nodes[node].inputs.push(input);
        self.add_use(input, node);
    }

    /// Memory state for `alias` in merge-memory node `mm`.
    ///
    /// Empty slots fall back to the base memory in slot 0.
    pub fn memory_at(&self, mm: NodeId, alias: AliasIdx) -> NodeId {
        let node = &self.nodes[mm];
        debug_assert!(matches!(node.op, Operator::Memory(MemoryOp::MergeMem)));
        match node.input(alias as usize) {
            Some(slot) if slot != self.top => slot,
            _ => node.input(0).unwrap_or(self.top),
        }
    }

    /// Whether `mm` has a dedicated slot for `alias`.
    pub fn has_memory_slot(&self, mm: NodeId, alias: AliasIdx) -> bool {
        alias != 0
            && self.nodes[mm]
                .input(alias as usize)
                .is_some_and(|slot| slot != self.top)
    }

    /// Install `mem` as the slice for `alias` in merge-memory node `mm`.
    pub fn set_memory_at(&mut self, mm: NodeId, alias: AliasIdx, mem: NodeId) {
        let slot = alias as usize;
        while self.nodes[mm].inputs.len() <= slot {
            let top = self.top;
            self.add_input(mm, top);
        }
        self.replace_input(mm, slot, mem);
    }

    /// Alias class of an address type, registering it on first use
    /// (allocate alias bucket).
    pub fn alias_index_of(&mut self, ty: &Type) -> AliasIdx {
        self.aliases.index_of(&self.klasses, ty)
    }

    /// Alias class touched by an access node.
    pub fn access_alias(&mut self, access: NodeId) -> AliasIdx {
        debug_assert!(self.nodes[access].op.is_access());
        let ty = self
            .input(access, ADDRESS_INPUT)
            .map_or(Type::Bottom, |adr| self.ty(adr));
        self.alias_index_of(&ty)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check that inputs are in range and use lists mirror them exactly.
    pub fn verify(&self) -> Result<(), String> {
        for (id, node) in self.iter() {
            for input in node.inputs.iter() {
                if !self.nodes.contains(*input) {
                    return Err(format!("node {:?} has invalid input {:?}", id, input));
                }
                let in_edges = node.inputs.iter().filter(|&&i| i == *input).count();
                let use_edges = self.uses(*input).iter().filter(|&&u| u == id).count();
                if in_edges != use_edges {
                    return Err(format!(
                        "use list of {:?} records {} uses by {:?}, expected {}",
                        input, use_edges, id, in_edges
                    ));
                }
            }
        }
        if !self.nodes[self.start].inputs.is_empty() {
            return Err("start node should have no inputs".into());
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
