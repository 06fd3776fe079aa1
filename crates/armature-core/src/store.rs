//! The node arena.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::{Address, NodeId, ParamAddr};
use crate::node::Node;
use crate::param::Parameter;

/// Flat id-keyed storage for nodes.
///
/// Ids are handed out monotonically and never reused, so a stale address can
/// only miss, never alias a different node. A store can be created with a
/// non-zero id base; the copy/paste buffer uses a high base so buffered ids
/// never collide with ids of the model they came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: NodeId) -> Self {
        Store {
            nodes: HashMap::new(),
            next_id: base,
        }
    }

    pub(crate) fn alloc_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn put(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn take(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Resolves a parameter address, if both the node and the slot exist.
    pub fn param(&self, addr: ParamAddr) -> Option<&Parameter> {
        self.nodes.get(&addr.node)?.parameter_at(addr.slot)
    }

    pub(crate) fn param_mut(&mut self, addr: ParamAddr) -> Option<&mut Parameter> {
        self.nodes.get_mut(&addr.node)?.parameter_at_mut(addr.slot)
    }

    /// True if the address points at a live node, and for parameter
    /// addresses at a live slot of it.
    pub fn resolves(&self, addr: &Address) -> bool {
        match addr {
            Address::Node(id) => self.contains(*id),
            Address::Param(p) => self.param(*p).is_some(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in ascending order. Iteration order of the arena itself is
    /// unspecified; use this wherever determinism matters.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}
