//! Nodes and their observer registry.
//!
//! A node owns its parameters outright and additionally carries three
//! back-reference lists describing who points at it from elsewhere. The
//! lists are maintained by the link operations on [`Model`](crate::Model);
//! nothing here touches other nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{NodeId, ParamAddr, ParamId, ParamSlot};
use crate::param::Parameter;

/// The three observer categories a node tracks.
///
/// Input readers are tree functions consuming one of this node's parameters
/// as an argument, output writers are functions producing into one, and
/// referrers are reference parameters targeting this node or its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObserverKind {
    InputReaders,
    OutputWriters,
    Referrers,
}

/// Ordered back-reference lists. Duplicates are rejected on insertion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observers {
    pub(crate) input_readers: Vec<ParamAddr>,
    pub(crate) output_writers: Vec<ParamAddr>,
    pub(crate) referrers: Vec<ParamAddr>,
}

impl Observers {
    pub fn list(&self, kind: ObserverKind) -> &[ParamAddr] {
        match kind {
            ObserverKind::InputReaders => &self.input_readers,
            ObserverKind::OutputWriters => &self.output_writers,
            ObserverKind::Referrers => &self.referrers,
        }
    }

    fn list_mut(&mut self, kind: ObserverKind) -> &mut Vec<ParamAddr> {
        match kind {
            ObserverKind::InputReaders => &mut self.input_readers,
            ObserverKind::OutputWriters => &mut self.output_writers,
            ObserverKind::Referrers => &mut self.referrers,
        }
    }

    pub fn contains(&self, kind: ObserverKind, observer: &ParamAddr) -> bool {
        self.list(kind).contains(observer)
    }

    /// Appends an observer, skipping the insertion if it is already listed.
    /// Returns whether the list changed.
    pub(crate) fn append(&mut self, kind: ObserverKind, observer: ParamAddr) -> bool {
        let list = self.list_mut(kind);
        if list.contains(&observer) {
            return false;
        }
        list.push(observer);
        true
    }

    /// Like [`Observers::append`] but inserts at the front.
    pub(crate) fn prepend(&mut self, kind: ObserverKind, observer: ParamAddr) -> bool {
        let list = self.list_mut(kind);
        if list.contains(&observer) {
            return false;
        }
        list.insert(0, observer);
        true
    }

    /// Removes the first occurrence of an observer. Returns whether one was
    /// found.
    pub(crate) fn remove(&mut self, kind: ObserverKind, observer: &ParamAddr) -> bool {
        let list = self.list_mut(kind);
        match list.iter().position(|o| o == observer) {
            Some(at) => {
                list.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_readers.is_empty() && self.output_writers.is_empty() && self.referrers.is_empty()
    }
}

/// A persistent object in the model: typed parameters, tree position and
/// observer lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) type_name: String,
    pub(crate) name: String,
    pub(crate) user_flags: u32,
    /// Blueprint-declared parameters, keyed by their public id.
    pub(crate) params: BTreeMap<ParamId, Parameter>,
    /// Hidden evaluator functions, keyed by their internal tag.
    pub(crate) eval_funcs: BTreeMap<ParamId, Parameter>,
    /// User parameter id to evaluator tag, for expressible scalars.
    pub(crate) expressible: BTreeMap<ParamId, ParamId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) observers: Observers,
}

impl Node {
    pub(crate) fn new(id: NodeId, type_name: &str) -> Self {
        Node {
            id,
            type_name: type_name.to_string(),
            name: String::new(),
            user_flags: 0,
            params: BTreeMap::new(),
            eval_funcs: BTreeMap::new(),
            expressible: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
            observers: Observers::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user_flags(&self) -> u32 {
        self.user_flags
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// One-based child accessor, matching how modeling trees are usually
    /// numbered in UIs.
    pub fn child(&self, number: usize) -> Option<NodeId> {
        if number == 0 {
            return None;
        }
        self.children.get(number - 1).copied()
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// A blueprint-declared parameter by id.
    pub fn parameter(&self, id: ParamId) -> Option<&Parameter> {
        self.params.get(&id)
    }

    /// Resolves any slot, including hidden evaluator tags.
    pub fn parameter_at(&self, slot: ParamSlot) -> Option<&Parameter> {
        match slot {
            ParamSlot::User(id) => self.params.get(&id),
            ParamSlot::Eval(tag) => self.eval_funcs.get(&tag),
        }
    }

    pub(crate) fn parameter_at_mut(&mut self, slot: ParamSlot) -> Option<&mut Parameter> {
        match slot {
            ParamSlot::User(id) => self.params.get_mut(&id),
            ParamSlot::Eval(tag) => self.eval_funcs.get_mut(&tag),
        }
    }

    /// Iterates blueprint-declared parameters in id order.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }

    /// Iterates every parameter, user scope first, then evaluator functions.
    pub fn all_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values().chain(self.eval_funcs.values())
    }

    /// All parameter addresses of this node, user scope first.
    pub fn parameter_addrs(&self) -> Vec<ParamAddr> {
        self.params
            .keys()
            .map(|id| ParamAddr::user(self.id, *id))
            .chain(self.eval_funcs.keys().map(|tag| ParamAddr::eval(self.id, *tag)))
            .collect()
    }

    /// True if a user parameter has a backing evaluator slot.
    pub fn is_expressible(&self, id: ParamId) -> bool {
        self.expressible.contains_key(&id)
    }

    /// The evaluator tag backing a user parameter, if declared expressible.
    pub fn evaluator_tag(&self, id: ParamId) -> Option<ParamId> {
        self.expressible.get(&id).copied()
    }

    /// The hidden evaluator function backing a user parameter.
    pub fn evaluator(&self, id: ParamId) -> Option<&Parameter> {
        self.evaluator_tag(id).and_then(|tag| self.eval_funcs.get(&tag))
    }

    pub fn input_readers(&self) -> &[ParamAddr] {
        &self.observers.input_readers
    }

    pub fn output_writers(&self) -> &[ParamAddr] {
        &self.observers.output_writers
    }

    pub fn referrers(&self) -> &[ParamAddr] {
        &self.observers.referrers
    }

    /// Structural self-check: every parameter is stored where its recorded
    /// owner and slot say it is.
    pub fn is_well_formed(&self) -> bool {
        self.params
            .iter()
            .all(|(id, p)| p.is_consistent_at(self.id, ParamSlot::User(*id)))
            && self
                .eval_funcs
                .iter()
                .all(|(tag, p)| p.is_consistent_at(self.id, ParamSlot::Eval(*tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamData;
    use crate::value::Value;

    #[test]
    fn test_observer_dedup_and_order() {
        let mut obs = Observers::default();
        let a = ParamAddr::user(1, 0);
        let b = ParamAddr::user(2, 0);
        let c = ParamAddr::eval(3, 1);

        assert!(obs.append(ObserverKind::InputReaders, a));
        assert!(obs.append(ObserverKind::InputReaders, b));
        assert!(!obs.append(ObserverKind::InputReaders, a));
        assert!(obs.prepend(ObserverKind::InputReaders, c));
        assert_eq!(obs.list(ObserverKind::InputReaders), &[c, a, b]);

        assert!(obs.remove(ObserverKind::InputReaders, &a));
        assert!(!obs.remove(ObserverKind::InputReaders, &a));
        assert_eq!(obs.list(ObserverKind::InputReaders), &[c, b]);
    }

    #[test]
    fn test_observer_lists_are_independent() {
        let mut obs = Observers::default();
        let a = ParamAddr::user(1, 0);
        obs.append(ObserverKind::Referrers, a);
        assert!(obs.contains(ObserverKind::Referrers, &a));
        assert!(!obs.contains(ObserverKind::InputReaders, &a));
        assert!(!obs.is_empty());
    }

    #[test]
    fn test_child_numbering_is_one_based() {
        let mut node = Node::new(1, "asm");
        node.children = vec![10, 11, 12];
        assert_eq!(node.child(0), None);
        assert_eq!(node.child(1), Some(10));
        assert_eq!(node.child(3), Some(12));
        assert_eq!(node.child(4), None);
    }

    #[test]
    fn test_well_formed_catches_misplaced_params() {
        let mut node = Node::new(4, "part");
        node.params.insert(
            0,
            Parameter::new(4, ParamSlot::User(0), "radius", ParamData::Scalar(Value::Real(1.0))),
        );
        assert!(node.is_well_formed());

        // Simulate a bad id rewrite after a copy.
        node.params.get_mut(&0).unwrap().owner = 9;
        assert!(!node.is_well_formed());
    }
}
