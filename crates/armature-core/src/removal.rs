//! Graceful node removal.
//!
//! Deleting a node must leave no dangling addresses behind: functions that
//! read or write its parameters are unbound in place, references pointing at
//! it are nulled, and its own outgoing links drop their back-references on
//! the surviving nodes. The protocol runs strictly in that order and then
//! erases the node and its logbook records. Removal that would rewire the
//! execution graph is rejected while the graph is frozen.
//!
//! There is no rollback: a failure mid-protocol leaves the teardown done so
//! far in place.

use crate::address::{Address, NodeId, ParamAddr};
use crate::error::ModelError;
use crate::model::{ExecutionScope, Model};
use crate::node::{Node, ObserverKind};
use crate::param::{ParamData, ParamKind};

/// Callbacks invoked while a node is dismantled.
///
/// `before_remove` fires once per node entering the protocol, including
/// every descendant of a recursive delete. `before_remove_reference` fires
/// for each external reference parameter about to lose a target that points
/// into the dying node.
pub trait RemovalHooks {
    fn before_remove(&mut self, model: &Model, node: NodeId) {
        let _ = (model, node);
    }

    fn before_remove_reference(&mut self, model: &Model, referrer: ParamAddr, target: Address) {
        let _ = (model, referrer, target);
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl RemovalHooks for DefaultHooks {}

impl Model {
    /// Deletes a node and its whole subtree, dismantling references both
    /// ways. See [`module docs`](self) for the protocol.
    pub fn delete_node(&mut self, id: NodeId, scope: &ExecutionScope) -> Result<(), ModelError> {
        self.delete_node_with(id, scope, &mut DefaultHooks)
    }

    /// [`Model::delete_node`] with application hooks.
    pub fn delete_node_with(
        &mut self,
        id: NodeId,
        scope: &ExecutionScope,
        hooks: &mut dyn RemovalHooks,
    ) -> Result<(), ModelError> {
        if !self.store.contains(id) {
            return Err(ModelError::NodeNotFound(id));
        }
        self.delete_recursive(id, scope, hooks)
    }

    fn delete_recursive(
        &mut self,
        id: NodeId,
        scope: &ExecutionScope,
        hooks: &mut dyn RemovalHooks,
    ) -> Result<(), ModelError> {
        // Detach from the tree first. On recursion the parent is already
        // gone; just drop the stale link then.
        match self.node(id).and_then(Node::parent) {
            Some(p) if self.store.contains(p) => self.remove_child(p, id)?,
            Some(_) => {
                if let Some(n) = self.node_mut(id) {
                    n.parent = None;
                }
            }
            None => {}
        }

        let children = self
            .node(id)
            .map(|n| n.children().to_vec())
            .unwrap_or_default();

        self.remove_single(id, scope, hooks)?;

        for child in children {
            if self.store.contains(child) {
                self.delete_recursive(child, scope, hooks)?;
            }
        }
        Ok(())
    }

    /// Tears one node out of the model. Children are not visited here.
    fn remove_single(
        &mut self,
        id: NodeId,
        scope: &ExecutionScope,
        hooks: &mut dyn RemovalHooks,
    ) -> Result<(), ModelError> {
        hooks.before_remove(self, id);

        // Functions reading our parameters lose all their bindings in
        // place. Entries that no longer resolve are stale leftovers of
        // earlier removals and are skipped.
        let readers = self
            .node(id)
            .map(|n| n.input_readers().to_vec())
            .unwrap_or_default();
        for reader in readers {
            self.unbind_observer_function(reader, scope)?;
        }

        let writers = self
            .node(id)
            .map(|n| n.output_writers().to_vec())
            .unwrap_or_default();
        for writer in writers {
            self.unbind_observer_function(writer, scope)?;
        }

        // References pointing at us are nulled; list occurrences of the
        // node and of every one of its parameters are dropped one by one.
        let referrers = self
            .node(id)
            .map(|n| n.referrers().to_vec())
            .unwrap_or_default();
        let own_params = self
            .node(id)
            .map(Node::parameter_addrs)
            .unwrap_or_default();

        for referrer in referrers {
            let kind = match self.param(referrer) {
                Some(p) => p.kind(),
                None => continue,
            };
            match kind {
                ParamKind::Reference => {
                    let target = self
                        .param(referrer)
                        .and_then(|p| p.reference().ok())
                        .and_then(|r| r.target());
                    if let Some(t) = target {
                        hooks.before_remove_reference(self, referrer, t);
                    }
                    let stamp = self.next_stamp();
                    if let Some(p) = self.param_mut(referrer) {
                        p.reference_mut()?.target = None;
                        p.mtime = stamp;
                    }
                }
                ParamKind::ReferenceList => {
                    let mut candidates = Vec::with_capacity(own_params.len() + 1);
                    candidates.push(Address::Node(id));
                    candidates.extend(own_params.iter().map(|p| Address::Param(*p)));
                    for cand in candidates {
                        let held = self
                            .param(referrer)
                            .and_then(|p| p.reference_list().ok())
                            .map(|l| l.contains(&cand))
                            .unwrap_or(false);
                        if !held {
                            continue;
                        }
                        hooks.before_remove_reference(self, referrer, cand);
                        let stamp = self.next_stamp();
                        if let Some(p) = self.param_mut(referrer) {
                            p.reference_list_mut()?.remove_occurrences(&cand);
                            p.mtime = stamp;
                        }
                    }
                }
                _ => return Err(ModelError::BadReferrer(referrer)),
            }
        }

        // Our own parameters give up their outgoing links: functions are
        // disconnected completely, references drop the back-references
        // they hold on surviving nodes.
        for addr in &own_params {
            let data = match self.param(*addr) {
                Some(p) => p.data().clone(),
                None => continue,
            };
            match data {
                ParamData::TreeFunction(f) => {
                    if f.is_connected() && scope.is_frozen() {
                        return Err(ModelError::GraphFrozen);
                    }
                    self.disconnect_function(*addr, true)?;
                }
                ParamData::Reference(r) => {
                    if let Some(t) = r.target() {
                        if t.node_id() != id {
                            self.remove_observer(t.node_id(), ObserverKind::Referrers, addr);
                        }
                    }
                }
                ParamData::ReferenceList(l) => {
                    for t in l.targets() {
                        if t.node_id() != id {
                            self.remove_observer(t.node_id(), ObserverKind::Referrers, addr);
                        }
                    }
                }
                ParamData::Scalar(_) => {}
            }
        }

        self.store.take(id);
        self.logbook.clear_node(id);
        Ok(())
    }

    /// Raw soft disconnect of a function found in an observer list. Clears
    /// the function's own bindings without walking third-party observer
    /// lists; those stale entries are tolerated and cleaned lazily.
    fn unbind_observer_function(
        &mut self,
        func: ParamAddr,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        if self.param(func).is_none() {
            return Ok(());
        }
        if scope.is_frozen() {
            return Err(ModelError::GraphFrozen);
        }
        let stamp = self.next_stamp();
        if let Some(p) = self.param_mut(func) {
            p.tree_function_mut()?.disconnect(false);
            p.mtime = stamp;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ParamId;
    use crate::blueprint::Blueprint;
    use crate::value::Value;

    const P_RADIUS: ParamId = 0;
    const P_MATERIAL: ParamId = 2;
    const P_MATES: ParamId = 3;
    const P_UPDATE: ParamId = 4;

    fn part_blueprint() -> Blueprint {
        Blueprint::new("part")
            .expressible_scalar(P_RADIUS, "radius", 1.0)
            .scalar(1, "count", 4i64)
            .reference(P_MATERIAL, "material")
            .reference_list(P_MATES, "mates")
            .tree_function(P_UPDATE, "update")
    }

    fn rig(nodes: usize) -> (Model, Vec<NodeId>) {
        let bp = part_blueprint();
        let mut model = Model::new();
        let ids = (0..nodes).map(|_| model.create_node(&bp)).collect();
        (model, ids)
    }

    fn open() -> ExecutionScope {
        ExecutionScope::new()
    }

    #[test]
    fn test_delete_missing_node() {
        let (mut model, _) = rig(0);
        assert_eq!(
            model.delete_node(42, &open()),
            Err(ModelError::NodeNotFound(42))
        );
    }

    #[test]
    fn test_delete_nulls_incoming_reference() {
        let (mut model, ids) = rig(2);
        let (a, b) = (ids[0], ids[1]);
        model
            .connect_reference(a, P_MATERIAL, Address::Node(b), &open())
            .unwrap();

        model.delete_node(b, &open()).unwrap();

        assert!(!model.is_attached(b));
        assert_eq!(model.reference_target(a, P_MATERIAL).unwrap(), None);
    }

    #[test]
    fn test_delete_scrubs_reference_list_occurrences() {
        let (mut model, ids) = rig(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let scope = open();
        for target in [
            Address::Node(b),
            Address::Param(ParamAddr::user(b, P_RADIUS)),
            Address::Node(c),
        ] {
            model
                .append_reference_to_list(a, P_MATES, target, &scope)
                .unwrap();
        }

        model.delete_node(b, &scope).unwrap();

        assert_eq!(
            model.reference_list_targets(a, P_MATES).unwrap(),
            &[Address::Node(c)]
        );
        // The back-reference on the survivor is untouched.
        assert_eq!(
            model.node(c).unwrap().referrers(),
            &[ParamAddr::user(a, P_MATES)]
        );
    }

    #[test]
    fn test_delete_unbinds_reading_function_in_place() {
        let (mut model, ids) = rig(2);
        let (a, b) = (ids[0], ids[1]);
        let func = ParamAddr::user(a, P_UPDATE);
        model
            .connect_tree_function(
                a,
                P_UPDATE,
                "demo.update",
                &[ParamAddr::user(b, P_RADIUS)],
                &[ParamAddr::user(a, P_RADIUS)],
                &open(),
            )
            .unwrap();

        model.delete_node(b, &open()).unwrap();

        // The function lost its bindings but keeps its driver claim.
        let data = model.function_data(func).unwrap();
        assert_eq!(data.driver(), Some("demo.update"));
        assert!(data.arguments().is_empty());
        assert!(data.results().is_empty());
        assert!(model.functions().any(|f| f == func));
    }

    #[test]
    fn test_frozen_graph_blocks_removal_of_read_node() {
        let (mut model, ids) = rig(2);
        let (a, b) = (ids[0], ids[1]);
        model
            .connect_tree_function(
                a,
                P_UPDATE,
                "demo.update",
                &[ParamAddr::user(b, P_RADIUS)],
                &[],
                &open(),
            )
            .unwrap();

        let frozen = ExecutionScope::frozen();
        assert_eq!(
            model.delete_node(b, &frozen),
            Err(ModelError::GraphFrozen)
        );
        assert!(model.is_attached(b));
    }

    #[test]
    fn test_frozen_graph_blocks_removal_of_function_owner() {
        let (mut model, ids) = rig(2);
        let (a, b) = (ids[0], ids[1]);
        model
            .connect_tree_function(
                a,
                P_UPDATE,
                "demo.update",
                &[ParamAddr::user(b, P_RADIUS)],
                &[],
                &open(),
            )
            .unwrap();

        let frozen = ExecutionScope::frozen();
        assert_eq!(model.delete_node(a, &frozen), Err(ModelError::GraphFrozen));
    }

    #[test]
    fn test_delete_function_owner_cleans_foreign_observers() {
        let (mut model, ids) = rig(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        model
            .connect_tree_function(
                a,
                P_UPDATE,
                "demo.update",
                &[ParamAddr::user(b, P_RADIUS)],
                &[ParamAddr::user(c, P_RADIUS)],
                &open(),
            )
            .unwrap();

        model.delete_node(a, &open()).unwrap();

        assert!(model.node(b).unwrap().input_readers().is_empty());
        assert!(model.node(c).unwrap().output_writers().is_empty());
        assert_eq!(model.functions().count(), 0);
    }

    #[test]
    fn test_delete_owner_of_outgoing_references_cleans_backrefs() {
        let (mut model, ids) = rig(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let scope = open();
        model
            .connect_reference(a, P_MATERIAL, Address::Node(b), &scope)
            .unwrap();
        model
            .append_reference_to_list(a, P_MATES, Address::Node(c), &scope)
            .unwrap();

        model.delete_node(a, &scope).unwrap();

        assert!(model.node(b).unwrap().referrers().is_empty());
        assert!(model.node(c).unwrap().referrers().is_empty());
    }

    #[test]
    fn test_recursive_delete_takes_subtree_and_cleans_links() {
        let (mut model, ids) = rig(4);
        let (root, mid, leaf, outside) = (ids[0], ids[1], ids[2], ids[3]);
        let scope = open();
        model.add_child(root, mid).unwrap();
        model.add_child(mid, leaf).unwrap();
        model
            .connect_reference(outside, P_MATERIAL, Address::Node(leaf), &scope)
            .unwrap();

        model.delete_node(root, &scope).unwrap();

        for id in [root, mid, leaf] {
            assert!(!model.is_attached(id));
        }
        assert!(model.is_attached(outside));
        assert_eq!(model.reference_target(outside, P_MATERIAL).unwrap(), None);
    }

    #[test]
    fn test_delete_sweeps_logbook() {
        let (mut model, ids) = rig(1);
        let a = ids[0];
        model.set_scalar(a, P_RADIUS, 3.5).unwrap();
        assert!(model
            .logbook()
            .is_touched(&Address::Param(ParamAddr::user(a, P_RADIUS))));

        model.delete_node(a, &open()).unwrap();
        assert!(!model
            .logbook()
            .is_touched(&Address::Param(ParamAddr::user(a, P_RADIUS))));
    }

    #[derive(Default)]
    struct Recorder {
        removed: Vec<NodeId>,
        dropped: Vec<(ParamAddr, Address)>,
    }

    impl RemovalHooks for Recorder {
        fn before_remove(&mut self, _model: &Model, node: NodeId) {
            self.removed.push(node);
        }

        fn before_remove_reference(&mut self, _model: &Model, referrer: ParamAddr, target: Address) {
            self.dropped.push((referrer, target));
        }
    }

    #[test]
    fn test_hooks_observe_teardown() {
        let (mut model, ids) = rig(3);
        let (root, child, other) = (ids[0], ids[1], ids[2]);
        let scope = open();
        model.add_child(root, child).unwrap();
        model
            .connect_reference(other, P_MATERIAL, Address::Node(child), &scope)
            .unwrap();
        model
            .append_reference_to_list(other, P_MATES, Address::Param(ParamAddr::user(child, P_RADIUS)), &scope)
            .unwrap();

        let mut recorder = Recorder::default();
        model.delete_node_with(root, &scope, &mut recorder).unwrap();

        assert_eq!(recorder.removed, vec![root, child]);
        assert!(recorder
            .dropped
            .contains(&(ParamAddr::user(other, P_MATERIAL), Address::Node(child))));
        assert!(recorder.dropped.contains(&(
            ParamAddr::user(other, P_MATES),
            Address::Param(ParamAddr::user(child, P_RADIUS))
        )));
    }

    #[test]
    fn test_stale_value_write_after_delete_fails() {
        let (mut model, ids) = rig(1);
        let a = ids[0];
        model.delete_node(a, &open()).unwrap();
        assert_eq!(
            model.set_scalar(a, P_RADIUS, Value::Real(2.0)),
            Err(ModelError::ParamNotFound(ParamAddr::user(a, P_RADIUS)))
        );
    }
}
