//! The model: arena, logbook and structure maintenance.
//!
//! # Overview
//!
//! A [`Model`] owns everything: the node [`Store`], the [`LogBook`], the
//! registry of live tree functions, and a monotonic modification counter.
//! This module covers object lifecycle and tree structure; reference and
//! function wiring lives in [`links`](crate::links), removal in
//! [`removal`](crate::removal), and copy/paste in
//! [`clipboard`](crate::clipboard).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::{Address, NodeId, ParamAddr, ParamId, ParamSlot};
use crate::blueprint::{Blueprint, NodeRegistry, ParamInit};
use crate::error::{ModelError, TypeError};
use crate::logbook::LogBook;
use crate::node::Node;
use crate::param::{
    ModificationType, ParamData, Parameter, ReferenceData, ReferenceListData, TreeFunctionData,
};
use crate::store::Store;
use crate::value::Value;

/// Execution context handed to structure-changing operations.
///
/// While an execution pass walks the function graph the scope is frozen and
/// every attempt to rewire or remove graph participants fails with
/// [`ModelError::GraphFrozen`]. Outside of execution callers pass an
/// unfrozen scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionScope {
    frozen: bool,
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frozen() -> Self {
        ExecutionScope { frozen: true }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// The persistent object model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub(crate) store: Store,
    pub(crate) logbook: LogBook,
    /// Addresses of every tree function parameter that currently has a
    /// driver association, connected or not.
    pub(crate) functions: BTreeSet<ParamAddr>,
    mtime: u64,
    command: Option<u64>,
    commands_done: u64,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    // ==============================================================
    // Access
    // ==============================================================

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn logbook(&self) -> &LogBook {
        &self.logbook
    }

    pub fn logbook_mut(&mut self) -> &mut LogBook {
        &mut self.logbook
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.store.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.store.get_mut(id)
    }

    fn node_ok(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.store.get(id).ok_or(ModelError::NodeNotFound(id))
    }

    fn node_mut_ok(&mut self, id: NodeId) -> Result<&mut Node, ModelError> {
        self.store.get_mut(id).ok_or(ModelError::NodeNotFound(id))
    }

    pub fn param(&self, addr: ParamAddr) -> Option<&Parameter> {
        self.store.param(addr)
    }

    pub(crate) fn param_mut(&mut self, addr: ParamAddr) -> Option<&mut Parameter> {
        self.store.param_mut(addr)
    }

    pub(crate) fn param_ok(&self, addr: ParamAddr) -> Result<&Parameter, ModelError> {
        self.store
            .param(addr)
            .ok_or(ModelError::ParamNotFound(addr))
    }

    pub(crate) fn param_mut_ok(&mut self, addr: ParamAddr) -> Result<&mut Parameter, ModelError> {
        self.store
            .param_mut(addr)
            .ok_or(ModelError::ParamNotFound(addr))
    }

    /// A blueprint-declared parameter of a node.
    pub fn user_param(&self, node: NodeId, id: ParamId) -> Option<&Parameter> {
        self.param(ParamAddr::user(node, id))
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.store.ids()
    }

    /// Ids of nodes without a tree parent, in ascending order.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = self
            .store
            .iter()
            .filter(|n| n.parent().is_none())
            .map(|n| n.id())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// First node with the given display name, scanning in id order.
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.store
            .ids()
            .into_iter()
            .find(|id| self.store.get(*id).map(|n| n.name() == name).unwrap_or(false))
    }

    /// Addresses of all live tree function parameters, in address order.
    pub fn functions(&self) -> impl Iterator<Item = ParamAddr> + '_ {
        self.functions.iter().copied()
    }

    /// Next modification stamp. Every recorded change gets a fresh one.
    pub(crate) fn next_stamp(&mut self) -> u64 {
        self.mtime += 1;
        self.mtime
    }

    /// Stamp of the most recent recorded change.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    // ==============================================================
    // Node creation
    // ==============================================================

    /// Instantiates a node from a blueprint. The node starts detached, with
    /// every parameter at its declared initial state.
    pub fn create_node(&mut self, blueprint: &Blueprint) -> NodeId {
        let id = self.store.alloc_id();
        let stamp = self.next_stamp();
        let mut node = Node::new(id, blueprint.type_name());
        let mut next_eval_tag: ParamId = 1;

        for spec in blueprint.params() {
            let data = match &spec.init {
                ParamInit::Scalar(v) => ParamData::Scalar(v.clone()),
                ParamInit::Reference => ParamData::Reference(ReferenceData::default()),
                ParamInit::ReferenceList => ParamData::ReferenceList(ReferenceListData::default()),
                ParamInit::TreeFunction => ParamData::TreeFunction(TreeFunctionData::default()),
            };
            let mut param = Parameter::new(id, ParamSlot::User(spec.id), &spec.name, data);
            param.semantic_id = spec.semantic_id.clone();
            param.user_flags = spec.user_flags;
            param.mtime = stamp;
            node.params.insert(spec.id, param);

            if spec.expressible && matches!(spec.init, ParamInit::Scalar(_)) {
                let tag = next_eval_tag;
                next_eval_tag += 1;
                let mut eval = Parameter::new(
                    id,
                    ParamSlot::Eval(tag),
                    &format!("{} evaluator", spec.name),
                    ParamData::TreeFunction(TreeFunctionData::default()),
                );
                eval.mtime = stamp;
                node.eval_funcs.insert(tag, eval);
                node.expressible.insert(spec.id, tag);
            }
        }

        self.store.put(node);
        id
    }

    /// Creates a node of a registered type.
    pub fn create_registered(
        &mut self,
        registry: &NodeRegistry,
        type_name: &str,
    ) -> Result<NodeId, ModelError> {
        let blueprint = registry
            .get(type_name)
            .ok_or_else(|| ModelError::TypeUnknown(type_name.to_string()))?;
        Ok(self.create_node(blueprint))
    }

    // ==============================================================
    // Tree structure
    // ==============================================================

    /// Attaches `child` under `parent` and stamps both sides as impacted.
    ///
    /// The child must be detached; re-parenting goes through
    /// [`Model::remove_child`] first. A child that is the parent itself or
    /// one of its ancestors is rejected.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        self.node_ok(parent)?;
        let child_node = self.node_ok(child)?;
        if child_node.parent().is_some() {
            return Err(ModelError::HasParent(child));
        }
        if parent == child || self.is_ancestor_of(child, parent) {
            return Err(ModelError::ChildCycle { parent, child });
        }

        let stamp = self.next_stamp();
        if let Some(p) = self.store.get_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = self.store.get_mut(child) {
            c.parent = Some(parent);
        }
        self.logbook.impact(Address::Node(parent), stamp);
        self.logbook.impact(Address::Node(child), stamp);
        Ok(())
    }

    /// Detaches `child` from `parent`. Doing nothing when the pair is not
    /// linked is deliberate; removal protocols call this on half-dismantled
    /// trees.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        self.node_ok(parent)?;
        self.node_ok(child)?;

        let mut unlinked = false;
        if let Some(p) = self.store.get_mut(parent) {
            if let Some(at) = p.children.iter().position(|c| *c == child) {
                p.children.remove(at);
                unlinked = true;
            }
        }
        if let Some(c) = self.store.get_mut(child) {
            if c.parent == Some(parent) {
                c.parent = None;
                unlinked = true;
            }
        }
        if unlinked {
            let stamp = self.next_stamp();
            self.logbook.impact(Address::Node(parent), stamp);
            self.logbook.impact(Address::Node(child), stamp);
        }
        Ok(())
    }

    /// True if `ancestor` appears on the parent chain of `node`.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = self.node(node).and_then(Node::parent);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.node(id).and_then(Node::parent);
        }
        false
    }

    // ==============================================================
    // Node metadata
    // ==============================================================

    pub fn rename_node(&mut self, id: NodeId, name: &str) -> Result<(), ModelError> {
        let stamp = self.next_stamp();
        let node = self.node_mut_ok(id)?;
        node.name = name.to_string();
        self.logbook.touch(Address::Node(id), stamp);
        Ok(())
    }

    pub fn set_node_flags(&mut self, id: NodeId, flags: u32) -> Result<(), ModelError> {
        self.node_mut_ok(id)?.user_flags = flags;
        Ok(())
    }

    pub fn add_node_flags(&mut self, id: NodeId, flags: u32) -> Result<(), ModelError> {
        self.node_mut_ok(id)?.user_flags |= flags;
        Ok(())
    }

    pub fn remove_node_flags(&mut self, id: NodeId, flags: u32) -> Result<(), ModelError> {
        self.node_mut_ok(id)?.user_flags &= !flags;
        Ok(())
    }

    pub fn has_node_flags(&self, id: NodeId, flags: u32) -> Result<bool, ModelError> {
        Ok(self.node_ok(id)?.user_flags() & flags == flags)
    }

    // ==============================================================
    // Scalar data
    // ==============================================================

    pub fn scalar(&self, node: NodeId, id: ParamId) -> Result<&Value, ModelError> {
        self.param_ok(ParamAddr::user(node, id))?.scalar()
    }

    /// Writes a scalar, stamping it as touched. The value must keep the
    /// parameter's declared type.
    pub fn set_scalar(
        &mut self,
        node: NodeId,
        id: ParamId,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        self.set_scalar_with(node, id, value, ModificationType::Touched)
    }

    /// Scalar write with an explicit logbook treatment. Function drivers
    /// write their results silently and mark impacts themselves.
    pub fn set_scalar_with(
        &mut self,
        node: NodeId,
        id: ParamId,
        value: impl Into<Value>,
        modification: ModificationType,
    ) -> Result<(), ModelError> {
        let addr = ParamAddr::user(node, id);
        let value = value.into();
        let stamp = self.next_stamp();

        let param = self.param_mut_ok(addr)?;
        let slot = param.scalar_mut()?;
        if slot.value_type() != value.value_type() {
            return Err(ModelError::Value {
                at: addr,
                err: TypeError::new(slot.value_type(), value.value_type()),
            });
        }
        *slot = value;
        param.mtime = stamp;

        match modification {
            ModificationType::Silent => {}
            ModificationType::Touched => self.logbook.touch(Address::Param(addr), stamp),
            ModificationType::Impacted => self.logbook.impact(Address::Param(addr), stamp),
        }
        Ok(())
    }

    // ==============================================================
    // Parameter metadata
    // ==============================================================

    /// Stores the expression source for an expressible parameter and stamps
    /// it as impacted, so a following execution pass re-evaluates it.
    pub fn set_eval_string(
        &mut self,
        node: NodeId,
        id: ParamId,
        expr: &str,
    ) -> Result<(), ModelError> {
        let addr = ParamAddr::user(node, id);
        if !self.node_ok(node)?.is_expressible(id) {
            return Err(ModelError::NotExpressible(addr));
        }
        let stamp = self.next_stamp();
        let param = self.param_mut_ok(addr)?;
        param.eval_string = expr.to_string();
        param.mtime = stamp;
        self.logbook.impact(Address::Param(addr), stamp);
        Ok(())
    }

    /// Validity is diagnostic state, not data; writes are silent.
    pub fn set_param_validity(
        &mut self,
        node: NodeId,
        id: ParamId,
        valid: bool,
    ) -> Result<(), ModelError> {
        self.param_mut_ok(ParamAddr::user(node, id))?.valid = valid;
        Ok(())
    }

    /// Pending marks data awaiting approval; writes are silent.
    pub fn set_param_pending(
        &mut self,
        node: NodeId,
        id: ParamId,
        pending: bool,
    ) -> Result<(), ModelError> {
        self.param_mut_ok(ParamAddr::user(node, id))?.pending = pending;
        Ok(())
    }

    pub fn set_param_semantic_id(
        &mut self,
        node: NodeId,
        id: ParamId,
        sid: &str,
    ) -> Result<(), ModelError> {
        self.param_mut_ok(ParamAddr::user(node, id))?.semantic_id = sid.to_string();
        Ok(())
    }

    // ==============================================================
    // Logbook facade
    // ==============================================================

    /// Forces a tree function to run on the next execution pass.
    pub fn force_execution(&mut self, func: ParamAddr) -> Result<(), ModelError> {
        self.param_ok(func)?.tree_function()?;
        let stamp = self.next_stamp();
        self.logbook.force(Address::Param(func), stamp);
        Ok(())
    }

    /// Stamps a parameter as touched without changing its payload.
    pub fn touch(&mut self, addr: ParamAddr) -> Result<(), ModelError> {
        self.param_ok(addr)?;
        let stamp = self.next_stamp();
        if let Some(p) = self.param_mut(addr) {
            p.mtime = stamp;
        }
        self.logbook.touch(Address::Param(addr), stamp);
        Ok(())
    }

    /// Stamps a parameter as impacted without changing its payload.
    pub fn impact(&mut self, addr: ParamAddr) -> Result<(), ModelError> {
        self.param_ok(addr)?;
        let stamp = self.next_stamp();
        if let Some(p) = self.param_mut(addr) {
            p.mtime = stamp;
        }
        self.logbook.impact(Address::Param(addr), stamp);
        Ok(())
    }

    // ==============================================================
    // Predicates
    // ==============================================================

    /// A node is attached while it lives in the arena.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.store.contains(id)
    }

    /// Attached and structurally consistent. With id-keyed storage the two
    /// predicates only diverge after a buggy bulk id rewrite, which is
    /// exactly what this check exists to catch.
    pub fn is_well_formed(&self, id: NodeId) -> bool {
        self.node(id).map(Node::is_well_formed).unwrap_or(false)
    }

    /// True if every parameter of the node holds valid data.
    pub fn is_valid_data(&self, id: NodeId) -> bool {
        self.node(id)
            .map(|n| n.all_parameters().all(Parameter::is_valid_data))
            .unwrap_or(false)
    }

    /// True if any parameter of the node is pending approval.
    pub fn is_pending_data(&self, id: NodeId) -> bool {
        self.node(id)
            .map(|n| n.all_parameters().any(Parameter::is_pending_data))
            .unwrap_or(false)
    }

    /// Validity over a subtree. With `all_levels` the whole subtree is
    /// checked, otherwise only the node and its direct children.
    pub fn is_valid_with_children(&self, id: NodeId, all_levels: bool) -> bool {
        if !self.is_valid_data(id) {
            return false;
        }
        let children = match self.node(id) {
            Some(n) => n.children().to_vec(),
            None => return false,
        };
        children.into_iter().all(|c| {
            if all_levels {
                self.is_valid_with_children(c, true)
            } else {
                self.is_valid_data(c)
            }
        })
    }

    // ==============================================================
    // Command bracket
    // ==============================================================

    /// Opens a modification command. Commands are a bracket for grouping
    /// edits; nesting is not supported.
    pub fn open_command(&mut self) -> Result<(), ModelError> {
        if self.command.is_some() {
            return Err(ModelError::CommandOpen);
        }
        self.command = Some(self.commands_done + 1);
        Ok(())
    }

    pub fn has_open_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn commit_command(&mut self) -> Result<(), ModelError> {
        match self.command.take() {
            Some(_) => {
                self.commands_done += 1;
                Ok(())
            }
            None => Err(ModelError::NoCommand),
        }
    }

    /// Closes the bracket without counting it. Edits made inside are kept;
    /// the model does not snapshot state for rollback.
    pub fn abort_command(&mut self) -> Result<(), ModelError> {
        match self.command.take() {
            Some(_) => Ok(()),
            None => Err(ModelError::NoCommand),
        }
    }

    /// Number of committed commands.
    pub fn commands_done(&self) -> u64 {
        self.commands_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Blueprint;
    use crate::value::ValueType;

    const P_RADIUS: ParamId = 0;
    const P_COUNT: ParamId = 1;
    const P_LABEL: ParamId = 2;

    fn part_blueprint() -> Blueprint {
        Blueprint::new("part")
            .expressible_scalar(P_RADIUS, "radius", 1.0)
            .scalar(P_COUNT, "count", 4i64)
            .scalar(P_LABEL, "label", "untitled")
    }

    #[test]
    fn test_create_node_instantiates_blueprint() {
        let mut model = Model::new();
        let id = model.create_node(&part_blueprint());

        let node = model.node(id).unwrap();
        assert_eq!(node.type_name(), "part");
        assert_eq!(node.parameters().count(), 3);
        assert_eq!(
            model.scalar(id, P_RADIUS).unwrap(),
            &Value::Real(1.0)
        );
        assert!(node.is_expressible(P_RADIUS));
        assert!(!node.is_expressible(P_COUNT));
        // The expressible scalar owns a hidden evaluator slot.
        assert_eq!(node.evaluator_tag(P_RADIUS), Some(1));
        assert!(node.evaluator(P_RADIUS).is_some());
        assert!(model.is_well_formed(id));
    }

    #[test]
    fn test_create_registered_rejects_unknown_type() {
        let mut registry = NodeRegistry::new();
        registry.register(part_blueprint());
        let mut model = Model::new();

        assert!(model.create_registered(&registry, "part").is_ok());
        assert_eq!(
            model.create_registered(&registry, "gizmo").unwrap_err(),
            ModelError::TypeUnknown("gizmo".into())
        );
    }

    #[test]
    fn test_add_child_rejects_cycles_and_reparenting() {
        let bp = part_blueprint();
        let mut model = Model::new();
        let a = model.create_node(&bp);
        let b = model.create_node(&bp);
        let c = model.create_node(&bp);

        model.add_child(a, b).unwrap();
        model.add_child(b, c).unwrap();
        assert_eq!(model.roots(), vec![a]);

        assert_eq!(
            model.add_child(c, a).unwrap_err(),
            ModelError::ChildCycle { parent: c, child: a }
        );
        assert_eq!(
            model.add_child(a, a).unwrap_err(),
            ModelError::ChildCycle { parent: a, child: a }
        );
        assert_eq!(model.add_child(a, c).unwrap_err(), ModelError::HasParent(c));

        // Re-parenting goes through an explicit detach.
        model.remove_child(b, c).unwrap();
        model.add_child(a, c).unwrap();
        assert_eq!(model.node(a).unwrap().children(), &[b, c]);
    }

    #[test]
    fn test_set_scalar_keeps_declared_type() {
        let mut model = Model::new();
        let id = model.create_node(&part_blueprint());

        model.set_scalar(id, P_RADIUS, 2.5).unwrap();
        let err = model.set_scalar(id, P_RADIUS, 3i64).unwrap_err();
        assert_eq!(
            err,
            ModelError::Value {
                at: ParamAddr::user(id, P_RADIUS),
                err: TypeError::new(ValueType::Real, ValueType::Int),
            }
        );
        assert_eq!(model.scalar(id, P_RADIUS).unwrap(), &Value::Real(2.5));
    }

    #[test]
    fn test_scalar_writes_reach_the_logbook() {
        let mut model = Model::new();
        let id = model.create_node(&part_blueprint());
        let addr = Address::Param(ParamAddr::user(id, P_COUNT));

        model
            .set_scalar_with(id, P_COUNT, 5i64, ModificationType::Silent)
            .unwrap();
        assert!(!model.logbook().is_modified(&addr));

        model.set_scalar(id, P_COUNT, 6i64).unwrap();
        assert!(model.logbook().is_touched(&addr));

        model.logbook_mut().release_modified();
        model
            .set_scalar_with(id, P_COUNT, 7i64, ModificationType::Impacted)
            .unwrap();
        assert!(model.logbook().is_impacted(&addr));
    }

    #[test]
    fn test_eval_string_needs_an_expressible_parameter() {
        let mut model = Model::new();
        let id = model.create_node(&part_blueprint());

        model.set_eval_string(id, P_RADIUS, "2 * height").unwrap();
        assert_eq!(
            model
                .param(ParamAddr::user(id, P_RADIUS))
                .unwrap()
                .eval_string(),
            "2 * height"
        );
        assert_eq!(
            model.set_eval_string(id, P_COUNT, "1 + 1").unwrap_err(),
            ModelError::NotExpressible(ParamAddr::user(id, P_COUNT))
        );
    }

    #[test]
    fn test_find_node_by_name_scans_in_id_order() {
        let bp = part_blueprint();
        let mut model = Model::new();
        let a = model.create_node(&bp);
        let b = model.create_node(&bp);
        model.rename_node(a, "flange").unwrap();
        model.rename_node(b, "flange").unwrap();

        assert_eq!(model.find_node_by_name("flange"), Some(a));
        assert_eq!(model.find_node_by_name("missing"), None);
    }

    #[test]
    fn test_validity_predicates_cover_subtrees() {
        let bp = part_blueprint();
        let mut model = Model::new();
        let a = model.create_node(&bp);
        let b = model.create_node(&bp);
        let c = model.create_node(&bp);
        model.add_child(a, b).unwrap();
        model.add_child(b, c).unwrap();

        assert!(model.is_valid_with_children(a, true));
        model.set_param_validity(c, P_RADIUS, false).unwrap();
        // The grandchild only shows up on a full-depth check.
        assert!(model.is_valid_with_children(a, false));
        assert!(!model.is_valid_with_children(a, true));
        assert!(!model.is_valid_with_children(b, false));

        model.set_param_pending(b, P_COUNT, true).unwrap();
        assert!(model.is_pending_data(b));
        assert!(!model.is_pending_data(a));
    }

    #[test]
    fn test_command_bracket_refuses_nesting() {
        let mut model = Model::new();
        assert_eq!(model.commit_command().unwrap_err(), ModelError::NoCommand);

        model.open_command().unwrap();
        assert!(model.has_open_command());
        assert_eq!(model.open_command().unwrap_err(), ModelError::CommandOpen);
        model.commit_command().unwrap();
        assert_eq!(model.commands_done(), 1);

        model.open_command().unwrap();
        model.abort_command().unwrap();
        assert_eq!(model.commands_done(), 1);
    }

    #[test]
    fn test_model_survives_a_serde_roundtrip() {
        let bp = part_blueprint();
        let mut model = Model::new();
        let a = model.create_node(&bp);
        let b = model.create_node(&bp);
        model.add_child(a, b).unwrap();
        model.rename_node(a, "assembly").unwrap();
        model.set_scalar(b, P_RADIUS, 3.5).unwrap();
        model.set_eval_string(b, P_RADIUS, "a + 1").unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let restored: Model = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.node_ids(), model.node_ids());
        assert_eq!(restored.node(a).unwrap().name(), "assembly");
        assert_eq!(restored.node(b).unwrap().parent(), Some(a));
        assert_eq!(restored.scalar(b, P_RADIUS).unwrap(), &Value::Real(3.5));
        assert_eq!(
            restored
                .param(ParamAddr::user(b, P_RADIUS))
                .unwrap()
                .eval_string(),
            "a + 1"
        );
        // Ids allocated after a reload keep ascending.
        let mut restored = restored;
        let c = restored.create_node(&bp);
        assert!(c > b);
    }
}
