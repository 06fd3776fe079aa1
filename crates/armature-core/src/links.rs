//! Reference and tree function wiring.
//!
//! Every direct link in the model has a matching back-reference in the
//! target node's observer lists, so removal and impact analysis never scan
//! the whole arena. The operations here keep the two sides in lockstep:
//!
//! - plain references: one optional target per parameter,
//! - reference lists: ordered, duplicates allowed, with smart back-reference
//!   removal,
//! - tree functions: persistent argument/result bindings plus the model-wide
//!   registry of live functions,
//! - evaluators: hidden tree functions driving expressible scalars.
//!
//! All wiring operations take an [`ExecutionScope`] and fail with
//! [`ModelError::GraphFrozen`] while an execution pass holds the graph
//! frozen.

use crate::address::{Address, NodeId, ParamAddr, ParamId};
use crate::error::ModelError;
use crate::model::{ExecutionScope, Model};
use crate::node::ObserverKind;
use crate::param::TreeFunctionData;
use crate::value::ValueType;

/// Driver id of the hidden evaluator functions backing expressible scalars.
pub const EVALUATOR_DRIVER: &str = "armature.evaluator";

impl Model {
    // ==============================================================
    // Observer maintenance
    // ==============================================================

    pub(crate) fn add_observer(
        &mut self,
        on: NodeId,
        kind: ObserverKind,
        observer: ParamAddr,
        prepend: bool,
    ) -> Result<(), ModelError> {
        let node = self.node_mut(on).ok_or(ModelError::NodeNotFound(on))?;
        if prepend {
            node.observers.prepend(kind, observer);
        } else {
            node.observers.append(kind, observer);
        }
        Ok(())
    }

    /// Missing nodes are tolerated here: teardown paths disconnect from
    /// targets that may already be gone.
    pub(crate) fn remove_observer(&mut self, on: NodeId, kind: ObserverKind, observer: &ParamAddr) {
        if let Some(node) = self.node_mut(on) {
            node.observers.remove(kind, observer);
        }
    }

    fn check_unfrozen(scope: &ExecutionScope) -> Result<(), ModelError> {
        if scope.is_frozen() {
            return Err(ModelError::GraphFrozen);
        }
        Ok(())
    }

    fn resolve_target(&self, target: &Address) -> Result<(), ModelError> {
        match target {
            Address::Node(id) => {
                if !self.store.contains(*id) {
                    return Err(ModelError::NodeNotFound(*id));
                }
            }
            Address::Param(p) => {
                self.param_ok(*p)?;
            }
        }
        Ok(())
    }

    // ==============================================================
    // Plain references
    // ==============================================================

    /// Points a reference parameter at a target and registers the
    /// back-reference on the target's node. An existing target is
    /// disconnected first so its back-reference cannot leak. A reference
    /// into its own node gets no back-reference.
    pub fn connect_reference(
        &mut self,
        node: NodeId,
        id: ParamId,
        target: Address,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let addr = ParamAddr::user(node, id);
        self.param_ok(addr)?.reference()?;
        self.resolve_target(&target)?;

        if self.has_connected_reference(node, id)? {
            self.disconnect_reference(node, id, scope)?;
        }

        let stamp = self.next_stamp();
        {
            let param = self.param_mut_ok(addr)?;
            param.reference_mut()?.target = Some(target);
            param.mtime = stamp;
        }
        if target.node_id() != node {
            self.add_observer(target.node_id(), ObserverKind::Referrers, addr, false)?;
        }
        Ok(())
    }

    pub fn has_connected_reference(&self, node: NodeId, id: ParamId) -> Result<bool, ModelError> {
        Ok(self
            .param_ok(ParamAddr::user(node, id))?
            .reference()?
            .is_connected())
    }

    pub fn reference_target(
        &self,
        node: NodeId,
        id: ParamId,
    ) -> Result<Option<Address>, ModelError> {
        Ok(self.param_ok(ParamAddr::user(node, id))?.reference()?.target())
    }

    /// Clears a reference parameter and drops the back-reference on the old
    /// target's node. Disconnecting an empty reference does nothing.
    pub fn disconnect_reference(
        &mut self,
        node: NodeId,
        id: ParamId,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let addr = ParamAddr::user(node, id);
        let target = self.param_ok(addr)?.reference()?.target();
        let Some(target) = target else {
            return Ok(());
        };

        let stamp = self.next_stamp();
        {
            let param = self.param_mut_ok(addr)?;
            param.reference_mut()?.target = None;
            param.mtime = stamp;
        }
        self.remove_observer(target.node_id(), ObserverKind::Referrers, &addr);
        Ok(())
    }

    // ==============================================================
    // Reference lists
    // ==============================================================

    /// Inserts a target into a reference list at the given offset: 0
    /// prepends, the current length appends. Duplicate targets are allowed
    /// and keep their positions; the back-reference is registered once.
    pub fn connect_reference_to_list(
        &mut self,
        node: NodeId,
        id: ParamId,
        target: Address,
        offset: usize,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let addr = ParamAddr::user(node, id);
        let len = self.param_ok(addr)?.reference_list()?.len();
        if offset > len {
            return Err(ModelError::ListIndexOut { index: offset, len });
        }
        self.resolve_target(&target)?;

        let stamp = self.next_stamp();
        {
            let param = self.param_mut_ok(addr)?;
            param.reference_list_mut()?.insert_at(offset, target);
            param.mtime = stamp;
        }
        if target.node_id() != node {
            self.add_observer(target.node_id(), ObserverKind::Referrers, addr, false)?;
        }
        Ok(())
    }

    /// Appends a target to a reference list.
    pub fn append_reference_to_list(
        &mut self,
        node: NodeId,
        id: ParamId,
        target: Address,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        let len = self
            .param_ok(ParamAddr::user(node, id))?
            .reference_list()?
            .len();
        self.connect_reference_to_list(node, id, target, len, scope)
    }

    /// Removes the list entry at `index`. The back-reference on the
    /// target's node is only dropped if no remaining entry still points at
    /// that node or any of its parameters.
    pub fn disconnect_reference_from_list(
        &mut self,
        node: NodeId,
        id: ParamId,
        index: usize,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let addr = ParamAddr::user(node, id);
        let (target, len) = {
            let list = self.param_ok(addr)?.reference_list()?;
            (list.targets().get(index).copied(), list.len())
        };
        let Some(target) = target else {
            return Err(ModelError::ListIndexOut { index, len });
        };

        let stamp = self.next_stamp();
        {
            let param = self.param_mut_ok(addr)?;
            param.reference_list_mut()?.remove_at(index);
            param.mtime = stamp;
        }

        let owner = target.node_id();
        let still_referred = self.param_ok(addr)?.reference_list()?.refers_to_node(owner);
        if !still_referred {
            self.remove_observer(owner, ObserverKind::Referrers, &addr);
        }
        Ok(())
    }

    /// Empties a reference list, disconnecting entries last to first.
    pub fn disconnect_reference_list(
        &mut self,
        node: NodeId,
        id: ParamId,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let len = self
            .param_ok(ParamAddr::user(node, id))?
            .reference_list()?
            .len();
        for index in (0..len).rev() {
            self.disconnect_reference_from_list(node, id, index, scope)?;
        }
        Ok(())
    }

    pub fn has_connected_reference_list(
        &self,
        node: NodeId,
        id: ParamId,
    ) -> Result<bool, ModelError> {
        Ok(!self
            .param_ok(ParamAddr::user(node, id))?
            .reference_list()?
            .is_empty())
    }

    pub fn reference_list_targets(
        &self,
        node: NodeId,
        id: ParamId,
    ) -> Result<&[Address], ModelError> {
        Ok(self
            .param_ok(ParamAddr::user(node, id))?
            .reference_list()?
            .targets())
    }

    // ==============================================================
    // Tree functions
    // ==============================================================

    /// Connects a tree function: associates a driver with the parameter,
    /// binds arguments and results, and registers the function as input
    /// reader and output writer on the foreign nodes involved. Connecting
    /// with no arguments is a no-op; only the result list may be empty.
    pub fn connect_tree_function(
        &mut self,
        node: NodeId,
        id: ParamId,
        driver: &str,
        arguments: &[ParamAddr],
        results: &[ParamAddr],
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let addr = ParamAddr::user(node, id);
        self.param_ok(addr)?.tree_function()?;
        if arguments.is_empty() {
            return Ok(());
        }
        self.connect_function(addr, driver, arguments, results)
    }

    /// Shared connect path for user functions and evaluators. Callers have
    /// already checked the scope.
    pub(crate) fn connect_function(
        &mut self,
        func: ParamAddr,
        driver: &str,
        arguments: &[ParamAddr],
        results: &[ParamAddr],
    ) -> Result<(), ModelError> {
        // Reconnect cleanly so old back-references cannot leak.
        if self.param_ok(func)?.tree_function()?.is_connected() {
            self.disconnect_function(func, false)?;
        }
        for arg in arguments {
            self.param_ok(*arg)?;
        }
        for res in results {
            self.param_ok(*res)?;
        }

        let stamp = self.next_stamp();
        {
            let param = self.param_mut_ok(func)?;
            let data = param.tree_function_mut()?;
            data.driver = Some(driver.to_string());
            data.arguments = arguments.to_vec();
            data.results = results.to_vec();
            param.mtime = stamp;
        }
        for arg in arguments {
            if arg.node != func.node {
                self.add_observer(arg.node, ObserverKind::InputReaders, func, false)?;
            }
        }
        for res in results {
            if res.node != func.node {
                self.add_observer(res.node, ObserverKind::OutputWriters, func, false)?;
            }
        }
        self.functions.insert(func);
        // Freshly connected functions run once unconditionally.
        self.logbook.heavy_deploy(Address::Param(func), stamp);
        Ok(())
    }

    /// Soft-disconnects a tree function: bindings and back-references go,
    /// the driver association and the registry entry stay. A missing
    /// parameter is fine on this path.
    pub fn disconnect_tree_function(
        &mut self,
        node: NodeId,
        id: ParamId,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let addr = ParamAddr::user(node, id);
        if self.param(addr).is_none() {
            return Ok(());
        }
        self.param_ok(addr)?.tree_function()?;
        self.disconnect_function(addr, false)
    }

    /// Tears down a function's bindings together with the back-references
    /// they imply. With `completely` the driver association, the registry
    /// entry and any logbook records for the function go too.
    pub(crate) fn disconnect_function(
        &mut self,
        func: ParamAddr,
        completely: bool,
    ) -> Result<(), ModelError> {
        let (arguments, results) = match self.param(func) {
            Some(p) => {
                let data = p.tree_function()?;
                (data.arguments().to_vec(), data.results().to_vec())
            }
            None => return Ok(()),
        };

        for arg in &arguments {
            self.remove_observer(arg.node, ObserverKind::InputReaders, &func);
        }
        for res in &results {
            self.remove_observer(res.node, ObserverKind::OutputWriters, &func);
        }

        let stamp = self.next_stamp();
        if let Some(param) = self.param_mut(func) {
            param.tree_function_mut()?.disconnect(completely);
            param.mtime = stamp;
        }
        if completely {
            self.functions.remove(&func);
            self.logbook.clear_references_for(&Address::Param(func));
        }
        Ok(())
    }

    pub fn has_connected_tree_function(
        &self,
        node: NodeId,
        id: ParamId,
    ) -> Result<bool, ModelError> {
        Ok(self
            .param_ok(ParamAddr::user(node, id))?
            .tree_function()?
            .is_connected())
    }

    /// Read access to any function parameter's binding, hidden evaluators
    /// included.
    pub fn function_data(&self, func: ParamAddr) -> Result<&TreeFunctionData, ModelError> {
        self.param_ok(func)?.tree_function()
    }

    // ==============================================================
    // Evaluators
    // ==============================================================

    /// True if the parameter was declared expressible.
    pub fn is_evaluable(&self, node: NodeId, id: ParamId) -> bool {
        self.node(node).map(|n| n.is_expressible(id)).unwrap_or(false)
    }

    /// Address of the hidden evaluator function backing a parameter.
    pub fn evaluator_addr(&self, node: NodeId, id: ParamId) -> Option<ParamAddr> {
        self.node(node)?
            .evaluator_tag(id)
            .map(|tag| ParamAddr::eval(node, tag))
    }

    /// Connects the hidden evaluator of an expressible parameter. The
    /// parameter itself becomes the first argument and the sole result;
    /// `variables` are the parameters its expression reads. Only real and
    /// int scalars can be evaluated.
    pub fn connect_evaluator(
        &mut self,
        node: NodeId,
        id: ParamId,
        variables: &[ParamAddr],
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let target = ParamAddr::user(node, id);
        let tag = self
            .node(node)
            .ok_or(ModelError::NodeNotFound(node))?
            .evaluator_tag(id)
            .ok_or(ModelError::NotExpressible(target))?;

        let vt = self.param_ok(target)?.scalar()?.value_type();
        if vt != ValueType::Real && vt != ValueType::Int {
            return Err(ModelError::NotEvaluatorCapable { at: target, got: vt });
        }

        let func = ParamAddr::eval(node, tag);
        let mut arguments = Vec::with_capacity(variables.len() + 1);
        arguments.push(target);
        arguments.extend_from_slice(variables);
        self.connect_function(func, EVALUATOR_DRIVER, &arguments, &[target])
    }

    /// Soft-disconnects the evaluator of an expressible parameter.
    pub fn disconnect_evaluator(
        &mut self,
        node: NodeId,
        id: ParamId,
        scope: &ExecutionScope,
    ) -> Result<(), ModelError> {
        Self::check_unfrozen(scope)?;
        let target = ParamAddr::user(node, id);
        let tag = self
            .node(node)
            .ok_or(ModelError::NodeNotFound(node))?
            .evaluator_tag(id)
            .ok_or(ModelError::NotExpressible(target))?;
        self.disconnect_function(ParamAddr::eval(node, tag), false)
    }

    pub fn has_connected_evaluator(&self, node: NodeId, id: ParamId) -> bool {
        self.node(node)
            .and_then(|n| n.evaluator(id))
            .and_then(|p| p.tree_function().ok())
            .map(TreeFunctionData::is_connected)
            .unwrap_or(false)
    }
}
