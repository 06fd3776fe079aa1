//! Copy/paste of node subtrees through a detached buffer.
//!
//! # Overview
//!
//! Copying takes a snapshot of a subtree into a private buffer store;
//! pasting materializes that snapshot back into a model. Both directions run
//! the same passes:
//!
//! 1. flatten the subtree into the destination, one rebased copy per node,
//! 2. rebuild parent/child links between the copies,
//! 3. normalize observer lists, keeping only in-scope entries remapped to
//!    copy space,
//! 4. normalize direct references and function bindings: in-scope targets
//!    are remapped, out-of-scope targets are kept verbatim only where the
//!    [`ReferenceFilter`] allows, and dropped otherwise.
//!
//! Each direction records its id mapping in a [`RelocationTable`], so a
//! pasted node can be traced back through the buffer to its original.
//! Buffer ids live in a reserved high range and never collide with model
//! ids. Problems that the engine can survive (a kept external target whose
//! node disappeared between copy and paste) disable the affected function
//! and raise a warning bit in [`TransferStatus`] instead of failing the
//! paste.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{Address, NodeId, ParamAddr, ParamId};
use crate::error::ModelError;
use crate::model::Model;
use crate::node::{Node, ObserverKind};
use crate::param::{ParamData, Parameter};
use crate::store::Store;

/// First id handed out by clipboard buffers. Models would need two billion
/// live nodes before their ids could collide with buffered ones.
pub const BUFFER_ID_BASE: NodeId = 0x8000_0000;

const SUFFIX_BUFFER: &str = " [copy]";
const SUFFIX_PASTE: &str = "*";

/// Errors that abort a transfer outright.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransferError {
    #[error("copy source n{0} not found")]
    SourceMissing(NodeId),

    #[error("copy source n{0} is malformed")]
    MalformedSource(NodeId),

    #[error("paste buffer is empty")]
    EmptyBuffer,

    #[error("paste target n{0} not found")]
    TargetMissing(NodeId),

    #[error("cannot paste under n{0}: it is inside the copied scope")]
    ParentInScope(NodeId),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Outcome bits of the last transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferStatus(u32);

impl TransferStatus {
    pub const OK: TransferStatus = TransferStatus(0x1);
    /// A kept external function argument no longer resolved at paste time;
    /// the function was disabled.
    pub const WARN_NULL_FUNC_ARGUMENT: TransferStatus = TransferStatus(0x2);
    /// Same for a function result.
    pub const WARN_NULL_FUNC_RESULT: TransferStatus = TransferStatus(0x4);

    fn insert(&mut self, other: TransferStatus) {
        self.0 |= other.0;
    }

    pub fn contains(self, other: TransferStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the transfer finished without warnings.
    pub fn is_ok(self) -> bool {
        self == TransferStatus::OK
    }

    pub fn has_warnings(self) -> bool {
        self.contains(TransferStatus::OK) && !self.is_ok()
    }
}

/// Name suffix policy for copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameSuffix {
    /// Copies keep the source names.
    None,
    /// Only the subtree root is suffixed.
    RootOnly,
    /// Every copied node is suffixed.
    #[default]
    All,
}

/// Bidirectional id mapping recorded during one transfer direction.
#[derive(Debug, Clone, Default)]
pub struct RelocationTable {
    forward: HashMap<NodeId, NodeId>,
    inverse: HashMap<NodeId, NodeId>,
}

impl RelocationTable {
    pub(crate) fn bind(&mut self, source: NodeId, copy: NodeId) {
        self.forward.insert(source, copy);
        self.inverse.insert(copy, source);
    }

    pub(crate) fn clear(&mut self) {
        self.forward.clear();
        self.inverse.clear();
    }

    /// Copy id a source node was cloned into.
    pub fn to_copy(&self, source: NodeId) -> Option<NodeId> {
        self.forward.get(&source).copied()
    }

    /// Source id a copy was cloned from.
    pub fn to_source(&self, copy: NodeId) -> Option<NodeId> {
        self.inverse.get(&copy).copied()
    }

    pub fn contains_source(&self, source: NodeId) -> bool {
        self.forward.contains_key(&source)
    }

    pub fn contains_copy(&self, copy: NodeId) -> bool {
        self.inverse.contains_key(&copy)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Chains two mappings: sources of `self` to copies of `other`, through
    /// the ids they share. Tracing originals to pasted nodes composes the
    /// copy table with the paste table.
    pub fn compose(&self, other: &RelocationTable) -> RelocationTable {
        let mut out = RelocationTable::default();
        for (src, mid) in &self.forward {
            if let Some(end) = other.to_copy(*mid) {
                out.bind(*src, end);
            }
        }
        out
    }
}

/// Decides which out-of-scope links survive a transfer.
///
/// Functions pass by driver id; reference parameters pass by the referring
/// node's type name and parameter id. Everything not listed is dropped
/// during normalization.
#[derive(Debug, Clone, Default)]
pub struct ReferenceFilter {
    drivers: HashSet<String>,
    references: HashSet<(String, ParamId)>,
}

impl ReferenceFilter {
    pub fn allow_driver(&mut self, driver: &str) {
        self.drivers.insert(driver.to_string());
    }

    pub fn allow_reference(&mut self, node_type: &str, id: ParamId) {
        self.references.insert((node_type.to_string(), id));
    }

    /// Replaces the pass rules wholesale.
    pub fn load<D, R>(&mut self, drivers: D, references: R)
    where
        D: IntoIterator<Item = String>,
        R: IntoIterator<Item = (String, ParamId)>,
    {
        self.clear();
        self.drivers.extend(drivers);
        self.references.extend(references);
    }

    pub fn passes_driver(&self, driver: &str) -> bool {
        self.drivers.contains(driver)
    }

    pub fn passes_reference(&self, node_type: &str, id: ParamId) -> bool {
        self.references
            .contains(&(node_type.to_string(), id))
    }

    pub fn clear(&mut self) {
        self.drivers.clear();
        self.references.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty() && self.references.is_empty()
    }
}

/// The copy/paste engine: buffer, relocation tables, filter and status.
#[derive(Debug, Clone)]
pub struct CopyPasteEngine {
    buffer: Store,
    buffer_root: Option<NodeId>,
    copy_table: RelocationTable,
    paste_table: RelocationTable,
    filter: ReferenceFilter,
    status: TransferStatus,
    suffix: NameSuffix,
}

impl Default for CopyPasteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyPasteEngine {
    pub fn new() -> Self {
        CopyPasteEngine {
            buffer: Store::with_base(BUFFER_ID_BASE),
            buffer_root: None,
            copy_table: RelocationTable::default(),
            paste_table: RelocationTable::default(),
            filter: ReferenceFilter::default(),
            status: TransferStatus::default(),
            suffix: NameSuffix::default(),
        }
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Mapping of the last copy: model ids to buffer ids.
    pub fn copy_table(&self) -> &RelocationTable {
        &self.copy_table
    }

    /// Mapping of the last paste: buffer ids to model ids.
    pub fn paste_table(&self) -> &RelocationTable {
        &self.paste_table
    }

    pub fn filter(&self) -> &ReferenceFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut ReferenceFilter {
        &mut self.filter
    }

    pub fn set_suffix_option(&mut self, suffix: NameSuffix) {
        self.suffix = suffix;
    }

    pub fn has_buffered(&self) -> bool {
        self.buffer_root.is_some()
    }

    /// Buffer-space id of the buffered subtree root.
    pub fn buffer_root(&self) -> Option<NodeId> {
        self.buffer_root
    }

    /// Read access to the buffered copies.
    pub fn buffer(&self) -> &Store {
        &self.buffer
    }

    pub fn release_buffer(&mut self) {
        self.buffer = Store::with_base(BUFFER_ID_BASE);
        self.buffer_root = None;
        self.copy_table.clear();
        self.paste_table.clear();
    }

    /// Copies the subtree rooted at `root` into the buffer. The model is
    /// not modified. A failed precondition keeps the previous buffer.
    pub fn transfer_to_buffer(
        &mut self,
        model: &Model,
        root: NodeId,
    ) -> Result<(), TransferError> {
        let src = model
            .node(root)
            .ok_or(TransferError::SourceMissing(root))?;
        if !src.is_well_formed() {
            return Err(TransferError::MalformedSource(root));
        }

        self.release_buffer();
        self.status = TransferStatus::OK;

        let sources = collect_subtree(model.store(), root);
        for src_id in &sources {
            let suffix = self.suffix_for(*src_id == root, SUFFIX_BUFFER);
            let copy_id = self.buffer.alloc_id();
            if let Some(node) = model.store().get(*src_id) {
                self.buffer.put(rebase_node(node, copy_id, suffix));
                self.copy_table.bind(*src_id, copy_id);
            }
        }

        let copies: Vec<NodeId> = sources
            .iter()
            .filter_map(|s| self.copy_table.to_copy(*s))
            .collect();
        rebuild_tree_links(&mut self.buffer, &self.copy_table, &copies);
        for copy in &copies {
            normalize_observers(&mut self.buffer, &self.copy_table, *copy);
        }
        for copy in &copies {
            normalize_node_into_buffer(
                &mut self.buffer,
                &self.copy_table,
                &self.filter,
                &mut self.status,
                model.store(),
                *copy,
            );
        }

        self.buffer_root = self.copy_table.to_copy(root);
        Ok(())
    }

    /// Pastes the buffered subtree into the model and returns the id of the
    /// new root. The buffer is kept, so one copy can be pasted repeatedly;
    /// every paste rebuilds the paste relocation table from scratch.
    pub fn restore_from_buffer(&mut self, model: &mut Model) -> Result<NodeId, TransferError> {
        let buffer_root = self.buffer_root.ok_or(TransferError::EmptyBuffer)?;
        self.status = TransferStatus::OK;
        self.paste_table.clear();

        let sources = collect_subtree(&self.buffer, buffer_root);
        for src_id in &sources {
            let suffix = self.suffix_for(*src_id == buffer_root, SUFFIX_PASTE);
            let copy_id = model.store.alloc_id();
            let stamp = model.next_stamp();
            if let Some(node) = self.buffer.get(*src_id) {
                let mut copy = rebase_node(node, copy_id, suffix);
                for param in copy.params.values_mut() {
                    param.mtime = stamp;
                }
                for param in copy.eval_funcs.values_mut() {
                    param.mtime = stamp;
                }
                model.store.put(copy);
                self.paste_table.bind(*src_id, copy_id);
            }
        }

        let copies: Vec<NodeId> = sources
            .iter()
            .filter_map(|s| self.paste_table.to_copy(*s))
            .collect();
        rebuild_tree_links(&mut model.store, &self.paste_table, &copies);
        for copy in &copies {
            normalize_observers(&mut model.store, &self.paste_table, *copy);
        }
        for copy in &copies {
            normalize_node_into_model(
                model,
                &self.paste_table,
                &self.filter,
                &mut self.status,
                *copy,
            );
        }

        // Pasted functions enter the model's function scope; connected ones
        // run once on the next execution pass like any fresh connection.
        for copy in &copies {
            let addrs = model
                .node(*copy)
                .map(Node::parameter_addrs)
                .unwrap_or_default();
            for addr in addrs {
                let (claimed, connected) = match model.param(addr).map(Parameter::data) {
                    Some(ParamData::TreeFunction(f)) => (f.driver().is_some(), f.is_connected()),
                    _ => continue,
                };
                if !claimed {
                    continue;
                }
                model.functions.insert(addr);
                if connected {
                    let stamp = model.next_stamp();
                    model.logbook.heavy_deploy(Address::Param(addr), stamp);
                }
            }
        }

        self.paste_table
            .to_copy(buffer_root)
            .ok_or(TransferError::EmptyBuffer)
    }

    /// Pastes the buffer under an existing parent node. The parent must not
    /// be part of the copied scope; pasting a subtree into itself is
    /// refused before anything is materialized.
    pub fn paste_under(
        &mut self,
        model: &mut Model,
        parent: NodeId,
    ) -> Result<NodeId, TransferError> {
        self.buffer_root.ok_or(TransferError::EmptyBuffer)?;
        if !model.store().contains(parent) {
            return Err(TransferError::TargetMissing(parent));
        }
        if self.copy_table.contains_source(parent) {
            return Err(TransferError::ParentInScope(parent));
        }
        let root = self.restore_from_buffer(model)?;
        model.add_child(parent, root)?;
        Ok(root)
    }

    fn suffix_for(&self, is_root: bool, suffix: &'static str) -> Option<&'static str> {
        match self.suffix {
            NameSuffix::None => None,
            NameSuffix::RootOnly if is_root => Some(suffix),
            NameSuffix::RootOnly => None,
            NameSuffix::All => Some(suffix),
        }
    }
}

// ==============================================================
// Transfer passes
// ==============================================================

/// Pre-order subtree ids starting at `root`.
fn collect_subtree(store: &Store, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(node) = store.get(id) else { continue };
        out.push(id);
        for child in node.children().iter().rev() {
            stack.push(*child);
        }
    }
    out
}

/// Clones a node under a new id, rewriting parameter ownership. Tree links
/// and payload addresses still hold source-space ids afterwards.
fn rebase_node(source: &Node, copy_id: NodeId, suffix: Option<&str>) -> Node {
    let mut node = source.clone();
    node.id = copy_id;
    if let Some(sfx) = suffix {
        node.name.push_str(sfx);
    }
    for param in node.params.values_mut() {
        param.owner = copy_id;
    }
    for param in node.eval_funcs.values_mut() {
        param.owner = copy_id;
    }
    node
}

/// Remaps parent and child links of every copy into copy space. The copied
/// root's parent lies outside the scope and becomes detached.
fn rebuild_tree_links(store: &mut Store, table: &RelocationTable, copies: &[NodeId]) {
    for copy in copies {
        if let Some(node) = store.get_mut(*copy) {
            node.parent = node.parent.and_then(|p| table.to_copy(p));
            node.children = node
                .children
                .iter()
                .filter_map(|c| table.to_copy(*c))
                .collect();
        }
    }
}

/// Rewrites the observer lists of a copy, keeping only in-scope observers
/// remapped to copy space. External observers belong to the source, not to
/// the copy.
fn normalize_observers(store: &mut Store, table: &RelocationTable, copy: NodeId) {
    let Some(node) = store.get_mut(copy) else { return };
    for list in [
        &mut node.observers.input_readers,
        &mut node.observers.output_writers,
        &mut node.observers.referrers,
    ] {
        *list = list.iter().filter_map(|obs| map_param(table, *obs)).collect();
    }
}

fn map_param(table: &RelocationTable, addr: ParamAddr) -> Option<ParamAddr> {
    table.to_copy(addr.node).map(|node| ParamAddr {
        node,
        slot: addr.slot,
    })
}

fn map_address(table: &RelocationTable, addr: Address) -> Option<Address> {
    match addr {
        Address::Node(id) => table.to_copy(id).map(Address::Node),
        Address::Param(p) => map_param(table, p).map(Address::Param),
    }
}

/// Result of classifying one function binding list.
enum MappedBindings {
    /// Every entry classified; externals kept verbatim are listed again in
    /// `external`.
    Ok {
        list: Vec<ParamAddr>,
        external: Vec<ParamAddr>,
    },
    /// A kept external entry no longer resolves.
    Dangling,
}

fn map_bindings(addrs: &[ParamAddr], table: &RelocationTable, live: &Store) -> MappedBindings {
    let mut list = Vec::with_capacity(addrs.len());
    let mut external = Vec::new();
    for addr in addrs {
        match map_param(table, *addr) {
            Some(mapped) => list.push(mapped),
            None => {
                if live.param(*addr).is_none() {
                    return MappedBindings::Dangling;
                }
                list.push(*addr);
                external.push(*addr);
            }
        }
    }
    MappedBindings::Ok { list, external }
}

/// Drops the observer entries a copied function holds on other copies, then
/// clears its bindings and driver. External nodes are never touched from
/// here; a stale entry on them is tolerated by the data model.
fn disable_function_copy(store: &mut Store, func: ParamAddr) {
    let bindings = match store.param(func).map(Parameter::data) {
        Some(ParamData::TreeFunction(f)) => (f.arguments().to_vec(), f.results().to_vec()),
        _ => return,
    };
    for arg in &bindings.0 {
        if let Some(node) = store.get_mut(arg.node) {
            node.observers.remove(ObserverKind::InputReaders, &func);
        }
    }
    for res in &bindings.1 {
        if let Some(node) = store.get_mut(res.node) {
            node.observers.remove(ObserverKind::OutputWriters, &func);
        }
    }
    if let Some(param) = store.param_mut(func) {
        if let Ok(f) = param.tree_function_mut() {
            f.disconnect(true);
        }
    }
}

/// Buffer-side direct reference normalization: no observers are registered
/// on the outside world, because the buffer must stay invisible to it.
fn normalize_node_into_buffer(
    buffer: &mut Store,
    table: &RelocationTable,
    filter: &ReferenceFilter,
    status: &mut TransferStatus,
    model: &Store,
    copy: NodeId,
) {
    let (addrs, node_type) = match buffer.get(copy) {
        Some(n) => (n.parameter_addrs(), n.type_name().to_string()),
        None => return,
    };

    for addr in addrs {
        let data = match buffer.param(addr).map(Parameter::data) {
            Some(d) => d.clone(),
            None => continue,
        };
        match data {
            ParamData::TreeFunction(f) => {
                if f.driver().is_none() && f.arguments().is_empty() && f.results().is_empty() {
                    continue;
                }
                let args = map_bindings(f.arguments(), table, model);
                let MappedBindings::Ok { list: args, external: ext_args } = args else {
                    disable_function_copy(buffer, addr);
                    status.insert(TransferStatus::WARN_NULL_FUNC_ARGUMENT);
                    continue;
                };
                let results = map_bindings(f.results(), table, model);
                let MappedBindings::Ok { list: results, external: ext_results } = results else {
                    disable_function_copy(buffer, addr);
                    status.insert(TransferStatus::WARN_NULL_FUNC_RESULT);
                    continue;
                };

                write_function_bindings(buffer, addr, &args, &results);

                let out_scoped = !ext_args.is_empty() || !ext_results.is_empty();
                let passes = f.driver().map(|d| filter.passes_driver(d)).unwrap_or(false);
                if out_scoped && !passes {
                    disable_function_copy(buffer, addr);
                }
            }
            ParamData::Reference(r) => {
                let Some(target) = r.target() else { continue };
                let new_target = match map_address(table, target) {
                    Some(mapped) => Some(mapped),
                    None => {
                        let passes = filter.passes_reference(&node_type, addr.slot.id());
                        if passes && resolves_in(model, &target) {
                            Some(target)
                        } else {
                            None
                        }
                    }
                };
                if let Some(param) = buffer.param_mut(addr) {
                    if let Ok(rd) = param.reference_mut() {
                        rd.target = new_target;
                    }
                }
            }
            ParamData::ReferenceList(l) => {
                if l.is_empty() {
                    continue;
                }
                let passes = filter.passes_reference(&node_type, addr.slot.id());
                let kept: Vec<Address> = l
                    .targets()
                    .iter()
                    .filter_map(|t| match map_address(table, *t) {
                        Some(mapped) => Some(mapped),
                        None if passes && resolves_in(model, t) => Some(*t),
                        None => None,
                    })
                    .collect();
                if let Some(param) = buffer.param_mut(addr) {
                    if let Ok(ld) = param.reference_list_mut() {
                        ld.targets = kept;
                    }
                }
            }
            ParamData::Scalar(_) => {}
        }
    }
}

/// Paste-side direct reference normalization. Kept external targets get the
/// copy registered as an observer on their (live) nodes.
fn normalize_node_into_model(
    model: &mut Model,
    table: &RelocationTable,
    filter: &ReferenceFilter,
    status: &mut TransferStatus,
    copy: NodeId,
) {
    let (addrs, node_type) = match model.node(copy) {
        Some(n) => (n.parameter_addrs(), n.type_name().to_string()),
        None => return,
    };

    for addr in addrs {
        let data = match model.param(addr).map(Parameter::data) {
            Some(d) => d.clone(),
            None => continue,
        };
        match data {
            ParamData::TreeFunction(f) => {
                if f.driver().is_none() && f.arguments().is_empty() && f.results().is_empty() {
                    continue;
                }
                let args = map_bindings(f.arguments(), table, &model.store);
                let MappedBindings::Ok { list: args, external: ext_args } = args else {
                    disable_function_copy(&mut model.store, addr);
                    status.insert(TransferStatus::WARN_NULL_FUNC_ARGUMENT);
                    continue;
                };
                let results = map_bindings(f.results(), table, &model.store);
                let MappedBindings::Ok { list: results, external: ext_results } = results else {
                    disable_function_copy(&mut model.store, addr);
                    status.insert(TransferStatus::WARN_NULL_FUNC_RESULT);
                    continue;
                };

                write_function_bindings(&mut model.store, addr, &args, &results);

                let out_scoped = !ext_args.is_empty() || !ext_results.is_empty();
                let passes = f.driver().map(|d| filter.passes_driver(d)).unwrap_or(false);
                if out_scoped && !passes {
                    disable_function_copy(&mut model.store, addr);
                    continue;
                }
                for arg in &ext_args {
                    if arg.node != copy {
                        if let Some(node) = model.store.get_mut(arg.node) {
                            node.observers.append(ObserverKind::InputReaders, addr);
                        }
                    }
                }
                for res in &ext_results {
                    if res.node != copy {
                        if let Some(node) = model.store.get_mut(res.node) {
                            node.observers.append(ObserverKind::OutputWriters, addr);
                        }
                    }
                }
            }
            ParamData::Reference(r) => {
                let Some(target) = r.target() else { continue };
                let mut register = None;
                let new_target = match map_address(table, target) {
                    Some(mapped) => Some(mapped),
                    None => {
                        let passes = filter.passes_reference(&node_type, addr.slot.id());
                        if passes && resolves_in(&model.store, &target) {
                            register = Some(target.node_id());
                            Some(target)
                        } else {
                            None
                        }
                    }
                };
                if let Some(param) = model.store.param_mut(addr) {
                    if let Ok(rd) = param.reference_mut() {
                        rd.target = new_target;
                    }
                }
                if let Some(on) = register {
                    if let Some(node) = model.store.get_mut(on) {
                        node.observers.append(ObserverKind::Referrers, addr);
                    }
                }
            }
            ParamData::ReferenceList(l) => {
                if l.is_empty() {
                    continue;
                }
                let passes = filter.passes_reference(&node_type, addr.slot.id());
                let mut register = Vec::new();
                let kept: Vec<Address> = l
                    .targets()
                    .iter()
                    .filter_map(|t| match map_address(table, *t) {
                        Some(mapped) => Some(mapped),
                        None if passes && resolves_in(&model.store, t) => {
                            register.push(t.node_id());
                            Some(*t)
                        }
                        None => None,
                    })
                    .collect();
                if let Some(param) = model.store.param_mut(addr) {
                    if let Ok(ld) = param.reference_list_mut() {
                        ld.targets = kept;
                    }
                }
                for on in register {
                    if let Some(node) = model.store.get_mut(on) {
                        node.observers.append(ObserverKind::Referrers, addr);
                    }
                }
            }
            ParamData::Scalar(_) => {}
        }
    }
}

fn write_function_bindings(store: &mut Store, func: ParamAddr, args: &[ParamAddr], results: &[ParamAddr]) {
    if let Some(param) = store.param_mut(func) {
        if let Ok(f) = param.tree_function_mut() {
            f.arguments = args.to_vec();
            f.results = results.to_vec();
        }
    }
}

fn resolves_in(store: &Store, target: &Address) -> bool {
    store.resolves(target)
}
