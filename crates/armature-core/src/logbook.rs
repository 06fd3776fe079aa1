//! Modification journal driving conditional re-execution.
//!
//! The logbook keeps four sections of stamped addresses:
//!
//! - **touched**: directly edited by a user action,
//! - **impacted**: changed as a consequence of something else,
//! - **forced**: tree functions explicitly scheduled regardless of inputs,
//! - **heavy deployment**: tree functions that must run once after being
//!   (re)connected or pasted, before any input has changed.
//!
//! Executors consult it to decide what must run and release the relevant
//! sections once a pass completes. Stamps are monotonic counters handed out
//! by the owning model; they order entries but carry no wall-clock meaning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::{Address, NodeId};

/// JSON object keys must be strings, so stamped sections serialize as
/// ordered entry sequences instead of maps.
mod stamp_map {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::address::Address;

    pub fn serialize<S: Serializer>(
        map: &HashMap<Address, u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&Address, &u64)> = map.iter().collect();
        entries.sort();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<Address, u64>, D::Error> {
        let entries = Vec::<(Address, u64)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogBook {
    #[serde(with = "stamp_map")]
    touched: HashMap<Address, u64>,
    #[serde(with = "stamp_map")]
    impacted: HashMap<Address, u64>,
    #[serde(with = "stamp_map")]
    forced: HashMap<Address, u64>,
    #[serde(with = "stamp_map")]
    heavy: HashMap<Address, u64>,
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn touch(&mut self, addr: Address, stamp: u64) {
        self.touched.insert(addr, stamp);
    }

    pub(crate) fn impact(&mut self, addr: Address, stamp: u64) {
        self.impacted.insert(addr, stamp);
    }

    pub(crate) fn force(&mut self, addr: Address, stamp: u64) {
        self.forced.insert(addr, stamp);
    }

    pub(crate) fn heavy_deploy(&mut self, addr: Address, stamp: u64) {
        self.heavy.insert(addr, stamp);
    }

    pub fn is_touched(&self, addr: &Address) -> bool {
        self.touched.contains_key(addr)
    }

    pub fn is_impacted(&self, addr: &Address) -> bool {
        self.impacted.contains_key(addr)
    }

    /// Touched or impacted. This is the predicate execution filters check
    /// on function arguments.
    pub fn is_modified(&self, addr: &Address) -> bool {
        self.is_touched(addr) || self.is_impacted(addr)
    }

    pub fn is_forced(&self, addr: &Address) -> bool {
        self.forced.contains_key(addr)
    }

    pub fn is_heavy_deployment(&self, addr: &Address) -> bool {
        self.heavy.contains_key(addr)
    }

    pub fn touched_stamp(&self, addr: &Address) -> Option<u64> {
        self.touched.get(addr).copied()
    }

    pub fn impacted_stamp(&self, addr: &Address) -> Option<u64> {
        self.impacted.get(addr).copied()
    }

    /// Clears the touched, impacted and forced sections after an execution
    /// pass has consumed them.
    pub fn release_modified(&mut self) {
        self.touched.clear();
        self.impacted.clear();
        self.forced.clear();
    }

    /// Clears the heavy deployment section.
    pub fn release_heavy_deployment(&mut self) {
        self.heavy.clear();
    }

    pub fn clear(&mut self) {
        self.release_modified();
        self.release_heavy_deployment();
    }

    /// Drops every entry for one address from all sections.
    pub(crate) fn clear_references_for(&mut self, addr: &Address) {
        self.touched.remove(addr);
        self.impacted.remove(addr);
        self.forced.remove(addr);
        self.heavy.remove(addr);
    }

    /// Drops every entry belonging to a node, the node address itself and
    /// all of its parameter addresses. Called when the node leaves the
    /// model so the journal cannot hold dangling work.
    pub(crate) fn clear_node(&mut self, node: NodeId) {
        let keep = |addr: &Address, _: &mut u64| addr.node_id() != node;
        self.touched.retain(keep);
        self.impacted.retain(keep);
        self.forced.retain(keep);
        self.heavy.retain(keep);
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
            && self.impacted.is_empty()
            && self.forced.is_empty()
            && self.heavy.is_empty()
    }
}
