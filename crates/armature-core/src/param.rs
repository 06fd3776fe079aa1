//! Parameters: the typed payload slots of a node.
//!
//! Every parameter is one of four kinds. Scalars hold a [`Value`], reference
//! kinds hold addresses of other objects, and tree functions hold the
//! argument and result bindings that drive dependent evaluation. The kind is
//! decided by the node's blueprint and never changes afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{Address, NodeId, ParamAddr, ParamSlot};
use crate::error::ModelError;
use crate::value::Value;

/// The four parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Scalar,
    Reference,
    ReferenceList,
    TreeFunction,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Scalar => "scalar",
            ParamKind::Reference => "reference",
            ParamKind::ReferenceList => "reference list",
            ParamKind::TreeFunction => "tree function",
        };
        f.write_str(name)
    }
}

/// How a mutation is stamped into the logbook.
///
/// `Touched` records a direct user edit, `Impacted` an indirect consequence.
/// `Silent` writes bypass the logbook entirely, which is what function
/// drivers use for their own results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationType {
    Silent,
    Touched,
    Impacted,
}

/// Payload of a single-target reference parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub(crate) target: Option<Address>,
}

impl ReferenceData {
    pub fn target(&self) -> Option<Address> {
        self.target
    }

    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }
}

/// Payload of an ordered multi-target reference parameter.
///
/// Duplicate targets are allowed; positions are meaningful to callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceListData {
    pub(crate) targets: Vec<Address>,
}

impl ReferenceListData {
    pub fn targets(&self) -> &[Address] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, target: &Address) -> bool {
        self.targets.contains(target)
    }

    /// True if any stored target belongs to the given node, either the node
    /// address itself or any of its parameters.
    pub fn refers_to_node(&self, node: NodeId) -> bool {
        self.targets.iter().any(|t| t.node_id() == node)
    }

    pub(crate) fn insert_at(&mut self, offset: usize, target: Address) {
        self.targets.insert(offset, target);
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Address {
        self.targets.remove(index)
    }

    /// Drops every occurrence of `target`. Returns how many were removed.
    pub(crate) fn remove_occurrences(&mut self, target: &Address) -> usize {
        let before = self.targets.len();
        self.targets.retain(|t| t != target);
        before - self.targets.len()
    }
}

/// Payload of a tree function parameter: the persistent execution binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeFunctionData {
    pub(crate) driver: Option<String>,
    pub(crate) arguments: Vec<ParamAddr>,
    pub(crate) results: Vec<ParamAddr>,
}

impl TreeFunctionData {
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn arguments(&self) -> &[ParamAddr] {
        &self.arguments
    }

    pub fn results(&self) -> &[ParamAddr] {
        &self.results
    }

    /// A function participates in execution once it has a driver and at
    /// least one argument. Result-less functions are legal.
    pub fn is_connected(&self) -> bool {
        self.driver.is_some() && !self.arguments.is_empty()
    }

    /// Clears the argument and result bindings. With `completely` the driver
    /// association goes too; otherwise the parameter stays claimed by its
    /// driver and can be reconnected later.
    pub(crate) fn disconnect(&mut self, completely: bool) {
        self.arguments.clear();
        self.results.clear();
        if completely {
            self.driver = None;
        }
    }
}

/// Kind-discriminated parameter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamData {
    Scalar(Value),
    Reference(ReferenceData),
    ReferenceList(ReferenceListData),
    TreeFunction(TreeFunctionData),
}

impl ParamData {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamData::Scalar(_) => ParamKind::Scalar,
            ParamData::Reference(_) => ParamKind::Reference,
            ParamData::ReferenceList(_) => ParamKind::ReferenceList,
            ParamData::TreeFunction(_) => ParamKind::TreeFunction,
        }
    }
}

/// A parameter instance living inside a node.
///
/// Besides the payload it carries the common metadata every kind shares:
/// a display name, an optional semantic id for lookups that survive schema
/// evolution, free-form user flags, the evaluator expression string, the
/// validity and pending approval flags, and a modification stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub(crate) owner: NodeId,
    pub(crate) slot: ParamSlot,
    pub(crate) name: String,
    pub(crate) semantic_id: String,
    pub(crate) user_flags: u32,
    pub(crate) eval_string: String,
    pub(crate) valid: bool,
    pub(crate) pending: bool,
    pub(crate) mtime: u64,
    pub(crate) data: ParamData,
}

impl Parameter {
    pub(crate) fn new(owner: NodeId, slot: ParamSlot, name: &str, data: ParamData) -> Self {
        Parameter {
            owner,
            slot,
            name: name.to_string(),
            semantic_id: String::new(),
            user_flags: 0,
            eval_string: String::new(),
            valid: true,
            pending: false,
            mtime: 0,
            data,
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn slot(&self) -> ParamSlot {
        self.slot
    }

    pub fn addr(&self) -> ParamAddr {
        ParamAddr {
            node: self.owner,
            slot: self.slot,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn semantic_id(&self) -> &str {
        &self.semantic_id
    }

    pub fn user_flags(&self) -> u32 {
        self.user_flags
    }

    pub fn eval_string(&self) -> &str {
        &self.eval_string
    }

    pub fn is_valid_data(&self) -> bool {
        self.valid
    }

    pub fn is_pending_data(&self) -> bool {
        self.pending
    }

    /// Stamp of the last recorded mutation.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn kind(&self) -> ParamKind {
        self.data.kind()
    }

    pub fn data(&self) -> &ParamData {
        &self.data
    }

    fn kind_mismatch(&self, expected: ParamKind) -> ModelError {
        ModelError::KindMismatch {
            at: self.addr(),
            expected,
            got: self.kind(),
        }
    }

    pub fn scalar(&self) -> Result<&Value, ModelError> {
        match &self.data {
            ParamData::Scalar(v) => Ok(v),
            _ => Err(self.kind_mismatch(ParamKind::Scalar)),
        }
    }

    pub fn reference(&self) -> Result<&ReferenceData, ModelError> {
        match &self.data {
            ParamData::Reference(r) => Ok(r),
            _ => Err(self.kind_mismatch(ParamKind::Reference)),
        }
    }

    pub fn reference_list(&self) -> Result<&ReferenceListData, ModelError> {
        match &self.data {
            ParamData::ReferenceList(r) => Ok(r),
            _ => Err(self.kind_mismatch(ParamKind::ReferenceList)),
        }
    }

    pub fn tree_function(&self) -> Result<&TreeFunctionData, ModelError> {
        match &self.data {
            ParamData::TreeFunction(t) => Ok(t),
            _ => Err(self.kind_mismatch(ParamKind::TreeFunction)),
        }
    }

    pub(crate) fn scalar_mut(&mut self) -> Result<&mut Value, ModelError> {
        let err = self.kind_mismatch(ParamKind::Scalar);
        match &mut self.data {
            ParamData::Scalar(v) => Ok(v),
            _ => Err(err),
        }
    }

    pub(crate) fn reference_mut(&mut self) -> Result<&mut ReferenceData, ModelError> {
        let err = self.kind_mismatch(ParamKind::Reference);
        match &mut self.data {
            ParamData::Reference(r) => Ok(r),
            _ => Err(err),
        }
    }

    pub(crate) fn reference_list_mut(&mut self) -> Result<&mut ReferenceListData, ModelError> {
        let err = self.kind_mismatch(ParamKind::ReferenceList);
        match &mut self.data {
            ParamData::ReferenceList(r) => Ok(r),
            _ => Err(err),
        }
    }

    pub(crate) fn tree_function_mut(&mut self) -> Result<&mut TreeFunctionData, ModelError> {
        let err = self.kind_mismatch(ParamKind::TreeFunction);
        match &mut self.data {
            ParamData::TreeFunction(t) => Ok(t),
            _ => Err(err),
        }
    }

    /// Structural sanity: the recorded owner and slot agree with where the
    /// parameter actually sits. Catches id-rewrite mistakes after copies.
    pub(crate) fn is_consistent_at(&self, node: NodeId, slot: ParamSlot) -> bool {
        self.owner == node && self.slot == slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_views() {
        let p = Parameter::new(
            1,
            ParamSlot::User(0),
            "radius",
            ParamData::Scalar(Value::Real(2.0)),
        );
        assert_eq!(p.kind(), ParamKind::Scalar);
        assert_eq!(p.scalar().unwrap(), &Value::Real(2.0));

        let err = p.reference().unwrap_err();
        assert_eq!(
            err,
            ModelError::KindMismatch {
                at: ParamAddr::user(1, 0),
                expected: ParamKind::Reference,
                got: ParamKind::Scalar,
            }
        );
    }

    #[test]
    fn test_reference_list_occurrences() {
        let mut list = ReferenceListData::default();
        let a = Address::Node(5);
        let b = Address::Param(ParamAddr::user(5, 1));
        let c = Address::Node(9);
        list.insert_at(0, a);
        list.insert_at(1, b);
        list.insert_at(2, c);
        list.insert_at(3, a);

        assert!(list.refers_to_node(5));
        assert_eq!(list.remove_occurrences(&a), 2);
        assert_eq!(list.targets(), &[b, c]);
        assert!(list.refers_to_node(5));
        list.remove_occurrences(&b);
        assert!(!list.refers_to_node(5));
    }

    #[test]
    fn test_tree_function_connected() {
        let mut f = TreeFunctionData::default();
        assert!(!f.is_connected());
        f.driver = Some("demo".to_string());
        assert!(!f.is_connected());
        f.arguments.push(ParamAddr::user(1, 0));
        assert!(f.is_connected());

        f.disconnect(false);
        assert!(!f.is_connected());
        assert_eq!(f.driver(), Some("demo"));

        f.arguments.push(ParamAddr::user(1, 0));
        f.disconnect(true);
        assert_eq!(f.driver(), None);
    }
}
