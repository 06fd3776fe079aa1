//! Stable addressing of nodes and parameters.
//!
//! Everything in the model is reachable through plain ids: nodes by
//! [`NodeId`], parameters by a [`ParamAddr`] combining the owning node with a
//! [`ParamSlot`]. References may point at either granularity, which is what
//! [`Address`] captures. Ids are never reused within a store and carry no
//! pointer semantics, so cyclic reference graphs cost nothing to represent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a node within a store.
pub type NodeId = u32;

/// Identifier of a parameter within its owning node's schema.
pub type ParamId = u32;

/// Which parameter scope of a node an id selects.
///
/// User parameters form the public, blueprint-declared schema. The `Eval`
/// scope holds the hidden tree functions backing expressible scalars; its
/// tags are allocated at registration time and never exposed in blueprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamSlot {
    User(ParamId),
    Eval(ParamId),
}

impl ParamSlot {
    /// True for the hidden evaluator scope.
    pub fn is_internal(&self) -> bool {
        matches!(self, ParamSlot::Eval(_))
    }

    pub fn id(&self) -> ParamId {
        match self {
            ParamSlot::User(id) | ParamSlot::Eval(id) => *id,
        }
    }
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSlot::User(id) => write!(f, "u{id}"),
            ParamSlot::Eval(id) => write!(f, "e{id}"),
        }
    }
}

/// Address of a single parameter: owning node plus slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParamAddr {
    pub node: NodeId,
    pub slot: ParamSlot,
}

impl ParamAddr {
    /// Address of a user-scope parameter.
    pub fn user(node: NodeId, id: ParamId) -> Self {
        ParamAddr {
            node,
            slot: ParamSlot::User(id),
        }
    }

    /// Address of a hidden evaluator function.
    pub fn eval(node: NodeId, tag: ParamId) -> Self {
        ParamAddr {
            node,
            slot: ParamSlot::Eval(tag),
        }
    }
}

impl fmt::Display for ParamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}.{}", self.node, self.slot)
    }
}

/// Target of a reference: a whole node or a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Address {
    Node(NodeId),
    Param(ParamAddr),
}

impl Address {
    /// The node this address belongs to (the node itself, or the parameter's
    /// owner).
    pub fn node_id(&self) -> NodeId {
        match self {
            Address::Node(id) => *id,
            Address::Param(addr) => addr.node,
        }
    }

    pub fn param(&self) -> Option<ParamAddr> {
        match self {
            Address::Node(_) => None,
            Address::Param(addr) => Some(*addr),
        }
    }
}

impl From<ParamAddr> for Address {
    fn from(addr: ParamAddr) -> Self {
        Address::Param(addr)
    }
}

impl From<NodeId> for Address {
    fn from(id: NodeId) -> Self {
        Address::Node(id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Node(id) => write!(f, "n{id}"),
            Address::Param(addr) => addr.fmt(f),
        }
    }
}
