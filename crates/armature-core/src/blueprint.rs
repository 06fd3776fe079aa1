//! Node type blueprints and the type registry.
//!
//! A [`Blueprint`] declares the parameter schema of a node type once; the
//! model instantiates nodes from it. Registering blueprints in a
//! [`NodeRegistry`] lets callers create nodes by type name, which is how
//! persistence and copy tooling resolve types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::ParamId;
use crate::param::ParamKind;
use crate::value::Value;

/// Initial payload of a declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamInit {
    /// A scalar with its initial value. The value's type is the parameter's
    /// declared type for the rest of its life.
    Scalar(Value),
    Reference,
    ReferenceList,
    TreeFunction,
}

impl ParamInit {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamInit::Scalar(_) => ParamKind::Scalar,
            ParamInit::Reference => ParamKind::Reference,
            ParamInit::ReferenceList => ParamKind::ReferenceList,
            ParamInit::TreeFunction => ParamKind::TreeFunction,
        }
    }
}

/// Declaration of one parameter in a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub id: ParamId,
    pub name: String,
    pub init: ParamInit,
    /// Expressible scalars get a hidden evaluator slot at registration.
    pub expressible: bool,
    pub user_flags: u32,
    pub semantic_id: String,
}

impl ParamSpec {
    pub fn new(id: ParamId, name: &str, init: ParamInit) -> Self {
        ParamSpec {
            id,
            name: name.to_string(),
            init,
            expressible: false,
            user_flags: 0,
            semantic_id: String::new(),
        }
    }

    pub fn expressible(mut self) -> Self {
        self.expressible = true;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.user_flags = flags;
        self
    }

    pub fn with_semantic_id(mut self, sid: &str) -> Self {
        self.semantic_id = sid.to_string();
        self
    }
}

/// Parameter schema of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub(crate) type_name: String,
    pub(crate) params: Vec<ParamSpec>,
}

impl Blueprint {
    pub fn new(type_name: &str) -> Self {
        Blueprint {
            type_name: type_name.to_string(),
            params: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn scalar(self, id: ParamId, name: &str, initial: impl Into<Value>) -> Self {
        self.param(ParamSpec::new(id, name, ParamInit::Scalar(initial.into())))
    }

    /// A scalar that may be driven by an expression.
    pub fn expressible_scalar(self, id: ParamId, name: &str, initial: impl Into<Value>) -> Self {
        self.param(ParamSpec::new(id, name, ParamInit::Scalar(initial.into())).expressible())
    }

    pub fn reference(self, id: ParamId, name: &str) -> Self {
        self.param(ParamSpec::new(id, name, ParamInit::Reference))
    }

    pub fn reference_list(self, id: ParamId, name: &str) -> Self {
        self.param(ParamSpec::new(id, name, ParamInit::ReferenceList))
    }

    pub fn tree_function(self, id: ParamId, name: &str) -> Self {
        self.param(ParamSpec::new(id, name, ParamInit::TreeFunction))
    }
}

/// Registry of blueprints keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    blueprints: HashMap<String, Blueprint>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a blueprint under its type name. The first registration of
    /// a name wins; re-registrations are ignored. Returns whether the
    /// blueprint was inserted.
    pub fn register(&mut self, blueprint: Blueprint) -> bool {
        if self.blueprints.contains_key(blueprint.type_name()) {
            return false;
        }
        self.blueprints
            .insert(blueprint.type_name.clone(), blueprint);
        true
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.blueprints.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&Blueprint> {
        self.blueprints.get(type_name)
    }

    /// Registered type names in sorted order.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blueprints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
