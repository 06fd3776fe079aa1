//! Core data model for armature.
//!
//! This crate provides the foundational types for the armature ecosystem:
//!
//! - [`Model`] - Persistent node store, link integrity and the [`LogBook`]
//! - [`Node`] / [`Parameter`] - Typed objects and their data slots
//! - [`Blueprint`] - Declarative node type definitions
//! - [`CopyPasteEngine`] - Subtree transfer through a detached buffer
//!
//! Nodes never hold direct pointers to each other. Every connection is an
//! [`Address`] resolved against the model, and every connection that makes
//! one node depend on another is mirrored by a back-reference on the target,
//! so both ends of a link can always be walked.

mod address;
mod blueprint;
mod clipboard;
mod error;
mod links;
mod logbook;
mod model;
mod node;
mod param;
mod removal;
mod store;
mod value;

pub use address::{Address, NodeId, ParamAddr, ParamId, ParamSlot};
pub use blueprint::{Blueprint, NodeRegistry, ParamInit, ParamSpec};
pub use clipboard::{
    CopyPasteEngine, NameSuffix, ReferenceFilter, RelocationTable, TransferError, TransferStatus,
    BUFFER_ID_BASE,
};
pub use error::{ModelError, TypeError};
pub use glam;
pub use links::EVALUATOR_DRIVER;
pub use logbook::LogBook;
pub use model::{ExecutionScope, Model};
pub use node::{Node, ObserverKind, Observers};
pub use param::{
    ModificationType, ParamData, ParamKind, Parameter, ReferenceData, ReferenceListData,
    TreeFunctionData,
};
pub use removal::{DefaultHooks, RemovalHooks};
pub use store::Store;
pub use value::{Value, ValueType};
