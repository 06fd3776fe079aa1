//! Error types shared across the data model.

use thiserror::Error;

use crate::address::{NodeId, ParamAddr};
use crate::param::ParamKind;
use crate::value::ValueType;

/// A scalar access or write did not match the parameter's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected}, got {got}")]
pub struct TypeError {
    pub expected: ValueType,
    pub got: ValueType,
}

impl TypeError {
    pub fn new(expected: ValueType, got: ValueType) -> Self {
        TypeError { expected, got }
    }
}

/// Errors raised by model structure and link maintenance operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("node n{0} not found")]
    NodeNotFound(NodeId),

    #[error("parameter {0} not found")]
    ParamNotFound(ParamAddr),

    #[error("parameter {at} is a {got} parameter, expected {expected}")]
    KindMismatch {
        at: ParamAddr,
        expected: ParamKind,
        got: ParamKind,
    },

    #[error("parameter {at}: {err}")]
    Value { at: ParamAddr, err: TypeError },

    #[error("parameter {0} has no evaluator slot")]
    NotExpressible(ParamAddr),

    #[error("parameter {at} holds a {got} scalar, evaluators need real or int")]
    NotEvaluatorCapable { at: ParamAddr, got: ValueType },

    #[error("execution graph is frozen")]
    GraphFrozen,

    #[error("node n{0} already has a parent")]
    HasParent(NodeId),

    #[error("adding n{child} under n{parent} would close a cycle")]
    ChildCycle { parent: NodeId, child: NodeId },

    #[error("reference list index {index} out of bounds, list holds {len}")]
    ListIndexOut { index: usize, len: usize },

    #[error("node type `{0}` is not registered")]
    TypeUnknown(String),

    #[error("observer {0} is not a reference parameter")]
    BadReferrer(ParamAddr),

    #[error("a command is already open")]
    CommandOpen,

    #[error("no command is open")]
    NoCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_addresses() {
        let err = ModelError::ParamNotFound(ParamAddr::user(2, 7));
        assert_eq!(err.to_string(), "parameter n2.u7 not found");

        let err = ModelError::KindMismatch {
            at: ParamAddr::user(1, 0),
            expected: ParamKind::Reference,
            got: ParamKind::Scalar,
        };
        assert_eq!(
            err.to_string(),
            "parameter n1.u0 is a scalar parameter, expected reference"
        );
    }
}
