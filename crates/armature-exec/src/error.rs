//! Error types for function execution.

use armature_core::{ModelError, ParamAddr};

/// Errors raised while building or running the function graph.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The dependency graph contains a cycle.
    #[error("function dependency cycle detected")]
    Cycle,

    /// A connected function names a driver nobody registered.
    #[error("no driver registered for `{0}`")]
    DriverMissing(String),

    /// A driver refused or failed its invocation.
    #[error("function {0} failed: {1}")]
    Execution(ParamAddr, String),

    /// The model rejected a read or write.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// An evaluator expression failed to parse or evaluate.
    #[error(transparent)]
    Expr(#[from] armature_expr::ExprError),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
