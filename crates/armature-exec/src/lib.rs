//! Tree function execution for armature models.
//!
//! This crate layers execution on top of [`armature_core`]:
//!
//! - [`DependencyGraph`] - Topological order over connected functions
//! - [`FuncDriver`] / [`DriverRegistry`] - Function implementations
//! - [`Executor`] - The pass that runs what changed since last time
//! - [`EvaluatorFunc`] - The expression driver behind expressible parameters
//!
//! The model records which parameters changed; the executor turns that into
//! the minimal set of function runs, in dependency order, with the graph
//! frozen while drivers execute.

mod driver;
mod error;
mod eval;
mod exec;
mod graph;

pub use driver::{DriverRegistry, ExecCtx, FuncDriver};
pub use error::{ExecError, ExecResult};
pub use eval::EvaluatorFunc;
pub use exec::{ExecReport, Executor};
pub use graph::DependencyGraph;
