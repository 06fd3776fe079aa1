//! Function drivers and their execution context.
//!
//! # Overview
//!
//! A [`FuncDriver`] is the implementation behind a tree function parameter:
//! the parameter stores the driver id and the bound argument/result
//! addresses, the [`DriverRegistry`] maps the id back to code at execution
//! time. Drivers never see the model directly for writing; all mutation
//! goes through [`ExecCtx::write_result`], which keeps writes inside the
//! declared result set while the graph is frozen.

use std::collections::HashMap;

use armature_core::{
    ExecutionScope, Model, ModelError, ModificationType, ParamAddr, Value,
};

use crate::error::{ExecError, ExecResult};

/// Context for one function invocation.
pub struct ExecCtx<'a> {
    model: &'a mut Model,
    func: ParamAddr,
    args: Vec<ParamAddr>,
    results: Vec<ParamAddr>,
    scope: ExecutionScope,
}

impl<'a> ExecCtx<'a> {
    pub(crate) fn new(
        model: &'a mut Model,
        func: ParamAddr,
        args: Vec<ParamAddr>,
        results: Vec<ParamAddr>,
        scope: ExecutionScope,
    ) -> Self {
        ExecCtx {
            model,
            func,
            args,
            results,
            scope,
        }
    }

    /// Address of the function parameter being executed.
    pub fn func(&self) -> ParamAddr {
        self.func
    }

    /// The scope of the running pass. Frozen while the executor walks the
    /// graph, so structural edits from inside drivers are rejected.
    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    pub fn args(&self) -> &[ParamAddr] {
        &self.args
    }

    pub fn results(&self) -> &[ParamAddr] {
        &self.results
    }

    /// Read access to the whole model.
    pub fn model(&self) -> &Model {
        self.model
    }

    /// Reads the scalar behind argument `index`.
    pub fn read_arg(&self, index: usize) -> ExecResult<Value> {
        let addr = self.arg_addr(index)?;
        self.read_scalar(addr)
    }

    /// Reads the scalar currently stored behind result `index`.
    pub fn read_result(&self, index: usize) -> ExecResult<Value> {
        let addr = self.result_addr(index)?;
        self.read_scalar(addr)
    }

    /// Writes result `index`. The write is silent, then the result is
    /// stamped as impacted so downstream functions pick it up.
    pub fn write_result(&mut self, index: usize, value: impl Into<Value>) -> ExecResult<()> {
        let addr = self.result_addr(index)?;
        if addr.slot.is_internal() {
            return Err(ExecError::Execution(
                self.func,
                format!("result {index} is not a data parameter"),
            ));
        }
        self.model
            .set_scalar_with(addr.node, addr.slot.id(), value, ModificationType::Silent)?;
        self.model.impact(addr)?;
        Ok(())
    }

    fn arg_addr(&self, index: usize) -> ExecResult<ParamAddr> {
        self.args.get(index).copied().ok_or_else(|| {
            ExecError::Execution(self.func, format!("argument {index} out of range"))
        })
    }

    fn result_addr(&self, index: usize) -> ExecResult<ParamAddr> {
        self.results.get(index).copied().ok_or_else(|| {
            ExecError::Execution(self.func, format!("result {index} out of range"))
        })
    }

    fn read_scalar(&self, addr: ParamAddr) -> ExecResult<Value> {
        let param = self
            .model
            .param(addr)
            .ok_or(ModelError::ParamNotFound(addr))?;
        Ok(param.scalar()?.clone())
    }
}

/// A tree function implementation.
pub trait FuncDriver: Send + Sync {
    /// Stable identifier bound into function parameters.
    fn driver_id(&self) -> &str;

    /// Runs the function against its bound arguments and results.
    fn execute(&self, ctx: &mut ExecCtx<'_>) -> ExecResult<()>;
}

/// Driver lookup by id.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Box<dyn FuncDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver under its own id, replacing any previous one.
    pub fn register(&mut self, driver: impl FuncDriver + 'static) {
        self.drivers
            .insert(driver.driver_id().to_string(), Box::new(driver));
    }

    pub fn get(&self, id: &str) -> Option<&dyn FuncDriver> {
        self.drivers.get(id).map(|d| d.as_ref())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.drivers.contains_key(id)
    }

    /// Registered driver ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
