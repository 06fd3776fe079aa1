//! The built-in expression evaluator driver.

use std::collections::HashMap;

use armature_core::{ModelError, ParamAddr, ValueType, EVALUATOR_DRIVER};
use armature_expr::{std_registry, Expr, FunctionRegistry};

use crate::driver::{ExecCtx, FuncDriver};
use crate::error::{ExecError, ExecResult};

/// Driver behind every evaluator function.
///
/// Evaluator bindings have a fixed shape: argument 0 and result 0 are the
/// target parameter itself, the remaining arguments are the variable
/// parameters the expression may name. Variables bind by parameter name and
/// read as numbers, with integers widened. The computed value lands in the
/// target silently and the target is impacted, never touched, so the write
/// is distinguishable from a user edit.
pub struct EvaluatorFunc {
    functions: FunctionRegistry,
}

impl EvaluatorFunc {
    /// An evaluator with the standard math functions.
    pub fn new() -> Self {
        EvaluatorFunc {
            functions: std_registry(),
        }
    }

    /// An evaluator with a caller-assembled function registry.
    pub fn with_functions(functions: FunctionRegistry) -> Self {
        EvaluatorFunc { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }
}

impl Default for EvaluatorFunc {
    fn default() -> Self {
        Self::new()
    }
}

impl FuncDriver for EvaluatorFunc {
    fn driver_id(&self) -> &str {
        EVALUATOR_DRIVER
    }

    fn execute(&self, ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
        let func = ctx.func();
        let target = ctx.args().first().copied().ok_or_else(|| {
            ExecError::Execution(func, "evaluator has no target binding".into())
        })?;

        let param = ctx
            .model()
            .param(target)
            .ok_or(ModelError::ParamNotFound(target))?;
        let source = param.eval_string().to_string();
        let declared = param.scalar()?.value_type();
        if source.trim().is_empty() {
            return Ok(());
        }

        let expr = Expr::parse(&source)?;
        let vars = self.bind_variables(ctx)?;
        let out = expr.eval(&vars, &self.functions)?;

        match declared {
            ValueType::Real => ctx.write_result(0, out),
            ValueType::Int => ctx.write_result(0, out.round() as i64),
            other => Err(ExecError::Execution(
                func,
                format!("cannot evaluate into a {other} parameter"),
            )),
        }
    }
}

impl EvaluatorFunc {
    fn bind_variables(&self, ctx: &ExecCtx<'_>) -> ExecResult<HashMap<String, f64>> {
        let mut vars = HashMap::new();
        for addr in variable_args(ctx.args()) {
            let param = ctx
                .model()
                .param(addr)
                .ok_or(ModelError::ParamNotFound(addr))?;
            let value = param
                .scalar()?
                .as_number()
                .map_err(|err| ModelError::Value { at: addr, err })?;
            vars.insert(param.name().to_string(), value);
        }
        Ok(vars)
    }
}

fn variable_args(args: &[ParamAddr]) -> impl Iterator<Item = ParamAddr> + '_ {
    args.iter().skip(1).copied()
}
