//! The execution pass.
//!
//! # Overview
//!
//! [`Executor::run`] walks the dependency graph in topological order and
//! invokes the driver of every function that has a reason to run: it was
//! forced, it is freshly connected, or one of its arguments changed since
//! the last pass. Drivers impact the results they write, so one upstream
//! edit re-runs the whole downstream chain in a single pass. When the pass
//! completes, the modification and deployment marks are released; a failed
//! pass keeps them, so the next run picks up where this one stopped.

use armature_core::{Address, ExecutionScope, Model, ParamAddr};

use crate::driver::{DriverRegistry, ExecCtx};
use crate::error::{ExecError, ExecResult};
use crate::graph::DependencyGraph;

/// Which functions one pass ran and which it left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecReport {
    pub executed: Vec<ParamAddr>,
    pub skipped: Vec<ParamAddr>,
}

impl ExecReport {
    pub fn ran(&self, func: ParamAddr) -> bool {
        self.executed.contains(&func)
    }
}

/// Runs connected functions against their drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Executor
    }

    /// One execution pass over the model.
    ///
    /// The graph is frozen for the duration: drivers receive a frozen
    /// [`ExecutionScope`] and structural edits from inside them fail.
    pub fn run(&self, model: &mut Model, drivers: &DriverRegistry) -> ExecResult<ExecReport> {
        let graph = DependencyGraph::build(model)?;
        let scope = ExecutionScope::frozen();
        let mut report = ExecReport::default();

        for func in graph.order().to_vec() {
            let Some((driver_id, args, results)) = function_binding(model, func) else {
                continue;
            };
            if !must_execute(model, func, &args) {
                report.skipped.push(func);
                continue;
            }
            let driver = drivers
                .get(&driver_id)
                .ok_or(ExecError::DriverMissing(driver_id))?;
            let mut ctx = ExecCtx::new(model, func, args, results, scope);
            driver.execute(&mut ctx)?;
            report.executed.push(func);
        }

        model.logbook_mut().release_modified();
        model.logbook_mut().release_heavy_deployment();
        Ok(report)
    }
}

/// A function runs when it was forced, freshly connected, or any argument
/// was touched or impacted since the last pass. Argument owners count too:
/// a node-level impact wakes every function reading from that node.
fn must_execute(model: &Model, func: ParamAddr, args: &[ParamAddr]) -> bool {
    let book = model.logbook();
    let faddr = Address::Param(func);
    if book.is_forced(&faddr) || book.is_heavy_deployment(&faddr) {
        return true;
    }
    args.iter().any(|arg| {
        book.is_modified(&Address::Param(*arg)) || book.is_modified(&Address::Node(arg.node))
    })
}

fn function_binding(
    model: &Model,
    func: ParamAddr,
) -> Option<(String, Vec<ParamAddr>, Vec<ParamAddr>)> {
    let data = model.param(func)?.tree_function().ok()?;
    let driver = data.driver()?.to_string();
    if !data.is_connected() {
        return None;
    }
    Some((driver, data.arguments().to_vec(), data.results().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvaluatorFunc;
    use armature_core::{Blueprint, NodeId, ParamId, Value};

    const P_IN: ParamId = 0;
    const P_OUT: ParamId = 1;
    const P_FUNC: ParamId = 2;

    fn stage_blueprint() -> Blueprint {
        Blueprint::new("stage")
            .scalar(P_IN, "input", 1.0)
            .scalar(P_OUT, "output", 0.0)
            .tree_function(P_FUNC, "compute")
    }

    struct Doubler;

    impl crate::driver::FuncDriver for Doubler {
        fn driver_id(&self) -> &str {
            "test.double"
        }

        fn execute(&self, ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
            let v = ctx.read_arg(0)?.as_number().unwrap();
            ctx.write_result(0, v * 2.0)
        }
    }

    fn registry() -> DriverRegistry {
        let mut drivers = DriverRegistry::new();
        drivers.register(Doubler);
        drivers
    }

    /// `a.output = 2 * a.input` feeding `b.output = 2 * a.output`.
    fn chain_rig() -> (Model, NodeId, NodeId) {
        let bp = stage_blueprint();
        let mut model = Model::new();
        let a = model.create_node(&bp);
        let b = model.create_node(&bp);
        let scope = ExecutionScope::new();
        model
            .connect_tree_function(
                a,
                P_FUNC,
                "test.double",
                &[ParamAddr::user(a, P_IN)],
                &[ParamAddr::user(a, P_OUT)],
                &scope,
            )
            .unwrap();
        model
            .connect_tree_function(
                b,
                P_FUNC,
                "test.double",
                &[ParamAddr::user(a, P_OUT)],
                &[ParamAddr::user(b, P_OUT)],
                &scope,
            )
            .unwrap();
        (model, a, b)
    }

    fn scalar(model: &Model, node: NodeId, id: ParamId) -> Value {
        model.scalar(node, id).unwrap().clone()
    }

    #[test]
    fn test_fresh_functions_run_once_then_settle() {
        let (mut model, a, b) = chain_rig();
        let drivers = registry();

        let report = Executor::new().run(&mut model, &drivers).unwrap();
        assert_eq!(
            report.executed,
            vec![ParamAddr::user(a, P_FUNC), ParamAddr::user(b, P_FUNC)]
        );
        assert_eq!(scalar(&model, a, P_OUT), Value::Real(2.0));
        assert_eq!(scalar(&model, b, P_OUT), Value::Real(4.0));

        // Nothing changed since, so a second pass runs nothing.
        let report = Executor::new().run(&mut model, &drivers).unwrap();
        assert!(report.executed.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_touch_wakes_the_downstream_chain() {
        let (mut model, a, b) = chain_rig();
        let drivers = registry();
        Executor::new().run(&mut model, &drivers).unwrap();

        model.set_scalar(a, P_IN, 3.0).unwrap();
        let report = Executor::new().run(&mut model, &drivers).unwrap();

        assert_eq!(report.executed.len(), 2);
        assert_eq!(scalar(&model, a, P_OUT), Value::Real(6.0));
        assert_eq!(scalar(&model, b, P_OUT), Value::Real(12.0));
    }

    #[test]
    fn test_force_runs_a_single_function() {
        let (mut model, a, b) = chain_rig();
        let drivers = registry();
        Executor::new().run(&mut model, &drivers).unwrap();

        model.force_execution(ParamAddr::user(b, P_FUNC)).unwrap();
        let report = Executor::new().run(&mut model, &drivers).unwrap();

        assert_eq!(report.executed, vec![ParamAddr::user(b, P_FUNC)]);
        assert_eq!(report.skipped, vec![ParamAddr::user(a, P_FUNC)]);
    }

    #[test]
    fn test_missing_driver_keeps_marks_for_retry() {
        let bp = stage_blueprint();
        let mut model = Model::new();
        let n = model.create_node(&bp);
        model
            .connect_tree_function(
                n,
                P_FUNC,
                "ghost.driver",
                &[ParamAddr::user(n, P_IN)],
                &[ParamAddr::user(n, P_OUT)],
                &ExecutionScope::new(),
            )
            .unwrap();

        let err = Executor::new().run(&mut model, &registry()).unwrap_err();
        assert!(matches!(err, ExecError::DriverMissing(id) if id == "ghost.driver"));
        // The failed pass released nothing.
        assert!(model
            .logbook()
            .is_heavy_deployment(&Address::Param(ParamAddr::user(n, P_FUNC))));
    }

    #[test]
    fn test_driver_bounds_errors_surface() {
        struct OutOfRange;
        impl crate::driver::FuncDriver for OutOfRange {
            fn driver_id(&self) -> &str {
                "test.oob"
            }
            fn execute(&self, ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
                ctx.read_arg(5)?;
                Ok(())
            }
        }

        let bp = stage_blueprint();
        let mut model = Model::new();
        let n = model.create_node(&bp);
        model
            .connect_tree_function(
                n,
                P_FUNC,
                "test.oob",
                &[ParamAddr::user(n, P_IN)],
                &[ParamAddr::user(n, P_OUT)],
                &ExecutionScope::new(),
            )
            .unwrap();
        let mut drivers = DriverRegistry::new();
        drivers.register(OutOfRange);

        let err = Executor::new().run(&mut model, &drivers).unwrap_err();
        assert!(matches!(err, ExecError::Execution(f, _) if f == ParamAddr::user(n, P_FUNC)));
    }

    #[test]
    fn test_evaluator_drives_expressible_parameter() {
        const P_RADIUS: ParamId = 0;
        const P_K: ParamId = 0;
        let part = Blueprint::new("part").expressible_scalar(P_RADIUS, "radius", 1.0);
        let params = Blueprint::new("params").scalar(P_K, "k", 3.0);

        let mut model = Model::new();
        let p = model.create_node(&part);
        let v = model.create_node(&params);
        let scope = ExecutionScope::new();

        model.set_eval_string(p, P_RADIUS, "2 * k + 1").unwrap();
        model
            .connect_evaluator(p, P_RADIUS, &[ParamAddr::user(v, P_K)], &scope)
            .unwrap();

        let mut drivers = DriverRegistry::new();
        drivers.register(EvaluatorFunc::new());

        Executor::new().run(&mut model, &drivers).unwrap();
        assert_eq!(model.scalar(p, P_RADIUS).unwrap(), &Value::Real(7.0));

        // A variable edit re-evaluates the expression.
        model.set_scalar(v, P_K, 5.0).unwrap();
        Executor::new().run(&mut model, &drivers).unwrap();
        assert_eq!(model.scalar(p, P_RADIUS).unwrap(), &Value::Real(11.0));
    }

    #[test]
    fn test_evaluator_rounds_into_int_targets() {
        const P_COUNT: ParamId = 0;
        let part = Blueprint::new("part").expressible_scalar(P_COUNT, "count", 4i64);

        let mut model = Model::new();
        let p = model.create_node(&part);
        model.set_eval_string(p, P_COUNT, "7 / 2").unwrap();
        model
            .connect_evaluator(p, P_COUNT, &[], &ExecutionScope::new())
            .unwrap();

        let mut drivers = DriverRegistry::new();
        drivers.register(EvaluatorFunc::new());
        Executor::new().run(&mut model, &drivers).unwrap();

        assert_eq!(model.scalar(p, P_COUNT).unwrap(), &Value::Int(4));
    }
}
