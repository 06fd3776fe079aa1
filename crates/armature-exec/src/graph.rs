//! Dependency graph over a model's connected functions.

use std::collections::{BTreeMap, VecDeque};

use armature_core::{Model, ParamAddr};

use crate::error::{ExecError, ExecResult};

/// Execution-ordered view of the connected tree functions in a model.
///
/// Functions are the vertices. An edge runs from `f` to `g` when some
/// result parameter of `f` appears among the arguments of `g`, so `f` must
/// run first. A function that reads its own result (evaluators do) gets no
/// self edge.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<ParamAddr>,
    edges: BTreeMap<ParamAddr, Vec<ParamAddr>>,
}

impl DependencyGraph {
    /// Builds the graph from every connected function in the model.
    /// Soft-disconnected functions keep their registry entry but are not
    /// vertices here.
    pub fn build(model: &Model) -> ExecResult<Self> {
        let mut funcs: Vec<ParamAddr> = Vec::new();
        for addr in model.functions() {
            let connected = model
                .param(addr)
                .and_then(|p| p.tree_function().ok())
                .map(|f| f.is_connected())
                .unwrap_or(false);
            if connected {
                funcs.push(addr);
            }
        }

        // Index results by address so argument lookups find their writers.
        let mut writers: BTreeMap<ParamAddr, Vec<ParamAddr>> = BTreeMap::new();
        for func in &funcs {
            for res in function_results(model, *func) {
                writers.entry(res).or_default().push(*func);
            }
        }

        let mut edges: BTreeMap<ParamAddr, Vec<ParamAddr>> =
            funcs.iter().map(|f| (*f, Vec::new())).collect();
        let mut in_degree: BTreeMap<ParamAddr, usize> =
            funcs.iter().map(|f| (*f, 0)).collect();

        for func in &funcs {
            for arg in function_arguments(model, *func) {
                let Some(producers) = writers.get(&arg) else { continue };
                for producer in producers {
                    if producer == func {
                        continue;
                    }
                    edges.get_mut(producer).unwrap().push(*func);
                    *in_degree.get_mut(func).unwrap() += 1;
                }
            }
        }

        // Kahn's algorithm. Seeding and adjacency are in address order, so
        // the resulting order is deterministic.
        let mut queue: VecDeque<ParamAddr> = in_degree
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(&f, _)| f)
            .collect();
        let mut order = Vec::with_capacity(funcs.len());

        while let Some(func) = queue.pop_front() {
            order.push(func);
            for next in &edges[&func] {
                let deg = in_degree.get_mut(next).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*next);
                }
            }
        }

        if order.len() != funcs.len() {
            return Err(ExecError::Cycle);
        }

        Ok(DependencyGraph { order, edges })
    }

    /// Functions in execution order.
    pub fn order(&self) -> &[ParamAddr] {
        &self.order
    }

    /// Functions directly downstream of `func`.
    pub fn successors(&self, func: ParamAddr) -> &[ParamAddr] {
        self.edges.get(&func).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, func: ParamAddr) -> bool {
        self.edges.contains_key(&func)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn function_arguments(model: &Model, func: ParamAddr) -> Vec<ParamAddr> {
    model
        .param(func)
        .and_then(|p| p.tree_function().ok())
        .map(|f| f.arguments().to_vec())
        .unwrap_or_default()
}

fn function_results(model: &Model, func: ParamAddr) -> Vec<ParamAddr> {
    model
        .param(func)
        .and_then(|p| p.tree_function().ok())
        .map(|f| f.results().to_vec())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_core::{Blueprint, ExecutionScope, ParamId};

    const P_X: ParamId = 0;
    const P_Y: ParamId = 1;
    const P_F: ParamId = 2;
    const P_G: ParamId = 3;

    fn stage_blueprint() -> Blueprint {
        Blueprint::new("stage")
            .scalar(P_X, "x", 0.0)
            .scalar(P_Y, "y", 0.0)
            .tree_function(P_F, "f")
            .tree_function(P_G, "g")
    }

    #[test]
    fn test_chain_orders_writers_first() {
        let bp = stage_blueprint();
        let mut model = Model::new();
        let n = model.create_node(&bp);
        let m = model.create_node(&bp);
        let scope = ExecutionScope::new();

        // Connect the consumer before the producer; order must not care.
        model
            .connect_tree_function(
                m,
                P_G,
                "demo.g",
                &[ParamAddr::user(n, P_Y)],
                &[ParamAddr::user(m, P_Y)],
                &scope,
            )
            .unwrap();
        model
            .connect_tree_function(
                n,
                P_F,
                "demo.f",
                &[ParamAddr::user(n, P_X)],
                &[ParamAddr::user(n, P_Y)],
                &scope,
            )
            .unwrap();

        let graph = DependencyGraph::build(&model).unwrap();
        let f = ParamAddr::user(n, P_F);
        let g = ParamAddr::user(m, P_G);
        assert_eq!(graph.order(), &[f, g]);
        assert_eq!(graph.successors(f), &[g]);
        assert!(graph.successors(g).is_empty());
    }

    #[test]
    fn test_cycle_is_detected() {
        let bp = stage_blueprint();
        let mut model = Model::new();
        let n = model.create_node(&bp);
        let scope = ExecutionScope::new();

        model
            .connect_tree_function(
                n,
                P_F,
                "demo.f",
                &[ParamAddr::user(n, P_Y)],
                &[ParamAddr::user(n, P_X)],
                &scope,
            )
            .unwrap();
        model
            .connect_tree_function(
                n,
                P_G,
                "demo.g",
                &[ParamAddr::user(n, P_X)],
                &[ParamAddr::user(n, P_Y)],
                &scope,
            )
            .unwrap();

        assert!(matches!(
            DependencyGraph::build(&model),
            Err(ExecError::Cycle)
        ));
    }

    #[test]
    fn test_self_reading_function_is_not_a_cycle() {
        let bp = stage_blueprint();
        let mut model = Model::new();
        let n = model.create_node(&bp);
        let scope = ExecutionScope::new();

        // Evaluator shape: the target is both argument and result.
        model
            .connect_tree_function(
                n,
                P_F,
                "demo.f",
                &[ParamAddr::user(n, P_X), ParamAddr::user(n, P_Y)],
                &[ParamAddr::user(n, P_X)],
                &scope,
            )
            .unwrap();

        let graph = DependencyGraph::build(&model).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.successors(ParamAddr::user(n, P_F)).is_empty());
    }

    #[test]
    fn test_soft_disconnected_functions_are_parked() {
        let bp = stage_blueprint();
        let mut model = Model::new();
        let n = model.create_node(&bp);
        let scope = ExecutionScope::new();

        model
            .connect_tree_function(
                n,
                P_F,
                "demo.f",
                &[ParamAddr::user(n, P_X)],
                &[ParamAddr::user(n, P_Y)],
                &scope,
            )
            .unwrap();
        model.disconnect_tree_function(n, P_F, &scope).unwrap();

        // The registry still lists the function, the graph does not.
        assert_eq!(model.functions().count(), 1);
        let graph = DependencyGraph::build(&model).unwrap();
        assert!(graph.is_empty());
        assert!(!graph.contains(ParamAddr::user(n, P_F)));
    }
}
