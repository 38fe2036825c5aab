//! End-to-end checks against the public surface only: a small two-method
//! program, solved and queried the way an analysis client would.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use supergraph_solver::{
    AllTop, EdgeFunctionRef, EdgeFunctions, EdgeIdentity, FlowFunctionRef, FlowFunctions,
    IDESolver, Identity, InterproceduralCfg, JoinLattice, OptimizationMode, TabulationProblem,
};

type Node = &'static str;
type Method = &'static str;
type Fact = &'static str;

const ZERO: Fact = "<zero>";

/// main: m0 (calls f at m0, returning to m1) → m1 → m2; f: f0 → f1.
struct DemoIcfg {
    succs: FxHashMap<Node, Vec<Node>>,
    preds: FxHashMap<Node, Vec<Node>>,
    methods: FxHashMap<Node, Method>,
    starts: FxHashMap<Method, Vec<Node>>,
    exits: FxHashSet<Node>,
}

impl DemoIcfg {
    fn new() -> Self {
        let mut succs: FxHashMap<Node, Vec<Node>> = FxHashMap::default();
        let mut preds: FxHashMap<Node, Vec<Node>> = FxHashMap::default();
        for (from, to) in [("m0", "m1"), ("m1", "m2"), ("f0", "f1")] {
            succs.entry(from).or_default().push(to);
            preds.entry(to).or_default().push(from);
        }

        let methods = [
            ("m0", "main"),
            ("m1", "main"),
            ("m2", "main"),
            ("f0", "f"),
            ("f1", "f"),
        ]
        .into_iter()
        .collect();

        let mut starts: FxHashMap<Method, Vec<Node>> = FxHashMap::default();
        starts.insert("main", vec!["m0"]);
        starts.insert("f", vec!["f0"]);

        Self {
            succs,
            preds,
            methods,
            starts,
            exits: ["m2", "f1"].into_iter().collect(),
        }
    }
}

impl InterproceduralCfg<Node, Method> for DemoIcfg {
    fn method_of(&self, stmt: &Node) -> Method {
        self.methods[stmt]
    }

    fn preds_of(&self, stmt: &Node) -> Vec<Node> {
        self.preds.get(stmt).cloned().unwrap_or_default()
    }

    fn succs_of(&self, stmt: &Node) -> Vec<Node> {
        self.succs.get(stmt).cloned().unwrap_or_default()
    }

    fn callees_of_call_at(&self, call_stmt: &Node) -> Vec<Method> {
        if *call_stmt == "m0" {
            vec!["f"]
        } else {
            Vec::new()
        }
    }

    fn callers_of(&self, method: &Method) -> Vec<Node> {
        if *method == "f" {
            vec!["m0"]
        } else {
            Vec::new()
        }
    }

    fn calls_from_within(&self, method: &Method) -> Vec<Node> {
        if *method == "main" {
            vec!["m0"]
        } else {
            Vec::new()
        }
    }

    fn start_points_of(&self, method: &Method) -> Vec<Node> {
        self.starts.get(method).cloned().unwrap_or_default()
    }

    fn return_sites_of_call_at(&self, call_stmt: &Node) -> Vec<Node> {
        if *call_stmt == "m0" {
            vec!["m1"]
        } else {
            Vec::new()
        }
    }

    fn is_call_stmt(&self, stmt: &Node) -> bool {
        *stmt == "m0"
    }

    fn is_exit_stmt(&self, stmt: &Node) -> bool {
        self.exits.contains(stmt)
    }

    fn is_start_point(&self, stmt: &Node) -> bool {
        *stmt == "m0" || *stmt == "f0"
    }

    fn all_non_call_start_nodes(&self) -> Vec<Node> {
        vec!["m1", "m2", "f1"]
    }
}

struct IdentityFlows;

impl FlowFunctions<Node, Fact, Method> for IdentityFlows {
    fn normal_flow_function(&self, _curr: &Node, _succ: &Node) -> FlowFunctionRef<Fact> {
        Arc::new(Identity)
    }

    fn call_flow_function(&self, _call_stmt: &Node, _callee: &Method) -> FlowFunctionRef<Fact> {
        Arc::new(Identity)
    }

    fn return_flow_function(
        &self,
        _call_site: &Node,
        _callee: &Method,
        _exit_stmt: &Node,
        _return_site: &Node,
    ) -> FlowFunctionRef<Fact> {
        Arc::new(Identity)
    }

    fn call_to_return_flow_function(
        &self,
        _call_site: &Node,
        _return_site: &Node,
    ) -> FlowFunctionRef<Fact> {
        Arc::new(Identity)
    }
}

struct IdentityEdges;

impl EdgeFunctions<Node, Fact, Method, i64> for IdentityEdges {
    fn normal_edge_function(
        &self,
        _curr: &Node,
        _curr_fact: &Fact,
        _succ: &Node,
        _succ_fact: &Fact,
    ) -> EdgeFunctionRef<i64> {
        Arc::new(EdgeIdentity)
    }

    fn call_edge_function(
        &self,
        _call_stmt: &Node,
        _fact_at_call: &Fact,
        _callee: &Method,
        _fact_at_entry: &Fact,
    ) -> EdgeFunctionRef<i64> {
        Arc::new(EdgeIdentity)
    }

    fn return_edge_function(
        &self,
        _call_site: &Node,
        _callee: &Method,
        _exit_stmt: &Node,
        _exit_fact: &Fact,
        _return_site: &Node,
        _return_fact: &Fact,
    ) -> EdgeFunctionRef<i64> {
        Arc::new(EdgeIdentity)
    }

    fn call_to_return_edge_function(
        &self,
        _call_site: &Node,
        _call_fact: &Fact,
        _return_site: &Node,
        _return_fact: &Fact,
    ) -> EdgeFunctionRef<i64> {
        Arc::new(EdgeIdentity)
    }
}

struct MinLattice;

impl JoinLattice<i64> for MinLattice {
    fn top_element(&self) -> i64 {
        i64::MAX
    }

    fn bottom_element(&self) -> i64 {
        i64::MIN
    }

    fn join(&self, left: &i64, right: &i64) -> i64 {
        (*left).min(*right)
    }
}

struct DemoProblem {
    seeds: Vec<Node>,
}

impl TabulationProblem<Node, Fact, Method, i64> for DemoProblem {
    fn flow_functions(&self) -> Arc<dyn FlowFunctions<Node, Fact, Method>> {
        Arc::new(IdentityFlows)
    }

    fn edge_functions(&self) -> Arc<dyn EdgeFunctions<Node, Fact, Method, i64>> {
        Arc::new(IdentityEdges)
    }

    fn interprocedural_cfg(&self) -> Arc<dyn InterproceduralCfg<Node, Method>> {
        Arc::new(DemoIcfg::new())
    }

    fn initial_seeds(&self) -> Vec<Node> {
        self.seeds.clone()
    }

    fn zero_value(&self) -> Fact {
        ZERO
    }

    fn join_lattice(&self) -> Arc<dyn JoinLattice<i64>> {
        Arc::new(MinLattice)
    }

    fn all_top_function(&self) -> EdgeFunctionRef<i64> {
        Arc::new(AllTop::new(i64::MAX))
    }

    fn num_threads(&self) -> usize {
        2
    }
}

fn demo_solver(seeds: Vec<Node>) -> IDESolver<Node, Fact, Method, i64> {
    IDESolver::new(Arc::new(DemoProblem { seeds }))
}

#[test]
fn solve_reaches_the_whole_program() {
    let solver = demo_solver(vec!["m0"]);
    solver.solve().unwrap();

    // zero flows through main and into the callee
    for node in ["m0", "m1", "m2", "f0", "f1"] {
        assert_eq!(solver.result_at(&node, &ZERO), Some(i64::MIN), "at {node}");
    }

    // environments strip the zero fact
    assert!(solver.results_at(&"m2").is_empty());
}

#[test]
fn resolve_after_clear_matches_first_run() {
    let solver = demo_solver(vec!["m0"]);
    solver.solve().unwrap();
    let first: Vec<_> = ["m0", "m1", "m2", "f0", "f1"]
        .iter()
        .map(|n| solver.result_at(n, &ZERO))
        .collect();

    solver.clear_results();
    assert_eq!(solver.result_at(&"m2", &ZERO), None);

    solver.solve().unwrap();
    let second: Vec<_> = ["m0", "m1", "m2", "f0", "f1"]
        .iter()
        .map(|n| solver.result_at(n, &ZERO))
        .collect();

    assert_eq!(first, second);
}

#[test]
fn empty_seeds_produce_no_results() {
    let solver = demo_solver(Vec::new());
    solver.solve().unwrap();

    for node in ["m0", "m1", "m2", "f0", "f1"] {
        assert_eq!(solver.result_at(&node, &ZERO), None);
    }
    assert_eq!(solver.statistics().propagation_count, 0);
}

#[test]
fn update_is_rejected_without_the_incremental_protocol() {
    let solver = demo_solver(vec!["m0"]);
    solver.solve().unwrap();

    let err = solver.update(Arc::new(DemoIcfg::new())).unwrap_err();
    assert!(err.to_string().contains("incremental"));
}

#[test]
fn statistics_and_optimization_mode_round_trip() {
    let solver = demo_solver(vec!["m0"]);
    solver.solve().unwrap();

    let stats = solver.statistics();
    assert!(stats.propagation_count > 0);
    assert!(stats.flow_function_construction_count > 0);

    assert_eq!(solver.optimization_mode(), OptimizationMode::Performance);
    solver.set_optimization_mode(OptimizationMode::Memory);
    assert_eq!(solver.optimization_mode(), OptimizationMode::Memory);
    solver.print_stats();
}
