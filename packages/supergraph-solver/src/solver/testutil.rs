//! Shared test fixture: a string-labelled mock ICFG with an updatable
//! variant, the min-over-ℤ lattice, and constant edge functions.
//!
//! Node labels double as stable identities, which makes the wrapper-merge
//! step of the incremental protocol a no-op.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::edge_functions::{AllBottom, AllTop, EdgeFunction, EdgeFunctionRef, EdgeFunctions};
use crate::flow_functions::{FlowFunction, FlowFunctionRef, FlowFunctions, Identity};
use crate::icfg::{CfgChangeset, InterproceduralCfg, UpdatableInterproceduralCfg};
use crate::lattice::JoinLattice;
use crate::problem::TabulationProblem;
use crate::solver::IDESolver;

pub(crate) type TestNode = &'static str;
pub(crate) type TestMethod = &'static str;

pub(crate) const TOP: i64 = i64::MAX;
pub(crate) const BOTTOM: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Fact {
    Zero,
    Var(&'static str),
}

/// Min-over-integers: top = MAX, bottom = MIN, join = min.
pub(crate) struct MinLattice;

impl JoinLattice<i64> for MinLattice {
    fn top_element(&self) -> i64 {
        TOP
    }

    fn bottom_element(&self) -> i64 {
        BOTTOM
    }

    fn join(&self, left: &i64, right: &i64) -> i64 {
        (*left).min(*right)
    }
}

/// Constant edge function over the min lattice.
#[derive(Debug, Clone)]
pub(crate) struct ConstVal(pub i64);

impl EdgeFunction<i64> for ConstVal {
    fn compute_target(&self, _source: &i64) -> i64 {
        self.0
    }

    fn compose_with(&self, second: &EdgeFunctionRef<i64>) -> EdgeFunctionRef<i64> {
        Arc::new(ConstVal(second.compute_target(&self.0)))
    }

    fn join_with(&self, other: &EdgeFunctionRef<i64>) -> EdgeFunctionRef<i64> {
        if other.is_all_top() {
            return Arc::new(self.clone());
        }
        if other.is_all_bottom() {
            return other.clone();
        }
        if let Some(c) = other.as_any().downcast_ref::<ConstVal>() {
            return Arc::new(ConstVal(self.0.min(c.0)));
        }
        // unknown shape: over-approximate toward bottom
        Arc::new(AllBottom::new(BOTTOM))
    }

    fn equal_to(&self, other: &EdgeFunctionRef<i64>) -> bool {
        other
            .as_any()
            .downcast_ref::<ConstVal>()
            .is_some_and(|c| c.0 == self.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Flow function from a plain function pointer.
pub(crate) struct FnFlow(pub fn(&Fact) -> Vec<Fact>);

impl FlowFunction<Fact> for FnFlow {
    fn compute_targets(&self, source: &Fact) -> Vec<Fact> {
        (self.0)(source)
    }
}

/// Identity flow that counts its applications; used to observe the
/// side-effect-only invocation on unbalanced exits.
pub(crate) struct CountingFlow {
    pub hits: Arc<AtomicUsize>,
}

impl FlowFunction<Fact> for CountingFlow {
    fn compute_targets(&self, source: &Fact) -> Vec<Fact> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        vec![source.clone()]
    }
}

/// Hand-built ICFG over static string labels.
pub(crate) struct TestIcfg {
    nodes: Vec<TestNode>,
    node_set: FxHashSet<TestNode>,
    methods: FxHashMap<TestNode, TestMethod>,
    succs: FxHashMap<TestNode, Vec<TestNode>>,
    preds: FxHashMap<TestNode, Vec<TestNode>>,
    callees: FxHashMap<TestNode, Vec<TestMethod>>,
    return_sites: FxHashMap<TestNode, Vec<TestNode>>,
    starts: FxHashMap<TestMethod, Vec<TestNode>>,
    start_set: FxHashSet<TestNode>,
    exits: FxHashMap<TestMethod, Vec<TestNode>>,
    exit_set: FxHashSet<TestNode>,
    loop_heads: FxHashMap<TestNode, TestNode>,
    updatable: bool,
    stashed_changeset: Mutex<Option<CfgChangeset<TestNode>>>,
}

impl TestIcfg {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_set: FxHashSet::default(),
            methods: FxHashMap::default(),
            succs: FxHashMap::default(),
            preds: FxHashMap::default(),
            callees: FxHashMap::default(),
            return_sites: FxHashMap::default(),
            starts: FxHashMap::default(),
            start_set: FxHashSet::default(),
            exits: FxHashMap::default(),
            exit_set: FxHashSet::default(),
            loop_heads: FxHashMap::default(),
            updatable: true,
            stashed_changeset: Mutex::new(None),
        }
    }

    pub fn non_updatable(mut self) -> Self {
        self.updatable = false;
        self
    }

    pub fn node(&mut self, stmt: TestNode, method: TestMethod) {
        if self.node_set.insert(stmt) {
            self.nodes.push(stmt);
        }
        self.methods.insert(stmt, method);
    }

    pub fn edge(&mut self, from: TestNode, to: TestNode) {
        self.succs.entry(from).or_default().push(to);
        self.preds.entry(to).or_default().push(from);
    }

    pub fn start(&mut self, method: TestMethod, stmt: TestNode) {
        self.node(stmt, method);
        self.starts.entry(method).or_default().push(stmt);
        self.start_set.insert(stmt);
    }

    pub fn exit(&mut self, method: TestMethod, stmt: TestNode) {
        self.node(stmt, method);
        self.exits.entry(method).or_default().push(stmt);
        self.exit_set.insert(stmt);
    }

    pub fn call(&mut self, call_stmt: TestNode, callee: TestMethod, return_site: TestNode) {
        self.callees.entry(call_stmt).or_default().push(callee);
        self.return_sites.entry(call_stmt).or_default().push(return_site);
    }

    pub fn loop_head(&mut self, stmt: TestNode, head: TestNode) {
        self.loop_heads.insert(stmt, head);
    }

    /// Changeset handed back by `compute_cfg_changeset`; the diff itself is
    /// a client concern, so tests stash it explicitly.
    pub fn stash_changeset(&self, changeset: CfgChangeset<TestNode>) {
        *self.stashed_changeset.lock() = Some(changeset);
    }
}

impl InterproceduralCfg<TestNode, TestMethod> for TestIcfg {
    fn method_of(&self, stmt: &TestNode) -> TestMethod {
        self.methods[stmt]
    }

    fn preds_of(&self, stmt: &TestNode) -> Vec<TestNode> {
        self.preds.get(stmt).cloned().unwrap_or_default()
    }

    fn succs_of(&self, stmt: &TestNode) -> Vec<TestNode> {
        self.succs.get(stmt).cloned().unwrap_or_default()
    }

    fn callees_of_call_at(&self, call_stmt: &TestNode) -> Vec<TestMethod> {
        self.callees.get(call_stmt).cloned().unwrap_or_default()
    }

    fn callers_of(&self, method: &TestMethod) -> Vec<TestNode> {
        self.nodes
            .iter()
            .filter(|n| {
                self.callees
                    .get(*n)
                    .is_some_and(|callees| callees.contains(method))
            })
            .copied()
            .collect()
    }

    fn calls_from_within(&self, method: &TestMethod) -> Vec<TestNode> {
        self.nodes
            .iter()
            .filter(|n| self.methods[*n] == *method && self.callees.contains_key(*n))
            .copied()
            .collect()
    }

    fn start_points_of(&self, method: &TestMethod) -> Vec<TestNode> {
        self.starts.get(method).cloned().unwrap_or_default()
    }

    fn return_sites_of_call_at(&self, call_stmt: &TestNode) -> Vec<TestNode> {
        self.return_sites.get(call_stmt).cloned().unwrap_or_default()
    }

    fn is_call_stmt(&self, stmt: &TestNode) -> bool {
        self.callees.contains_key(stmt)
    }

    fn is_exit_stmt(&self, stmt: &TestNode) -> bool {
        self.exit_set.contains(stmt)
    }

    fn is_start_point(&self, stmt: &TestNode) -> bool {
        self.start_set.contains(stmt)
    }

    fn all_non_call_start_nodes(&self) -> Vec<TestNode> {
        self.nodes
            .iter()
            .filter(|n| !self.callees.contains_key(*n) && !self.start_set.contains(*n))
            .copied()
            .collect()
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableInterproceduralCfg<TestNode, TestMethod>> {
        self.updatable.then_some(self)
    }
}

impl UpdatableInterproceduralCfg<TestNode, TestMethod> for TestIcfg {
    fn compute_cfg_changeset(
        &self,
        _new_cfg: &dyn UpdatableInterproceduralCfg<TestNode, TestMethod>,
    ) -> CfgChangeset<TestNode> {
        self.stashed_changeset
            .lock()
            .take()
            .unwrap_or_else(CfgChangeset::new)
    }

    fn merge(&self, _old_cfg: &dyn UpdatableInterproceduralCfg<TestNode, TestMethod>) {
        // labels are already stable identities
    }

    fn loop_start_point_for(&self, stmt: &TestNode) -> Option<TestNode> {
        self.loop_heads.get(stmt).copied()
    }

    fn exit_nodes_for_return_site(&self, return_site: &TestNode) -> Vec<TestNode> {
        let mut exits = Vec::new();
        for node in &self.nodes {
            let Some(sites) = self.return_sites.get(node) else {
                continue;
            };
            if !sites.contains(return_site) {
                continue;
            }
            for callee in self.callees.get(node).into_iter().flatten() {
                exits.extend(self.exits.get(callee).cloned().unwrap_or_default());
            }
        }
        exits
    }

    fn contains_stmt(&self, stmt: &TestNode) -> bool {
        self.node_set.contains(stmt)
    }
}

/// Flow functions with per-edge overrides; identity everywhere else.
#[derive(Default)]
pub(crate) struct TestFlowFunctions {
    pub normal: FxHashMap<(TestNode, TestNode), FlowFunctionRef<Fact>>,
    pub call: FxHashMap<(TestNode, TestMethod), FlowFunctionRef<Fact>>,
    pub ret: FxHashMap<(TestNode, TestNode), FlowFunctionRef<Fact>>,
    pub call_to_return: FxHashMap<(TestNode, TestNode), FlowFunctionRef<Fact>>,
}

impl FlowFunctions<TestNode, Fact, TestMethod> for TestFlowFunctions {
    fn normal_flow_function(&self, curr: &TestNode, succ: &TestNode) -> FlowFunctionRef<Fact> {
        self.normal
            .get(&(*curr, *succ))
            .cloned()
            .unwrap_or_else(|| Arc::new(Identity))
    }

    fn call_flow_function(&self, call_stmt: &TestNode, callee: &TestMethod) -> FlowFunctionRef<Fact> {
        self.call
            .get(&(*call_stmt, *callee))
            .cloned()
            .unwrap_or_else(|| Arc::new(Identity))
    }

    fn return_flow_function(
        &self,
        _call_site: &TestNode,
        _callee: &TestMethod,
        exit_stmt: &TestNode,
        return_site: &TestNode,
    ) -> FlowFunctionRef<Fact> {
        self.ret
            .get(&(*exit_stmt, *return_site))
            .cloned()
            .unwrap_or_else(|| Arc::new(Identity))
    }

    fn call_to_return_flow_function(
        &self,
        call_site: &TestNode,
        return_site: &TestNode,
    ) -> FlowFunctionRef<Fact> {
        self.call_to_return
            .get(&(*call_site, *return_site))
            .cloned()
            .unwrap_or_else(|| Arc::new(Identity))
    }
}

/// Edge functions with per-edge overrides; identity everywhere else.
#[derive(Default)]
pub(crate) struct TestEdgeFunctions {
    pub normal: FxHashMap<(TestNode, Fact, TestNode, Fact), EdgeFunctionRef<i64>>,
    pub call: FxHashMap<(TestNode, Fact, TestMethod, Fact), EdgeFunctionRef<i64>>,
    pub ret: FxHashMap<(TestNode, Fact, TestNode, Fact), EdgeFunctionRef<i64>>,
    pub call_to_return: FxHashMap<(TestNode, Fact, TestNode, Fact), EdgeFunctionRef<i64>>,
}

fn identity() -> EdgeFunctionRef<i64> {
    Arc::new(crate::edge_functions::EdgeIdentity)
}

impl EdgeFunctions<TestNode, Fact, TestMethod, i64> for TestEdgeFunctions {
    fn normal_edge_function(
        &self,
        curr: &TestNode,
        curr_fact: &Fact,
        succ: &TestNode,
        succ_fact: &Fact,
    ) -> EdgeFunctionRef<i64> {
        self.normal
            .get(&(*curr, curr_fact.clone(), *succ, succ_fact.clone()))
            .cloned()
            .unwrap_or_else(identity)
    }

    fn call_edge_function(
        &self,
        call_stmt: &TestNode,
        fact_at_call: &Fact,
        callee: &TestMethod,
        fact_at_entry: &Fact,
    ) -> EdgeFunctionRef<i64> {
        self.call
            .get(&(
                *call_stmt,
                fact_at_call.clone(),
                *callee,
                fact_at_entry.clone(),
            ))
            .cloned()
            .unwrap_or_else(identity)
    }

    fn return_edge_function(
        &self,
        _call_site: &TestNode,
        _callee: &TestMethod,
        exit_stmt: &TestNode,
        exit_fact: &Fact,
        return_site: &TestNode,
        return_fact: &Fact,
    ) -> EdgeFunctionRef<i64> {
        self.ret
            .get(&(
                *exit_stmt,
                exit_fact.clone(),
                *return_site,
                return_fact.clone(),
            ))
            .cloned()
            .unwrap_or_else(identity)
    }

    fn call_to_return_edge_function(
        &self,
        call_site: &TestNode,
        call_fact: &Fact,
        return_site: &TestNode,
        return_fact: &Fact,
    ) -> EdgeFunctionRef<i64> {
        self.call_to_return
            .get(&(
                *call_site,
                call_fact.clone(),
                *return_site,
                return_fact.clone(),
            ))
            .cloned()
            .unwrap_or_else(identity)
    }
}

pub(crate) struct TestProblem {
    pub icfg: RwLock<Arc<dyn InterproceduralCfg<TestNode, TestMethod>>>,
    pub flows: Arc<TestFlowFunctions>,
    pub edges: Arc<TestEdgeFunctions>,
    pub seeds: Vec<TestNode>,
    pub follow_returns_past_seeds: bool,
    pub num_threads: usize,
    pub compute_values: bool,
}

impl TestProblem {
    pub fn new(icfg: TestIcfg, seeds: Vec<TestNode>) -> Self {
        Self {
            icfg: RwLock::new(Arc::new(icfg)),
            flows: Arc::new(TestFlowFunctions::default()),
            edges: Arc::new(TestEdgeFunctions::default()),
            seeds,
            follow_returns_past_seeds: false,
            num_threads: 1,
            compute_values: true,
        }
    }

    pub fn with_flows(mut self, flows: TestFlowFunctions) -> Self {
        self.flows = Arc::new(flows);
        self
    }

    pub fn with_edges(mut self, edges: TestEdgeFunctions) -> Self {
        self.edges = Arc::new(edges);
        self
    }

    pub fn with_follow_returns(mut self) -> Self {
        self.follow_returns_past_seeds = true;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

impl TabulationProblem<TestNode, Fact, TestMethod, i64> for TestProblem {
    fn flow_functions(&self) -> Arc<dyn FlowFunctions<TestNode, Fact, TestMethod>> {
        self.flows.clone()
    }

    fn edge_functions(&self) -> Arc<dyn EdgeFunctions<TestNode, Fact, TestMethod, i64>> {
        self.edges.clone()
    }

    fn interprocedural_cfg(&self) -> Arc<dyn InterproceduralCfg<TestNode, TestMethod>> {
        self.icfg.read().clone()
    }

    fn initial_seeds(&self) -> Vec<TestNode> {
        self.seeds.clone()
    }

    fn zero_value(&self) -> Fact {
        Fact::Zero
    }

    fn join_lattice(&self) -> Arc<dyn JoinLattice<i64>> {
        Arc::new(MinLattice)
    }

    fn all_top_function(&self) -> EdgeFunctionRef<i64> {
        Arc::new(AllTop::new(TOP))
    }

    fn follow_returns_past_seeds(&self) -> bool {
        self.follow_returns_past_seeds
    }

    fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn compute_values(&self) -> bool {
        self.compute_values
    }

    fn update_cfg(&self, new_cfg: Arc<dyn InterproceduralCfg<TestNode, TestMethod>>) {
        *self.icfg.write() = new_cfg;
    }
}

pub(crate) fn solver(problem: TestProblem) -> IDESolver<TestNode, Fact, TestMethod, i64> {
    IDESolver::new(Arc::new(problem))
}

/// main: m0 (calls f, return site m2); f: f0 → f1 (exit). Seeded at m0.
pub(crate) fn call_return_icfg() -> TestIcfg {
    let mut icfg = TestIcfg::new();
    icfg.start("main", "m0");
    icfg.exit("main", "m2");
    icfg.call("m0", "f", "m2");
    icfg.edge("m0", "m2");
    icfg.start("f", "f0");
    icfg.exit("f", "f1");
    icfg.edge("f0", "f1");
    icfg
}
