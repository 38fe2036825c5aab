//! The tabulation engine: dispatches path edges to the call / exit / normal
//! handlers, composes edge functions, and writes the jump-function table
//! through `propagate`.
//!
//! This is the SRH'96 worklist with the CC'10 end-summary and incoming
//! bookkeeping. Handlers run on executor workers; every piece of shared
//! state they touch is listed on the field that owns its lock.
//!
//! Lock order, where nesting occurs: `jump_save` → `jump_fn`; the
//! summaries lock and the value-table lock never nest with either.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::edge_functions::{EdgeFunctionRef, EdgeFunctions, EdgeIdentity};
use crate::errors::Result;
use crate::flow_functions::{FlowFunctions, ZeroedFlowFunctions};
use crate::icfg::InterproceduralCfg;
use crate::lattice::JoinLattice;
use crate::problem::{SolverItem, TabulationProblem};
use crate::solver::executor::CountingExecutor;
use crate::solver::jump_functions::JumpFunctions;
use crate::solver::path_edge::PathEdge;
use crate::solver::summaries::SummaryTables;
use crate::solver::values::ValueTable;

/// How the engine treats existing table contents while propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationMode {
    /// Forward-only computation; nothing is deleted.
    Compute,

    /// Incremental update: the first propagation touching a
    /// `(source fact, target)` pair deletes its prior jump functions, so the
    /// replay recomputes the fixpoint on affected sub-graphs.
    Update,
}

/// Internal tradeoff knob for incremental updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationMode {
    /// Size update bookkeeping from live table counts. May cost memory.
    #[default]
    Performance,

    /// Use small fixed capacities. May cost rehashing time.
    Memory,
}

/// Best-effort counters published by the solver.
#[derive(Default)]
pub(crate) struct Counters {
    pub flow_function_application_count: AtomicU64,
    pub flow_function_construction_count: AtomicU64,
    pub propagation_count: AtomicU64,
    pub duration_flow_function_construction_ms: AtomicU64,
    pub duration_flow_function_application_ms: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared state of one solver instance. The engine keeps a weak handle to
/// itself so scheduled tasks can capture it.
pub(crate) struct SolverCore<N, D, M, V>
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    pub(crate) me: Weak<Self>,

    pub(crate) problem: Arc<dyn TabulationProblem<N, D, M, V>>,

    /// The current ICFG. Swapped by the incremental updater; read-only
    /// during multi-threaded phases.
    pub(crate) icfg: RwLock<Arc<dyn InterproceduralCfg<N, M>>>,

    /// Stateless; possibly the zero-adding wrapper around the client's.
    pub(crate) flow_functions: Arc<dyn FlowFunctions<N, D, M>>,

    /// Stateless.
    pub(crate) edge_functions: Arc<dyn EdgeFunctions<N, D, M, V>>,

    pub(crate) zero_value: D,
    pub(crate) value_lattice: Arc<dyn JoinLattice<V>>,
    pub(crate) all_top: EdgeFunctionRef<V>,
    pub(crate) initial_seeds: Vec<N>,
    pub(crate) seed_set: FxHashSet<N>,
    pub(crate) follow_returns_past_seeds: bool,
    pub(crate) compute_values_enabled: bool,
    pub(crate) num_threads: usize,

    /// Structural lock: `propagate` needs lookup + join + insert atomically.
    pub(crate) jump_fn: Mutex<JumpFunctions<N, D, V>>,

    /// The single "incoming lock" covering both the incoming and the
    /// end-summary table.
    pub(crate) summaries: Mutex<SummaryTables<N, D, V>>,

    /// Written only during value computation, under its own lock.
    pub(crate) val: Mutex<ValueTable<N, D, V>>,

    executor: RwLock<Option<Arc<CountingExecutor>>>,
    operation_mode: RwLock<OperationMode>,
    pub(crate) optimization_mode: RwLock<OptimizationMode>,

    /// Per-update memory of `(target, source fact)` pairs already cleared.
    pub(crate) jump_save: Mutex<FxHashMap<N, FxHashSet<D>>>,

    /// Nodes whose jump functions were touched by the current update.
    pub(crate) changed_nodes: DashSet<N>,

    /// `method → nodes under reprocessing`; read-only during
    /// multi-threaded update phases.
    pub(crate) change_set: RwLock<FxHashMap<M, FxHashSet<N>>>,

    pub(crate) counters: Counters,
}

impl<N, D, M, V> SolverCore<N, D, M, V>
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    pub(crate) fn new(problem: Arc<dyn TabulationProblem<N, D, M, V>>) -> Arc<Self> {
        let zero_value = problem.zero_value();
        let flow_functions: Arc<dyn FlowFunctions<N, D, M>> = if problem.auto_add_zero() {
            Arc::new(ZeroedFlowFunctions::new(
                problem.flow_functions(),
                zero_value.clone(),
            ))
        } else {
            problem.flow_functions()
        };
        let initial_seeds = problem.initial_seeds();
        let seed_set: FxHashSet<N> = initial_seeds.iter().cloned().collect();
        let all_top = problem.all_top_function();

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            icfg: RwLock::new(problem.interprocedural_cfg()),
            flow_functions,
            edge_functions: problem.edge_functions(),
            zero_value,
            value_lattice: problem.join_lattice(),
            all_top: all_top.clone(),
            initial_seeds,
            seed_set,
            follow_returns_past_seeds: problem.follow_returns_past_seeds(),
            compute_values_enabled: problem.compute_values(),
            num_threads: problem.num_threads().max(1),
            jump_fn: Mutex::new(JumpFunctions::new(all_top)),
            summaries: Mutex::new(SummaryTables::new()),
            val: Mutex::new(ValueTable::new()),
            executor: RwLock::new(None),
            operation_mode: RwLock::new(OperationMode::Compute),
            optimization_mode: RwLock::new(OptimizationMode::default()),
            jump_save: Mutex::new(FxHashMap::default()),
            changed_nodes: DashSet::new(),
            change_set: RwLock::new(FxHashMap::default()),
            counters: Counters::default(),
            problem,
        })
    }

    pub(crate) fn icfg(&self) -> Arc<dyn InterproceduralCfg<N, M>> {
        self.icfg.read().clone()
    }

    pub(crate) fn mode(&self) -> OperationMode {
        *self.operation_mode.read()
    }

    pub(crate) fn set_mode(&self, mode: OperationMode) {
        *self.operation_mode.write() = mode;
    }

    pub(crate) fn start_executor(&self) {
        *self.executor.write() = Some(Arc::new(CountingExecutor::new(self.num_threads)));
    }

    pub(crate) fn executor(&self) -> Option<Arc<CountingExecutor>> {
        self.executor.read().clone()
    }

    /// Inject the tabulation roots: an `EdgeIdentity` self-loop
    /// `⟨Z, seed, Z⟩` per seed, stored and scheduled through the normal
    /// propagate path.
    pub(crate) fn submit_initial_seeds(&self) {
        for seed in self.initial_seeds.clone() {
            self.propagate(
                self.zero_value.clone(),
                seed,
                self.zero_value.clone(),
                Arc::new(EdgeIdentity),
            );
        }
    }

    /// Await quiescence of the tabulation phase, optionally run the value
    /// phases, then retire the executor. Worker panics surface here.
    pub(crate) fn await_completion_compute_values_and_shutdown(
        &self,
        compute_values: bool,
    ) -> Result<()> {
        let Some(executor) = self.executor() else {
            debug_assert!(false, "no executor running");
            return Ok(());
        };

        let tabulated = {
            let before = Instant::now();
            let result = executor.await_completion();
            self.counters
                .duration_flow_function_construction_ms
                .store(before.elapsed().as_millis() as u64, Ordering::Relaxed);
            result
        };

        let result = match (tabulated, compute_values) {
            (Ok(()), true) => {
                let before = Instant::now();
                let result = self.compute_values();
                self.counters
                    .duration_flow_function_application_ms
                    .store(before.elapsed().as_millis() as u64, Ordering::Relaxed);
                result
            }
            (outcome, _) => outcome,
        };

        executor.shutdown();
        *self.executor.write() = None;
        result
    }

    /// Dispatch the processing of a path edge to a worker.
    pub(crate) fn schedule_edge_processing(&self, edge: PathEdge<N, D>) {
        Counters::bump(&self.counters.propagation_count);
        let Some(executor) = self.executor() else {
            warn!("path edge scheduled outside a solver phase, dropping");
            return;
        };
        let Some(core) = self.me.upgrade() else {
            return;
        };
        executor.execute(Box::new(move || core.process_edge(&edge)));
    }

    /// Edge dispatcher. A statement may be both an exit and a normal
    /// statement (a `throw` escaping the method while also entering a catch
    /// block), so the two non-call branches are not exclusive.
    pub(crate) fn process_edge(&self, edge: &PathEdge<N, D>) {
        let icfg = self.icfg();
        if icfg.is_call_stmt(edge.target()) {
            self.process_call(edge);
        } else {
            if icfg.is_exit_stmt(edge.target()) {
                self.process_exit(edge);
            }
            if !icfg.succs_of(edge.target()).is_empty() {
                self.process_normal_flow(edge);
            }
        }
    }

    /// The current jump function for an edge; all-top when absent.
    fn jump_function(&self, d_source: &D, target: &N, d_target: &D) -> EdgeFunctionRef<V> {
        self.jump_fn.lock().get(d_source, target, d_target)
    }

    /// Processing a call site in the caller's context (SRH'96 lines 13-20).
    ///
    /// Registers the incoming call edge at every callee start, replays
    /// already-recorded end summaries back to the return sites, and runs the
    /// intra-procedural call-to-return flow.
    fn process_call(&self, edge: &PathEdge<N, D>) {
        let d1 = edge.fact_at_source();
        let n = edge.target();
        let icfg = self.icfg();
        let mode = self.mode();
        let return_sites = icfg.return_sites_of_call_at(n);

        // Erased facts short-circuit: push the deletion past the call.
        let Some(d2) = edge.fact_at_target() else {
            for ret_site in &return_sites {
                self.clear_and_erase(d1, ret_site);
            }
            return;
        };

        let f = self.jump_function(d1, n, d2);

        for callee in icfg.callees_of_call_at(n) {
            let call_flow = self.flow_functions.call_flow_function(n, &callee);
            Counters::bump(&self.counters.flow_function_construction_count);
            let res = call_flow.compute_targets(d2);

            for start in icfg.start_points_of(&callee) {
                for d3 in &res {
                    // initial self-loop into the callee (SRH line 15)
                    self.propagate(
                        d3.clone(),
                        start.clone(),
                        d3.clone(),
                        Arc::new(EdgeIdentity),
                    );

                    // Register the incoming edge and snapshot the summaries
                    // in one critical section (CC'10 lines 15.1/15.2).
                    let end_summaries = {
                        let mut summaries = self.summaries.lock();
                        summaries.add_incoming(start.clone(), d3.clone(), n.clone(), d2.clone());
                        summaries.end_summaries(&start, d3)
                    };

                    // For each already-queried exit reachable from
                    // ⟨start, d3⟩, build caller-side jump functions to the
                    // return sites: this call may be a new incoming edge.
                    for (exit, d4, f_callee_summary) in &end_summaries {
                        for ret_site in &return_sites {
                            let ret_flow = self
                                .flow_functions
                                .return_flow_function(n, &callee, exit, ret_site);
                            Counters::bump(&self.counters.flow_function_construction_count);
                            let targets = ret_flow.compute_targets(d4);
                            for d5 in &targets {
                                let f4 =
                                    self.edge_functions.call_edge_function(n, d2, &callee, d3);
                                let f5 = self.edge_functions.return_edge_function(
                                    n, &callee, exit, d4, ret_site, d5,
                                );
                                let f_prime =
                                    f4.compose_with(f_callee_summary).compose_with(&f5);
                                let composed = f.compose_with(&f_prime);
                                match mode {
                                    OperationMode::Update => self.clear_and_propagate(
                                        d1.clone(),
                                        ret_site.clone(),
                                        d5.clone(),
                                        composed,
                                    ),
                                    OperationMode::Compute => self.propagate(
                                        d1.clone(),
                                        ret_site.clone(),
                                        d5.clone(),
                                        composed,
                                    ),
                                }
                            }
                            if mode == OperationMode::Update && targets.is_empty() {
                                self.clear_and_erase(d1, ret_site);
                            }
                        }
                    }
                }
            }
        }

        // Intra-procedural flow along the call-to-return functions
        // (CC'10 lines 17-19).
        for ret_site in &return_sites {
            let c2r_flow = self
                .flow_functions
                .call_to_return_flow_function(n, ret_site);
            Counters::bump(&self.counters.flow_function_construction_count);
            let targets = c2r_flow.compute_targets(d2);
            for d3 in &targets {
                let edge_fn = self
                    .edge_functions
                    .call_to_return_edge_function(n, d2, ret_site, d3);
                let composed = f.compose_with(&edge_fn);
                match mode {
                    OperationMode::Update => {
                        self.clear_and_propagate(d1.clone(), ret_site.clone(), d3.clone(), composed)
                    }
                    OperationMode::Compute => {
                        self.propagate(d1.clone(), ret_site.clone(), d3.clone(), composed)
                    }
                }
            }
            if mode == OperationMode::Update && targets.is_empty() {
                self.clear_and_erase(d1, ret_site);
            }
        }
    }

    /// Processing a method exit (SRH'96 lines 21-32).
    ///
    /// Stores the callee-side summary, then propagates to the return sites
    /// of every recorded caller through the composed call/summary/return
    /// functions. Handles unbalanced returns when enabled.
    fn process_exit(&self, edge: &PathEdge<N, D>) {
        match edge.fact_at_target() {
            Some(d2) => self.process_exit_fact(edge, d2),
            None => self.process_exit_erased(edge),
        }
    }

    fn process_exit_fact(&self, edge: &PathEdge<N, D>, d2: &D) {
        let n = edge.target();
        let d1 = edge.fact_at_source();
        let icfg = self.icfg();
        let mode = self.mode();
        let method = icfg.method_of(n);

        let f = self.jump_function(d1, n, d2);

        for start in icfg.start_points_of(&method) {
            // Register the summary and snapshot the incoming edges in one
            // critical section (CC'10 line 21.1).
            let inc = {
                let mut summaries = self.summaries.lock();
                summaries.add_end_summary(
                    start.clone(),
                    d1.clone(),
                    n.clone(),
                    d2.clone(),
                    f.clone(),
                );
                summaries.incoming(&start, d1)
            };

            // For each incoming call edge already seen by process_call.
            for (c, call_facts) in &inc {
                for ret_site in icfg.return_sites_of_call_at(c) {
                    // Do not return into a region whose predecessors the
                    // current update will reprocess anyway.
                    if mode == OperationMode::Update {
                        let change_set = self.change_set.read();
                        let candidates = change_set.get(&icfg.method_of(&ret_site));
                        if self.predecessor_repropagated(candidates, &ret_site) {
                            continue;
                        }
                    }

                    let ret_flow = self
                        .flow_functions
                        .return_flow_function(c, &method, n, &ret_site);
                    Counters::bump(&self.counters.flow_function_construction_count);
                    let targets = ret_flow.compute_targets(d2);

                    for d4 in call_facts {
                        for d5 in &targets {
                            let f4 = self.edge_functions.call_edge_function(c, d4, &method, d1);
                            let f5 = self
                                .edge_functions
                                .return_edge_function(c, &method, n, d2, &ret_site, d5);
                            let f_prime = f4.compose_with(&f).compose_with(&f5);

                            // Propagate through every jump function that
                            // reaches the call.
                            let reverse = self.jump_fn.lock().reverse_lookup(c, d4);
                            for (d3, f3) in &reverse {
                                if f3.equal_to(&self.all_top) {
                                    continue;
                                }
                                let composed = f3.compose_with(&f_prime);
                                match mode {
                                    OperationMode::Update => self.clear_and_propagate(
                                        d3.clone(),
                                        ret_site.clone(),
                                        d5.clone(),
                                        composed,
                                    ),
                                    OperationMode::Compute => self.propagate(
                                        d3.clone(),
                                        ret_site.clone(),
                                        d5.clone(),
                                        composed,
                                    ),
                                }
                            }
                        }
                        if mode == OperationMode::Update && targets.is_empty() {
                            let reverse = self.jump_fn.lock().reverse_lookup(c, d4);
                            for d3 in reverse.keys() {
                                self.clear_and_erase(d3, &ret_site);
                            }
                        }
                    }
                }
            }

            // Unbalanced problems: returning out of a method whose call was
            // never tabulated. The implicit caller's call-side function is
            // replaced by the exit's jump function alone.
            if inc.is_empty() && self.follow_returns_past_seeds {
                let callers = icfg.callers_of(&method);
                for c in &callers {
                    for ret_site in icfg.return_sites_of_call_at(c) {
                        let ret_flow = self
                            .flow_functions
                            .return_flow_function(c, &method, n, &ret_site);
                        Counters::bump(&self.counters.flow_function_construction_count);
                        let targets = ret_flow.compute_targets(d2);
                        for d5 in &targets {
                            let f5 = self
                                .edge_functions
                                .return_edge_function(c, &method, n, d2, &ret_site, d5);
                            let composed = f.compose_with(&f5);
                            match mode {
                                OperationMode::Update => self.clear_and_propagate(
                                    d2.clone(),
                                    ret_site.clone(),
                                    d5.clone(),
                                    composed,
                                ),
                                OperationMode::Compute => self.propagate(
                                    d2.clone(),
                                    ret_site.clone(),
                                    d5.clone(),
                                    composed,
                                ),
                            }
                        }
                        if mode == OperationMode::Update && targets.is_empty() {
                            self.clear_and_erase(d2, &ret_site);
                        }
                    }
                }
                if callers.is_empty() {
                    // No caller at all: apply the self-edge flow purely for
                    // its side effects (taint recording, caching).
                    let normal_flow = self.flow_functions.normal_flow_function(n, n);
                    Counters::bump(&self.counters.flow_function_construction_count);
                    normal_flow.compute_targets(d2);
                }
            }
        }
    }

    /// Exit processing for an erased-fact edge: push the deletion to every
    /// recorded caller's return sites.
    fn process_exit_erased(&self, edge: &PathEdge<N, D>) {
        let n = edge.target();
        let d1 = edge.fact_at_source();
        let icfg = self.icfg();
        let method = icfg.method_of(n);

        for start in icfg.start_points_of(&method) {
            let inc = self.summaries.lock().incoming(&start, d1);

            for (c, _call_facts) in &inc {
                for ret_site in icfg.return_sites_of_call_at(c) {
                    let change_set = self.change_set.read();
                    let candidates = change_set.get(&icfg.method_of(&ret_site));
                    if self.predecessor_repropagated(candidates, &ret_site) {
                        continue;
                    }
                    drop(change_set);
                    self.clear_and_erase(d1, &ret_site);
                }
            }

            if inc.is_empty() && self.follow_returns_past_seeds {
                for c in icfg.callers_of(&method) {
                    for ret_site in icfg.return_sites_of_call_at(&c) {
                        self.clear_and_erase(d1, &ret_site);
                    }
                }
            }
        }
    }

    /// Normal intra-procedural flow (SRH'96 lines 33-37).
    fn process_normal_flow(&self, edge: &PathEdge<N, D>) {
        let d1 = edge.fact_at_source();
        let n = edge.target();
        let icfg = self.icfg();
        let mode = self.mode();

        let Some(d2) = edge.fact_at_target() else {
            debug_assert!(mode == OperationMode::Update);
            for m in icfg.succs_of(n) {
                self.clear_and_erase(d1, &m);
            }
            return;
        };

        let f = self.jump_function(d1, n, d2);
        for m in icfg.succs_of(n) {
            let flow = self.flow_functions.normal_flow_function(n, &m);
            Counters::bump(&self.counters.flow_function_construction_count);
            let res = flow.compute_targets(d2);
            for d3 in &res {
                let edge_fn = self.edge_functions.normal_edge_function(n, d2, &m, d3);
                let f_prime = f.compose_with(&edge_fn);
                match mode {
                    OperationMode::Update => {
                        self.clear_and_propagate(d1.clone(), m.clone(), d3.clone(), f_prime)
                    }
                    OperationMode::Compute => {
                        self.propagate(d1.clone(), m.clone(), d3.clone(), f_prime)
                    }
                }
            }
            if mode == OperationMode::Update && res.is_empty() {
                self.clear_and_erase(d1, &m);
            }
        }
    }

    /// The core write path: join the new function into the table and
    /// reschedule the edge iff the stored function changed. Monotone under
    /// the lattice join; termination follows from the client's finite-height
    /// guarantee.
    pub(crate) fn propagate(
        &self,
        d_source: D,
        target: N,
        d_target: D,
        f: EdgeFunctionRef<V>,
    ) {
        let changed = {
            let mut jump_fn = self.jump_fn.lock();
            let existing = jump_fn.get(&d_source, &target, &d_target);
            let merged = existing.join_with(&f);
            if merged.equal_to(&existing) {
                false
            } else {
                jump_fn.add_function(d_source.clone(), target.clone(), d_target.clone(), merged);
                true
            }
        };

        if changed {
            self.schedule_edge_processing(PathEdge::new(d_source, target, d_target));
        }
    }

    /// Update-mode propagate: on the first touch of `(d_source, target)`
    /// within the current update, drop every stored jump function for the
    /// pair and record the target as changed; then propagate as usual.
    pub(crate) fn clear_and_propagate(
        &self,
        d_source: D,
        target: N,
        d_target: D,
        f: EdgeFunctionRef<V>,
    ) {
        debug_assert!(self.mode() == OperationMode::Update);

        {
            let mut jump_save = self.jump_save.lock();
            let first_touch = !jump_save
                .get(&target)
                .is_some_and(|facts| facts.contains(&d_source));
            if first_touch {
                jump_save
                    .entry(target.clone())
                    .or_default()
                    .insert(d_source.clone());

                let mut jump_fn = self.jump_fn.lock();
                for d in jump_fn.forward_lookup(&d_source, &target).into_keys() {
                    jump_fn.remove_function(&d_source, &target, &d);
                }
                drop(jump_fn);

                self.changed_nodes.insert(target.clone());
            }
        }

        self.propagate(d_source, target, d_target, f);
    }

    /// Target-only variant: clear on first touch and schedule an erased-fact
    /// edge so the deletion travels to the target's successors.
    pub(crate) fn clear_and_erase(&self, d_source: &D, target: &N) {
        debug_assert!(self.mode() == OperationMode::Update);

        let mut jump_save = self.jump_save.lock();
        let first_touch = !jump_save
            .get(target)
            .is_some_and(|facts| facts.contains(d_source));
        if !first_touch {
            return;
        }
        jump_save
            .entry(target.clone())
            .or_default()
            .insert(d_source.clone());

        let mut jump_fn = self.jump_fn.lock();
        for d in jump_fn.forward_lookup(d_source, target).into_keys() {
            jump_fn.remove_function(d_source, target, &d);
        }
        drop(jump_fn);

        self.changed_nodes.insert(target.clone());
        self.schedule_edge_processing(PathEdge::erased(d_source.clone(), target.clone()));
    }

    /// Whether some other candidate node lies strictly upstream of `src`
    /// within its method. Backward BFS over predecessors with a visited set;
    /// `src` itself never counts. Suppresses redundant replays.
    pub(crate) fn predecessor_repropagated(
        &self,
        candidates: Option<&FxHashSet<N>>,
        src: &N,
    ) -> bool {
        let Some(candidates) = candidates else {
            return false;
        };
        let icfg = self.icfg();
        let mut queue: VecDeque<N> = icfg.preds_of(src).into();
        let mut done: FxHashSet<N> = FxHashSet::default();
        while let Some(node) = queue.pop_front() {
            if !done.insert(node.clone()) {
                continue;
            }
            if candidates.contains(&node) && node != *src {
                return true;
            }
            queue.extend(icfg.preds_of(&node));
        }
        false
    }
}
