//! The solver facade: orchestrates clear → seed → tabulate → value-compute
//! and serves result queries.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::info;

use crate::errors::Result;
use crate::icfg::InterproceduralCfg;
use crate::problem::{SolverItem, TabulationProblem};
use crate::solver::core::{OperationMode, OptimizationMode, SolverCore};

/// Snapshot of the solver's best-effort counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverStatistics {
    pub flow_function_application_count: u64,
    pub flow_function_construction_count: u64,
    pub propagation_count: u64,
    pub duration_flow_function_construction_ms: u64,
    pub duration_flow_function_application_ms: u64,
}

/// Solves an IDE tabulation problem and answers environment queries.
///
/// Call [`solve`](Self::solve) once, then query with
/// [`result_at`](Self::result_at) / [`results_at`](Self::results_at). After
/// a CFG edit, [`update`](Self::update) repairs the results incrementally.
pub struct IDESolver<N, D, M, V>
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    pub(crate) core: Arc<SolverCore<N, D, M, V>>,
}

impl<N, D, M, V> IDESolver<N, D, M, V>
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    pub fn new(problem: Arc<dyn TabulationProblem<N, D, M, V>>) -> Self {
        Self {
            core: SolverCore::new(problem),
        }
    }

    /// Run the solver on the configured problem. This can take some time.
    pub fn solve(&self) -> Result<()> {
        // remove all leftovers from previous runs
        self.clear_results();

        self.core.set_mode(OperationMode::Compute);
        self.core.start_executor();
        self.core.submit_initial_seeds();
        self.core
            .await_completion_compute_values_and_shutdown(self.core.compute_values_enabled)
    }

    /// Incrementally update the results after a CFG edit. Both the current
    /// and the new graph must support the incremental protocol.
    pub fn update(&self, new_icfg: Arc<dyn InterproceduralCfg<N, M>>) -> Result<()> {
        self.core.update_internal(new_icfg)
    }

    /// The value for a fact at a statement; `None` means top (never
    /// reached).
    pub fn result_at(&self, stmt: &N, fact: &D) -> Option<V> {
        self.core.val.lock().get(stmt, fact).cloned()
    }

    /// The environment at a statement, with the artificial zero fact
    /// stripped.
    pub fn results_at(&self, stmt: &N) -> FxHashMap<D, V> {
        let mut row = self.core.val.lock().row(stmt);
        row.remove(&self.core.zero_value);
        row
    }

    /// Clear every table computed by this solver.
    pub fn clear_results(&self) {
        self.core.jump_fn.lock().clear();
        self.core.summaries.lock().clear();
        self.core.val.lock().clear();
        self.core
            .counters
            .propagation_count
            .store(0, Ordering::Relaxed);

        self.core.flow_functions.invalidate_cache();
        self.core.edge_functions.invalidate_cache();
    }

    pub fn set_optimization_mode(&self, mode: OptimizationMode) {
        *self.core.optimization_mode.write() = mode;
    }

    pub fn optimization_mode(&self) -> OptimizationMode {
        *self.core.optimization_mode.read()
    }

    pub fn statistics(&self) -> SolverStatistics {
        let counters = &self.core.counters;
        SolverStatistics {
            flow_function_application_count: counters
                .flow_function_application_count
                .load(Ordering::Relaxed),
            flow_function_construction_count: counters
                .flow_function_construction_count
                .load(Ordering::Relaxed),
            propagation_count: counters.propagation_count.load(Ordering::Relaxed),
            duration_flow_function_construction_ms: counters
                .duration_flow_function_construction_ms
                .load(Ordering::Relaxed),
            duration_flow_function_application_ms: counters
                .duration_flow_function_application_ms
                .load(Ordering::Relaxed),
        }
    }

    pub fn print_stats(&self) {
        let stats = self.statistics();
        info!(
            propagations = stats.propagation_count,
            flow_constructions = stats.flow_function_construction_count,
            flow_applications = stats.flow_function_application_count,
            tabulation_ms = stats.duration_flow_function_construction_ms,
            value_phase_ms = stats.duration_flow_function_application_ms,
            "solver statistics"
        );
    }
}
