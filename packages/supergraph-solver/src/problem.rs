//! The tabulation problem: everything a client supplies to the solver.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::edge_functions::{EdgeFunctionRef, EdgeFunctions};
use crate::flow_functions::FlowFunctions;
use crate::icfg::InterproceduralCfg;
use crate::lattice::JoinLattice;

/// Bounds shared by all four generic roles of the solver: program points
/// `N`, dataflow facts `D`, method identifiers `M`, and lattice values `V`.
/// Compared by value equality, hashed, cloned into tables, and moved across
/// worker threads.
pub trait SolverItem: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> SolverItem for T {}

/// An IDE tabulation problem over nodes `N`, facts `D`, methods `M`, and
/// lattice values `V`.
///
/// The defaulted methods are configuration knobs; the rest supply the
/// abstract collaborators the solver composes.
pub trait TabulationProblem<N, D, M, V>: Send + Sync
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    /// The flow functions mapping facts across ICFG edges.
    fn flow_functions(&self) -> Arc<dyn FlowFunctions<N, D, M>>;

    /// The edge functions labelling exploded-supergraph edges.
    fn edge_functions(&self) -> Arc<dyn EdgeFunctions<N, D, M, V>>;

    /// The interprocedural control-flow graph to tabulate over.
    fn interprocedural_cfg(&self) -> Arc<dyn InterproceduralCfg<N, M>>;

    /// Program points used as tabulation roots. Seeds carry the zero fact.
    fn initial_seeds(&self) -> Vec<N>;

    /// The distinguished zero fact.
    fn zero_value(&self) -> D;

    /// The join semilattice over `V`.
    fn join_lattice(&self) -> Arc<dyn JoinLattice<V>>;

    /// The sentinel function mapping every value to top. Never stored in the
    /// jump-function table; absence of an entry means all-top.
    fn all_top_function(&self) -> EdgeFunctionRef<V>;

    /// Wrap the flow functions so every fact set implicitly carries zero.
    fn auto_add_zero(&self) -> bool {
        true
    }

    /// Process returns out of methods whose calls were never tabulated
    /// (unbalanced returns).
    fn follow_returns_past_seeds(&self) -> bool {
        false
    }

    /// Worker concurrency hint. Clamped to at least one.
    fn num_threads(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Whether to run the value-computation phase after tabulation.
    fn compute_values(&self) -> bool {
        true
    }

    /// Called by the incremental updater after the changeset is computed so
    /// the problem can re-point its own ICFG handle. The solver swaps its
    /// internal handle regardless.
    fn update_cfg(&self, new_cfg: Arc<dyn InterproceduralCfg<N, M>>) {
        let _ = new_cfg;
    }
}
