/*
 * Supergraph Solver - IDE Dataflow Engine
 *
 * Solves IDE (Interprocedural Distributive Environment) tabulation problems
 * as described by Sagiv, Horwitz and Reps (1996), with the worklist
 * extensions of Naeem, Lhotak and Rodriguez (2010) and an incremental-update
 * mode that reuses prior results after control-flow-graph edits.
 *
 * Key Features:
 * - Same-level-realizable-path tabulation over the exploded supergraph
 * - End-summary / incoming bookkeeping at call and return sites
 * - Two-phase value computation over a client-supplied join semilattice
 * - Surgical invalidation + replay of affected regions on CFG changes
 * - Multi-threaded worklist processing via a counting executor
 *
 * The client supplies the ICFG, the flow and edge functions, and the value
 * lattice through the traits in this crate; the solver owns every table and
 * all scheduling.
 *
 * References:
 * - Sagiv, Horwitz, Reps (1996): "Precise Interprocedural Dataflow Analysis
 *   with Applications to Constant Propagation"
 * - Naeem, Lhotak, Rodriguez (2010): "Practical Extensions to the IFDS
 *   Algorithm"
 */

#![allow(clippy::upper_case_acronyms)] // IDE, ICFG naming
#![allow(clippy::type_complexity)] // nested fact/function tables are inherent

pub mod edge_functions;
pub mod errors;
pub mod flow_functions;
pub mod icfg;
pub mod lattice;
pub mod problem;
pub mod solver;

pub use edge_functions::{
    AllBottom, AllTop, EdgeFunction, EdgeFunctionRef, EdgeFunctions, EdgeIdentity,
};
pub use errors::{Result, SolverError};
pub use flow_functions::{
    FlowFunction, FlowFunctionRef, FlowFunctions, Identity, KillAll, ZeroedFlowFunctions,
};
pub use icfg::{CfgChangeset, InterproceduralCfg, UpdatableInterproceduralCfg};
pub use lattice::JoinLattice;
pub use problem::{SolverItem, TabulationProblem};
pub use solver::{IDESolver, OptimizationMode, PathEdge, SolverStatistics};
