//! Interprocedural control-flow graph capabilities.
//!
//! The solver never builds or owns a CFG; it consumes the client's graph
//! through these traits. The graph must stay referentially stable for the
//! duration of a `solve` or `update` run.

use rustc_hash::{FxHashMap, FxHashSet};

/// Read capabilities the tabulation algorithm needs from an ICFG.
///
/// A statement may be several things at once: a `throw` can be both an exit
/// statement and a normal statement with successors (the catch block). The
/// dispatcher handles both branches.
pub trait InterproceduralCfg<N: 'static, M: 'static>: Send + Sync {
    /// The method containing a statement.
    fn method_of(&self, stmt: &N) -> M;

    /// Intra-procedural predecessors of a statement.
    fn preds_of(&self, stmt: &N) -> Vec<N>;

    /// Intra-procedural successors of a statement.
    fn succs_of(&self, stmt: &N) -> Vec<N>;

    /// Methods a call statement may dispatch to.
    fn callees_of_call_at(&self, call_stmt: &N) -> Vec<M>;

    /// All call statements that may invoke a method.
    fn callers_of(&self, method: &M) -> Vec<N>;

    /// All call statements contained in a method's body.
    fn calls_from_within(&self, method: &M) -> Vec<N>;

    /// Start points (entry statements) of a method.
    fn start_points_of(&self, method: &M) -> Vec<N>;

    /// Return sites associated with a call statement.
    fn return_sites_of_call_at(&self, call_stmt: &N) -> Vec<N>;

    fn is_call_stmt(&self, stmt: &N) -> bool;

    fn is_exit_stmt(&self, stmt: &N) -> bool;

    fn is_start_point(&self, stmt: &N) -> bool;

    /// Every statement that is neither a call nor a method start point.
    /// Enumerated once per value computation for the per-node fold.
    fn all_non_call_start_nodes(&self) -> Vec<N>;

    /// Incremental-update capability probe. Graphs that implement
    /// [`UpdatableInterproceduralCfg`] override this to return `Some(self)`;
    /// the solver's `update` fails on `None`.
    fn as_updatable(&self) -> Option<&dyn UpdatableInterproceduralCfg<N, M>> {
        None
    }
}

/// Difference between two versions of an ICFG, keyed by edge source.
#[derive(Debug, Clone)]
pub struct CfgChangeset<N> {
    /// Edges present in the old graph but not the new one.
    pub expired_edges: FxHashMap<N, Vec<N>>,

    /// Edges present in the new graph but not the old one.
    pub new_edges: FxHashMap<N, Vec<N>>,

    /// Statements that disappeared entirely.
    pub expired_nodes: FxHashSet<N>,

    /// Statements introduced by the new graph.
    pub new_nodes: FxHashSet<N>,
}

impl<N> CfgChangeset<N> {
    pub fn new() -> Self {
        Self {
            expired_edges: FxHashMap::default(),
            new_edges: FxHashMap::default(),
            expired_nodes: FxHashSet::default(),
            new_nodes: FxHashSet::default(),
        }
    }

    /// True when neither edge set has entries; the update is then a no-op.
    pub fn is_unchanged(&self) -> bool {
        self.expired_edges.is_empty() && self.new_edges.is_empty()
    }
}

impl<N> Default for CfgChangeset<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Additional capabilities required by the incremental update protocol.
///
/// Node identity must survive graph replacement: a statement value obtained
/// from the old graph must keep its hash and equality after
/// `new.merge(old)`, and must resolve inside the new graph. Clients
/// typically achieve this with wrapper handles that are re-pointed by
/// `merge`.
pub trait UpdatableInterproceduralCfg<N: 'static, M: 'static>: InterproceduralCfg<N, M> {
    /// Diff this (old) graph against a new version.
    fn compute_cfg_changeset(
        &self,
        new_cfg: &dyn UpdatableInterproceduralCfg<N, M>,
    ) -> CfgChangeset<N>;

    /// Re-point surviving node identities from the old graph into `self`
    /// (called on the new graph, after the changeset is computed).
    fn merge(&self, old_cfg: &dyn UpdatableInterproceduralCfg<N, M>);

    /// The start of the innermost loop containing a statement, if any.
    /// Re-entering a changed region inside a loop body is insufficient; the
    /// replay must start at the loop entry.
    fn loop_start_point_for(&self, stmt: &N) -> Option<N>;

    /// Callee exit statements whose return edges target the given return
    /// site.
    fn exit_nodes_for_return_site(&self, return_site: &N) -> Vec<N>;

    /// Whether a statement is part of this graph version.
    fn contains_stmt(&self, stmt: &N) -> bool;
}
