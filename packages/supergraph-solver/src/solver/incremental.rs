//! Incremental updates: after a CFG edit, invalidate and replay only the
//! affected regions instead of re-solving from scratch.
//!
//! Phases:
//! 0. Diff the graphs, merge surviving node identities, invalidate caches.
//! 1. Remove every table entry touching an expired node.
//! 2. Derive per-method reprocessing roots from both edge sets, hoisting
//!    roots inside loops to the loop entry's predecessors.
//! 3. Replay the jump functions at each root in Update mode (deleting prior
//!    contributions at first touch), one quiescent run per root.
//! 4. Re-run every multi-predecessor join point touched by phase 3 in
//!    Compute mode, so second incoming paths are not lost.
//! 5. Clear the value table and recompute values in full.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::errors::{Result, SolverError};
use crate::icfg::{InterproceduralCfg, UpdatableInterproceduralCfg};
use crate::problem::SolverItem;
use crate::solver::core::{OperationMode, OptimizationMode, SolverCore};
use crate::solver::path_edge::PathEdge;

impl<N, D, M, V> SolverCore<N, D, M, V>
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    pub(crate) fn update_internal(
        &self,
        new_icfg: Arc<dyn InterproceduralCfg<N, M>>,
    ) -> Result<()> {
        let old_icfg = self.icfg();
        if Arc::ptr_eq(&old_icfg, &new_icfg) {
            return Ok(());
        }

        // Incremental updates must have been enabled on both graph versions.
        let old_updatable = old_icfg
            .as_updatable()
            .ok_or(SolverError::NonUpdatableCfg("current"))?;
        let new_updatable = new_icfg
            .as_updatable()
            .ok_or(SolverError::NonUpdatableCfg("new"))?;

        // Phase 0: changeset, wrapper merge, cache invalidation.
        let before_changeset = Instant::now();
        let changeset = old_updatable.compute_cfg_changeset(new_updatable);

        let before_merge = Instant::now();
        new_updatable.merge(old_updatable);
        debug!(
            elapsed_ms = before_merge.elapsed().as_millis() as u64,
            "CFG wrappers merged"
        );

        // From here on every icfg() read serves the new graph.
        self.problem.update_cfg(Arc::clone(&new_icfg));
        *self.icfg.write() = Arc::clone(&new_icfg);

        // Statements changed identity underneath any memoized functions.
        self.flow_functions.invalidate_cache();
        self.edge_functions.invalidate_cache();

        info!(
            expired_edges = changeset.expired_edges.len(),
            new_edges = changeset.new_edges.len(),
            expired_nodes = changeset.expired_nodes.len(),
            new_nodes = changeset.new_nodes.len(),
            elapsed_ms = before_changeset.elapsed().as_millis() as u64,
            "changeset computed"
        );

        if changeset.is_unchanged() {
            info!("CFG is unchanged, skipping update");
            return Ok(());
        }

        // Reset the per-update bookkeeping. The capacity estimate trades
        // rehashing against memory per the optimization mode.
        let node_capacity = match *self.optimization_mode.read() {
            OptimizationMode::Performance => self.jump_fn.lock().target_count(),
            OptimizationMode::Memory => 5000,
        };
        *self.jump_save.lock() =
            FxHashMap::with_capacity_and_hasher(node_capacity, Default::default());
        self.changed_nodes.clear();
        self.counters.propagation_count.store(0, Ordering::Relaxed);

        // Phase 1: drop all state touching expired nodes.
        let before_remove = Instant::now();
        for stmt in &changeset.expired_nodes {
            debug_assert!(
                !new_updatable.contains_stmt(stmt),
                "expired node still resolves in the new CFG"
            );
            self.jump_fn.lock().remove_by_target(stmt);
            self.summaries.lock().remove_node(stmt);
        }
        debug!(
            count = changeset.expired_nodes.len(),
            elapsed_ms = before_remove.elapsed().as_millis() as u64,
            "expired nodes removed"
        );

        // Phase 2: derive the reprocessing roots from both edge sets.
        self.set_mode(OperationMode::Update);
        let mut change_set: FxHashMap<M, FxHashSet<N>> = FxHashMap::default();
        merge_method_sets(
            &mut change_set,
            self.reprocessing_roots(new_updatable, &changeset.new_edges, &changeset.new_nodes),
        );
        merge_method_sets(
            &mut change_set,
            self.reprocessing_roots(
                new_updatable,
                &changeset.expired_edges,
                &changeset.expired_nodes,
            ),
        );
        *self.change_set.write() = change_set.clone();

        // Phase 3: replay per root, one quiescent run each.
        let total_changed = changeset.new_edges.len() + changeset.expired_edges.len();
        let before_replay = Instant::now();
        let mut replayed = 0usize;
        for roots in change_set.values() {
            for root in roots {
                debug_assert!(new_updatable.contains_stmt(root));

                // Skip if a same-method predecessor already replayed, or if
                // an earlier propagation already visited this node.
                if self.predecessor_repropagated(Some(roots), root) {
                    continue;
                }
                if self.changed_nodes.contains(root) {
                    continue;
                }

                replayed += 1;
                self.set_mode(OperationMode::Update);
                self.jump_save.lock().clear();
                self.start_executor();
                let edges = self.jump_fn.lock().lookup_by_target(root);
                for (d_source, d_target, _) in edges {
                    debug!(?root, "reprocessing edge");
                    self.schedule_edge_processing(PathEdge::new(
                        d_source,
                        root.clone(),
                        d_target,
                    ));
                }
                self.await_completion_compute_values_and_shutdown(false)?;
            }
        }
        info!(
            replayed,
            total_changed,
            elapsed_ms = before_replay.elapsed().as_millis() as u64,
            "replay of changed regions finished"
        );

        // Phase 4: reconsider all incoming edges at touched join points.
        let before_join = Instant::now();
        self.set_mode(OperationMode::Compute);
        self.start_executor();
        let changed: Vec<N> = self
            .changed_nodes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let icfg = self.icfg();
        let mut join_points = 0usize;
        for node in &changed {
            // A changed exit invalidates the summaries recorded through it.
            if icfg.is_exit_stmt(node) {
                let mut summaries = self.summaries.lock();
                for start in icfg.start_points_of(&icfg.method_of(node)) {
                    summaries.remove_exit_summaries(&start, node);
                }
            }

            // Predecessors include return edges targeting this node.
            let mut preds: FxHashSet<N> = new_updatable
                .exit_nodes_for_return_site(node)
                .into_iter()
                .collect();
            preds.extend(icfg.preds_of(node));

            // With a single predecessor no second incoming path can have
            // been missed; phase 3 already recreated the facts here.
            if preds.len() < 2 {
                continue;
            }
            join_points += 1;

            for pred in &preds {
                let edges = self.jump_fn.lock().lookup_by_target(pred);
                for (d_source, d_target, _) in edges {
                    self.schedule_edge_processing(PathEdge::new(
                        d_source,
                        pred.clone(),
                        d_target,
                    ));
                }
            }
        }
        self.await_completion_compute_values_and_shutdown(false)?;
        info!(
            join_points,
            elapsed_ms = before_join.elapsed().as_millis() as u64,
            "join-point recompute finished"
        );

        // Phase 5: values are recomputed from scratch over the repaired
        // jump functions.
        let before_values = Instant::now();
        self.val.lock().clear();
        self.start_executor();
        self.await_completion_compute_values_and_shutdown(true)?;
        info!(
            propagations = self.counters.propagation_count.load(Ordering::Relaxed),
            elapsed_ms = before_values.elapsed().as_millis() as u64,
            "value recompute finished"
        );

        self.changed_nodes.clear();
        self.change_set.write().clear();
        Ok(())
    }

    /// Map each changed edge source to the statements the replay must start
    /// from: the source itself, or the predecessors of the enclosing loop's
    /// start. Sources that are themselves new nodes are skipped; they are
    /// reached through the incoming edges of surviving nodes.
    fn reprocessing_roots(
        &self,
        icfg: &dyn UpdatableInterproceduralCfg<N, M>,
        edges: &FxHashMap<N, Vec<N>>,
        fresh_nodes: &FxHashSet<N>,
    ) -> FxHashMap<M, FxHashSet<N>> {
        let mut roots: FxHashMap<M, FxHashSet<N>> = FxHashMap::default();
        for src in edges.keys() {
            if fresh_nodes.contains(src) {
                continue;
            }

            let pre_nodes = match icfg.loop_start_point_for(src) {
                None => vec![src.clone()],
                Some(loop_start) => icfg.preds_of(&loop_start),
            };

            for pre in pre_nodes {
                let method = icfg.method_of(&pre);
                roots.entry(method).or_default().insert(pre);
            }
        }
        roots
    }
}

/// Union-merge per-method root sets.
fn merge_method_sets<M, N>(into: &mut FxHashMap<M, FxHashSet<N>>, from: FxHashMap<M, FxHashSet<N>>)
where
    M: SolverItem,
    N: SolverItem,
{
    for (method, nodes) in from {
        into.entry(method).or_default().extend(nodes);
    }
}
