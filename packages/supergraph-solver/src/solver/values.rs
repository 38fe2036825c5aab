//! Value computation: turning the materialized jump functions into
//! per-node environments.
//!
//! Phase V1 pushes lattice values from the seeds through call edges and
//! procedure summaries; phase V2 folds every jump function into the value
//! table with one pass over the non-call, non-start nodes, sliced across
//! the worker pool. Both phases run on the same counting executor as the
//! tabulation phase.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::errors::Result;
use crate::problem::SolverItem;
use crate::solver::core::{Counters, SolverCore};

/// `(node, fact) → value` environment. Absence means top. Written only
/// during value computation, under the engine's value lock.
pub(crate) struct ValueTable<N, D, V> {
    rows: FxHashMap<N, FxHashMap<D, V>>,
}

impl<N, D, V> ValueTable<N, D, V>
where
    N: SolverItem,
    D: SolverItem,
    V: SolverItem,
{
    pub fn new() -> Self {
        Self {
            rows: FxHashMap::default(),
        }
    }

    pub fn get(&self, node: &N, fact: &D) -> Option<&V> {
        self.rows.get(node).and_then(|row| row.get(fact))
    }

    pub fn set(&mut self, node: N, fact: D, value: V) {
        self.rows.entry(node).or_default().insert(fact, value);
    }

    /// Snapshot of the environment at one node.
    pub fn row(&self, node: &N) -> FxHashMap<D, V> {
        self.rows.get(node).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

impl<N, D, M, V> SolverCore<N, D, M, V>
where
    N: SolverItem,
    D: SolverItem,
    M: SolverItem,
    V: SolverItem,
{
    /// Run both value phases to quiescence. Requires a running executor.
    pub(crate) fn compute_values(&self) -> Result<()> {
        let Some(executor) = self.executor() else {
            debug_assert!(false, "no executor running");
            return Ok(());
        };

        // Phase V1: seed the environments and propagate values forward.
        let before = Instant::now();
        for seed in &self.initial_seeds {
            let bottom = self.value_lattice.bottom_element();
            self.val
                .lock()
                .set(seed.clone(), self.zero_value.clone(), bottom);
            self.schedule_value_processing(seed.clone(), self.zero_value.clone());
        }
        executor.await_completion()?;
        debug!(
            elapsed_ms = before.elapsed().as_millis() as u64,
            "value phase V1 finished"
        );

        // Phase V2: fold all jump functions, sliced across the workers.
        let before = Instant::now();
        let nodes: Arc<Vec<N>> = Arc::new(self.icfg().all_non_call_start_nodes());
        for worker_index in 0..self.num_threads {
            let Some(core) = self.me.upgrade() else {
                return Ok(());
            };
            let nodes = Arc::clone(&nodes);
            executor.execute(Box::new(move || {
                core.value_computation_task(&nodes, worker_index);
            }));
        }
        executor.await_completion()?;
        debug!(
            elapsed_ms = before.elapsed().as_millis() as u64,
            nodes = nodes.len(),
            "value phase V2 finished"
        );

        Ok(())
    }

    fn schedule_value_processing(&self, node: N, fact: D) {
        let Some(executor) = self.executor() else {
            return;
        };
        let Some(core) = self.me.upgrade() else {
            return;
        };
        executor.execute(Box::new(move || core.value_propagation_task(&node, &fact)));
    }

    /// One value-propagation step for `⟨node, fact⟩`.
    fn value_propagation_task(&self, node: &N, fact: &D) {
        let icfg = self.icfg();
        // Initial seeds are not necessarily method starts, but they root
        // jump functions all the same.
        if icfg.is_start_point(node) || self.seed_set.contains(node) {
            self.propagate_value_at_start(node, fact);
        }
        if icfg.is_call_stmt(node) {
            self.propagate_value_at_call(node, fact);
        }
    }

    /// Push the value at a method start through the jump functions reaching
    /// each call inside the method.
    fn propagate_value_at_start(&self, start: &N, fact: &D) {
        let icfg = self.icfg();
        let method = icfg.method_of(start);
        for call in icfg.calls_from_within(&method) {
            let entries = self.jump_fn.lock().forward_lookup(fact, &call);
            for (d_prime, f_prime) in entries {
                let source_value = self.val(start, fact);
                self.propagate_value(&call, &d_prime, f_prime.compute_target(&source_value));
                Counters::bump(&self.counters.flow_function_application_count);
            }
        }
    }

    /// Push the value at a call statement into every callee start.
    fn propagate_value_at_call(&self, call: &N, fact: &D) {
        let icfg = self.icfg();
        for callee in icfg.callees_of_call_at(call) {
            let call_flow = self.flow_functions.call_flow_function(call, &callee);
            Counters::bump(&self.counters.flow_function_construction_count);
            for d_prime in call_flow.compute_targets(fact) {
                let edge_fn = self
                    .edge_functions
                    .call_edge_function(call, fact, &callee, &d_prime);
                for start in icfg.start_points_of(&callee) {
                    let source_value = self.val(call, fact);
                    self.propagate_value(&start, &d_prime, edge_fn.compute_target(&source_value));
                    Counters::bump(&self.counters.flow_function_application_count);
                }
            }
        }
    }

    /// Join a value into the table; reschedule the pair iff it changed.
    fn propagate_value(&self, node: &N, fact: &D, value: V) {
        let changed = {
            let mut val = self.val.lock();
            let current = val
                .get(node, fact)
                .cloned()
                .unwrap_or_else(|| self.value_lattice.top_element());
            let joined = self.value_lattice.join(&current, &value);
            if joined != current {
                val.set(node.clone(), fact.clone(), joined);
                true
            } else {
                false
            }
        };

        if changed {
            self.schedule_value_processing(node.clone(), fact.clone());
        }
    }

    /// The stored value, or top when absent.
    pub(crate) fn val(&self, node: &N, fact: &D) -> V {
        self.val
            .lock()
            .get(node, fact)
            .cloned()
            .unwrap_or_else(|| self.value_lattice.top_element())
    }

    /// Phase V2 worker: fold the jump functions targeting each node of this
    /// worker's slice into the value table.
    fn value_computation_task(&self, nodes: &[N], worker_index: usize) {
        let section_size = nodes.len() / self.num_threads + self.num_threads;
        let start_index = (section_size * worker_index).min(nodes.len());
        let end_index = (section_size * (worker_index + 1)).min(nodes.len());

        let icfg = self.icfg();
        for node in &nodes[start_index..end_index] {
            for start in icfg.start_points_of(&icfg.method_of(node)) {
                let by_target = self.jump_fn.lock().lookup_by_target(node);
                for (d_source, d_target, f) in by_target {
                    let mut val = self.val.lock();
                    let source_value = val
                        .get(&start, &d_source)
                        .cloned()
                        .unwrap_or_else(|| self.value_lattice.top_element());
                    let computed = f.compute_target(&source_value);
                    let current = val
                        .get(node, &d_target)
                        .cloned()
                        .unwrap_or_else(|| self.value_lattice.top_element());
                    val.set(
                        node.clone(),
                        d_target,
                        self.value_lattice.join(&current, &computed),
                    );
                    drop(val);
                    Counters::bump(&self.counters.flow_function_application_count);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_table_absence_and_rows() {
        let mut table: ValueTable<&'static str, u32, i64> = ValueTable::new();
        assert!(table.get(&"n", &0).is_none());
        assert!(table.row(&"n").is_empty());

        table.set("n", 0, 5);
        table.set("n", 1, 7);
        assert_eq!(table.get(&"n", &0), Some(&5));
        assert_eq!(table.row(&"n").len(), 2);

        table.clear();
        assert!(table.get(&"n", &0).is_none());
    }

    #[test]
    fn test_value_table_overwrite() {
        let mut table: ValueTable<&'static str, u32, i64> = ValueTable::new();
        table.set("n", 0, 5);
        table.set("n", 0, 3);
        assert_eq!(table.get(&"n", &0), Some(&3));
    }
}
