//! End-summary and incoming tables (the CC'10 bookkeeping).
//!
//! Both tables live behind one engine-owned lock: every sequence that reads
//! one and writes the other (`process_call` registering an incoming edge
//! while snapshotting summaries, `process_exit` registering a summary while
//! snapshotting incoming edges) must be a single critical section, followed
//! by lock-free iteration over the snapshot. A finer locking scheme
//! reintroduces the race the single lock exists to prevent.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::edge_functions::EdgeFunctionRef;
use crate::problem::SolverItem;

pub(crate) struct SummaryTables<N, D, V: 'static> {
    /// `(start, d_start) → {(exit, d_exit) → summary function}`. Every entry
    /// records a path from a method start to a method exit observed during
    /// exit processing.
    end_summary: FxHashMap<(N, D), FxHashMap<(N, D), EdgeFunctionRef<V>>>,

    /// `(start, d_start) → {call_stmt → caller-side facts}`. Every recorded
    /// pair is a caller-side fact that flowed into this callee start.
    incoming: FxHashMap<(N, D), FxHashMap<N, FxHashSet<D>>>,
}

impl<N, D, V> SummaryTables<N, D, V>
where
    N: SolverItem,
    D: SolverItem,
    V: SolverItem,
{
    pub fn new() -> Self {
        Self {
            end_summary: FxHashMap::default(),
            incoming: FxHashMap::default(),
        }
    }

    /// Record an observed summary. No join with a previous function is
    /// needed: `f` is a jump function, already joined inside `propagate`.
    pub fn add_end_summary(
        &mut self,
        start: N,
        d_start: D,
        exit: N,
        d_exit: D,
        f: EdgeFunctionRef<V>,
    ) {
        self.end_summary
            .entry((start, d_start))
            .or_default()
            .insert((exit, d_exit), f);
    }

    /// Snapshot of the summaries recorded for `(start, d_start)`.
    pub fn end_summaries(&self, start: &N, d_start: &D) -> Vec<(N, D, EdgeFunctionRef<V>)> {
        self.end_summary
            .get(&(start.clone(), d_start.clone()))
            .map(|row| {
                row.iter()
                    .map(|((exit, d_exit), f)| (exit.clone(), d_exit.clone(), f.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record that `⟨start, d_start⟩` has an incoming edge from
    /// `⟨call_stmt, d_at_call⟩`.
    pub fn add_incoming(&mut self, start: N, d_start: D, call_stmt: N, d_at_call: D) {
        self.incoming
            .entry((start, d_start))
            .or_default()
            .entry(call_stmt)
            .or_default()
            .insert(d_at_call);
    }

    /// Snapshot of the incoming call edges recorded for `(start, d_start)`.
    pub fn incoming(&self, start: &N, d_start: &D) -> Vec<(N, FxHashSet<D>)> {
        self.incoming
            .get(&(start.clone(), d_start.clone()))
            .map(|row| {
                row.iter()
                    .map(|(call, facts)| (call.clone(), facts.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the summaries recorded at a given exit node for one method
    /// start. Used when a join-point recompute invalidates an exit.
    pub fn remove_exit_summaries(&mut self, start: &N, exit: &N) {
        for ((row_start, _), row) in self.end_summary.iter_mut() {
            if row_start == start {
                row.retain(|(row_exit, _), _| row_exit != exit);
            }
        }
        self.end_summary.retain(|_, row| !row.is_empty());
    }

    /// Remove every trace of an expired statement: rows keyed by it, call
    /// entries mentioning it, and summaries exiting through it.
    pub fn remove_node(&mut self, stmt: &N) {
        self.end_summary.retain(|(start, _), _| start != stmt);
        self.incoming.retain(|(start, _), _| start != stmt);

        for row in self.incoming.values_mut() {
            row.remove(stmt);
        }
        self.incoming.retain(|_, row| !row.is_empty());

        for row in self.end_summary.values_mut() {
            row.retain(|(exit, _), _| exit != stmt);
        }
        self.end_summary.retain(|_, row| !row.is_empty());
    }

    pub fn clear(&mut self) {
        self.end_summary.clear();
        self.incoming.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::edge_functions::EdgeIdentity;

    type Tables = SummaryTables<&'static str, u32, i64>;

    #[test]
    fn test_end_summary_round_trip() {
        let mut t = Tables::new();
        t.add_end_summary("sP", 1, "eP", 2, Arc::new(EdgeIdentity));

        let summaries = t.end_summaries(&"sP", &1);
        assert_eq!(summaries.len(), 1);
        let (exit, d_exit, f) = &summaries[0];
        assert_eq!(*exit, "eP");
        assert_eq!(*d_exit, 2);
        assert!(f.is_identity());

        assert!(t.end_summaries(&"sP", &9).is_empty());
    }

    #[test]
    fn test_incoming_accumulates_facts() {
        let mut t = Tables::new();
        t.add_incoming("sP", 1, "c", 7);
        t.add_incoming("sP", 1, "c", 8);
        t.add_incoming("sP", 1, "c2", 7);

        let mut incoming = t.incoming(&"sP", &1);
        incoming.sort_by_key(|(call, _)| *call);
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0].0, "c");
        assert_eq!(incoming[0].1.len(), 2);
    }

    #[test]
    fn test_remove_node_prunes_rows_and_entries() {
        let mut t = Tables::new();
        t.add_end_summary("sP", 1, "eP", 2, Arc::new(EdgeIdentity));
        t.add_end_summary("x", 1, "eP", 2, Arc::new(EdgeIdentity));
        t.add_incoming("sP", 1, "x", 7);
        t.add_incoming("sP", 1, "c", 7);
        t.add_incoming("x", 1, "c", 7);

        t.remove_node(&"x");

        // rows keyed by x are gone
        assert!(t.end_summaries(&"x", &1).is_empty());
        assert!(t.incoming(&"x", &1).is_empty());
        // call entries mentioning x are gone, others survive
        let incoming = t.incoming(&"sP", &1);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].0, "c");
        // summaries not exiting through x survive
        assert_eq!(t.end_summaries(&"sP", &1).len(), 1);
    }

    #[test]
    fn test_remove_exit_summaries_is_scoped_to_start() {
        let mut t = Tables::new();
        t.add_end_summary("sP", 1, "eP", 2, Arc::new(EdgeIdentity));
        t.add_end_summary("sP", 1, "other", 2, Arc::new(EdgeIdentity));
        t.add_end_summary("sQ", 1, "eP", 2, Arc::new(EdgeIdentity));

        t.remove_exit_summaries(&"sP", &"eP");

        assert_eq!(t.end_summaries(&"sP", &1).len(), 1);
        assert_eq!(t.end_summaries(&"sQ", &1).len(), 1);
    }
}
