//! The jump-function table: the solver's single source of truth for known
//! realizable path edges.
//!
//! Logically a mapping `(d_source, target, d_target) → EdgeFunction`, indexed
//! three ways. The reverse index `(target, d_target) → {d_source → f}` is the
//! authoritative store; the forward and by-target indices are secondary and
//! kept in sync by every mutation. The all-top function is never stored:
//! absence of an entry means all-top.
//!
//! The table carries no lock of its own. The engine wraps it in a structural
//! mutex because `propagate` needs lookup + join + insert as one atomic
//! sequence; lookups return snapshots so callers can iterate without holding
//! that lock.

use rustc_hash::FxHashMap;

use crate::edge_functions::EdgeFunctionRef;
use crate::problem::SolverItem;

pub(crate) struct JumpFunctions<N, D, V: 'static> {
    all_top: EdgeFunctionRef<V>,

    /// Authoritative index: `(target, d_target) → {d_source → f}`.
    reverse: FxHashMap<(N, D), FxHashMap<D, EdgeFunctionRef<V>>>,

    /// Secondary index: `(d_source, target) → {d_target → f}`.
    forward: FxHashMap<(D, N), FxHashMap<D, EdgeFunctionRef<V>>>,

    /// Secondary index: `target → {(d_source, d_target) → f}`.
    by_target: FxHashMap<N, FxHashMap<(D, D), EdgeFunctionRef<V>>>,

    /// Number of distinct `(d_source, target, d_target)` entries.
    edge_count: usize,
}

impl<N, D, V> JumpFunctions<N, D, V>
where
    N: SolverItem,
    D: SolverItem,
    V: SolverItem,
{
    pub fn new(all_top: EdgeFunctionRef<V>) -> Self {
        Self {
            all_top,
            reverse: FxHashMap::default(),
            forward: FxHashMap::default(),
            by_target: FxHashMap::default(),
            edge_count: 0,
        }
    }

    /// Insert or overwrite the function for `(d_source, target, d_target)`,
    /// updating all three indices.
    pub fn add_function(&mut self, d_source: D, target: N, d_target: D, f: EdgeFunctionRef<V>) {
        debug_assert!(
            !f.equal_to(&self.all_top),
            "all-top must never be stored explicitly"
        );

        let previous = self
            .reverse
            .entry((target.clone(), d_target.clone()))
            .or_default()
            .insert(d_source.clone(), f.clone());
        self.forward
            .entry((d_source.clone(), target.clone()))
            .or_default()
            .insert(d_target.clone(), f.clone());
        self.by_target
            .entry(target)
            .or_default()
            .insert((d_source, d_target), f);

        if previous.is_none() {
            self.edge_count += 1;
        }
    }

    /// The stored function, or all-top when absent.
    pub fn get(&self, d_source: &D, target: &N, d_target: &D) -> EdgeFunctionRef<V> {
        self.forward
            .get(&(d_source.clone(), target.clone()))
            .and_then(|row| row.get(d_target))
            .cloned()
            .unwrap_or_else(|| self.all_top.clone())
    }

    /// Snapshot of `{d_target → f}` for a `(d_source, target)` pair.
    pub fn forward_lookup(&self, d_source: &D, target: &N) -> FxHashMap<D, EdgeFunctionRef<V>> {
        self.forward
            .get(&(d_source.clone(), target.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of `{d_source → f}` for a `(target, d_target)` pair.
    pub fn reverse_lookup(&self, target: &N, d_target: &D) -> FxHashMap<D, EdgeFunctionRef<V>> {
        self.reverse
            .get(&(target.clone(), d_target.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every `(d_source, d_target, f)` entry targeting a node.
    pub fn lookup_by_target(&self, target: &N) -> Vec<(D, D, EdgeFunctionRef<V>)> {
        self.by_target
            .get(target)
            .map(|row| {
                row.iter()
                    .map(|((d_source, d_target), f)| {
                        (d_source.clone(), d_target.clone(), f.clone())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one entry from all three indices.
    pub fn remove_function(&mut self, d_source: &D, target: &N, d_target: &D) {
        let mut removed = false;
        if let Some(row) = self.reverse.get_mut(&(target.clone(), d_target.clone())) {
            removed = row.remove(d_source).is_some();
            if row.is_empty() {
                self.reverse.remove(&(target.clone(), d_target.clone()));
            }
        }
        if let Some(row) = self.forward.get_mut(&(d_source.clone(), target.clone())) {
            row.remove(d_target);
            if row.is_empty() {
                self.forward.remove(&(d_source.clone(), target.clone()));
            }
        }
        if let Some(row) = self.by_target.get_mut(target) {
            row.remove(&(d_source.clone(), d_target.clone()));
            if row.is_empty() {
                self.by_target.remove(target);
            }
        }
        if removed {
            self.edge_count -= 1;
        }
    }

    /// Remove every entry whose target node is `target`.
    pub fn remove_by_target(&mut self, target: &N) {
        let Some(row) = self.by_target.remove(target) else {
            return;
        };
        for (d_source, d_target) in row.into_keys() {
            if let Some(srcs) = self.reverse.get_mut(&(target.clone(), d_target.clone())) {
                if srcs.remove(&d_source).is_some() {
                    self.edge_count -= 1;
                }
                if srcs.is_empty() {
                    self.reverse.remove(&(target.clone(), d_target.clone()));
                }
            }
            if let Some(tgts) = self.forward.get_mut(&(d_source.clone(), target.clone())) {
                tgts.remove(&d_target);
                if tgts.is_empty() {
                    self.forward.remove(&(d_source, target.clone()));
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.reverse.clear();
        self.forward.clear();
        self.by_target.clear();
        self.edge_count = 0;
    }

    /// Number of stored `(d_source, target, d_target)` entries.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Number of distinct target nodes with at least one entry.
    pub fn target_count(&self) -> usize {
        self.by_target.len()
    }

    /// Every stored `(d_source, target, d_target, f)` entry; test support.
    #[cfg(test)]
    pub(crate) fn all_entries(&self) -> Vec<(D, N, D, EdgeFunctionRef<V>)> {
        let mut entries = Vec::with_capacity(self.edge_count);
        for ((target, d_target), srcs) in &self.reverse {
            for (d_source, f) in srcs {
                entries.push((d_source.clone(), target.clone(), d_target.clone(), f.clone()));
            }
        }
        entries
    }

    /// Internal consistency of the three indices; test support.
    #[cfg(test)]
    fn indices_consistent(&self) -> bool {
        let mut seen = 0usize;
        for ((target, d_target), srcs) in &self.reverse {
            for d_source in srcs.keys() {
                seen += 1;
                let in_forward = self
                    .forward
                    .get(&(d_source.clone(), target.clone()))
                    .is_some_and(|row| row.contains_key(d_target));
                let in_by_target = self
                    .by_target
                    .get(target)
                    .is_some_and(|row| row.contains_key(&(d_source.clone(), d_target.clone())));
                if !in_forward || !in_by_target {
                    return false;
                }
            }
        }
        let forward_total: usize = self.forward.values().map(|row| row.len()).sum();
        let by_target_total: usize = self.by_target.values().map(|row| row.len()).sum();
        seen == self.edge_count && forward_total == seen && by_target_total == seen
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::edge_functions::{AllBottom, AllTop, EdgeIdentity};

    type Table = JumpFunctions<&'static str, u32, i64>;

    fn table() -> Table {
        JumpFunctions::new(Arc::new(AllTop::new(i64::MAX)))
    }

    #[test]
    fn test_absence_is_all_top() {
        let t = table();
        assert!(t.get(&0, &"n", &1).is_all_top());
        assert!(t.forward_lookup(&0, &"n").is_empty());
        assert!(t.reverse_lookup(&"n", &1).is_empty());
        assert!(t.lookup_by_target(&"n").is_empty());
    }

    #[test]
    fn test_add_updates_all_indices() {
        let mut t = table();
        t.add_function(0, "n", 1, Arc::new(EdgeIdentity));

        assert!(t.get(&0, &"n", &1).is_identity());
        assert!(t.forward_lookup(&0, &"n").contains_key(&1));
        assert!(t.reverse_lookup(&"n", &1).contains_key(&0));
        assert_eq!(t.lookup_by_target(&"n").len(), 1);
        assert_eq!(t.edge_count(), 1);
        assert_eq!(t.target_count(), 1);
        assert!(t.indices_consistent());
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let mut t = table();
        t.add_function(0, "n", 1, Arc::new(EdgeIdentity));
        t.add_function(0, "n", 1, Arc::new(AllBottom::new(i64::MIN)));

        assert_eq!(t.edge_count(), 1);
        assert!(t.get(&0, &"n", &1).is_all_bottom());
    }

    #[test]
    fn test_remove_function() {
        let mut t = table();
        t.add_function(0, "n", 1, Arc::new(EdgeIdentity));
        t.add_function(0, "n", 2, Arc::new(EdgeIdentity));
        t.remove_function(&0, &"n", &1);

        assert!(t.get(&0, &"n", &1).is_all_top());
        assert!(t.get(&0, &"n", &2).is_identity());
        assert_eq!(t.edge_count(), 1);
        assert!(t.indices_consistent());
    }

    #[test]
    fn test_remove_by_target() {
        let mut t = table();
        t.add_function(0, "n", 1, Arc::new(EdgeIdentity));
        t.add_function(2, "n", 3, Arc::new(EdgeIdentity));
        t.add_function(0, "m", 1, Arc::new(EdgeIdentity));
        t.remove_by_target(&"n");

        assert!(t.lookup_by_target(&"n").is_empty());
        assert!(t.reverse_lookup(&"n", &1).is_empty());
        assert!(t.forward_lookup(&0, &"n").is_empty());
        assert_eq!(t.edge_count(), 1);
        assert_eq!(t.target_count(), 1);
        assert!(t.indices_consistent());
    }

    #[test]
    fn test_snapshots_are_detached() {
        let mut t = table();
        t.add_function(0, "n", 1, Arc::new(EdgeIdentity));
        let snapshot = t.reverse_lookup(&"n", &1);
        t.remove_by_target(&"n");

        // the snapshot is unaffected by the later removal
        assert!(snapshot.contains_key(&0));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, u8, u8),
        Remove(u8, u8, u8),
        RemoveByTarget(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u8..4, 0u8..4).prop_map(|(a, b, c)| Op::Add(a, b, c)),
            (0u8..4, 0u8..4, 0u8..4).prop_map(|(a, b, c)| Op::Remove(a, b, c)),
            (0u8..4).prop_map(Op::RemoveByTarget),
        ]
    }

    proptest! {
        /// Any sequence of mutations leaves the three indices consistent.
        #[test]
        fn prop_indices_stay_consistent(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            static TARGETS: [&str; 4] = ["a", "b", "c", "d"];
            let mut t: Table = JumpFunctions::new(Arc::new(AllTop::new(i64::MAX)));
            for op in ops {
                match op {
                    Op::Add(d1, n, d2) => {
                        t.add_function(d1 as u32, TARGETS[n as usize], d2 as u32, Arc::new(EdgeIdentity));
                    }
                    Op::Remove(d1, n, d2) => {
                        t.remove_function(&(d1 as u32), &TARGETS[n as usize], &(d2 as u32));
                    }
                    Op::RemoveByTarget(n) => {
                        t.remove_by_target(&TARGETS[n as usize]);
                    }
                }
                prop_assert!(t.indices_consistent());
            }
        }
    }
}
