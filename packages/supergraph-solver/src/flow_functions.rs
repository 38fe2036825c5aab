//! Flow functions: fact transformers `D → 2^D` along ICFG edges.

use std::sync::Arc;

/// Shared handle to a flow function.
pub type FlowFunctionRef<D> = Arc<dyn FlowFunction<D>>;

/// Maps one incoming fact to the set of facts holding after the edge.
///
/// Targets are returned as a `Vec` in a deterministic order; duplicates are
/// harmless (propagation deduplicates through the jump-function join).
pub trait FlowFunction<D>: Send + Sync {
    fn compute_targets(&self, source: &D) -> Vec<D>;
}

/// Identity flow: `f(d) = {d}`.
pub struct Identity;

impl<D: Clone + Send + Sync> FlowFunction<D> for Identity {
    fn compute_targets(&self, source: &D) -> Vec<D> {
        vec![source.clone()]
    }
}

/// Kill-all flow: `f(d) = ∅`.
pub struct KillAll;

impl<D: Send + Sync> FlowFunction<D> for KillAll {
    fn compute_targets(&self, _source: &D) -> Vec<D> {
        Vec::new()
    }
}

/// Factory for the flow functions of one tabulation problem.
pub trait FlowFunctions<N, D: 'static, M>: Send + Sync {
    /// Flow along a normal intra-procedural edge `curr → succ`.
    fn normal_flow_function(&self, curr: &N, succ: &N) -> FlowFunctionRef<D>;

    /// Flow from a call statement into a callee (argument mapping).
    fn call_flow_function(&self, call_stmt: &N, callee: &M) -> FlowFunctionRef<D>;

    /// Flow from a callee exit back to a return site.
    fn return_flow_function(
        &self,
        call_site: &N,
        callee: &M,
        exit_stmt: &N,
        return_site: &N,
    ) -> FlowFunctionRef<D>;

    /// Intra-procedural flow that bypasses the callee (locals pass-through).
    fn call_to_return_flow_function(&self, call_site: &N, return_site: &N) -> FlowFunctionRef<D>;

    /// Invalidation hook for wrapping caches. The core calls this from
    /// `clear_results` and at the start of an incremental update.
    fn invalidate_cache(&self) {}
}

/// Wraps a [`FlowFunctions`] so that the distinguished zero fact survives
/// every edge: whenever the source fact is zero, zero is added to the target
/// set. Installed by the solver when the problem enables `auto_add_zero`.
pub struct ZeroedFlowFunctions<N: 'static, D: 'static, M: 'static> {
    delegate: Arc<dyn FlowFunctions<N, D, M>>,
    zero_value: D,
}

impl<N: 'static, D: 'static, M: 'static> ZeroedFlowFunctions<N, D, M> {
    pub fn new(delegate: Arc<dyn FlowFunctions<N, D, M>>, zero_value: D) -> Self {
        Self {
            delegate,
            zero_value,
        }
    }
}

struct ZeroedFlowFunction<D: 'static> {
    delegate: FlowFunctionRef<D>,
    zero_value: D,
}

impl<D: Clone + Eq + Send + Sync + 'static> FlowFunction<D> for ZeroedFlowFunction<D> {
    fn compute_targets(&self, source: &D) -> Vec<D> {
        let mut targets = self.delegate.compute_targets(source);
        if *source == self.zero_value && !targets.contains(&self.zero_value) {
            targets.push(self.zero_value.clone());
        }
        targets
    }
}

impl<N, D, M> FlowFunctions<N, D, M> for ZeroedFlowFunctions<N, D, M>
where
    N: Send + Sync + 'static,
    D: Clone + Eq + Send + Sync + 'static,
    M: Send + Sync + 'static,
{
    fn normal_flow_function(&self, curr: &N, succ: &N) -> FlowFunctionRef<D> {
        Arc::new(ZeroedFlowFunction {
            delegate: self.delegate.normal_flow_function(curr, succ),
            zero_value: self.zero_value.clone(),
        })
    }

    fn call_flow_function(&self, call_stmt: &N, callee: &M) -> FlowFunctionRef<D> {
        Arc::new(ZeroedFlowFunction {
            delegate: self.delegate.call_flow_function(call_stmt, callee),
            zero_value: self.zero_value.clone(),
        })
    }

    fn return_flow_function(
        &self,
        call_site: &N,
        callee: &M,
        exit_stmt: &N,
        return_site: &N,
    ) -> FlowFunctionRef<D> {
        Arc::new(ZeroedFlowFunction {
            delegate: self
                .delegate
                .return_flow_function(call_site, callee, exit_stmt, return_site),
            zero_value: self.zero_value.clone(),
        })
    }

    fn call_to_return_flow_function(&self, call_site: &N, return_site: &N) -> FlowFunctionRef<D> {
        Arc::new(ZeroedFlowFunction {
            delegate: self
                .delegate
                .call_to_return_flow_function(call_site, return_site),
            zero_value: self.zero_value.clone(),
        })
    }

    fn invalidate_cache(&self) {
        self.delegate.invalidate_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Fact {
        Zero,
        Var(&'static str),
    }

    struct GenOnZero;

    impl FlowFunctions<&'static str, Fact, &'static str> for GenOnZero {
        fn normal_flow_function(
            &self,
            _curr: &&'static str,
            _succ: &&'static str,
        ) -> FlowFunctionRef<Fact> {
            struct Gen;
            impl FlowFunction<Fact> for Gen {
                fn compute_targets(&self, source: &Fact) -> Vec<Fact> {
                    match source {
                        // zero generates x but drops itself
                        Fact::Zero => vec![Fact::Var("x")],
                        other => vec![other.clone()],
                    }
                }
            }
            Arc::new(Gen)
        }

        fn call_flow_function(
            &self,
            _call_stmt: &&'static str,
            _callee: &&'static str,
        ) -> FlowFunctionRef<Fact> {
            Arc::new(KillAll)
        }

        fn return_flow_function(
            &self,
            _call_site: &&'static str,
            _callee: &&'static str,
            _exit_stmt: &&'static str,
            _return_site: &&'static str,
        ) -> FlowFunctionRef<Fact> {
            Arc::new(Identity)
        }

        fn call_to_return_flow_function(
            &self,
            _call_site: &&'static str,
            _return_site: &&'static str,
        ) -> FlowFunctionRef<Fact> {
            Arc::new(Identity)
        }
    }

    #[test]
    fn test_identity_and_kill() {
        let id = Identity;
        assert_eq!(id.compute_targets(&Fact::Var("x")), vec![Fact::Var("x")]);

        let kill = KillAll;
        assert!(kill.compute_targets(&Fact::Var("x")).is_empty());
    }

    #[test]
    fn test_zeroed_wrapper_preserves_zero() {
        let zeroed = ZeroedFlowFunctions::new(Arc::new(GenOnZero), Fact::Zero);

        // zero flows through even though the delegate dropped it
        let targets = zeroed
            .normal_flow_function(&"a", &"b")
            .compute_targets(&Fact::Zero);
        assert!(targets.contains(&Fact::Zero));
        assert!(targets.contains(&Fact::Var("x")));

        // non-zero facts are untouched
        let targets = zeroed
            .normal_flow_function(&"a", &"b")
            .compute_targets(&Fact::Var("y"));
        assert_eq!(targets, vec![Fact::Var("y")]);

        // the kill-all call flow still kills zero's siblings but keeps zero
        let targets = zeroed
            .call_flow_function(&"a", &"f")
            .compute_targets(&Fact::Zero);
        assert_eq!(targets, vec![Fact::Zero]);
    }
}
