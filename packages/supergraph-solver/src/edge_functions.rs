//! Edge functions: value transformers labelling exploded-supergraph edges.
//!
//! Edge functions form a monoid under composition and a semilattice under
//! pointwise join. The solver detects fixpoints through `equal_to`, so
//! compositions must canonicalize: `f ∘ identity` and `identity ∘ f` collapse
//! to `f`, and joining equal functions must yield a function equal to both.
//! Without that, `equal_to` never reports convergence and the solver does
//! not terminate.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to an edge function. Stored in the jump-function and
/// end-summary tables, so it must be cheaply clonable.
pub type EdgeFunctionRef<V> = Arc<dyn EdgeFunction<V>>;

/// A distributive value transformer `V → V` along one supergraph edge.
pub trait EdgeFunction<V: 'static>: Debug + Send + Sync {
    /// Apply the function to a source value.
    fn compute_target(&self, source: &V) -> V;

    /// Function composition: `self` is applied first, then `second`.
    /// Returns a function computing `second(self(v))`.
    fn compose_with(&self, second: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V>;

    /// Pointwise join over the value lattice.
    fn join_with(&self, other: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V>;

    /// Semantic equality. Implementers must over-approximate soundly:
    /// reporting `false` for equal functions costs termination, reporting
    /// `true` for unequal ones costs precision.
    fn equal_to(&self, other: &EdgeFunctionRef<V>) -> bool;

    /// Canonicalization hook: is this the identity function?
    fn is_identity(&self) -> bool {
        false
    }

    /// Canonicalization hook: does this map every value to top?
    fn is_all_top(&self) -> bool {
        false
    }

    /// Canonicalization hook: does this map every value to bottom?
    fn is_all_bottom(&self) -> bool {
        false
    }

    /// Downcast support for `equal_to` implementations.
    fn as_any(&self) -> &dyn Any;
}

/// The identity edge function: `f(v) = v`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeIdentity;

impl<V: Clone + Send + Sync + Debug + 'static> EdgeFunction<V> for EdgeIdentity {
    fn compute_target(&self, source: &V) -> V {
        source.clone()
    }

    fn compose_with(&self, second: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V> {
        // identity ∘ f = f
        second.clone()
    }

    fn join_with(&self, other: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V> {
        if other.is_identity() {
            return other.clone();
        }
        if other.is_all_bottom() {
            return other.clone();
        }
        if other.is_all_top() {
            return Arc::new(EdgeIdentity);
        }
        // Join is commutative; the client function knows its own lattice.
        other.join_with(&(Arc::new(EdgeIdentity) as EdgeFunctionRef<V>))
    }

    fn equal_to(&self, other: &EdgeFunctionRef<V>) -> bool {
        other.is_identity()
    }

    fn is_identity(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The all-top edge function: `f(v) = ⊤`.
///
/// Absence of a jump function is equivalent to all-top; the solver never
/// stores it. It is the identity of `join_with`.
#[derive(Debug, Clone)]
pub struct AllTop<V> {
    top: V,
}

impl<V> AllTop<V> {
    pub fn new(top_element: V) -> Self {
        Self { top: top_element }
    }
}

impl<V: Clone + Send + Sync + Debug + 'static> EdgeFunction<V> for AllTop<V> {
    fn compute_target(&self, _source: &V) -> V {
        self.top.clone()
    }

    fn compose_with(&self, _second: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V> {
        // Distributive edge functions map top to top, so allTop ∘ f = allTop.
        Arc::new(self.clone())
    }

    fn join_with(&self, other: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V> {
        other.clone()
    }

    fn equal_to(&self, other: &EdgeFunctionRef<V>) -> bool {
        other.is_all_top()
    }

    fn is_all_top(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The all-bottom edge function: `f(v) = ⊥`.
#[derive(Debug, Clone)]
pub struct AllBottom<V> {
    bottom: V,
}

impl<V> AllBottom<V> {
    pub fn new(bottom_element: V) -> Self {
        Self {
            bottom: bottom_element,
        }
    }
}

impl<V: Clone + Send + Sync + Debug + 'static> EdgeFunction<V> for AllBottom<V> {
    fn compute_target(&self, _source: &V) -> V {
        self.bottom.clone()
    }

    fn compose_with(&self, second: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V> {
        if second.is_identity() {
            return Arc::new(self.clone());
        }
        // second sees the constant bottom, i.e. the composition behaves like
        // second restricted to one input.
        second.clone()
    }

    fn join_with(&self, _other: &EdgeFunctionRef<V>) -> EdgeFunctionRef<V> {
        // bottom absorbs under join
        Arc::new(self.clone())
    }

    fn equal_to(&self, other: &EdgeFunctionRef<V>) -> bool {
        other.is_all_bottom()
    }

    fn is_all_bottom(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for the edge functions of one tabulation problem.
///
/// Each method yields the function labelling one kind of exploded edge; the
/// solver composes and joins the results while materializing jump functions.
pub trait EdgeFunctions<N, D, M, V: 'static>: Send + Sync {
    /// Function for a normal intra-procedural edge `(curr, curr_fact) →
    /// (succ, succ_fact)`.
    fn normal_edge_function(
        &self,
        curr: &N,
        curr_fact: &D,
        succ: &N,
        succ_fact: &D,
    ) -> EdgeFunctionRef<V>;

    /// Function for a call edge from a call statement into a callee start.
    fn call_edge_function(
        &self,
        call_stmt: &N,
        fact_at_call: &D,
        callee: &M,
        fact_at_entry: &D,
    ) -> EdgeFunctionRef<V>;

    /// Function for a return edge from a callee exit back to a return site.
    fn return_edge_function(
        &self,
        call_site: &N,
        callee: &M,
        exit_stmt: &N,
        exit_fact: &D,
        return_site: &N,
        return_fact: &D,
    ) -> EdgeFunctionRef<V>;

    /// Function for the intra-procedural call-to-return edge.
    fn call_to_return_edge_function(
        &self,
        call_site: &N,
        call_fact: &D,
        return_site: &N,
        return_fact: &D,
    ) -> EdgeFunctionRef<V>;

    /// Invalidation hook for wrapping caches. The core calls this from
    /// `clear_results` and at the start of an incremental update.
    fn invalidate_cache(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top() -> EdgeFunctionRef<i64> {
        Arc::new(AllTop::new(i64::MAX))
    }

    fn bottom() -> EdgeFunctionRef<i64> {
        Arc::new(AllBottom::new(i64::MIN))
    }

    fn identity() -> EdgeFunctionRef<i64> {
        Arc::new(EdgeIdentity)
    }

    #[test]
    fn test_identity_compute_and_compose() {
        let id = identity();
        assert_eq!(id.compute_target(&7), 7);

        // identity ∘ allTop = allTop
        let composed = id.compose_with(&top());
        assert!(composed.is_all_top());
    }

    #[test]
    fn test_all_top_is_join_identity() {
        let id = identity();
        let joined = top().join_with(&id);
        assert!(joined.is_identity());

        let joined = id.join_with(&top());
        assert!(joined.is_identity());
    }

    #[test]
    fn test_all_bottom_absorbs_join() {
        let joined = bottom().join_with(&identity());
        assert!(joined.is_all_bottom());

        let joined = identity().join_with(&bottom());
        assert!(joined.is_all_bottom());
    }

    #[test]
    fn test_all_top_compose_collapses() {
        let composed = top().compose_with(&identity());
        assert!(composed.is_all_top());
        assert_eq!(composed.compute_target(&0), i64::MAX);
    }

    #[test]
    fn test_equal_to() {
        assert!(identity().equal_to(&identity()));
        assert!(top().equal_to(&top()));
        assert!(bottom().equal_to(&bottom()));
        assert!(!identity().equal_to(&top()));
        assert!(!top().equal_to(&bottom()));
    }
}
