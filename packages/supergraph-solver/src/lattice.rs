//! Join semilattice over the value domain `V`.

/// A join semilattice on the value type `V`.
///
/// The solver propagates values upward from `bottom` by repeated joins; it
/// terminates if the lattice has finite ascending chains (or the client
/// otherwise guarantees convergence).
///
/// Laws expected of `join`:
/// - Commutative: `join(a, b) = join(b, a)`
/// - Associative: `join(join(a, b), c) = join(a, join(b, c))`
/// - Idempotent: `join(a, a) = a`
/// - `top` is absorbing, `bottom` is the identity
pub trait JoinLattice<V>: Send + Sync {
    /// The top element. Unreached `(node, fact)` pairs implicitly hold top.
    fn top_element(&self) -> V;

    /// The bottom element. Seeds are initialized to bottom.
    fn bottom_element(&self) -> V;

    /// Join two values.
    fn join(&self, left: &V, right: &V) -> V;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Min-over-integers lattice: top = MAX, bottom = MIN, join = min.
    struct MinLattice;

    impl JoinLattice<i64> for MinLattice {
        fn top_element(&self) -> i64 {
            i64::MAX
        }

        fn bottom_element(&self) -> i64 {
            i64::MIN
        }

        fn join(&self, left: &i64, right: &i64) -> i64 {
            (*left).min(*right)
        }
    }

    #[test]
    fn test_join_laws() {
        let l = MinLattice;
        let (a, b, c) = (3i64, 5i64, 7i64);

        assert_eq!(l.join(&a, &b), l.join(&b, &a));
        assert_eq!(l.join(&l.join(&a, &b), &c), l.join(&a, &l.join(&b, &c)));
        assert_eq!(l.join(&a, &a), a);
    }

    #[test]
    fn test_top_bottom() {
        let l = MinLattice;
        let v = 42i64;

        // top is the join identity, bottom absorbs
        assert_eq!(l.join(&v, &l.top_element()), v);
        assert_eq!(l.join(&v, &l.bottom_element()), l.bottom_element());
    }
}
