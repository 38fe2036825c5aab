//! Path edges: the worklist items of the tabulation algorithm.

/// A same-level realizable path from `⟨start, d_source⟩` to
/// `⟨target, d_target⟩` within one procedure.
///
/// The target fact is `Option`al: `None` is the erased-fact marker used only
/// during incremental updates to propagate deletions transitively. It cannot
/// collide with any client-supplied fact. During normal computation the
/// target fact is always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathEdge<N, D> {
    d_source: D,
    target: N,
    d_target: Option<D>,
}

impl<N, D> PathEdge<N, D> {
    pub fn new(d_source: D, target: N, d_target: D) -> Self {
        Self {
            d_source,
            target,
            d_target: Some(d_target),
        }
    }

    /// An erased-fact edge, scheduled to push a deletion to successors.
    pub fn erased(d_source: D, target: N) -> Self {
        Self {
            d_source,
            target,
            d_target: None,
        }
    }

    pub fn fact_at_source(&self) -> &D {
        &self.d_source
    }

    pub fn target(&self) -> &N {
        &self.target
    }

    /// `None` for erased-fact edges.
    pub fn fact_at_target(&self) -> Option<&D> {
        self.d_target.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_edge_accessors() {
        let edge = PathEdge::new("d1", "n", "d2");
        assert_eq!(*edge.fact_at_source(), "d1");
        assert_eq!(*edge.target(), "n");
        assert_eq!(edge.fact_at_target(), Some(&"d2"));
    }

    #[test]
    fn test_erased_edge_has_no_target_fact() {
        let edge: PathEdge<&str, &str> = PathEdge::erased("d1", "n");
        assert_eq!(edge.fact_at_target(), None);
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(PathEdge::new(0, "n", 1), PathEdge::new(0, "n", 1));
        assert_ne!(PathEdge::new(0, "n", 1), PathEdge::erased(0, "n"));
    }
}
