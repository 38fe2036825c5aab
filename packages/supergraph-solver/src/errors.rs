//! Error types for the supergraph solver.

use thiserror::Error;

/// Errors surfaced by [`crate::solver::IDESolver`].
///
/// The solver has no retry semantics: every operation is pure with respect to
/// the client-supplied functions, so an error means the run is abandoned and
/// the solver's tables must be considered undefined until the next
/// `clear_results` / `solve`.
#[derive(Debug, Error)]
pub enum SolverError {
    /// `update` was called but the ICFG does not implement the incremental
    /// protocol.
    #[error("{0} CFG does not support incremental updates")]
    NonUpdatableCfg(&'static str),

    /// A worker task panicked; the first captured panic message is attached.
    /// Client flow/edge/lattice faults surface here.
    #[error("worker task failed: {0}")]
    WorkerPanicked(String),
}

/// Result type alias for solver operations.
pub type Result<T> = std::result::Result<T, SolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SolverError::NonUpdatableCfg("current");
        assert_eq!(
            err.to_string(),
            "current CFG does not support incremental updates"
        );

        let err = SolverError::WorkerPanicked("boom".to_string());
        assert!(err.to_string().contains("boom"));
    }
}
