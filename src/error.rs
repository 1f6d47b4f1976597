use thiserror::Error;

/// Errors surfaced by the crate.
///
/// Only structural problems are errors: a malformed dataset or a nonsensical
/// sampler configuration. Numerical trouble during sampling (non-finite
/// densities, divergent transitions) is recoverable and reported through
/// [`crate::diagnostics::DiagnosticsReport`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Dataset fails a shape or range invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sampler configuration is unusable (zero chains, zero draws, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
