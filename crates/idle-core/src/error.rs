//! Error type for building idling resources.

use thiserror::Error;

use crate::types::ValidationError;

/// Errors raised while constructing a [`UriIdlingResource`](crate::UriIdlingResource)
/// or compiling its ignore patterns.
#[derive(Debug, Error)]
pub enum IdleError {
    /// A construction argument failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// An ignore pattern could not be compiled.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// The default scheduler was requested outside a Tokio runtime.
    #[error("no Tokio runtime available for the default scheduler: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
