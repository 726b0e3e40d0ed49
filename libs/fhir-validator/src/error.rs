use thiserror::Error;

/// Errors produced when compiling a [`crate::ValidatorConfig`] into a
/// [`crate::ValidationPlan`]. Instance problems never surface here; they
/// become issues in the outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("reference validation is not supported by this engine")]
    ReferencesUnsupported,

    #[error("worker count must be at least 1 when parallel phases are enabled")]
    InvalidWorkerCount,
}
