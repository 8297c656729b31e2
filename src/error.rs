use thiserror::Error;

/// Failures that escape a repair loop or selector run.
///
/// Validation failures are not errors: they travel as
/// [`ValidationOutcome`](crate::validator::ValidationOutcome) values and stay
/// inside the repair loop. Only the variants below cross component
/// boundaries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForgeError {
    /// Provider auth/config/network exhaustion or a missing engine binary.
    /// Never retried by the repair loop.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
    /// The LLM answered, but with something unusable.
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ForgeError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ForgeError::Infrastructure(_) | ForgeError::Config(_))
    }

    pub fn infrastructure(err: impl std::fmt::Display) -> Self {
        ForgeError::Infrastructure(err.to_string())
    }
}

pub type ForgeResult<T> = Result<T, ForgeError>;
