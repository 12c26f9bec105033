//! Error types for insight analysis
//!
//! Errors are classified by origin:
//! - Backend failures: the service or deadline, worth a fallback run
//! - Configuration: bad settings or credentials for the selected mode
//! - Validation: the input record set itself
//! - UnknownClient: resolution misses, converted to no-ops by the
//!   context analyzer rather than propagated

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Analysis timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown client: {0}")]
    UnknownClient(String),
}

impl AnalysisError {
    /// True when the failure came from the back end or its deadline rather
    /// than from the caller's input or settings.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            AnalysisError::Timeout { .. } | AnalysisError::BackendUnavailable { .. }
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            AnalysisError::Configuration(_) => {
                "Check the analysis settings in ~/.advisoros/config.json"
            }
            AnalysisError::Timeout { .. } => {
                "Raise the timeout or switch to a faster analysis mode."
            }
            AnalysisError::BackendUnavailable { .. } => {
                "Check the insight service status and your network connection."
            }
            AnalysisError::Validation(_) => {
                "Verify the client's communication records are well formed."
            }
            AnalysisError::UnknownClient(_) => {
                "Check the identifier against the client directory."
            }
        }
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("Request timed out: {}", err)
        } else if err.is_connect() {
            format!("Connection failed: {}", err)
        } else {
            err.to_string()
        };
        AnalysisError::BackendUnavailable { reason }
    }
}
