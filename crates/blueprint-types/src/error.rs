/// Unified error type for all Blueprint subsystems.
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    // === Capability Errors ===
    #[error("Provider {provider} returned an error: {message}")]
    ProviderError {
        provider: String,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Transport error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("Capability for step '{step}' timed out after {timeout_ms}ms")]
    CapabilityTimeout { step: String, timeout_ms: u64 },

    #[error("Backend binary '{binary}' was not found on PATH")]
    BackendUnavailable { binary: String },

    #[error("Capability '{capability}' failed: {message}")]
    CapabilityError { capability: String, message: String },

    // === Pipeline Errors ===
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("No capability bound to role '{role}'")]
    MissingCapability { role: String },

    #[error("Invalid initial input: {0}")]
    InvalidInput(String),

    #[error("Run record rejected step '{step}': {message}")]
    RunSequence { step: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl BlueprintError {
    /// Returns `true` if the error is transient and the invocation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BlueprintError::RateLimited { .. }
                | BlueprintError::Transport { .. }
                | BlueprintError::CapabilityTimeout { .. }
                | BlueprintError::ProviderError {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlueprintError::AuthError { .. }
                | BlueprintError::BackendUnavailable { .. }
                | BlueprintError::InvalidConfig(_)
                | BlueprintError::MissingCapability { .. }
                | BlueprintError::InvalidInput(_)
        )
    }
}

/// A convenience alias for `Result<T, BlueprintError>`.
pub type Result<T> = std::result::Result<T, BlueprintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = BlueprintError::ProviderError {
            provider: "codex".into(),
            message: "turn failed".into(),
            retryable: true,
        };
        assert_eq!(err.to_string(), "Provider codex returned an error: turn failed");
    }

    #[test]
    fn error_display_capability_timeout() {
        let err = BlueprintError::CapabilityTimeout {
            step: "generate".into(),
            timeout_ms: 300_000,
        };
        assert_eq!(
            err.to_string(),
            "Capability for step 'generate' timed out after 300000ms"
        );
    }

    #[test]
    fn error_display_missing_capability() {
        let err = BlueprintError::MissingCapability {
            role: "evaluator".into(),
        };
        assert_eq!(err.to_string(), "No capability bound to role 'evaluator'");
    }

    #[test]
    fn error_display_invalid_config() {
        let err = BlueprintError::InvalidConfig("threshold 120 is outside 0-100".into());
        assert_eq!(
            err.to_string(),
            "Invalid pipeline configuration: threshold 120 is outside 0-100"
        );
    }

    #[test]
    fn error_display_other() {
        let err = BlueprintError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }

    // --- is_retryable ---

    #[test]
    fn retryable_transient_errors() {
        let errs = [
            BlueprintError::RateLimited {
                provider: "x".into(),
                retry_after_ms: 1000,
            },
            BlueprintError::Transport {
                provider: "x".into(),
                message: "connection reset".into(),
            },
            BlueprintError::CapabilityTimeout {
                step: "parse".into(),
                timeout_ms: 10,
            },
            BlueprintError::ProviderError {
                provider: "x".into(),
                message: "overloaded".into(),
                retryable: true,
            },
        ];
        for err in &errs {
            assert!(err.is_retryable(), "{err} should be retryable");
            assert!(!err.is_terminal(), "{err} should not be terminal");
        }
    }

    #[test]
    fn not_retryable_provider_error_when_not_flagged() {
        let err = BlueprintError::ProviderError {
            provider: "x".into(),
            message: "bad request".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn capability_error_is_neither_retryable_nor_terminal() {
        let err = BlueprintError::CapabilityError {
            capability: "evaluator".into(),
            message: "unsupported step".into(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
    }

    // --- is_terminal ---

    #[test]
    fn terminal_errors() {
        let errs = [
            BlueprintError::AuthError {
                provider: "x".into(),
            },
            BlueprintError::BackendUnavailable {
                binary: "gemini".into(),
            },
            BlueprintError::InvalidConfig("bad".into()),
            BlueprintError::MissingCapability {
                role: "parser".into(),
            },
            BlueprintError::InvalidInput("empty".into()),
        ];
        for err in &errs {
            assert!(err.is_terminal(), "{err} should be terminal");
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BlueprintError = io_err.into();
        assert!(matches!(err, BlueprintError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: BlueprintError = json_err.into();
        assert!(matches!(err, BlueprintError::Json(_)));
    }
}
