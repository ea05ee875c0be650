//! Client error types for the configuration SDK

/// Error type for configuration client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Invalid or incomplete `NacosConfigOptions` (e.g. empty server list).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied identifier failed validation (empty `dataId`/`group`, null content).
    #[error("validation error: {0}")]
    Validation(String),

    /// Server rejected the request with HTTP 403.
    #[error("unauthorized")]
    Unauthorized,

    /// Server returned a non-retryable, non-2xx status.
    #[error("remote error: status={status}, message={message}")]
    Remote { status: u16, message: String },

    /// Network/IO failure, or retries exhausted.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The caller's cancellation signal fired.
    #[error("canceled")]
    Canceled,

    /// Wraps any other unexpected failure.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::Unauthorized;
        assert_eq!(err.to_string(), "unauthorized");

        let err = ClientError::Remote {
            status: 500,
            message: "internal error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "remote error: status=500, message=internal error"
        );

        let err = ClientError::Canceled;
        assert_eq!(err.to_string(), "canceled");
    }

    #[test]
    fn test_configuration_error() {
        let err = ClientError::Configuration("serverAddresses must not be empty".to_string());
        assert!(err.to_string().contains("serverAddresses"));
    }
}
