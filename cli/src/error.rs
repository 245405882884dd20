//! Error types for the agent-detector CLI
//!
//! Provides user-friendly messages for startup and connection failures.

use detector_link::LinkError;
use std::fmt;

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CLIError>;

/// Errors that can occur in the CLI
#[derive(Debug)]
pub enum CLIError {
    /// Error from the detector-link library
    LinkError(LinkError),

    /// Missing or invalid environment configuration
    ConfigurationError(String),

    /// A subscribed query failed or the connection gave up
    SubscriptionError(String),

    /// Output could not be written
    FileError(String),

    /// User cancelled operation
    Cancelled,
}

impl CLIError {
    fn format_link_error(err: &LinkError) -> String {
        match err {
            LinkError::NetworkError(msg) => Self::clean_nested_message(msg),
            LinkError::WebSocketError(msg) => Self::clean_nested_message(msg),
            LinkError::AuthenticationError(msg)
            | LinkError::ConfigurationError(msg)
            | LinkError::TimeoutError(msg)
            | LinkError::QueryError(msg)
            | LinkError::SerializationError(msg)
            | LinkError::InternalError(msg) => msg.clone(),
            LinkError::ServerError {
                status_code,
                message,
            } => format!("Server error ({}): {}", status_code, message),
            LinkError::Cancelled => "Operation cancelled".to_string(),
        }
    }

    fn clean_nested_message(message: &str) -> String {
        let mut cleaned = message.trim();
        let prefixes = [
            "Connection failed:",
            "connection failed:",
            "Network error:",
            "network error:",
        ];

        loop {
            let mut stripped = false;
            for prefix in &prefixes {
                if let Some(rest) = cleaned.strip_prefix(prefix) {
                    cleaned = rest.trim_start();
                    stripped = true;
                    break;
                }
            }

            if !stripped {
                break;
            }
        }

        cleaned.to_string()
    }
}

impl fmt::Display for CLIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CLIError::LinkError(e) => write!(f, "{}", Self::format_link_error(e)),
            CLIError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            CLIError::SubscriptionError(msg) => write!(f, "Subscription error: {}", msg),
            CLIError::FileError(msg) => write!(f, "File error: {}", msg),
            CLIError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for CLIError {}

impl From<LinkError> for CLIError {
    fn from(err: LinkError) -> Self {
        match err {
            // Startup problems read the same whichever layer found them.
            LinkError::ConfigurationError(msg) => CLIError::ConfigurationError(msg),
            LinkError::Cancelled => CLIError::Cancelled,
            other => CLIError::LinkError(other),
        }
    }
}

impl From<std::io::Error> for CLIError {
    fn from(err: std::io::Error) -> Self {
        CLIError::FileError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CLIError::ConfigurationError("Missing AGENT_DETECTOR_BACKEND_URL".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing AGENT_DETECTOR_BACKEND_URL"
        );

        let err = CLIError::Cancelled;
        assert_eq!(err.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_link_errors_are_cleaned() {
        let err: CLIError =
            LinkError::NetworkError("Connection failed: connection refused".into()).into();
        assert_eq!(err.to_string(), "connection refused");

        let err: CLIError = LinkError::ConfigurationError("base_url is required".into()).into();
        assert!(matches!(err, CLIError::ConfigurationError(_)));
    }
}
