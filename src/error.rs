//! Error types for imagecheck.

/// Top-level error type for the harness.
///
/// Every variant is fatal to setup. Assertion failures inside individual test
/// cases are not errors; see [`crate::assertions::AssertionFailure`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Docker daemon is not reachable.
    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    /// Container could not be inspected, or has exited.
    #[error("Inspection of container {container} failed: {reason}")]
    Inspection { container: String, reason: String },

    /// Local source could not be packaged into an archive.
    #[error("Failed to package {path}: {reason}")]
    Packaging { path: String, reason: String },

    /// Archive could not be uploaded into the container.
    #[error("Failed to transfer archive into {container}: {reason}")]
    Transfer { container: String, reason: String },

    /// Command could not be run inside the container.
    #[error("Command execution failed in {container}: {reason}")]
    Exec { container: String, reason: String },

    /// HTTP request to the container failed.
    #[error("HTTP probe of {url} failed: {reason}")]
    Probe { url: String, reason: String },

    /// Harness lifecycle method called in the wrong state.
    #[error("Harness is {found}, expected {expected}")]
    HarnessState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Interrupted before the suite finished")]
    Interrupted,

    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_var_display() {
        let err = Error::from(ConfigError::MissingEnvVar("IMAGE_NAME".to_string()));
        let msg = err.to_string();
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("IMAGE_NAME"));
    }

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "IMAGECHECK_HTTP_PORT".to_string(),
            message: "not a port".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("IMAGECHECK_HTTP_PORT"));
        assert!(msg.contains("not a port"));
    }

    #[test]
    fn test_runtime_unavailable_display() {
        let err = Error::RuntimeUnavailable {
            reason: "daemon not running".to_string(),
        };
        assert!(err.to_string().contains("daemon not running"));
    }

    #[test]
    fn test_inspection_display_names_container() {
        let err = Error::Inspection {
            container: "imagecheck-abc".to_string(),
            reason: "container exited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("imagecheck-abc"));
        assert!(msg.contains("container exited"));
    }

    #[test]
    fn test_packaging_display_names_path() {
        let err = Error::Packaging {
            path: "testpack/files/html/test.html".to_string(),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("testpack/files/html/test.html"));
    }

    #[test]
    fn test_harness_state_display() {
        let err = Error::HarnessState {
            expected: "running",
            found: "stopped",
        };
        assert_eq!(err.to_string(), "Harness is stopped, expected running");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::from(io_err);
        assert!(err.to_string().contains("access denied"));
    }
}
