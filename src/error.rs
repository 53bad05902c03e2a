//! Error types for the uplift controller

use thiserror::Error;

use crate::resources::Resources;

/// Main error type for uplift operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error (unparseable file, unknown names, bad shapes)
    #[error("configuration error: {0}")]
    Config(String),

    /// Cloud autoscaling API error or remediation precondition failure
    #[error("autoscaling error: {0}")]
    Cloud(String),

    /// Instance metadata service error (unreachable, or expected data absent)
    #[error("instance metadata error: {0}")]
    Metadata(String),

    /// The strategy pipeline ran out of remediators with demand outstanding
    #[error("unable to remediate all resources, missing {residual}")]
    Unremediated {
        /// The demand no remediator could cover
        residual: Resources,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cloud error with the given message
    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    /// Create an instance metadata error with the given message
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_helpers_accept_str_and_string() {
        let err = Error::config("missing strategies");
        assert!(err.to_string().contains("configuration error"));

        let group = "workers";
        let err = Error::cloud(format!("autoscaling group {group} at max size"));
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn unremediated_reports_residual() {
        let err = Error::Unremediated {
            residual: Resources::new(16000, 0),
        };
        assert!(err.to_string().contains("16000"));
    }
}
