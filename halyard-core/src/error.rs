//! Error types for the HA routing core.

use thiserror::Error;

/// Errors raised by the HA routing core.
///
/// Only [`HaError::Configuration`] is meant to abort a caller's operation. The
/// other variants are recoverable and are usually logged and ignored by the
/// request path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HaError {
    /// The service has no usable HA configuration.
    #[error("HA configuration error for service '{service}': {reason}")]
    Configuration {
        /// Name of the service being registered.
        service: String,
        /// What is wrong with its configuration.
        reason: String,
    },

    /// A URL outside the seeded candidate set was proposed as active.
    #[error("'{url}' is not a candidate URL")]
    InvalidCandidate {
        /// The rejected URL.
        url: String,
    },

    /// A parameter in an HA descriptor could not be parsed.
    #[error("invalid HA parameter '{key}': '{value}'")]
    InvalidParameter {
        /// Parameter name.
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },
}

impl HaError {
    pub(crate) fn configuration(service: &str, reason: impl Into<String>) -> Self {
        Self::Configuration { service: service.to_string(), reason: reason.into() }
    }

    /// Returns `true` if the error is fatal to a service registration.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HaError::configuration("WEBHDFS", "no HA configuration");
        assert_eq!(
            err.to_string(),
            "HA configuration error for service 'WEBHDFS': no HA configuration"
        );
        assert!(err.is_configuration());

        let err = HaError::InvalidCandidate { url: "http://nowhere".to_string() };
        assert_eq!(err.to_string(), "'http://nowhere' is not a candidate URL");
        assert!(!err.is_configuration());
    }
}
