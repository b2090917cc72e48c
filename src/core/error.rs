//! Error taxonomy for gray steering
//!
//! Every runtime variant is non-fatal to the request: the decision engine
//! converts it into a "not gray" decision and reports the cause through the
//! log facade. Only [`GrayError::Configuration`] surfaces at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrayError {
    /// Transport failure or non-2xx answer from the configuration authority
    #[error("upstream config fetch failed: {0}")]
    ConfigFetch(String),

    /// Configuration authority answered with an unusable payload
    #[error("upstream config malformed: {0}")]
    ConfigParse(String),

    /// Registry answered, but not with a usable instance list
    #[error("registry query failed: {0}")]
    Registry(String),

    /// Registry could not be reached at all
    #[error("registry unreachable: {0}")]
    RegistryUnavailable(String),

    /// Node probe could not even be issued
    #[error("node probe failed: {0}")]
    Probe(String),

    /// Invalid static configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GrayError {
    /// Whether one more attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GrayError::RegistryUnavailable(_))
    }
}

impl From<GrayError> for Box<pingora_error::Error> {
    fn from(err: GrayError) -> Self {
        pingora_error::Error::explain(pingora_error::ErrorType::InternalError, err.to_string())
    }
}

/// Result type alias for gray steering operations
pub type GrayResult<T> = std::result::Result<T, GrayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_registry_is_transient() {
        assert!(GrayError::RegistryUnavailable("refused".into()).is_transient());
        assert!(!GrayError::Registry("bad body".into()).is_transient());
        assert!(!GrayError::ConfigFetch("503".into()).is_transient());
        assert!(!GrayError::Probe("bad url".into()).is_transient());
    }

    #[test]
    fn test_into_pingora_error_keeps_message() {
        let err: Box<pingora_error::Error> =
            GrayError::Configuration("gray engine is not initialized".into()).into();
        assert!(err.to_string().contains("gray engine is not initialized"));
    }
}
