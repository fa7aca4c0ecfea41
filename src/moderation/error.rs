//! Error types for the moderation pipeline.

use thiserror::Error;

/// Failure while writing store state to disk.
///
/// Persistence failures never abort the pipeline: the in-memory state stays
/// updated and the error is logged loudly by the caller.
#[derive(Debug, Error)]
pub enum PersistError {
    /// State could not be serialized
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// State file could not be written
    #[error("failed to write state file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a policy classification call.
///
/// Every variant fails open: the caller treats the message as unflagged and
/// does not retry.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// No API key is configured
    #[error("no classifier API key configured")]
    MissingCredentials,

    /// The request exceeded the classification deadline
    #[error("classifier request timed out")]
    Timeout,

    /// The request failed below the HTTP layer
    #[error("classifier transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("classifier returned HTTP {0}")]
    Status(reqwest::StatusCode),

    /// The completion carried no usable text
    #[error("classifier returned an empty completion")]
    EmptyCompletion,

    /// The completion text is not valid JSON
    #[error("verdict is not valid JSON: {0}")]
    MalformedVerdict(#[source] serde_json::Error),

    /// The verdict JSON is missing or mistypes a required field
    #[error("verdict schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Failure surfaced by the platform gateway, classified so callers can tell
/// tolerable conditions apart from real API trouble.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The target no longer exists
    #[error("target no longer exists")]
    NotFound,

    /// The bot lacks permission for the requested call
    #[error("missing permission for the requested call")]
    Forbidden,

    /// Any other platform API error
    #[error("platform API error: {0}")]
    Api(#[from] Box<poise::serenity_prelude::Error>),
}

impl From<serenity::Error> for GatewayError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(ref response)) =
            err
        {
            match response.status_code.as_u16() {
                404 => return Self::NotFound,
                403 => return Self::Forbidden,
                _ => {}
            }
        }
        Self::Api(Box::new(err))
    }
}

/// Failure delivering an audit event to the external dashboard.
///
/// Audit delivery is best effort; these are logged and then dropped.
#[derive(Debug, Error)]
pub enum AuditTransportError {
    /// The POST failed below the HTTP layer
    #[error("audit endpoint transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("audit endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_error_display() {
        let err = PersistError::from(std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "failed to write state file: disk full");
    }

    #[test]
    fn classifier_error_display() {
        assert_eq!(
            ClassifierError::Timeout.to_string(),
            "classifier request timed out"
        );
        assert_eq!(
            ClassifierError::SchemaMismatch("missing field `action`".to_string()).to_string(),
            "verdict schema mismatch: missing field `action`"
        );
    }

    #[test]
    fn gateway_error_wraps_other_api_errors() {
        let err = GatewayError::from(serenity::Error::Other("boom"));
        assert!(matches!(err, GatewayError::Api(_)));
        assert_eq!(err.to_string(), "platform API error: boom");
    }
}
