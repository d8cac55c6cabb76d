use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoryError>;

/// Errors surfaced by the story pipeline.
///
/// Every variant reaches the caller unchanged; nothing is retried or
/// replaced with a default along the way.
#[derive(Debug, Error)]
pub enum StoryError {
    /// Missing model ids, unreadable topic template, bad provider settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller asked for something the current state cannot serve
    /// (no mode selected, blank context, undecodable image).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A model call failed before producing a response.
    #[error("{service} call failed: {source}")]
    ServiceInvocation {
        service: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The model answered, but not with a usable story.
    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String, raw: String },
}

impl StoryError {
    pub(crate) fn service(service: &'static str, err: anyhow::Error) -> Self {
        StoryError::ServiceInvocation {
            service,
            source: err.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        StoryError::MalformedResponse {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }

    /// Raw model output attached to a `MalformedResponse`, for diagnostics.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            StoryError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::error::Error as _;

    #[test]
    fn test_raw_response_only_on_malformed() {
        let err = StoryError::malformed("not json", "not json");
        assert_eq!(err.raw_response(), Some("not json"));

        let err = StoryError::Precondition("no input mode selected".to_string());
        assert!(err.raw_response().is_none());
    }

    #[test]
    fn test_service_error_keeps_source_message() {
        let err = StoryError::service("text generation", anyhow!("quota exceeded"));
        assert_eq!(err.to_string(), "text generation call failed: quota exceeded");
        assert!(err.source().is_some());
    }
}
