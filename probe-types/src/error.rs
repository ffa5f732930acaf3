//! Error types for response decoding.

use thiserror::Error;

/// Errors that can occur while decoding an admin API response body.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Body was not valid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Body was JSON but not an object
    #[error("response body is not a json object")]
    NotAnObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ResponseError::NotAnObject.to_string(),
            "response body is not a json object"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResponseError>();
    }
}
