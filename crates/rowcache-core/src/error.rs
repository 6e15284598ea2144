//! Error types shared across the cache, data-source and export layers.

use thiserror::Error;

/// Errors returned by a [`DataSource`](crate::source::DataSource) query.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Query endpoint not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl SourceError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => SourceError::Unauthorized,
            403 => SourceError::AccessDenied(truncated),
            404 => SourceError::NotFound(truncated),
            429 => SourceError::RateLimited,
            500..=599 => SourceError::ServerError(truncated),
            _ => SourceError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

/// Errors raised by [`WindowedCache`](crate::cache::WindowedCache) when a
/// write would break its invariants. Nothing is written when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("rows {offset}..{end} extend past total {total}")]
    BeyondTotal { offset: usize, end: usize, total: usize },
}

/// Errors from the bulk-export path.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("export query failed: {0}")]
    Source(#[from] SourceError),

    #[error("export incomplete: expected {expected} rows, received {received}")]
    Incomplete { expected: usize, received: usize },

    #[error("export response started at offset {0}, expected 0")]
    UnexpectedOffset(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            SourceError::from_status(StatusCode::UNAUTHORIZED, ""),
            SourceError::Unauthorized
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::FORBIDDEN, "nope"),
            SourceError::AccessDenied(ref b) if b == "nope"
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            SourceError::RateLimited
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            SourceError::ServerError(_)
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::IM_A_TEAPOT, ""),
            SourceError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = SourceError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 520 total bytes)"));

        assert_eq!(SourceError::truncate_body("short"), "short");
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        // 'é' is two bytes, so byte 500 falls in the middle of a character
        let body = format!("a{}", "é".repeat(300));
        let truncated = SourceError::truncate_body(&body);
        assert!(truncated.contains("... (truncated"));
    }
}
