//! HTTP client construction and status classification.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::{Result, VireoError};

pub const USER_AGENT: &str = concat!("vireo/", env!("CARGO_PKG_VERSION"));

/// Build the client used for catalog API calls: total request timeout.
pub fn build_api_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| VireoError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            cause: Some(e.to_string()),
        })
}

/// Build the client used for transfers: connect timeout only.
///
/// A total timeout would kill multi-gigabyte downloads; the chunk loop
/// handles progress, deadlines, and cancellation itself.
pub fn build_download_client(connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| VireoError::Network {
            message: format!("Failed to create download HTTP client: {}", e),
            cause: Some(e.to_string()),
        })
}

/// Statuses worth retrying: timeouts, throttling, server-side failures.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429) || status.is_server_error()
}

/// Statuses that terminate immediately: client errors other than 408/429.
pub fn is_permanent_status(status: StatusCode) -> bool {
    status.is_client_error() && !matches!(status.as_u16(), 408 | 429)
}

/// Host component of a URL, lowercased.
pub fn host_of(url_str: &str) -> Option<String> {
    url::Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::OK));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_permanent_statuses() {
        assert!(is_permanent_status(StatusCode::BAD_REQUEST));
        assert!(is_permanent_status(StatusCode::UNAUTHORIZED));
        assert!(is_permanent_status(StatusCode::NOT_FOUND));
        assert!(!is_permanent_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_permanent_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_permanent_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://huggingface.co/city96/FLUX.1-dev-gguf/resolve/main/x.gguf"),
            Some("huggingface.co".to_string())
        );
        assert_eq!(
            host_of("https://Civitai.com/api/download/models/12345"),
            Some("civitai.com".to_string())
        );
        assert_eq!(host_of("not a url"), None);
    }
}
