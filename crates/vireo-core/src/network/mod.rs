//! Shared HTTP plumbing for catalog adapters and the download manager.
//!
//! One client configuration, one retry policy. Adapters and the transfer
//! loop only translate request/response shapes.

mod client;
mod retry;

pub use client::{build_api_client, build_download_client, host_of, is_permanent_status, is_retryable_status, USER_AGENT};
pub use retry::RetryConfig;
