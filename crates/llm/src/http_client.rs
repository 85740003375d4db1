//! HTTP Client Factory
//!
//! Provides a factory function for building reqwest clients with proxy support.

use super::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(url)` -> route all requests through the proxy
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
pub fn build_http_client(proxy_url: Option<&str>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    match proxy_url {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| LlmError::InvalidRequest {
                message: format!("Invalid proxy URL {}: {}", url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build().map_err(|e| LlmError::Other {
        message: format!("Failed to build HTTP client: {}", e),
    })
}

/// Join `path` onto a base URL, tolerating a missing or present trailing slash.
pub fn endpoint(base_url: &str, path: &str) -> LlmResult<url::Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = url::Url::parse(&base).map_err(|e| LlmError::InvalidRequest {
        message: format!("Invalid base URL {}: {}", base_url, e),
    })?;
    base.join(path.trim_start_matches('/'))
        .map_err(|e| LlmError::InvalidRequest {
            message: format!("Invalid endpoint path {}: {}", path, e),
        })
}
