//! HTTP plumbing shared by the Consul and etcd backends.

use std::time::Duration;

use reqwest::{Client as ReqwestClient, Response};
use url::Url;

use crate::{KVError, KVResult};

const USER_AGENT: &str = "coordkv-rust/0.1";

/// Returns the caller's client, or builds one with the given timeout.
pub(crate) fn client(custom: Option<ReqwestClient>, timeout: Duration) -> KVResult<ReqwestClient> {
    if let Some(client) = custom {
        return Ok(client);
    }
    if timeout.is_zero() {
        return Err(KVError::Config("timeout must be non-zero".to_string()));
    }
    ReqwestClient::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| KVError::Config(e.to_string()))
}

/// Parses `addr` as a base URL, adding `scheme` when it has none.
pub(crate) fn base_url(addr: &str, scheme: &str) -> KVResult<Url> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(KVError::Config("address must be non-empty".to_string()));
    }
    let raw = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("{}://{}", scheme, addr)
    };
    let url = Url::parse(&raw).map_err(|e| KVError::Config(format!("{}: {}", raw, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(KVError::Config(format!("{}: not a base URL", raw)));
    }
    Ok(url)
}

/// Turns a non-success response into [`KVError::Backend`].
pub(crate) async fn check_status(response: Response) -> KVResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    } else {
        body.trim().to_string()
    };
    Err(KVError::backend(status.as_u16(), message))
}
