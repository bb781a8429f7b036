//! Consul backend over the agent's HTTP KV API.
//!
//! Versions are Consul `ModifyIndex` values. Conditional writes use
//! `PUT ?cas=<index>`, where index 0 means "only if absent". When
//! [`ConsulConfig::wait`] is set, watch reads become blocking queries
//! (`?index=<X-Consul-Index>&wait=<d>`), so a watch parks on the agent
//! instead of re-reading an unchanged key.
//!
//! Keys travel in the URL path, so a key with a `.` or `..` segment
//! (`"svc/../secret"`) is rejected with [`KVError::InvalidKey`]; the other
//! backends accept such keys verbatim.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::trace;
use url::Url;

use crate::config::ConsulConfig;
use crate::config::duration::format_duration;
use crate::http;
use crate::{Backend, KVError, KVResult, Record, Version, WatchCursor};

const INDEX_HEADER: &str = "X-Consul-Index";

/// One entry of a `/v1/kv` read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    #[serde(default)]
    value: Option<String>,
    modify_index: u64,
}

impl KvPair {
    fn into_record(self) -> KVResult<Record> {
        let value = match self.value {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| KVError::Protocol(format!("consul value for {}: {}", self.key, e)))?,
            None => Vec::new(),
        };
        Ok(Record::new(
            self.key,
            value,
            Version::from_raw(self.modify_index),
        ))
    }
}

/// Consul KV backend.
pub struct ConsulBackend {
    http: ReqwestClient,
    base: Url,
    timeout: Duration,
    wait: Option<Duration>,
}

impl ConsulBackend {
    /// Builds a backend from its configuration. No request is made.
    pub fn new(config: ConsulConfig) -> KVResult<Self> {
        let base = http::base_url(&config.addr, &config.scheme)?;
        if config.timeout.is_zero() {
            return Err(KVError::Config("consul timeout must be non-zero".to_string()));
        }
        let http = http::client(config.http_client, config.timeout)?;
        Ok(Self {
            http,
            base,
            timeout: config.timeout,
            wait: config.wait,
        })
    }

    /// Returns the agent base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Builds `/v1/kv/<key>`, one path segment per `/`-separated part.
    ///
    /// Keys with a `.` or `..` part are rejected: URL normalisation would
    /// collapse them onto a different key.
    fn kv_url(&self, key: &str) -> KVResult<Url> {
        if key.split('/').any(|part| part == "." || part == "..") {
            return Err(KVError::InvalidKey(format!(
                "consul: key {:?} has a '.' or '..' segment",
                key
            )));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| KVError::Config(format!("{}: not a base URL", self.base)))?
            .pop_if_empty()
            .push("v1")
            .push("kv")
            .extend(key.split('/'));
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> KVResult<Response> {
        let response = request.send().await?;
        trace!(status = %response.status(), url = %response.url(), "consul response");
        Ok(response)
    }

    /// Parses the `true`/`false` body of a write.
    async fn write_result(&self, response: Response) -> KVResult<bool> {
        let body = http::check_status(response).await?.text().await?;
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(KVError::Protocol(format!(
                "consul: unexpected write response {:?}",
                other
            ))),
        }
    }

    /// Reads pairs; 404 is an empty result.
    async fn read_pairs(&self, response: Response) -> KVResult<Vec<KvPair>> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = http::check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// A read with blocking-query parameters when configured.
    fn watch_request(&self, url: Url, cursor: WatchCursor) -> RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(wait) = self.wait {
            if cursor.0 > 0 {
                request = request.query(&[
                    ("index", cursor.0.to_string()),
                    ("wait", format_duration(wait)),
                ]);
            }
            // Consul may hold the request for wait + wait/16.
            request = request.timeout(wait + wait / 16 + self.timeout);
        }
        request
    }

    fn next_cursor(&self, response: &Response, cursor: WatchCursor) -> WatchCursor {
        if self.wait.is_none() {
            return cursor;
        }
        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        match index {
            // Index went backwards (snapshot restore, leader change): start over.
            Some(index) if index < cursor.0 => WatchCursor(0),
            // A zero index would make every blocking query return at once.
            Some(0) => WatchCursor(1),
            Some(index) => WatchCursor(index),
            None => WatchCursor(0),
        }
    }
}

#[async_trait]
impl Backend for ConsulBackend {
    fn name(&self) -> &'static str {
        "consul"
    }

    async fn get(&self, key: &str) -> KVResult<Option<Record>> {
        let url = self.kv_url(key)?;
        let response = self.send(self.http.get(url)).await?;
        let pairs = self.read_pairs(response).await?;
        pairs
            .into_iter()
            .find(|p| p.key == key)
            .map(KvPair::into_record)
            .transpose()
    }

    async fn put(&self, key: &str, value: &[u8]) -> KVResult<()> {
        let url = self.kv_url(key)?;
        let response = self.send(self.http.put(url).body(value.to_vec())).await?;
        if self.write_result(response).await? {
            Ok(())
        } else {
            Err(KVError::Protocol(format!("consul refused write to {}", key)))
        }
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: &[u8],
        expected: Version,
    ) -> KVResult<bool> {
        let url = self.kv_url(key)?;
        let request = self
            .http
            .put(url)
            .query(&[("cas", expected.raw().to_string())])
            .body(value.to_vec());
        let response = self.send(request).await?;
        self.write_result(response).await
    }

    async fn scan(&self, prefix: &str) -> KVResult<Vec<Record>> {
        let url = self.kv_url(prefix)?;
        let response = self.send(self.http.get(url).query(&[("recurse", "true")])).await?;
        let mut records = self
            .read_pairs(response)
            .await?
            .into_iter()
            .map(KvPair::into_record)
            .collect::<KVResult<Vec<_>>>()?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn keys(&self, prefix: &str) -> KVResult<Vec<String>> {
        let url = self.kv_url(prefix)?;
        let response = self.send(self.http.get(url).query(&[("keys", "true")])).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = http::check_status(response).await?.bytes().await?;
        let mut keys: Vec<String> = serde_json::from_slice(&body)?;
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        let url = self.kv_url(key)?;
        let response = self.send(self.http.delete(url)).await?;
        self.write_result(response).await?;
        Ok(())
    }

    async fn watch_get(
        &self,
        key: &str,
        cursor: WatchCursor,
    ) -> KVResult<(Option<Record>, WatchCursor)> {
        let url = self.kv_url(key)?;
        let response = self.send(self.watch_request(url, cursor)).await?;
        let next = self.next_cursor(&response, cursor);
        let record = self
            .read_pairs(response)
            .await?
            .into_iter()
            .find(|p| p.key == key)
            .map(KvPair::into_record)
            .transpose()?;
        Ok((record, next))
    }

    async fn watch_scan(
        &self,
        prefix: &str,
        cursor: WatchCursor,
    ) -> KVResult<(Vec<Record>, WatchCursor)> {
        let url = self.kv_url(prefix)?;
        let request = self.watch_request(url, cursor).query(&[("recurse", "true")]);
        let response = self.send(request).await?;
        let next = self.next_cursor(&response, cursor);
        let mut records = self
            .read_pairs(response)
            .await?
            .into_iter()
            .map(KvPair::into_record)
            .collect::<KVResult<Vec<_>>>()?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((records, next))
    }
}
