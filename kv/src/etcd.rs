//! etcd backend over the v3 JSON gateway.
//!
//! Keys and values travel base64-encoded; 64-bit integers come back as JSON
//! strings. The version token is the key's `mod_revision`: the per-key
//! `version` restarts at 1 when a key is deleted and recreated, which would
//! let a stale CAS commit. A CAS is a single txn:
//! `if mod_revision(key) == expected then put(key, value)`.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client as ReqwestClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{trace, warn};
use url::Url;

use crate::config::EtcdConfig;
use crate::http;
use crate::{Backend, KVError, KVResult, Record, Version};

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    keys_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "de_int64")]
    mod_revision: u64,
}

impl KeyValue {
    fn into_record(self) -> KVResult<Record> {
        let key = String::from_utf8(decode_b64(&self.key)?)
            .map_err(|e| KVError::Protocol(format!("etcd key is not UTF-8: {}", e)))?;
        let value = decode_b64(&self.value)?;
        Ok(Record::new(key, value, Version::from_raw(self.mod_revision)))
    }
}

#[derive(Debug, Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct DeleteRangeRequest {
    key: String,
}

#[derive(Debug, Serialize)]
struct TxnRequest {
    compare: Vec<Compare>,
    success: Vec<RequestOp>,
}

#[derive(Debug, Serialize)]
struct Compare {
    key: String,
    result: &'static str,
    target: &'static str,
    mod_revision: String,
}

#[derive(Debug, Serialize)]
struct RequestOp {
    request_put: PutRequest,
}

#[derive(Debug, Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

/// Error body of the gateway.
#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

/// Accepts an int64 written either as a JSON string or a number.
fn de_int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Str(String),
        Num(u64),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Int64::Num(n) => Ok(n),
    }
}

fn encode_b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

fn decode_b64(data: &str) -> KVResult<Vec<u8>> {
    STANDARD
        .decode(data.as_bytes())
        .map_err(|e| KVError::Protocol(format!("etcd: bad base64: {}", e)))
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Returns `[0]` ("to the end of the keyspace") when no such key exists,
/// including for the empty prefix.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

/// Range request covering every key under `prefix`.
fn prefix_range(prefix: &str, keys_only: bool) -> RangeRequest {
    let key: &[u8] = if prefix.is_empty() {
        &[0]
    } else {
        prefix.as_bytes()
    };
    RangeRequest {
        key: encode_b64(key),
        range_end: Some(encode_b64(&prefix_range_end(prefix.as_bytes()))),
        keys_only,
    }
}

/// etcd backend.
///
/// Requests go to one endpoint at a time. A transport failure moves later
/// requests to the next endpoint; the failed request is not retried.
pub struct EtcdBackend {
    http: ReqwestClient,
    endpoints: Vec<Url>,
    current: AtomicUsize,
}

impl EtcdBackend {
    /// Builds a backend from its configuration. No request is made.
    pub fn new(config: EtcdConfig) -> KVResult<Self> {
        if config.endpoints.is_empty() {
            return Err(KVError::Config("etcd: at least one endpoint required".to_string()));
        }
        if config.timeout.is_zero() {
            return Err(KVError::Config("etcd timeout must be non-zero".to_string()));
        }
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| http::base_url(e, "http"))
            .collect::<KVResult<Vec<_>>>()?;
        let http = http::client(config.http_client, config.timeout)?;
        Ok(Self {
            http,
            endpoints,
            current: AtomicUsize::new(0),
        })
    }

    /// Returns the endpoint the next request goes to.
    pub fn current_endpoint(&self) -> &Url {
        &self.endpoints[self.current.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    async fn call<Req, Resp>(&self, path: &str, body: &Req) -> KVResult<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let idx = self.current.load(Ordering::Relaxed) % self.endpoints.len();
        let url = self.endpoints[idx]
            .join(path)
            .map_err(|e| KVError::Config(e.to_string()))?;

        let response = match self.http.post(url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                let err = KVError::from(e);
                if matches!(err, KVError::Unavailable(_)) && self.endpoints.len() > 1 {
                    let next = (idx + 1) % self.endpoints.len();
                    if self
                        .current
                        .compare_exchange(idx, next, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        warn!(
                            from = %self.endpoints[idx],
                            to = %self.endpoints[next],
                            error = %err,
                            "etcd endpoint failed, switching"
                        );
                    }
                }
                return Err(err);
            }
        };

        let status = response.status();
        trace!(%status, path, "etcd response");
        let body = response.bytes().await?;
        if !status.is_success() {
            let message = match serde_json::from_slice::<GatewayError>(&body) {
                Ok(e) if !e.message.is_empty() => e.message,
                Ok(e) if !e.error.is_empty() => e.error,
                _ => String::from_utf8_lossy(&body).trim().to_string(),
            };
            return Err(KVError::backend(status.as_u16(), message));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl Backend for EtcdBackend {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn get(&self, key: &str) -> KVResult<Option<Record>> {
        let request = RangeRequest {
            key: encode_b64(key.as_bytes()),
            range_end: None,
            keys_only: false,
        };
        let response: RangeResponse = self.call("v3/kv/range", &request).await?;
        response
            .kvs
            .into_iter()
            .next()
            .map(KeyValue::into_record)
            .transpose()
    }

    async fn put(&self, key: &str, value: &[u8]) -> KVResult<()> {
        let request = PutRequest {
            key: encode_b64(key.as_bytes()),
            value: encode_b64(value),
        };
        let _: serde_json::Value = self.call("v3/kv/put", &request).await?;
        Ok(())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: &[u8],
        expected: Version,
    ) -> KVResult<bool> {
        let encoded_key = encode_b64(key.as_bytes());
        let request = TxnRequest {
            compare: vec![Compare {
                key: encoded_key.clone(),
                result: "EQUAL",
                target: "MOD",
                mod_revision: expected.raw().to_string(),
            }],
            success: vec![RequestOp {
                request_put: PutRequest {
                    key: encoded_key,
                    value: encode_b64(value),
                },
            }],
        };
        let response: TxnResponse = self.call("v3/kv/txn", &request).await?;
        Ok(response.succeeded)
    }

    async fn scan(&self, prefix: &str) -> KVResult<Vec<Record>> {
        let response: RangeResponse = self.call("v3/kv/range", &prefix_range(prefix, false)).await?;
        response
            .kvs
            .into_iter()
            .map(KeyValue::into_record)
            .collect()
    }

    async fn keys(&self, prefix: &str) -> KVResult<Vec<String>> {
        let response: RangeResponse = self.call("v3/kv/range", &prefix_range(prefix, true)).await?;
        response
            .kvs
            .into_iter()
            .map(|kv| kv.into_record().map(|r| r.key))
            .collect()
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        let request = DeleteRangeRequest {
            key: encode_b64(key.as_bytes()),
        };
        let _: serde_json::Value = self.call("v3/kv/deleterange", &request).await?;
        Ok(())
    }
}
