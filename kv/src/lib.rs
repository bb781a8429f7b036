//! Uniform key-value interface over coordination stores.
//!
//! [`Kv`] exposes put, get, list, delete, compare-and-swap and watch over
//! any [`Backend`]. Three backends ship with the crate:
//!
//! - [`consul::ConsulBackend`]: Consul's HTTP KV API
//! - [`etcd::EtcdBackend`]: etcd's v3 JSON gateway
//! - [`memory::MemoryBackend`]: an in-process map, for tests and embedding
//!
//! Values are converted to payloads by a [`Codec`]; the facade is generic
//! over it, so the value type is fixed at compile time.
//!
//! # Example
//!
//! ```rust,no_run
//! use coordkv::{Config, Kv};
//! use coordkv::codec::JsonCodec;
//!
//! # async fn run() -> coordkv::KVResult<()> {
//! let kv = Kv::new(Config::etcd(["http://127.0.0.1:2379"]), JsonCodec::<u64>::new())?;
//!
//! kv.put("counters/requests", &0).await?;
//! loop {
//!     if kv.cas("counters/requests", |n| Ok::<_, std::convert::Infallible>(n + 1)).await? {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod cas;
mod client;
mod config;
mod error;
mod http;
mod record;
mod watch;

pub mod consul;
pub mod etcd;
pub mod memory;

use std::fmt;

use async_trait::async_trait;

pub use client::Kv;
pub use config::{Config, ConsulConfig, DEFAULT_CONSUL_TIMEOUT, DEFAULT_ETCD_TIMEOUT, EtcdConfig};
pub use coordkv_codec as codec;
pub use coordkv_codec::Codec;
pub use error::{BoxError, KVError, KVResult};
pub use record::{Record, Version, WatchCursor};
pub use watch::{WatchHandle, WatchPolicy};

/// One coordination store, seen through the primitives the CAS and watch
/// protocols need.
///
/// Implementations must be safe to share between tasks; all consistency is
/// provided by the store itself, so no client-side locking is expected.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Reads one key. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> KVResult<Option<Record>>;

    /// Writes a key unconditionally.
    async fn put(&self, key: &str, value: &[u8]) -> KVResult<()>;

    /// Writes a key only if its version is still `expected`.
    ///
    /// Must be a single atomic operation on the store. Returns `Ok(false)`
    /// when the version had already moved on.
    async fn compare_and_put(&self, key: &str, value: &[u8], expected: Version)
    -> KVResult<bool>;

    /// Reads every key starting with `prefix`, ordered by key.
    async fn scan(&self, prefix: &str) -> KVResult<Vec<Record>>;

    /// Lists every key starting with `prefix`, ordered by key.
    async fn keys(&self, prefix: &str) -> KVResult<Vec<String>> {
        Ok(self
            .scan(prefix)
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect())
    }

    /// Deletes a key. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> KVResult<()>;

    /// One watch poll of a single key.
    async fn watch_get(
        &self,
        key: &str,
        cursor: WatchCursor,
    ) -> KVResult<(Option<Record>, WatchCursor)> {
        Ok((self.get(key).await?, cursor))
    }

    /// One watch poll of a prefix.
    async fn watch_scan(
        &self,
        prefix: &str,
        cursor: WatchCursor,
    ) -> KVResult<(Vec<Record>, WatchCursor)> {
        Ok((self.scan(prefix).await?, cursor))
    }

    /// Releases backend resources.
    async fn close(&self) -> KVResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({})", self.name())
    }
}
