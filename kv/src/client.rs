//! The backend-agnostic KV facade.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use coordkv_codec::Codec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cas;
use crate::watch::{self, Stop, Target, WatchHandle, WatchPolicy};
use crate::{Backend, BoxError, Config, KVError, KVResult};

/// Uniform KV client bound to one backend and one codec.
///
/// Cloning is cheap and clones share the backend, the codec and the open /
/// closed state. Every method is one or more network round trips; nothing
/// is cached and nothing is retried.
///
/// # Example
///
/// ```rust,no_run
/// use coordkv::{Config, Kv};
/// use coordkv::codec::StringCodec;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> coordkv::KVResult<()> {
/// let kv = Kv::new(Config::consul("127.0.0.1:8500"), StringCodec)?;
///
/// kv.put("svc/api/leader", &"node-1".to_string()).await?;
/// assert_eq!(kv.get("svc/api/leader").await?.as_deref(), Some("node-1"));
///
/// let cancel = CancellationToken::new();
/// kv.watch_prefix(&cancel, "svc/", |key, value| {
///     println!("{key} = {value}");
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct Kv<C: Codec> {
    inner: Arc<Inner<C>>,
    policy: WatchPolicy,
}

struct Inner<C> {
    backend: Arc<dyn Backend>,
    codec: C,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<C: Codec> Kv<C> {
    /// Creates a client for the configured backend.
    ///
    /// Fails with [`KVError::Config`] if the configuration is unusable. No
    /// request is made until the first operation.
    pub fn new(config: Config, codec: C) -> KVResult<Self> {
        let backend = config.into_backend()?;
        Ok(Self::from_backend(backend, codec))
    }

    /// Creates a client over an existing backend.
    pub fn from_backend(backend: Arc<dyn Backend>, codec: C) -> Self {
        debug!(backend = backend.name(), codec = codec.name(), "kv created");
        Self {
            inner: Arc::new(Inner {
                backend,
                codec,
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
            policy: WatchPolicy::default(),
        }
    }

    /// Sets the poll pacing for watches started from this handle.
    pub fn with_watch_policy(mut self, policy: WatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn watch_policy(&self) -> &WatchPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> KVResult<()> {
        if self.is_closed() {
            return Err(KVError::Closed);
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> KVResult<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(KVError::InvalidKey("key must be non-empty".to_string()));
        }
        Ok(())
    }

    /// Encodes `value` and writes it unconditionally.
    pub async fn put(&self, key: &str, value: &C::Value) -> KVResult<()> {
        self.check_key(key)?;
        let payload = self.inner.codec.encode(value).map_err(KVError::Encode)?;
        self.inner.backend.put(key, &payload).await
    }

    /// Writes an already-encoded payload unconditionally.
    pub async fn put_raw(&self, key: &str, payload: &[u8]) -> KVResult<()> {
        self.check_key(key)?;
        self.inner.backend.put(key, payload).await
    }

    /// Reads and decodes a key. A missing key is `Ok(None)`, not an error.
    pub async fn get(&self, key: &str) -> KVResult<Option<C::Value>> {
        self.check_key(key)?;
        match self.inner.backend.get(key).await? {
            Some(record) => self
                .inner
                .codec
                .decode(&record.value)
                .map(Some)
                .map_err(KVError::Decode),
            None => Ok(None),
        }
    }

    /// Reads a key's payload without decoding it.
    pub async fn get_raw(&self, key: &str) -> KVResult<Option<Vec<u8>>> {
        self.check_key(key)?;
        Ok(self.inner.backend.get(key).await?.map(|r| r.value))
    }

    /// Lists the keys starting with `prefix`; the empty prefix lists every
    /// key. No match is an empty vector.
    pub async fn list(&self, prefix: &str) -> KVResult<Vec<String>> {
        self.ensure_open()?;
        self.inner.backend.keys(prefix).await
    }

    /// Deletes a key. Deleting a missing key succeeds.
    pub async fn delete(&self, key: &str) -> KVResult<()> {
        self.check_key(key)?;
        self.inner.backend.delete(key).await
    }

    /// Compare-and-swap: replaces the value of `key` with
    /// `transform(current)` if nobody wrote the key in between.
    ///
    /// A missing key is passed to `transform` as the codec's zero value.
    /// Returns `Ok(false)` when another writer won the race; call again to
    /// retry. A failing `transform` is returned as [`KVError::Transform`]
    /// and nothing is written.
    pub async fn cas<F, E>(&self, key: &str, transform: F) -> KVResult<bool>
    where
        F: FnOnce(C::Value) -> Result<C::Value, E> + Send,
        E: Into<BoxError>,
    {
        self.check_key(key)?;
        cas::compare_and_swap(&*self.inner.backend, &self.inner.codec, key, transform).await
    }

    /// Delivers the current value of `key` on every poll until `cancel`
    /// fires or the client is closed.
    ///
    /// Values are delivered even when unchanged; a missing key delivers
    /// nothing. The loop waits for `on_value` to return before polling
    /// again. Read and decode failures are logged and retried.
    pub async fn watch_key<F>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        mut on_value: F,
    ) -> KVResult<()>
    where
        F: FnMut(C::Value) + Send,
    {
        self.check_key(key)?;
        watch::run(
            &*self.inner.backend,
            &self.inner.codec,
            &self.policy,
            self.stop(cancel),
            Target::Key(key),
            |_, value| on_value(value),
        )
        .await
    }

    /// Delivers `(key, value)` for every key under `prefix` on every poll
    /// until `cancel` fires or the client is closed.
    pub async fn watch_prefix<F>(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
        on_entry: F,
    ) -> KVResult<()>
    where
        F: FnMut(&str, C::Value) + Send,
    {
        self.ensure_open()?;
        watch::run(
            &*self.inner.backend,
            &self.inner.codec,
            &self.policy,
            self.stop(cancel),
            Target::Prefix(prefix),
            on_entry,
        )
        .await
    }

    /// Runs [`watch_key`](Self::watch_key) on a new task.
    pub fn spawn_watch_key<F>(&self, key: impl Into<String>, on_value: F) -> WatchHandle
    where
        F: FnMut(C::Value) + Send + 'static,
    {
        let kv = self.clone();
        let key = key.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { kv.watch_key(&token, &key, on_value).await });
        WatchHandle::new(cancel, task)
    }

    /// Runs [`watch_prefix`](Self::watch_prefix) on a new task.
    pub fn spawn_watch_prefix<F>(&self, prefix: impl Into<String>, on_entry: F) -> WatchHandle
    where
        F: FnMut(&str, C::Value) + Send + 'static,
    {
        let kv = self.clone();
        let prefix = prefix.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { kv.watch_prefix(&token, &prefix, on_entry).await });
        WatchHandle::new(cancel, task)
    }

    /// Closes the client: running watches stop, later calls fail with
    /// [`KVError::Closed`], and the backend is released. Idempotent.
    pub async fn close(&self) -> KVResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        debug!(backend = self.inner.backend.name(), "kv closed");
        self.inner.backend.close().await
    }

    fn stop<'a>(&'a self, caller: &'a CancellationToken) -> Stop<'a> {
        Stop {
            caller,
            shutdown: &self.inner.shutdown,
        }
    }
}

impl<C: Codec> Clone for Kv<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy: self.policy,
        }
    }
}

impl<C: Codec> fmt::Debug for Kv<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kv")
            .field("backend", &self.inner.backend.name())
            .field("codec", &self.inner.codec.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
