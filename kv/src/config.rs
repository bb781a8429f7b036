//! Backend selection and per-backend settings.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consul::ConsulBackend;
use crate::etcd::EtcdBackend;
use crate::memory::MemoryBackend;
use crate::{Backend, KVResult};

/// Default Consul request timeout.
pub const DEFAULT_CONSUL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default etcd request timeout.
pub const DEFAULT_ETCD_TIMEOUT: Duration = Duration::from_secs(5);

/// Which coordination store to talk to, and how.
///
/// Deserializes from a tagged map, e.g. in YAML:
///
/// ```yaml
/// backend: etcd
/// endpoints: ["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
/// timeout: 3s
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum Config {
    Consul(ConsulConfig),
    Etcd(EtcdConfig),
    Memory,
}

impl Config {
    pub fn consul(addr: impl Into<String>) -> Self {
        Config::Consul(ConsulConfig::new(addr))
    }

    pub fn etcd<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Config::Etcd(EtcdConfig::new(endpoints))
    }

    pub fn memory() -> Self {
        Config::Memory
    }

    /// Resolves the configuration into a concrete backend.
    pub(crate) fn into_backend(self) -> KVResult<Arc<dyn Backend>> {
        Ok(match self {
            Config::Consul(cfg) => Arc::new(ConsulBackend::new(cfg)?),
            Config::Etcd(cfg) => Arc::new(EtcdBackend::new(cfg)?),
            Config::Memory => Arc::new(MemoryBackend::new()),
        })
    }
}

/// Consul agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Agent address, `host:port` or a full URL.
    pub addr: String,

    /// URL scheme used when `addr` has none.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Per-request timeout.
    #[serde(default = "default_consul_timeout", with = "duration")]
    pub timeout: Duration,

    /// Maximum time a watch read may block waiting for a change.
    ///
    /// When unset, watches poll with plain reads.
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub wait: Option<Duration>,

    #[serde(skip)]
    pub http_client: Option<reqwest::Client>,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_consul_timeout() -> Duration {
    DEFAULT_CONSUL_TIMEOUT
}

impl ConsulConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            scheme: default_scheme(),
            timeout: DEFAULT_CONSUL_TIMEOUT,
            wait: None,
            http_client: None,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables blocking queries for watches.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Uses a caller-built HTTP client instead of building one.
    ///
    /// The client's own timeout settings win over `timeout`.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}

/// etcd cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// Client URLs, e.g. `http://127.0.0.1:2379`.
    pub endpoints: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_etcd_timeout", with = "duration")]
    pub timeout: Duration,

    #[serde(skip)]
    pub http_client: Option<reqwest::Client>,
}

fn default_etcd_timeout() -> Duration {
    DEFAULT_ETCD_TIMEOUT
}

impl EtcdConfig {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_ETCD_TIMEOUT,
            http_client: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses a caller-built HTTP client instead of building one.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}

/// Serde helpers for durations written as `"250ms"`, `"5s"`, `"1m30s"` or
/// integer milliseconds.
pub(crate) mod duration {
    use std::fmt;
    use std::time::Duration;

    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> de::Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string (e.g. '250ms', '1m30s') or milliseconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).map_err(de::Error::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            if v < 0 {
                return Err(de::Error::custom("negative duration"));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(v))
        }
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            d: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] Duration);

            Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
        }
    }

    /// Formats a duration the way Consul expects (`"1500ms"`, `"5s"`).
    pub fn format_duration(d: Duration) -> String {
        if d.subsec_nanos() == 0 {
            format!("{}s", d.as_secs())
        } else {
            format!("{}ms", d.as_millis())
        }
    }

    /// Parses `"1h30m"`, `"250ms"`, `"45s"`. A bare number is seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Duration::ZERO);
        }

        let mut total_ms: u64 = 0;
        let mut num = String::new();
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            if c.is_ascii_digit() {
                num.push(c);
                continue;
            }
            let n: u64 = num
                .parse()
                .map_err(|_| format!("invalid number in duration: {}", s))?;
            num.clear();

            let unit_ms = match c {
                'h' => 3_600_000,
                'm' if chars.peek() == Some(&'s') => {
                    chars.next();
                    1
                }
                'm' => 60_000,
                's' => 1_000,
                _ => return Err(format!("invalid duration unit '{}' in: {}", c, s)),
            };
            total_ms = n
                .checked_mul(unit_ms)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| format!("duration overflows: {}", s))?;
        }

        if !num.is_empty() {
            let n: u64 = num
                .parse()
                .map_err(|_| format!("invalid number in duration: {}", s))?;
            total_ms = n
                .checked_mul(1_000)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| format!("duration overflows: {}", s))?;
        }

        Ok(Duration::from_millis(total_ms))
    }
}
