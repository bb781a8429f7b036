//! Stored records and their backend version tokens.

use std::fmt;

/// Backend-native consistency token of a record.
///
/// For Consul this is the key's `ModifyIndex`, for etcd its `mod_revision`,
/// for the memory backend a store-wide modify counter. Callers above the
/// backend layer must only carry it around and compare it for equality;
/// the numeric value means nothing outside the backend that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(u64);

impl Version {
    /// The token observed for a key that does not exist.
    ///
    /// A conditional write against `ABSENT` only commits if the key is still
    /// absent.
    pub const ABSENT: Version = Version(0);

    /// Wraps a backend-native token. For backend implementors.
    pub const fn from_raw(raw: u64) -> Self {
        Version(raw)
    }

    /// Returns the backend-native token. For backend implementors.
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            write!(f, "Version(absent)")
        } else {
            write!(f, "Version({})", self.0)
        }
    }
}

/// A key, its raw payload and the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub version: Version,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, version: Version) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version,
        }
    }
}

/// Opaque position handed from one watch poll to the next.
///
/// Backends with blocking reads (Consul) store the last observed store
/// index here so the next read can park until something changes. Polling
/// backends leave it untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchCursor(pub u64);
