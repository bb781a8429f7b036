//! Optimistic read-transform-conditional-write.

use coordkv_codec::Codec;
use tracing::trace;

use crate::{Backend, BoxError, KVError, KVResult, Version};

/// Runs one compare-and-swap round on `key`.
///
/// Reads the record, decodes it (a missing key decodes from an empty
/// payload), applies `transform`, encodes the result and writes it only if
/// the version read in the first step is still current. Returns `Ok(false)`
/// when another writer got there first. Read, decode, transform and encode
/// failures are returned as errors and nothing is written.
pub(crate) async fn compare_and_swap<C, F, E>(
    backend: &dyn Backend,
    codec: &C,
    key: &str,
    transform: F,
) -> KVResult<bool>
where
    C: Codec,
    F: FnOnce(C::Value) -> Result<C::Value, E>,
    E: Into<BoxError>,
{
    let current = backend.get(key).await?;
    let (payload, expected) = match &current {
        Some(record) => (record.value.as_slice(), record.version),
        None => (&[][..], Version::ABSENT),
    };

    let input = codec.decode(payload).map_err(KVError::Decode)?;
    let output = transform(input).map_err(|e| KVError::Transform(e.into()))?;
    let encoded = codec.encode(&output).map_err(KVError::Encode)?;

    let committed = backend.compare_and_put(key, &encoded, expected).await?;
    trace!(
        backend = backend.name(),
        key,
        ?expected,
        committed,
        "cas"
    );
    Ok(committed)
}
