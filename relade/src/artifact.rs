//! Artillery result extraction
//!
//! An Artillery result file is a JSON document with an `intermediate` array
//! of time buckets, each holding per-request latency samples. The artifact
//! format changed over Artillery's life: older files carry full
//! `[start, correlation_id, latency_ns, code]` tuples per sample, newer
//! files carry bare nanosecond latencies plus a per-bucket `codes` histogram
//! of `{result code: count}`. Both shapes are extracted here, chosen by a
//! structural probe of each bucket rather than a version flag.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

/// Errors produced by [`parse`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`serde_json::Error`].
    #[error("Failed to deserialize artifact: {0}")]
    Json(#[from] serde_json::Error),
    /// The artifact has no `intermediate` array.
    #[error("Artifact has no intermediate array")]
    MissingIntermediate,
    /// A bucket's timestamp was absent or unreadable.
    #[error("Bucket {index} has an invalid timestamp")]
    BadBucketTimestamp {
        /// Position of the bucket in the `intermediate` array.
        index: usize,
    },
    /// A latency entry did not match either known artifact shape.
    #[error("Bucket {index} has a malformed latency entry")]
    BadLatencyEntry {
        /// Position of the bucket in the `intermediate` array.
        index: usize,
    },
    /// No bucket in the artifact carried a single latency sample.
    #[error("No latency samples found in artifact")]
    NoLatencySamples,
}

/// One load-test request observation. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request start, epoch milliseconds.
    pub start_ms: i64,
    /// Request latency, nanoseconds.
    pub latency_ns: i64,
    /// HTTP result code. `0` means unknown.
    pub result_code: u16,
    /// Correlation id, present only in the tuple artifact shape.
    pub correlation_id: Option<String>,
}

impl Request {
    /// Request end, epoch milliseconds. Sub-millisecond remainder is
    /// truncated toward zero.
    #[must_use]
    pub fn end_ms(&self) -> i64 {
        self.start_ms + self.latency_ns / 1_000_000
    }
}

/// The extracted run: identity, observed time bounds and every request in
/// artifact order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Content hash of the raw artifact bytes, hex encoded. Re-ingesting the
    /// same artifact yields the same id.
    pub run_id: String,
    /// Minimum bucket timestamp over buckets with at least one sample,
    /// epoch milliseconds.
    pub earliest_start_ms: i64,
    /// Maximum request end over all samples, epoch milliseconds.
    pub last_end_ms: i64,
    /// Every request, in artifact order.
    pub requests: Vec<Request>,
}

/// Parse an Artillery result artifact.
///
/// # Errors
///
/// Returns an error if the artifact is not JSON, has no `intermediate`
/// array, carries a malformed bucket, or holds no latency samples at all.
pub fn parse(raw: &[u8]) -> Result<RunReport, Error> {
    let document: Value = serde_json::from_slice(raw)?;
    let buckets = document
        .get("intermediate")
        .and_then(Value::as_array)
        .ok_or(Error::MissingIntermediate)?;

    let run_id = hex_sha256(raw);

    let mut earliest_start_ms = i64::MAX;
    let mut last_end_ms = i64::MIN;
    let mut requests = Vec::new();

    for (index, bucket) in buckets.iter().enumerate() {
        let Some(latencies) = bucket.get("latencies").and_then(Value::as_array) else {
            continue;
        };
        if latencies.is_empty() {
            continue;
        }

        let bucket_start_ms = bucket
            .get("timestamp")
            .and_then(timestamp_ms)
            .ok_or(Error::BadBucketTimestamp { index })?;
        earliest_start_ms = earliest_start_ms.min(bucket_start_ms);

        extract_bucket(bucket, latencies, bucket_start_ms, index, &mut requests)?;
    }

    for request in &requests {
        last_end_ms = last_end_ms.max(request.end_ms());
    }

    if requests.is_empty() {
        return Err(Error::NoLatencySamples);
    }

    info!(
        "Extracted {count} requests from artifact, run id {run_id}",
        count = requests.len()
    );

    Ok(RunReport {
        run_id,
        earliest_start_ms,
        last_end_ms,
        requests,
    })
}

/// Extract one bucket's samples, probing its shape.
///
/// Tuple entries carry their own start time, identity and result code. Bare
/// number entries take the bucket's start time and are assigned a result
/// code from the bucket's `codes` histogram.
fn extract_bucket(
    bucket: &Value,
    latencies: &[Value],
    bucket_start_ms: i64,
    index: usize,
    requests: &mut Vec<Request>,
) -> Result<(), Error> {
    let mut histogram = code_histogram(bucket);

    for entry in latencies {
        let request = match entry {
            Value::Array(tuple) => tuple_request(tuple).ok_or(Error::BadLatencyEntry { index })?,
            Value::Number(_) => {
                let latency_ns = entry
                    .as_i64()
                    .ok_or(Error::BadLatencyEntry { index })?;
                Request {
                    start_ms: bucket_start_ms,
                    latency_ns,
                    result_code: pop_smallest(&mut histogram),
                    correlation_id: None,
                }
            }
            _ => return Err(Error::BadLatencyEntry { index }),
        };
        requests.push(request);
    }

    Ok(())
}

/// Build a `[start_ms, correlation_id, latency_ns, code]` tuple into a
/// request. Returns `None` on any structural mismatch.
fn tuple_request(tuple: &[Value]) -> Option<Request> {
    if tuple.len() != 4 {
        return None;
    }
    let start_ms = number_as_ms(&tuple[0])?;
    let correlation_id = tuple[1].as_str()?.to_string();
    let latency_ns = tuple[2].as_i64()?;
    let result_code = u16::try_from(tuple[3].as_i64()?).ok()?;
    Some(Request {
        start_ms,
        latency_ns,
        result_code,
        correlation_id: Some(correlation_id),
    })
}

/// Read a millisecond count that some artifact writers emit as an integer
/// and others as a float.
#[allow(clippy::cast_possible_truncation)]
fn number_as_ms(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|ms| ms as i64))
}

/// Read a bucket's `codes` histogram, `{result code: count}`. A bucket
/// without one yields an empty histogram, so every sample pops the unknown
/// sentinel.
fn code_histogram(bucket: &Value) -> BTreeMap<u16, u64> {
    let mut histogram = BTreeMap::new();
    if let Some(codes) = bucket.get("codes").and_then(Value::as_object) {
        for (code, count) in codes {
            let (Ok(code), Some(count)) = (code.parse::<u16>(), count.as_u64()) else {
                continue;
            };
            *histogram.entry(code).or_insert(0) += count;
        }
    }
    histogram
}

/// Pop the smallest result code with a remaining count, decrementing it.
/// Returns `0`, the unknown sentinel, once every count is exhausted.
///
/// Raw samples do not individually carry a result code; this assigns each
/// sample, in arrival order, a code from the bucket's histogram. The
/// pairing is derived, not a true 1:1 source linkage.
pub fn pop_smallest(histogram: &mut BTreeMap<u16, u64>) -> u16 {
    let Some((&code, count)) = histogram.iter_mut().find(|(_, count)| **count > 0) else {
        return 0;
    };
    *count -= 1;
    let exhausted = *count == 0;
    if exhausted {
        histogram.remove(&code);
    }
    code
}

/// Read a bucket timestamp: epoch milliseconds as a number, or an ISO-8601
/// string with or without a zone designator.
fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => value.as_i64(),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .ok()
            }),
        _ => None,
    }
}

fn hex_sha256(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{digest:x}", digest = hasher.finalize())
}
