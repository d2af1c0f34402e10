//! Bulk-document construction
//!
//! Every record leaving this program, whether freshly extracted from an
//! artifact or copied out of another cluster, passes through here to become
//! a [`BulkDocument`]: timestamps serialized as fixed-format strings, a
//! rebased companion field alongside each original, caller-supplied extra
//! fields merged last, and an index name resolved from the configured
//! date-pattern suffix.

use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use relade_elastic::{BulkDocument, SourceDocument};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::artifact::Request;

/// Mapping type attached to freshly built artillery documents.
pub const DOC_TYPE: &str = "doc";

/// Default index pattern for the artillery records themselves.
pub const ARTILLERY_INDEX_PATTERN: &str = "artillery-yyyy.mm";

/// Fixed serialization format for every timestamp field, millisecond
/// precision, no zone designator. The target store's date parsing accepts
/// this shape without mapping hints.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Recognized date-pattern suffixes on a configured index name, broadest
/// granularity last so the regex prefers the full `-yyyy.mm.dd` match.
static DATE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-yyyy(\.mm(\.dd)?)?$").expect("Invalid regex pattern provided"));

/// Errors produced when building a document from a copied source document.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configured timestamp field was absent from a source document.
    #[error("Source document {id} has no {field} field")]
    MissingTimestampField {
        /// Source document id.
        id: String,
        /// The configured timestamp field name.
        field: String,
    },
    /// The timestamp field held a value this program cannot read as a time.
    #[error("Source document {id} field {field} is not a readable timestamp: {value}")]
    BadTimestamp {
        /// Source document id.
        id: String,
        /// The configured timestamp field name.
        field: String,
        /// The offending value.
        value: String,
    },
}

/// Format epoch milliseconds as the fixed timestamp string.
///
/// # Panics
///
/// Panics if `ms` lies outside chrono's representable range, roughly
/// ±262,000 years from the epoch.
#[must_use]
pub fn format_timestamp_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .expect("timestamp out of representable range")
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Parse a timestamp value back to epoch milliseconds: the fixed format, an
/// ISO-8601 string with a zone designator, or a raw epoch-millisecond
/// number.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => value.as_i64(),
        Value::String(text) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.timestamp_millis())
                    .ok()
            }),
        _ => None,
    }
}

/// The rebased companion name for a timestamp field: one leading `@` is
/// dropped and the first letter upper-cased behind a `Rebase` prefix, so
/// `@timestamp` becomes `RebaseTimestamp` and `servertime` becomes
/// `RebaseServertime`.
#[must_use]
pub fn rebased_field_name(field: &str) -> String {
    let stripped = field.strip_prefix('@').unwrap_or(field);
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => format!(
            "Rebase{upper}{rest}",
            upper = first.to_uppercase(),
            rest = chars.as_str()
        ),
        None => "Rebase".to_string(),
    }
}

/// Resolve the index a document routes to. A configured name ending in a
/// recognized date-pattern suffix has the suffix replaced by the document's
/// own original timestamp at the matching granularity; any other name is
/// used verbatim.
///
/// # Panics
///
/// Panics if `timestamp_ms` lies outside chrono's representable range.
#[must_use]
pub fn route_index(configured: &str, timestamp_ms: i64) -> String {
    let Some(suffix) = DATE_SUFFIX.find(configured) else {
        return configured.to_string();
    };
    let format = match suffix.as_str().len() {
        5 => "%Y",
        8 => "%Y.%m",
        _ => "%Y.%m.%d",
    };
    let date = DateTime::from_timestamp_millis(timestamp_ms)
        .expect("timestamp out of representable range")
        .format(format);
    format!(
        "{base}-{date}",
        base = &configured[..suffix.start()]
    )
}

/// Build the bulk document for one extracted load-test request.
///
/// Extra fields merge last and override computed fields on name collision.
/// Identity is the request's correlation id when the artifact supplied one,
/// otherwise a content hash of the body, so re-ingesting the same artifact
/// re-produces the same ids.
#[must_use]
pub fn from_request(
    request: &Request,
    run_id: &str,
    offset_ms: i64,
    extra_fields: &[(String, String)],
    target_index: &str,
) -> BulkDocument {
    let mut body = Map::new();
    body.insert(
        "LoadtestID".to_string(),
        Value::String(run_id.to_string()),
    );
    body.insert(
        "@timestamp".to_string(),
        Value::String(format_timestamp_ms(request.start_ms)),
    );
    body.insert(
        "RebaseTimestamp".to_string(),
        Value::String(format_timestamp_ms(request.start_ms + offset_ms)),
    );
    body.insert("LatencyNS".to_string(), Value::from(request.latency_ns));
    body.insert(
        "HttpResult".to_string(),
        Value::from(i64::from(request.result_code)),
    );
    merge_extra_fields(&mut body, extra_fields);

    let id = request
        .correlation_id
        .clone()
        .unwrap_or_else(|| content_hash(&body));

    BulkDocument {
        index: route_index(target_index, request.start_ms),
        doc_type: Some(DOC_TYPE.to_string()),
        id,
        body,
    }
}

/// Build the bulk document for one copied foreign document.
///
/// The original timestamp field is reformatted to the fixed string shape,
/// its rebased companion added next to it, extra fields merged last. The
/// source document's own identity and mapping type are carried over
/// unchanged; without a configured target index the document stays in its
/// source index.
///
/// # Errors
///
/// Returns an error if the configured timestamp field is absent or
/// unreadable.
pub fn from_source(
    source: &SourceDocument,
    timestamp_field: &str,
    offset_ms: i64,
    extra_fields: &[(String, String)],
    target_index: Option<&str>,
) -> Result<BulkDocument, Error> {
    let raw = source
        .source
        .get(timestamp_field)
        .ok_or_else(|| Error::MissingTimestampField {
            id: source.id.clone(),
            field: timestamp_field.to_string(),
        })?;
    let timestamp_ms = parse_timestamp(raw).ok_or_else(|| Error::BadTimestamp {
        id: source.id.clone(),
        field: timestamp_field.to_string(),
        value: raw.to_string(),
    })?;

    let mut body = source.source.clone();
    body.insert(
        timestamp_field.to_string(),
        Value::String(format_timestamp_ms(timestamp_ms)),
    );
    body.insert(
        rebased_field_name(timestamp_field),
        Value::String(format_timestamp_ms(timestamp_ms + offset_ms)),
    );
    merge_extra_fields(&mut body, extra_fields);

    let index = match target_index {
        Some(configured) => route_index(configured, timestamp_ms),
        None => source.index.clone(),
    };

    Ok(BulkDocument {
        index,
        doc_type: source.doc_type.clone(),
        id: source.id.clone(),
        body,
    })
}

/// Merge caller-supplied fields into the body, in caller order, last. On a
/// name collision the extra field wins over the computed one.
fn merge_extra_fields(body: &mut Map<String, Value>, extra_fields: &[(String, String)]) {
    for (name, value) in extra_fields {
        body.insert(name.clone(), Value::String(value.clone()));
    }
}

/// Lowercase hex SHA-256 over the serialized body.
fn content_hash(body: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Value::Object(body.clone()).to_string().as_bytes());
    format!("{digest:x}", digest = hasher.finalize())
}
