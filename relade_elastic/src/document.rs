//! The bulk-document model
//!
//! A [`BulkDocument`] is one record destined for a single write operation
//! against the cluster: routing (index), identity (id) and payload (body).
//! Documents read back out of a cluster arrive as [`SourceDocument`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// One document bound for the bulk API.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    /// Index the document is routed to.
    pub index: String,
    /// Mapping type. Absent on clusters that removed mapping types.
    pub doc_type: Option<String>,
    /// Document identity. Re-sending the same id overwrites rather than
    /// duplicates.
    pub id: String,
    /// Document payload.
    pub body: Map<String, Value>,
}

/// One document as returned by a search against a source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Index the document came from.
    #[serde(rename = "_index")]
    pub index: String,
    /// The document's own identity in its source cluster.
    #[serde(rename = "_id")]
    pub id: String,
    /// Mapping type, when the source cluster still has them.
    #[serde(rename = "_type", default)]
    pub doc_type: Option<String>,
    /// The `_source` payload.
    #[serde(rename = "_source")]
    pub source: Map<String, Value>,
}

/// Encode a batch of documents into the newline-delimited action/body pairs
/// the `_bulk` endpoint accepts.
///
/// Each document contributes two lines: the action metadata and the body
/// serialized onto a single line. The trailing newline is mandatory per the
/// bulk API.
#[must_use]
pub fn to_bulk_body(documents: &[BulkDocument]) -> String {
    let mut out = String::new();
    for doc in documents {
        let mut action = Map::new();
        action.insert("_index".to_string(), Value::String(doc.index.clone()));
        if let Some(ref doc_type) = doc.doc_type {
            action.insert("_type".to_string(), Value::String(doc_type.clone()));
        }
        action.insert("_id".to_string(), Value::String(doc.id.clone()));
        out.push_str(&json!({ "index": action }).to_string());
        out.push('\n');
        out.push_str(&Value::Object(doc.body.clone()).to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(index: &str, id: &str) -> BulkDocument {
        let mut body = Map::new();
        body.insert("value".to_string(), json!(1));
        BulkDocument {
            index: index.to_string(),
            doc_type: Some("doc".to_string()),
            id: id.to_string(),
            body,
        }
    }

    #[test]
    fn bulk_body_is_action_body_pairs() {
        let body = to_bulk_body(&[doc("artillery-2024.03", "abc")]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let action: Value = serde_json::from_str(lines[0]).expect("action line parses");
        assert_eq!(action["index"]["_index"], "artillery-2024.03");
        assert_eq!(action["index"]["_type"], "doc");
        assert_eq!(action["index"]["_id"], "abc");

        let payload: Value = serde_json::from_str(lines[1]).expect("body line parses");
        assert_eq!(payload["value"], 1);
    }

    #[test]
    fn bulk_body_omits_absent_type() {
        let mut d = doc("idx", "1");
        d.doc_type = None;
        let body = to_bulk_body(&[d]);
        let action: Value =
            serde_json::from_str(body.lines().next().expect("one line")).expect("parses");
        assert!(action["index"].get("_type").is_none());
    }

    #[test]
    fn bulk_body_ends_with_newline() {
        let body = to_bulk_body(&[doc("idx", "1"), doc("idx", "2")]);
        assert!(body.ends_with('\n'));
        assert_eq!(body.lines().count(), 4);
    }

    #[test]
    fn source_document_deserializes_from_hit() {
        let hit = json!({
            "_index": "app-logs-2024.03.15",
            "_type": "doc",
            "_id": "h1",
            "_score": 1.0,
            "_source": { "servertime": "2024-03-15T10:00:00.000", "level": "info" }
        });
        let doc: SourceDocument = serde_json::from_value(hit).expect("hit is well formed");
        assert_eq!(doc.index, "app-logs-2024.03.15");
        assert_eq!(doc.id, "h1");
        assert_eq!(doc.doc_type.as_deref(), Some("doc"));
        assert_eq!(doc.source["level"], "info");
    }

    #[test]
    fn source_document_tolerates_missing_type() {
        let hit = json!({
            "_index": "app-logs",
            "_id": "h1",
            "_source": {}
        });
        let doc: SourceDocument = serde_json::from_value(hit).expect("hit is well formed");
        assert!(doc.doc_type.is_none());
    }
}
