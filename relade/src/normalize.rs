//! Batch-wide numeric field unification
//!
//! Heterogeneous source documents disagree about numbers: the same field
//! arrives as `5` in one document, `"5"` in another and `"5.2"` in a third.
//! The target store infers a field's mapping from the first batch it sees,
//! so a field that flips between integer and float across batches breaks
//! later writes. Before a batch is sent, every field path that is numeric
//! everywhere and decimal somewhere is rewritten to a true decimal in all
//! its occurrences.

use once_cell::sync::Lazy;
use regex::Regex;
use relade_elastic::BulkDocument;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tracing::debug;

static INTEGER_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+$").expect("Invalid regex pattern provided"));
static DECIMAL_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+\.\d+$").expect("Invalid regex pattern provided"));

/// Errors produced by [`unify_numeric_fields`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A value that passed numeric classification failed to parse into a
    /// representable decimal. Internal consistency defect, not a user
    /// error.
    #[error("Field {path} value {value} classified numeric but failed to parse")]
    Unparseable {
        /// Field path of the offending occurrence.
        path: String,
        /// The offending value.
        value: String,
    },
}

#[derive(Debug, Default)]
struct FieldClass {
    number_like: bool,
    decimal_somewhere: bool,
}

/// Rewrite every occurrence of number-like, decimal-somewhere field paths
/// across the whole batch to true decimals. Integer-looking text gains a
/// trailing `.0` before parsing, so `"5"` becomes `5.0` not `5`. Field
/// paths with any non-numeric occurrence are left untouched.
///
/// # Errors
///
/// Returns an error if a classified value fails to parse, which indicates a
/// defect in the classification itself.
pub fn unify_numeric_fields(documents: &mut [BulkDocument]) -> Result<(), Error> {
    let mut classes: FxHashMap<String, FieldClass> = FxHashMap::default();
    for document in &*documents {
        classify_map("", &document.body, &mut classes);
    }

    let targets: FxHashSet<String> = classes
        .into_iter()
        .filter(|(_, class)| class.number_like && class.decimal_somewhere)
        .map(|(path, _)| path)
        .collect();
    if targets.is_empty() {
        return Ok(());
    }
    debug!("Unifying {count} numeric field paths", count = targets.len());

    for document in &mut *documents {
        rewrite_map("", &mut document.body, &targets)?;
    }
    Ok(())
}

fn classify_map(prefix: &str, map: &Map<String, Value>, classes: &mut FxHashMap<String, FieldClass>) {
    for (key, value) in map {
        let path = join_path(prefix, key);
        classify_value(&path, value, classes);
    }
}

fn classify_value(path: &str, value: &Value, classes: &mut FxHashMap<String, FieldClass>) {
    match value {
        Value::Object(map) => classify_map(path, map, classes),
        // Array elements share the parent path.
        Value::Array(items) => {
            for item in items {
                classify_value(path, item, classes);
            }
        }
        leaf => {
            let class = classes.entry(path.to_string()).or_insert(FieldClass {
                number_like: true,
                decimal_somewhere: false,
            });
            match leaf {
                Value::Number(number) => {
                    class.decimal_somewhere |= number.is_f64();
                }
                Value::String(text) => {
                    if DECIMAL_TEXT.is_match(text) {
                        class.decimal_somewhere = true;
                    } else if !INTEGER_TEXT.is_match(text) {
                        class.number_like = false;
                    }
                }
                _ => class.number_like = false,
            }
        }
    }
}

fn rewrite_map(
    prefix: &str,
    map: &mut Map<String, Value>,
    targets: &FxHashSet<String>,
) -> Result<(), Error> {
    for (key, value) in &mut *map {
        let path = join_path(prefix, key);
        rewrite_value(&path, value, targets)?;
    }
    Ok(())
}

fn rewrite_value(path: &str, value: &mut Value, targets: &FxHashSet<String>) -> Result<(), Error> {
    match value {
        Value::Object(map) => rewrite_map(path, map, targets)?,
        Value::Array(items) => {
            for item in items {
                rewrite_value(path, item, targets)?;
            }
        }
        leaf => {
            if targets.contains(path) {
                *leaf = to_decimal(path, leaf)?;
            }
        }
    }
    Ok(())
}

/// Convert one classified occurrence to a true decimal value.
fn to_decimal(path: &str, value: &Value) -> Result<Value, Error> {
    let text = match value {
        Value::Number(number) => {
            if number.is_f64() {
                return Ok(value.clone());
            }
            format!("{number}.0")
        }
        Value::String(text) if INTEGER_TEXT.is_match(text) => format!("{text}.0"),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let parsed: f64 = text.parse().map_err(|_| Error::Unparseable {
        path: path.to_string(),
        value: text.clone(),
    })?;
    serde_json::Number::from_f64(parsed)
        .map(Value::Number)
        .ok_or(Error::Unparseable {
            path: path.to_string(),
            value: text,
        })
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn batch(values: &[Value]) -> Vec<BulkDocument> {
        values
            .iter()
            .map(|value| {
                let mut body = Map::new();
                body.insert("x".to_string(), value.clone());
                BulkDocument {
                    index: "idx".to_string(),
                    doc_type: None,
                    id: "1".to_string(),
                    body,
                }
            })
            .collect()
    }

    #[test]
    fn mixed_integer_and_decimal_text_unifies() {
        let mut documents = batch(&[json!("5"), json!("5.2"), json!("7")]);
        unify_numeric_fields(&mut documents).expect("batch normalizes");

        let values: Vec<&Value> = documents.iter().map(|d| &d.body["x"]).collect();
        assert_eq!(values[0].as_f64(), Some(5.0));
        assert_eq!(values[1].as_f64(), Some(5.2));
        assert_eq!(values[2].as_f64(), Some(7.0));
        assert!(values.iter().all(|v| v.is_f64()));
    }

    #[test]
    fn non_numeric_occurrence_protects_the_field() {
        let mut documents = batch(&[json!("5"), json!("abc")]);
        unify_numeric_fields(&mut documents).expect("batch normalizes");
        assert_eq!(documents[0].body["x"], "5");
        assert_eq!(documents[1].body["x"], "abc");
    }

    #[test]
    fn all_integer_field_is_left_alone() {
        let mut documents = batch(&[json!("5"), json!(7)]);
        unify_numeric_fields(&mut documents).expect("batch normalizes");
        assert_eq!(documents[0].body["x"], "5");
        assert_eq!(documents[1].body["x"], 7);
    }

    #[test]
    fn native_float_forces_string_integers_decimal() {
        let mut documents = batch(&[json!(5), json!(5.2), json!("7")]);
        unify_numeric_fields(&mut documents).expect("batch normalizes");
        assert!(documents.iter().all(|d| d.body["x"].is_f64()));
        assert_eq!(documents[2].body["x"].as_f64(), Some(7.0));
    }

    #[test]
    fn nested_paths_classify_independently() {
        let mut documents = vec![
            BulkDocument {
                index: "idx".to_string(),
                doc_type: None,
                id: "1".to_string(),
                body: json!({
                    "outer": { "a": "5", "b": "5" },
                    "list": ["1.5", "2"]
                })
                .as_object()
                .expect("literal is an object")
                .clone(),
            },
            BulkDocument {
                index: "idx".to_string(),
                doc_type: None,
                id: "2".to_string(),
                body: json!({
                    "outer": { "a": "2.5", "b": "6" }
                })
                .as_object()
                .expect("literal is an object")
                .clone(),
            },
        ];
        unify_numeric_fields(&mut documents).expect("batch normalizes");

        // outer.a saw a decimal, outer.b never did.
        assert_eq!(documents[0].body["outer"]["a"].as_f64(), Some(5.0));
        assert_eq!(documents[1].body["outer"]["a"].as_f64(), Some(2.5));
        assert_eq!(documents[0].body["outer"]["b"], "5");
        assert_eq!(documents[1].body["outer"]["b"], "6");

        // Array elements share the parent path, so one decimal element
        // rewrites its integer sibling.
        assert_eq!(documents[0].body["list"][0].as_f64(), Some(1.5));
        assert_eq!(documents[0].body["list"][1].as_f64(), Some(2.0));
    }

    #[test]
    fn unrepresentable_decimal_is_a_loud_defect() {
        let huge = "9".repeat(400);
        let mut documents = batch(&[json!(huge), json!("1.5")]);
        let err = unify_numeric_fields(&mut documents).expect_err("overflows f64");
        assert!(matches!(err, Error::Unparseable { .. }));
    }
}
