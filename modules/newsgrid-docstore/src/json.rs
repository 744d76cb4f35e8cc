//! BSON → JSON conversion for HTTP responses.
//!
//! The driver's extended-JSON rendering wraps dates and object ids in
//! `{"$date": …}` envelopes; API clients expect plain RFC 3339 strings and
//! hex ids, so documents are converted by hand before serialization.

use mongodb::bson::{Bson, Document};
use serde_json::Value;

pub fn doc_to_json(doc: Document) -> Value {
    Value::Object(
        doc.into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect(),
    )
}

pub fn docs_to_json(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(doc_to_json).collect())
}

pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Document(doc) => doc_to_json(doc),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::String(s) => Value::String(s),
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn converts_scalars_and_nesting() {
        let converted = doc_to_json(doc! {
            "post_id": 7_i64,
            "title": "T",
            "score": 1.5,
            "tags": ["a", "b"],
            "stats": { "views": 3_i32 },
        });
        assert_eq!(converted["post_id"], 7);
        assert_eq!(converted["title"], "T");
        assert_eq!(converted["score"], 1.5);
        assert_eq!(converted["tags"][1], "b");
        assert_eq!(converted["stats"]["views"], 3);
    }

    #[test]
    fn dates_become_rfc3339_strings() {
        let dt = mongodb::bson::DateTime::from_millis(1_700_000_000_000);
        let converted = doc_to_json(doc! { "created_at": dt });
        let rendered = converted["created_at"].as_str().unwrap();
        assert!(rendered.starts_with("2023-11-14T"));
    }

    #[test]
    fn nan_double_degrades_to_null() {
        let converted = doc_to_json(doc! { "x": f64::NAN });
        assert_eq!(converted["x"], Value::Null);
    }
}
