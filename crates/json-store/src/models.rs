use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Schema version written into every index document.
pub const INDEX_VERSION: u64 = 1;

pub const INDEX_FILE: &str = "index.json";

pub type Entries<T> = BTreeMap<String, T>;

/// Read the `collection` map out of an index document.
///
/// Documents look like `{"version": 1, "<collection>": {...}, "lastUpdated": "..."}`.
pub fn decode_document<T: DeserializeOwned>(text: &str, collection: &str) -> serde_json::Result<Entries<T>> {
    let mut doc: Value = serde_json::from_str(text)?;
    let entries = match doc.get_mut(collection) {
        Some(v) => v.take(),
        None => Value::Object(Map::new()),
    };
    serde_json::from_value(entries)
}

pub fn encode_document<T: Serialize>(entries: &Entries<T>, collection: &str) -> serde_json::Result<String> {
    let mut doc = Map::new();
    doc.insert("version".into(), Value::from(INDEX_VERSION));
    doc.insert(collection.into(), serde_json::to_value(entries)?);
    doc.insert("lastUpdated".into(), Value::from(now_rfc3339()));
    serde_json::to_string_pretty(&Value::Object(doc))
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}
