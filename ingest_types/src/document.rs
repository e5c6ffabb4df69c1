//! The mutable document that ingest processors operate on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::request::{IndexRequest, VersionType};

/// A document being run through ingest pipelines.
///
/// Holds a copy of the routing metadata of the originating [`IndexRequest`] alongside its
/// source. Processors may change any of it, including the target index. After a successful
/// pipeline run the document is written back with [`IngestDocument::apply_to`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestDocument {
    pub index: String,
    pub id: Option<String>,
    pub routing: Option<String>,
    pub version: Option<i64>,
    pub version_type: VersionType,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
    pub source: Map<String, Value>,
    /// Transient metadata visible to processors only, never written back to the request.
    pub ingest_metadata: Map<String, Value>,
}

impl IngestDocument {
    pub fn new(index: impl Into<String>, source: Map<String, Value>) -> Self {
        Self {
            index: index.into(),
            id: None,
            routing: None,
            version: None,
            version_type: VersionType::default(),
            if_seq_no: None,
            if_primary_term: None,
            source,
            ingest_metadata: Map::new(),
        }
    }

    pub fn from_request(request: &IndexRequest) -> Self {
        Self {
            index: request.index.clone(),
            id: request.id.clone(),
            routing: request.routing.clone(),
            version: request.version,
            version_type: request.version_type,
            if_seq_no: request.if_seq_no,
            if_primary_term: request.if_primary_term,
            source: request.source.clone(),
            ingest_metadata: Map::new(),
        }
    }

    /// Write the document's metadata and source back into `request`.
    ///
    /// The sequence number and primary term are only written when the document has them.
    pub fn apply_to(self, request: &mut IndexRequest) {
        request.index = self.index;
        request.id = self.id;
        request.routing = self.routing;
        request.version = self.version;
        request.version_type = self.version_type;
        if self.if_seq_no.is_some() {
            request.if_seq_no = self.if_seq_no;
        }
        if self.if_primary_term.is_some() {
            request.if_primary_term = self.if_primary_term;
        }
        request.source = self.source;
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.source.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.source.insert(name.into(), value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.source.remove(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.source.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_request_metadata() {
        let mut request = IndexRequest::new("logs")
            .with_id("1")
            .with_routing("r1")
            .with_source(json!({"message": "hello"}));
        request.if_seq_no = Some(3);

        let mut document = IngestDocument::from_request(&request);
        assert_eq!(document.index, "logs");
        assert_eq!(document.field("message"), Some(&json!("hello")));

        document.index = "logs-rerouted".to_string();
        document.set_field("level", json!("info"));
        document.if_seq_no = None;
        document
            .ingest_metadata
            .insert("scratch".to_string(), json!(true));
        document.apply_to(&mut request);

        assert_eq!(request.index, "logs-rerouted");
        assert_eq!(request.id.as_deref(), Some("1"));
        assert_eq!(request.routing.as_deref(), Some("r1"));
        assert_eq!(request.if_seq_no, Some(3));
        assert_eq!(request.source.get("level"), Some(&json!("info")));
        assert!(!request.source.contains_key("scratch"));
    }
}
