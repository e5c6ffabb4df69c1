//! Document write requests as they arrive in a bulk.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    #[default]
    Internal,
    External,
    ExternalGte,
}

/// A request to index a single document.
///
/// The three pipeline fields are filled in by pipeline resolution. Before resolution `pipeline`
/// holds the pipeline explicitly named on the request, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub index: String,
    pub id: Option<String>,
    pub routing: Option<String>,
    pub version: Option<i64>,
    pub version_type: VersionType,
    pub if_seq_no: Option<i64>,
    pub if_primary_term: Option<i64>,
    pub source: Map<String, Value>,
    pub pipeline: Option<String>,
    pub final_pipeline: Option<String>,
    pub index_based_pipeline: Option<String>,
    pub pipeline_resolved: bool,
    /// Identifies the bulk this request was submitted in. Each new request starts with an id of
    /// its own until a bulk stamps it.
    pub bulk_id: Uuid,
}

impl IndexRequest {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: None,
            routing: None,
            version: None,
            version_type: VersionType::default(),
            if_seq_no: None,
            if_primary_term: None,
            source: Map::new(),
            pipeline: None,
            final_pipeline: None,
            index_based_pipeline: None,
            pipeline_resolved: false,
            bulk_id: Uuid::new_v4(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    /// Set the document source. Anything other than a JSON object yields an empty source.
    pub fn with_source(mut self, source: Value) -> Self {
        self.source = match source {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    /// Name a pipeline explicitly; it overrides the index's default pipeline.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub index: String,
    pub id: String,
    pub doc: Option<IndexRequest>,
    pub upsert: Option<IndexRequest>,
    pub doc_as_upsert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub index: String,
    pub id: String,
}

/// One item of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocWriteRequest {
    Index(IndexRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

impl DocWriteRequest {
    /// The index this item was addressed to.
    pub fn index(&self) -> &str {
        match self {
            Self::Index(r) => &r.index,
            Self::Update(r) => &r.index,
            Self::Delete(r) => &r.index,
        }
    }

    /// The index request that pipelines apply to for this item, if any.
    ///
    /// Updates are run through pipelines via the document that may get indexed: the partial
    /// doc when it doubles as the upsert, otherwise the upsert document.
    pub fn index_write_request(&self) -> Option<&IndexRequest> {
        match self {
            Self::Index(r) => Some(r),
            Self::Update(r) if r.doc_as_upsert => r.doc.as_ref(),
            Self::Update(r) => r.upsert.as_ref(),
            Self::Delete(_) => None,
        }
    }

    pub fn index_write_request_mut(&mut self) -> Option<&mut IndexRequest> {
        match self {
            Self::Index(r) => Some(r),
            Self::Update(r) => {
                if r.doc_as_upsert {
                    r.doc.as_mut()
                } else {
                    r.upsert.as_mut()
                }
            }
            Self::Delete(_) => None,
        }
    }
}

impl From<IndexRequest> for DocWriteRequest {
    fn from(request: IndexRequest) -> Self {
        Self::Index(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requests_do_not_share_a_bulk_id() {
        let a = IndexRequest::new("logs");
        let b = IndexRequest::new("logs");
        assert_ne!(a.bulk_id, b.bulk_id);
        assert!(!a.bulk_id.is_nil());
    }

    #[test]
    fn index_write_request_of_each_kind() {
        let index = DocWriteRequest::from(IndexRequest::new("a"));
        assert_eq!(index.index_write_request().map(|r| r.index.as_str()), Some("a"));

        let mut update = UpdateRequest {
            index: "alias".to_string(),
            id: "1".to_string(),
            doc: Some(IndexRequest::new("doc")),
            upsert: Some(IndexRequest::new("upsert")),
            doc_as_upsert: false,
        };
        let request = DocWriteRequest::Update(update.clone());
        assert_eq!(request.index(), "alias");
        assert_eq!(
            request.index_write_request().map(|r| r.index.as_str()),
            Some("upsert")
        );

        update.doc_as_upsert = true;
        let request = DocWriteRequest::Update(update);
        assert_eq!(
            request.index_write_request().map(|r| r.index.as_str()),
            Some("doc")
        );

        let delete = DocWriteRequest::Delete(DeleteRequest {
            index: "a".to_string(),
            id: "1".to_string(),
        });
        assert!(delete.index_write_request().is_none());
    }

    #[test]
    fn non_object_source_is_empty() {
        let request = IndexRequest::new("a").with_source(serde_json::json!([1, 2]));
        assert!(request.source.is_empty());
    }
}
