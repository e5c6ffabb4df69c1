//! Cluster metadata: indices, aliases and the ingest pipeline configurations.

use std::fmt::Display;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::pipeline_config::IngestMetadata;
use crate::template::{ComposableIndexTemplate, IndexTemplateMetadata, Template};

/// Uniquely identifies one generation of an index: recreating an index under the same name
/// yields a new uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub uuid: Uuid,
}

impl Display for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}]", self.name, self.uuid)
    }
}

/// The index-level settings that take part in pipeline resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    /// `index.default_pipeline`
    pub default_pipeline: Option<String>,
    /// `index.final_pipeline`
    pub final_pipeline: Option<String>,
}

impl IndexSettings {
    pub fn with_default_pipeline(mut self, id: impl Into<String>) -> Self {
        self.default_pipeline = Some(id.into());
        self
    }

    pub fn with_final_pipeline(mut self, id: impl Into<String>) -> Self {
        self.final_pipeline = Some(id.into());
        self
    }

    /// Overlay `other` on top of these settings; values present in `other` win.
    pub fn merge(&mut self, other: &Self) {
        if other.default_pipeline.is_some() {
            self.default_pipeline.clone_from(&other.default_pipeline);
        }
        if other.final_pipeline.is_some() {
            self.final_pipeline.clone_from(&other.final_pipeline);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index: Index,
    pub settings: IndexSettings,
    pub mapping: Option<Value>,
    /// Bumped on every change to this index's metadata.
    pub version: u64,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            index: Index {
                name: name.into(),
                uuid: Uuid::new_v4(),
            },
            settings: IndexSettings::default(),
            mapping: None,
            version: 1,
        }
    }

    pub fn with_settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_mapping(mut self, mapping: Value) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// A copy of this metadata with the version bumped, as produced by any metadata update.
    pub fn next_version(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.index.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasMetadata {
    pub indices: Vec<String>,
    /// The index that writes through this alias go to. When unset, an alias pointing at a
    /// single index writes to that index.
    pub write_index: Option<String>,
}

/// A snapshot of cluster metadata. Cheap to clone: index metadata is shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub indices: HashMap<String, Arc<IndexMetadata>>,
    pub aliases: HashMap<String, AliasMetadata>,
    /// Legacy (v1) index templates by name.
    pub templates: HashMap<String, IndexTemplateMetadata>,
    /// Composable (v2) index templates by name.
    pub index_templates: HashMap<String, ComposableIndexTemplate>,
    pub component_templates: HashMap<String, Template>,
    pub ingest: Option<IngestMetadata>,
}

impl Metadata {
    pub fn put_index(mut self, index: IndexMetadata) -> Self {
        self.indices
            .insert(index.name().to_string(), Arc::new(index));
        self
    }

    pub fn put_alias(mut self, name: impl Into<String>, alias: AliasMetadata) -> Self {
        self.aliases.insert(name.into(), alias);
        self
    }

    pub fn put_template(mut self, template: IndexTemplateMetadata) -> Self {
        self.templates.insert(template.name.clone(), template);
        self
    }

    pub fn put_index_template(
        mut self,
        name: impl Into<String>,
        template: ComposableIndexTemplate,
    ) -> Self {
        self.index_templates.insert(name.into(), template);
        self
    }

    pub fn put_component_template(mut self, name: impl Into<String>, template: Template) -> Self {
        self.component_templates.insert(name.into(), template);
        self
    }

    pub fn with_ingest(mut self, ingest: IngestMetadata) -> Self {
        self.ingest = Some(ingest);
        self
    }

    /// Direct lookup of a concrete index by name.
    pub fn index(&self, name: &str) -> Option<&Arc<IndexMetadata>> {
        self.indices.get(name)
    }

    /// Resolve `name`, a concrete index or an alias, to the index that writes go to.
    pub fn write_index(&self, name: &str) -> Option<&Arc<IndexMetadata>> {
        if let Some(index) = self.indices.get(name) {
            return Some(index);
        }
        let alias = self.aliases.get(name)?;
        let write_index = match (&alias.write_index, alias.indices.as_slice()) {
            (Some(write_index), _) => write_index,
            (None, [only]) => only,
            (None, _) => return None,
        };
        self.indices.get(write_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_index_through_alias() {
        let metadata = Metadata::default()
            .put_index(IndexMetadata::new("logs-1"))
            .put_index(IndexMetadata::new("logs-2"))
            .put_alias(
                "logs",
                AliasMetadata {
                    indices: vec!["logs-1".to_string(), "logs-2".to_string()],
                    write_index: Some("logs-2".to_string()),
                },
            )
            .put_alias(
                "single",
                AliasMetadata {
                    indices: vec!["logs-1".to_string()],
                    write_index: None,
                },
            )
            .put_alias(
                "ambiguous",
                AliasMetadata {
                    indices: vec!["logs-1".to_string(), "logs-2".to_string()],
                    write_index: None,
                },
            );

        assert_eq!(metadata.write_index("logs-1").unwrap().name(), "logs-1");
        assert_eq!(metadata.write_index("logs").unwrap().name(), "logs-2");
        assert_eq!(metadata.write_index("single").unwrap().name(), "logs-1");
        assert!(metadata.write_index("ambiguous").is_none());
        assert!(metadata.write_index("missing").is_none());
    }

    #[test]
    fn settings_merge_prefers_overlay() {
        let mut base = IndexSettings::default()
            .with_default_pipeline("base-default")
            .with_final_pipeline("base-final");
        base.merge(&IndexSettings::default().with_final_pipeline("overlay-final"));
        assert_eq!(base.default_pipeline.as_deref(), Some("base-default"));
        assert_eq!(base.final_pipeline.as_deref(), Some("overlay-final"));
    }

    #[test]
    fn index_display_includes_uuid() {
        let index = IndexMetadata::new("logs");
        assert_eq!(
            index.index.to_string(),
            format!("[logs/{}]", index.index.uuid)
        );
    }
}
