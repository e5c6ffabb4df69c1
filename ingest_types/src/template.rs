//! Index templates, consulted when a request targets an index that does not exist yet.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metadata::{IndexSettings, Metadata};
use crate::pattern::simple_match;

/// A legacy (v1) index template. All matching v1 templates apply, highest `order` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexTemplateMetadata {
    pub name: String,
    pub order: i32,
    pub patterns: Vec<String>,
    pub settings: IndexSettings,
    pub mappings: Option<Value>,
}

impl IndexTemplateMetadata {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            order: 0,
            patterns,
            settings: IndexSettings::default(),
            mappings: None,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_mappings(mut self, mappings: Value) -> Self {
        self.mappings = Some(mappings);
        self
    }
}

/// Settings and mappings carried by a component template or inlined in a composable template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub settings: IndexSettings,
    pub mappings: Option<Value>,
}

/// A composable (v2) index template. At most one applies to a new index: the matching one with
/// the highest priority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposableIndexTemplate {
    pub patterns: Vec<String>,
    pub priority: Option<i64>,
    pub template: Option<Template>,
    /// Component templates, applied in order before `template`.
    pub composed_of: Vec<String>,
}

fn matches_any(patterns: &[String], index: &str) -> bool {
    patterns.iter().any(|p| simple_match(p, index))
}

impl Metadata {
    /// Name of the composable template that would apply to a new index called `index`.
    ///
    /// Ties on priority are broken by template name so the choice is stable.
    pub fn find_v2_template(&self, index: &str) -> Option<&str> {
        self.index_templates
            .iter()
            .filter(|(_, t)| matches_any(&t.patterns, index))
            .min_by(|(a_name, a), (b_name, b)| {
                b.priority
                    .unwrap_or(0)
                    .cmp(&a.priority.unwrap_or(0))
                    .then_with(|| a_name.cmp(b_name))
            })
            .map(|(name, _)| name.as_str())
    }

    /// All legacy templates matching `index`, highest order first.
    pub fn find_v1_templates(&self, index: &str) -> Vec<&IndexTemplateMetadata> {
        let mut templates: Vec<_> = self
            .templates
            .values()
            .filter(|t| matches_any(&t.patterns, index))
            .collect();
        templates.sort_by(|a, b| b.order.cmp(&a.order).then_with(|| a.name.cmp(&b.name)));
        templates
    }

    /// The settings a composable template resolves to: its component templates in order,
    /// overlaid by its own inline template.
    pub fn resolve_settings(&self, template_name: &str) -> IndexSettings {
        let mut settings = IndexSettings::default();
        let Some(template) = self.index_templates.get(template_name) else {
            return settings;
        };
        for component in &template.composed_of {
            if let Some(component) = self.component_templates.get(component) {
                settings.merge(&component.settings);
            }
        }
        if let Some(inline) = &template.template {
            settings.merge(&inline.settings);
        }
        settings
    }

    /// The mappings a composable template contributes, in application order.
    pub fn collect_mappings(&self, template_name: &str) -> Vec<Value> {
        let Some(template) = self.index_templates.get(template_name) else {
            return vec![];
        };
        template
            .composed_of
            .iter()
            .filter_map(|c| self.component_templates.get(c))
            .chain(template.template.as_ref())
            .filter_map(|t| t.mappings.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v2(patterns: &[&str], priority: Option<i64>) -> ComposableIndexTemplate {
        ComposableIndexTemplate {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority,
            ..Default::default()
        }
    }

    #[test]
    fn highest_priority_v2_template_wins() {
        let metadata = Metadata::default()
            .put_index_template("low", v2(&["logs-*"], Some(1)))
            .put_index_template("high", v2(&["logs-*"], Some(10)))
            .put_index_template("other", v2(&["metrics-*"], Some(100)));

        assert_eq!(metadata.find_v2_template("logs-1"), Some("high"));
        assert_eq!(metadata.find_v2_template("metrics-1"), Some("other"));
        assert_eq!(metadata.find_v2_template("traces-1"), None);
    }

    #[test]
    fn v1_templates_ordered_by_order_desc() {
        let metadata = Metadata::default()
            .put_template(IndexTemplateMetadata::new("a", vec!["*".to_string()]).with_order(1))
            .put_template(IndexTemplateMetadata::new("b", vec!["logs*".to_string()]).with_order(5))
            .put_template(IndexTemplateMetadata::new("c", vec!["metrics*".to_string()]));

        let names: Vec<_> = metadata
            .find_v1_templates("logs")
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn composed_settings_and_mappings() {
        let metadata = Metadata::default()
            .put_component_template(
                "base",
                Template {
                    settings: IndexSettings::default()
                        .with_default_pipeline("component-default")
                        .with_final_pipeline("component-final"),
                    mappings: Some(json!({"properties": {"a": {"type": "keyword"}}})),
                },
            )
            .put_index_template(
                "logs",
                ComposableIndexTemplate {
                    patterns: vec!["logs-*".to_string()],
                    priority: None,
                    template: Some(Template {
                        settings: IndexSettings::default().with_default_pipeline("inline"),
                        mappings: Some(json!({"properties": {"b": {"type": "long"}}})),
                    }),
                    composed_of: vec!["base".to_string(), "missing".to_string()],
                },
            );

        let settings = metadata.resolve_settings("logs");
        assert_eq!(settings.default_pipeline.as_deref(), Some("inline"));
        assert_eq!(settings.final_pipeline.as_deref(), Some("component-final"));

        let mappings = metadata.collect_mappings("logs");
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0]["properties"]["a"]["type"], "keyword");
        assert_eq!(mappings[1]["properties"]["b"]["type"], "long");

        assert!(metadata.collect_mappings("unknown").is_empty());
        assert_eq!(metadata.resolve_settings("unknown"), IndexSettings::default());
    }
}
