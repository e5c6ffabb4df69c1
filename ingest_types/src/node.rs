//! Node identity and the ingest capabilities a node reports.

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoveryNode {
    pub id: String,
    pub name: String,
}

impl DiscoveryNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl Display for DiscoveryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}{{{}}}", self.name, self.id)
    }
}

/// The processor types installed on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestInfo {
    pub processors: BTreeSet<String>,
}

impl IngestInfo {
    pub fn new<I, S>(processors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            processors: processors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains_processor(&self, processor_type: &str) -> bool {
        self.processors.contains(processor_type)
    }
}
