//! Column classification produced by the rule-based classifier.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Semantic role of a column inside its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    /// Keys and short labels that name a row.
    Identifier,
    /// Free text.
    Description,
    Attribute,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Description => "description",
            Self::Attribute => "attribute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identifier" => Some(Self::Identifier),
            "description" => Some(Self::Description),
            "attribute" => Some(Self::Attribute),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnClassification {
    pub role: ColumnRole,
    /// Same-table columns linked by a semantic relation rule.
    pub related_columns: BTreeSet<String>,
}

/// Classification of every column of one table, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableClassification {
    pub columns: BTreeMap<String, ColumnClassification>,
}

impl TableClassification {
    pub fn get(&self, column: &str) -> Option<&ColumnClassification> {
        self.columns.get(column)
    }

    pub fn role(&self, column: &str) -> Option<ColumnRole> {
        self.columns.get(column).map(|c| c.role)
    }

    pub fn related(&self, column: &str) -> impl Iterator<Item = &str> {
        self.columns
            .get(column)
            .into_iter()
            .flat_map(|c| c.related_columns.iter().map(String::as_str))
    }

    /// Number of directed relation entries (each symmetric pair counts twice).
    pub fn relation_count(&self) -> usize {
        self.columns.values().map(|c| c.related_columns.len()).sum()
    }
}
