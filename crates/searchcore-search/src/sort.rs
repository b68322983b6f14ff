//! Sort specifications.

use serde::{Deserialize, Serialize};

/// What to order by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Score,
    /// A fast numeric field
    Field(String),
    IndexOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortField {
    pub key: SortKey,
    pub descending: bool,
}

/// Ordered list of sort keys. Ties always fall back to index order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SortSpec {
    fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new(key: SortKey, descending: bool) -> Self {
        Self {
            fields: vec![SortField { key, descending }],
        }
    }

    /// Highest score first.
    pub fn relevance() -> Self {
        Self {
            fields: vec![SortField {
                key: SortKey::Score,
                descending: true,
            }],
        }
    }

    pub fn index_order() -> Self {
        Self {
            fields: vec![SortField {
                key: SortKey::IndexOrder,
                descending: false,
            }],
        }
    }

    pub fn by_field(field: impl Into<String>, descending: bool) -> Self {
        Self {
            fields: vec![SortField {
                key: SortKey::Field(field.into()),
                descending,
            }],
        }
    }

    /// Add a tie-breaking key.
    pub fn then(mut self, key: SortKey, descending: bool) -> Self {
        self.fields.push(SortField { key, descending });
        self
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn needs_scores(&self) -> bool {
        self.fields.iter().any(|f| f.key == SortKey::Score)
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::relevance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_scores() {
        assert!(SortSpec::relevance().needs_scores());
        assert!(!SortSpec::by_field("price", true).needs_scores());
        assert!(SortSpec::by_field("price", true)
            .then(SortKey::Score, true)
            .needs_scores());
    }
}
