//! Per-document field values for sorting and faceting.
//!
//! Built once per searcher from a fast field and kept in the field-value
//! cache, so sorts and facet counts never touch stored documents.

use std::collections::BTreeMap;

use searchcore_index::{FieldKind, FieldValue, IndexSchema};
use tracing::debug;

use crate::docset::DocSet;
use crate::error::SearchError;

/// Values of one numeric field, indexed by composite document id.
#[derive(Debug)]
pub struct UninvertedField {
    field: String,
    kind: FieldKind,
    values: Vec<Option<i128>>,
}

impl UninvertedField {
    pub fn build(
        reader: &tantivy::Searcher,
        schema: &IndexSchema,
        field: &str,
    ) -> Result<Self, SearchError> {
        let (_, spec) = schema.field(field)?;
        if !spec.fast || !spec.kind.is_numeric() {
            return Err(SearchError::NotFastField(field.to_string()));
        }

        let mut values = Vec::new();
        for segment in reader.segment_readers() {
            let fast_fields = segment.fast_fields();
            match spec.kind {
                FieldKind::U64 => {
                    let column = fast_fields.u64(field)?;
                    values.extend((0..segment.max_doc()).map(|doc| column.first(doc).map(i128::from)));
                }
                FieldKind::I64 => {
                    let column = fast_fields.i64(field)?;
                    values.extend((0..segment.max_doc()).map(|doc| column.first(doc).map(i128::from)));
                }
                FieldKind::Text | FieldKind::String => {
                    return Err(SearchError::NotFastField(field.to_string()));
                }
            }
        }

        debug!(field, docs = values.len(), "Uninverted field");
        Ok(Self {
            field: field.to_string(),
            kind: spec.kind,
            values,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Comparable value; `None` when the document has no value.
    pub fn sort_value(&self, doc: u32) -> Option<i128> {
        self.values.get(doc as usize).copied().flatten()
    }

    pub fn value(&self, doc: u32) -> Option<FieldValue> {
        let raw = self.sort_value(doc)?;
        match self.kind {
            FieldKind::I64 => i64::try_from(raw).ok().map(FieldValue::I64),
            _ => u64::try_from(raw).ok().map(FieldValue::U64),
        }
    }

    /// Count documents in `docs` per distinct value.
    pub fn counts(&self, docs: &DocSet) -> BTreeMap<FieldValue, usize> {
        let mut counts = BTreeMap::new();
        for doc in docs.iter() {
            if let Some(value) = self.value(doc) {
                *counts.entry(value).or_insert(0) += 1;
            }
        }
        counts
    }
}
