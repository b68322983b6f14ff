//! Typed schema and document model.
//!
//! An `IndexSchema` is built from field specs and wraps the Tantivy schema
//! together with field handles. Documents travel as `IndexDocument`, a map
//! from field name to values, in both directions.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use tantivy::schema::{
    Field, FieldType, NumericOptions, Schema, TextOptions, Value, STORED, STRING, TEXT,
};
use tantivy::TantivyDocument;

use crate::error::IndexError;

/// Kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Tokenized full text
    Text,
    /// Untokenized string, matched exactly
    String,
    U64,
    I64,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::U64 | FieldKind::I64)
    }
}

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_true")]
    pub stored: bool,
    /// Columnar storage for sorting and faceting (numeric fields only)
    #[serde(default)]
    pub fast: bool,
}

fn default_true() -> bool {
    true
}

impl FieldSpec {
    /// A stored field; numeric fields are also fast.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stored: true,
            fast: kind.is_numeric(),
        }
    }

    pub fn unstored(mut self) -> Self {
        self.stored = false;
        self
    }
}

/// Serializable schema declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub unique_key: String,
    pub fields: Vec<FieldSpec>,
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    U64(u64),
    I64(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::U64(n) => Some(n),
            FieldValue::I64(n) => u64::try_from(n).ok(),
            FieldValue::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::I64(n) => Some(n),
            FieldValue::U64(n) => i64::try_from(n).ok(),
            FieldValue::Str(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::U64(n) => write!(f, "{n}"),
            FieldValue::I64(n) => write!(f, "{n}"),
            FieldValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::U64(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::I64(n)
    }
}

/// A document: field name to one or more values.
///
/// Serializes every field as an array; accepts either a single value or an
/// array per field when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IndexDocument {
    fields: BTreeMap<String, Vec<FieldValue>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(FieldValue),
    Many(Vec<FieldValue>),
}

impl<'de> Deserialize<'de> for IndexDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
        let fields = raw
            .into_iter()
            .map(|(name, values)| match values {
                OneOrMany::One(value) => (name, vec![value]),
                OneOrMany::Many(values) => (name, values),
            })
            .collect();
        Ok(Self { fields })
    }
}

impl IndexDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style add.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add(field, value);
        self
    }

    pub fn add(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(value.into());
    }

    pub fn get_first(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).and_then(|values| values.first())
    }

    pub fn get_all(&self, field: &str) -> &[FieldValue] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Schema with resolved field handles.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    schema: Schema,
    specs: Vec<(FieldSpec, Field)>,
    by_name: HashMap<String, usize>,
    unique_key: Field,
    unique_key_name: String,
}

/// Collects field specs for an `IndexSchema`.
#[derive(Debug, Clone)]
pub struct IndexSchemaBuilder {
    unique_key: String,
    fields: Vec<FieldSpec>,
}

impl IndexSchemaBuilder {
    pub fn add_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::new(name, kind));
        self
    }

    pub fn add_field_spec(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn build(self) -> Result<IndexSchema, IndexError> {
        IndexSchema::from_spec(&SchemaSpec {
            unique_key: self.unique_key,
            fields: self.fields,
        })
    }
}

impl IndexSchema {
    pub fn builder(unique_key: impl Into<String>) -> IndexSchemaBuilder {
        IndexSchemaBuilder {
            unique_key: unique_key.into(),
            fields: Vec::new(),
        }
    }

    /// Build from a declaration. The unique key must be a stored string field.
    pub fn from_spec(spec: &SchemaSpec) -> Result<Self, IndexError> {
        let mut builder = Schema::builder();
        let mut specs = Vec::with_capacity(spec.fields.len());
        let mut by_name = HashMap::new();

        for field_spec in &spec.fields {
            if by_name.contains_key(&field_spec.name) {
                return Err(IndexError::SchemaMismatch(format!(
                    "duplicate field: {}",
                    field_spec.name
                )));
            }
            let field = match field_spec.kind {
                FieldKind::Text | FieldKind::String => {
                    builder.add_text_field(&field_spec.name, text_options(field_spec))
                }
                FieldKind::U64 => {
                    builder.add_u64_field(&field_spec.name, numeric_options(field_spec))
                }
                FieldKind::I64 => {
                    builder.add_i64_field(&field_spec.name, numeric_options(field_spec))
                }
            };
            by_name.insert(field_spec.name.clone(), specs.len());
            specs.push((field_spec.clone(), field));
        }

        let (key_spec, unique_key) = by_name
            .get(&spec.unique_key)
            .map(|&i| (&specs[i].0, specs[i].1))
            .ok_or_else(|| {
                IndexError::SchemaMismatch(format!(
                    "unique key {} is not a declared field",
                    spec.unique_key
                ))
            })?;
        if key_spec.kind != FieldKind::String || !key_spec.stored {
            return Err(IndexError::SchemaMismatch(format!(
                "unique key {} must be a stored string field",
                spec.unique_key
            )));
        }

        Ok(Self {
            schema: builder.build(),
            specs,
            by_name,
            unique_key,
            unique_key_name: spec.unique_key.clone(),
        })
    }

    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn unique_key(&self) -> Field {
        self.unique_key
    }

    pub fn unique_key_name(&self) -> &str {
        &self.unique_key_name
    }

    /// Resolve a field by name.
    pub fn field(&self, name: &str) -> Result<(Field, &FieldSpec), IndexError> {
        self.by_name
            .get(name)
            .map(|&i| (self.specs[i].1, &self.specs[i].0))
            .ok_or_else(|| IndexError::SchemaMismatch(format!("unknown field: {name}")))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.specs.iter().map(|(spec, _)| spec)
    }

    pub fn to_spec(&self) -> SchemaSpec {
        SchemaSpec {
            unique_key: self.unique_key_name.clone(),
            fields: self.fields().cloned().collect(),
        }
    }

    /// Check that an on-disk schema lines up with this one.
    pub fn check_compatible(&self, existing: &Schema) -> Result<(), IndexError> {
        for (spec, field) in &self.specs {
            let found = existing.get_field(&spec.name).map_err(|_| {
                IndexError::SchemaMismatch(format!("missing {} field", spec.name))
            })?;
            if found != *field {
                return Err(IndexError::SchemaMismatch(format!(
                    "field {} is at a different position",
                    spec.name
                )));
            }
            let kind_matches = matches!(
                (spec.kind, existing.get_field_entry(found).field_type()),
                (FieldKind::Text | FieldKind::String, FieldType::Str(_))
                    | (FieldKind::U64, FieldType::U64(_))
                    | (FieldKind::I64, FieldType::I64(_))
            );
            if !kind_matches {
                return Err(IndexError::SchemaMismatch(format!(
                    "field {} has a different type",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Unique key value of a document.
    pub fn document_id<'a>(&self, doc: &'a IndexDocument) -> Result<&'a str, IndexError> {
        match doc.get_all(&self.unique_key_name) {
            [FieldValue::Str(id)] => Ok(id),
            [] => Err(IndexError::InvalidDocument(format!(
                "missing unique key {}",
                self.unique_key_name
            ))),
            _ => Err(IndexError::InvalidDocument(format!(
                "unique key {} must hold exactly one string",
                self.unique_key_name
            ))),
        }
    }

    /// Convert to a Tantivy document.
    pub fn to_tantivy_doc(&self, doc: &IndexDocument) -> Result<TantivyDocument, IndexError> {
        self.document_id(doc)?;

        let mut out = TantivyDocument::default();
        for (name, values) in &doc.fields {
            let (field, spec) = self
                .field(name)
                .map_err(|_| IndexError::InvalidDocument(format!("unknown field: {name}")))?;
            for value in values {
                match spec.kind {
                    FieldKind::Text | FieldKind::String => {
                        let text = value.as_str().ok_or_else(|| mismatch(name, value))?;
                        out.add_text(field, text);
                    }
                    FieldKind::U64 => {
                        out.add_u64(field, value.as_u64().ok_or_else(|| mismatch(name, value))?)
                    }
                    FieldKind::I64 => {
                        out.add_i64(field, value.as_i64().ok_or_else(|| mismatch(name, value))?)
                    }
                }
            }
        }
        Ok(out)
    }

    /// Convert a stored Tantivy document back, optionally keeping only `only`.
    pub fn to_index_doc(
        &self,
        doc: &TantivyDocument,
        only: Option<&HashSet<String>>,
    ) -> IndexDocument {
        let mut out = IndexDocument::new();
        for (spec, field) in &self.specs {
            if !spec.stored || only.is_some_and(|names| !names.contains(&spec.name)) {
                continue;
            }
            for value in doc.get_all(*field) {
                let converted = match spec.kind {
                    FieldKind::Text | FieldKind::String => {
                        value.as_str().map(|s| FieldValue::Str(s.to_string()))
                    }
                    FieldKind::U64 => value.as_u64().map(FieldValue::U64),
                    FieldKind::I64 => value.as_i64().map(FieldValue::I64),
                };
                if let Some(converted) = converted {
                    out.add(spec.name.clone(), converted);
                }
            }
        }
        out
    }
}

fn text_options(spec: &FieldSpec) -> TextOptions {
    match (spec.kind, spec.stored) {
        (FieldKind::Text, true) => TEXT | STORED,
        (FieldKind::Text, false) => TEXT,
        (_, true) => STRING | STORED,
        (_, false) => STRING,
    }
}

fn numeric_options(spec: &FieldSpec) -> NumericOptions {
    let mut options = NumericOptions::default().set_indexed();
    if spec.stored {
        options = options.set_stored();
    }
    if spec.fast {
        options = options.set_fast();
    }
    options
}

fn mismatch(name: &str, value: &FieldValue) -> IndexError {
    IndexError::InvalidDocument(format!("value {value} does not fit field {name}"))
}
