//! Hashable query descriptions.
//!
//! `Query` is a plain value: it can be compared, hashed, ordered and used as a
//! cache key. It is converted to a Tantivy query only when executed.
//!
//! Negation is structural: a boolean query with only prohibited clauses is a
//! negative query. `absolute` splits any query into its positive form and a
//! negation flag so caches only ever hold positive sets.

use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use tantivy::query::{
    AllQuery, BooleanQuery, Occur, PhraseQuery, Query as TantivyQuery, RangeQuery, TermQuery,
};
use tantivy::schema::IndexRecordOption;
use tantivy::Term;

use crate::error::IndexError;
use crate::schema::{FieldKind, FieldValue, IndexSchema};

/// One end of a range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeBound {
    Unbounded,
    Included(FieldValue),
    Excluded(FieldValue),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    /// Every live document
    MatchAll,
    Term {
        field: String,
        value: FieldValue,
    },
    Phrase {
        field: String,
        terms: Vec<String>,
    },
    Range {
        field: String,
        lower: RangeBound,
        upper: RangeBound,
    },
    Boolean {
        #[serde(default)]
        must: Vec<Query>,
        #[serde(default)]
        should: Vec<Query>,
        #[serde(default)]
        must_not: Vec<Query>,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn phrase<S: Into<String>>(field: impl Into<String>, terms: impl IntoIterator<Item = S>) -> Self {
        Query::Phrase {
            field: field.into(),
            terms: terms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, lower: RangeBound, upper: RangeBound) -> Self {
        Query::Range {
            field: field.into(),
            lower,
            upper,
        }
    }

    /// All clauses required.
    pub fn and(clauses: Vec<Query>) -> Self {
        Query::Boolean {
            must: clauses,
            should: Vec::new(),
            must_not: Vec::new(),
        }
    }

    /// At least one clause required.
    pub fn or(clauses: Vec<Query>) -> Self {
        Query::Boolean {
            must: Vec::new(),
            should: clauses,
            must_not: Vec::new(),
        }
    }

    /// True for a boolean query that only prohibits.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Query::Boolean { must, should, must_not }
                if must.is_empty() && should.is_empty() && !must_not.is_empty()
        )
    }

    /// The logical complement. Negating a negative query yields its positive form.
    pub fn negate(self) -> Query {
        if self.is_negative() {
            return self.absolute().0;
        }
        Query::Boolean {
            must: Vec::new(),
            should: Vec::new(),
            must_not: vec![self],
        }
    }

    /// Split into (positive form, negated).
    ///
    /// A negative query's positive form is the union of its prohibited clauses.
    pub fn absolute(&self) -> (Query, bool) {
        match self {
            Query::Boolean { must_not, .. } if self.is_negative() => {
                let positive = if must_not.len() == 1 {
                    must_not[0].clone()
                } else {
                    Query::or(must_not.clone())
                };
                (positive, true)
            }
            _ => (self.clone(), false),
        }
    }

    /// Build the executable Tantivy query.
    pub fn to_tantivy(&self, schema: &IndexSchema) -> Result<Box<dyn TantivyQuery>, IndexError> {
        match self {
            Query::MatchAll => Ok(Box::new(AllQuery)),
            Query::Term { field, value } => {
                let (term, kind) = term_for(schema, field, value)?;
                let record = if kind == FieldKind::Text {
                    IndexRecordOption::WithFreqs
                } else {
                    IndexRecordOption::Basic
                };
                Ok(Box::new(TermQuery::new(term, record)))
            }
            Query::Phrase { field, terms } => {
                let (tantivy_field, spec) = schema.field(field)?;
                if spec.kind != FieldKind::Text {
                    return Err(IndexError::InvalidQuery(format!(
                        "phrase query on non-text field {field}"
                    )));
                }
                let mut terms: Vec<Term> = terms
                    .iter()
                    .map(|t| Term::from_field_text(tantivy_field, &t.to_lowercase()))
                    .collect();
                match terms.len() {
                    0 => Err(IndexError::InvalidQuery(format!(
                        "empty phrase on field {field}"
                    ))),
                    1 => Ok(Box::new(TermQuery::new(
                        terms.remove(0),
                        IndexRecordOption::WithFreqs,
                    ))),
                    _ => Ok(Box::new(PhraseQuery::new(terms))),
                }
            }
            Query::Range { field, lower, upper } => {
                let lower = bound_for(schema, field, lower)?;
                let upper = bound_for(schema, field, upper)?;
                Ok(Box::new(RangeQuery::new(lower, upper)))
            }
            Query::Boolean {
                must,
                should,
                must_not,
            } => {
                let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
                for q in must {
                    clauses.push((Occur::Must, q.to_tantivy(schema)?));
                }
                for q in should {
                    clauses.push((Occur::Should, q.to_tantivy(schema)?));
                }
                if self.is_negative() {
                    clauses.push((Occur::Must, Box::new(AllQuery)));
                }
                for q in must_not {
                    clauses.push((Occur::MustNot, q.to_tantivy(schema)?));
                }
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
        }
    }
}

fn term_for(
    schema: &IndexSchema,
    field: &str,
    value: &FieldValue,
) -> Result<(Term, FieldKind), IndexError> {
    let (tantivy_field, spec) = schema.field(field)?;
    let invalid = || IndexError::InvalidQuery(format!("value {value} does not fit field {field}"));
    let term = match spec.kind {
        FieldKind::Text => {
            Term::from_field_text(tantivy_field, &value.as_str().ok_or_else(invalid)?.to_lowercase())
        }
        FieldKind::String => Term::from_field_text(tantivy_field, value.as_str().ok_or_else(invalid)?),
        FieldKind::U64 => Term::from_field_u64(tantivy_field, value.as_u64().ok_or_else(invalid)?),
        FieldKind::I64 => Term::from_field_i64(tantivy_field, value.as_i64().ok_or_else(invalid)?),
    };
    Ok((term, spec.kind))
}

fn bound_for(
    schema: &IndexSchema,
    field: &str,
    bound: &RangeBound,
) -> Result<Bound<Term>, IndexError> {
    Ok(match bound {
        RangeBound::Unbounded => Bound::Unbounded,
        RangeBound::Included(v) => Bound::Included(term_for(schema, field, v)?.0),
        RangeBound::Excluded(v) => Bound::Excluded(term_for(schema, field, v)?.0),
    })
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::MatchAll => write!(f, "*:*"),
            Query::Term { field, value } => write!(f, "{field}:{value}"),
            Query::Phrase { field, terms } => write!(f, "{field}:\"{}\"", terms.join(" ")),
            Query::Range { field, lower, upper } => {
                let (open, low) = match lower {
                    RangeBound::Unbounded => ('[', "*".to_string()),
                    RangeBound::Included(v) => ('[', v.to_string()),
                    RangeBound::Excluded(v) => ('{', v.to_string()),
                };
                let (close, high) = match upper {
                    RangeBound::Unbounded => (']', "*".to_string()),
                    RangeBound::Included(v) => (']', v.to_string()),
                    RangeBound::Excluded(v) => ('}', v.to_string()),
                };
                write!(f, "{field}:{open}{low} TO {high}{close}")
            }
            Query::Boolean {
                must,
                should,
                must_not,
            } => {
                let parts: Vec<String> = must
                    .iter()
                    .map(|q| format!("+{q}"))
                    .chain(should.iter().map(|q| q.to_string()))
                    .chain(must_not.iter().map(|q| format!("-{q}")))
                    .collect();
                write!(f, "({})", parts.join(" "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use pretty_assertions::assert_eq;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(q: &Query) -> u64 {
        let mut hasher = DefaultHasher::new();
        q.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_negate_round_trip() {
        let q = Query::term("category", "books");
        let negated = q.clone().negate();
        assert!(negated.is_negative());
        assert_eq!(negated.clone().negate(), q);
    }

    #[test]
    fn test_absolute_of_positive_and_negative() {
        let q = Query::term("category", "books");
        assert_eq!(q.absolute(), (q.clone(), false));

        let negated = q.clone().negate();
        assert_eq!(negated.absolute(), (q.clone(), true));
        assert_eq!(hash_of(&negated.absolute().0), hash_of(&q));
    }

    #[test]
    fn test_absolute_of_multi_clause_negation_is_union() {
        let a = Query::term("category", "a");
        let b = Query::term("category", "b");
        let negative = Query::Boolean {
            must: vec![],
            should: vec![],
            must_not: vec![a.clone(), b.clone()],
        };
        assert_eq!(negative.absolute(), (Query::or(vec![a, b]), true));
    }

    #[test]
    fn test_mixed_boolean_is_positive() {
        let q = Query::Boolean {
            must: vec![Query::MatchAll],
            should: vec![],
            must_not: vec![Query::term("category", "a")],
        };
        assert!(!q.is_negative());
        assert!(!q.absolute().1);
    }

    #[test]
    fn test_to_tantivy_validates_fields() {
        let schema = IndexSchema::builder("id")
            .add_field("id", FieldKind::String)
            .add_field("title", FieldKind::Text)
            .add_field("price", FieldKind::U64)
            .build()
            .unwrap();

        assert!(Query::term("title", "hello").to_tantivy(&schema).is_ok());
        assert!(Query::term("price", 10u64).to_tantivy(&schema).is_ok());
        assert!(Query::term("price", "ten").to_tantivy(&schema).is_err());
        assert!(Query::term("nope", "x").to_tantivy(&schema).is_err());
        assert!(Query::phrase("title", Vec::<String>::new())
            .to_tantivy(&schema)
            .is_err());
        assert!(Query::phrase("price", ["a", "b"]).to_tantivy(&schema).is_err());
        assert!(Query::term("title", "x").negate().to_tantivy(&schema).is_ok());
    }

    #[test]
    fn test_display() {
        let q = Query::and(vec![
            Query::term("title", "rust"),
            Query::range(
                "price",
                RangeBound::Included(FieldValue::U64(1)),
                RangeBound::Unbounded,
            ),
        ]);
        assert_eq!(q.to_string(), "(+title:rust +price:[1 TO *])");
    }

    #[test]
    fn test_query_json() {
        let q: Query =
            serde_json::from_str(r#"{"type": "term", "field": "id", "value": "7"}"#).unwrap();
        assert_eq!(q, Query::term("id", "7"));
    }
}
