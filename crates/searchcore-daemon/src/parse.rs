//! Command-line query and sort syntax.
//!
//! Queries are whitespace separated clauses, all required:
//! - `*:*` matches everything
//! - `field:value` is a term; numeric fields parse the value as a number
//! - `field:"some words"` is a phrase
//! - `field:[lo TO hi]` is an inclusive range, `{..}` exclusive, `*` open
//! - a leading `-` prohibits the clause, a leading `+` is accepted and ignored
//!
//! Anything starting with `{` is read as a JSON `Query` instead.

use anyhow::{anyhow, bail, Context, Result};
use searchcore_index::{FieldKind, FieldValue, IndexSchema, Query, RangeBound};
use searchcore_search::{SortKey, SortSpec};

pub fn parse_query(input: &str, schema: &IndexSchema) -> Result<Query> {
    let input = input.trim();
    if input.starts_with('{') {
        return serde_json::from_str(input).context("Invalid JSON query");
    }

    let mut must = Vec::new();
    let mut must_not = Vec::new();
    for token in tokenize(input)? {
        let (negated, clause) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token.strip_prefix('+').unwrap_or(&token)),
        };
        let query = parse_clause(clause, schema)?;
        if negated {
            must_not.push(query);
        } else {
            must.push(query);
        }
    }

    match (must.len(), must_not.len()) {
        (0, 0) => bail!("Empty query"),
        (1, 0) => Ok(must.remove(0)),
        _ => Ok(Query::Boolean {
            must,
            should: Vec::new(),
            must_not,
        }),
    }
}

/// Split on whitespace outside brackets and quotes.
fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut closer: Option<char> = None;

    for c in input.chars() {
        match closer {
            Some(end) => {
                current.push(c);
                if c == end {
                    closer = None;
                }
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => {
                closer = match c {
                    '[' | '{' => Some(if c == '[' { ']' } else { '}' }),
                    '"' => Some('"'),
                    _ => None,
                };
                current.push(c);
            }
        }
    }
    if let Some(end) = closer {
        bail!("Unterminated clause, expected '{end}'");
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_clause(clause: &str, schema: &IndexSchema) -> Result<Query> {
    if clause == "*:*" || clause == "*" {
        return Ok(Query::MatchAll);
    }
    let (field, raw) = clause
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected field:value, got '{clause}'"))?;
    let (_, spec) = schema.field(field)?;
    let kind = spec.kind;

    if let Some(inner) = raw.strip_prefix('"') {
        let words = inner
            .strip_suffix('"')
            .ok_or_else(|| anyhow!("Unterminated phrase in '{clause}'"))?;
        return Ok(Query::phrase(field, words.split_whitespace()));
    }

    if raw.starts_with('[') || raw.starts_with('{') {
        let lower_inclusive = raw.starts_with('[');
        let upper_inclusive = raw.ends_with(']');
        if !upper_inclusive && !raw.ends_with('}') {
            bail!("Unterminated range in '{clause}'");
        }
        let inner = &raw[1..raw.len() - 1];
        let (low, high) = inner
            .split_once(" TO ")
            .ok_or_else(|| anyhow!("Expected [lo TO hi], got '{raw}'"))?;
        let lower = bound(kind, low.trim(), lower_inclusive)?;
        let upper = bound(kind, high.trim(), upper_inclusive)?;
        return Ok(Query::range(field, lower, upper));
    }

    Ok(Query::term(field, typed_value(kind, raw)?))
}

fn bound(kind: FieldKind, raw: &str, inclusive: bool) -> Result<RangeBound> {
    if raw == "*" {
        return Ok(RangeBound::Unbounded);
    }
    let value = typed_value(kind, raw)?;
    Ok(if inclusive {
        RangeBound::Included(value)
    } else {
        RangeBound::Excluded(value)
    })
}

fn typed_value(kind: FieldKind, raw: &str) -> Result<FieldValue> {
    Ok(match kind {
        FieldKind::U64 => FieldValue::U64(raw.parse().with_context(|| format!("'{raw}' is not a u64"))?),
        FieldKind::I64 => FieldValue::I64(raw.parse().with_context(|| format!("'{raw}' is not an i64"))?),
        FieldKind::Text | FieldKind::String => FieldValue::Str(raw.to_string()),
    })
}

/// Split a shell line into words. Single quotes group words and are removed.
pub fn split_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        bail!("Unterminated single quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Parse `score`, `index`, or `field:asc|desc`, comma separated.
pub fn parse_sort(input: &str) -> Result<SortSpec> {
    let mut spec: Option<SortSpec> = None;
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, direction) = part.split_once(':').unwrap_or((part, ""));
        let (key, default_descending) = match name {
            "score" => (SortKey::Score, true),
            "index" => (SortKey::IndexOrder, false),
            field => (SortKey::Field(field.to_string()), false),
        };
        let descending = match direction {
            "" => default_descending,
            "asc" => false,
            "desc" => true,
            other => bail!("Unknown sort direction '{other}'"),
        };
        spec = Some(match spec {
            None => SortSpec::new(key, descending),
            Some(spec) => spec.then(key, descending),
        });
    }
    spec.ok_or_else(|| anyhow!("Empty sort"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema() -> IndexSchema {
        IndexSchema::builder("id")
            .add_field("id", FieldKind::String)
            .add_field("body", FieldKind::Text)
            .add_field("price", FieldKind::U64)
            .add_field("year", FieldKind::I64)
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_term() {
        let q = parse_query("body:rust", &schema()).unwrap();
        assert_eq!(q, Query::term("body", "rust"));
    }

    #[test]
    fn test_numeric_term_is_typed() {
        let q = parse_query("price:42", &schema()).unwrap();
        assert_eq!(q, Query::term("price", 42u64));
        assert!(parse_query("price:cheap", &schema()).is_err());
    }

    #[test]
    fn test_negative_only_query() {
        let q = parse_query("-body:rust", &schema()).unwrap();
        assert!(q.is_negative());
        assert_eq!(q.absolute(), (Query::term("body", "rust"), true));
    }

    #[test]
    fn test_range_with_open_end() {
        let q = parse_query("year:[2000 TO *]", &schema()).unwrap();
        assert_eq!(
            q,
            Query::range(
                "year",
                RangeBound::Included(FieldValue::I64(2000)),
                RangeBound::Unbounded
            )
        );
        let q = parse_query("price:{1 TO 10}", &schema()).unwrap();
        assert_eq!(
            q,
            Query::range(
                "price",
                RangeBound::Excluded(FieldValue::U64(1)),
                RangeBound::Excluded(FieldValue::U64(10))
            )
        );
    }

    #[test]
    fn test_mixed_clauses_and_phrase() {
        let q = parse_query("*:* body:\"fast search\" -price:3", &schema()).unwrap();
        assert_eq!(
            q,
            Query::Boolean {
                must: vec![Query::MatchAll, Query::phrase("body", ["fast", "search"])],
                should: Vec::new(),
                must_not: vec![Query::term("price", 3u64)],
            }
        );
    }

    #[test]
    fn test_json_query() {
        let q = parse_query(r#"{"type": "match_all"}"#, &schema()).unwrap();
        assert_eq!(q, Query::MatchAll);
    }

    #[test]
    fn test_errors() {
        assert!(parse_query("", &schema()).is_err());
        assert!(parse_query("nofield", &schema()).is_err());
        assert!(parse_query("missing:1", &schema()).is_err());
        assert!(parse_query("year:[1 TO 2", &schema()).is_err());
    }

    #[test]
    fn test_split_line() {
        assert_eq!(
            split_line(r#"search 'body:"a b" -price:3' --rows 5"#).unwrap(),
            vec!["search", r#"body:"a b" -price:3"#, "--rows", "5"]
        );
        assert_eq!(split_line("add '{\"id\": \"1\"}'").unwrap(), vec!["add", r#"{"id": "1"}"#]);
        assert!(split_line("   ").unwrap().is_empty());
        assert!(split_line("search 'oops").is_err());
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort("score").unwrap(), SortSpec::relevance());
        assert_eq!(parse_sort("index").unwrap(), SortSpec::index_order());
        assert_eq!(
            parse_sort("price:desc, score").unwrap(),
            SortSpec::by_field("price", true).then(SortKey::Score, true)
        );
        assert!(parse_sort("price:sideways").is_err());
        assert!(parse_sort("").is_err());
    }
}
