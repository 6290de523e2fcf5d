//! Equality filters, ordering and limits over stored documents.
//!
//! Both store backends fetch candidate documents and run them through
//! `Query::apply`, so filtering semantics are identical everywhere.

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::Value;

use super::{Document, StoredDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// `field == value`. Dotted fields (`coordinates.lat`) reach into nested objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        lookup(doc, &self.field) == Some(&self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    order: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(field, value));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter, sort (stable) and truncate.
    pub fn apply(&self, docs: Vec<StoredDocument>) -> Vec<StoredDocument> {
        let mut hits: Vec<StoredDocument> =
            docs.into_iter().filter(|d| self.matches(&d.data)).collect();

        if let Some((field, direction)) = &self.order {
            hits.sort_by(|a, b| {
                let ord = compare_values(lookup(&a.data, field), lookup(&b.data, field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }
        hits
    }
}

fn lookup<'a>(doc: &'a Document, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Missing values sort first. RFC 3339 strings compare as instants,
/// numbers numerically, everything else by its JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(dx), Ok(dy)) => dx.cmp(&dy),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
