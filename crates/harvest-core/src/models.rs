use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A discovered top-level catalog item, keyed by its slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// URL-safe unique identifier (e.g., "printful")
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of sub-records the listing advertises for this entity, if shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
}

impl Entity {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: None,
            record_count: None,
        }
    }

    pub fn with_record_count(mut self, count: u64) -> Self {
        self.record_count = Some(count);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single field value on a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Empty,
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    /// Render the value as a CSV cell. `Empty` becomes the empty string.
    pub fn as_cell(&self) -> String {
        match self {
            FieldValue::Empty => String::new(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Empty)
    }
}

/// A sub-record collected for an entity (e.g., one review).
///
/// Serialized flat: the owning slug sits next to the extracted fields,
/// `{"entity": "printful", "rating": 5, "body": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Key holding the owning slug. No extracted field may use it.
    pub const ENTITY_KEY: &'static str = "entity";

    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Owned snapshot of a rendered page.
///
/// The pipeline only ever holds this copy; nothing references live
/// renderer memory across an await point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPage {
    /// Final URL after navigation (used to resolve relative links).
    pub url: String,
    pub html: String,
}

impl RenderedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// Which extraction tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The configured item selectors matched.
    Primary,
    /// Primary selectors matched nothing; heuristic link scraping was used.
    Fallback,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Primary => write!(f, "primary"),
            Strategy::Fallback => write!(f, "fallback"),
        }
    }
}

/// Extraction output tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction<T> {
    pub value: T,
    pub strategy: Strategy,
}

impl<T> Extraction<T> {
    pub fn primary(value: T) -> Self {
        Self {
            value,
            strategy: Strategy::Primary,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            strategy: Strategy::Fallback,
        }
    }
}

/// Where a total-record count was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    /// Machine-readable field (e.g., `itemprop="reviewCount"`).
    Structured,
    /// Parsed out of a human-readable heading.
    Heading,
}

impl fmt::Display for CountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountSource::Structured => write!(f, "structured"),
            CountSource::Heading => write!(f, "heading"),
        }
    }
}

/// Authoritative total-record count for an entity's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountHint {
    pub total: u64,
    pub source: CountSource,
}

impl CountHint {
    pub fn structured(total: u64) -> Self {
        Self {
            total,
            source: CountSource::Structured,
        }
    }

    pub fn heading(total: u64) -> Self {
        Self {
            total,
            source: CountSource::Heading,
        }
    }
}
