//! Page definitions and their resolved form
//!
//! A page definition is the graph the engine walks: top-level fields, a
//! config record and named slots of components, each with its own config
//! record. Every record entry is either a literal [`Value`] or a
//! [`Reference`] in the `$source` wire format:
//!
//! ```json
//! { "$source": ["context", "urlparams", { "$source": ["http", "data", "foo"], "field": "keys.0" }] }
//! ```

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Key marking a mapping as a reference
pub const SOURCE_KEY: &str = "$source";
/// Key holding the optional dotted projection of a reference
pub const FIELD_KEY: &str = "field";

/// A symbolic value pointing at a registered resolver
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Path segments, possibly computed by nested references
    pub source: Vec<SourceSegment>,
    /// Dotted projection applied to the resolver output
    pub field: Option<String>,
}

/// One element of a reference's `$source`
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSegment {
    /// A plain path segment
    Literal(String),
    /// A segment computed by another reference
    Reference(Box<Reference>),
}

impl Reference {
    /// Create a reference from plain path segments
    pub fn new<I, S>(source: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceSegment>,
    {
        Self {
            source: source.into_iter().map(Into::into).collect(),
            field: None,
        }
    }

    /// Set the dotted projection
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Parse a reference from a mapping carrying `$source`
    pub fn from_mapping(map: &IndexMap<String, Value>) -> Result<Self> {
        let source = match map.get(SOURCE_KEY) {
            Some(Value::Sequence(items)) => items
                .iter()
                .map(SourceSegment::from_value)
                .collect::<Result<Vec<_>>>()?,
            Some(Value::String(single)) => vec![SourceSegment::Literal(single.clone())],
            Some(other) => {
                return Err(Error::parse(format!(
                    "{} must be a sequence of segments, got {}",
                    SOURCE_KEY,
                    other.type_name()
                )))
            }
            None => return Err(Error::parse(format!("missing {}", SOURCE_KEY))),
        };

        let field = match map.get(FIELD_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(field)) => Some(field.clone()),
            Some(other) => {
                return Err(Error::parse(format!(
                    "{} must be a string, got {}",
                    FIELD_KEY,
                    other.type_name()
                )))
            }
        };

        Ok(Self { source, field })
    }

    /// Convert back to the `$source` wire format
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert(
            SOURCE_KEY.to_string(),
            Value::Sequence(
                self.source
                    .iter()
                    .map(|segment| match segment {
                        SourceSegment::Literal(s) => Value::String(s.clone()),
                        SourceSegment::Reference(inner) => inner.to_value(),
                    })
                    .collect(),
            ),
        );
        if let Some(field) = &self.field {
            map.insert(FIELD_KEY.to_string(), Value::String(field.clone()));
        }
        Value::Mapping(map)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.source.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match segment {
                SourceSegment::Literal(s) => write!(f, "{}", s)?,
                SourceSegment::Reference(inner) => write!(f, "{{{}}}", inner)?,
            }
        }
        if let Some(field) = &self.field {
            write!(f, "#{}", field)?;
        }
        Ok(())
    }
}

impl SourceSegment {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Mapping(map) if is_reference_mapping(map) => {
                Ok(SourceSegment::Reference(Box::new(Reference::from_mapping(map)?)))
            }
            other => other.to_segment().map(SourceSegment::Literal).ok_or_else(|| {
                Error::parse(format!(
                    "{} segments must be strings or references, got {}",
                    SOURCE_KEY,
                    other.type_name()
                ))
            }),
        }
    }
}

impl From<&str> for SourceSegment {
    fn from(s: &str) -> Self {
        SourceSegment::Literal(s.to_string())
    }
}

impl From<String> for SourceSegment {
    fn from(s: String) -> Self {
        SourceSegment::Literal(s)
    }
}

impl From<Reference> for SourceSegment {
    fn from(r: Reference) -> Self {
        SourceSegment::Reference(Box::new(r))
    }
}

fn is_reference_mapping(map: &IndexMap<String, Value>) -> bool {
    map.get(SOURCE_KEY).is_some_and(|v| !v.is_null())
}

/// An entry of a page record: already resolved, or still a reference
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Already resolved; copied verbatim
    Literal(Value),
    /// To be resolved through the registry
    Reference(Reference),
}

impl Default for ConfigValue {
    fn default() -> Self {
        ConfigValue::Literal(Value::Null)
    }
}

impl ConfigValue {
    /// Classify a raw value. Only a mapping with a non-null `$source` is a
    /// reference; nested objects inside literals are left untouched.
    pub fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Mapping(map) if is_reference_mapping(map) => {
                Ok(ConfigValue::Reference(Reference::from_mapping(map)?))
            }
            _ => Ok(ConfigValue::Literal(value)),
        }
    }

    /// Whether this entry still needs resolving
    pub fn is_reference(&self) -> bool {
        matches!(self, ConfigValue::Reference(_))
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        ConfigValue::Literal(value)
    }
}

impl From<Reference> for ConfigValue {
    fn from(reference: Reference) -> Self {
        ConfigValue::Reference(reference)
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ConfigValue::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ConfigValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ConfigValue::Literal(value) => value.serialize(serializer),
            ConfigValue::Reference(reference) => reference.to_value().serialize(serializer),
        }
    }
}

/// A record of named config entries
pub type ConfigRecord = IndexMap<String, ConfigValue>;

/// A record of resolved values
pub type ResolvedRecord = IndexMap<String, Value>;

/// The graph resolved for each request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDetails {
    pub template: String,
    #[serde(default)]
    pub language: ConfigValue,
    #[serde(default)]
    pub title: ConfigValue,
    #[serde(default)]
    pub config: ConfigRecord,
    #[serde(default)]
    pub slots: IndexMap<String, Vec<ComponentDetails>>,
}

/// A component placed in a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDetails {
    pub component: String,
    #[serde(default)]
    pub config: ConfigRecord,
}

/// A page with every reference replaced by its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPage {
    pub template: String,
    pub language: Value,
    pub title: Value,
    pub config: ResolvedRecord,
    pub slots: IndexMap<String, Vec<ResolvedComponent>>,
}

/// A component with its config resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    pub component: String,
    pub config: ResolvedRecord,
}

/// A catalog entry as supplied by the pages provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url_pattern: String,
    pub details: PageDetails,
}

/// The set of pages served by one process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageCatalog {
    pages: Vec<Page>,
}

impl PageCatalog {
    /// Create a catalog, rejecting duplicate keys
    pub fn new(pages: Vec<Page>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for page in &pages {
            if !seen.insert(page.key.as_str()) {
                return Err(Error::parse(format!("duplicate page key '{}'", page.key)));
            }
        }
        Ok(Self { pages })
    }

    /// Parse a catalog from a YAML sequence of pages
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let pages: Vec<Page> = serde_yaml::from_str(yaml)?;
        Self::new(pages)
    }

    /// Parse a catalog from a JSON array of pages
    pub fn from_json(json: &str) -> Result<Self> {
        let pages: Vec<Page> = serde_json::from_str(json)?;
        Self::new(pages)
    }

    /// Load a catalog from a file, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("{}: {}", path.display(), e)))?;

        let catalog = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        };
        catalog.map_err(|e| e.with_path(path.display().to_string()))
    }

    /// Find a page by key
    pub fn get(&self, key: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.key == key)
    }

    /// All pages, in catalog order
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
