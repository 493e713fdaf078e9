//! Named search indices.
//!
//! The catalog is a small ordered mapping from a human name to an opaque
//! [`IndexId`]. Two entries are built in; the user config can add or replace
//! entries by name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the built-in entry that is active when no config file exists.
pub const DEFAULT_INDEX_NAME: &str = "default";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("index identifier is empty")]
    EmptyId,

    #[error("index identifier {0:?} contains a NUL byte")]
    ForbiddenChar(String),

    #[error("index identifier {0:?} has leading or trailing whitespace")]
    Whitespace(String),

    #[error("invalid index name {0:?} (use lowercase letters, digits, '-' or '_')")]
    InvalidName(String),

    #[error("index {0:?} is defined more than once")]
    Duplicate(String),

    #[error("unknown index {name:?}{}", suggestion_suffix(.suggestion))]
    Unknown {
        name: String,
        suggestion: Option<String>,
    },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean {s:?}?)"),
        None => String::new(),
    }
}

/// Opaque identifier of a remote search index.
///
/// Usually a UUID, but nothing here depends on that. An environment value
/// cannot hold NUL; surrounding whitespace would not survive a shell round-trip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndexId(String);

impl IndexId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CatalogError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CatalogError::EmptyId);
        }
        if raw.contains('\0') {
            return Err(CatalogError::ForbiddenChar(raw));
        }
        if raw.trim() != raw {
            return Err(CatalogError::Whitespace(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier parses as a UUID (any version).
    pub fn is_uuid(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }
}

impl TryFrom<String> for IndexId {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IndexId> for String {
    fn from(id: IndexId) -> Self {
        id.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub id: IndexId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, id: IndexId) -> Self {
        Self {
            name: name.into(),
            id,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub fn validate_name(name: &str) -> Result<(), CatalogError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CatalogError::InvalidName(name.to_string()))
    }
}

/// Ordered name -> entry mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCatalog {
    entries: BTreeMap<String, IndexEntry>,
}

impl IndexCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The indices every installation knows about.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        let builtins = [
            (
                DEFAULT_INDEX_NAME,
                "aca72165-79ad-4cda-a9ac-b8b503d981a8",
                "primary search index",
            ),
            (
                "papers",
                "3e117028-2513-4f5b-b53c-90fda3cd328b",
                "clipped papers index",
            ),
        ];
        for (name, id, description) in builtins {
            // Literals above are valid; insert_unchecked keeps this infallible.
            catalog.insert_unchecked(IndexEntry {
                name: name.to_string(),
                id: IndexId(id.to_string()),
                description: Some(description.to_string()),
            });
        }
        catalog
    }

    fn insert_unchecked(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Insert or replace an entry. Returns the replaced entry, if any.
    pub fn insert(&mut self, entry: IndexEntry) -> Result<Option<IndexEntry>, CatalogError> {
        validate_name(&entry.name)?;
        if !entry.id.is_uuid() {
            tracing::warn!(name = %entry.name, id = %entry.id, "index identifier is not a UUID");
        }
        Ok(self.entries.insert(entry.name.clone(), entry))
    }

    /// Merge user entries over this catalog. Names must be unique within `entries`.
    pub fn merge(&mut self, entries: Vec<IndexEntry>) -> Result<(), CatalogError> {
        let mut seen = std::collections::BTreeSet::new();
        for entry in entries {
            if !seen.insert(entry.name.clone()) {
                return Err(CatalogError::Duplicate(entry.name));
            }
            if let Some(previous) = self.insert(entry)? {
                tracing::debug!(name = %previous.name, "config entry replaces built-in index");
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name)
    }

    /// Look up by name, suggesting the closest known name on a miss.
    pub fn lookup(&self, name: &str) -> Result<&IndexEntry, CatalogError> {
        self.get(name).ok_or_else(|| CatalogError::Unknown {
            name: name.to_string(),
            suggestion: self.closest_name(name),
        })
    }

    fn closest_name(&self, name: &str) -> Option<String> {
        self.entries
            .keys()
            .map(|k| (strsim::jaro_winkler(name, k), k))
            .filter(|(score, _)| *score >= 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, k)| k.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
