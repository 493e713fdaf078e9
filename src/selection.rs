//! Choosing the single active index.
//!
//! Precedence, highest first:
//! 1. an explicit request (`--index NAME` or `SIDX_INDEX`), where `none`
//!    forces the variable to be unset and an empty request counts as none
//!    given;
//! 2. `active = "NAME"` in the config file; a config file without `active`
//!    means nothing is selected;
//! 3. with no config file at all, the built-in `default` entry.

use crate::catalog::{CatalogError, DEFAULT_INDEX_NAME, IndexCatalog, IndexEntry};

/// Request keyword that selects nothing.
pub const NONE_KEYWORD: &str = "none";

/// The active index, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Active(IndexEntry),
    Unset,
}

impl Selection {
    pub fn entry(&self) -> Option<&IndexEntry> {
        match self {
            Selection::Active(entry) => Some(entry),
            Selection::Unset => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Selection::Active(_))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.entry().is_some_and(|e| e.name == name)
    }
}

/// What the config file says about the active index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfiguredActive {
    /// No config file was found.
    #[default]
    NoConfigFile,
    /// A config file exists but selects nothing.
    Unset,
    Named(String),
}

/// Where a resolved selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Request,
    ConfigFile,
    Builtin,
}

impl std::fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::ConfigFile => write!(f, "config"),
            Self::Builtin => write!(f, "builtin"),
        }
    }
}

pub fn resolve(
    catalog: &IndexCatalog,
    requested: Option<&str>,
    configured: &ConfiguredActive,
) -> Result<(Selection, SelectionSource), CatalogError> {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());
    let (name, source) = match (requested, configured) {
        (Some(name), _) => (Some(name), SelectionSource::Request),
        (None, ConfiguredActive::Named(name)) => (Some(name.as_str()), SelectionSource::ConfigFile),
        (None, ConfiguredActive::Unset) => (None, SelectionSource::ConfigFile),
        (None, ConfiguredActive::NoConfigFile) => {
            (Some(DEFAULT_INDEX_NAME), SelectionSource::Builtin)
        }
    };

    let selection = match name {
        None => Selection::Unset,
        Some(n) if n.eq_ignore_ascii_case(NONE_KEYWORD) => Selection::Unset,
        Some(n) => Selection::Active(catalog.lookup(n)?.clone()),
    };

    tracing::debug!(
        %source,
        index = selection.entry().map(|e| e.name.as_str()).unwrap_or(NONE_KEYWORD),
        "resolved index selection"
    );
    Ok((selection, source))
}
