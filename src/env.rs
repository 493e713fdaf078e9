//! Environment initializer.
//!
//! Applies a [`Selection`] to an environment: the configured variable either
//! holds the active identifier or is absent. An empty value is never written,
//! so "unset" and "set to empty" stay distinguishable.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::selection::Selection;

/// Variable name used when the config does not choose one.
pub const DEFAULT_VARIABLE: &str = "SEARCH_INDEX";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment variable name {0:?} is invalid (use letters, digits and '_', not starting with a digit)")]
    InvalidName(String),

    #[error("environment variable {0:?} is used by the shell or loader; pick another name")]
    Reserved(String),
}

/// Names whose replacement would break the shell or the programs it starts.
const RESERVED_NAMES: &[&str] = &[
    "PATH",
    "HOME",
    "SHELL",
    "USER",
    "LOGNAME",
    "PWD",
    "OLDPWD",
    "IFS",
    "PS1",
    "TERM",
    "TMPDIR",
    "LANG",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
];

/// Names must be portable shell identifiers, since they end up in `eval`ed snippets.
pub fn validate_var_name(name: &str) -> Result<(), EnvError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(EnvError::InvalidName(name.to_string()));
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(EnvError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Something that holds environment variables.
pub trait EnvTarget {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str);
    fn remove(&mut self, name: &str);
}

/// The environment of the running process.
///
/// Mutation goes through `std::env::set_var`, which is only sound while no
/// other thread reads or writes the environment. That precondition is taken
/// on by whoever calls [`ProcessEnv::new`].
#[derive(Debug)]
pub struct ProcessEnv {
    _private: (),
}

impl ProcessEnv {
    /// # Safety
    ///
    /// For as long as the returned value is used, no other thread may read or
    /// modify the process environment. `sidx` applies the selection before it
    /// builds the async runtime.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl EnvTarget for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var_os(name).map(|v| v.to_string_lossy().into_owned())
    }

    fn set(&mut self, name: &str, value: &str) {
        // SAFETY: single-threaded use is a precondition of `ProcessEnv::new`.
        unsafe { std::env::set_var(name, value) }
    }

    fn remove(&mut self, name: &str) {
        // SAFETY: as above.
        unsafe { std::env::remove_var(name) }
    }
}

/// In-memory environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl EnvTarget for EnvSnapshot {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }
}

/// What [`EnvInitializer::apply`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// The variable now holds `value`; `previous` is what it held before.
    Set {
        previous: Option<String>,
        value: String,
    },
    /// The variable was removed.
    Removed { previous: String },
    /// Nothing to do; the variable already had the wanted state.
    Unchanged,
}

/// Sets (or clears) one named variable from a selection.
#[derive(Debug, Clone)]
pub struct EnvInitializer {
    variable: String,
    selection: Selection,
}

impl EnvInitializer {
    pub fn new(variable: impl Into<String>, selection: Selection) -> Result<Self, EnvError> {
        let variable = variable.into();
        validate_var_name(&variable)?;
        Ok(Self {
            variable,
            selection,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn apply(&self, target: &mut impl EnvTarget) -> EnvChange {
        let previous = target.get(&self.variable);
        let change = match (self.selection.entry(), previous) {
            (Some(entry), Some(prev)) if prev == entry.id.as_str() => EnvChange::Unchanged,
            (Some(entry), previous) => {
                target.set(&self.variable, entry.id.as_str());
                EnvChange::Set {
                    previous,
                    value: entry.id.to_string(),
                }
            }
            (None, Some(prev)) => {
                target.remove(&self.variable);
                EnvChange::Removed { previous: prev }
            }
            (None, None) => EnvChange::Unchanged,
        };
        tracing::debug!(variable = %self.variable, ?change, "applied index selection");
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexCatalog, IndexEntry, IndexId};

    fn active(name: &str) -> Selection {
        Selection::Active(IndexCatalog::builtin().get(name).unwrap().clone())
    }

    #[test]
    fn apply_sets_exact_literal() {
        let mut env = EnvSnapshot::new();
        let init = EnvInitializer::new(DEFAULT_VARIABLE, active("default")).unwrap();
        let change = init.apply(&mut env);
        assert_eq!(
            change,
            EnvChange::Set {
                previous: None,
                value: "aca72165-79ad-4cda-a9ac-b8b503d981a8".into()
            }
        );
        assert_eq!(
            env.get(DEFAULT_VARIABLE).as_deref(),
            Some("aca72165-79ad-4cda-a9ac-b8b503d981a8")
        );
    }

    #[test]
    fn apply_is_idempotent() {
        let mut env = EnvSnapshot::new();
        let init = EnvInitializer::new(DEFAULT_VARIABLE, active("papers")).unwrap();
        init.apply(&mut env);
        let first = env.clone();
        assert_eq!(init.apply(&mut env), EnvChange::Unchanged);
        assert_eq!(env, first);
    }

    #[test]
    fn unset_selection_leaves_variable_absent_not_empty() {
        let mut env = EnvSnapshot::new();
        let init = EnvInitializer::new(DEFAULT_VARIABLE, Selection::Unset).unwrap();
        assert_eq!(init.apply(&mut env), EnvChange::Unchanged);
        assert_eq!(env.get(DEFAULT_VARIABLE), None);

        env.set(DEFAULT_VARIABLE, "stale");
        assert_eq!(
            init.apply(&mut env),
            EnvChange::Removed {
                previous: "stale".into()
            }
        );
        assert_eq!(env.get(DEFAULT_VARIABLE), None);
    }

    #[test]
    fn switching_selection_replaces_previous_value() {
        let mut env = EnvSnapshot::new();
        EnvInitializer::new(DEFAULT_VARIABLE, active("default"))
            .unwrap()
            .apply(&mut env);
        let change = EnvInitializer::new(DEFAULT_VARIABLE, active("papers"))
            .unwrap()
            .apply(&mut env);
        assert_eq!(
            change,
            EnvChange::Set {
                previous: Some("aca72165-79ad-4cda-a9ac-b8b503d981a8".into()),
                value: "3e117028-2513-4f5b-b53c-90fda3cd328b".into(),
            }
        );
        assert_eq!(env.iter().count(), 1);
        assert!(env.iter().all(|(_, v)| !v.starts_with("aca72165")));
    }

    #[test]
    fn custom_variable_name_is_used() {
        let mut env = EnvSnapshot::new();
        let entry = IndexEntry::new("x", IndexId::new("token").unwrap());
        EnvInitializer::new("GSEARCH_INDEX", Selection::Active(entry))
            .unwrap()
            .apply(&mut env);
        assert_eq!(env.get("GSEARCH_INDEX").as_deref(), Some("token"));
        assert_eq!(env.get(DEFAULT_VARIABLE), None);
    }

    #[test]
    fn invalid_variable_names_are_rejected() {
        for bad in ["", "A=B", "A\0B", "1ABC", "A B", "$(x)"] {
            let err = EnvInitializer::new(bad, Selection::Unset).unwrap_err();
            assert_eq!(err, EnvError::InvalidName(bad.to_string()));
        }
    }

    #[test]
    fn shell_critical_names_are_rejected() {
        for reserved in ["PATH", "HOME", "Path", "LD_PRELOAD"] {
            assert_eq!(
                validate_var_name(reserved),
                Err(EnvError::Reserved(reserved.to_string()))
            );
        }
        assert_eq!(validate_var_name("SEARCH_INDEX"), Ok(()));
    }
}
