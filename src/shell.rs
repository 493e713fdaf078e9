//! Shell snippets that apply a selection to the calling shell.
//!
//! A child process cannot change its parent's environment, so `sidx env`
//! prints a snippet for the shell to evaluate:
//!
//! ```text
//! eval "$(sidx env)"                 # sh, bash, zsh
//! sidx env --shell fish | source     # fish
//! sidx env --shell powershell | Invoke-Expression
//! ```

use std::fmt::Write as _;

use clap::ValueEnum;

use crate::selection::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// sh, bash, zsh and friends
    #[value(aliases = ["sh", "bash", "zsh"])]
    Posix,
    Fish,
    #[value(name = "powershell", alias = "pwsh")]
    PowerShell,
}

impl Shell {
    /// Guess from a `$SHELL` style path; anything unrecognised is POSIX.
    pub fn from_shell_path(path: &str) -> Self {
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let name = name.strip_suffix(".exe").unwrap_or(name);
        match name {
            "fish" => Shell::Fish,
            "pwsh" | "powershell" => Shell::PowerShell,
            _ => Shell::Posix,
        }
    }

    pub fn detect() -> Self {
        std::env::var("SHELL")
            .map(|s| Self::from_shell_path(&s))
            .unwrap_or(Shell::Posix)
    }

    fn quote(self, value: &str) -> String {
        match self {
            Shell::Posix => shell_words::quote(value).into_owned(),
            Shell::Fish => format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'")),
            Shell::PowerShell => format!("'{}'", value.replace('\'', "''")),
        }
    }

    /// Snippet that sets `variable` to the selected id, or unsets it.
    pub fn render(self, variable: &str, selection: &Selection) -> String {
        let mut out = String::new();
        match selection.entry() {
            Some(entry) => {
                let label = match &entry.description {
                    Some(d) => format!("{} ({})", entry.name, d.replace(['\n', '\r'], " ")),
                    None => entry.name.clone(),
                };
                let _ = writeln!(out, "# sidx: {label}");
                let value = self.quote(entry.id.as_str());
                let _ = match self {
                    Shell::Posix => writeln!(out, "export {variable}={value}"),
                    Shell::Fish => writeln!(out, "set -gx {variable} {value}"),
                    Shell::PowerShell => writeln!(out, "$env:{variable} = {value}"),
                };
            }
            None => {
                let _ = writeln!(out, "# sidx: no index selected");
                let _ = match self {
                    Shell::Posix => writeln!(out, "unset {variable}"),
                    Shell::Fish => writeln!(out, "set -e {variable}"),
                    Shell::PowerShell => writeln!(
                        out,
                        "Remove-Item Env:{variable} -ErrorAction SilentlyContinue"
                    ),
                };
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexCatalog, IndexEntry, IndexId};

    fn papers() -> Selection {
        Selection::Active(IndexCatalog::builtin().get("papers").unwrap().clone())
    }

    #[test]
    fn detects_shell_from_path() {
        assert_eq!(Shell::from_shell_path("/usr/bin/fish"), Shell::Fish);
        assert_eq!(Shell::from_shell_path("/bin/bash"), Shell::Posix);
        assert_eq!(Shell::from_shell_path("/usr/local/bin/zsh"), Shell::Posix);
        assert_eq!(Shell::from_shell_path("pwsh"), Shell::PowerShell);
        assert_eq!(
            Shell::from_shell_path(r"C:\Windows\powershell.exe"),
            Shell::PowerShell
        );
    }

    #[test]
    fn posix_export_and_unset() {
        let text = Shell::Posix.render("SEARCH_INDEX", &papers());
        assert_eq!(
            text,
            "# sidx: papers (clipped papers index)\nexport SEARCH_INDEX=3e117028-2513-4f5b-b53c-90fda3cd328b\n"
        );
        let text = Shell::Posix.render("SEARCH_INDEX", &Selection::Unset);
        assert_eq!(text, "# sidx: no index selected\nunset SEARCH_INDEX\n");
    }

    #[test]
    fn posix_quotes_unusual_tokens() {
        let entry = IndexEntry::new("odd", IndexId::new("a b'c").unwrap());
        let text = Shell::Posix.render("X", &Selection::Active(entry));
        let line = text.lines().nth(1).unwrap();
        let value = line.strip_prefix("export X=").unwrap();
        assert_eq!(shell_words::split(value).unwrap(), vec!["a b'c".to_string()]);
    }

    #[test]
    fn fish_and_powershell_forms() {
        let fish = Shell::Fish.render("SEARCH_INDEX", &papers());
        assert!(fish.contains("set -gx SEARCH_INDEX '3e117028-2513-4f5b-b53c-90fda3cd328b'"));
        assert!(Shell::Fish
            .render("SEARCH_INDEX", &Selection::Unset)
            .contains("set -e SEARCH_INDEX"));

        let ps = Shell::PowerShell.render("SEARCH_INDEX", &papers());
        assert!(ps.contains("$env:SEARCH_INDEX = '3e117028-2513-4f5b-b53c-90fda3cd328b'"));
        let entry = IndexEntry::new("q", IndexId::new("it's").unwrap());
        let ps = Shell::PowerShell.render("V", &Selection::Active(entry));
        assert!(ps.contains("$env:V = 'it''s'"));
    }

    #[test]
    fn description_newlines_stay_in_comment() {
        let entry = IndexEntry::new("n", IndexId::new("id").unwrap()).with_description("a\nb");
        let text = Shell::Posix.render("V", &Selection::Active(entry));
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("# sidx: n (a b)"));
    }
}
