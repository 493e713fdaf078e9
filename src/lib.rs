pub mod catalog;
pub mod config;
pub mod env;
pub mod search;
pub mod selection;
pub mod shell;

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::{AppConfig, ConfigError};
use crate::env::{EnvChange, EnvError, EnvInitializer, ProcessEnv, validate_var_name};
use crate::search::auth::{self, AuthClient, AuthError, TokenStore};
use crate::search::client::{SearchClient, SearchError, SearchQuery, search_url};
use crate::selection::{Selection, SelectionSource};
use crate::shell::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "sidx",
    version,
    about = "Select a named search index and expose its identifier as an environment variable",
    after_help = "Typical use:\n  eval \"$(sidx env)\"\n  sidx --index papers exec -- some-search-tool query \"$SEARCH_INDEX\""
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Config file (default: platform config dir / config.toml)
    #[arg(long, global = true, env = "SIDX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Index to select by name; `none` selects nothing
    #[arg(long, short = 'i', global = true, env = "SIDX_INDEX")]
    pub index: Option<String>,

    /// Name of the environment variable to set
    #[arg(long = "var", global = true, env = "SIDX_VAR")]
    pub variable: Option<String>,

    /// Token file for the search API
    #[arg(long, global = true, env = "SIDX_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Machine-readable output and errors
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List known indices; the active one is marked
    List,

    /// Print the active index identifier
    Show,

    /// Print a snippet that sets the variable in the calling shell
    Env {
        /// Target shell (default: from $SHELL)
        #[arg(long, value_enum)]
        shell: Option<Shell>,
    },

    /// Run a command with the variable set (or removed when nothing is selected)
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<OsString>,
    },

    /// Print the search URL of the active index, for manual HTTP requests
    Url {
        /// Query string to include
        #[arg(long, short = 'q')]
        query: Option<String>,
    },

    /// Search the active index and print the JSON result
    Search {
        #[arg(default_value = "*")]
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        /// Use the advanced query syntax
        #[arg(long)]
        advanced: bool,
    },

    /// Delete one subject from the active index
    DeleteSubject { subject: String },

    /// Log in to the search service and store tokens
    Login,

    /// Remove stored tokens
    Logout,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Raised when a command needs an index but the selection is empty.
#[derive(Error, Debug)]
#[error("no index selected")]
pub struct NoIndexSelected;

/// Raised when `exec` cannot start its command.
#[derive(Error, Debug)]
#[error("failed to run {program}")]
pub struct SpawnError {
    pub program: String,
    pub source: std::io::Error,
}

impl SpawnError {
    /// 127 when the command does not exist, 126 when it cannot be executed.
    pub fn exit_code(&self) -> u8 {
        match self.source.kind() {
            std::io::ErrorKind::NotFound => 127,
            _ => 126,
        }
    }
}

/// Error as reported to the user, with a stable exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliError {
    pub code: u8,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let (code, kind, hint) = if err.downcast_ref::<NoIndexSelected>().is_some() {
            (
                3,
                "no-index",
                Some("pass --index NAME, set SIDX_INDEX, or set `active` in the config file"),
            )
        } else if let Some(spawn) = err.downcast_ref::<SpawnError>() {
            (spawn.exit_code(), "exec", None)
        } else if err.downcast_ref::<AuthError>().is_some() {
            (4, "auth", Some("run `sidx login` or set SIDX_ACCESS_TOKEN"))
        } else if err.downcast_ref::<ConfigError>().is_some()
            || err.downcast_ref::<CatalogError>().is_some()
            || err.downcast_ref::<EnvError>().is_some()
        {
            (5, "config", Some("run `sidx list` to see known indices"))
        } else if err.downcast_ref::<SearchError>().is_some() {
            (9, "search", None)
        } else {
            (1, "error", None)
        };
        Self {
            code,
            kind,
            message,
            hint: hint.map(str::to_string),
        }
    }

    pub fn report(&self, as_json: bool) {
        if as_json {
            let payload = json!({
                "error": {
                    "code": self.code,
                    "kind": self.kind,
                    "message": self.message,
                    "hint": self.hint,
                }
            });
            eprintln!("{payload}");
        } else {
            colorize_when(std::io::stderr().is_terminal());
            eprintln!("{} {}", "error:".red().bold(), self.message);
            if let Some(hint) = &self.hint {
                eprintln!("{} {hint}", "hint:".yellow());
            }
        }
    }
}

/// `colored` only consults the environment; keep output plain off a terminal.
fn colorize_when(is_terminal: bool) {
    if is_terminal {
        colored::control::unset_override();
    } else {
        colored::control::set_override(false);
    }
}

/// Resolved state shared by all commands.
struct Session {
    config: AppConfig,
    initializer: EnvInitializer,
    source: SelectionSource,
    json: bool,
}

impl Session {
    /// Load the config, resolve the selection and apply it to this process.
    fn open(args: &GlobalArgs) -> Result<Self> {
        let mut config = AppConfig::load(args.config.as_deref())?;
        if let Some(variable) = &args.variable {
            validate_var_name(variable)?;
            config.variable = variable.clone();
        }
        if let Some(token_file) = &args.token_file {
            config.token_file = token_file.clone();
        }

        let (selection, source) =
            selection::resolve(&config.catalog, args.index.as_deref(), &config.active)?;
        let initializer = EnvInitializer::new(config.variable.clone(), selection)?;
        // SAFETY: sessions are opened on the main thread before any runtime is built.
        let mut process_env = unsafe { ProcessEnv::new() };
        if let EnvChange::Set {
            previous: Some(previous),
            ..
        } = initializer.apply(&mut process_env)
        {
            tracing::debug!(%previous, "replaced inherited value");
        }

        Ok(Self {
            config,
            initializer,
            source,
            json: args.json,
        })
    }

    fn selection(&self) -> &Selection {
        self.initializer.selection()
    }

    fn active_entry(&self) -> Result<&catalog::IndexEntry> {
        self.selection().entry().ok_or_else(|| NoIndexSelected.into())
    }
}

/// Library entrypoint.
///
/// Every command except `completions` first applies the selection to this
/// process, before any async runtime exists, so children and later lookups
/// see the variable. Call it from the main thread while no other thread is
/// touching the environment.
pub fn run(cli: Cli) -> Result<ExitCode> {
    let Cli { global, command } = cli;
    match command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "sidx", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => list(&Session::open(&global)?),
        Commands::Show => show(&Session::open(&global)?),
        Commands::Env { shell } => {
            let ctx = Session::open(&global)?;
            let shell = shell.unwrap_or_else(Shell::detect);
            print!("{}", shell.render(ctx.initializer.variable(), ctx.selection()));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Url { query } => {
            let ctx = Session::open(&global)?;
            let entry = ctx.active_entry()?;
            let query = query.map(SearchQuery::new).unwrap_or_default();
            println!("{}", search_url(&ctx.config.search_base_url, &entry.id, &query)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exec { command } => {
            Session::open(&global)?;
            runtime()?.block_on(exec(&command))
        }
        Commands::Search {
            query,
            limit,
            offset,
            advanced,
        } => {
            let ctx = Session::open(&global)?;
            let query = SearchQuery {
                q: query,
                offset,
                limit,
                advanced,
            };
            runtime()?.block_on(search(&ctx, &query))
        }
        Commands::DeleteSubject { subject } => {
            let ctx = Session::open(&global)?;
            runtime()?.block_on(delete_subject(&ctx, &subject))
        }
        Commands::Login => {
            let ctx = Session::open(&global)?;
            runtime()?.block_on(login(&ctx))
        }
        Commands::Logout => logout(&Session::open(&global)?),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("sidx/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .context("failed to build HTTP client")
}

async fn search(ctx: &Session, query: &SearchQuery) -> Result<ExitCode> {
    let entry = ctx.active_entry()?;
    let client = search_client(ctx).await?;
    let response = client.search(&entry.id, query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(ExitCode::SUCCESS)
}

async fn delete_subject(ctx: &Session, subject: &str) -> Result<ExitCode> {
    let entry = ctx.active_entry()?;
    let client = search_client(ctx).await?;
    let response = client.delete_subject(&entry.id, subject).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(ExitCode::SUCCESS)
}

async fn login(ctx: &Session) -> Result<ExitCode> {
    let client = AuthClient::new(http_client()?, ctx.config.auth.clone());
    let store = TokenStore::new(&ctx.config.token_file);
    let tokens = auth::login(&client, &store).await?;
    if ctx.config.auth.is_confidential() {
        eprintln!("Authenticated ({} resource servers).", tokens.len());
    } else {
        eprintln!("Logged in; tokens saved to {}", store.path().display());
    }
    Ok(ExitCode::SUCCESS)
}

fn logout(ctx: &Session) -> Result<ExitCode> {
    let store = TokenStore::new(&ctx.config.token_file);
    if store.remove()? {
        eprintln!("Removed {}", store.path().display());
    } else {
        eprintln!("No stored tokens at {}", store.path().display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn search_client(ctx: &Session) -> Result<SearchClient> {
    let http = http_client()?;
    let auth_client = AuthClient::new(http.clone(), ctx.config.auth.clone());
    let store = TokenStore::new(&ctx.config.token_file);
    let token = auth::search_access_token(&auth_client, &store).await?;
    Ok(SearchClient::new(
        http,
        ctx.config.search_base_url.clone(),
        token,
    ))
}

/// Run a child process that inherits the (already initialized) environment.
async fn exec(command: &[OsString]) -> Result<ExitCode> {
    let (program, args) = command
        .split_first()
        .context("exec needs a command to run")?;
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| SpawnError {
            program: program.to_string_lossy().into_owned(),
            source,
        })?;
    tracing::debug!(?status, "child exited");
    Ok(ExitCode::from(child_exit_code(status)))
}

/// Exit code as a shell reports it: the child's own code, or 128+N when
/// signal N killed it.
fn child_exit_code(status: std::process::ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(1);
        }
    }
    1
}

fn list(ctx: &Session) -> Result<ExitCode> {
    colorize_when(std::io::stdout().is_terminal());
    if ctx.json {
        let indices: Vec<_> = ctx
            .config
            .catalog
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "id": e.id,
                    "description": e.description,
                    "active": ctx.selection().is_named(&e.name),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "variable": ctx.initializer.variable(),
                "indices": indices,
            }))?
        );
        return Ok(ExitCode::SUCCESS);
    }

    let width = ctx
        .config
        .catalog
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    for entry in ctx.config.catalog.iter() {
        let active = ctx.selection().is_named(&entry.name);
        let marker = if active { "*".green().bold() } else { " ".normal() };
        let name = format!("{:width$}", entry.name);
        let name = if active { name.as_str().bold() } else { name.as_str().normal() };
        let description = entry.description.as_deref().unwrap_or("");
        println!("{marker} {name}  {}  {}", entry.id, description.dimmed());
    }
    if !ctx.selection().is_active() {
        println!("{}", "(no index selected)".dimmed());
    }
    Ok(ExitCode::SUCCESS)
}

fn show(ctx: &Session) -> Result<ExitCode> {
    let entry = ctx.active_entry()?;
    if ctx.json {
        println!(
            "{}",
            json!({
                "name": entry.name,
                "id": entry.id,
                "variable": ctx.initializer.variable(),
                "source": ctx.source.to_string(),
            })
        );
    } else {
        println!("{}", entry.id);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_keeps_hyphenated_child_args() {
        let cli = Cli::try_parse_from(["sidx", "exec", "--", "tool", "--flag", "-x"]).unwrap();
        match cli.command {
            Commands::Exec { command } => {
                let expected: Vec<OsString> = ["tool", "--flag", "-x"].into_iter().map(OsString::from).collect();
                assert_eq!(command, expected);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn errors_map_to_exit_codes() {
        let err = anyhow::Error::new(NoIndexSelected);
        assert_eq!(CliError::from_anyhow(&err).code, 3);
        assert_eq!(CliError::from_anyhow(&err).kind, "no-index");

        let err = anyhow::Error::new(AuthError::NotLoggedIn);
        assert_eq!(CliError::from_anyhow(&err).code, 4);

        let err = anyhow::Error::new(CatalogError::EmptyId);
        assert_eq!(CliError::from_anyhow(&err).code, 5);

        let err = anyhow::Error::new(SearchError::Api {
            status: 500,
            code: None,
            message: "boom".into(),
        });
        let cli_err = CliError::from_anyhow(&err);
        assert_eq!((cli_err.code, cli_err.kind), (9, "search"));

        let err = anyhow::anyhow!("other");
        assert_eq!(CliError::from_anyhow(&err).code, 1);
    }

    #[test]
    fn spawn_failures_use_shell_exit_codes() {
        let missing = SpawnError {
            program: "nope".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(missing.exit_code(), 127);
        let err = CliError::from_anyhow(&anyhow::Error::new(missing));
        assert_eq!((err.code, err.kind), (127, "exec"));
        assert_eq!(err.message, "failed to run nope: entity not found");

        let denied = SpawnError {
            program: "./data.txt".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(CliError::from_anyhow(&anyhow::Error::new(denied)).code, 126);
    }

    #[cfg(unix)]
    #[test]
    fn child_exit_code_follows_shell_convention() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        assert_eq!(child_exit_code(ExitStatus::from_raw(7 << 8)), 7);
        // Raw wait status 9: killed by SIGKILL.
        assert_eq!(child_exit_code(ExitStatus::from_raw(9)), 137);
        assert_eq!(child_exit_code(ExitStatus::from_raw(15)), 143);
    }

    #[test]
    fn context_wrapped_errors_keep_their_kind() {
        let err = anyhow::Error::new(NoIndexSelected).context("while running search");
        assert_eq!(CliError::from_anyhow(&err).code, 3);
    }
}
