//! Credentials for the search API.
//!
//! Two app types are supported:
//!
//! - **Native app** (default): authorization-code flow with PKCE. The user
//!   opens the authorize URL, signs in and pastes the code back. Refresh
//!   tokens are requested, so the stored tokens keep working after the
//!   access token expires.
//! - **Confidential app**: when a client secret is configured, a
//!   client-credentials grant is used instead. Nothing is stored.
//!
//! Tokens are kept in a JSON file keyed by resource server:
//!
//! ```json
//! {
//!   "search.api.globus.org": {
//!     "access_token": "...",
//!     "refresh_token": "...",
//!     "expires_at_seconds": 1700000000,
//!     "resource_server": "search.api.globus.org",
//!     "scope": "urn:globus:auth:scope:search.api.globus.org:search",
//!     "token_type": "Bearer"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const AUTH_BASE_URL: &str = "https://auth.globus.org";

/// Public client id of the native test app. Register your own for real use.
pub const NATIVE_CLIENT_ID: &str = "6c1629cf-446c-49e7-af95-323c6412397f";

/// Page that displays the auth code for copy/paste.
pub const REDIRECT_URI: &str = "https://auth.globus.org/v2/web/auth-code";

pub const SEARCH_RESOURCE_SERVER: &str = "search.api.globus.org";
pub const SEARCH_SCOPE: &str = "urn:globus:auth:scope:search.api.globus.org:search";
pub const NATIVE_SCOPES: &str =
    "openid email profile urn:globus:auth:scope:search.api.globus.org:search";

/// Bypasses the token store entirely.
pub const ACCESS_TOKEN_ENV: &str = "SIDX_ACCESS_TOKEN";

/// Tokens this close to expiry are refreshed up front.
pub const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("not logged in (run `sidx login`)")]
    NotLoggedIn,

    #[error("stored tokens have no entry for {0}")]
    MissingResourceServer(String),

    #[error("access token expired and no refresh token is stored (run `sidx login`)")]
    NoRefreshToken,

    #[error("no auth code entered")]
    EmptyCode,

    #[error("token file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("token file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("auth request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("auth server rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid auth url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("prompt failed: {0}")]
    Prompt(String),
}

/// Client identity and endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_base_url: String,
}

impl AuthSettings {
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v2/oauth2/{path}", self.auth_base_url.trim_end_matches('/'))
    }
}

/// Tokens for one resource server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at_seconds: i64,
    #[serde(default)]
    pub resource_server: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
}

impl ServerTokens {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at_seconds - EXPIRY_SKEW_SECS <= now
    }
}

pub type TokensByServer = BTreeMap<String, ServerTokens>;

/// Raw token endpoint response. Extra resource servers arrive in `other_tokens`.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    resource_server: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    other_tokens: Vec<TokenResponse>,
}

impl TokenResponse {
    fn by_resource_server(self, now: i64) -> TokensByServer {
        let mut out = TokensByServer::new();
        let others = self.other_tokens;
        let primary = ServerTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at_seconds: now + self.expires_in,
            resource_server: self.resource_server.clone(),
            scope: self.scope,
            token_type: self.token_type,
        };
        out.insert(self.resource_server, primary);
        for other in others {
            out.extend(other.by_resource_server(now));
        }
        out
    }
}

/// JSON token file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored tokens; `None` when the file does not exist.
    pub fn load(&self) -> Result<Option<TokensByServer>, AuthError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AuthError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| AuthError::Json {
                path: self.path.clone(),
                source,
            })
    }

    pub fn save(&self, tokens: &TokensByServer) -> Result<(), AuthError> {
        let io_err = |source| AuthError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(tokens).map_err(|source| AuthError::Json {
            path: self.path.clone(),
            source,
        })?;
        write_private(&self.path, json.as_bytes()).map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), "saved tokens");
        Ok(())
    }

    /// Delete the token file. Returns whether a file was removed.
    pub fn remove(&self) -> Result<bool, AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(AuthError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Write a file readable by its owner only.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // `mode` only applies when the file is created.
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.flush()
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        // Two v4 UUIDs give 64 hex chars, inside the 43..=128 range RFC 7636 allows.
        let verifier = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Talks to the OAuth2 endpoints.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    settings: AuthSettings,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, settings: AuthSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn authorize_url(&self, pkce: &Pkce) -> Result<Url, AuthError> {
        let base = self.settings.endpoint("authorize");
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", NATIVE_SCOPES),
            ("state", "_default"),
            ("response_type", "code"),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
        ];
        Url::parse_with_params(&base, &params).map_err(|e| AuthError::InvalidUrl {
            url: base,
            reason: e.to_string(),
        })
    }

    pub async fn exchange_code(&self, code: &str, pkce: &Pkce) -> Result<TokensByServer, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", self.settings.client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        self.token_request(&form).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokensByServer, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.settings.client_id.as_str()),
        ];
        self.token_request(&form).await
    }

    pub async fn client_credentials(&self) -> Result<TokensByServer, AuthError> {
        let form = [("grant_type", "client_credentials"), ("scope", SEARCH_SCOPE)];
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokensByServer, AuthError> {
        let mut request = self.http.post(self.settings.endpoint("token")).form(form);
        if let Some(secret) = &self.settings.client_secret {
            request = request.basic_auth(&self.settings.client_id, Some(secret));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: TokenResponse = response.json().await?;
        Ok(parsed.by_resource_server(chrono::Utc::now().timestamp()))
    }
}

/// Whether we are in an SSH session, where opening a local browser is pointless.
pub fn is_remote_session() -> bool {
    std::env::var_os("SSH_TTY").is_some() || std::env::var_os("SSH_CONNECTION").is_some()
}

fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    match which::which(opener) {
        Ok(path) => {
            if let Err(e) = std::process::Command::new(path).arg(url).spawn() {
                tracing::warn!(error = %e, "failed to open browser");
            }
        }
        Err(_) => tracing::debug!(opener, "no browser opener on PATH"),
    }
}

/// Interactive native-app login. Stores and returns the tokens.
pub async fn login(client: &AuthClient, store: &TokenStore) -> Result<TokensByServer, AuthError> {
    if client.settings().is_confidential() {
        let tokens = client.client_credentials().await?;
        tracing::info!("confidential app authenticated; tokens are not stored");
        return Ok(tokens);
    }

    let pkce = Pkce::generate();
    let url = client.authorize_url(&pkce)?;
    eprintln!("Native App Authorization URL:\n{url}");
    if !is_remote_session() {
        open_browser(url.as_str());
    }

    let code = tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt("Enter the auth code")
            .interact_text()
    })
    .await
    .map_err(|e| AuthError::Prompt(e.to_string()))?
    .map_err(|e| AuthError::Prompt(e.to_string()))?;

    let code = code.trim();
    if code.is_empty() {
        return Err(AuthError::EmptyCode);
    }

    let tokens = client.exchange_code(code, &pkce).await?;
    store.save(&tokens)?;
    Ok(tokens)
}

/// Return a usable access token for the search API, refreshing if needed.
pub async fn search_access_token(
    client: &AuthClient,
    store: &TokenStore,
) -> Result<String, AuthError> {
    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV)
        && !token.is_empty()
    {
        tracing::debug!("using access token from {ACCESS_TOKEN_ENV}");
        return Ok(token);
    }

    if client.settings().is_confidential() {
        let tokens = client.client_credentials().await?;
        return tokens
            .get(SEARCH_RESOURCE_SERVER)
            .map(|t| t.access_token.clone())
            .ok_or_else(|| AuthError::MissingResourceServer(SEARCH_RESOURCE_SERVER.into()));
    }

    let mut all = store.load()?.ok_or(AuthError::NotLoggedIn)?;
    let current = all
        .get(SEARCH_RESOURCE_SERVER)
        .cloned()
        .ok_or_else(|| AuthError::MissingResourceServer(SEARCH_RESOURCE_SERVER.into()))?;

    let now = chrono::Utc::now().timestamp();
    if !current.is_expired(now) {
        return Ok(current.access_token);
    }

    let refresh_token = current.refresh_token.ok_or(AuthError::NoRefreshToken)?;
    tracing::info!("access token expired, refreshing");
    let mut refreshed = client.refresh(&refresh_token).await?;
    let mut search = refreshed
        .remove(SEARCH_RESOURCE_SERVER)
        .ok_or_else(|| AuthError::MissingResourceServer(SEARCH_RESOURCE_SERVER.into()))?;
    // Refresh responses may omit the refresh token; keep the one we have.
    if search.refresh_token.is_none() {
        search.refresh_token = Some(refresh_token);
    }
    let access = search.access_token.clone();
    all.insert(SEARCH_RESOURCE_SERVER.to_string(), search);
    all.extend(refreshed);
    store.save(&all)?;
    Ok(access)
}
