use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::catalog::IndexId;

pub const SEARCH_BASE_URL: &str = "https://search.api.globus.org";

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid search url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search API returned {status}{}: {message}", code_suffix(.code))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

/// Parameters of a simple search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub q: String,
    pub offset: u32,
    pub limit: u32,
    pub advanced: bool,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            q: "*".to_string(),
            offset: 0,
            limit: 10,
            advanced: false,
        }
    }
}

impl SearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            ..Self::default()
        }
    }
}

/// Search result page. Fields the API adds beyond these are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub gmeta: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn index_url(base: &str, index: &IndexId, tail: &str) -> Result<Url, SearchError> {
    let invalid = |reason: String| SearchError::InvalidUrl {
        url: base.to_string(),
        reason,
    };
    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(["v1", "index", index.as_str(), tail]);
    Ok(url)
}

/// `GET {base}/v1/index/{id}/search?q=..&offset=..&limit=..&advanced=..`
pub fn search_url(base: &str, index: &IndexId, query: &SearchQuery) -> Result<Url, SearchError> {
    let mut url = index_url(base, index, "search")?;
    url.query_pairs_mut()
        .append_pair("q", &query.q)
        .append_pair("offset", &query.offset.to_string())
        .append_pair("limit", &query.limit.to_string())
        .append_pair("advanced", if query.advanced { "true" } else { "false" });
    Ok(url)
}

/// `DELETE {base}/v1/index/{id}/subject?subject=..`
pub fn subject_url(base: &str, index: &IndexId, subject: &str) -> Result<Url, SearchError> {
    let mut url = index_url(base, index, "subject")?;
    url.query_pairs_mut().append_pair("subject", subject);
    Ok(url)
}

/// Thin client for one search service.
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl SearchClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }

    fn request(&self, method: Method, url: Url) -> Result<reqwest::Request, SearchError> {
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .build()?)
    }

    pub fn search_request(
        &self,
        index: &IndexId,
        query: &SearchQuery,
    ) -> Result<reqwest::Request, SearchError> {
        self.request(Method::GET, search_url(&self.base_url, index, query)?)
    }

    pub fn delete_subject_request(
        &self,
        index: &IndexId,
        subject: &str,
    ) -> Result<reqwest::Request, SearchError> {
        self.request(Method::DELETE, subject_url(&self.base_url, index, subject)?)
    }

    pub async fn search(
        &self,
        index: &IndexId,
        query: &SearchQuery,
    ) -> Result<SearchResponse, SearchError> {
        let request = self.search_request(index, query)?;
        tracing::debug!(url = %request.url(), "search");
        let body = self.execute(request).await?;
        let response: SearchResponse =
            serde_json::from_value(body).map_err(|e| SearchError::Api {
                status: 200,
                code: None,
                message: format!("unexpected response shape: {e}"),
            })?;
        tracing::info!(
            index = %index,
            total = response.total,
            count = response.count,
            has_next_page = response.has_next_page,
            "search complete"
        );
        Ok(response)
    }

    pub async fn delete_subject(&self, index: &IndexId, subject: &str) -> Result<Value, SearchError> {
        let request = self.delete_subject_request(index, subject)?;
        tracing::info!(index = %index, subject, "deleting subject");
        self.execute(request).await
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Value, SearchError> {
        let response = self.http.execute(request).await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| SearchError::Api {
            status: status.as_u16(),
            code: None,
            message: format!("response is not JSON: {e}"),
        })
    }
}

fn api_error(status: u16, body: &str) -> SearchError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => SearchError::Api {
            status,
            code: parsed.code,
            message: parsed.message.unwrap_or_else(|| body.trim().to_string()),
        },
        Err(_) => SearchError::Api {
            status,
            code: None,
            message: body.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn http() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn papers() -> IndexId {
        IndexId::new("3e117028-2513-4f5b-b53c-90fda3cd328b").unwrap()
    }

    /// Serve one canned HTTP response; yields the raw request head.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut head = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
                if n == 0 || head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&head).into_owned()
        });
        (base, handle)
    }

    #[test]
    fn search_url_encodes_query() {
        let query = SearchQuery {
            q: "title:\"deep learning\" & more".into(),
            offset: 20,
            limit: 5,
            advanced: true,
        };
        let url = search_url(SEARCH_BASE_URL, &papers(), &query).unwrap();
        assert_eq!(
            url.path(),
            "/v1/index/3e117028-2513-4f5b-b53c-90fda3cd328b/search"
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("q".into(), "title:\"deep learning\" & more".into()),
                ("offset".into(), "20".into()),
                ("limit".into(), "5".into()),
                ("advanced".into(), "true".into()),
            ]
        );
    }

    #[test]
    fn base_url_with_trailing_slash_or_prefix() {
        let url = search_url("https://example.org/", &papers(), &SearchQuery::default()).unwrap();
        assert!(url.path().starts_with("/v1/index/"));
        let url = search_url("https://example.org/api", &papers(), &SearchQuery::default()).unwrap();
        assert!(url.path().starts_with("/api/v1/index/"));
    }

    #[test]
    fn subject_url_escapes_subject() {
        let subject = "globus://e56c36e4-1063-11e6-a747-22000bf2d559/data/papers/clipping_10428503.pdf";
        let url = subject_url(SEARCH_BASE_URL, &papers(), subject).unwrap();
        assert!(url.path().ends_with("/subject"));
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "subject");
        assert_eq!(value, subject);
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let err = search_url("not a url", &papers(), &SearchQuery::default()).unwrap_err();
        assert!(matches!(err, SearchError::InvalidUrl { .. }));
    }

    #[test]
    fn requests_carry_bearer_token() {
        let client = SearchClient::new(reqwest::Client::new(), SEARCH_BASE_URL, "tok");
        let request = client.search_request(&papers(), &SearchQuery::default()).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(
            request.headers()[reqwest::header::AUTHORIZATION],
            "Bearer tok"
        );
        let request = client.delete_subject_request(&papers(), "s").unwrap();
        assert_eq!(request.method(), Method::DELETE);
    }

    #[test]
    fn api_error_uses_structured_body_when_present() {
        let err = api_error(
            404,
            r#"{"code":"NotFound.NoSuchIndex","message":"There is no index with that id","status":404}"#,
        );
        assert_eq!(
            err.to_string(),
            "search API returned 404 (NotFound.NoSuchIndex): There is no index with that id"
        );
        let err = api_error(502, "bad gateway\n");
        assert_eq!(err.to_string(), "search API returned 502: bad gateway");
    }

    #[tokio::test]
    async fn search_parses_response_and_keeps_extra_fields() {
        let body = r#"{"@datatype":"GSearchResult","total":1,"count":1,"offset":0,"has_next_page":false,"gmeta":[{"subject":"s1","entries":[]}]}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let client = SearchClient::new(http(), base, "tok");

        let response = client.search(&papers(), &SearchQuery::default()).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.gmeta.len(), 1);
        assert_eq!(response.extra["@datatype"], "GSearchResult");

        let head = server.await.unwrap();
        assert!(head.starts_with(
            "GET /v1/index/3e117028-2513-4f5b-b53c-90fda3cd328b/search?q=*&offset=0&limit=10&advanced=false"
        ));
        assert!(head.to_ascii_lowercase().contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn search_surfaces_api_errors() {
        let body = r#"{"code":"Forbidden","message":"not allowed"}"#;
        let (base, server) = serve_once("403 Forbidden", body).await;
        let client = SearchClient::new(http(), base, "tok");

        let err = client.search(&papers(), &SearchQuery::default()).await.unwrap_err();
        match err {
            SearchError::Api { status, code, .. } => {
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("Forbidden"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn delete_subject_returns_body() {
        let (base, server) = serve_once("200 OK", r#"{"removed":true,"num_subjects_deleted":1}"#).await;
        let client = SearchClient::new(http(), base, "tok");
        let value = client.delete_subject(&papers(), "s1").await.unwrap();
        assert_eq!(value["num_subjects_deleted"], 1);
        let head = server.await.unwrap();
        assert!(head.starts_with("DELETE /v1/index/"));
    }
}
