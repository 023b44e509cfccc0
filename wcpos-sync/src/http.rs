//! HTTP transport seam.
//!
//! The engine only ever talks to the network through [`HttpClient`]. The
//! bundled [`RestClient`] implements it on top of reqwest; embedders with
//! their own auth layer can supply another implementation.

use crate::config::HttpConfig;
use crate::error::{CancelReason, SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A REST request relative to the client's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Resource path, optionally carrying an encoded query string.
    pub path: String,
    /// Extra query pairs, appended after any query already in `path`.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the values of every query pair named `key`.
    pub fn query_values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// A decoded response. Empty bodies decode to `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

/// Sends REST requests. Implementations must stop waiting and return
/// `SyncError::Cancelled` once `cancel` fires.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken)
    -> SyncResult<HttpResponse>;
}

/// WordPress REST error body.
#[derive(Debug, Deserialize)]
struct RestErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// reqwest-backed [`HttpClient`].
pub struct RestClient {
    config: HttpConfig,
    client: Client,
    token: RwLock<Option<String>>,
    reauth: Mutex<CancellationToken>,
    suspended: AtomicBool,
}

impl RestClient {
    /// Creates a client for the configured base URL.
    pub fn new(config: HttpConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
            reauth: Mutex::new(CancellationToken::new()),
            suspended: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Sets (or clears) the bearer token sent with every request.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    /// Cancels every in-flight request with `CancelReason::Reauthentication`.
    /// Requests started afterwards are unaffected.
    pub fn begin_reauthentication(&self) {
        let mut guard = self.reauth.lock().unwrap_or_else(PoisonError::into_inner);
        guard.cancel();
        *guard = CancellationToken::new();
        debug!("cancelled in-flight requests for re-authentication");
    }

    /// While suspended every request fails fast with `SyncError::Suspended`.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn reauth_token(&self) -> CancellationToken {
        self.reauth
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn server_error(status: StatusCode, text: &str) -> SyncError {
    let body: Option<RestErrorBody> = serde_json::from_str(text).ok();
    let (code, message) = body.map_or((None, None), |b| (b.code, b.message));
    SyncError::Server {
        status: status.as_u16(),
        code,
        message: message.or_else(|| status.canonical_reason().map(str::to_string)),
    }
}

#[async_trait]
impl HttpClient for RestClient {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> SyncResult<HttpResponse> {
        if self.is_suspended() {
            return Err(SyncError::Suspended);
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                reason: CancelReason::Aborted,
            });
        }

        let reauth = self.reauth_token();
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .query(&request.query);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(token) = self.token.read().await.as_ref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, "sending request");

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SyncError::Cancelled { reason: CancelReason::Aborted });
            }
            _ = reauth.cancelled() => {
                return Err(SyncError::Cancelled { reason: CancelReason::Reauthentication });
            }
            result = exchange => result.map_err(|e| SyncError::Network(e.to_string()))?,
        };

        if !status.is_success() {
            return Err(server_error(status, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                SyncError::MalformedResponse(format!("{} returned invalid JSON: {e}", request.path))
            })?
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }
}
