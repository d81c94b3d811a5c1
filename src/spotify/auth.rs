//! Client-credentials token acquisition and the single-slot token cache.
//!
//! At most one exchange is in flight per [`TokenCache`]. Callers that find the
//! slot empty or stale while an exchange is running join it instead of
//! starting their own. The exchange runs on a spawned task and installs its
//! own result, so a caller that gives up waiting never leaves the slot
//! half-updated.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError, TokenResponse, TokenUrl};
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;

use crate::error::CatalogError;
use crate::utils::epoch_millis;

/// A token is treated as stale this long before its reported expiry.
pub const SAFETY_MARGIN_MS: i64 = 60_000;

/// Used when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Source of "now" for token freshness, in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        epoch_millis()
    }
}

/// Client id and secret for the client-credentials grant.
#[derive(Clone, Debug)]
pub struct Credential {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
}

impl Credential {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: ClientId::new(client_id.into()),
            client_secret: ClientSecret::new(client_secret.into()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    bearer: String,
    expires_at_ms: i64,
}

impl CachedToken {
    pub fn new(bearer: impl Into<String>, expires_at_ms: i64) -> Self {
        Self { bearer: bearer.into(), expires_at_ms }
    }

    pub fn from_ttl(bearer: impl Into<String>, ttl: Duration, now_ms: i64) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self::new(bearer, now_ms.saturating_add(ttl_ms))
    }

    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    pub fn refresh_at_ms(&self) -> i64 {
        self.expires_at_ms.saturating_sub(SAFETY_MARGIN_MS)
    }

    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        now_ms < self.refresh_at_ms()
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("bearer", &"[redacted]")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<CachedToken, CatalogError>>>;

enum TokenState {
    Absent,
    Valid(CachedToken),
    Refreshing { generation: u64, refresh: RefreshFuture },
}

/// Performs the client-credentials exchange against the token endpoint.
struct TokenExchange {
    oauth: BasicClient,
    http: reqwest::Client,
    credential: Credential,
    clock: Arc<dyn Clock>,
}

impl TokenExchange {
    async fn exchange(&self) -> Result<CachedToken, CatalogError> {
        let token_result = self.oauth
            .exchange_client_credentials()
            .request_async(|request| self.send(request))
            .await
            .map_err(token_error)?;

        let ttl = token_result.expires_in().unwrap_or(DEFAULT_TOKEN_TTL);
        info!("Obtained catalog access token valid for {}s", ttl.as_secs());
        Ok(CachedToken::from_ttl(token_result.access_token().secret().clone(), ttl, self.clock.now_ms()))
    }

    /// Sends the request built by `oauth2` with a plain
    /// `Basic base64(id:secret)` header in place of its form-encoded one.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, reqwest::Error> {
        let mut headers = request.headers;
        headers.remove(AUTHORIZATION);

        let response = self.http
            .request(request.method, request.url.as_str())
            .headers(headers)
            .basic_auth(
                self.credential.client_id.as_str(),
                Some(self.credential.client_secret.secret()),
            )
            .body(request.body)
            .send()
            .await?;

        let status_code = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        let body = if status_code.is_success() { with_token_type(body) } else { body };
        Ok(HttpResponse { status_code, headers, body })
    }
}

/// Endpoints may answer with just `access_token` and `expires_in`; `oauth2`
/// insists on `token_type`, so a missing one is filled in as `bearer`.
fn with_token_type(body: Vec<u8>) -> Vec<u8> {
    let mut json = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(json)) => json,
        _ => return body,
    };
    if json.contains_key("token_type") {
        return body;
    }
    json.insert("token_type".to_string(), Value::String("bearer".to_string()));
    serde_json::to_vec(&json).unwrap_or(body)
}

fn token_error(err: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CatalogError {
    match err {
        RequestTokenError::Request(e) => CatalogError::Transport(Arc::new(e)),
        RequestTokenError::ServerResponse(response) => {
            CatalogError::AuthFailure(format!("token endpoint rejected credentials: {}", response))
        }
        RequestTokenError::Parse(e, _) => {
            CatalogError::AuthFailure(format!("unreadable token response: {}", e))
        }
        RequestTokenError::Other(message) => CatalogError::AuthFailure(message),
    }
}

/// Single-slot bearer token cache with de-duplicated refresh.
pub struct TokenCache {
    state: Arc<Mutex<TokenState>>,
    exchange: Arc<TokenExchange>,
    clock: Arc<dyn Clock>,
    /// Bumped once per started exchange.
    generation: AtomicU64,
}

impl TokenCache {
    pub fn new(credential: Credential, token_url: &str, http: reqwest::Client) -> Result<Self, CatalogError> {
        Self::with_clock(credential, token_url, http, Arc::new(SystemClock))
    }

    pub fn with_clock(
        credential: Credential,
        token_url: &str,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CatalogError> {
        let invalid = |e: oauth2::url::ParseError| {
            CatalogError::InvalidConfig(format!("token url `{}`: {}", token_url, e))
        };
        // Never visited: the client-credentials grant has no authorize step.
        let auth_url = AuthUrl::new(token_url.to_string()).map_err(invalid)?;

        let oauth = BasicClient::new(
            credential.client_id.clone(),
            Some(credential.client_secret.clone()),
            auth_url,
            Some(TokenUrl::new(token_url.to_string()).map_err(invalid)?),
        );

        Ok(Self {
            state: Arc::new(Mutex::new(TokenState::Absent)),
            exchange: Arc::new(TokenExchange { oauth, http, credential, clock: Arc::clone(&clock) }),
            clock,
            generation: AtomicU64::new(0),
        })
    }

    /// Returns a usable token, exchanging credentials first if the slot is
    /// empty or stale. Concurrent callers share one exchange and its outcome.
    pub async fn access_token(&self) -> Result<CachedToken, CatalogError> {
        let refresh = {
            let mut state = self.state.lock();
            match &*state {
                TokenState::Valid(token) if token.is_usable_at(self.clock.now_ms()) => {
                    return Ok(token.clone());
                }
                TokenState::Refreshing { refresh, .. } => {
                    debug!("Joining in-flight token refresh");
                    refresh.clone()
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let refresh = self.spawn_refresh(generation);
                    *state = TokenState::Refreshing { generation, refresh: refresh.clone() };
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Drops `rejected` from the slot if it is still the cached token.
    /// A token installed by someone else in the meantime is left alone.
    pub fn invalidate(&self, rejected: &CachedToken) {
        let mut state = self.state.lock();
        if let TokenState::Valid(current) = &*state {
            if current.bearer == rejected.bearer {
                debug!("Invalidating rejected access token");
                *state = TokenState::Absent;
            }
        }
    }

    /// Currently installed token, whether or not it is still fresh.
    pub fn cached(&self) -> Option<CachedToken> {
        match &*self.state.lock() {
            TokenState::Valid(token) => Some(token.clone()),
            _ => None,
        }
    }

    /// Number of credential exchanges started by this cache.
    pub fn exchange_count(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    fn spawn_refresh(&self, generation: u64) -> RefreshFuture {
        let state = Arc::clone(&self.state);
        let exchange = Arc::clone(&self.exchange);

        debug!("Starting token exchange #{}", generation);
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let result = exchange.exchange().await;
            install(&task_state, generation, &result);
            result
        });

        task.map(move |joined| {
            joined.unwrap_or_else(|e| {
                let result: Result<CachedToken, CatalogError> =
                    Err(CatalogError::AuthFailure(format!("token refresh task failed: {}", e)));
                install(&state, generation, &result);
                result
            })
        })
        .boxed()
        .shared()
    }
}

fn install(state: &Mutex<TokenState>, generation: u64, result: &Result<CachedToken, CatalogError>) {
    let mut state = state.lock();
    match &*state {
        TokenState::Refreshing { generation: current, .. } if *current == generation => {
            *state = match result {
                Ok(token) => TokenState::Valid(token.clone()),
                Err(e) => {
                    warn!("Token exchange failed: {}", e);
                    TokenState::Absent
                }
            };
        }
        _ => debug!("Discarding result of superseded token exchange #{}", generation),
    }
}
