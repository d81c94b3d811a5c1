pub mod auth;
pub mod data;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::config::CatalogConfig;
use crate::error::CatalogError;
use crate::spotify::auth::{CachedToken, Clock, Credential, SystemClock, TokenCache};

/// Catalog API client. Cheap to share behind `&` across concurrent calls;
/// the token slot is its only mutable state.
pub struct SpotifyClient {
    http: Client,
    api_base_url: String,
    tokens: TokenCache,
}

impl SpotifyClient {
    pub fn new(
        credential: Credential,
        token_url: &str,
        api_base_url: &str,
        http: Client,
    ) -> Result<Self, CatalogError> {
        Self::with_clock(credential, token_url, api_base_url, http, Arc::new(SystemClock))
    }

    /// Like [`SpotifyClient::new`], judging token freshness by `clock`.
    pub fn with_clock(
        credential: Credential,
        token_url: &str,
        api_base_url: &str,
        http: Client,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CatalogError> {
        let tokens = TokenCache::with_clock(credential, token_url, http.clone(), clock)?;
        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::InvalidConfig(format!("http client: {}", e)))?;

        Self::new(
            Credential::new(config.client_id.clone(), config.client_secret.clone()),
            &config.token_url,
            &config.api_base_url,
            http,
        )
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }

    /// Sends a bearer-authenticated request, retrying once with a fresh token
    /// if the first attempt comes back 401.
    ///
    /// `build` is called once per attempt. Statuses other than 401 are
    /// returned to the caller untouched.
    pub(crate) async fn send_authorized<F>(&self, build: F) -> Result<Response, CatalogError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.tokens.access_token().await?;
        let response = self.send_with(&build, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Catalog API rejected access token, refreshing and retrying once");
        self.tokens.invalidate(&token);
        let token = self.tokens.access_token().await?;
        let response = self.send_with(&build, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&token);
            return Err(CatalogError::AuthFailure(
                "catalog API rejected a freshly issued access token".to_string(),
            ));
        }

        Ok(response)
    }

    async fn send_with<F>(&self, build: &F, token: &CachedToken) -> Result<Response, CatalogError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let request = build(&self.http).bearer_auth(token.bearer()).build()?;
        debug!("{} {}", request.method(), request.url());
        let response = self.http.execute(request).await?;
        debug!("Catalog API responded {}", response.status());
        Ok(response)
    }
}
