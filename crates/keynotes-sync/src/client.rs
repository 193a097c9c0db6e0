//! HTTP implementation of [`SyncApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keynotes_core::config::SyncConfig;
use keynotes_core::SecretString;
use keynotes_vault::{keys, Storage};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{DataPayload, DeviceInfo, SyncApi, SyncPreferences, SyncStatus, UpdateCheck};
use crate::error::{Result, SyncError};

/// Access/refresh token pair for the sync account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: SecretString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SecretString>,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token),
            refresh_token: refresh_token.map(SecretString::new),
        }
    }
}

/// Persists [`AuthTokens`] under the `auth-tokens` storage key.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> Result<Option<AuthTokens>> {
        match self.storage.get(keys::AUTH_TOKENS).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, tokens: &AuthTokens) -> Result<()> {
        let json = serde_json::to_string(tokens)?;
        self.storage.set(keys::AUTH_TOKENS, &json).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(keys::AUTH_TOKENS).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Response of the OAuth code exchange.
#[derive(Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

/// Sync API client over HTTPS with bearer auth.
///
/// A 401 response triggers one token refresh; on success the original
/// request is retried exactly once with the new access token.
pub struct HttpSyncClient {
    http: Client,
    api_base: String,
    tokens: TokenStore,
    cached: RwLock<Option<AuthTokens>>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
}

impl HttpSyncClient {
    /// Create a client from sync configuration.
    pub fn new(config: &SyncConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(SyncError::Http)?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tokens: TokenStore::new(storage),
            cached: RwLock::new(None),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Whether credentials are stored.
    pub async fn is_connected(&self) -> Result<bool> {
        Ok(self.current_tokens().await?.is_some())
    }

    /// Store credentials obtained out of band.
    pub async fn set_tokens(&self, tokens: AuthTokens) -> Result<()> {
        self.tokens.save(&tokens).await?;
        *self.cached.write().await = Some(tokens);
        Ok(())
    }

    /// Forget stored credentials.
    pub async fn disconnect(&self) -> Result<()> {
        self.tokens.clear().await?;
        *self.cached.write().await = None;
        info!("sync account disconnected");
        Ok(())
    }

    /// Exchange an OAuth authorization code for tokens and store them.
    pub async fn exchange_code(&self, code: &str, redirect_uri: Option<&str>) -> Result<AuthTokens> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(SyncError::auth("OAuth client credentials are not configured"));
        };

        let body = json!({
            "code": code,
            "clientId": client_id,
            "clientSecret": client_secret.expose_secret(),
            "redirectUri": redirect_uri,
        });

        let response = self
            .http
            .post(self.url("auth/oauth/token"))
            .json(&body)
            .send()
            .await
            .map_err(SyncError::transport)?;
        let grant: TokenGrant = Self::decode(response).await?;

        let tokens = AuthTokens::new(grant.access_token, grant.refresh_token);
        self.set_tokens(tokens.clone()).await?;
        info!(token_type = ?grant.token_type, expires_in = ?grant.expires_in, "sync account connected");
        Ok(tokens)
    }

    async fn current_tokens(&self) -> Result<Option<AuthTokens>> {
        if let Some(tokens) = self.cached.read().await.clone() {
            return Ok(Some(tokens));
        }
        let loaded = self.tokens.load().await?;
        *self.cached.write().await = loaded.clone();
        Ok(loaded)
    }

    /// Current access token, for the push channel handshake.
    pub async fn access_token(&self) -> Result<Option<SecretString>> {
        Ok(self.current_tokens().await?.map(|t| t.access_token))
    }

    /// Trade the refresh token for a new access token. `Ok(None)` when no
    /// refresh token is stored or the server refuses.
    async fn refresh(&self) -> Result<Option<SecretString>> {
        let Some(current) = self.current_tokens().await? else {
            return Ok(None);
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            debug!("no refresh token stored");
            return Ok(None);
        };

        let response = self
            .http
            .post(self.url("auth/refresh"))
            .json(&json!({ "refreshToken": refresh_token.expose_secret() }))
            .send()
            .await
            .map_err(SyncError::transport)?;

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "token refresh rejected");
            return Ok(None);
        }

        let refreshed: RefreshResponse = response.json().await?;
        let tokens = AuthTokens {
            access_token: SecretString::new(refreshed.access_token),
            refresh_token: refreshed
                .refresh_token
                .map(SecretString::new)
                .or(Some(refresh_token)),
        };
        self.set_tokens(tokens.clone()).await?;
        debug!("access token refreshed");
        Ok(Some(tokens.access_token))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &SecretString,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token.expose_secret());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.map_err(SyncError::transport)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T> {
        let token = self
            .access_token()
            .await?
            .ok_or(SyncError::NotConnected)?;

        debug!(%method, path, "sync request");
        let response = self.send(method.clone(), path, query, body, &token).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            match self.refresh().await? {
                Some(fresh) => self.send(method, path, query, body, &fresh).await?,
                None => {
                    return Err(SyncError::auth(
                        "access token rejected and could not be refreshed",
                    ))
                }
            }
        } else {
            response
        };

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            return match status {
                StatusCode::UNAUTHORIZED => Err(SyncError::auth(message)),
                _ => Err(SyncError::api(status.as_u16(), message)),
            };
        }

        let text = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(text)?)
    }
}

#[async_trait]
impl SyncApi for HttpSyncClient {
    async fn sync_status(&self) -> Result<SyncStatus> {
        self.request(Method::GET, "sync/status", &[], None).await
    }

    async fn update_preferences(&self, preferences: &SyncPreferences) -> Result<()> {
        let body = serde_json::to_value(preferences)?;
        let _: Value = self
            .request(Method::PUT, "sync/preferences", &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn upload_data(&self, data_type: &str, data: &Value) -> Result<()> {
        let body = json!({ "dataType": data_type, "data": data });
        let _: Value = self
            .request(Method::POST, "sync/data", &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn download_data(&self, data_type: &str) -> Result<DataPayload> {
        self.request(
            Method::GET,
            "sync/data",
            &[("dataType", data_type.to_string())],
            None,
        )
        .await
    }

    async fn check_updates(&self, data_types: &[&str]) -> Result<UpdateCheck> {
        self.request(
            Method::GET,
            "sync/check-updates",
            &[("dataTypes", data_types.join(","))],
            None,
        )
        .await
    }

    async fn heartbeat(&self, device: &DeviceInfo) -> Result<()> {
        let body = json!({ "deviceInfo": device });
        let _: Value = self
            .request(Method::POST, "sessions/heartbeat", &[], Some(&body))
            .await?;
        Ok(())
    }
}
