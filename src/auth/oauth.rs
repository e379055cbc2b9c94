//! OAuth2 device code provider for the Microsoft identity platform
//!
//! Interactive sign-in is the device authorization grant; silent acquisition
//! redeems the cached refresh token. Token exchange itself is left to the
//! `oauth2` crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicErrorResponseType, BasicRevocationErrorResponse,
    BasicTokenIntrospectionResponse, BasicTokenType,
};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, Client, ClientId, DeviceAuthorizationUrl, DeviceCodeErrorResponse,
    DeviceCodeErrorResponseType, ExtraTokenFields, RefreshToken, RequestTokenError, Scope,
    StandardDeviceAuthorizationResponse, StandardRevocableToken, StandardTokenResponse,
    TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use url::Url;

use super::claims::account_from_id_token;
use super::tokens::{authority_key, StoredToken, TokenCache};
use crate::config::ClientConfig;
use crate::provider::{Account, IdentityProvider, Session, TokenResult, VendorError};

/// Scopes added to every request so the response carries an `id_token` and
/// a refresh token.
const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Server error codes meaning the user has to sign in again.
const UI_REQUIRED_CODES: [&str; 3] = ["interaction_required", "consent_required", "login_required"];

/// Token response with the OIDC `id_token` kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type MsTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type MsClient = Client<
    BasicErrorResponse,
    MsTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// What the user needs to complete a device code sign-in.
#[derive(Debug, Clone)]
pub struct DevicePrompt {
    pub verification_uri: String,
    pub user_code: String,
    pub expires_in: Duration,
}

/// Host callback that shows the device code to the user.
pub type PromptFn = Arc<dyn Fn(&DevicePrompt) + Send + Sync>;

/// Desktop adapter backed by the device authorization grant.
pub struct DeviceCodeProvider {
    cache_dir: PathBuf,
    prompt: PromptFn,
    cancel: Option<watch::Receiver<bool>>,
}

impl DeviceCodeProvider {
    pub fn new(cache_dir: impl Into<PathBuf>, prompt: PromptFn) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            prompt,
            cancel: None,
        }
    }

    /// Abort interactive sign-ins once `cancel` turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cache_path(&self, client_id: &str) -> PathBuf {
        let name: String = client_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{}.toml", name))
    }
}

#[async_trait]
impl IdentityProvider for DeviceCodeProvider {
    async fn create_single_account_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Session>, VendorError> {
        let authority = config
            .authority()
            .map_err(|e| VendorError::client("invalid_authority", format!("{:#}", e)))?;
        let client = build_client(&config.client_id, &authority)?;

        let cache_path = self.cache_path(&config.client_id);
        let cache = TokenCache::load(&cache_path).map_err(io_error)?;
        tracing::debug!("Token cache at {}", cache_path.display());

        Ok(Arc::new(DeviceCodeSession {
            client_id: config.client_id.clone(),
            authority,
            client,
            cache_path,
            cache: Mutex::new(cache),
            prompt: Arc::clone(&self.prompt),
            cancel: self.cancel.clone(),
        }))
    }
}

/// Build the OAuth2 client for an authority such as
/// `https://login.microsoftonline.com/common`.
fn build_client(client_id: &str, authority: &Url) -> Result<MsClient, VendorError> {
    let invalid = |e: url::ParseError| VendorError::client("invalid_authority", e.to_string());

    let auth_url = AuthUrl::new(endpoint(authority, "authorize")).map_err(invalid)?;
    let token_url = TokenUrl::new(endpoint(authority, "token")).map_err(invalid)?;
    let device_url =
        DeviceAuthorizationUrl::new(endpoint(authority, "devicecode")).map_err(invalid)?;

    Ok(MsClient::new(
        ClientId::new(client_id.to_string()),
        None,
        auth_url,
        Some(token_url),
    )
    .set_device_authorization_url(device_url))
}

fn endpoint(authority: &Url, name: &str) -> String {
    format!(
        "{}/oauth2/v2.0/{}",
        authority.as_str().trim_end_matches('/'),
        name
    )
}

/// Caller scopes followed by the reserved OIDC scopes not already present.
fn request_scopes(scopes: &[String]) -> Vec<Scope> {
    let mut all: Vec<String> = scopes.to_vec();
    for reserved in RESERVED_SCOPES {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(reserved)) {
            all.push(reserved.to_string());
        }
    }
    all.into_iter().map(Scope::new).collect()
}

/// Resolves when the host asks to cancel; never resolves without a hook or
/// once the hook's sender is gone.
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    if let Some(mut cancel) = cancel {
        let signalled = cancel.wait_for(|cancelled| *cancelled).await.is_ok();
        if signalled {
            return;
        }
    }
    std::future::pending::<()>().await
}

fn io_error(e: anyhow::Error) -> VendorError {
    VendorError::client("io_error", format!("{:#}", e))
}

fn classify_basic(kind: &BasicErrorResponseType, description: Option<&String>) -> VendorError {
    let code = kind.as_ref().to_string();
    let message = description.cloned().unwrap_or_else(|| code.clone());
    match kind {
        BasicErrorResponseType::InvalidGrant => VendorError::ui_required(code, message),
        BasicErrorResponseType::Extension(ext) if UI_REQUIRED_CODES.contains(&ext.as_str()) => {
            VendorError::ui_required(code, message)
        }
        _ => VendorError::service(code, message),
    }
}

fn classify_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> VendorError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(resp) => {
            classify_basic(resp.error(), resp.error_description())
        }
        RequestTokenError::Request(e) => VendorError::client("io_error", e.to_string()),
        RequestTokenError::Parse(e, _) => VendorError::client("json_parse_failure", e.to_string()),
        RequestTokenError::Other(msg) => VendorError::client("unknown_error", msg),
    }
}

fn classify_device_error<RE>(err: RequestTokenError<RE, DeviceCodeErrorResponse>) -> VendorError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(resp) => {
            let description = resp.error_description().cloned();
            match resp.error() {
                DeviceCodeErrorResponseType::AccessDenied => VendorError::cancelled(),
                DeviceCodeErrorResponseType::ExpiredToken => VendorError::client(
                    "code_expired",
                    description.unwrap_or_else(|| {
                        "The device code expired before sign-in completed".to_string()
                    }),
                ),
                DeviceCodeErrorResponseType::Basic(kind) => {
                    classify_basic(kind, resp.error_description())
                }
                _ => VendorError::service(
                    "device_code_error",
                    description.unwrap_or_else(|| "Device code polling failed".to_string()),
                ),
            }
        }
        RequestTokenError::Request(e) => VendorError::client("io_error", e.to_string()),
        RequestTokenError::Parse(e, _) => VendorError::client("json_parse_failure", e.to_string()),
        RequestTokenError::Other(msg) => VendorError::client("unknown_error", msg),
    }
}

struct DeviceCodeSession {
    client_id: String,
    authority: Url,
    client: MsClient,
    cache_path: PathBuf,
    cache: Mutex<TokenCache>,
    prompt: PromptFn,
    cancel: Option<watch::Receiver<bool>>,
}

impl DeviceCodeSession {
    fn same_authority(&self, authority: &Url) -> bool {
        authority_key(authority) == authority_key(&self.authority)
    }

    /// Record a token response from `authority` and return what the caller sees.
    async fn store(
        &self,
        authority: &Url,
        requested: &[String],
        response: &MsTokenResponse,
    ) -> Result<TokenResult, VendorError> {
        let mut cache = self.cache.lock().await;

        let account: Account = response
            .extra_fields()
            .id_token
            .as_deref()
            .and_then(account_from_id_token)
            .or_else(|| cache.account.clone())
            .ok_or_else(|| {
                VendorError::service(
                    "missing_id_token",
                    "Token response did not identify the account",
                )
            })?;

        let mut scopes = requested.to_vec();
        if let Some(granted) = response.scopes() {
            for scope in granted.iter() {
                if !scopes.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
                    scopes.push(scope.to_string());
                }
            }
        }

        let token = StoredToken::new(
            response.access_token().secret().to_string(),
            response.expires_in().map(|d| d.as_secs()),
        );

        // A different user replaces the previous one in single-account mode.
        if cache.account.as_ref().map(|a| &a.username) != Some(&account.username) {
            cache.access_tokens.clear();
            cache.refresh_token = None;
        }
        if let Some(refresh_token) = response.refresh_token() {
            cache.refresh_token = Some(refresh_token.secret().to_string());
        }
        cache.account = Some(account.clone());
        cache.insert_access_token(authority, scopes.clone(), token.clone());
        cache.save(&self.cache_path).map_err(io_error)?;

        Ok(TokenResult {
            access_token: token.token,
            expires_on: token.expires_at,
            scopes,
            account: Some(account),
        })
    }

    async fn device_code_flow(&self, scopes: &[String]) -> Result<MsTokenResponse, VendorError> {
        tracing::info!("Initiating device code flow...");

        let request = self
            .client
            .exchange_device_code()
            .map_err(|e| VendorError::client("invalid_parameter", e.to_string()))?;
        let details: StandardDeviceAuthorizationResponse = request_scopes(scopes)
            .into_iter()
            .fold(request, |req, scope| req.add_scope(scope))
            .request_async(async_http_client)
            .await
            .map_err(classify_token_error)?;

        (self.prompt)(&DevicePrompt {
            verification_uri: details.verification_uri().as_str().to_string(),
            user_code: details.user_code().secret().to_string(),
            expires_in: details.expires_in(),
        });

        tracing::info!("Waiting for authentication...");
        self.client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(classify_device_error)
    }
}

#[async_trait]
impl Session for DeviceCodeSession {
    async fn sign_in_interactive(&self, scopes: &[String]) -> Result<TokenResult, VendorError> {
        let response = tokio::select! {
            biased;
            _ = cancelled(self.cancel.clone()) => {
                tracing::info!("User cancelled login.");
                return Err(VendorError::cancelled());
            }
            result = self.device_code_flow(scopes) => result?,
        };

        self.store(&self.authority, scopes, &response).await
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        authority: &Url,
    ) -> Result<TokenResult, VendorError> {
        let refresh_token = {
            let cache = self.cache.lock().await;
            let account = cache.account.clone().ok_or_else(|| {
                VendorError::ui_required("no_account", "No account is signed in")
            })?;

            if let Some(token) = cache.access_token_for(authority, scopes) {
                tracing::debug!("Using cached access token");
                return Ok(TokenResult {
                    access_token: token.token.clone(),
                    expires_on: token.expires_at,
                    scopes: scopes.to_vec(),
                    account: Some(account),
                });
            }

            cache.refresh_token.clone().ok_or_else(|| {
                VendorError::ui_required("no_tokens_found", "No refresh token in cache")
            })?
        };

        let other;
        let client = if self.same_authority(authority) {
            &self.client
        } else {
            other = build_client(&self.client_id, authority)?;
            &other
        };

        tracing::info!("Refreshing access token...");
        let refresh_token = RefreshToken::new(refresh_token);
        let request = client.exchange_refresh_token(&refresh_token);
        let response = request_scopes(scopes)
            .into_iter()
            .fold(request, |req, scope| req.add_scope(scope))
            .request_async(async_http_client)
            .await
            .map_err(classify_token_error)?;

        self.store(authority, scopes, &response).await
    }

    async fn current_account(&self) -> Result<Option<Account>, VendorError> {
        Ok(self.cache.lock().await.account.clone())
    }

    async fn sign_out(&self) -> Result<(), VendorError> {
        let mut cache = self.cache.lock().await;
        *cache = TokenCache::default();
        TokenCache::remove(&self.cache_path).map_err(io_error)
    }
}
