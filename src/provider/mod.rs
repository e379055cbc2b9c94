//! Identity provider capability
//!
//! The narrow interface a platform adapter implements so the bridge can drive
//! a single-account identity library without knowing how tokens are
//! exchanged or cached.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::completion::Abandoned;
use crate::config::ClientConfig;

/// The single cached account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub home_account_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl Account {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            home_account_id: None,
            tenant_id: None,
        }
    }
}

/// Outcome of a successful token acquisition.
#[derive(Debug, Clone)]
pub struct TokenResult {
    pub access_token: String,
    pub expires_on: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub account: Option<Account>,
}

/// Vendor classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorErrorKind {
    /// Fault inside the library or its local configuration.
    Client,
    /// The identity service rejected the request.
    Service,
    /// The operation cannot proceed without user interaction.
    UiRequired,
    /// The user dismissed the interactive flow.
    Cancelled,
}

impl fmt::Display for VendorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VendorErrorKind::Client => "client",
            VendorErrorKind::Service => "service",
            VendorErrorKind::UiRequired => "ui_required",
            VendorErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Error reported by the identity library. `code` is the library's own error
/// code and is surfaced to callers unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error {code}: {message}")]
pub struct VendorError {
    pub kind: VendorErrorKind,
    pub code: String,
    pub message: String,
}

impl VendorError {
    pub fn new(kind: VendorErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn client(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VendorErrorKind::Client, code, message)
    }

    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VendorErrorKind::Service, code, message)
    }

    pub fn ui_required(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(VendorErrorKind::UiRequired, code, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            VendorErrorKind::Cancelled,
            "user_cancelled",
            "User cancelled login.",
        )
    }

    pub fn is_ui_required(&self) -> bool {
        self.kind == VendorErrorKind::UiRequired
    }
}

impl Abandoned for VendorError {
    fn abandoned() -> Self {
        VendorError::client("abandoned", "Operation completed without a result")
    }
}

/// Creates single-account client sessions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_single_account_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Session>, VendorError>;
}

/// A constructed single-account client.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run the interactive sign-in flow for `scopes`.
    async fn sign_in_interactive(&self, scopes: &[String]) -> Result<TokenResult, VendorError>;

    /// Acquire a token for the cached account without user interaction.
    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        authority: &Url,
    ) -> Result<TokenResult, VendorError>;

    /// The cached account, if one is signed in.
    async fn current_account(&self) -> Result<Option<Account>, VendorError>;

    /// Remove the cached account and its tokens.
    async fn sign_out(&self) -> Result<(), VendorError>;
}
