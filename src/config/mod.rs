//! Client configuration and CLI settings
//!
//! `ClientConfig` follows the MSAL configuration JSON layout so existing
//! `auth_config.json` files can be passed through `configPath` unchanged.

mod settings;

pub use settings::Settings;

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Authority used when a configuration names none.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";

const AAD_INSTANCE: &str = "https://login.microsoftonline.com";

/// Account cache mode. Only single-account clients are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountMode {
    #[default]
    Single,
    Multiple,
}

/// Audience restriction of an AAD authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// One entry of the `authorities` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    #[serde(rename = "type", default = "default_authority_type")]
    pub kind: String,
    #[serde(default)]
    pub authority_url: Option<Url>,
    #[serde(default)]
    pub audience: Option<Audience>,
    #[serde(default)]
    pub default: bool,
}

fn default_authority_type() -> String {
    "AAD".to_string()
}

impl AuthorityConfig {
    /// Resolve to a concrete authority URL.
    pub fn url(&self) -> Result<Url> {
        if let Some(url) = &self.authority_url {
            return Ok(url.clone());
        }

        let tenant = match &self.audience {
            None => "common".to_string(),
            Some(audience) => match audience.kind.as_str() {
                "AzureADandPersonalMicrosoftAccount" => "common".to_string(),
                "AzureADMultipleOrgs" => "organizations".to_string(),
                "PersonalMicrosoftAccount" => "consumers".to_string(),
                "AzureADMyOrg" => audience
                    .tenant_id
                    .clone()
                    .context("AzureADMyOrg audience requires a tenant_id")?,
                other => bail!("Unsupported audience type '{}'", other),
            },
        };

        Url::parse(&format!("{}/{}", AAD_INSTANCE, tenant))
            .with_context(|| format!("Invalid tenant '{}'", tenant))
    }
}

/// Configuration handed to the identity provider when a client is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default)]
    pub authorities: Vec<AuthorityConfig>,
}

impl ClientConfig {
    /// Minimal configuration for a bare client id.
    pub fn for_client_id(client_id: impl Into<String>, authority: Url) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: None,
            account_mode: AccountMode::Single,
            authorities: vec![AuthorityConfig {
                kind: default_authority_type(),
                authority_url: Some(authority),
                audience: None,
                default: true,
            }],
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).context("Failed to parse client configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Could not open config file {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            bail!("client_id must not be empty");
        }
        if self.account_mode != AccountMode::Single {
            bail!("account_mode must be SINGLE");
        }
        // Surface audience errors at init rather than at first sign-in.
        self.authority()?;
        Ok(())
    }

    /// The default authority, else the first listed, else the common endpoint.
    pub fn authority(&self) -> Result<Url> {
        let chosen = self
            .authorities
            .iter()
            .find(|a| a.default)
            .or_else(|| self.authorities.first());

        match chosen {
            Some(authority) => authority.url(),
            None => Url::parse(DEFAULT_AUTHORITY).context("Invalid default authority"),
        }
    }
}
