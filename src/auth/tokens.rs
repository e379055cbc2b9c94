//! Token cache for the device-code adapter

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::provider::Account;

/// Tokens closer than this to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 300;

/// Stored access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .map(|ttl| Utc::now() + ttl);

        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= exp,
            None => false,
        }
    }
}

/// Access token, the authority that issued it and the scopes it was granted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAccessToken {
    #[serde(default)]
    pub authority: String,
    pub scopes: Vec<String>,
    pub token: StoredToken,
}

/// Authorities compare without a trailing slash.
pub(super) fn authority_key(authority: &Url) -> String {
    authority.as_str().trim_end_matches('/').to_string()
}

impl CachedAccessToken {
    fn issued_by(&self, authority: &Url) -> bool {
        self.authority == authority_key(authority)
    }

    fn covers(&self, scopes: &[String]) -> bool {
        scopes
            .iter()
            .all(|wanted| self.scopes.iter().any(|s| s.eq_ignore_ascii_case(wanted)))
    }
}

/// Per-client cache: one account, its refresh token and access tokens.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCache {
    pub refresh_token: Option<String>,
    pub account: Option<Account>,
    #[serde(default)]
    pub access_tokens: Vec<CachedAccessToken>,
}

impl TokenCache {
    /// Load the cache; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read token cache")?;
        toml::from_str(&content).context("Failed to parse token cache")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create cache directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize token cache")?;
        fs::write(path, content).context("Failed to write token cache")?;

        // Set restrictive permissions on the cache file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set cache permissions")?;
        }

        Ok(())
    }

    /// Delete the cache file.
    pub fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).context("Failed to remove token cache")?;
        }
        Ok(())
    }

    /// A non-expired access token from `authority` whose scopes cover `scopes`.
    pub fn access_token_for(&self, authority: &Url, scopes: &[String]) -> Option<&StoredToken> {
        self.access_tokens
            .iter()
            .find(|t| t.issued_by(authority) && t.covers(scopes) && !t.token.is_expired())
            .map(|t| &t.token)
    }

    /// Record a token, replacing any entry from the same authority granted
    /// for the same scopes.
    pub fn insert_access_token(&mut self, authority: &Url, scopes: Vec<String>, token: StoredToken) {
        let entry = CachedAccessToken {
            authority: authority_key(authority),
            scopes,
            token,
        };
        self.access_tokens.retain(|t| {
            !(t.authority == entry.authority && t.covers(&entry.scopes) && entry.covers(&t.scopes))
        });
        self.access_tokens.retain(|t| !t.token.is_expired());
        self.access_tokens.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn common() -> Url {
        Url::parse("https://login.microsoftonline.com/common").unwrap()
    }

    #[test]
    fn test_expiry_with_skew() {
        assert!(!StoredToken::new("t".into(), Some(3600)).is_expired());
        assert!(StoredToken::new("t".into(), Some(60)).is_expired());
        assert!(!StoredToken::new("t".into(), None).is_expired());
    }

    #[test]
    fn test_access_token_scope_cover() {
        let mut cache = TokenCache::default();
        cache.insert_access_token(
            &common(),
            scopes(&["User.Read", "Mail.Read", "openid"]),
            StoredToken::new("a".into(), Some(3600)),
        );

        assert_eq!(
            cache.access_token_for(&common(), &scopes(&["user.read"])).map(|t| t.token.as_str()),
            Some("a")
        );
        assert!(cache.access_token_for(&common(), &scopes(&["Files.Read"])).is_none());
    }

    #[test]
    fn test_expired_token_not_returned() {
        let mut cache = TokenCache::default();
        cache.access_tokens.push(CachedAccessToken {
            authority: authority_key(&common()),
            scopes: scopes(&["User.Read"]),
            token: StoredToken::new("old".into(), Some(10)),
        });
        assert!(cache.access_token_for(&common(), &scopes(&["User.Read"])).is_none());
    }

    #[test]
    fn test_insert_replaces_same_scopes() {
        let mut cache = TokenCache::default();
        cache.insert_access_token(&common(), scopes(&["User.Read"]), StoredToken::new("a".into(), Some(3600)));
        cache.insert_access_token(&common(), scopes(&["user.read"]), StoredToken::new("b".into(), Some(3600)));
        cache.insert_access_token(&common(), scopes(&["Mail.Read"]), StoredToken::new("c".into(), Some(3600)));

        assert_eq!(cache.access_tokens.len(), 2);
        assert_eq!(
            cache.access_token_for(&common(), &scopes(&["User.Read"])).map(|t| t.token.as_str()),
            Some("b")
        );
    }

    #[test]
    fn test_tokens_kept_per_authority() {
        let tenant_a = Url::parse("https://login.microsoftonline.com/tenant-a").unwrap();
        let tenant_b = Url::parse("https://login.microsoftonline.com/tenant-b/").unwrap();

        let mut cache = TokenCache::default();
        cache.insert_access_token(&tenant_a, scopes(&["User.Read"]), StoredToken::new("a".into(), Some(3600)));
        assert!(cache.access_token_for(&tenant_b, &scopes(&["User.Read"])).is_none());

        cache.insert_access_token(&tenant_b, scopes(&["User.Read"]), StoredToken::new("b".into(), Some(3600)));
        assert_eq!(cache.access_tokens.len(), 2);
        assert_eq!(
            cache.access_token_for(&tenant_a, &scopes(&["User.Read"])).map(|t| t.token.as_str()),
            Some("a")
        );
        let tenant_b = Url::parse("https://login.microsoftonline.com/tenant-b").unwrap();
        assert_eq!(
            cache.access_token_for(&tenant_b, &scopes(&["User.Read"])).map(|t| t.token.as_str()),
            Some("b")
        );
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.toml");

        assert_eq!(TokenCache::load(&path).unwrap(), TokenCache::default());

        let mut cache = TokenCache {
            refresh_token: Some("rt".into()),
            account: Some(Account::new("adele@contoso.com")),
            access_tokens: Vec::new(),
        };
        cache.insert_access_token(&common(), scopes(&["User.Read"]), StoredToken::new("a".into(), Some(3600)));
        cache.save(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = TokenCache::load(&path).unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt"));
        assert_eq!(loaded.account, cache.account);
        assert_eq!(loaded.access_tokens.len(), 1);

        TokenCache::remove(&path).unwrap();
        assert!(!path.exists());
        TokenCache::remove(&path).unwrap();
    }
}
