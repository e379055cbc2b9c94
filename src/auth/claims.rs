//! Account details from the `id_token`
//!
//! Only the payload is read. The token arrived over TLS straight from the
//! token endpoint, so its signature is not checked here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::provider::Account;

#[derive(Debug, Default, Deserialize)]
struct IdClaims {
    preferred_username: Option<String>,
    upn: Option<String>,
    email: Option<String>,
    oid: Option<String>,
    tid: Option<String>,
}

/// Build the account from an encoded JWT, or `None` if it cannot be read or
/// names no user.
pub fn account_from_id_token(id_token: &str) -> Option<Account> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: IdClaims = serde_json::from_slice(&bytes).ok()?;

    let username = claims
        .preferred_username
        .or(claims.upn)
        .or(claims.email)?;

    let home_account_id = match (&claims.oid, &claims.tid) {
        (Some(oid), Some(tid)) => Some(format!("{}.{}", oid, tid)),
        _ => None,
    };

    Some(Account {
        username,
        home_account_id,
        tenant_id: claims.tid,
    })
}
