//! Desktop identity adapter
//!
//! Implements the provider capability with the OAuth2 device code flow
//! against the Microsoft identity platform, keeping one account and its
//! tokens in a per-client cache file.

mod claims;
pub mod oauth;
pub mod tokens;

pub use oauth::{DeviceCodeProvider, DevicePrompt, PromptFn};
pub use tokens::{StoredToken, TokenCache};
