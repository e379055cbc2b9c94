//! msal-bridge - Microsoft identity sign-in behind a method-call bridge
//!
//! A host application sends named method calls (`init`,
//! `acquireTokenInteractively`, `acquireTokenSilently`, `loadAccount`,
//! `signOut`) and gets back one success value or one tagged error per call.
//! Token exchange and caching stay with the identity provider behind
//! [`provider::IdentityProvider`].

pub mod auth;
pub mod bridge;
pub mod channel;
pub mod completion;
pub mod config;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{AuthBridge, BridgeError, BridgeOptions, MethodCall, Reply, SilentFallback};
pub use provider::{IdentityProvider, Session, VendorError};
