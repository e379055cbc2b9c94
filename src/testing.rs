//! Scripted identity provider for tests
//!
//! Every session operation resolves through a `Completer` from a spawned
//! task, the way a vendor callback lands on another executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use url::Url;

use crate::completion::completion;
use crate::config::ClientConfig;
use crate::provider::{Account, IdentityProvider, Session, TokenResult, VendorError};

pub const USERNAME: &str = "adele@contoso.com";
pub const INTERACTIVE_TOKEN: &str = "interactive-token";
pub const SILENT_TOKEN: &str = "silent-token";

#[derive(Default)]
struct FakeState {
    account: Option<Account>,
    expired: bool,
    interactive_error: Option<VendorError>,
    sign_out_error: Option<VendorError>,
    account_error: Option<VendorError>,
}

#[derive(Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
    create_error: Option<VendorError>,
    init_gate: Option<Arc<Notify>>,
    calls: Arc<AtomicUsize>,
    configs: Mutex<Vec<ClientConfig>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a signed-in account holding a valid token.
    pub fn with_account(self) -> Self {
        self.state.lock().unwrap().account = Some(Account::new(USERNAME));
        self
    }

    /// Silent acquisition reports that interaction is required.
    pub fn expired(self) -> Self {
        self.state.lock().unwrap().expired = true;
        self
    }

    pub fn interactive_error(self, error: VendorError) -> Self {
        self.state.lock().unwrap().interactive_error = Some(error);
        self
    }

    pub fn sign_out_error(self, error: VendorError) -> Self {
        self.state.lock().unwrap().sign_out_error = Some(error);
        self
    }

    pub fn account_error(self, error: VendorError) -> Self {
        self.state.lock().unwrap().account_error = Some(error);
        self
    }

    pub fn create_error(mut self, error: VendorError) -> Self {
        self.create_error = Some(error);
        self
    }

    /// Client creation waits until the returned gate is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.init_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Number of vendor operations invoked so far, client creation included.
    pub fn vendor_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn configs(&self) -> Vec<ClientConfig> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn create_single_account_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Session>, VendorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().push(config.clone());

        if let Some(gate) = &self.init_gate {
            gate.notified().await;
        }
        if let Some(error) = &self.create_error {
            return Err(error.clone());
        }

        Ok(Arc::new(FakeSession {
            state: Arc::clone(&self.state),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    calls: Arc<AtomicUsize>,
}

impl FakeSession {
    /// Run `op` against the shared state on another task and await its callback.
    async fn callback<T, F>(&self, op: F) -> Result<T, VendorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FakeState) -> Result<T, VendorError> + Send + 'static,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (completer, completion) = completion();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let outcome = op(&mut state.lock().unwrap());
            completer.resolve(outcome);
        });
        completion.await
    }
}

fn token(access_token: &str, scopes: &[String], account: Option<Account>) -> TokenResult {
    TokenResult {
        access_token: access_token.to_string(),
        expires_on: None,
        scopes: scopes.to_vec(),
        account,
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn sign_in_interactive(&self, scopes: &[String]) -> Result<TokenResult, VendorError> {
        let scopes = scopes.to_vec();
        self.callback(move |state| {
            if let Some(error) = state.interactive_error.clone() {
                return Err(error);
            }
            let account = Account::new(USERNAME);
            state.account = Some(account.clone());
            state.expired = false;
            Ok(token(INTERACTIVE_TOKEN, &scopes, Some(account)))
        })
        .await
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        _authority: &Url,
    ) -> Result<TokenResult, VendorError> {
        let scopes = scopes.to_vec();
        self.callback(move |state| match &state.account {
            None => Err(VendorError::client(
                "no_current_account",
                "There is no signed-in account",
            )),
            Some(_) if state.expired => Err(VendorError::ui_required(
                "invalid_grant",
                "AADSTS700082: The refresh token has expired",
            )),
            Some(account) => Ok(token(SILENT_TOKEN, &scopes, Some(account.clone()))),
        })
        .await
    }

    async fn current_account(&self) -> Result<Option<Account>, VendorError> {
        self.callback(|state| match state.account_error.clone() {
            Some(error) => Err(error),
            None => Ok(state.account.clone()),
        })
        .await
    }

    async fn sign_out(&self) -> Result<(), VendorError> {
        self.callback(|state| {
            if let Some(error) = state.sign_out_error.clone() {
                return Err(error);
            }
            state.account = None;
            Ok(())
        })
        .await
    }
}
