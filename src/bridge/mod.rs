//! Authentication bridge
//!
//! Receives named method calls, validates their arguments, gates every
//! operation on a ready client session and converts the identity library's
//! outcome into one success value or one tagged error.
//!
//! Session lifecycle is an explicit state machine held in a `watch` channel:
//! `Uninitialized -> Initializing -> Ready`. Only `init` moves it; every
//! other method requires `Ready` and fails fast otherwise.

mod args;
mod error;

pub use args::{CallArguments, ConfigSource, Method, MethodCall};
pub use error::{BridgeError, ErrorReply};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::completion::Completer;
use crate::config::ClientConfig;
use crate::provider::{IdentityProvider, Session, VendorError};

/// Outcome of one dispatched request: a string (or null) on success.
pub type Reply = Result<Option<String>, BridgeError>;

/// Success value returned by `signOut`.
pub const SIGN_OUT_SUCCESS: &str = "SUCCESS";

/// What silent acquisition does when it cannot proceed without the user.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SilentFallback {
    /// Report `MsalUiRequiredException` and let the caller decide.
    #[default]
    Never,
    /// Run the interactive flow within the same request.
    Interactive,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    pub silent_fallback: SilentFallback,
}

/// Observable session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Ready,
}

enum SessionState {
    Uninitialized,
    Initializing,
    Ready(Arc<dyn Session>),
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Uninitialized => SessionPhase::Uninitialized,
            SessionState::Initializing => SessionPhase::Initializing,
            SessionState::Ready(_) => SessionPhase::Ready,
        }
    }
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<SessionState>,
    options: BridgeOptions,
}

/// Resets the state to `Uninitialized` if an `init` is abandoned midway.
struct InitGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl InitGuard<'_> {
    fn complete(mut self, next: SessionState) {
        self.armed = false;
        self.state.send_replace(next);
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Initialization abandoned, client left uninitialized");
            self.state.send_replace(SessionState::Uninitialized);
        }
    }
}

/// Cheaply cloneable handle; clones share one session.
#[derive(Clone)]
pub struct AuthBridge {
    inner: Arc<Inner>,
}

impl AuthBridge {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self::with_options(provider, BridgeOptions::default())
    }

    pub fn with_options(provider: Arc<dyn IdentityProvider>, options: BridgeOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                provider,
                state,
                options,
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.borrow().phase()
    }

    pub fn options(&self) -> BridgeOptions {
        self.inner.options
    }

    /// Dispatch on a spawned task and resolve `reply` exactly once. Returns
    /// immediately.
    pub fn handle(&self, call: MethodCall, reply: Completer<Option<String>, BridgeError>) {
        let bridge = self.clone();
        tokio::spawn(async move {
            let outcome = bridge.dispatch(call).await;
            reply.resolve(outcome);
        });
    }

    /// Validate and run one request.
    pub async fn dispatch(&self, call: MethodCall) -> Reply {
        let span = tracing::info_span!(
            "dispatch",
            method = %call.method,
            request_id = %Uuid::new_v4(),
        );

        async move {
            let outcome = self.dispatch_inner(&call).await;
            match &outcome {
                Ok(_) => tracing::debug!("Request succeeded"),
                Err(e) => tracing::debug!(code = e.code(), "Request failed: {}", e),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn dispatch_inner(&self, call: &MethodCall) -> Reply {
        let method: Method = call.method.parse()?;
        let args = CallArguments::parse(&call.arguments)?;

        match method {
            Method::Init => self.init(&args).await,
            Method::AcquireTokenInteractively => {
                let session = self.session()?;
                Self::acquire_interactive(session.as_ref(), &args.scopes).await
            }
            Method::AcquireTokenSilently => {
                let session = self.session()?;
                self.acquire_silent(session.as_ref(), &args).await
            }
            Method::LoadAccount => Self::load_account(self.session()?.as_ref()).await,
            Method::SignOut => Self::sign_out(self.session()?.as_ref()).await,
        }
    }

    fn session(&self) -> Result<Arc<dyn Session>, BridgeError> {
        match &*self.inner.state.borrow() {
            SessionState::Ready(session) => Ok(Arc::clone(session)),
            SessionState::Initializing => Err(BridgeError::InitPending),
            SessionState::Uninitialized => Err(BridgeError::NotInitialized),
        }
    }

    async fn init(&self, args: &CallArguments) -> Reply {
        let state = &self.inner.state;
        let claimed = state.send_if_modified(|current| {
            if matches!(current, SessionState::Initializing) {
                false
            } else {
                *current = SessionState::Initializing;
                true
            }
        });
        if !claimed {
            return Err(BridgeError::InitInProgress);
        }

        let guard = InitGuard { state, armed: true };
        match self.create_session(args).await {
            Ok(session) => {
                guard.complete(SessionState::Ready(session));
                tracing::info!("Client initialized");
                Ok(None)
            }
            Err(e) => {
                guard.complete(SessionState::Uninitialized);
                tracing::warn!("Client initialization failed: {}", e);
                Err(e)
            }
        }
    }

    async fn create_session(&self, args: &CallArguments) -> Result<Arc<dyn Session>, BridgeError> {
        let config = match &args.config {
            ConfigSource::Path(path) => ClientConfig::load(path)
                .await
                .map_err(|e| BridgeError::Config(format!("{:#}", e)))?,
            ConfigSource::ClientId(client_id) => {
                let config = ClientConfig::for_client_id(client_id, args.authority.clone());
                config
                    .validate()
                    .map_err(|e| BridgeError::Config(format!("{:#}", e)))?;
                config
            }
        };

        self.inner
            .provider
            .create_single_account_client(&config)
            .await
            .map_err(|e| BridgeError::Config(e.to_string()))
    }

    async fn acquire_interactive(session: &dyn Session, scopes: &[String]) -> Reply {
        let result = session.sign_in_interactive(scopes).await?;
        tracing::info!("Interactive sign-in succeeded");
        Ok(Some(result.access_token))
    }

    async fn acquire_silent(&self, session: &dyn Session, args: &CallArguments) -> Reply {
        let fallback = self.inner.options.silent_fallback;

        let account = session.current_account().await?;
        if account.is_none() {
            if fallback == SilentFallback::Interactive {
                tracing::info!("No cached account, falling back to interactive sign-in");
                return Self::acquire_interactive(session, &args.scopes).await;
            }
            return Err(BridgeError::UiRequired(VendorError::ui_required(
                "no_account",
                "No account is signed in",
            )));
        }

        match Self::silent_token(session, &args.scopes, &args.authority).await {
            Err(e) if e.is_ui_required() && fallback == SilentFallback::Interactive => {
                tracing::info!("Silent acquisition needs interaction, falling back");
                Self::acquire_interactive(session, &args.scopes).await
            }
            other => other,
        }
    }

    async fn silent_token(session: &dyn Session, scopes: &[String], authority: &Url) -> Reply {
        let result = session.acquire_token_silent(scopes, authority).await?;
        Ok(Some(result.access_token))
    }

    async fn load_account(session: &dyn Session) -> Reply {
        let account = session
            .current_account()
            .await
            .map_err(BridgeError::Account)?;
        if account.is_none() {
            tracing::debug!("No account");
        }
        Ok(account.map(|a| a.username))
    }

    async fn sign_out(session: &dyn Session) -> Reply {
        session.sign_out().await.map_err(BridgeError::SignOut)?;
        tracing::info!("Signed out");
        Ok(Some(SIGN_OUT_SUCCESS.to_string()))
    }
}
