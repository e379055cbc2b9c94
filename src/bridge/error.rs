//! Bridge error taxonomy and its wire form

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::completion::Abandoned;
use crate::provider::{VendorError, VendorErrorKind};

/// Everything a dispatched request can fail with. `code()` is the identifier
/// callers branch on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Method '{0}' is not implemented")]
    NotImplemented(String),

    #[error("Call arguments must be a map")]
    InvalidArguments,

    #[error("Call must include a config file path")]
    NoConfig,

    #[error("Call must include a scope")]
    NoScope,

    #[error("Invalid scope list: {0}")]
    InvalidScopes(String),

    #[error("Call must include an authority")]
    NoAuthority,

    #[error("Unable to create authority URL from '{0}'")]
    InvalidAuthority(String),

    #[error("Client not initialized")]
    NotInitialized,

    #[error("Client initialization has not completed")]
    InitPending,

    #[error("Client initialization already in progress")]
    InitInProgress,

    #[error("Unable to create client application: {0}")]
    Config(String),

    /// Fault inside the identity library.
    #[error("{}", .0.message)]
    Client(VendorError),

    /// The identity service rejected the request.
    #[error("{}", .0.message)]
    Service(VendorError),

    /// Silent acquisition needs the interactive flow.
    #[error("{}", .0.message)]
    UiRequired(VendorError),

    #[error("User cancelled login.")]
    UserCancel,

    /// Account lookup failure.
    #[error("{}", .0.message)]
    Account(VendorError),

    #[error("{}", .0.message)]
    SignOut(VendorError),

    #[error("Request completed without a result")]
    NoResult,
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NotImplemented(_) => "NOT_IMPLEMENTED",
            BridgeError::InvalidArguments => "INVALID_ARGUMENTS",
            BridgeError::NoConfig => "NO_CONFIG",
            BridgeError::NoScope | BridgeError::InvalidScopes(_) => "NO_SCOPE",
            BridgeError::NoAuthority => "NO_AUTHORITY",
            BridgeError::InvalidAuthority(_) => "INVALID_AUTHORITY",
            BridgeError::NotInitialized | BridgeError::InitPending => "NO_SESSION",
            BridgeError::InitInProgress => "INIT_IN_PROGRESS",
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Client(_) => "MsalClientException",
            BridgeError::Service(_) => "MsalServiceException",
            BridgeError::UiRequired(_) => "MsalUiRequiredException",
            BridgeError::UserCancel => "MsalUserCancel",
            BridgeError::Account(_) => "MsalException",
            BridgeError::SignOut(_) => "ERROR",
            BridgeError::NoResult => "NO_RESULT",
        }
    }

    /// The underlying vendor error, for vendor-originated failures.
    pub fn vendor(&self) -> Option<&VendorError> {
        match self {
            BridgeError::Client(e)
            | BridgeError::Service(e)
            | BridgeError::UiRequired(e)
            | BridgeError::Account(e)
            | BridgeError::SignOut(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_ui_required(&self) -> bool {
        matches!(self, BridgeError::UiRequired(_))
    }

    /// Wire form: vendor failures carry the vendor's own error code as the
    /// message, and its description in `details`.
    pub fn to_reply(&self) -> ErrorReply {
        match self.vendor() {
            Some(vendor) => ErrorReply {
                code: self.code().to_string(),
                message: vendor.code.clone(),
                details: Some(json!({ "description": vendor.message })),
            },
            None => ErrorReply {
                code: self.code().to_string(),
                message: self.to_string(),
                details: None,
            },
        }
    }
}

/// Token-path mapping: classification decides the tag, the code passes through.
impl From<VendorError> for BridgeError {
    fn from(error: VendorError) -> Self {
        match error.kind {
            VendorErrorKind::Client => BridgeError::Client(error),
            VendorErrorKind::Service => BridgeError::Service(error),
            VendorErrorKind::UiRequired => BridgeError::UiRequired(error),
            VendorErrorKind::Cancelled => BridgeError::UserCancel,
        }
    }
}

impl Abandoned for BridgeError {
    fn abandoned() -> Self {
        BridgeError::NoResult
    }
}

/// Structured error as seen by the calling application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl From<&BridgeError> for ErrorReply {
    fn from(error: &BridgeError) -> Self {
        error.to_reply()
    }
}
