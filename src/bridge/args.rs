//! Method names and argument validation
//!
//! All checks here are local and run before the session is consulted, so a
//! malformed call never reaches the identity library.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::BridgeError;

pub const CONFIG_PATH: &str = "configPath";
pub const CLIENT_ID: &str = "kClientID";
pub const SCOPES: &str = "kScopes";
pub const AUTHORITY: &str = "kAuthority";

/// A request as it crosses the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Init,
    AcquireTokenInteractively,
    AcquireTokenSilently,
    LoadAccount,
    SignOut,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Init => "init",
            Method::AcquireTokenInteractively => "acquireTokenInteractively",
            Method::AcquireTokenSilently => "acquireTokenSilently",
            Method::LoadAccount => "loadAccount",
            Method::SignOut => "signOut",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Method::Init),
            "acquireTokenInteractively" => Ok(Method::AcquireTokenInteractively),
            "acquireTokenSilently" => Ok(Method::AcquireTokenSilently),
            "loadAccount" => Ok(Method::LoadAccount),
            "signOut" => Ok(Method::SignOut),
            other => Err(BridgeError::NotImplemented(other.to_string())),
        }
    }
}

/// Where `init` reads the client configuration from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Path(PathBuf),
    ClientId(String),
}

/// Validated call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallArguments {
    pub config: ConfigSource,
    pub scopes: Vec<String>,
    pub authority: Url,
}

impl CallArguments {
    /// Validate in order: config source, scopes, authority.
    pub fn parse(arguments: &Value) -> Result<Self, BridgeError> {
        let empty = Map::new();
        let map = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(BridgeError::InvalidArguments),
        };

        let config = config_source(map)?;
        let scopes = scopes(map)?;
        let authority = authority(map)?;

        Ok(Self {
            config,
            scopes,
            authority,
        })
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn config_source(map: &Map<String, Value>) -> Result<ConfigSource, BridgeError> {
    if let Some(path) = non_empty_str(map, CONFIG_PATH) {
        return Ok(ConfigSource::Path(PathBuf::from(path)));
    }
    if let Some(client_id) = non_empty_str(map, CLIENT_ID) {
        return Ok(ConfigSource::ClientId(client_id.to_string()));
    }
    Err(BridgeError::NoConfig)
}

fn scopes(map: &Map<String, Value>) -> Result<Vec<String>, BridgeError> {
    let items = match map.get(SCOPES) {
        None | Some(Value::Null) => return Err(BridgeError::NoScope),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(BridgeError::InvalidScopes(
                "kScopes must be a list of strings".to_string(),
            ))
        }
    };

    if items.is_empty() {
        return Err(BridgeError::NoScope);
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item.as_str().map(str::trim) {
            Some(scope) if !scope.is_empty() => Ok(scope.to_string()),
            _ => Err(BridgeError::InvalidScopes(format!(
                "scope at index {} must be a non-empty string",
                i
            ))),
        })
        .collect()
}

fn authority(map: &Map<String, Value>) -> Result<Url, BridgeError> {
    let raw = match map.get(AUTHORITY) {
        None | Some(Value::Null) => return Err(BridgeError::NoAuthority),
        Some(Value::String(s)) => s.trim(),
        Some(other) => return Err(BridgeError::InvalidAuthority(other.to_string())),
    };
    if raw.is_empty() {
        return Err(BridgeError::NoAuthority);
    }

    match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() => Ok(url),
        _ => Err(BridgeError::InvalidAuthority(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "kClientID": "abc",
            "kScopes": ["User.Read"],
            "kAuthority": "https://login.microsoftonline.com/common",
        })
    }

    #[test]
    fn test_parse_valid_arguments() {
        let args = CallArguments::parse(&valid()).unwrap();
        assert_eq!(args.config, ConfigSource::ClientId("abc".to_string()));
        assert_eq!(args.scopes, vec!["User.Read"]);
        assert_eq!(args.authority.host_str(), Some("login.microsoftonline.com"));
    }

    #[test]
    fn test_config_path_preferred() {
        let mut args = valid();
        args["configPath"] = json!("assets/auth_config.json");
        let args = CallArguments::parse(&args).unwrap();
        assert_eq!(
            args.config,
            ConfigSource::Path(PathBuf::from("assets/auth_config.json"))
        );
    }

    #[test]
    fn test_missing_config() {
        let mut args = valid();
        args.as_object_mut().unwrap().remove("kClientID");
        assert_eq!(CallArguments::parse(&args), Err(BridgeError::NoConfig));
    }

    #[test]
    fn test_config_checked_before_scopes() {
        assert_eq!(CallArguments::parse(&json!({})), Err(BridgeError::NoConfig));
        assert_eq!(CallArguments::parse(&Value::Null), Err(BridgeError::NoConfig));
    }

    #[test]
    fn test_missing_and_empty_scopes() {
        let mut args = valid();
        args.as_object_mut().unwrap().remove("kScopes");
        assert_eq!(CallArguments::parse(&args), Err(BridgeError::NoScope));

        args["kScopes"] = json!([]);
        assert_eq!(CallArguments::parse(&args), Err(BridgeError::NoScope));
    }

    #[test]
    fn test_malformed_scopes() {
        let mut args = valid();
        args["kScopes"] = json!(["User.Read", ""]);
        let err = CallArguments::parse(&args).unwrap_err();
        assert_eq!(err.code(), "NO_SCOPE");

        args["kScopes"] = json!("User.Read");
        assert!(matches!(
            CallArguments::parse(&args),
            Err(BridgeError::InvalidScopes(_))
        ));
    }

    #[test]
    fn test_scope_order_kept() {
        let mut args = valid();
        args["kScopes"] = json!(["Mail.Read", "User.Read", "Calendars.Read"]);
        let args = CallArguments::parse(&args).unwrap();
        assert_eq!(args.scopes, vec!["Mail.Read", "User.Read", "Calendars.Read"]);
    }

    #[test]
    fn test_authority_validation() {
        let mut args = valid();
        args.as_object_mut().unwrap().remove("kAuthority");
        assert_eq!(CallArguments::parse(&args), Err(BridgeError::NoAuthority));

        args["kAuthority"] = json!("not a url");
        assert_eq!(
            CallArguments::parse(&args).unwrap_err().code(),
            "INVALID_AUTHORITY"
        );

        args["kAuthority"] = json!("mailto:someone@example.com");
        assert_eq!(
            CallArguments::parse(&args).unwrap_err().code(),
            "INVALID_AUTHORITY"
        );
    }

    #[test]
    fn test_non_map_arguments() {
        assert_eq!(
            CallArguments::parse(&json!(["x"])),
            Err(BridgeError::InvalidArguments)
        );
    }

    #[test]
    fn test_method_names() {
        for method in [
            Method::Init,
            Method::AcquireTokenInteractively,
            Method::AcquireTokenSilently,
            Method::LoadAccount,
            Method::SignOut,
        ] {
            assert_eq!(method.as_str().parse::<Method>(), Ok(method));
        }
        assert_eq!(
            "getAccounts".parse::<Method>(),
            Err(BridgeError::NotImplemented("getAccounts".to_string()))
        );
    }
}
