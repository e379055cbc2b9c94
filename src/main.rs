//! msal-bridge CLI
//!
//! Drives the authentication bridge from the terminal, or serves it as a
//! JSON-lines method channel on stdin/stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msal_bridge::auth::{DeviceCodeProvider, DevicePrompt};
use msal_bridge::bridge::{AuthBridge, BridgeOptions, MethodCall, Reply, SilentFallback};
use msal_bridge::channel;
use msal_bridge::config::{Settings, DEFAULT_AUTHORITY};

const DEFAULT_SCOPE: &str = "User.Read";

#[derive(Parser)]
#[command(name = "msal-bridge")]
#[command(about = "Microsoft identity sign-in behind a method-call bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// MSAL-style JSON client configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Application (client) id, used when no config file is given
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Authority URL, e.g. https://login.microsoftonline.com/common
    #[arg(short, long, global = true)]
    authority: Option<String>,

    /// Scope to request (repeatable)
    #[arg(short, long = "scope", global = true)]
    scopes: Vec<String>,

    /// What silent acquisition does when it needs the user
    #[arg(long, global = true, value_enum)]
    silent_fallback: Option<SilentFallback>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with the device code flow and print the access token
    Login,

    /// Acquire a token silently for the signed-in account
    Token,

    /// Show the signed-in account
    Account,

    /// Sign out and clear cached tokens
    Logout,

    /// Dispatch a raw method call after init
    Call {
        /// Method name, e.g. acquireTokenSilently
        method: String,

        /// Extra arguments as a JSON object, merged over the defaults
        #[arg(long)]
        args: Option<String>,
    },

    /// Serve JSON-lines method calls on stdin/stdout
    Serve,
}

impl Cli {
    /// Base call arguments from flags, then settings, then defaults.
    fn arguments(&self, settings: &Settings) -> Result<Map<String, Value>> {
        let mut args = Map::new();

        if let Some(path) = self.config.as_ref().or(settings.config_path.as_ref()) {
            args.insert("configPath".into(), json!(path.to_string_lossy()));
        } else if let Some(id) = self.client_id.as_ref().or(settings.client_id.as_ref()) {
            args.insert("kClientID".into(), json!(id));
        }

        let scopes = if !self.scopes.is_empty() {
            self.scopes.clone()
        } else if !settings.scopes.is_empty() {
            settings.scopes.clone()
        } else {
            vec![DEFAULT_SCOPE.to_string()]
        };
        args.insert("kScopes".into(), json!(scopes));

        let authority = self
            .authority
            .as_deref()
            .or(settings.authority.as_deref())
            .unwrap_or(DEFAULT_AUTHORITY);
        args.insert("kAuthority".into(), json!(authority));

        if !args.contains_key("configPath") && !args.contains_key("kClientID") {
            bail!("No client configured. Pass --config or --client-id, or set one in the settings file.");
        }
        Ok(args)
    }
}

fn print_device_prompt(prompt: &DevicePrompt) {
    eprintln!();
    eprintln!("To sign in, visit: {}", prompt.verification_uri);
    eprintln!("Enter code:        {}", prompt.user_code);
    eprintln!();
}

/// Turn an error reply into a CLI failure.
fn expect_success(reply: Reply) -> Result<Option<String>> {
    reply.map_err(|e| {
        let reply = e.to_reply();
        anyhow::anyhow!("{} ({})", reply.code, reply.message)
    })
}

async fn call(bridge: &AuthBridge, method: &str, args: &Map<String, Value>) -> Result<Option<String>> {
    expect_success(
        bridge
            .dispatch(MethodCall::new(method, Value::Object(args.clone())))
            .await,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for results and the channel
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let provider = DeviceCodeProvider::new(Settings::cache_dir()?, Arc::new(print_device_prompt))
        .with_cancel(cancel_rx);
    let options = BridgeOptions {
        silent_fallback: cli.silent_fallback.unwrap_or(settings.silent_fallback),
    };
    let bridge = AuthBridge::with_options(Arc::new(provider), options);

    if let Commands::Serve = cli.command {
        tracing::info!("Serving method channel on stdio");
        return tokio::select! {
            result = channel::serve_stdio(bridge) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                Ok(())
            }
        };
    }

    let args = cli.arguments(&settings)?;
    call(&bridge, "init", &args).await?;

    match &cli.command {
        Commands::Login => {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = cancel_tx.send(true);
                }
            });

            tracing::info!("Starting interactive sign-in...");
            if let Some(token) = call(&bridge, "acquireTokenInteractively", &args).await? {
                println!("{}", token);
            }
        }
        Commands::Token => {
            if let Some(token) = call(&bridge, "acquireTokenSilently", &args).await? {
                println!("{}", token);
            }
        }
        Commands::Account => match call(&bridge, "loadAccount", &args).await? {
            Some(username) => println!("{}", username),
            None => println!("No account signed in."),
        },
        Commands::Logout => {
            call(&bridge, "signOut", &args).await?;
            println!("Logged out.");
        }
        Commands::Call { method, args: extra } => {
            let mut merged = args.clone();
            if let Some(extra) = extra {
                let extra: Map<String, Value> =
                    serde_json::from_str(extra).context("--args must be a JSON object")?;
                merged.extend(extra);
            }
            let result = call(&bridge, method, &merged).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Commands::Serve => {}
    }

    Ok(())
}
