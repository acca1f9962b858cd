//! Example toolkit process.
//!
//! Registers three tools and serves them to the coordinating server until
//! Ctrl-C:
//!
//! - `echo`: returns its `text` parameter
//! - `whoami`: requires a caller auth token and reports a masked form of it
//! - `counter`: an interactive app keeping a running count per session
//!
//! ```text
//! ATP_API_KEY=... atp-demo --app-name demo --listen 127.0.0.1:8080
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use atp_client::prelude::*;
use atp_client::{LoggingConfig, ToolkitDirectory, routes};
use clap::{Parser, ValueEnum};
use serde_json::{Value, json};
use tracing::{info, warn};

/// Command line of the demo toolkit.
#[derive(Parser, Debug)]
#[command(name = "atp-demo", version, about = "Serve example tools to an ATP server")]
struct Cli {
    /// Toolkit API key
    #[arg(long, env = "ATP_API_KEY")]
    api_key: Option<String>,

    /// Application name registered with the server [default: atp-demo]
    #[arg(long)]
    app_name: Option<String>,

    /// Server base URL
    #[arg(long, env = "ATP_BASE_URL")]
    base_url: Option<String>,

    /// Transport binding
    #[arg(long, value_enum, default_value = "websocket")]
    transport: TransportArg,

    /// Configuration file (toml, yaml or json); flags override it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Stop after this many idle seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Reload when `.rs` files under this directory change
    #[arg(long)]
    watch: Option<PathBuf>,

    /// Also expose the tools over HTTP on this address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log at debug level
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TransportArg {
    Websocket,
    Polling,
}

impl From<TransportArg> for TransportType {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Websocket => TransportType::WebSocket,
            TransportArg::Polling => TransportType::Polling,
        }
    }
}

impl Cli {
    fn toolkit_config(&self) -> anyhow::Result<ToolkitConfig> {
        let mut config = match &self.config {
            Some(path) => ToolkitConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ToolkitConfig::new(String::new(), "atp-demo"),
        };
        if let Some(api_key) = &self.api_key {
            config.api_key.clone_from(api_key);
        }
        if let Some(app_name) = &self.app_name {
            config.app_name.clone_from(app_name);
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        config = config.with_transport(self.transport.into());
        if let Some(seconds) = self.idle_timeout {
            config = config.with_idle_timeout(Some(Duration::from_secs(seconds)));
        }
        Ok(config)
    }
}

struct Counter;

#[async_trait]
impl AppHandler for Counter {
    async fn start(&self, args: ToolArguments) -> std::result::Result<AppStep, ToolError> {
        let start = args.get("start").and_then(Value::as_i64).unwrap_or(0);
        Ok(AppStep::render(
            json!({ "count": start }),
            json!({ "count": start, "actions": ["increment", "decrement", "done"] }),
        ))
    }

    async fn act(&self, state: Value, action: Value, _args: ToolArguments) -> std::result::Result<AppStep, ToolError> {
        let count = state["count"].as_i64().unwrap_or(0);
        let count = match action.as_str() {
            Some("increment") => count + 1,
            Some("decrement") => count - 1,
            Some("done") => return Ok(AppStep::finish(state, json!({ "final": count }))),
            _ => return Err(ToolError::new(format!("unknown action {action}"))),
        };
        Ok(AppStep::render(json!({ "count": count }), json!({ "count": count })))
    }
}

fn tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::from_fn("echo", |args: ToolArguments| async move {
            Ok(json!({ "text": args.require_str("text")? }))
        })
        .params(["text"])
        .required(["text"])
        .description("Return the given text"),
        ToolDefinition::from_fn("whoami", |args: ToolArguments| async move {
            let token = args
                .auth_token()
                .ok_or_else(|| ToolError::new("no auth token"))?;
            let visible: String = token.chars().take(4).collect();
            Ok(json!({ "token": format!("{visible}…") }))
        })
        .requires_auth_token()
        .description("Report which token the caller supplied"),
        ToolDefinition::app("counter", Counter)
            .params(["start"])
            .description("Interactive counter"),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = if cli.verbose {
        LoggingConfig::stderr_debug()
    } else {
        LoggingConfig::stderr()
    };
    let _guard = logging.init()?;

    let client = ToolkitClient::new(cli.toolkit_config()?)?;
    for tool in tools() {
        client.register(tool).await?;
    }
    if let Some(dir) = &cli.watch {
        let watched = client.watch_sources([dir], "rs").await?;
        info!(watched, dir = %dir.display(), "Watching sources");
    }

    if let Some(addr) = cli.listen {
        let directory = Arc::new(ToolkitDirectory::new());
        directory.insert(client.app_name().to_string(), client.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "Serving tool routes");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, routes::router(directory)).await {
                warn!("Tool routes stopped: {}", e);
            }
        });
    }

    client.start();
    tokio::select! {
        _ = client.run_until_stopped() => info!("Toolkit stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            client.stop().await;
        }
    }
    Ok(())
}
