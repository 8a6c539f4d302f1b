//! Start command - launches the Superagent server.

use anyhow::Result;
use clap::Args;
use console::Style;
use superagent_server::{Server, ServerConfig};

use super::{Context, build_orchestrator};

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// API token for authentication (or set SUPERAGENT_API_TOKEN env var)
    #[arg(long, env = "SUPERAGENT_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let config = ctx.config();
    let dim = Style::new().dim();

    if ctx.verbose {
        let sources = ctx.loaded.loaded_from();
        if sources.is_empty() {
            println!("{}", dim.apply_to("No config files found, using defaults + CLI args"));
        }
        for source in sources {
            println!("{}", dim.apply_to(format!("Loaded config: {}", source.display())));
        }
    }

    let mut settings = config.server();
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if args.token.is_some() {
        settings.auth_token = args.token;
    }
    let server_config = ServerConfig::from_settings(&settings, &config.orchestrator())?;

    let orchestrator = build_orchestrator(config)?;

    let addr = server_config.bind_address;
    let auth = if server_config.auth_token.is_some() {
        "token"
    } else {
        "disabled (localhost mode)"
    };
    println!("Superagent listening on http://{addr} (auth: {auth})");
    println!("{}", dim.apply_to(format!("WebSocket: ws://{addr}/ws")));

    Server::new(orchestrator, server_config)
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
