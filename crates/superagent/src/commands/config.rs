//! Config command - print the resolved configuration.

use anyhow::Result;
use clap::Args;
use superagent_config::SuperagentConfig;
use superagent_config::secrets::mask;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Only list the config files that were checked
    #[arg(long)]
    pub sources: bool,
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    if args.sources {
        for source in &ctx.loaded.sources {
            let state = if source.loaded { "loaded" } else { "not found" };
            println!("{} ({state})", source.path.display());
        }
        return Ok(());
    }

    let masked = masked(ctx.config());
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&masked)?);
    } else {
        print!("{}", masked.to_toml()?);
    }
    Ok(())
}

/// Copy of `config` with every secret replaced by its masked form.
fn masked(config: &SuperagentConfig) -> SuperagentConfig {
    let mut config = config.clone();
    for provider in config.providers.values_mut() {
        if let Some(key) = provider.api_key.as_mut() {
            *key = mask(key);
        }
    }
    if let Some(server) = config.server.as_mut()
        && let Some(token) = server.auth_token.as_mut()
    {
        *token = mask(token);
    }
    if let Some(tools) = config.tools.as_mut()
        && let Some(key) = tools.search.api_key.as_mut()
    {
        *key = mask(key);
    }
    config
}
