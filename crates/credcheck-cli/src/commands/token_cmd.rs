use anyhow::{Context, Result};
use clap::Args;
use credcheck::sas::{generate_sas_token, DEFAULT_TOKEN_TTL};
use std::time::Duration;
use tracing::debug;

use super::parsers::parse_duration;

#[derive(Args)]
pub struct TokenCommand {
    /// Resource URI the token grants access to (hub host, or <host>/devices/<device>)
    #[arg(long, short)]
    pub uri: String,

    /// Base64 shared access key
    #[arg(long, short, env = "IOTHUB_SAS_KEY", hide_env_values = true)]
    pub key: String,

    /// Shared access policy name (omit for device keys)
    #[arg(long, short)]
    pub policy: Option<String>,

    /// Token validity (seconds or humantime, e.g. 1h)
    #[arg(long, value_parser = parse_duration, default_value = "3600")]
    pub ttl: Duration,
}

pub fn execute(cmd: &TokenCommand) -> Result<()> {
    let ttl = if cmd.ttl.is_zero() {
        DEFAULT_TOKEN_TTL
    } else {
        cmd.ttl
    };
    let token = generate_sas_token(&cmd.uri, &cmd.key, cmd.policy.as_deref(), ttl)
        .context("Failed to generate SAS token")?;
    debug!(expires_at = token.expires_at(), "Generated SAS token");
    println!("{token}");
    Ok(())
}
