//! Validation and component construction from parsed CLI flags.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use courier_core::is_snowflake;
use courier_discord::{parse_public_key, DiscordRestClient, DiscordRestConfig};
use courier_dispatch::{DispatchEngineConfig, ProgressCadence};
use courier_gateway::InteractionsConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::Cli;

pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Rejects configuration that would fail before any network activity.
pub fn validate_cli(cli: &Cli) -> Result<()> {
    if cli.bot_token.trim().is_empty() {
        bail!("DISCORD_BOT_TOKEN (--bot-token) is required");
    }
    if !is_snowflake(&cli.guild_id) {
        bail!(
            "GUILD_ID (--guild-id) must be a numeric id, got '{}'",
            cli.guild_id.trim()
        );
    }
    for (label, value) in [
        ("LOG_CHANNEL_ID", cli.log_channel_id.as_deref()),
        ("ALLOWED_CHANNEL", cli.allowed_channel.as_deref()),
        ("DISCORD_APPLICATION_ID", cli.application_id.as_deref()),
    ] {
        if let Some(value) = trimmed(value) {
            if !is_snowflake(value) {
                bail!("{label} must be a numeric id, got '{value}'");
            }
        }
    }
    Ok(())
}

pub fn build_discord_config(cli: &Cli) -> DiscordRestConfig {
    DiscordRestConfig {
        api_base: cli.discord_api_base.trim().trim_end_matches('/').to_string(),
        bot_token: cli.bot_token.trim().to_string(),
        application_id: trimmed(cli.application_id.as_deref()).map(str::to_string),
        request_timeout_ms: cli.request_timeout_ms,
    }
}

pub fn build_discord_client(cli: &Cli) -> Result<DiscordRestClient> {
    DiscordRestClient::new(build_discord_config(cli)).context("failed to build discord client")
}

pub fn build_engine_config(cli: &Cli) -> DispatchEngineConfig {
    DispatchEngineConfig {
        page_size: cli.page_size,
        cadence: ProgressCadence {
            update_every: cli.progress_every,
            log_every: cli.log_every,
        },
        default_retry_after: Duration::from_secs_f64(cli.rate_limit_default_seconds),
    }
}

pub fn guild_id(cli: &Cli) -> String {
    cli.guild_id.trim().to_string()
}

pub fn status_channel_id(cli: &Cli) -> Option<String> {
    trimmed(cli.log_channel_id.as_deref()).map(str::to_string)
}

/// Interactions are enabled only when both the application id and public key are set.
pub fn build_interactions_config(
    cli: &Cli,
    discord: &DiscordRestClient,
) -> Result<Option<InteractionsConfig>> {
    let public_key = trimmed(cli.public_key.as_deref());
    let application_id = trimmed(cli.application_id.as_deref());
    let (Some(public_key), Some(_)) = (public_key, application_id) else {
        if public_key.is_some() != application_id.is_some() {
            tracing::warn!(
                "interactions endpoint disabled: DISCORD_APPLICATION_ID and DISCORD_PUBLIC_KEY must both be set"
            );
        }
        return Ok(None);
    };
    let public_key =
        parse_public_key(public_key).context("DISCORD_PUBLIC_KEY is not a valid ed25519 key")?;
    Ok(Some(InteractionsConfig {
        public_key,
        discord: discord.clone(),
        allowed_channel_id: trimmed(cli.allowed_channel.as_deref()).map(str::to_string),
    }))
}
