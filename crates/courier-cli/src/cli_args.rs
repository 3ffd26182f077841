use std::time::Duration;

use clap::{Parser, Subcommand};

use courier_discord::{DEFAULT_DISCORD_API_BASE, DEFAULT_REQUEST_TIMEOUT_MS};
use courier_dispatch::{DEFAULT_LOG_EVERY, DEFAULT_UPDATE_EVERY, PLATFORM_MAX_PAGE_SIZE};
use courier_gateway::DEFAULT_GATEWAY_BIND;

use crate::CliDispatchMode;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_page_size(value: &str) -> Result<usize, String> {
    let parsed = parse_positive_usize(value)?;
    if parsed > PLATFORM_MAX_PAGE_SIZE {
        return Err(format!("value must be at most {PLATFORM_MAX_PAGE_SIZE}"));
    }
    Ok(parsed)
}

fn parse_positive_f64(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err("value must be a finite number greater than 0".to_string());
    }
    if Duration::try_from_secs_f64(parsed).is_err() {
        return Err("value is too large".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "courier",
    about = "Bulk direct-message dispatch for Discord guilds",
    version
)]
/// Process configuration shared by every subcommand.
pub struct Cli {
    #[arg(
        long = "bot-token",
        env = "DISCORD_BOT_TOKEN",
        hide_env_values = true,
        default_value = "",
        global = true,
        help = "Discord bot token used for every REST call."
    )]
    pub bot_token: String,

    #[arg(
        long = "guild-id",
        env = "GUILD_ID",
        default_value = "",
        global = true,
        help = "Guild whose members receive direct messages."
    )]
    pub guild_id: String,

    #[arg(
        long = "log-channel-id",
        env = "LOG_CHANNEL_ID",
        global = true,
        help = "Optional channel that receives the progress card and activity log."
    )]
    pub log_channel_id: Option<String>,

    #[arg(
        long = "allowed-channel",
        env = "ALLOWED_CHANNEL",
        global = true,
        help = "Optional channel the /massdm command is restricted to."
    )]
    pub allowed_channel: Option<String>,

    #[arg(
        long = "application-id",
        env = "DISCORD_APPLICATION_ID",
        global = true,
        help = "Discord application id; required for follow-ups and command registration."
    )]
    pub application_id: Option<String>,

    #[arg(
        long = "public-key",
        env = "DISCORD_PUBLIC_KEY",
        global = true,
        help = "Hex-encoded application public key used to verify interaction signatures."
    )]
    pub public_key: Option<String>,

    #[arg(
        long = "discord-api-base",
        env = "COURIER_DISCORD_API_BASE",
        default_value = DEFAULT_DISCORD_API_BASE,
        global = true,
        help = "Discord REST API base URL."
    )]
    pub discord_api_base: String,

    #[arg(
        long = "request-timeout-ms",
        env = "COURIER_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        global = true,
        help = "Per-request timeout for Discord REST calls."
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "page-size",
        env = "COURIER_PAGE_SIZE",
        default_value_t = PLATFORM_MAX_PAGE_SIZE,
        value_parser = parse_page_size,
        global = true,
        help = "Members requested per listing page (1-1000)."
    )]
    pub page_size: usize,

    #[arg(
        long = "progress-every",
        env = "COURIER_PROGRESS_EVERY",
        default_value_t = DEFAULT_UPDATE_EVERY,
        value_parser = parse_positive_usize,
        global = true,
        help = "Refresh progress cards every N processed recipients."
    )]
    pub progress_every: usize,

    #[arg(
        long = "log-every",
        env = "COURIER_LOG_EVERY",
        default_value_t = DEFAULT_LOG_EVERY,
        global = true,
        help = "Post an activity line to the log channel every N recipients (0 disables)."
    )]
    pub log_every: usize,

    #[arg(
        long = "rate-limit-default-seconds",
        env = "COURIER_RATE_LIMIT_DEFAULT_SECONDS",
        default_value_t = 5.0,
        value_parser = parse_positive_f64,
        global = true,
        help = "Backoff used when a rate-limit response carries no wait hint."
    )]
    pub rate_limit_default_seconds: f64,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run one dispatch from the terminal and print its progress
    Send {
        #[arg(long, help = "Message text; <user> is replaced by a mention of each recipient.")]
        message: String,

        #[arg(long, value_enum, default_value_t = CliDispatchMode::All)]
        mode: CliDispatchMode,

        #[arg(
            long = "role",
            value_delimiter = ',',
            help = "Role ids to target in roles mode (comma separated or repeated)."
        )]
        roles: Vec<String>,

        #[arg(
            long,
            default_value = "2",
            help = "Seconds between recipients, clamped to 0.5-30."
        )]
        delay: String,

        #[arg(long = "session-id", default_value = "cli")]
        session_id: String,
    },

    /// Serve the web console and the Discord interactions endpoint
    Serve {
        #[arg(long, env = "COURIER_BIND", default_value = DEFAULT_GATEWAY_BIND)]
        bind: String,

        #[arg(long = "skip-online-notice", help = "Do not post the online embed on startup.")]
        skip_online_notice: bool,
    },

    /// Register the /massdm slash command in the configured guild
    RegisterCommands,
}
