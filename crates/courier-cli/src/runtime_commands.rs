//! Subcommand runners for the `courier` binary.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use courier_core::current_unix_timestamp_ms;
use courier_discord::{massdm_command_definitions, render_online_embed, DiscordRestClient};
use courier_dispatch::{
    delay_from_seconds, normalize_delay_seconds, DispatchEngine, DispatchMode, DispatchRequest,
    DispatchStatus, ProgressEvent, ProgressSnapshot,
};
use courier_gateway::{run_gateway_server, GatewayServerConfig};
use tracing::{info, warn};

use crate::{
    build_discord_client, build_engine_config, build_interactions_config, guild_id,
    status_channel_id, validate_cli, Cli, CliCommand,
};

/// Renders one progress event as a single terminal line.
pub fn render_event_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Log { level, text } => format!("[{}] {text}", level.as_str()),
        ProgressEvent::Progress { snapshot } => format!(
            "[progress] {} {}% ({}/{}) sent={} failed={} dm_closed={}",
            snapshot.progress_bar(),
            snapshot.percent(),
            snapshot.processed(),
            snapshot.total,
            snapshot.sent,
            snapshot.failed,
            snapshot.dm_closed
        ),
        ProgressEvent::Complete { snapshot } => format!(
            "[{}] {}",
            snapshot.status.as_str(),
            snapshot.summary_line()
        ),
        ProgressEvent::Error { text } => format!("[error] {text}"),
    }
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    validate_cli(&cli)?;
    match &cli.command {
        CliCommand::Send {
            message,
            mode,
            roles,
            delay,
            session_id,
        } => {
            let request = DispatchRequest {
                session_id: session_id.trim().to_string(),
                group_id: guild_id(&cli),
                message_template: message.clone(),
                mode: DispatchMode::from(*mode),
                role_ids: roles
                    .iter()
                    .map(|role| role.trim().to_string())
                    .filter(|role| !role.is_empty())
                    .collect(),
                delay: delay_from_seconds(normalize_delay_seconds(Some(delay.as_str()))),
                status_channel_id: status_channel_id(&cli),
            };
            let snapshot = run_send(&cli, request).await?;
            if snapshot.status == DispatchStatus::Errored {
                bail!("dispatch failed: {}", snapshot.summary_line());
            }
            Ok(())
        }
        CliCommand::Serve {
            bind,
            skip_online_notice,
        } => run_serve(&cli, bind, *skip_online_notice).await,
        CliCommand::RegisterCommands => run_register_commands(&cli).await,
    }
}

fn build_engine(cli: &Cli, discord: DiscordRestClient) -> DispatchEngine {
    DispatchEngine::new(Arc::new(discord), build_engine_config(cli))
}

/// Runs one dispatch in the foreground. The first Ctrl-C requests a stop.
pub async fn run_send(cli: &Cli, request: DispatchRequest) -> Result<ProgressSnapshot> {
    let discord = build_discord_client(cli)?;
    let engine = build_engine(cli, discord);
    let session_id = request.session_id.clone();
    let mode = request.mode.as_str();
    let mut handle = engine
        .start_dispatch(request, None)
        .with_context(|| format!("failed to start dispatch session '{session_id}'"))?;
    info!(session_id = session_id.as_str(), mode, "dispatch started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stop_requested = false;
    let mut terminal: Option<ProgressSnapshot> = None;
    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else {
                    break;
                };
                println!("{}", render_event_line(&event));
                if let ProgressEvent::Complete { snapshot } = event {
                    terminal = Some(snapshot);
                }
            }
            result = &mut ctrl_c, if !stop_requested => {
                stop_requested = true;
                if let Err(error) = result {
                    warn!(error = %error, "failed to listen for ctrl-c");
                    continue;
                }
                if engine.stop_dispatch(&session_id) {
                    println!("[warn] stop requested; finishing the current recipient");
                }
            }
        }
    }

    terminal.ok_or_else(|| anyhow!("dispatch session '{session_id}' ended without a result"))
}

pub async fn run_serve(cli: &Cli, bind: &str, skip_online_notice: bool) -> Result<()> {
    let discord = build_discord_client(cli)?;
    let interactions = build_interactions_config(cli, &discord)?;
    let status_channel_id = status_channel_id(cli);

    if !skip_online_notice {
        if let Some(channel_id) = status_channel_id.as_deref() {
            let embed = render_online_embed(current_unix_timestamp_ms());
            match discord.post_embed(channel_id, &embed).await {
                Ok(_) => info!(channel_id, "posted online notice"),
                Err(error) => warn!(channel_id, error = %error, "failed to post online notice"),
            }
        }
    }

    let engine = build_engine(cli, discord);
    run_gateway_server(
        GatewayServerConfig {
            bind: bind.trim().to_string(),
            group_id: guild_id(cli),
            status_channel_id,
            interactions,
        },
        engine,
    )
    .await
}

pub async fn run_register_commands(cli: &Cli) -> Result<()> {
    let discord = build_discord_client(cli)?;
    if discord.application_id().is_none() {
        bail!("DISCORD_APPLICATION_ID (--application-id) is required to register commands");
    }
    let group_id = guild_id(cli);
    let registered = discord
        .register_guild_commands(&group_id, &massdm_command_definitions())
        .await
        .with_context(|| format!("failed to register commands in guild {group_id}"))?;
    println!("registered {registered} command(s) in guild {group_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use courier_dispatch::{LogLevel, ProgressSnapshot};

    use super::*;

    #[test]
    fn unit_render_event_line_formats_each_event_kind() {
        assert_eq!(
            render_event_line(&ProgressEvent::Log {
                level: LogLevel::Warn,
                text: "Rate limited".to_string(),
            }),
            "[warn] Rate limited"
        );

        let mut snapshot = ProgressSnapshot::new(4);
        snapshot.sent = 1;
        snapshot.dm_closed = 1;
        let progress = render_event_line(&ProgressEvent::Progress { snapshot });
        assert!(progress.starts_with("[progress] "));
        assert!(progress.ends_with("50% (2/4) sent=1 failed=0 dm_closed=1"));

        let complete = render_event_line(&ProgressEvent::Complete {
            snapshot: snapshot.with_status(DispatchStatus::Stopped),
        });
        assert_eq!(
            complete,
            "[stopped] Sent: 1 | Failed: 0 | DM Closed: 1 | Total: 4"
        );

        assert_eq!(
            render_event_line(&ProgressEvent::Error {
                text: "boom".to_string()
            }),
            "[error] boom"
        );
    }
}
