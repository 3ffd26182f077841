//! Discord interactions webhook: `/massdm` panel, role picker, and modal submits.
use super::*;

use courier_core::current_unix_timestamp_ms;
use courier_discord::{
    control_panel_components, parse_interaction, render_control_panel_embed,
    render_role_picker_embed, role_picker_components, verify_interaction_signature, ControlPanel,
    FollowupProgressSink, Interaction, InteractionKind, InteractionResponse, DELAY_INPUT_ID,
    MASSDM_COMMAND_NAME, MESSAGE_INPUT_ID, MESSAGE_MODAL_ALL_ID, MESSAGE_MODAL_ROLES_ID,
    ROLE_CANCEL_BUTTON_ID, ROLE_CONFIRM_BUTTON_ID, ROLE_SELECT_ID, SEND_ALL_BUTTON_ID,
    SEND_ROLES_BUTTON_ID, STOP_BUTTON_ID,
};
use courier_dispatch::{
    delay_from_seconds, normalize_delay_seconds, selectable_roles, DispatchMode, DispatchRequest,
    GroupRole, GroupSummary,
};
use tracing::warn;

const SIGNATURE_HEADER: &str = "x-signature-ed25519";
const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

const NOT_ADMIN_MESSAGE: &str = "\u{274c} You need Administrator permission to use this.";
const GUILD_MISSING_MESSAGE: &str = "\u{274c} Cannot find guild.";
const EMPTY_SELECTION_MESSAGE: &str = "Please select at least one role first!";
const STOPPING_MESSAGE: &str = "\u{23f9}\u{fe0f} Stopping mass DM...";
const NO_SESSION_MESSAGE: &str = "No active DM session found.";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn respond(response: InteractionResponse) -> Response {
    Json(response.to_json()).into_response()
}

fn ephemeral(content: impl Into<String>) -> Response {
    respond(InteractionResponse::message(content, true))
}

pub(super) async fn handle_interaction(
    State(state): State<Arc<GatewayServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(interactions) = state.config.interactions.as_ref() else {
        return GatewayApiError::not_found(
            "interactions_disabled",
            "interactions endpoint is not configured",
        )
        .into_response();
    };
    if let Err(error) = verify_interaction_signature(
        &interactions.public_key,
        header_str(&headers, SIGNATURE_HEADER),
        header_str(&headers, TIMESTAMP_HEADER),
        &body,
    ) {
        warn!(error = %error, "rejected interaction with invalid signature");
        return GatewayApiError::unauthorized(error.to_string()).into_response();
    }
    let raw = String::from_utf8_lossy(&body);
    let interaction = match parse_interaction(&raw) {
        Ok(interaction) => interaction,
        Err(error) => {
            return GatewayApiError::bad_request(
                "malformed_interaction",
                format!("failed to parse interaction: {error}"),
            )
            .into_response()
        }
    };

    match interaction.kind() {
        InteractionKind::Ping => respond(InteractionResponse::pong()),
        InteractionKind::ApplicationCommand => {
            handle_command(&state, interactions, &interaction).await
        }
        InteractionKind::MessageComponent => handle_component(&state, &interaction).await,
        InteractionKind::ModalSubmit => handle_modal_submit(&state, interactions, &interaction),
        InteractionKind::Other(code) => GatewayApiError::bad_request(
            "unsupported_interaction",
            format!("unsupported interaction type {code}"),
        )
        .into_response(),
    }
}

async fn handle_command(
    state: &GatewayServerState,
    interactions: &InteractionsConfig,
    interaction: &Interaction,
) -> Response {
    if interaction.command_name() != Some(MASSDM_COMMAND_NAME) {
        return ephemeral("Unknown command.");
    }
    if let Some(allowed) = interactions
        .allowed_channel_id
        .as_deref()
        .filter(|value| !value.trim().is_empty())
    {
        if interaction.channel_id.as_deref() != Some(allowed) {
            return ephemeral(format!(
                "\u{274c} This command can only be used in <#{allowed}>."
            ));
        }
    }
    if !interaction.is_administrator() {
        return ephemeral(NOT_ADMIN_MESSAGE);
    }

    let group_id = state.config.group_id.as_str();
    let group = match state.engine.platform().describe_group(group_id).await {
        Ok(group) => group,
        Err(error) => {
            warn!(group_id, error = %error, "failed to describe group for control panel");
            GroupSummary {
                id: group_id.to_string(),
                name: "N/A".to_string(),
                member_count: None,
                icon_url: None,
            }
        }
    };
    let status_channel_id = state.status_channel_id();
    let requested_by = interaction.invoker_display_name();
    let embed = render_control_panel_embed(&ControlPanel {
        group: &group,
        status_channel_id: status_channel_id.as_deref(),
        requested_by: &requested_by,
        now_unix_ms: current_unix_timestamp_ms(),
    });
    respond(InteractionResponse::embed_message(
        &embed,
        control_panel_components(),
        false,
    ))
}

async fn handle_component(state: &GatewayServerState, interaction: &Interaction) -> Response {
    if !interaction.is_administrator() {
        return ephemeral(NOT_ADMIN_MESSAGE);
    }
    let Some(invoker_id) = interaction.invoker_id() else {
        return ephemeral("\u{274c} Cannot identify the invoking user.");
    };

    match interaction.custom_id().unwrap_or_default() {
        SEND_ALL_BUTTON_ID => respond(InteractionResponse::message_modal(MESSAGE_MODAL_ALL_ID)),
        SEND_ROLES_BUTTON_ID => {
            let group_id = state.config.group_id.as_str();
            let roles = match state.engine.platform().list_roles(group_id).await {
                Ok(roles) => selectable_roles(group_id, roles),
                Err(error) => {
                    warn!(group_id, error = %error, "failed to list roles for picker");
                    return ephemeral(GUILD_MISSING_MESSAGE);
                }
            };
            state.pending_roles().remove(invoker_id);
            respond(InteractionResponse::embed_message(
                &render_role_picker_embed(),
                role_picker_components(&roles),
                true,
            ))
        }
        STOP_BUTTON_ID => {
            if state.engine.stop_dispatch(invoker_id) {
                info!(session_id = invoker_id, "stop requested from control panel");
                ephemeral(STOPPING_MESSAGE)
            } else {
                ephemeral(NO_SESSION_MESSAGE)
            }
        }
        ROLE_SELECT_ID => {
            let selected = interaction.selected_values().to_vec();
            let names = selected_role_names(state, &selected).await;
            state
                .pending_roles()
                .insert(invoker_id.to_string(), selected);
            ephemeral(format!(
                "Selected roles: **{}**\nNow click **Confirm & Type Message** below.",
                names.join(", ")
            ))
        }
        ROLE_CONFIRM_BUTTON_ID => {
            let has_selection = state
                .pending_roles()
                .get(invoker_id)
                .is_some_and(|roles| !roles.is_empty());
            if has_selection {
                respond(InteractionResponse::message_modal(MESSAGE_MODAL_ROLES_ID))
            } else {
                ephemeral(EMPTY_SELECTION_MESSAGE)
            }
        }
        ROLE_CANCEL_BUTTON_ID => {
            state.pending_roles().remove(invoker_id);
            respond(InteractionResponse::update_message("Cancelled."))
        }
        other => {
            warn!(custom_id = other, "unhandled component interaction");
            ephemeral("Unknown action.")
        }
    }
}

async fn selected_role_names(state: &GatewayServerState, selected: &[String]) -> Vec<String> {
    let roles: Vec<GroupRole> = state
        .engine
        .platform()
        .list_roles(&state.config.group_id)
        .await
        .unwrap_or_default();
    selected
        .iter()
        .map(|role_id| {
            roles
                .iter()
                .find(|role| &role.id == role_id)
                .map(|role| role.name.clone())
                .unwrap_or_else(|| role_id.clone())
        })
        .collect()
}

fn handle_modal_submit(
    state: &GatewayServerState,
    interactions: &InteractionsConfig,
    interaction: &Interaction,
) -> Response {
    if !interaction.is_administrator() {
        return ephemeral(NOT_ADMIN_MESSAGE);
    }
    let Some(invoker_id) = interaction.invoker_id() else {
        return ephemeral("\u{274c} Cannot identify the invoking user.");
    };
    let (mode, role_ids) = match interaction.custom_id().unwrap_or_default() {
        MESSAGE_MODAL_ALL_ID => (DispatchMode::All, Vec::new()),
        MESSAGE_MODAL_ROLES_ID => {
            let roles = state.pending_roles().remove(invoker_id).unwrap_or_default();
            if roles.is_empty() {
                return ephemeral(EMPTY_SELECTION_MESSAGE);
            }
            (DispatchMode::Roles, roles)
        }
        other => {
            warn!(custom_id = other, "unhandled modal submit");
            return ephemeral("Unknown action.");
        }
    };

    let delay_seconds = normalize_delay_seconds(interaction.modal_value(DELAY_INPUT_ID));
    let request = DispatchRequest {
        session_id: invoker_id.to_string(),
        group_id: state.config.group_id.clone(),
        message_template: interaction
            .modal_value(MESSAGE_INPUT_ID)
            .unwrap_or_default()
            .to_string(),
        mode,
        role_ids,
        delay: delay_from_seconds(delay_seconds),
        status_channel_id: state.status_channel_id(),
    };
    let sink = FollowupProgressSink::new(interactions.discord.clone(), interaction.token.clone());
    match state.engine.start_dispatch(request, Some(Box::new(sink))) {
        Ok(handle) => {
            info!(
                session_id = handle.session_id(),
                mode = mode.as_str(),
                delay_seconds,
                "interaction dispatch started"
            );
            respond(InteractionResponse::deferred_ephemeral())
        }
        Err(DispatchError::SessionAlreadyActive { .. }) => ephemeral(
            "\u{26a0}\u{fe0f} You already have a mass DM running. Click **Stop Sending** first.",
        ),
        Err(DispatchError::InvalidRequest(message)) => ephemeral(format!("\u{274c} {message}")),
        Err(error) => ephemeral(format!("\u{274c} {error}")),
    }
}
