//! Web console endpoints: page, group metadata, dispatch stream, and stop.
use super::*;

use courier_dispatch::{
    delay_from_seconds, normalize_delay_seconds, selectable_roles, DispatchMode, DispatchRequest,
};
use futures_util::{stream, StreamExt};

use super::console_page::render_console_page;

pub(super) async fn handle_console_page() -> Html<String> {
    Html(render_console_page())
}

pub(super) async fn handle_console_group(
    State(state): State<Arc<GatewayServerState>>,
) -> Result<Json<Value>, GatewayApiError> {
    let summary = state
        .engine
        .platform()
        .describe_group(&state.config.group_id)
        .await
        .map_err(GatewayApiError::from_platform)?;
    Ok(Json(json!({
        "group": summary,
        "status_channel_id": state.status_channel_id(),
    })))
}

pub(super) async fn handle_console_roles(
    State(state): State<Arc<GatewayServerState>>,
) -> Result<Json<Value>, GatewayApiError> {
    let group_id = state.config.group_id.as_str();
    let roles = state
        .engine
        .platform()
        .list_roles(group_id)
        .await
        .map_err(GatewayApiError::from_platform)?;
    Ok(Json(json!({ "roles": selectable_roles(group_id, roles) })))
}

fn build_console_request(
    state: &GatewayServerState,
    body: ConsoleDispatchRequest,
) -> Result<DispatchRequest, GatewayApiError> {
    let mode = match body.mode.as_deref().map(str::trim) {
        None | Some("") => DispatchMode::All,
        Some(raw) => DispatchMode::parse(raw).ok_or_else(|| {
            GatewayApiError::bad_request("invalid_mode", format!("unsupported mode '{raw}'"))
        })?,
    };
    let delay_seconds = normalize_delay_seconds(body.raw_delay().as_deref());
    let session_id = body
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CONSOLE_SESSION_ID)
        .to_string();
    Ok(DispatchRequest {
        session_id,
        group_id: state.config.group_id.clone(),
        message_template: body.message,
        mode,
        role_ids: body
            .role_ids
            .into_iter()
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .collect(),
        delay: delay_from_seconds(delay_seconds),
        status_channel_id: state.status_channel_id(),
    })
}

pub(super) async fn handle_console_dispatch(
    State(state): State<Arc<GatewayServerState>>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<ConsoleDispatchRequest>(&body)
        .and_then(|body| build_console_request(&state, body))
    {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let handle = match state.engine.start_dispatch(request, None) {
        Ok(handle) => handle,
        Err(error) => return GatewayApiError::from_dispatch(error).into_response(),
    };
    info!(session_id = handle.session_id(), "console dispatch started");

    let frames = handle
        .into_event_stream()
        .map(SseFrame::Event)
        .chain(stream::once(async { SseFrame::Done }))
        .map(|frame| Ok::<Event, Infallible>(frame.into_event()));
    Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub(super) async fn handle_console_stop(
    State(state): State<Arc<GatewayServerState>>,
    body: Bytes,
) -> Result<Json<Value>, GatewayApiError> {
    let request = if body.is_empty() {
        ConsoleStopRequest::default()
    } else {
        parse_gateway_json_body::<ConsoleStopRequest>(&body)?
    };
    let session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CONSOLE_SESSION_ID);
    let stopped = state.engine.stop_dispatch(session_id);
    Ok(Json(json!({ "session_id": session_id, "stopped": stopped })))
}

pub(super) async fn handle_console_sessions(
    State(state): State<Arc<GatewayServerState>>,
) -> Json<Value> {
    Json(json!({ "sessions": state.engine.registry().active_sessions() }))
}
