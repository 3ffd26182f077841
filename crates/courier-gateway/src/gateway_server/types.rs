//! Request, response, and error envelope types for the gateway endpoints.
use super::*;

#[derive(Debug)]
pub(super) struct GatewayApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl GatewayApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_signature", message)
    }

    pub(super) fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub(super) fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "platform_error", message)
    }

    pub(super) fn from_platform(error: PlatformError) -> Self {
        match error {
            PlatformError::NotFound { detail } => Self::not_found("group_not_found", detail),
            other => Self::bad_gateway(other.to_string()),
        }
    }

    pub(super) fn from_dispatch(error: DispatchError) -> Self {
        let status = match &error {
            DispatchError::SessionAlreadyActive { .. } => StatusCode::CONFLICT,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::GroupNotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::FetchError { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, error.code(), error.to_string())
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

/// Body of `POST /api/dispatch`.
#[derive(Debug, Deserialize)]
pub(super) struct ConsoleDispatchRequest {
    pub(super) session_id: Option<String>,
    pub(super) message: String,
    pub(super) mode: Option<String>,
    #[serde(default)]
    pub(super) role_ids: Vec<String>,
    #[serde(default)]
    pub(super) delay: Value,
}

impl ConsoleDispatchRequest {
    /// Delay as typed by the user; numbers and numeric strings are both accepted.
    pub(super) fn raw_delay(&self) -> Option<String> {
        match &self.delay {
            Value::Number(number) => Some(number.to_string()),
            Value::String(text) => Some(text.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ConsoleStopRequest {
    pub(super) session_id: Option<String>,
}

pub(super) enum SseFrame {
    Event(ProgressEvent),
    Done,
}

impl SseFrame {
    pub(super) fn into_event(self) -> Event {
        match self {
            Self::Event(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                Event::default().event(event.kind()).data(payload)
            }
            Self::Done => Event::default().event("done").data("[DONE]"),
        }
    }
}
