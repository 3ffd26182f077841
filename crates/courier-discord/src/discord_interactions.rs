//! Discord interaction payloads, response builders, and request signature checks.
//!
//! Only the subset of the interaction model the `/massdm` panel needs is
//! modelled: slash commands, button and select components, and modal submits.

use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use courier_dispatch::{GroupRole, MAX_MESSAGE_CHARS};

use crate::discord_embed::DiscordEmbed;

pub const MASSDM_COMMAND_NAME: &str = "massdm";
pub const SEND_ALL_BUTTON_ID: &str = "massdm:all";
pub const SEND_ROLES_BUTTON_ID: &str = "massdm:roles";
pub const STOP_BUTTON_ID: &str = "massdm:stop";
pub const ROLE_SELECT_ID: &str = "massdm:roles:select";
pub const ROLE_CONFIRM_BUTTON_ID: &str = "massdm:roles:confirm";
pub const ROLE_CANCEL_BUTTON_ID: &str = "massdm:roles:cancel";
pub const MESSAGE_MODAL_ALL_ID: &str = "massdm:modal:all";
pub const MESSAGE_MODAL_ROLES_ID: &str = "massdm:modal:roles";
pub const MESSAGE_INPUT_ID: &str = "massdm:message";
pub const DELAY_INPUT_ID: &str = "massdm:delay";

pub const EPHEMERAL_FLAG: u64 = 1 << 6;
pub const ADMINISTRATOR_PERMISSION: u64 = 1 << 3;

const SIGNATURE_HEADER_LEN: usize = 64;
const PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `InteractionKind` values.
pub enum InteractionKind {
    Ping,
    ApplicationCommand,
    MessageComponent,
    ModalSubmit,
    Other(u8),
}

impl InteractionKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Ping,
            2 => Self::ApplicationCommand,
            3 => Self::MessageComponent,
            5 => Self::ModalSubmit,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InteractionUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
    pub global_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InteractionMember {
    pub user: Option<InteractionUser>,
    pub nick: Option<String>,
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModalComponent {
    #[serde(default)]
    pub custom_id: String,
    pub value: Option<String>,
    #[serde(default)]
    pub components: Vec<ModalComponent>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct InteractionData {
    pub name: Option<String>,
    pub custom_id: Option<String>,
    pub component_type: Option<u8>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub components: Vec<ModalComponent>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
/// Incoming interaction as delivered to the webhook endpoint.
pub struct Interaction {
    pub id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(rename = "type")]
    pub kind_code: u8,
    #[serde(default)]
    pub token: String,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub member: Option<InteractionMember>,
    pub user: Option<InteractionUser>,
    pub data: Option<InteractionData>,
}

impl Interaction {
    pub fn kind(&self) -> InteractionKind {
        InteractionKind::from_code(self.kind_code)
    }

    fn invoking_user(&self) -> Option<&InteractionUser> {
        self.member
            .as_ref()
            .and_then(|member| member.user.as_ref())
            .or(self.user.as_ref())
    }

    pub fn invoker_id(&self) -> Option<&str> {
        self.invoking_user().map(|user| user.id.as_str())
    }

    pub fn invoker_display_name(&self) -> String {
        let nick = self
            .member
            .as_ref()
            .and_then(|member| member.nick.as_deref());
        let user = self.invoking_user();
        nick.or_else(|| user.and_then(|user| user.global_name.as_deref()))
            .or_else(|| user.map(|user| user.username.as_str()))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }

    /// True when the invoking member's resolved permissions include Administrator.
    pub fn is_administrator(&self) -> bool {
        self.member
            .as_ref()
            .and_then(|member| member.permissions.as_deref())
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .is_some_and(|bits| bits & ADMINISTRATOR_PERMISSION != 0)
    }

    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref().and_then(|data| data.name.as_deref())
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.data.as_ref().and_then(|data| data.custom_id.as_deref())
    }

    pub fn selected_values(&self) -> &[String] {
        self.data
            .as_ref()
            .map(|data| data.values.as_slice())
            .unwrap_or(&[])
    }

    /// Value of the modal text input with `custom_id`, searched through action rows.
    pub fn modal_value(&self, custom_id: &str) -> Option<&str> {
        fn find<'a>(components: &'a [ModalComponent], custom_id: &str) -> Option<&'a str> {
            components.iter().find_map(|component| {
                if component.custom_id == custom_id {
                    component.value.as_deref()
                } else {
                    find(&component.components, custom_id)
                }
            })
        }
        self.data
            .as_ref()
            .and_then(|data| find(&data.components, custom_id))
    }
}

pub fn parse_interaction(raw: &str) -> Result<Interaction, serde_json::Error> {
    serde_json::from_str(raw)
}

#[derive(Debug, Error, PartialEq, Eq)]
/// Reasons an interaction request fails signature verification.
pub enum SignatureError {
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("failed to decode {label} hex")]
    InvalidHex { label: &'static str },
    #[error("{label} decoded to {actual} bytes (expected {expected})")]
    InvalidLength {
        label: &'static str,
        actual: usize,
        expected: usize,
    },
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("signature does not match")]
    Mismatch,
}

fn decode_hex_fixed<const N: usize>(label: &'static str, raw: &str) -> Result<[u8; N], SignatureError> {
    let decoded = hex::decode(raw.trim()).map_err(|_| SignatureError::InvalidHex { label })?;
    let actual = decoded.len();
    decoded.try_into().map_err(|_| SignatureError::InvalidLength {
        label,
        actual,
        expected: N,
    })
}

/// Parses a hex-encoded application public key.
pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, SignatureError> {
    let bytes = decode_hex_fixed::<PUBLIC_KEY_LEN>("public key", public_key_hex)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| SignatureError::InvalidPublicKey)
}

/// Verifies `X-Signature-Ed25519` over `timestamp || body`.
pub fn verify_interaction_signature(
    public_key: &VerifyingKey,
    signature_hex: Option<&str>,
    timestamp: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let (Some(signature_hex), Some(timestamp)) = (signature_hex, timestamp) else {
        return Err(SignatureError::MissingHeaders);
    };
    let signature_bytes = decode_hex_fixed::<SIGNATURE_HEADER_LEN>("signature", signature_hex)?;
    let signature = Signature::from_bytes(&signature_bytes);
    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    public_key
        .verify_strict(&message, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// `/massdm` definition for guild command registration.
pub fn massdm_command_definitions() -> Value {
    json!([{
        "name": MASSDM_COMMAND_NAME,
        "description": "Open the Mass DM control panel",
        "type": 1
    }])
}

fn button(style: u8, label: &str, custom_id: &str, emoji: Option<&str>) -> Value {
    let mut button = json!({
        "type": 2,
        "style": style,
        "label": label,
        "custom_id": custom_id,
    });
    if let Some(emoji) = emoji {
        button["emoji"] = json!({ "name": emoji });
    }
    button
}

fn action_row(components: Vec<Value>) -> Value {
    json!({ "type": 1, "components": components })
}

pub fn control_panel_components() -> Vec<Value> {
    vec![action_row(vec![
        button(1, "Send to All Members", SEND_ALL_BUTTON_ID, Some("\u{1f4e8}")),
        button(3, "Send to Specific Roles", SEND_ROLES_BUTTON_ID, Some("\u{1f3ad}")),
        button(4, "Stop Sending", STOP_BUTTON_ID, Some("\u{23f9}\u{fe0f}")),
    ])]
}

pub fn role_picker_components(roles: &[GroupRole]) -> Vec<Value> {
    let mut rows = Vec::new();
    if !roles.is_empty() {
        let options = roles
            .iter()
            .map(|role| json!({ "label": role.name, "value": role.id }))
            .collect::<Vec<_>>();
        rows.push(action_row(vec![json!({
            "type": 3,
            "custom_id": ROLE_SELECT_ID,
            "placeholder": "Select roles...",
            "min_values": 1,
            "max_values": roles.len(),
            "options": options,
        })]));
    }
    rows.push(action_row(vec![
        button(3, "Confirm & Type Message", ROLE_CONFIRM_BUTTON_ID, None),
        button(2, "Cancel", ROLE_CANCEL_BUTTON_ID, None),
    ]));
    rows
}

#[derive(Debug, Clone, PartialEq)]
/// Interaction callback body.
pub struct InteractionResponse {
    pub kind: u8,
    pub data: Option<Value>,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self { kind: 1, data: None }
    }

    pub fn message(content: impl Into<String>, ephemeral: bool) -> Self {
        let mut data = json!({ "content": content.into() });
        if ephemeral {
            data["flags"] = json!(EPHEMERAL_FLAG);
        }
        Self {
            kind: 4,
            data: Some(data),
        }
    }

    pub fn embed_message(embed: &DiscordEmbed, components: Vec<Value>, ephemeral: bool) -> Self {
        let mut data = json!({ "embeds": [embed], "components": components });
        if ephemeral {
            data["flags"] = json!(EPHEMERAL_FLAG);
        }
        Self {
            kind: 4,
            data: Some(data),
        }
    }

    pub fn deferred_ephemeral() -> Self {
        Self {
            kind: 5,
            data: Some(json!({ "flags": EPHEMERAL_FLAG })),
        }
    }

    /// Replaces the originating component message with plain text.
    pub fn update_message(content: impl Into<String>) -> Self {
        Self {
            kind: 7,
            data: Some(json!({
                "content": content.into(),
                "embeds": [],
                "components": [],
            })),
        }
    }

    pub fn message_modal(custom_id: &str) -> Self {
        Self {
            kind: 9,
            data: Some(json!({
                "custom_id": custom_id,
                "title": "Type Your Message",
                "components": [
                    action_row(vec![json!({
                        "type": 4,
                        "custom_id": MESSAGE_INPUT_ID,
                        "style": 2,
                        "label": "Message",
                        "placeholder": "Type your message here... Use <user> to mention each user",
                        "required": true,
                        "max_length": MAX_MESSAGE_CHARS,
                    })]),
                    action_row(vec![json!({
                        "type": 4,
                        "custom_id": DELAY_INPUT_ID,
                        "style": 1,
                        "label": "Delay (seconds between each DM)",
                        "placeholder": "2",
                        "value": "2",
                        "required": false,
                        "max_length": 5,
                    })]),
                ],
            })),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({ "type": self.kind });
        if let Some(data) = self.data.as_ref() {
            body["data"] = data.clone();
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[11; 32])
    }

    fn modal_submit_payload() -> &'static str {
        r#"{
            "id": "i-1",
            "application_id": "app-1",
            "type": 5,
            "token": "tok",
            "guild_id": "guild-1",
            "channel_id": "chan-1",
            "member": {
                "user": {"id": "u-1", "username": "operator", "global_name": "Op"},
                "nick": null,
                "permissions": "8"
            },
            "data": {
                "custom_id": "massdm:modal:all",
                "components": [
                    {"type": 1, "components": [{"type": 4, "custom_id": "massdm:message", "value": "hi <user>"}]},
                    {"type": 1, "components": [{"type": 4, "custom_id": "massdm:delay", "value": "0.1"}]}
                ]
            }
        }"#
    }

    #[test]
    fn unit_parse_modal_submit_extracts_nested_values() {
        let interaction = parse_interaction(modal_submit_payload()).expect("parse");
        assert_eq!(interaction.kind(), InteractionKind::ModalSubmit);
        assert_eq!(interaction.custom_id(), Some(MESSAGE_MODAL_ALL_ID));
        assert_eq!(interaction.modal_value(MESSAGE_INPUT_ID), Some("hi <user>"));
        assert_eq!(interaction.modal_value(DELAY_INPUT_ID), Some("0.1"));
        assert_eq!(interaction.modal_value("missing"), None);
        assert_eq!(interaction.invoker_id(), Some("u-1"));
        assert_eq!(interaction.invoker_display_name(), "Op");
        assert!(interaction.is_administrator());
    }

    #[test]
    fn unit_is_administrator_checks_permission_bit() {
        let mut interaction = parse_interaction(modal_submit_payload()).expect("parse");
        if let Some(member) = interaction.member.as_mut() {
            member.permissions = Some("2048".to_string());
        }
        assert!(!interaction.is_administrator());
        interaction.member = None;
        assert!(!interaction.is_administrator());
    }

    #[test]
    fn functional_signature_verification_accepts_valid_and_rejects_tampered() {
        let key = signing_key();
        let public_hex = hex::encode(key.verifying_key().to_bytes());
        let public_key = parse_public_key(&public_hex).expect("public key");
        let body = br#"{"type":1}"#;
        let timestamp = "1760200000";
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        let signature = hex::encode(key.sign(&message).to_bytes());

        assert_eq!(
            verify_interaction_signature(&public_key, Some(&signature), Some(timestamp), body),
            Ok(())
        );
        assert_eq!(
            verify_interaction_signature(&public_key, Some(&signature), Some("1760200001"), body),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_interaction_signature(&public_key, None, Some(timestamp), body),
            Err(SignatureError::MissingHeaders)
        );
        assert!(matches!(
            verify_interaction_signature(&public_key, Some("zz"), Some(timestamp), body),
            Err(SignatureError::InvalidHex { .. })
        ));
    }

    #[test]
    fn unit_parse_public_key_rejects_wrong_length() {
        assert!(matches!(
            parse_public_key("abcd"),
            Err(SignatureError::InvalidLength { actual: 2, .. })
        ));
    }

    #[test]
    fn unit_response_builders_render_discord_callback_shapes() {
        assert_eq!(InteractionResponse::pong().to_json(), json!({"type": 1}));
        let ephemeral = InteractionResponse::message("nope", true).to_json();
        assert_eq!(ephemeral["data"]["flags"], 64);
        let deferred = InteractionResponse::deferred_ephemeral().to_json();
        assert_eq!(deferred["type"], 5);
        let cancelled = InteractionResponse::update_message("Cancelled.").to_json();
        assert_eq!(cancelled["type"], 7);
        assert_eq!(cancelled["data"]["components"], json!([]));
        let modal = InteractionResponse::message_modal(MESSAGE_MODAL_ALL_ID).to_json();
        assert_eq!(modal["type"], 9);
        assert_eq!(modal["data"]["components"][0]["components"][0]["max_length"], 2000);
    }

    #[test]
    fn unit_role_picker_components_cap_select_to_role_count() {
        let roles = vec![GroupRole {
            id: "r1".to_string(),
            name: "Mods".to_string(),
            position: 1,
            managed: false,
        }];
        let rows = role_picker_components(&roles);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["components"][0]["max_values"], 1);
        assert_eq!(role_picker_components(&[]).len(), 1);
        assert_eq!(control_panel_components()[0]["components"].as_array().map(Vec::len), Some(3));
    }
}
