//! Discord embed payloads for progress cards and the control panel.

use courier_core::format_unix_ms_rfc3339;
use courier_dispatch::{DispatchStatus, GroupSummary, ProgressCard};
use serde::{Deserialize, Serialize};

pub const COLOR_BLUE: u32 = 0x3498db;
pub const COLOR_GREEN: u32 = 0x2ecc71;
pub const COLOR_ORANGE: u32 = 0xe67e22;
pub const COLOR_RED: u32 = 0xe74c3c;
pub const COLOR_BLURPLE: u32 = 0x5865f2;
pub const PROGRESS_FOOTER: &str = "Courier Mass DM";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscordEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl DiscordEmbed {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail = Some(EmbedImage { url: url.into() });
        self
    }

    pub fn timestamp_ms(mut self, unix_ms: u64) -> Self {
        self.timestamp = Some(format_unix_ms_rfc3339(unix_ms));
        self
    }
}

pub fn status_color(status: DispatchStatus) -> u32 {
    match status {
        DispatchStatus::InProgress => COLOR_BLUE,
        DispatchStatus::Complete => COLOR_GREEN,
        DispatchStatus::Stopped => COLOR_ORANGE,
        DispatchStatus::Errored => COLOR_RED,
    }
}

fn counter_block(value: usize) -> String {
    format!("```\n{value}\n```")
}

/// Renders a progress card as a status-coloured embed.
pub fn render_progress_embed(card: &ProgressCard) -> DiscordEmbed {
    let snapshot = &card.snapshot;
    let mut embed = DiscordEmbed::titled(format!("{} {}", snapshot.status.icon(), card.title))
        .color(status_color(snapshot.status))
        .field(
            "Progress",
            format!(
                "`{}` {}% ({}/{})",
                snapshot.progress_bar(),
                snapshot.percent(),
                snapshot.processed(),
                snapshot.total
            ),
            false,
        )
        .field("Sent", counter_block(snapshot.sent), true)
        .field("Failed", counter_block(snapshot.failed), true)
        .field("DM Closed", counter_block(snapshot.dm_closed), true);
    if let Some(extra) = card.extra.as_deref().filter(|value| !value.trim().is_empty()) {
        embed = embed.field("Info", extra, false);
    }
    embed.footer(PROGRESS_FOOTER).timestamp_ms(card.timestamp_unix_ms)
}

/// Inputs for the `/massdm` control panel.
pub struct ControlPanel<'a> {
    pub group: &'a GroupSummary,
    pub status_channel_id: Option<&'a str>,
    pub requested_by: &'a str,
    pub now_unix_ms: u64,
}

pub fn render_control_panel_embed(panel: &ControlPanel<'_>) -> DiscordEmbed {
    let members = panel
        .group
        .member_count
        .map(|count| count.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let status_channel = panel
        .status_channel_id
        .map(|channel_id| format!("<#{channel_id}>"))
        .unwrap_or_else(|| "Not set".to_string());
    let mut embed = DiscordEmbed::titled("\u{1f4ec} Mass DM Panel")
        .description("Choose an action below to send direct messages to server members.")
        .color(COLOR_BLURPLE)
        .field(
            "\u{1f4ca} Server Info",
            format!(
                "**Server:** {}\n**Members:** {members}\n**Log Channel:** {status_channel}",
                panel.group.name
            ),
            false,
        )
        .field(
            "\u{1f4dd} Tips",
            "- Use `<user>` in your message to mention each recipient\n\
             - Set delay between 0.5-30 seconds to avoid rate limits\n\
             - Click **Stop** to abort at any time",
            false,
        )
        .footer(format!("Requested by {}", panel.requested_by))
        .timestamp_ms(panel.now_unix_ms);
    if let Some(icon_url) = panel.group.icon_url.as_deref() {
        embed = embed.thumbnail(icon_url);
    }
    embed
}

pub fn render_role_picker_embed() -> DiscordEmbed {
    DiscordEmbed::titled("\u{1f3ad} Select Roles")
        .description(
            "Choose which roles to send the message to, then click **Confirm & Type Message**.",
        )
        .color(COLOR_GREEN)
}

pub fn render_online_embed(now_unix_ms: u64) -> DiscordEmbed {
    DiscordEmbed::titled("\u{1f7e2} Bot Online")
        .description("Mass DM Bot is ready!\nUse `/massdm` to open the control panel.")
        .color(COLOR_GREEN)
        .timestamp_ms(now_unix_ms)
}

#[cfg(test)]
mod tests {
    use courier_dispatch::ProgressSnapshot;

    use super::*;

    fn card(status: DispatchStatus, extra: Option<&str>) -> ProgressCard {
        let mut snapshot = ProgressSnapshot::new(10).with_status(status);
        snapshot.sent = 6;
        snapshot.failed = 1;
        snapshot.dm_closed = 1;
        ProgressCard {
            title: "Mass DM In Progress...".to_string(),
            snapshot,
            extra: extra.map(str::to_string),
            timestamp_unix_ms: 0,
        }
    }

    #[test]
    fn unit_render_progress_embed_lays_out_fields() {
        let embed = render_progress_embed(&card(DispatchStatus::InProgress, None));
        assert_eq!(embed.color, Some(COLOR_BLUE));
        assert!(embed
            .title
            .as_deref()
            .is_some_and(|title| title.ends_with("Mass DM In Progress...")));
        let names = embed
            .fields
            .iter()
            .map(|field| field.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Progress", "Sent", "Failed", "DM Closed"]);
        assert!(embed.fields[0].value.ends_with("80% (8/10)"));
        assert!(!embed.fields[0].inline);
        assert_eq!(embed.fields[1].value, "```\n6\n```");
        assert!(embed.fields[1].inline);
        assert_eq!(embed.timestamp.as_deref(), Some("1970-01-01T00:00:00.000Z"));
    }

    #[test]
    fn unit_status_colors_distinguish_terminal_states() {
        assert_eq!(status_color(DispatchStatus::Complete), COLOR_GREEN);
        assert_eq!(status_color(DispatchStatus::Stopped), COLOR_ORANGE);
        assert_eq!(status_color(DispatchStatus::Errored), COLOR_RED);
        let errored = render_progress_embed(&card(DispatchStatus::Errored, Some("fetch failed")));
        assert_eq!(errored.fields.last().map(|field| field.name.as_str()), Some("Info"));
    }

    #[test]
    fn functional_embed_serialization_omits_empty_members() {
        let payload = serde_json::to_value(DiscordEmbed::titled("t")).expect("serialize");
        assert_eq!(payload, serde_json::json!({"title": "t"}));
    }

    #[test]
    fn unit_control_panel_embed_reports_group_and_status_channel() {
        let group = GroupSummary {
            id: "1".to_string(),
            name: "Guild".to_string(),
            member_count: Some(42),
            icon_url: Some("https://cdn.example/icon.png".to_string()),
        };
        let embed = render_control_panel_embed(&ControlPanel {
            group: &group,
            status_channel_id: Some("99"),
            requested_by: "operator",
            now_unix_ms: 0,
        });
        assert!(embed.fields[0].value.contains("**Members:** 42"));
        assert!(embed.fields[0].value.contains("<#99>"));
        assert_eq!(
            embed.footer.map(|footer| footer.text),
            Some("Requested by operator".to_string())
        );
        assert!(embed.thumbnail.is_some());
    }
}
