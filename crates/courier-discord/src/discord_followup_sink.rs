//! Interactive progress sink backed by an interaction follow-up message.

use anyhow::Result;
use async_trait::async_trait;
use courier_dispatch::{ProgressCard, ProgressSink};
use serde_json::json;

use crate::discord_api_client::DiscordRestClient;
use crate::discord_embed::render_progress_embed;
use crate::discord_interactions::EPHEMERAL_FLAG;

/// Edits one ephemeral follow-up in place for the user who started the run.
pub struct FollowupProgressSink {
    client: DiscordRestClient,
    interaction_token: String,
    message_id: Option<String>,
}

impl FollowupProgressSink {
    pub fn new(client: DiscordRestClient, interaction_token: impl Into<String>) -> Self {
        Self {
            client,
            interaction_token: interaction_token.into(),
            message_id: None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }
}

#[async_trait]
impl ProgressSink for FollowupProgressSink {
    fn label(&self) -> &str {
        "interaction_followup"
    }

    async fn open(&mut self, card: &ProgressCard) -> Result<()> {
        let body = json!({
            "embeds": [render_progress_embed(card)],
            "flags": EPHEMERAL_FLAG,
        });
        let message_id = self
            .client
            .create_followup(&self.interaction_token, &body)
            .await?;
        self.message_id = Some(message_id);
        Ok(())
    }

    async fn update(&mut self, card: &ProgressCard) -> Result<()> {
        let Some(message_id) = self.message_id.clone() else {
            return self.open(card).await;
        };
        let body = json!({ "embeds": [render_progress_embed(card)] });
        self.client
            .edit_followup(&self.interaction_token, &message_id, &body)
            .await
    }
}
