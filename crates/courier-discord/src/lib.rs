//! Discord transport for the Courier dispatch engine.
//!
//! Provides the bot-token REST client (implementing `DispatchPlatform`),
//! embed rendering for progress cards, the interaction model used by the
//! `/massdm` control panel, and the follow-up progress sink.

pub mod discord_api_client;
pub mod discord_embed;
pub mod discord_followup_sink;
pub mod discord_interactions;

pub use discord_api_client::*;
pub use discord_embed::*;
pub use discord_followup_sink::*;
pub use discord_interactions::*;
