//! Foundational low-level utilities shared across Courier crates.
//!
//! Provides time helpers used by progress cards and text helpers used when
//! platform error bodies are folded into log lines.

pub mod text_utils;
pub mod time_utils;

pub use text_utils::{is_snowflake, truncate_for_error};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, format_unix_ms_rfc3339};
