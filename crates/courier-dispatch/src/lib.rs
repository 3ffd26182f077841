//! Bulk direct-message dispatch engine.
//!
//! Resolves the eligible members of a group, delivers a templated message to
//! each of them in turn with a single-retry rate-limit policy, and streams
//! progress to front-ends and optional status sinks. Sessions are keyed by an
//! opaque identifier and can be stopped cooperatively at any time.
//!
//! ```rust
//! use courier_dispatch::{normalize_delay_seconds, render_message_for, Recipient};
//!
//! let member = Recipient {
//!     id: "42".to_string(),
//!     display_name: "operator".to_string(),
//!     role_ids: Vec::new(),
//!     is_bot: false,
//! };
//! assert_eq!(render_message_for("hi <user>", &member), "hi <@42>");
//! assert_eq!(normalize_delay_seconds(Some("0.1")), 0.5);
//! ```

pub mod dispatch_contract;
pub mod dispatch_engine;
pub mod dispatch_error;
pub mod dispatch_loop;
pub mod dispatch_platform;
pub mod progress_reporter;
pub mod recipient_resolver;
pub mod retry_policy;
pub mod session_registry;

pub use dispatch_contract::*;
pub use dispatch_engine::*;
pub use dispatch_error::*;
pub use dispatch_loop::*;
pub use dispatch_platform::*;
pub use progress_reporter::*;
pub use recipient_resolver::*;
pub use retry_policy::*;
pub use session_registry::*;
