//! Configuration models, validation, and runtime commands for the `courier` binary.
//!
//! Every subcommand builds its Discord client and dispatch engine from the
//! same validated [`Cli`] so the terminal, web console, and interactions
//! front-ends share one configuration surface.

pub mod cli_args;
pub mod cli_types;
pub mod runtime_commands;
pub mod startup_config;

pub use cli_args::{Cli, CliCommand};
pub use cli_types::*;
pub use runtime_commands::*;
pub use startup_config::*;
