//! HTTP front-ends for the Courier dispatch engine.
pub mod gateway_server;

pub use gateway_server::*;
