#![forbid(unsafe_code)]

//! Message bridge between MCP clients over Unix-domain sockets.

pub mod bridge;
pub mod config;
pub mod errors;
pub mod events;
pub mod mcp;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod socket;
pub mod transport;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
