//! Model Context Protocol surface of the bridge.

pub mod handler;
pub mod tools;
pub mod transport;
