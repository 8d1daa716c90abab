//! Domain model module declarations.

pub mod client;
pub mod envelope;
pub mod message;
pub mod task;
