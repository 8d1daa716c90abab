//! Bridge composition: orchestrator, handshake, and process supervision.

pub mod handshake;
pub mod orchestrator;
pub mod supervisor;

pub use handshake::HandshakeCoordinator;
pub use orchestrator::{BridgeOrchestrator, Discovery, ToolCallAck, BRIDGE_CLIENT_ID};
pub use supervisor::ProcessSupervisor;
