#![forbid(unsafe_code)]

//! `mcp-bridge-ctl`: local CLI companion for `mcp-bridge`.
//!
//! Connects to the bridge socket, sends one frame or handshake step, and
//! prints inbound frames until the wait window closes.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use mcp_bridge::models::client::{ClientCapabilities, ClientType};
use mcp_bridge::models::message::{HandshakeMessage, HandshakePayload, HandshakePhase};
use mcp_bridge::socket::FrameOptions;
use mcp_bridge::transport::{ClientTransport, MessageTransport, TransportEvent};
use mcp_bridge::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "mcp-bridge-ctl",
    about = "Local CLI for the mcp-bridge socket",
    version,
    long_about = None
)]
struct Cli {
    /// Bridge socket path.
    #[arg(long, default_value = "/tmp/mcp-bridge.sock")]
    socket_path: PathBuf,

    /// How long to print inbound frames after sending, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    wait_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one raw frame (JSON or text).
    Send {
        /// Frame contents.
        frame: String,
    },

    /// Ask the bridge to introduce this client to a peer.
    Handshake {
        /// Id this client registers under.
        #[arg(long)]
        client_id: String,
        /// This client's type.
        #[arg(long, default_value = "other")]
        client_type: ClientType,
        /// Peer type to be introduced to.
        #[arg(long)]
        peer_type: ClientType,
        /// Connection id correlating the handshake; random when omitted.
        #[arg(long)]
        connection_id: Option<String>,
    },

    /// Accept an introduction previously requested by the bridge.
    Accept {
        /// Id of the accepting client.
        #[arg(long)]
        client_id: String,
        /// Connection id from the `request` step.
        #[arg(long)]
        connection_id: String,
    },

    /// Print inbound frames without sending anything.
    Listen,
}

fn main() {
    let args = Cli::parse();

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        eprintln!("Is mcp-bridge running in socket mode?");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let transport = ClientTransport::new(&args.socket_path, FrameOptions::default());
    let mut events = transport.subscribe_queue();
    transport.connect().await?;

    if let Some(frame) = outbound_frame(&args.command)? {
        transport.send(&frame).await?;
    }

    let deadline = tokio::time::sleep(Duration::from_millis(args.wait_ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = events.recv() => match event {
                Some(TransportEvent::Message(text)) => println!("{text}"),
                Some(TransportEvent::Error(err)) => eprintln!("transport error: {err}"),
                Some(TransportEvent::Closed) | None => break,
            }
        }
    }

    transport.disconnect().await
}

fn outbound_frame(command: &Command) -> Result<Option<String>> {
    let handshake = match command {
        Command::Listen => return Ok(None),
        Command::Send { frame } => return Ok(Some(frame.clone())),
        Command::Handshake {
            client_id,
            client_type,
            peer_type,
            connection_id,
        } => HandshakeMessage::new(
            HandshakePhase::Initiate,
            client_id.clone(),
            None,
            HandshakePayload {
                capabilities: ClientCapabilities {
                    client_type: Some(*client_type),
                    peer_type: Some(*peer_type),
                    ..ClientCapabilities::default()
                },
                connection_id: connection_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            },
        ),
        Command::Accept {
            client_id,
            connection_id,
        } => HandshakeMessage::new(
            HandshakePhase::Accept,
            client_id.clone(),
            None,
            HandshakePayload {
                capabilities: ClientCapabilities::default(),
                connection_id: connection_id.clone(),
            },
        ),
    };

    serde_json::to_string(&handshake.into_message())
        .map(Some)
        .map_err(|err| AppError::Handshake(format!("failed to encode handshake: {err}")))
}
