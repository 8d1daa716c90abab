//! Per-socket connection adapter.
//!
//! Owns one live Unix-domain stream. A reader task feeds received bytes
//! through [`FrameCodec`] and emits one [`SocketEvent::Message`] per complete
//! frame, in receipt order. Sends are serialized through a write lock and
//! resolve once the bytes are flushed to the OS.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::codec::{FrameCodec, FrameOptions};
use super::SocketEvent;
use crate::models::envelope::Envelope;
use crate::{AppError, Result};

/// One live socket connection.
#[derive(Debug)]
pub struct ConnectionAdapter {
    id: String,
    codec: FrameCodec,
    writer: Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
    disconnect_reported: AtomicBool,
    last_activity_ms: AtomicI64,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl ConnectionAdapter {
    /// Wrap `stream` and start its reader task.
    ///
    /// Events are tagged with `id` and sent through `events`.
    #[must_use]
    pub fn spawn(
        id: impl Into<String>,
        stream: UnixStream,
        options: FrameOptions,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        let adapter = Arc::new(Self {
            id: id.into(),
            codec: FrameCodec::new(options),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            disconnect_reported: AtomicBool::new(false),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            events,
        });

        let span = info_span!("socket_conn", connection_id = %adapter.id);
        tokio::spawn(Arc::clone(&adapter).read_loop(reader).instrument(span));
        adapter
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the connection is neither destroyed nor disconnected.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Time of the most recent send or receive.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Send one frame, appending the delimiter if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection is inactive or the
    /// write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_active() {
            return Err(AppError::Transport(format!(
                "connection {} is not active",
                self.id
            )));
        }

        let mut frame = BytesMut::new();
        self.codec.frame_into(&envelope.to_bytes(), &mut frame);

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|err| AppError::Transport(format!("write to {} failed: {err}", self.id)))?;
        writer
            .flush()
            .await
            .map_err(|err| AppError::Transport(format!("flush to {} failed: {err}", self.id)))?;
        drop(writer);

        self.touch();
        Ok(())
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if let Err(err) = self.writer.lock().await.shutdown().await {
            debug!(connection_id = %self.id, %err, "socket shutdown failed");
        }
        self.report_disconnect();
    }

    fn report_disconnect(&self) {
        if !self.disconnect_reported.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(SocketEvent::Disconnected {
                connection_id: self.id.clone(),
            });
        }
    }

    fn report_error(&self, error: AppError) {
        let _ = self.events.send(SocketEvent::Error {
            connection_id: Some(self.id.clone()),
            error,
        });
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut codec = self.codec.clone();
        let mut buf = BytesMut::with_capacity(8 * 1024);

        loop {
            let read = tokio::select! {
                biased;
                () = self.closed.cancelled() => break,
                read = reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!("peer closed connection");
                    break;
                }
                Ok(_) => {
                    self.touch();
                    self.drain_frames(&mut codec, &mut buf);
                }
                Err(err) => {
                    warn!(%err, "socket read failed");
                    self.report_error(AppError::Transport(format!("read failed: {err}")));
                    break;
                }
            }
        }

        self.closed.cancel();
        self.report_disconnect();
    }

    fn drain_frames(&self, codec: &mut FrameCodec, buf: &mut BytesMut) {
        loop {
            match codec.decode(buf) {
                Ok(Some(frame)) => {
                    if frame.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let _ = self.events.send(SocketEvent::Message {
                        connection_id: self.id.clone(),
                        envelope: Envelope::decode(&frame),
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "dropping oversized frame");
                    self.report_error(err);
                }
            }
        }
    }
}
