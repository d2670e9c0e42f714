//! Per-connection socket tasks and action execution.
//!
//! Each accepted connection gets a reader task and a writer task. Neither
//! touches connection state: the reader turns socket bytes into
//! [`ServerEvent::BytesReceived`], the writer writes what the event loop hands
//! it and answers with [`ServerEvent::WriteCompleted`]. The loop therefore
//! never awaits socket IO.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    driver::{LogLevel, ServerAction, ServerEvent},
    server_error::ExecutorError,
};

/// Initial read buffer capacity per connection.
const READ_CHUNK: usize = 8 * 1024;

/// Instructions for a connection's writer task.
#[derive(Debug)]
enum Outbound {
    /// Write one response
    Send(Bytes),
    /// Shut the socket down after everything before it is written
    Close,
}

/// The event loop's grip on one connection's IO tasks.
#[derive(Debug)]
pub struct ConnectionHandle {
    connection_id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Split `stream` and spawn its reader and writer tasks.
    pub fn spawn<T>(connection_id: u64, stream: T, events: mpsc::Sender<ServerEvent>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(connection_id, read_half, events.clone()));
        tokio::spawn(write_loop(connection_id, write_half, outbound_rx, events));

        Self { connection_id, outbound, reader }
    }

    /// Hand one response to the writer.
    pub fn send(&self, bytes: Bytes) -> Result<(), ExecutorError> {
        self.outbound.send(Outbound::Send(bytes)).map_err(|_| ExecutorError::SendFailed {
            connection_id: self.connection_id,
            reason: "writer task has exited".to_string(),
        })
    }

    /// Stop reading and close the socket once queued writes are flushed.
    ///
    /// Responses sent after this are discarded.
    pub fn close(self) {
        self.reader.abort();
        if self.outbound.send(Outbound::Close).is_err() {
            tracing::debug!("connection {} writer already gone", self.connection_id);
        }
    }
}

/// Execute driver actions against the live connection handles.
pub fn execute_actions(actions: Vec<ServerAction>, handles: &mut HashMap<u64, ConnectionHandle>) {
    for action in actions {
        match action {
            ServerAction::SendToConnection { connection_id, bytes } => {
                match handles.get(&connection_id) {
                    Some(handle) => {
                        if let Err(e) = handle.send(bytes) {
                            tracing::debug!("{}", e);
                        }
                    },
                    None => {
                        tracing::warn!("SendToConnection: connection {} not found", connection_id);
                    },
                }
            },

            ServerAction::CloseConnection { connection_id, reason } => {
                tracing::info!("Closing connection {}: {}", connection_id, reason);
                if let Some(handle) = handles.remove(&connection_id) {
                    handle.close();
                }
            },

            ServerAction::Log { level, message, .. } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

async fn read_loop<R>(connection_id: u64, mut reader: R, events: mpsc::Sender<ServerEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let reason = loop {
        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break "peer closed".to_string(),
            Ok(_) => {
                let bytes = buf.split().freeze();
                let event = ServerEvent::BytesReceived { connection_id, bytes };
                if events.send(event).await.is_err() {
                    return;
                }
            },
            Err(e) => break ExecutorError::Transport(e.to_string()).to_string(),
        }
    };

    // Loop may already be gone during shutdown
    let _ = events.send(ServerEvent::ConnectionClosed { connection_id, reason }).await;
}

async fn write_loop<W>(
    connection_id: u64,
    mut writer: WriteHalf<W>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<ServerEvent>,
) where
    W: AsyncWrite,
{
    while let Some(message) = outbound.recv().await {
        let bytes = match message {
            Outbound::Send(bytes) => bytes,
            Outbound::Close => break,
        };

        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        let event = match written {
            Ok(()) => ServerEvent::WriteCompleted { connection_id },
            Err(e) => ServerEvent::ConnectionClosed {
                connection_id,
                reason: ExecutorError::Transport(e.to_string()).to_string(),
            },
        };
        let failed = matches!(event, ServerEvent::ConnectionClosed { .. });

        if events.send(event).await.is_err() || failed {
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("connection {} shutdown: {}", connection_id, e);
    }
}
