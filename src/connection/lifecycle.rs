//! Connection Lifecycle
//!
//! Drives one accepted connection from activation to teardown inside the
//! task that owns its socket.

use super::{ConnectionHandle, ConnectionState, Flow, KeepAliveScheduler, StageChain};
use crate::events::Events;
use crate::listener::ListenerSnapshot;
use crate::metrics::TrafficRegistry;
use crate::protocol::engine::welcome_frames;
use crate::protocol::{CodecError, EngineFlow, Frame, FrameCodec, LimboEngine, ProtocolEngine};
use crate::Result;
use anyhow::Context;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, instrument, warn};

pub const IDLE_TIMEOUT_REASON: &str = "Timed out.";
const READ_BUFFER_SIZE: usize = 4096;

/// Process-wide services every connection reports to
#[derive(Clone)]
pub struct ConnectionServices {
    pub registry: Arc<TrafficRegistry>,
    pub events: Arc<Events>,
}

impl ConnectionServices {
    pub fn new(registry: Arc<TrafficRegistry>, events: Arc<Events>) -> Self {
        Self { registry, events }
    }
}

pub struct ConnectionLifecycle {
    connection: Arc<ConnectionHandle>,
    snapshot: Arc<ListenerSnapshot>,
    chain: StageChain,
    keep_alive: KeepAliveScheduler,
    engine: Box<dyn ProtocolEngine>,
    codec: FrameCodec,
    registry: Arc<TrafficRegistry>,
}

impl ConnectionLifecycle {
    /// Lifecycle with the built-in engine
    pub fn new(
        connection: Arc<ConnectionHandle>,
        snapshot: Arc<ListenerSnapshot>,
        services: &ConnectionServices,
    ) -> Self {
        let engine = Box::new(LimboEngine::new(
            snapshot.config.clone(),
            snapshot.status.clone(),
        ));
        Self::with_engine(connection, snapshot, services, engine)
    }

    pub fn with_engine(
        connection: Arc<ConnectionHandle>,
        snapshot: Arc<ListenerSnapshot>,
        services: &ConnectionServices,
        engine: Box<dyn ProtocolEngine>,
    ) -> Self {
        let chain = StageChain::for_connection(
            snapshot.forward.clone(),
            welcome_frames(&snapshot.config.message),
            services.registry.clone(),
            services.events.clone(),
        );
        Self {
            keep_alive: KeepAliveScheduler::new(snapshot.config.keep_alive_interval),
            connection,
            snapshot,
            chain,
            engine,
            codec: FrameCodec::new(),
            registry: services.registry.clone(),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    /// Run until the connection ends, then tear down
    #[instrument(name = "connection", skip_all, fields(id = %self.connection.id(), listener = %self.snapshot.config.name))]
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let result = self.drive(&mut reader, &mut writer).await;

        self.connection.advance(ConnectionState::Closing);
        self.keep_alive.cancel();
        if let Err(e) = result {
            self.report_error(e);
        }
        if let Err(e) = writer.shutdown().await {
            debug!("Socket shutdown failed: {}", e);
        }
        self.connection.advance(ConnectionState::Closed);
        self.chain
            .fire_inactive(&self.connection, &self.snapshot.config);
    }

    async fn drive<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let config = self.snapshot.config.clone();

        let mut outbound = Vec::new();
        if let Flow::Close(reason) = self
            .chain
            .fire_active(&self.connection, &config, &mut outbound)
        {
            return self.disconnect(writer, reason).await;
        }
        self.write_frames(writer, outbound).await?;

        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let idle = sleep(config.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                read = reader.read_buf(&mut buffer) => {
                    let n = read.context("Failed to read from client")?;
                    if n == 0 {
                        debug!("Connection closed by peer");
                        return Ok(());
                    }
                    self.registry.record_rx(n as u64);
                    idle.as_mut().reset(Instant::now() + config.idle_timeout);

                    while let Some(frame) = self.codec.decode(&mut buffer)? {
                        if let Flow::Close(reason) = self.process_inbound(writer, frame).await? {
                            return self.disconnect(writer, reason).await;
                        }
                    }
                }
                probe = self.keep_alive.next_probe(&self.connection) => {
                    if let Some(frame) = probe {
                        self.write_frames(writer, vec![frame]).await?;
                    }
                }
                _ = self.connection.wait_for_close() => {
                    let reason = self.connection.close_reason();
                    return self.disconnect(writer, reason).await;
                }
                _ = &mut idle => {
                    debug!(timeout = ?config.idle_timeout, "Idle timeout reached");
                    return self.disconnect(writer, Some(IDLE_TIMEOUT_REASON.to_string())).await;
                }
            }
        }
    }

    async fn process_inbound<W>(&mut self, writer: &mut W, frame: Frame) -> Result<Flow>
    where
        W: AsyncWrite + Unpin,
    {
        let config = self.snapshot.config.clone();
        let mut outbound = Vec::new();

        if let Flow::Close(reason) =
            self.chain
                .fire_inbound(&self.connection, &config, &mut outbound, &frame)
        {
            return Ok(Flow::Close(reason));
        }

        let flow = self.engine.handle(&frame, &self.connection, &mut outbound);
        self.write_frames(writer, outbound).await?;

        Ok(match flow {
            EngineFlow::Continue => Flow::Continue,
            EngineFlow::Close => Flow::Close(None),
        })
    }

    /// Encode and write frames in order, running post-write stages after each
    async fn write_frames<W>(&mut self, writer: &mut W, frames: Vec<Frame>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let config = self.snapshot.config.clone();
        let mut queue: VecDeque<Frame> = frames.into();
        let mut buffer = BytesMut::new();

        while let Some(frame) = queue.pop_front() {
            buffer.clear();
            self.codec.encode(&frame, &mut buffer)?;
            writer
                .write_all(&buffer)
                .await
                .context("Failed to write to client")?;
            writer.flush().await.context("Failed to flush client socket")?;
            self.registry.record_tx(buffer.len() as u64);

            let mut queued = Vec::new();
            self.chain
                .fire_written(&self.connection, &config, &mut queued, &frame);
            if self.keep_alive.observe_written(&frame) {
                debug!(interval = ?config.keep_alive_interval, "Keep-alive scheduled");
            }
            queue.extend(queued);
        }
        Ok(())
    }

    /// Mark closing and deliver `reason` if the protocol state allows it
    async fn disconnect<W>(&mut self, writer: &mut W, reason: Option<String>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.connection.advance(ConnectionState::Closing);
        let Some(reason) = reason else {
            return Ok(());
        };
        debug!(reason = %reason, "Disconnecting {}", self.connection);

        if self.codec.can_disconnect() {
            let mut buffer = BytesMut::new();
            self.codec.encode(&Frame::Disconnect(reason), &mut buffer)?;
            writer.write_all(&buffer).await?;
            writer.flush().await?;
            self.registry.record_tx(buffer.len() as u64);
        }
        Ok(())
    }

    /// Logged off the connection task unless the listener runs in debug mode
    fn report_error(&self, error: anyhow::Error) {
        if is_quiet(&error) {
            debug!("{} closed: {}", self.connection, error);
            return;
        }

        let listener = self.snapshot.config.name.clone();
        let connection = self.connection.to_string();
        if self.snapshot.config.debug {
            error!(listener = %listener, "{} exception caught: {:?}", connection, error);
        } else {
            tokio::spawn(async move {
                warn!(listener = %listener, "{} exception caught: {:#}", connection, error);
            });
        }
    }
}

/// Errors that are part of normal client behaviour
fn is_quiet(error: &anyhow::Error) -> bool {
    if let Some(CodecError::LegacyPing) = error.downcast_ref::<CodecError>() {
        return true;
    }
    error.chain().any(|cause| {
        cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            )
        })
    })
}
