//! The relay worker: owns the upstream synthesis connection.
//!
//! One background task drains the ordered command channel into the
//! connection and pushes returned audio into the [`AudioBuffer`]. Upstream
//! failures never escape this task; they become a `Disconnected` state
//! followed by a fixed backoff and a new `Connecting` attempt, forever,
//! until shutdown moves the relay to the terminal `Draining` state.

use crate::buffer::AudioBuffer;
use crate::intake::TextIntake;
use crate::upstream::{UpstreamConnector, UpstreamSession, UpstreamSink, UpstreamStream};
use arthuron_core::{
    Command, InboundMessage, IntakeError, OutboundMessage, RelayConfig, RelayError, RelayState,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Counters for diagnostics. Written only by the worker.
#[derive(Debug, Default)]
pub struct RelayStats {
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    commands_sent: AtomicU64,
    keepalives_sent: AtomicU64,
    frames_received: AtomicU64,
    status_messages: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub connect_attempts: u64,
    pub connections: u64,
    pub commands_sent: u64,
    pub keepalives_sent: u64,
    pub frames_received: u64,
    pub status_messages: u64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            status_messages: self.status_messages.load(Ordering::Relaxed),
        }
    }
}

/// Timing knobs of the worker.
#[derive(Debug, Clone, Copy)]
pub struct RelayTiming {
    pub keepalive_interval: Duration,
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
}

impl From<&RelayConfig> for RelayTiming {
    fn from(config: &RelayConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval(),
            reconnect_backoff: config.reconnect_backoff(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Cloneable access to a running relay for the request-handling side.
///
/// Exposes the intake, the audio buffer and read-only views of the worker's
/// state. The connection itself is never reachable from here.
#[derive(Clone)]
pub struct RelayHandle {
    intake: TextIntake,
    buffer: Arc<AudioBuffer>,
    state_rx: watch::Receiver<RelayState>,
    stats: Arc<RelayStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RelayHandle {
    pub fn intake(&self) -> &TextIntake {
        &self.intake
    }

    /// Queue a text fragment; refused once shutdown was requested.
    pub fn submit(&self, text: impl Into<String>) -> Result<u64, IntakeError> {
        if self.is_shutting_down() {
            return Err(IntakeError::Closed);
        }
        self.intake.submit(text)
    }

    /// Queue a flush; refused once shutdown was requested.
    pub fn flush(&self) -> Result<u64, IntakeError> {
        if self.is_shutting_down() {
            return Err(IntakeError::Closed);
        }
        self.intake.flush()
    }

    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    /// Current relay state.
    pub fn state(&self) -> RelayState {
        *self.state_rx.borrow()
    }

    /// Get a watch receiver for relay state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Request shutdown: stop taking commands, close the connection, never
    /// reconnect, and release every consumer waiting on the audio buffer.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            tracing::info!("Relay shutdown requested");
        }
        self.buffer.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Entry point for starting the relay.
pub struct Relay;

impl Relay {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        config: &RelayConfig,
        connector: Arc<dyn UpstreamConnector>,
    ) -> (RelayHandle, JoinHandle<()>) {
        Self::spawn_with_timing(
            config.command_capacity,
            config.buffer_capacity,
            RelayTiming::from(config),
            connector,
        )
    }

    pub fn spawn_with_timing(
        command_capacity: usize,
        buffer_capacity: usize,
        timing: RelayTiming,
        connector: Arc<dyn UpstreamConnector>,
    ) -> (RelayHandle, JoinHandle<()>) {
        let (intake, commands) = TextIntake::channel(command_capacity);
        let buffer = Arc::new(AudioBuffer::new(buffer_capacity));
        let (state_tx, state_rx) = watch::channel(RelayState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(RelayStats::default());

        let worker = RelayWorker {
            connector,
            commands,
            buffer: buffer.clone(),
            state_tx,
            stats: stats.clone(),
            shutdown_rx,
            timing,
            unsent: None,
        };
        let task = tokio::spawn(worker.run());

        let handle = RelayHandle {
            intake,
            buffer,
            state_rx,
            stats,
            shutdown_tx: Arc::new(shutdown_tx),
        };
        (handle, task)
    }
}

enum SessionEnd {
    Shutdown,
    Lost(RelayError),
}

struct RelayWorker {
    connector: Arc<dyn UpstreamConnector>,
    commands: mpsc::Receiver<Command>,
    buffer: Arc<AudioBuffer>,
    state_tx: watch::Sender<RelayState>,
    stats: Arc<RelayStats>,
    shutdown_rx: watch::Receiver<bool>,
    timing: RelayTiming,
    /// Command whose send did not complete; replayed first on the next connection.
    unsent: Option<OutboundMessage>,
}

/// Resolves once shutdown is requested or the handle side is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl RelayWorker {
    fn set_state(&self, state: RelayState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Relay state change");
        }
    }

    async fn run(mut self) {
        let target = self.connector.describe();
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.set_state(RelayState::Connecting);
            let attempt = RelayStats::bump(&self.stats.connect_attempts);
            let connect = tokio::time::timeout(self.timing.connect_timeout, self.connector.connect());
            let result = tokio::select! {
                r = connect => r,
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            };

            match result {
                Ok(Ok(session)) => {
                    RelayStats::bump(&self.stats.connections);
                    self.set_state(RelayState::Connected);
                    tracing::info!(attempt, "Connected to {}", target);
                    match self.drive(session).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            tracing::warn!("Synthesis connection lost: {}", e);
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt, "Failed to connect to {}: {}", target, e);
                }
                Err(_) => {
                    let e = RelayError::Timeout(self.timing.connect_timeout);
                    tracing::warn!(attempt, "Failed to connect to {}: {}", target, e);
                }
            }

            self.set_state(RelayState::Disconnected);
            tracing::info!(
                "Reconnecting in {:.1}s...",
                self.timing.reconnect_backoff.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.timing.reconnect_backoff) => {}
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            }
        }

        self.set_state(RelayState::Draining);
        self.commands.close();
        self.buffer.close();
        tracing::info!("Relay worker stopped");
    }

    /// Run both duties against one session until either ends, then close it.
    async fn drive(&mut self, session: UpstreamSession) -> SessionEnd {
        let UpstreamSession {
            mut sink,
            mut stream,
        } = session;

        let end = {
            let RelayWorker {
                commands,
                buffer,
                stats,
                shutdown_rx,
                timing,
                unsent,
                ..
            } = self;

            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown_rx) => SessionEnd::Shutdown,
                end = send_duty(&mut sink, commands, unsent, stats, timing.keepalive_interval) => end,
                err = receive_duty(&mut stream, buffer, stats) => SessionEnd::Lost(err),
            }
        };

        match tokio::time::timeout(self.timing.connect_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Error closing synthesis connection: {}", e),
            Err(_) => tracing::debug!(
                "Synthesis connection did not close within {:?}, dropping it",
                self.timing.connect_timeout
            ),
        }
        end
    }
}

/// Forward commands in order; send a keepalive only after a full idle interval.
async fn send_duty(
    sink: &mut UpstreamSink,
    commands: &mut mpsc::Receiver<Command>,
    unsent: &mut Option<OutboundMessage>,
    stats: &RelayStats,
    keepalive_interval: Duration,
) -> SessionEnd {
    // `unsent` is cleared only once a send completes, so a send abandoned
    // mid-flight by the receive side failing is still replayed.
    if let Some(msg) = unsent.clone() {
        tracing::debug!("Replaying command lost with the previous connection");
        if let Err(e) = sink.send(msg).await {
            return SessionEnd::Lost(e);
        }
        *unsent = None;
        RelayStats::bump(&stats.commands_sent);
    }

    let mut last_sent = Instant::now();
    loop {
        let keepalive_at = last_sent + keepalive_interval;
        // Commands win over an expired keepalive timer.
        let msg = tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(cmd) => {
                    tracing::debug!(seq = cmd.seq(), "Forwarding command upstream");
                    OutboundMessage::from(cmd)
                }
                None => return SessionEnd::Shutdown,
            },
            _ = tokio::time::sleep_until(keepalive_at) => OutboundMessage::Keepalive,
        };

        let keepalive = msg.is_keepalive();
        if !keepalive {
            *unsent = Some(msg.clone());
        }
        if let Err(e) = sink.send(msg).await {
            return SessionEnd::Lost(e);
        }
        *unsent = None;
        if keepalive {
            RelayStats::bump(&stats.keepalives_sent);
        } else {
            RelayStats::bump(&stats.commands_sent);
        }
        last_sent = Instant::now();
    }
}

/// Read until the connection fails or closes. Audio goes to the buffer.
async fn receive_duty(stream: &mut UpstreamStream, buffer: &AudioBuffer, stats: &RelayStats) -> RelayError {
    loop {
        match stream.next().await {
            Some(Ok(InboundMessage::Audio(frame))) => {
                RelayStats::bump(&stats.frames_received);
                buffer.push(frame);
            }
            Some(Ok(InboundMessage::Status(status))) => {
                RelayStats::bump(&stats.status_messages);
                tracing::debug!(
                    "Synthesis status: {}",
                    status.chars().take(200).collect::<String>()
                );
            }
            Some(Err(e)) => return e,
            None => return RelayError::Closed,
        }
    }
}
