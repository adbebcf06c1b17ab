pub mod config;
pub mod error;

pub use config::{
    ArthuronConfig, RealtimeConfig, RelayConfig, ServerConfig, SynthesisConfig, VoiceSettings,
};
pub use error::{ConfigError, IntakeError, RelayError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A piece of text accepted by the intake, tagged with its submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub seq: u64,
    pub text: String,
}

/// End-of-utterance marker. Shares the sequence space of [`TextFragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSignal {
    pub seq: u64,
}

/// A caller-originated instruction for the relay worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Text(TextFragment),
    Flush(FlushSignal),
}

impl Command {
    pub fn seq(&self) -> u64 {
        match self {
            Command::Text(fragment) => fragment.seq,
            Command::Flush(signal) => signal.seq,
        }
    }
}

/// What the relay writes to the synthesis connection.
///
/// `Keepalive` is produced by the worker itself and never enters the
/// command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text { text: String, trigger_generation: bool },
    Flush,
    Keepalive,
}

impl OutboundMessage {
    pub fn is_keepalive(&self) -> bool {
        matches!(self, OutboundMessage::Keepalive)
    }
}

impl From<Command> for OutboundMessage {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Text(fragment) => OutboundMessage::Text {
                text: fragment.text,
                trigger_generation: true,
            },
            Command::Flush(_) => OutboundMessage::Flush,
        }
    }
}

/// What the synthesis connection yields back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Audio(AudioFrame),
    /// Structured status/control record, kept verbatim.
    Status(String),
}

/// Opaque chunk of encoded audio, delivered in arrival order.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioFrame({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for AudioFrame {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

/// Lifecycle of the relay's upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: entered on shutdown, never left.
    Draining,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Disconnected => "disconnected",
            RelayState::Connecting => "connecting",
            RelayState::Connected => "connected",
            RelayState::Draining => "draining",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
