//! Streaming text-to-speech relay.
//!
//! Text fragments enter through [`TextIntake`], are forwarded in order by the
//! [`Relay`] worker over a persistent synthesis connection, and the audio that
//! comes back is republished through the bounded [`AudioBuffer`].

mod buffer;
mod format;
mod intake;
mod relay;
mod upstream;
mod websocket;

pub use buffer::AudioBuffer;
pub use format::OutputFormat;
pub use intake::TextIntake;
pub use relay::{Relay, RelayHandle, RelayStats, RelayStatsSnapshot, RelayTiming};
pub use upstream::{UpstreamConnector, UpstreamSession, UpstreamSink, UpstreamStream};
pub use websocket::{encode as encode_outbound, WebSocketConnector};
