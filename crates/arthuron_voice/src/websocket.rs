use crate::upstream::{UpstreamConnector, UpstreamSession};
use anyhow::{Context, Result};
use arthuron_core::{AudioFrame, InboundMessage, OutboundMessage, RelayError, SynthesisConfig, VoiceSettings};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message};
use url::Url;

/// Opening record of every connection. Carries the credential and voice settings.
#[derive(Debug, Serialize)]
struct InitRecord<'a> {
    text: &'static str,
    voice_settings: &'a VoiceSettings,
    xi_api_key: &'a str,
}

#[derive(Debug, Serialize)]
struct TextRecord<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    try_trigger_generation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flush: Option<bool>,
}

/// Encode an outbound message as the service's JSON record.
pub fn encode(msg: &OutboundMessage) -> Result<String, RelayError> {
    let record = match msg {
        OutboundMessage::Text {
            text,
            trigger_generation,
        } => TextRecord {
            text,
            try_trigger_generation: Some(*trigger_generation),
            flush: None,
        },
        OutboundMessage::Flush => TextRecord {
            text: " ",
            try_trigger_generation: None,
            flush: Some(true),
        },
        // A lone space is accepted as a no-op and resets the idle timer.
        OutboundMessage::Keepalive => TextRecord {
            text: " ",
            try_trigger_generation: None,
            flush: None,
        },
    };
    Ok(serde_json::to_string(&record)?)
}

/// Classify one websocket read. Control frames yield nothing.
fn decode(item: Result<Message, tungstenite::Error>) -> Option<Result<InboundMessage, RelayError>> {
    match item {
        Ok(Message::Binary(data)) => Some(Ok(InboundMessage::Audio(AudioFrame::from(data)))),
        Ok(Message::Text(text)) => Some(Ok(InboundMessage::Status(text))),
        Ok(Message::Close(frame)) => {
            tracing::debug!("Synthesis upstream sent close: {:?}", frame);
            Some(Err(RelayError::Closed))
        }
        Ok(_) => None,
        Err(e) => Some(Err(RelayError::Io(e.to_string()))),
    }
}

/// Streaming text-to-speech connector over a websocket.
pub struct WebSocketConnector {
    url: Url,
    /// Serialized once; identical on every reconnect.
    init_record: String,
}

impl WebSocketConnector {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        config.validate()?;
        let voice_id = config.voice_id.as_deref().unwrap_or_default();
        let api_key = config.api_key.as_deref().unwrap_or_default();

        let mut url = Url::parse(&config.base_url).context("Invalid synthesis base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Synthesis base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["v1", "text-to-speech", voice_id, "stream-input"]);
        url.query_pairs_mut()
            .append_pair("model_id", &config.model_id)
            .append_pair("output_format", &config.output_format)
            .append_pair(
                "optimize_streaming_latency",
                &config.optimize_streaming_latency.to_string(),
            );

        let init_record = serde_json::to_string(&InitRecord {
            text: " ",
            voice_settings: &config.voice_settings,
            xi_api_key: api_key,
        })?;

        Ok(Self { url, init_record })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self) -> Result<UpstreamSession, RelayError> {
        tracing::info!("Connecting to synthesis upstream at {}...", self.describe());
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let (mut write, read) = ws_stream.split();

        write
            .send(Message::Text(self.init_record.clone()))
            .await
            .map_err(|e| RelayError::Handshake(e.to_string()))?;

        let sink = write
            .sink_map_err(|e| RelayError::Io(e.to_string()))
            .with(|msg: OutboundMessage| future::ready(encode(&msg).map(Message::Text)));
        let stream = read.filter_map(|item| future::ready(decode(item)));
        Ok(UpstreamSession::new(sink, stream))
    }

    fn describe(&self) -> String {
        // Host and path only; the query is not secret but is noisy.
        format!(
            "{}://{}{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default(),
            self.url.path()
        )
    }
}
