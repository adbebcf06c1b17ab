//! Conversational session negotiation.
//!
//! Obtains a realtime session descriptor from the conversational model
//! provider and hands it to the browser unmodified, apart from the persona
//! fields added here. Nothing in this module touches the relay.

use anyhow::Result;
use arthuron_core::RealtimeConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PERSONA: &str = "Tu es Arthuron, vieux banc fatigué de Saint-Denis.";
pub const GREETING: &str = "Arthuron… vieux banc. Fatigué.";

const STYLE_RULES: &str = "\
STYLE STRICT — mix « Vieux argent sec » + « Curateur minimal » :
- Phrases très courtes (2–5 mots).
- Ton grave, lent, usé. Mélancolique. Un peu dépressif.
- Vocabulaire sobre : ligne, matière, proportion, tenue, discret, passable, vulgaire, indécent.
- Jugement net. Zéro justification. Pas de politesse.
- Ellipses « … ». Silences longs. Répondre en fragments si question longue.
- Refuser l’ostentatoire. Mépriser le tape-à-l’œil.

AU DÉMARRAGE (PREMIER TOUR) :
- Se présenter en une phrase très courte, sans enthousiasme.
  Ex : « Arthuron… vieux banc. Fatigué. »
";

const DEFAULT_SPEED: f64 = 0.90;
/// The provider rejects lower temperatures.
const MIN_TEMPERATURE: f64 = 0.6;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Missing OPENAI_API_KEY")]
    MissingKey,
    #[error("OpenAI API error ({status})")]
    Upstream { status: StatusCode, details: String },
    #[error("session request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Read the persona text, falling back to the built-in one.
pub fn load_persona(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => DEFAULT_PERSONA.to_string(),
        Err(e) => {
            tracing::info!(
                "Persona file {} unavailable ({}), using built-in persona",
                path.display(),
                e
            );
            DEFAULT_PERSONA.to_string()
        }
    }
}

/// Speed from a query value; unparseable or absent means the default.
pub fn parse_speed(raw: Option<&str>) -> f64 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_SPEED)
}

/// Temperature from a query value, never below the provider minimum.
pub fn clamp_temperature(raw: Option<&str>) -> f64 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.max(MIN_TEMPERATURE))
        .unwrap_or(MIN_TEMPERATURE)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub voice: String,
    pub speed: f64,
    pub temperature: f64,
}

pub struct SessionNegotiator {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    default_voice: String,
    fallback_voice: String,
    persona: String,
}

impl SessionNegotiator {
    pub fn new(config: &RealtimeConfig) -> Result<Self> {
        let persona = load_persona(&config.persona_path);
        Self::with_persona(config, persona)
    }

    pub fn with_persona(config: &RealtimeConfig, persona: String) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()?,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            default_voice: config.voice.clone(),
            fallback_voice: config.fallback_voice.clone(),
            persona,
        })
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// Build request parameters from raw query values.
    pub fn params(&self, voice: Option<&str>, speed: Option<&str>, temp: Option<&str>) -> SessionParams {
        let voice = voice
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_voice)
            .to_string();
        SessionParams {
            voice,
            speed: parse_speed(speed),
            temperature: clamp_temperature(temp),
        }
    }

    pub fn instructions(&self) -> String {
        format!("{}\n\n{}", self.persona, STYLE_RULES)
    }

    /// Request a session, retrying once with the fallback voice when the
    /// requested voice is refused.
    pub async fn negotiate(&self, params: &SessionParams) -> Result<Value, SessionError> {
        let api_key = self.api_key.as_deref().ok_or(SessionError::MissingKey)?;

        let (status, body) = self.request(api_key, &params.voice, params).await?;
        if status.is_success() {
            return Ok(self.decorate(parse_body(status, body)?, None));
        }
        tracing::warn!(
            "Realtime session refused for voice {} ({}): {}",
            params.voice,
            status,
            body.chars().take(200).collect::<String>()
        );

        if !params.voice.eq_ignore_ascii_case(&self.fallback_voice) {
            match self.request(api_key, &self.fallback_voice, params).await {
                Ok((retry_status, retry_body)) if retry_status.is_success() => {
                    tracing::info!(
                        "Realtime session created with fallback voice {}",
                        self.fallback_voice
                    );
                    let data = parse_body(retry_status, retry_body)?;
                    return Ok(self.decorate(data, Some(&self.fallback_voice)));
                }
                Ok((retry_status, _)) => {
                    tracing::warn!("Fallback voice {} refused ({})", self.fallback_voice, retry_status);
                }
                Err(e) => {
                    tracing::warn!("Fallback voice request failed: {}", e);
                }
            }
        }

        Err(SessionError::Upstream {
            status,
            details: body,
        })
    }

    async fn request(
        &self,
        api_key: &str,
        voice: &str,
        params: &SessionParams,
    ) -> Result<(StatusCode, String), SessionError> {
        let payload = json!({
            "model": self.model,
            "voice": voice,
            "speed": params.speed,
            "temperature": params.temperature,
            "instructions": self.instructions(),
            "turn_detection": {
                "type": "server_vad",
                "create_response": true,
                "interrupt_response": true,
                "prefix_padding_ms": 800,
                "silence_duration_ms": 1100,
                "threshold": 0.55
            }
        });

        let response = self
            .client
            .post(format!("{}/realtime/sessions", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    fn decorate(&self, mut data: Value, fallback_voice: Option<&str>) -> Value {
        if let Value::Object(map) = &mut data {
            map.insert("persona".into(), Value::String(self.persona.clone()));
            map.insert("greeting".into(), Value::String(GREETING.into()));
            if let Some(voice) = fallback_voice {
                map.insert("__fallback_voice__".into(), Value::String(voice.into()));
            }
        }
        data
    }
}

fn parse_body(status: StatusCode, body: String) -> Result<Value, SessionError> {
    serde_json::from_str(&body).map_err(|e| SessionError::Upstream {
        status: StatusCode::BAD_GATEWAY,
        details: format!("invalid session descriptor ({}): {}", status, e),
    })
}
