use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArthuronConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub synthesis: SynthesisConfig,
    pub realtime: RealtimeConfig,
}

impl ArthuronConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ArthuronConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup (the process environment in production).
    pub fn apply_overrides_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value {:?}", v),
            }
        }
        if let Some(v) = get("ARTHURON_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(v);
        }

        // Synthesis credentials
        if let Some(v) = get("ELEVENLABS_API_KEY") {
            self.synthesis.api_key = non_empty(v);
        }
        if let Some(v) = get("ELEVENLABS_VOICE_ID") {
            self.synthesis.voice_id = non_empty(v);
        }
        if let Some(v) = get("ELEVENLABS_MODEL_ID") {
            self.synthesis.model_id = v;
        }
        if let Some(v) = get("ELEVENLABS_OUTPUT_FORMAT") {
            self.synthesis.output_format = v;
        }

        // Conversational session negotiation
        if let Some(v) = get("OPENAI_API_KEY") {
            self.realtime.api_key = non_empty(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.realtime.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("REALTIME_MODEL") {
            self.realtime.model = v;
        }
        if let Some(v) = get("REALTIME_VOICE") {
            self.realtime.voice = v;
        }
    }
}

fn non_empty(v: String) -> Option<String> {
    let v = v.trim().to_string();
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served for any GET that is not an API route.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
            static_dir: PathBuf::from("static"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bound on queued text/flush commands before submissions are rejected.
    pub command_capacity: usize,
    /// Bound on buffered audio frames before new frames are dropped.
    pub buffer_capacity: usize,
    pub keepalive_interval_secs: u64,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            buffer_capacity: 512,
            keepalive_interval_secs: 10,
            reconnect_backoff_ms: 1000,
            connect_timeout_secs: 20,
        }
    }
}

impl RelayConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: String,
    /// Remote output format identifier, e.g. `mp3_44100_128`.
    pub output_format: String,
    pub optimize_streaming_latency: u8,
    pub voice_settings: VoiceSettings,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://api.elevenlabs.io".to_string(),
            api_key: None,
            voice_id: None,
            model_id: "eleven_flash_v2_5".to_string(),
            output_format: "mp3_44100_128".to_string(),
            optimize_streaming_latency: 3,
            voice_settings: VoiceSettings::default(),
        }
    }
}

impl SynthesisConfig {
    /// Check that the credential and voice are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            return Err(ConfigError::Missing("ELEVENLABS_API_KEY"));
        }
        if self.voice_id.is_none() {
            return Err(ConfigError::Missing("ELEVENLABS_VOICE_ID"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// Voice retried once when the requested one is refused.
    pub fallback_voice: String,
    pub persona_path: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini-realtime-preview".to_string(),
            voice: "ash".to_string(),
            fallback_voice: "alloy".to_string(),
            persona_path: PathBuf::from("static/persona.txt"),
            request_timeout_secs: 20,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = ArthuronConfig::default();
        assert_eq!(cfg.server.port, 5050);
        assert_eq!(cfg.relay.keepalive_interval(), Duration::from_secs(10));
        assert_eq!(cfg.relay.reconnect_backoff(), Duration::from_secs(1));
        assert_eq!(cfg.realtime.voice, "ash");
        assert!(cfg.synthesis.api_key.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[relay]
buffer_capacity = 64
"#;
        let cfg: ArthuronConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.relay.buffer_capacity, 64);
        // Defaults for unspecified fields
        assert_eq!(cfg.relay.command_capacity, 256);
        assert_eq!(cfg.synthesis.output_format, "mp3_44100_128");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[server]
host = "127.0.0.1"
port = 8080
static_dir = "public"

[relay]
command_capacity = 16
buffer_capacity = 32
keepalive_interval_secs = 5
reconnect_backoff_ms = 250
connect_timeout_secs = 3

[synthesis]
base_url = "ws://localhost:9000"
api_key = "xi-secret"
voice_id = "voice-1"
model_id = "eleven_turbo_v2"
output_format = "pcm_16000"
optimize_streaming_latency = 2

[synthesis.voice_settings]
stability = 0.3
similarity_boost = 0.9
style = 0.1
use_speaker_boost = false

[realtime]
api_key = "sk-test"
model = "gpt-4o-realtime-preview"
voice = "verse"
fallback_voice = "alloy"
persona_path = "persona.txt"
"#;
        let cfg: ArthuronConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.static_dir, PathBuf::from("public"));
        assert_eq!(cfg.relay.reconnect_backoff(), Duration::from_millis(250));
        assert_eq!(cfg.synthesis.voice_id.as_deref(), Some("voice-1"));
        assert!(!cfg.synthesis.voice_settings.use_speaker_boost);
        assert_eq!(cfg.realtime.voice, "verse");
        // Unspecified realtime fields keep defaults
        assert_eq!(cfg.realtime.request_timeout_secs, 20);
        assert!(cfg.synthesis.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "6060"),
            ("ELEVENLABS_API_KEY", "xi"),
            ("ELEVENLABS_VOICE_ID", "v"),
            ("OPENAI_API_KEY", "sk"),
            ("OPENAI_BASE_URL", "http://localhost:1234/v1/"),
            ("REALTIME_VOICE", "sage"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ArthuronConfig::default();
        cfg.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.server.port, 6060);
        assert_eq!(cfg.synthesis.api_key.as_deref(), Some("xi"));
        assert_eq!(cfg.realtime.api_key.as_deref(), Some("sk"));
        assert_eq!(cfg.realtime.base_url, "http://localhost:1234/v1");
        assert_eq!(cfg.realtime.voice, "sage");
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut cfg = ArthuronConfig::default();
        cfg.apply_overrides_from(|k| (k == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(cfg.server.port, 5050);
    }

    #[test]
    fn test_blank_credential_counts_as_missing() {
        let mut cfg = ArthuronConfig::default();
        cfg.apply_overrides_from(|k| (k == "ELEVENLABS_API_KEY").then(|| "  ".to_string()));
        assert_eq!(
            cfg.synthesis.validate(),
            Err(ConfigError::Missing("ELEVENLABS_API_KEY"))
        );
    }

    #[test]
    fn test_validate_requires_voice() {
        let cfg = SynthesisConfig {
            api_key: Some("xi".into()),
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Missing("ELEVENLABS_VOICE_ID")));
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(ArthuronConfig::load("/tmp/nonexistent_arthuron_config_4821.toml").is_err());
    }
}
