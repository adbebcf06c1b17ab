//! Audio container format of the synthesized stream.

/// Container format negotiated with the synthesis service, fixed for the
/// process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// MPEG layer 3
    Mp3,
    /// Raw little-endian PCM
    Pcm { sample_rate: u32 },
    /// 8-bit mu-law (telephony)
    Ulaw,
    /// Opus in an Ogg container
    OggOpus,
}

impl OutputFormat {
    /// Parse a remote format identifier such as `mp3_44100_128` or `pcm_16000`.
    pub fn from_identifier(id: &str) -> Option<Self> {
        let mut parts = id.split('_');
        let codec = parts.next()?;
        match codec {
            "mp3" => Some(Self::Mp3),
            "pcm" => {
                let sample_rate = parts.next().and_then(|r| r.parse().ok()).unwrap_or(16_000);
                Some(Self::Pcm { sample_rate })
            }
            "ulaw" => Some(Self::Ulaw),
            "opus" => Some(Self::OggOpus),
            _ => None,
        }
    }

    /// Get the MIME type for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Pcm { .. } => "audio/pcm",
            Self::Ulaw => "audio/basic",
            Self::OggOpus => "audio/ogg",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Mp3
    }
}
