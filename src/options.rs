use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    Aac,
    Opus,
}

impl Codec {
    /// Extension of the file the transcoder leaves behind.
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Aac => "m4a",
            Codec::Opus => "opus",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Codec::Mp3 => "audio/mpeg",
            Codec::Aac => "audio/aac",
            Codec::Opus => "audio/opus",
        }
    }

    /// Value passed to yt-dlp `--audio-format`.
    pub fn audio_format(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Aac => "aac",
            Codec::Opus => "opus",
        }
    }

    pub fn supports_constant_bitrate(self) -> bool {
        !matches!(self, Codec::Opus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn resolve(self, constant_bitrate: bool) -> ResolvedQuality {
        match (self, constant_bitrate) {
            (QualityTier::High, false) => ResolvedQuality::Variable(0),
            (QualityTier::Medium, false) => ResolvedQuality::Variable(2),
            (QualityTier::Low, false) => ResolvedQuality::Variable(4),
            (QualityTier::High, true) => ResolvedQuality::ConstantKbps(320),
            (QualityTier::Medium, true) => ResolvedQuality::ConstantKbps(192),
            (QualityTier::Low, true) => ResolvedQuality::ConstantKbps(128),
        }
    }
}

/// Concrete encoder target handed to the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedQuality {
    /// Inverted scale: 0 is best.
    Variable(u8),
    ConstantKbps(u16),
}

impl ResolvedQuality {
    #[cfg(test)]
    fn value(self) -> u16 {
        match self {
            ResolvedQuality::Variable(index) => u16::from(index),
            ResolvedQuality::ConstantKbps(kbps) => kbps,
        }
    }

    /// yt-dlp `--audio-quality` syntax.
    pub fn as_arg(self) -> String {
        match self {
            ResolvedQuality::Variable(index) => index.to_string(),
            ResolvedQuality::ConstantKbps(kbps) => format!("{}K", kbps),
        }
    }
}

/// Options fixed for one extraction call. Built fresh from the session's selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub codec: Codec,
    pub quality: QualityTier,
    pub constant_bitrate: bool,
}

impl ExtractionOptions {
    /// The CBR toggle has no effect on Opus.
    pub fn resolved_quality(&self) -> ResolvedQuality {
        let constant_bitrate = self.constant_bitrate && self.codec.supports_constant_bitrate();
        self.quality.resolve(constant_bitrate)
    }
}

/// What the user has picked so far; either selector may still be empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptionsSelection {
    pub codec: Option<Codec>,
    pub quality: Option<QualityTier>,
    pub constant_bitrate: bool,
}

/// A change to one or more selectors. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct OptionsUpdate {
    #[serde(default)]
    pub codec: Option<Codec>,
    #[serde(default)]
    pub quality: Option<QualityTier>,
    #[serde(default)]
    pub constant_bitrate: Option<bool>,
}

impl OptionsSelection {
    pub fn apply(&mut self, update: OptionsUpdate) {
        if let Some(codec) = update.codec {
            self.codec = Some(codec);
        }
        if let Some(quality) = update.quality {
            self.quality = Some(quality);
        }
        if let Some(cbr) = update.constant_bitrate {
            self.constant_bitrate = cbr;
        }
    }

    pub fn complete(&self) -> Option<ExtractionOptions> {
        Some(ExtractionOptions {
            codec: self.codec?,
            quality: self.quality?,
            constant_bitrate: self.constant_bitrate,
        })
    }
}
