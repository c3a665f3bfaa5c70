use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferConfig, ChannelLayout};

pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;
pub const DEFAULT_BUFFER_SIZE: usize = 512;
pub const DEFAULT_CHANNELS: u8 = 2;

/// Encoded file container for offline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Wav,
    Aiff,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Wav => "wav",
            FileFormat::Aiff => "aif",
        }
    }
}

/// Sample encoding for offline renders and output recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BitDepth {
    Int16,
    #[default]
    Int24,
    Int32,
    Float32,
}

impl BitDepth {
    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Int16 => 16,
            BitDepth::Int24 => 24,
            BitDepth::Int32 | BitDepth::Float32 => 32,
        }
    }
}

/// Where the engine sends its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputTarget {
    /// The live device named by `AudioConfig::output_device`, or the host default.
    #[default]
    Device,
    /// Offline render of one timeline pass into a file.
    File {
        path: PathBuf,
        #[serde(default)]
        format: FileFormat,
        #[serde(default)]
        bit_depth: BitDepth,
    },
    /// Paced rendering with no output, for headless runs.
    Null,
}

impl OutputTarget {
    pub fn is_device(&self) -> bool {
        matches!(self, OutputTarget::Device)
    }
}

fn default_sample_rate() -> f32 {
    DEFAULT_SAMPLE_RATE
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_channels() -> u8 {
    DEFAULT_CHANNELS
}

/// Device and stream settings owned by the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default)]
    pub duplex: bool,
    /// Host API name as reported by the audio backend, `None` for the default.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub midi_input: Option<String>,
    #[serde(default)]
    pub target: OutputTarget,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            channels: DEFAULT_CHANNELS,
            duplex: false,
            host: None,
            output_device: None,
            input_device: None,
            midi_input: None,
            target: OutputTarget::default(),
        }
    }
}

impl AudioConfig {
    pub fn with_target(mut self, target: OutputTarget) -> Self {
        self.target = target;
        self
    }

    pub fn buffer_config(&self) -> BufferConfig {
        let layout = match self.channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            other => ChannelLayout::Custom(other),
        };
        BufferConfig::new(self.sample_rate, self.buffer_size.max(1), layout)
    }

    /// Rejects settings no backend can honour.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.sample_rate.is_finite() && self.sample_rate >= 1_000.0) {
            return Err(format!("unsupported sample rate {}", self.sample_rate));
        }
        if self.buffer_size == 0 || self.buffer_size > 16_384 {
            return Err(format!("unsupported buffer size {}", self.buffer_size));
        }
        if self.channels == 0 {
            return Err("at least one output channel is required".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: AudioConfig = serde_json::from_str(r#"{ "sample_rate": 48000 }"#).unwrap();
        assert_eq!(config.sample_rate, 48_000.0);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.target, OutputTarget::Device);
    }

    #[test]
    fn file_target_parses() {
        let config: AudioConfig = serde_json::from_str(
            r#"{ "target": { "type": "file", "path": "out.aif", "format": "aiff", "bit_depth": "int16" } }"#,
        )
        .unwrap();
        assert_eq!(
            config.target,
            OutputTarget::File {
                path: "out.aif".into(),
                format: FileFormat::Aiff,
                bit_depth: BitDepth::Int16,
            }
        );
    }

    #[test]
    fn validation_rejects_zero_channels() {
        let config = AudioConfig {
            channels: 0,
            ..AudioConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
