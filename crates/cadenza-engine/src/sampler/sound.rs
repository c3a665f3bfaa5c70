use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};

use crate::error::FileError;
use crate::media::{decode_file, DecodedAudio};
use crate::session::SoundInput;

/// Decoded sample data a sampler reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundData {
    pub sample_rate: f32,
    pub channels: Vec<Vec<f32>>,
    pub path: Option<PathBuf>,
}

impl SoundData {
    pub fn from_decoded(audio: DecodedAudio, path: Option<PathBuf>) -> Self {
        Self {
            sample_rate: audio.sample_rate as f32,
            channels: audio.channels,
            path,
        }
    }

    /// Builds in-memory sound data, mostly for tests and generated material.
    pub fn from_channels(sample_rate: f32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
            path: None,
        }
    }

    pub fn load(input: &SoundInput) -> Result<Self, FileError> {
        let audio = decode_file(&input.path)?.skip_seconds(input.offset);
        Ok(Self::from_decoded(audio, Some(input.path.clone())))
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1.0) as f64
    }
}

/// Sound shared between a sampler's control handle and its voice, swappable
/// while playing.
#[derive(Debug, Clone)]
pub struct SoundTable {
    inner: Arc<ArcSwap<SoundData>>,
}

impl SoundTable {
    pub fn new(data: SoundData) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(data)),
        }
    }

    #[inline]
    pub fn load(&self) -> Guard<Arc<SoundData>> {
        self.inner.load()
    }

    pub fn snapshot(&self) -> Arc<SoundData> {
        self.inner.load_full()
    }

    pub fn store(&self, data: SoundData) {
        self.inner.store(Arc::new(data));
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.load().path.clone()
    }
}
