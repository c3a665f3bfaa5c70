//! Sound file decoding and introspection.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::FileError;

/// Largest table the sampler will size for a file, in frames.
pub const MAX_TABLE_SIZE: u64 = 1 << 24;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or_default()
    }

    /// Drops the first `seconds` of every channel.
    pub fn skip_seconds(mut self, seconds: f64) -> Self {
        let skip = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        if skip > 0 {
            for channel in &mut self.channels {
                let skip = skip.min(channel.len());
                channel.drain(..skip);
            }
        }
        self
    }
}

/// What the file browser shows about a sound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundInfo {
    pub path: PathBuf,
    pub channels: usize,
    pub sample_rate: u32,
    pub frames: u64,
    pub duration: f64,
    /// Bits per sample when the codec reports one.
    pub bits_per_sample: Option<u32>,
    pub format: String,
    /// Smallest power of two above `frames`, capped at [`MAX_TABLE_SIZE`].
    pub table_size: u64,
    /// `frames / table_size`.
    pub table_fraction: f64,
}

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>, FileError> {
    let file = File::open(path).map_err(|err| FileError::io(path, err))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|source| FileError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(probed.format)
}

/// Decodes a whole file into planar `f32` channels.
pub fn decode_file(path: impl AsRef<Path>) -> Result<DecodedAudio, FileError> {
    let path = path.as_ref();
    let decode_err = |source| FileError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let mut format = open_format(path)?;
    let (codec_params, track_id) = {
        let track = format
            .default_track()
            .ok_or_else(|| FileError::Unsupported(path.to_path_buf()))?;
        (track.codec_params.clone(), track.id)
    };
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let sample_rate = codec_params.sample_rate.unwrap_or(44_100);
    let channel_count = codec_params
        .channels
        .map(|channels| channels.count())
        .unwrap_or(1)
        .max(1);
    let mut channels = vec![Vec::new(); channel_count];
    let mut sample_buffer: Option<SampleBuffer<f32>> = None;

    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder.decode(&packet).map_err(decode_err)?;
        let spec: SignalSpec = *decoded.spec();
        let buf = sample_buffer
            .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        buf.copy_interleaved_ref(decoded);
        let samples = buf.samples();
        let frames = samples.len() / channel_count;
        for (index, channel) in channels.iter_mut().enumerate() {
            channel.extend(
                samples[index..]
                    .iter()
                    .step_by(channel_count)
                    .take(frames)
                    .copied(),
            );
        }
    }

    Ok(DecodedAudio {
        sample_rate,
        channels,
    })
}

fn container_name(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "wav" | "wave" => "WAVE".to_string(),
        "aif" | "aiff" | "aifc" => "AIFF".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// Table size and fraction for a file of `frames` frames.
pub fn table_fraction(frames: u64) -> (u64, f64) {
    let mut size = 2u64;
    while size <= frames && size < MAX_TABLE_SIZE {
        size *= 2;
    }
    (size, frames as f64 / size as f64)
}

/// Reads channel count, rate, length and format of a sound file.
pub fn sound_info(path: impl AsRef<Path>) -> Result<SoundInfo, FileError> {
    let path = path.as_ref();
    let format = open_format(path)?;
    let track = format
        .default_track()
        .ok_or_else(|| FileError::Unsupported(path.to_path_buf()))?;
    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| FileError::Unsupported(path.to_path_buf()))?;
    let channels = params.channels.map(|c| c.count()).unwrap_or(1);
    let bits_per_sample = params.bits_per_sample;
    let frames = match params.n_frames {
        Some(frames) => frames,
        None => decode_file(path)?.frames() as u64,
    };
    let (table_size, table_fraction) = table_fraction(frames);
    Ok(SoundInfo {
        path: path.to_path_buf(),
        channels,
        sample_rate,
        frames,
        duration: frames as f64 / sample_rate.max(1) as f64,
        bits_per_sample,
        format: container_name(path),
        table_size,
        table_fraction,
    })
}

/// Collects info for every readable sound in `paths`, keyed by file name.
///
/// Unreadable or unsupported files are logged and skipped.
pub fn sounds_from_list<I, P>(paths: I) -> BTreeMap<String, SoundInfo>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut sounds = BTreeMap::new();
    for path in paths {
        let path = path.as_ref();
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "skipping non-file entry");
            continue;
        }
        match sound_info(path) {
            Ok(info) => {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                sounds.insert(name, info);
            }
            Err(err) => tracing::warn!(%err, "skipping unreadable sound"),
        }
    }
    sounds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_fraction_uses_the_next_power_of_two() {
        assert_eq!(table_fraction(44_100), (65_536, 44_100.0 / 65_536.0));
        assert_eq!(table_fraction(65_536).0, 131_072);
        assert_eq!(table_fraction(u64::MAX).0, MAX_TABLE_SIZE);
    }

    #[test]
    fn skip_seconds_trims_every_channel() {
        let audio = DecodedAudio {
            sample_rate: 10,
            channels: vec![(0..20).map(|i| i as f32).collect(), vec![0.0; 20]],
        };
        let trimmed = audio.skip_seconds(0.5);
        assert_eq!(trimmed.frames(), 15);
        assert_eq!(trimmed.channels[0][0], 5.0);
    }

    #[test]
    fn container_names_follow_extensions() {
        assert_eq!(container_name(Path::new("a.WAV")), "WAVE");
        assert_eq!(container_name(Path::new("b.aif")), "AIFF");
        assert_eq!(container_name(Path::new("c.flac")), "FLAC");
    }
}
