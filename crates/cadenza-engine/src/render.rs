//! Encoders for offline renders and output recordings.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::buffer::AudioBuffer;
use crate::config::{BitDepth, FileFormat};
use crate::error::FileError;

/// Destination of rendered audio.
pub enum FileSink {
    Wav {
        path: PathBuf,
        writer: WavWriter<BufWriter<File>>,
        depth: BitDepth,
    },
    Aiff(AiffWriter),
}

fn ensure_parent(path: &Path) -> Result<(), FileError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| FileError::io(parent, err))?;
        }
    }
    Ok(())
}

impl FileSink {
    pub fn create(
        path: impl Into<PathBuf>,
        format: FileFormat,
        depth: BitDepth,
        sample_rate: f32,
        channels: usize,
    ) -> Result<Self, FileError> {
        let path = path.into();
        ensure_parent(&path)?;
        let channels = channels.clamp(1, u16::MAX as usize) as u16;
        let sample_rate = sample_rate.max(1.0).round() as u32;
        match format {
            FileFormat::Wav => {
                let spec = WavSpec {
                    channels,
                    sample_rate,
                    bits_per_sample: depth.bits(),
                    sample_format: if depth == BitDepth::Float32 {
                        SampleFormat::Float
                    } else {
                        SampleFormat::Int
                    },
                };
                let writer = WavWriter::create(&path, spec).map_err(|source| FileError::Encode {
                    path: path.clone(),
                    source,
                })?;
                Ok(FileSink::Wav {
                    path,
                    writer,
                    depth,
                })
            }
            FileFormat::Aiff => {
                let depth = if depth == BitDepth::Float32 {
                    tracing::warn!(
                        path = %path.display(),
                        "AIFF has no float encoding, writing 32-bit integers"
                    );
                    BitDepth::Int32
                } else {
                    depth
                };
                AiffWriter::create(path, channels, sample_rate, depth).map(FileSink::Aiff)
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            FileSink::Wav { path, .. } => path,
            FileSink::Aiff(writer) => &writer.path,
        }
    }

    /// Appends the first `frames` frames of `buffer`, interleaved.
    pub fn write_block(&mut self, buffer: &AudioBuffer, frames: usize) -> Result<(), FileError> {
        let frames = frames.min(buffer.len());
        let channels = buffer.as_slice();
        match self {
            FileSink::Wav {
                path,
                writer,
                depth,
            } => {
                for frame in 0..frames {
                    for channel in channels {
                        let sample = channel[frame];
                        match depth {
                            BitDepth::Float32 => writer.write_sample(sample),
                            BitDepth::Int16 => writer.write_sample(quantize_i16(sample)),
                            BitDepth::Int24 => writer.write_sample(quantize_i24(sample)),
                            BitDepth::Int32 => writer.write_sample(quantize_i32(sample)),
                        }
                        .map_err(|source| FileError::Encode {
                            path: path.clone(),
                            source,
                        })?;
                    }
                }
                Ok(())
            }
            FileSink::Aiff(writer) => writer.write_block(channels, frames),
        }
    }

    /// Writes headers and closes the file.
    pub fn finalize(self) -> Result<(), FileError> {
        match self {
            FileSink::Wav { path, writer, .. } => writer
                .finalize()
                .map_err(|source| FileError::Encode { path, source }),
            FileSink::Aiff(writer) => writer.finalize(),
        }
    }
}

#[inline]
fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[inline]
fn quantize_i24(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) * 8_388_607.0).round() as i32
}

#[inline]
fn quantize_i32(sample: f32) -> i32 {
    (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64).round() as i32
}

const FORM_SIZE_OFFSET: u64 = 4;
const FRAMES_OFFSET: u64 = 22;
const SSND_SIZE_OFFSET: u64 = 42;
const HEADER_LEN: u32 = 54;

/// Big-endian PCM writer for AIFF files.
pub struct AiffWriter {
    path: PathBuf,
    out: BufWriter<File>,
    channels: u16,
    depth: BitDepth,
    frames: u32,
    data_len: u32,
}

impl AiffWriter {
    pub fn create(
        path: impl Into<PathBuf>,
        channels: u16,
        sample_rate: u32,
        depth: BitDepth,
    ) -> Result<Self, FileError> {
        let path = path.into();
        let file = File::create(&path).map_err(|err| FileError::io(&path, err))?;
        let mut writer = Self {
            path,
            out: BufWriter::new(file),
            channels,
            depth,
            frames: 0,
            data_len: 0,
        };
        writer.write_header(sample_rate)?;
        Ok(writer)
    }

    fn io(&self, err: std::io::Error) -> FileError {
        FileError::io(&self.path, err)
    }

    fn write_header(&mut self, sample_rate: u32) -> Result<(), FileError> {
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(b"FORM");
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(b"AIFF");
        header.extend_from_slice(b"COMM");
        header.extend_from_slice(&18u32.to_be_bytes());
        header.extend_from_slice(&self.channels.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&self.depth.bits().to_be_bytes());
        header.extend_from_slice(&extended_rate(sample_rate));
        header.extend_from_slice(b"SSND");
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        self.out.write_all(&header).map_err(|err| self.io(err))
    }

    fn write_block(&mut self, channels: &[Vec<f32>], frames: usize) -> Result<(), FileError> {
        let bytes = (self.depth.bits() / 8) as usize;
        for frame in 0..frames {
            for ch in 0..self.channels as usize {
                let sample = channels.get(ch).map(|channel| channel[frame]).unwrap_or(0.0);
                // Left-justify so the leading `bytes` bytes hold the sample.
                let word = match self.depth {
                    BitDepth::Int16 => (quantize_i16(sample) as i32) << 16,
                    BitDepth::Int24 => quantize_i24(sample) << 8,
                    BitDepth::Int32 | BitDepth::Float32 => quantize_i32(sample),
                };
                if let Err(err) = self.out.write_all(&word.to_be_bytes()[..bytes]) {
                    return Err(self.io(err));
                }
            }
        }
        self.frames = self.frames.saturating_add(frames as u32);
        self.data_len = self
            .data_len
            .saturating_add((frames * bytes * self.channels as usize) as u32);
        Ok(())
    }

    fn patch(&mut self, offset: u64, value: u32) -> Result<(), FileError> {
        if let Err(err) = self.out.seek(SeekFrom::Start(offset)) {
            return Err(self.io(err));
        }
        if let Err(err) = self.out.write_all(&value.to_be_bytes()) {
            return Err(self.io(err));
        }
        Ok(())
    }

    pub fn finalize(mut self) -> Result<(), FileError> {
        let pad = self.data_len % 2;
        if pad == 1 {
            self.out.write_all(&[0]).map_err(|err| self.io(err))?;
        }
        let form_size = HEADER_LEN - 8 + self.data_len + pad;
        self.patch(FORM_SIZE_OFFSET, form_size)?;
        self.patch(FRAMES_OFFSET, self.frames)?;
        self.patch(SSND_SIZE_OFFSET, 8 + self.data_len)?;
        self.out.flush().map_err(|err| self.io(err))
    }
}

/// Sample rate as an IEEE 754 80-bit extended float.
fn extended_rate(rate: u32) -> [u8; 10] {
    let mut out = [0u8; 10];
    if rate == 0 {
        return out;
    }
    let rate = rate as u64;
    let shift = rate.leading_zeros();
    let mantissa = rate << shift;
    let exponent = (16_383 + 63 - shift) as u16;
    out[..2].copy_from_slice(&exponent.to_be_bytes());
    out[2..].copy_from_slice(&mantissa.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(channels: usize, frames: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(channels, frames);
        for channel in buffer.channels_mut() {
            for (n, sample) in channel.iter_mut().enumerate() {
                *sample = n as f32 / frames as f32 - 0.5;
            }
        }
        buffer
    }

    #[test]
    fn extended_rate_matches_known_encoding() {
        assert_eq!(
            extended_rate(44_100),
            [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(extended_rate(48_000)[..4], [0x40, 0x0E, 0xBB, 0x80]);
    }

    #[test]
    fn wav_render_has_expected_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = FileSink::create(&path, FileFormat::Wav, BitDepth::Int16, 8_000.0, 2).unwrap();
        sink.write_block(&ramp(2, 100), 100).unwrap();
        sink.write_block(&ramp(2, 100), 40).unwrap();
        sink.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 140);
    }

    #[test]
    fn aiff_header_sizes_are_patched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.aif");
        let mut sink = FileSink::create(&path, FileFormat::Aiff, BitDepth::Int24, 44_100.0, 1).unwrap();
        sink.write_block(&ramp(1, 33), 33).unwrap();
        sink.finalize().unwrap();

        let bytes = fs::read(&path).unwrap();
        let data = 33 * 3;
        assert_eq!(bytes.len(), 54 + data + 1);
        assert_eq!(&bytes[..4], b"FORM");
        let form = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(form as usize, bytes.len() - 8);
        let frames = u32::from_be_bytes(bytes[22..26].try_into().unwrap());
        assert_eq!(frames, 33);
        let ssnd = u32::from_be_bytes(bytes[42..46].try_into().unwrap());
        assert_eq!(ssnd as usize, 8 + data);
    }
}
