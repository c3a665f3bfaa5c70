#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cadenza_engine::{AudioConfig, OutputTarget, SamplerInfo, Session};

pub const RATE: u32 = 8_000;

/// Writes a 16-bit sine of `seconds` seconds with `channels` channels.
pub fn write_tone(path: &Path, channels: u16, seconds: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * RATE as f32) as usize;
    for n in 0..frames {
        let value = (n as f32 * 440.0 * std::f32::consts::TAU / RATE as f32).sin() * 0.5;
        for _ in 0..channels {
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// A session with one live sampler named `snd` playing `sound`.
pub fn sampler_session(sound: &Path, total_time: f64) -> Session {
    Session::new(total_time)
        .with_input("snd", sound)
        .with_sampler("snd", SamplerInfo::live(0.5))
        .with_sampler_lines("snd")
}

pub fn config(target: OutputTarget) -> AudioConfig {
    AudioConfig {
        sample_rate: RATE as f32,
        buffer_size: 64,
        ..AudioConfig::default()
    }
    .with_target(target)
}

pub fn tone_in(dir: &Path, name: &str, channels: u16) -> PathBuf {
    let path = dir.join(name);
    write_tone(&path, channels, 1.0);
    path
}
