//! Looping sampler driven by five parameter channels.

mod looper;
mod sound;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use cadenza_dsp::{db_to_linear, semitone_ratio, FadeShape};
use rand::Rng;

pub use looper::{LoopMode, LoopWindow, Looper, MIN_XFADE_FRAMES};
pub use sound::{SoundData, SoundTable};

use crate::automation::AutomationWriter;
use crate::buffer::AudioBuffer;
use crate::channel::{BuildContext, ChannelControl, ChannelParts, ChannelSignal};
use crate::error::{ConfigurationError, FileError};
use crate::session::{ParamTriple, SamplerInfo, Session, SoundInput};

/// Curve line suffixes of the five sampler parameters, in channel order.
pub const CHANNEL_SUFFIXES: [&str; 5] = ["start", "end", "xfade", "gain", "trans"];

const START: usize = 0;
const DUR: usize = 1;
const XFADE: usize = 2;
const GAIN: usize = 3;
const PITCH: usize = 4;

/// Voice count and detune spread from the polyphony widget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Polyphony {
    pub voices: usize,
    pub spread: f32,
}

impl Default for Polyphony {
    fn default() -> Self {
        Self {
            voices: 1,
            spread: 0.0,
        }
    }
}

impl Polyphony {
    /// Per-voice, per-channel pitch multipliers in `[1 - spread, 1 + spread]`,
    /// or the single factor `1.0` for one voice.
    pub fn detune<R: Rng>(&self, table_channels: usize, rng: &mut R) -> Vec<f32> {
        if self.voices <= 1 {
            return vec![1.0];
        }
        let spread = self.spread.abs().min(1.0);
        (0..self.voices * table_channels.max(1))
            .map(|_| {
                if spread == 0.0 {
                    1.0
                } else {
                    rng.gen_range((1.0 - spread)..=(1.0 + spread))
                }
            })
            .collect()
    }
}

/// Control handle of a sampler.
#[derive(Debug, Clone)]
pub struct Sampler {
    name: Arc<str>,
    channels: [ChannelControl; 5],
    loop_mode: Arc<AtomicU8>,
    xfade_shape: Arc<AtomicU8>,
    sound: SoundTable,
    detune: Arc<[f32]>,
    pitch_mod: Option<Arc<AtomicF32>>,
}

impl Sampler {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn set(&self, index: usize, value: f32) -> bool {
        let applied = self.channels[index].set_value(value);
        if !applied {
            tracing::debug!(
                sampler = %self.name,
                channel = CHANNEL_SUFFIXES[index],
                "ignoring value for replayed channel"
            );
        }
        applied
    }

    /// Loop start in seconds. Returns `false` when the channel replays a curve.
    pub fn set_start(&self, value: f32) -> bool {
        self.set(START, value)
    }

    /// Loop length in seconds.
    pub fn set_dur(&self, value: f32) -> bool {
        self.set(DUR, value)
    }

    /// Crossfade as a percentage of the loop length.
    pub fn set_xfade(&self, value: f32) -> bool {
        self.set(XFADE, value)
    }

    /// Gain in decibels.
    pub fn set_gain(&self, value: f32) -> bool {
        self.set(GAIN, value)
    }

    /// Transposition in semitones.
    pub fn set_pitch(&self, value: f32) -> bool {
        self.set(PITCH, value)
    }

    pub fn set_loop_mode(&self, mode: u8) {
        self.loop_mode.store(mode, Ordering::Relaxed);
    }

    pub fn set_xfade_shape(&self, shape: u8) {
        self.xfade_shape.store(shape, Ordering::Relaxed);
    }

    pub fn loop_mode(&self) -> u8 {
        self.loop_mode.load(Ordering::Relaxed)
    }

    pub fn xfade_shape(&self) -> u8 {
        self.xfade_shape.load(Ordering::Relaxed)
    }

    /// Decodes `input` and swaps it in; the voice picks it up next block.
    pub fn set_sound(&self, input: &SoundInput) -> Result<(), FileError> {
        let data = SoundData::load(input)?;
        tracing::info!(sampler = %self.name, path = %input.path.display(), "sound replaced");
        self.sound.store(data);
        Ok(())
    }

    pub fn sound(&self) -> &SoundTable {
        &self.sound
    }

    pub fn sound_path(&self) -> Option<std::path::PathBuf> {
        self.sound.path()
    }

    pub fn detune(&self) -> &[f32] {
        &self.detune
    }

    pub fn channel(&self, suffix: &str) -> Option<&ChannelControl> {
        CHANNEL_SUFFIXES
            .iter()
            .position(|candidate| *candidate == suffix)
            .map(|index| &self.channels[index])
    }

    fn pitch_mod(&self) -> f32 {
        self.pitch_mod
            .as_ref()
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(1.0)
    }

    /// Base playback ratio currently rendered, before per-voice detune.
    pub fn playback_ratio(&self) -> f32 {
        semitone_ratio(self.channels[PITCH].current_value()) * self.pitch_mod()
    }

    /// Ratio the sampler is heading for once the pitch glide settles.
    pub fn target_ratio(&self) -> f32 {
        let pitch = &self.channels[PITCH];
        let semitones = if pitch.is_live() {
            pitch.target()
        } else {
            pitch.current_value()
        };
        semitone_ratio(semitones) * self.pitch_mod()
    }

    pub(crate) fn set_pitch_mod(&mut self, cell: Option<Arc<AtomicF32>>) {
        self.pitch_mod = cell;
    }
}

/// Audio-thread half of a sampler.
pub struct SamplerVoice {
    channels: [ChannelSignal; 5],
    loop_mode: Arc<AtomicU8>,
    xfade_shape: Arc<AtomicU8>,
    sound: SoundTable,
    loopers: Vec<Looper>,
    detune: Arc<[f32]>,
    stream: Vec<f32>,
    sample_rate: f32,
}

impl SamplerVoice {
    pub fn streams(&self) -> usize {
        self.loopers.len()
    }

    pub fn rewind(&mut self) {
        for channel in &mut self.channels {
            channel.rewind();
        }
        for looper in &mut self.loopers {
            looper.reset();
        }
    }

    /// Renders `frames` frames and adds them to `out`.
    ///
    /// `pitch_mod` and `amp_mod` multiply the pitch ratio and the linear gain
    /// per sample when present.
    pub fn process(
        &mut self,
        frames: usize,
        out: &mut AudioBuffer,
        pitch_mod: Option<&[f32]>,
        amp_mod: Option<&[f32]>,
    ) {
        let frames = frames.min(self.stream.len()).min(out.len());
        for channel in &mut self.channels {
            channel.process(frames);
        }
        let sound = self.sound.load();
        if sound.channels.is_empty() || sound.frames() == 0 {
            return;
        }

        let mode = LoopMode::from_index(self.loop_mode.load(Ordering::Relaxed));
        let shape = FadeShape::from_index(self.xfade_shape.load(Ordering::Relaxed));
        let rate_ratio = sound.sample_rate as f64 / self.sample_rate.max(1.0) as f64;
        let start = self.channels[START].output(frames);
        let dur = self.channels[DUR].output(frames);
        let xfade = self.channels[XFADE].output(frames);
        let gain = self.channels[GAIN].output(frames);
        let pitch = self.channels[PITCH].output(frames);
        let streams = self.loopers.len();

        for (index, looper) in self.loopers.iter_mut().enumerate() {
            looper.set_mode(mode);
            looper.set_shape(shape);
            let table = &sound.channels[index % sound.channels.len()];
            let detune = self.detune[index % self.detune.len()];
            for n in 0..frames {
                let window = LoopWindow {
                    start: start[n],
                    dur: dur[n],
                    xfade: xfade[n],
                };
                let mut ratio = semitone_ratio(pitch[n]) * detune;
                if let Some(modulation) = pitch_mod {
                    ratio *= modulation[n];
                }
                let mut amp = db_to_linear(gain[n]);
                if let Some(modulation) = amp_mod {
                    amp *= modulation[n];
                }
                let step = ratio as f64 * rate_ratio;
                self.stream[n] = looper.tick(table, window, sound.sample_rate, step) * amp;
            }
            mix_stream(index, streams, &self.stream[..frames], out);
        }
    }
}

/// Adds stream `index` of `streams` to the output channels.
///
/// With at least as many streams as outputs, stream `i` lands on output
/// `i % outputs`; with fewer, output `o` takes stream `o % streams`.
pub fn mix_stream(index: usize, streams: usize, stream: &[f32], out: &mut AudioBuffer) {
    let outputs = out.channel_count();
    if outputs == 0 || streams == 0 {
        return;
    }
    for (o, channel) in out.as_mut_slice().iter_mut().enumerate() {
        let routed = if streams >= outputs {
            index % outputs == o
        } else {
            o % streams == index
        };
        if routed {
            for (dst, src) in channel.iter_mut().zip(stream) {
                *dst += *src;
            }
        }
    }
}

/// Everything produced when a sampler is built.
pub struct SamplerParts {
    pub control: Sampler,
    pub voice: SamplerVoice,
    pub writers: Vec<AutomationWriter>,
}

impl SamplerParts {
    /// Builds a sampler named `name` over `sound`, reading its five curve
    /// lines and panel settings from the session.
    pub fn build(
        name: &str,
        sound: SoundData,
        session: &Session,
        ctx: &BuildContext,
        detune: Vec<f32>,
    ) -> Result<Self, ConfigurationError> {
        let info: &SamplerInfo = session.sampler_info(name)?;
        let triples: [&ParamTriple; 5] = [
            &info.loop_in,
            &info.loop_out,
            &info.loop_x,
            &info.gain,
            &info.transp,
        ];

        let mut controls = Vec::with_capacity(5);
        let mut signals = Vec::with_capacity(5);
        let mut writers = Vec::new();
        for (suffix, triple) in CHANNEL_SUFFIXES.iter().zip(triples) {
            let line_name = format!("{name}{suffix}");
            let line = session.line(&line_name)?;
            let parts =
                ChannelParts::build(&line_name, triple.init, triple.play, triple.rec, line, ctx)?;
            controls.push(parts.control);
            signals.push(parts.signal);
            writers.extend(parts.writer);
        }
        let channels: [ChannelControl; 5] = controls
            .try_into()
            .map_err(|_| ConfigurationError::invalid(name, "sampler channel count"))?;
        let signals: [ChannelSignal; 5] = signals
            .try_into()
            .map_err(|_| ConfigurationError::invalid(name, "sampler channel count"))?;

        let table_channels = sound.channel_count().max(1);
        let streams = if detune.len() > 1 {
            detune.len()
        } else {
            table_channels
        };
        let detune: Arc<[f32]> = Arc::from(detune);
        let loop_mode = Arc::new(AtomicU8::new(info.loop_mode));
        let xfade_shape = Arc::new(AtomicU8::new(info.xfade_shape));
        let sound = SoundTable::new(sound);
        let looper = Looper::new(
            LoopMode::from_index(info.loop_mode),
            FadeShape::from_index(info.xfade_shape),
            info.start_from_loop,
        );

        let control = Sampler {
            name: Arc::from(name),
            channels,
            loop_mode: Arc::clone(&loop_mode),
            xfade_shape: Arc::clone(&xfade_shape),
            sound: sound.clone(),
            detune: Arc::clone(&detune),
            pitch_mod: None,
        };
        let voice = SamplerVoice {
            channels: signals,
            loop_mode,
            xfade_shape,
            sound,
            loopers: vec![looper; streams],
            detune,
            stream: vec![0.0; ctx.block_size.max(1)],
            sample_rate: ctx.sample_rate,
        };
        Ok(Self {
            control,
            voice,
            writers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx() -> BuildContext {
        BuildContext {
            sample_rate: 1_000.0,
            block_size: 64,
            duration: 10.0,
        }
    }

    fn session() -> Session {
        Session::new(10.0)
            .with_sampler("snd", SamplerInfo::live(0.5))
            .with_sampler_lines("snd")
    }

    fn sound(channels: usize) -> SoundData {
        SoundData::from_channels(1_000.0, vec![vec![0.5; 2_000]; channels])
    }

    #[test]
    fn detune_has_one_entry_per_voice_and_channel() {
        let mut rng = StdRng::seed_from_u64(7);
        let poly = Polyphony {
            voices: 3,
            spread: 0.1,
        };
        let detune = poly.detune(2, &mut rng);
        assert_eq!(detune.len(), 6);
        assert!(detune.iter().all(|d| (0.9..=1.1).contains(d)));
        assert_eq!(Polyphony::default().detune(2, &mut rng), vec![1.0]);
    }

    #[test]
    fn missing_line_aborts_the_build() {
        let session = Session::new(10.0).with_sampler("snd", SamplerInfo::live(0.5));
        let err = SamplerParts::build("snd", sound(1), &session, &ctx(), vec![1.0])
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::MissingLine("sndstart".into()));
    }

    #[test]
    fn replayed_channels_reject_direct_values() {
        let mut session = session();
        session.samplers.get_mut("snd").unwrap().transp.play = crate::session::PlayMode::Play;
        let parts = SamplerParts::build("snd", sound(1), &session, &ctx(), vec![1.0]).unwrap();
        assert!(!parts.control.set_pitch(12.0));
        assert!(parts.control.set_gain(-6.0));
    }

    #[test]
    fn mono_sound_is_spread_over_stereo_output() {
        let mut parts = SamplerParts::build("snd", sound(1), &session(), &ctx(), vec![1.0]).unwrap();
        let mut out = AudioBuffer::new(2, 64);
        for _ in 0..4 {
            out.clear();
            parts.voice.process(64, &mut out, None, None);
        }
        assert_eq!(out.channel(0), out.channel(1));
        assert!(out.peak() > 0.4);
    }

    #[test]
    fn streams_fold_onto_fewer_outputs() {
        let mut out = AudioBuffer::new(2, 4);
        for index in 0..4 {
            mix_stream(index, 4, &[1.0; 4], &mut out);
        }
        assert_eq!(out.channel(0), &[2.0; 4]);
        assert_eq!(out.channel(1), &[2.0; 4]);

        let mut wide = AudioBuffer::new(4, 2);
        mix_stream(0, 2, &[1.0, 1.0], &mut wide);
        assert_eq!(wide.channel(0), &[1.0, 1.0]);
        assert_eq!(wide.channel(1), &[0.0, 0.0]);
        assert_eq!(wide.channel(2), &[1.0, 1.0]);
    }

    #[test]
    fn polyphony_multiplies_streams() {
        let parts = SamplerParts::build("snd", sound(2), &session(), &ctx(), vec![1.0; 6]).unwrap();
        assert_eq!(parts.voice.streams(), 6);
        assert_eq!(parts.control.detune().len(), 6);
    }

    #[test]
    fn loop_mode_is_shared_with_the_voice() {
        let parts = SamplerParts::build("snd", sound(1), &session(), &ctx(), vec![1.0]).unwrap();
        parts.control.set_loop_mode(3);
        parts.control.set_loop_mode(3);
        assert_eq!(parts.voice.loop_mode.load(Ordering::Relaxed), 3);
        parts.control.set_xfade_shape(1);
        assert_eq!(parts.control.xfade_shape(), 1);
    }
}
