//! Parameter channels: live glided values or timeline replays of a curve.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;
use cadenza_dsp::LinearGlide;

use crate::automation::{
    automation_track, AutomationWriter, CurveTable, RecordTap, SharedTable, TableReader,
    DEFAULT_TABLE_SIZE,
};
use crate::error::ConfigurationError;
use crate::session::{CurveLine, PlayMode};

/// Glide time applied to every live value change, in seconds.
pub const RAMP_TIME: f32 = 0.025;

/// Render parameters every channel is built against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildContext {
    pub sample_rate: f32,
    pub block_size: usize,
    /// Timeline length in seconds.
    pub duration: f64,
}

/// Control-thread handle of a channel.
#[derive(Debug, Clone)]
pub struct ChannelControl {
    name: Arc<str>,
    mode: PlayMode,
    target: Arc<AtomicF32>,
    current: Arc<AtomicF32>,
    table: SharedTable,
}

impl ChannelControl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        !self.mode.is_replay()
    }

    /// Sets the glide target. Replay channels ignore it and return `false`.
    pub fn set_value(&self, value: f32) -> bool {
        if !self.is_live() || !value.is_finite() {
            return false;
        }
        self.target.store(value, Ordering::Relaxed);
        true
    }

    pub fn target(&self) -> f32 {
        self.target.load(Ordering::Relaxed)
    }

    /// Last value the audio thread produced.
    pub fn current_value(&self) -> f32 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    pub(crate) fn current_cell(&self) -> Arc<AtomicF32> {
        Arc::clone(&self.current)
    }

    pub fn replace_curve(&self, breakpoints: &[(f64, f32)]) {
        self.table.replace(breakpoints);
    }
}

enum Source {
    Live {
        glide: LinearGlide,
        target: Arc<AtomicF32>,
    },
    Replay {
        table: SharedTable,
        reader: TableReader,
    },
}

/// Audio-thread half of a channel. Renders one block at a time into its own
/// buffer and publishes the last value.
pub struct ChannelSignal {
    source: Source,
    current: Arc<AtomicF32>,
    tap: Option<RecordTap>,
    buffer: Vec<f32>,
}

impl ChannelSignal {
    pub fn process(&mut self, frames: usize) {
        let frames = frames.min(self.buffer.len());
        let out = &mut self.buffer[..frames];
        match &mut self.source {
            Source::Live { glide, target } => {
                glide.set_target(target.load(Ordering::Relaxed));
                for sample in out.iter_mut() {
                    *sample = glide.next();
                }
            }
            Source::Replay { table, reader } => {
                let table = table.load();
                reader.process(&table, out);
            }
        }
        if let Some(last) = out.last() {
            self.current.store(*last, Ordering::Relaxed);
        }
        if let Some(tap) = self.tap.as_mut() {
            tap.push_block(out);
        }
    }

    pub fn output(&self, frames: usize) -> &[f32] {
        &self.buffer[..frames.min(self.buffer.len())]
    }

    /// Restarts replay and recording at the top of the timeline.
    pub fn rewind(&mut self) {
        if let Source::Replay { reader, .. } = &mut self.source {
            reader.reset();
        }
        if let Some(tap) = self.tap.as_mut() {
            tap.rewind();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.tap.is_some()
    }
}

/// Both halves of a freshly built channel plus its automation track.
pub struct ChannelParts {
    pub control: ChannelControl,
    pub signal: ChannelSignal,
    pub writer: Option<AutomationWriter>,
}

impl ChannelParts {
    /// Builds a channel from a curve line.
    ///
    /// `play` and `rec` come from whoever owns the flags (the line itself for
    /// sliders, the sampler panel for sampler parameters).
    pub fn build(
        name: &str,
        init: f32,
        play: PlayMode,
        rec: bool,
        line: &CurveLine,
        ctx: &BuildContext,
    ) -> Result<Self, ConfigurationError> {
        let table = SharedTable::new(CurveTable::build(
            &line.data,
            line.shape(),
            ctx.duration,
            DEFAULT_TABLE_SIZE,
        ));
        let target = Arc::new(AtomicF32::new(init));
        let current = Arc::new(AtomicF32::new(init));

        let source = if play.is_replay() {
            Source::Replay {
                table: table.clone(),
                reader: TableReader::new(ctx.sample_rate, ctx.duration),
            }
        } else {
            Source::Live {
                glide: LinearGlide::new(ctx.sample_rate, RAMP_TIME, init),
                target: Arc::clone(&target),
            }
        };

        let (tap, writer) = if rec {
            let path = line
                .path
                .clone()
                .ok_or_else(|| ConfigurationError::MissingAutomationPath(line.name.clone()))?;
            let (tap, writer) = automation_track(&line.name, path, ctx.sample_rate, ctx.duration);
            (Some(tap), Some(writer))
        } else {
            (None, None)
        };

        Ok(Self {
            control: ChannelControl {
                name: Arc::from(name),
                mode: play,
                target,
                current: Arc::clone(&current),
                table,
            },
            signal: ChannelSignal {
                source,
                current,
                tap,
                buffer: vec![0.0; ctx.block_size.max(1)],
            },
            writer,
        })
    }
}

/// One-curve slider widget.
#[derive(Debug, Clone)]
pub struct Slider {
    channel: ChannelControl,
    gliss: f32,
}

impl Slider {
    pub fn new(channel: ChannelControl, gliss: f32) -> Self {
        Self { channel, gliss }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn mode(&self) -> PlayMode {
        self.channel.mode()
    }

    pub fn set_value(&self, value: f32) -> bool {
        self.channel.set_value(value)
    }

    pub fn value(&self) -> f32 {
        self.channel.current_value()
    }

    /// Portamento the widget declares for its own display.
    pub fn gliss(&self) -> f32 {
        self.gliss
    }

    pub fn channel(&self) -> &ChannelControl {
        &self.channel
    }
}

/// Two-curve range widget (`<name>min`, `<name>max`).
#[derive(Debug, Clone)]
pub struct Range {
    name: Arc<str>,
    lanes: [ChannelControl; 2],
}

impl Range {
    pub const SUFFIXES: [&'static str; 2] = ["min", "max"];

    pub fn new(name: &str, min: ChannelControl, max: ChannelControl) -> Self {
        Self {
            name: Arc::from(name),
            lanes: [min, max],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> PlayMode {
        self.lanes[0].mode()
    }

    pub fn set_value(&self, value: [f32; 2]) -> bool {
        let min = self.lanes[0].set_value(value[0]);
        let max = self.lanes[1].set_value(value[1]);
        min && max
    }

    pub fn value(&self) -> [f32; 2] {
        [self.lanes[0].current_value(), self.lanes[1].current_value()]
    }

    pub fn lane(&self, index: usize) -> Option<&ChannelControl> {
        self.lanes.get(index)
    }
}

/// Graph widget: a raw lookup table, or a reader sweeping it.
#[derive(Debug, Clone)]
pub struct Graph {
    name: Arc<str>,
    table: SharedTable,
    current: Option<Arc<AtomicF32>>,
}

impl Graph {
    /// Builds the control handle and, unless the graph is a plain table, the
    /// reader that sweeps it.
    pub fn build(
        name: &str,
        line: &CurveLine,
        as_table: bool,
        size: usize,
        ctx: &BuildContext,
    ) -> (Self, Option<ChannelSignal>) {
        let table = SharedTable::new(CurveTable::build(
            &line.data,
            line.shape(),
            ctx.duration,
            size.max(2),
        ));
        if as_table {
            let graph = Self {
                name: Arc::from(name),
                table,
                current: None,
            };
            return (graph, None);
        }
        let initial = table.load().value_at(0.0);
        let current = Arc::new(AtomicF32::new(initial));
        let signal = ChannelSignal {
            source: Source::Replay {
                table: table.clone(),
                reader: TableReader::new(ctx.sample_rate, ctx.duration),
            },
            current: Arc::clone(&current),
            tap: None,
            buffer: vec![0.0; ctx.block_size.max(1)],
        };
        let graph = Self {
            name: Arc::from(name),
            table,
            current: Some(current),
        };
        (graph, Some(signal))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_table(&self) -> bool {
        self.current.is_none()
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    /// Replaces the backing curve in place.
    pub fn set_value(&self, breakpoints: &[(f64, f32)]) {
        self.table.replace(breakpoints);
    }

    pub(crate) fn current_cell(&self) -> Option<Arc<AtomicF32>> {
        self.current.clone()
    }

    /// Current reader output, `None` for plain tables.
    pub fn value(&self) -> Option<f32> {
        self.current
            .as_ref()
            .map(|current| current.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BuildContext {
        BuildContext {
            sample_rate: 1_000.0,
            block_size: 100,
            duration: 1.0,
        }
    }

    #[test]
    fn live_channel_glides_to_new_values() {
        let line = CurveLine::new("amp", vec![(0.0, 0.5)]);
        let mut parts = ChannelParts::build("amp", 0.0, PlayMode::Off, false, &line, &ctx()).unwrap();
        assert!(parts.control.set_value(1.0));
        parts.signal.process(100);
        let out = parts.signal.output(100);
        assert!(out[0] > 0.0 && out[0] < 0.1);
        assert_eq!(out[99], 1.0);
        assert_eq!(parts.control.current_value(), 1.0);
    }

    #[test]
    fn replay_channel_ignores_set_value() {
        let line = CurveLine::new("amp", vec![(0.0, 0.0), (1.0, 1.0)]).with_play(PlayMode::Play);
        let mut parts = ChannelParts::build("amp", 0.3, PlayMode::Play, false, &line, &ctx()).unwrap();
        assert!(!parts.control.set_value(0.9));
        parts.signal.process(100);
        parts.signal.process(100);
        assert!((parts.control.current_value() - 0.199).abs() < 1e-3);
    }

    #[test]
    fn replay_wraps_after_one_pass() {
        let line = CurveLine::new("amp", vec![(0.0, 0.0), (1.0, 1.0)]);
        let mut parts = ChannelParts::build("amp", 0.0, PlayMode::Continuous, false, &line, &ctx()).unwrap();
        for _ in 0..10 {
            parts.signal.process(100);
        }
        parts.signal.process(1);
        assert_eq!(parts.signal.output(1)[0], 0.0);
    }

    #[test]
    fn recording_requires_a_path() {
        let line = CurveLine::new("cut", Vec::new());
        let err = ChannelParts::build("cut", 0.0, PlayMode::Off, true, &line, &ctx())
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::MissingAutomationPath("cut".into()));
    }

    #[test]
    fn range_sets_both_lanes() {
        let min = ChannelParts::build("fmin", 1.0, PlayMode::Off, false, &CurveLine::new("fmin", vec![]), &ctx()).unwrap();
        let max = ChannelParts::build("fmax", 2.0, PlayMode::Off, false, &CurveLine::new("fmax", vec![]), &ctx()).unwrap();
        let range = Range::new("f", min.control.clone(), max.control.clone());
        assert!(range.set_value([3.0, 4.0]));
        assert_eq!(min.control.target(), 3.0);
        assert_eq!(max.control.target(), 4.0);
    }

    #[test]
    fn graph_set_value_replaces_the_swept_curve() {
        let line = CurveLine::new("env", vec![(0.0, 1.0)]);
        let (graph, signal) = Graph::build("env", &line, false, 512, &ctx());
        let mut signal = signal.unwrap();
        graph.set_value(&[(0.0, 0.25)]);
        signal.process(10);
        assert_eq!(graph.value(), Some(0.25));
        assert_eq!(graph.table().snapshot().size(), 512);

        let (table_only, none) = Graph::build("wave", &line, true, 64, &ctx());
        assert!(none.is_none());
        assert!(table_only.is_table());
        assert_eq!(table_only.value(), None);
    }
}
