//! Project state handed to every constructor in place of global variables.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::AudioConfig;
use crate::error::ConfigurationError;

/// How a curve-driven channel produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    /// Driven live by `set_value`.
    #[default]
    Off,
    /// Replayed from the curve and mirrored back to the UI.
    Play,
    /// Replayed from the curve without UI updates.
    Continuous,
}

impl PlayMode {
    pub fn is_replay(self) -> bool {
        !matches!(self, PlayMode::Off)
    }

    pub fn from_flag(flag: u8) -> Self {
        match flag {
            0 => PlayMode::Off,
            1 => PlayMode::Play,
            _ => PlayMode::Continuous,
        }
    }
}

/// Interpolation between breakpoints of a curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurveShape {
    #[default]
    Linear,
    Cosine,
}

/// One line of the curve editor: breakpoints plus replay/record flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveLine {
    pub name: String,
    /// `(time in seconds, value)` pairs.
    #[serde(default)]
    pub data: Vec<(f64, f32)>,
    #[serde(default)]
    pub curved: bool,
    #[serde(default)]
    pub play: PlayMode,
    #[serde(default)]
    pub rec: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CurveLine {
    pub fn new(name: impl Into<String>, data: Vec<(f64, f32)>) -> Self {
        Self {
            name: name.into(),
            data,
            curved: false,
            play: PlayMode::Off,
            rec: false,
            path: None,
        }
    }

    pub fn with_play(mut self, play: PlayMode) -> Self {
        self.play = play;
        self
    }

    pub fn recording_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.rec = true;
        self.path = Some(path.into());
        self
    }

    pub fn curved(mut self, curved: bool) -> Self {
        self.curved = curved;
        self
    }

    pub fn shape(&self) -> CurveShape {
        if self.curved {
            CurveShape::Cosine
        } else {
            CurveShape::Linear
        }
    }
}

/// `(initial value, play, rec)` for one sampler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamTriple {
    pub init: f32,
    #[serde(default)]
    pub play: PlayMode,
    #[serde(default)]
    pub rec: bool,
}

impl ParamTriple {
    pub const fn live(init: f32) -> Self {
        Self {
            init,
            play: PlayMode::Off,
            rec: false,
        }
    }
}

/// Settings of the sampler configuration panel for one sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerInfo {
    pub loop_in: ParamTriple,
    pub loop_out: ParamTriple,
    pub loop_x: ParamTriple,
    pub gain: ParamTriple,
    pub transp: ParamTriple,
    #[serde(default = "default_loop_mode")]
    pub loop_mode: u8,
    #[serde(default)]
    pub xfade_shape: u8,
    #[serde(default)]
    pub start_from_loop: bool,
}

fn default_loop_mode() -> u8 {
    1
}

impl SamplerInfo {
    /// All parameters live, looping forward over `dur` seconds from the top.
    pub fn live(dur: f32) -> Self {
        Self {
            loop_in: ParamTriple::live(0.0),
            loop_out: ParamTriple::live(dur),
            loop_x: ParamTriple::live(5.0),
            gain: ParamTriple::live(0.0),
            transp: ParamTriple::live(0.0),
            loop_mode: 1,
            xfade_shape: 0,
            start_from_loop: false,
        }
    }
}

/// A sound file selected for a `filein`/sampler widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundInput {
    pub path: PathBuf,
    /// Read offset into the file, in seconds.
    #[serde(default)]
    pub offset: f64,
}

/// Value of a slider or range widget as last set by the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SliderValue {
    Single(f32),
    Pair([f32; 2]),
}

/// Value held by a toggle, popup, or generator widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetValue {
    Number(f32),
    Choice { index: u32, label: String },
    List(Vec<f32>),
}

impl WidgetValue {
    pub fn as_index(&self) -> Option<u32> {
        match self {
            WidgetValue::Number(value) if *value >= 0.0 => Some(value.round() as u32),
            WidgetValue::Choice { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f32> {
        match self {
            WidgetValue::Number(value) => Some(*value),
            WidgetValue::Choice { index, .. } => Some(*index as f32),
            WidgetValue::List(_) => None,
        }
    }
}

/// One entry of the effects rack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSelection {
    pub name: String,
    #[serde(default)]
    pub params: [f32; 3],
    #[serde(default = "default_preset")]
    pub preset: f32,
    #[serde(default)]
    pub preset_label: String,
    /// Per-knob `(play, rec)` flags, kept for the rack.
    #[serde(default)]
    pub knobs: [(u8, bool); 3],
}

fn default_preset() -> f32 {
    1.0
}

impl PluginSelection {
    pub fn new(name: impl Into<String>, params: [f32; 3]) -> Self {
        Self {
            name: name.into(),
            params,
            preset: 1.0,
            preset_label: String::new(),
            knobs: [(0, false); 3],
        }
    }

    pub fn with_preset(mut self, preset: f32, label: impl Into<String>) -> Self {
        self.preset = preset;
        self.preset_label = label.into();
        self
    }
}

/// Everything a module load reads from the project store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Timeline length in seconds.
    pub total_time: f64,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub lines: Vec<CurveLine>,
    #[serde(default)]
    pub samplers: BTreeMap<String, SamplerInfo>,
    #[serde(default)]
    pub inputs: BTreeMap<String, SoundInput>,
    #[serde(default)]
    pub slider_values: BTreeMap<String, SliderValue>,
    #[serde(default)]
    pub widget_values: BTreeMap<String, WidgetValue>,
    #[serde(default)]
    pub plugins: Vec<Option<PluginSelection>>,
    /// Seeds polyphonic detuning so renders are repeatable.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Session {
    pub fn new(total_time: f64) -> Self {
        Self {
            total_time,
            audio: AudioConfig::default(),
            lines: Vec::new(),
            samplers: BTreeMap::new(),
            inputs: BTreeMap::new(),
            slider_values: BTreeMap::new(),
            widget_values: BTreeMap::new(),
            plugins: Vec::new(),
            seed: None,
        }
    }

    /// Timeline length, never below one millisecond.
    pub fn duration(&self) -> f64 {
        if self.total_time.is_finite() {
            self.total_time.max(0.001)
        } else {
            0.001
        }
    }

    pub fn line(&self, name: &str) -> Result<&CurveLine, ConfigurationError> {
        self.lines
            .iter()
            .find(|line| line.name == name)
            .ok_or_else(|| ConfigurationError::MissingLine(name.to_string()))
    }

    pub fn sampler_info(&self, name: &str) -> Result<&SamplerInfo, ConfigurationError> {
        self.samplers
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingSamplerInfo(name.to_string()))
    }

    pub fn input(&self, name: &str) -> Result<&SoundInput, ConfigurationError> {
        self.inputs
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingSoundInput(name.to_string()))
    }

    pub fn with_line(mut self, line: CurveLine) -> Self {
        self.lines.retain(|existing| existing.name != line.name);
        self.lines.push(line);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.inputs.insert(
            name.into(),
            SoundInput {
                path: path.into(),
                offset: 0.0,
            },
        );
        self
    }

    pub fn with_sampler(mut self, name: impl Into<String>, info: SamplerInfo) -> Self {
        self.samplers.insert(name.into(), info);
        self
    }

    pub fn with_plugin(mut self, slot: usize, selection: PluginSelection) -> Self {
        if self.plugins.len() <= slot {
            self.plugins.resize(slot + 1, None);
        }
        self.plugins[slot] = Some(selection);
        self
    }

    pub fn with_widget_value(mut self, name: impl Into<String>, value: WidgetValue) -> Self {
        self.widget_values.insert(name.into(), value);
        self
    }

    /// Adds flat live lines for the five parameters of sampler `name`.
    pub fn with_sampler_lines(mut self, name: &str) -> Self {
        for suffix in crate::sampler::CHANNEL_SUFFIXES {
            self = self.with_line(CurveLine::new(format!("{name}{suffix}"), Vec::new()));
        }
        self
    }
}
