//! Declarative patches: widgets and samplers wired into a render graph.
//!
//! A [`ModuleDescriptor`] is plain data. [`Module::load`] interprets it against
//! a [`Session`] and produces two halves: the [`Module`], which the control
//! thread keeps for widget traffic, and the [`ModuleGraph`], which is moved to
//! the render thread. Every lookup that can fail happens before either half
//! exists, so a failed load leaves nothing behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::automation::{AutomationWriter, SharedTable};
use crate::buffer::{AudioBuffer, BufferConfig};
use crate::channel::{
    BuildContext, ChannelControl, ChannelParts, ChannelSignal, Graph, Range, Slider,
};
use crate::error::{ConfigurationError, EngineError, FileError};
use crate::sampler::{Polyphony, Sampler, SamplerParts, SamplerVoice, SoundData, SoundTable};
use crate::session::{CurveLine, PlayMode, Session, SliderValue, SoundInput, WidgetValue};

fn default_graph_size() -> usize {
    8192
}

/// Side effect a toggle or popup has on a sampler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetAction {
    LoopMode { sampler: String },
    XfadeShape { sampler: String },
}

/// One widget declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WidgetDescriptor {
    Slider {
        name: String,
        init: f32,
        /// Portamento of the on-screen control, in seconds.
        #[serde(default)]
        gliss: f32,
    },
    Range {
        name: String,
        init: [f32; 2],
    },
    Graph {
        name: String,
        /// Expose the curve as a lookup table instead of sweeping it.
        #[serde(default)]
        table: bool,
        #[serde(default = "default_graph_size")]
        size: usize,
        /// Breakpoints used when the session has no line for this graph.
        #[serde(default)]
        func: Vec<(f64, f32)>,
    },
    Toggle {
        name: String,
        #[serde(default)]
        init: f32,
        #[serde(default)]
        action: Option<WidgetAction>,
    },
    Popup {
        name: String,
        #[serde(default)]
        init: f32,
        #[serde(default)]
        action: Option<WidgetAction>,
    },
    Gen {
        name: String,
        #[serde(default)]
        init: Vec<f32>,
    },
    Button {
        name: String,
    },
    Poly {
        name: String,
    },
    Filein {
        name: String,
    },
}

impl WidgetDescriptor {
    pub fn name(&self) -> &str {
        match self {
            WidgetDescriptor::Slider { name, .. }
            | WidgetDescriptor::Range { name, .. }
            | WidgetDescriptor::Graph { name, .. }
            | WidgetDescriptor::Toggle { name, .. }
            | WidgetDescriptor::Popup { name, .. }
            | WidgetDescriptor::Gen { name, .. }
            | WidgetDescriptor::Button { name }
            | WidgetDescriptor::Poly { name }
            | WidgetDescriptor::Filein { name } => name,
        }
    }
}

/// A sampler in the patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerNode {
    pub name: String,
    /// Session sound input feeding the sampler; defaults to `name`.
    #[serde(default)]
    pub input: Option<String>,
    /// Signal multiplying the playback ratio (`"x"`, `"x.min"`, `"x.max"`).
    #[serde(default)]
    pub pitch: Option<String>,
    /// Signal multiplying the linear gain.
    #[serde(default)]
    pub amp: Option<String>,
}

impl SamplerNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: None,
            pitch: None,
            amp: None,
        }
    }

    pub fn with_pitch(mut self, signal: impl Into<String>) -> Self {
        self.pitch = Some(signal.into());
        self
    }

    pub fn with_amp(mut self, signal: impl Into<String>) -> Self {
        self.amp = Some(signal.into());
        self
    }

    pub fn input_name(&self) -> &str {
        self.input.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub widgets: Vec<WidgetDescriptor>,
    #[serde(default)]
    pub samplers: Vec<SamplerNode>,
}

impl ModuleDescriptor {
    /// One sampler `snd` playing the sound input `snd`.
    pub fn default_module() -> Self {
        Self {
            name: "default".into(),
            widgets: Vec::new(),
            samplers: vec![SamplerNode::new("snd")],
        }
    }
}

/// Control handle registered under a widget or sampler name.
#[derive(Debug, Clone)]
pub enum SignalHandle {
    Slider(Slider),
    Range(Range),
    Graph(Graph),
    Sampler(Sampler),
}

/// What happens when a toggle, popup, generator, or button changes.
#[derive(Debug, Clone)]
pub enum WidgetCommand {
    SetLoopMode(Sampler),
    SetXfadeShape(Sampler),
    /// Keep the value for whoever asks; no audio side effect.
    Store,
}

impl WidgetCommand {
    fn run(&self, value: &WidgetValue) {
        let index = || value.as_index().map(|index| index.min(u8::MAX as u32) as u8);
        match self {
            WidgetCommand::SetLoopMode(sampler) => {
                if let Some(mode) = index() {
                    sampler.set_loop_mode(mode);
                }
            }
            WidgetCommand::SetXfadeShape(sampler) => {
                if let Some(shape) = index() {
                    sampler.set_xfade_shape(shape);
                }
            }
            WidgetCommand::Store => {}
        }
    }
}

/// Value relayed to the UI by the updater.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WidgetUpdate {
    Single(f32),
    Pair([f32; 2]),
}

/// Receives replayed values and the timeline position, about 60 times a
/// second, from the updater thread.
pub trait WidgetSink: Send + Sync {
    fn slider_value(&self, name: &str, value: WidgetUpdate);

    fn time(&self, seconds: f64);
}

/// Control-thread half of a loaded module.
pub struct Module {
    name: String,
    duration: f64,
    sample_rate: f32,
    signals: BTreeMap<String, SignalHandle>,
    commands: BTreeMap<String, WidgetCommand>,
    values: Mutex<BTreeMap<String, WidgetValue>>,
    fileins: BTreeMap<String, SoundTable>,
    polyphony: Option<Polyphony>,
    writers: Mutex<Vec<AutomationWriter>>,
    clock: Arc<AtomicU64>,
}

struct VoiceNode {
    voice: SamplerVoice,
    pitch_mod: Option<usize>,
    amp_mod: Option<usize>,
}

/// Render-thread half of a loaded module.
pub struct ModuleGraph {
    signals: Vec<ChannelSignal>,
    voices: Vec<VoiceNode>,
    clock: Arc<AtomicU64>,
}

impl ModuleGraph {
    /// Renders one block into `out`, replacing its contents.
    pub fn process(&mut self, out: &mut AudioBuffer, frames: usize) {
        for channel in out.channels_mut() {
            let end = frames.min(channel.len());
            channel[..end].fill(0.0);
        }
        for signal in &mut self.signals {
            signal.process(frames);
        }
        for node in &mut self.voices {
            let pitch = node.pitch_mod.map(|index| self.signals[index].output(frames));
            let amp = node.amp_mod.map(|index| self.signals[index].output(frames));
            node.voice.process(frames, out, pitch, amp);
        }
        self.clock.fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Restarts the timeline: replays, recordings, and loopers start over.
    pub fn rewind(&mut self) {
        for signal in &mut self.signals {
            signal.rewind();
        }
        for node in &mut self.voices {
            node.voice.rewind();
        }
        self.clock.store(0, Ordering::Relaxed);
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }
}

/// A modulation source: index of its signal in the graph and the value cell
/// the control side reads.
type Source = (usize, Arc<AtomicF32>);

struct Loader<'a> {
    session: &'a Session,
    ctx: BuildContext,
    claimed: BTreeSet<String>,
    signals: BTreeMap<String, SignalHandle>,
    commands: BTreeMap<String, WidgetCommand>,
    values: BTreeMap<String, WidgetValue>,
    fileins: BTreeMap<String, SoundTable>,
    sources: BTreeMap<String, Source>,
    graph_signals: Vec<ChannelSignal>,
    writers: Vec<AutomationWriter>,
    polyphony: Option<Polyphony>,
}

impl Loader<'_> {
    fn claim(&mut self, name: &str) -> Result<(), ConfigurationError> {
        if !self.claimed.insert(name.to_string()) {
            return Err(ConfigurationError::invalid(name, "duplicate widget name"));
        }
        Ok(())
    }

    fn push_signal(&mut self, source: &str, parts: ChannelParts) -> ChannelControl {
        self.sources.insert(
            source.to_string(),
            (self.graph_signals.len(), parts.control.current_cell()),
        );
        self.graph_signals.push(parts.signal);
        self.writers.extend(parts.writer);
        parts.control
    }

    fn slider(&mut self, name: &str, init: f32, gliss: f32) -> Result<(), ConfigurationError> {
        let line = self.session.line(name)?;
        let init = match self.session.slider_values.get(name) {
            Some(SliderValue::Single(value)) => *value,
            _ => init,
        };
        let parts = ChannelParts::build(name, init, line.play, line.rec, line, &self.ctx)?;
        let control = self.push_signal(name, parts);
        self.signals.insert(
            name.to_string(),
            SignalHandle::Slider(Slider::new(control, gliss)),
        );
        Ok(())
    }

    fn range(&mut self, name: &str, init: [f32; 2]) -> Result<(), ConfigurationError> {
        let [min_name, max_name] = Range::SUFFIXES.map(|suffix| format!("{name}{suffix}"));
        let min_line = self.session.line(&min_name)?;
        let max_line = self.session.line(&max_name)?;
        let init = match self.session.slider_values.get(name) {
            Some(SliderValue::Pair(value)) => *value,
            _ => init,
        };
        let play = min_line.play;
        let min = ChannelParts::build(&min_name, init[0], play, min_line.rec, min_line, &self.ctx)?;
        let max = ChannelParts::build(&max_name, init[1], play, max_line.rec, max_line, &self.ctx)?;
        let min = self.push_signal(&format!("{name}.min"), min);
        let max = self.push_signal(&format!("{name}.max"), max);
        self.signals.insert(
            name.to_string(),
            SignalHandle::Range(Range::new(name, min, max)),
        );
        Ok(())
    }

    fn graph(
        &mut self,
        name: &str,
        as_table: bool,
        size: usize,
        func: &[(f64, f32)],
    ) -> Result<(), ConfigurationError> {
        let seeded;
        let mut line = self.session.line(name)?;
        // An empty line starts from the widget's own breakpoints.
        if line.data.is_empty() && !func.is_empty() {
            seeded = CurveLine {
                data: func.to_vec(),
                ..line.clone()
            };
            line = &seeded;
        }
        let (graph, signal) = Graph::build(name, line, as_table, size, &self.ctx);
        if let (Some(signal), Some(cell)) = (signal, graph.current_cell()) {
            let index = self.graph_signals.len();
            self.sources.insert(name.to_string(), (index, cell));
            self.graph_signals.push(signal);
        }
        self.signals.insert(name.to_string(), SignalHandle::Graph(graph));
        Ok(())
    }

    fn choice(
        &mut self,
        name: &str,
        init: WidgetValue,
        action: Option<&WidgetAction>,
    ) -> Result<(), ConfigurationError> {
        let command = match action {
            None => WidgetCommand::Store,
            Some(WidgetAction::LoopMode { sampler }) => {
                WidgetCommand::SetLoopMode(self.sampler(name, sampler)?)
            }
            Some(WidgetAction::XfadeShape { sampler }) => {
                WidgetCommand::SetXfadeShape(self.sampler(name, sampler)?)
            }
        };
        let value = self.session.widget_values.get(name).cloned().unwrap_or(init);
        command.run(&value);
        self.commands.insert(name.to_string(), command);
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn sampler(&self, widget: &str, sampler: &str) -> Result<Sampler, ConfigurationError> {
        match self.signals.get(sampler) {
            Some(SignalHandle::Sampler(sampler)) => Ok(sampler.clone()),
            _ => Err(ConfigurationError::invalid(
                widget,
                format!("action targets unknown sampler `{sampler}`"),
            )),
        }
    }

    fn polyphony(&mut self, name: &str) {
        let mut poly = Polyphony::default();
        for (key, value) in self.session.widget_values.range(name.to_string()..) {
            let Some(suffix) = key.strip_prefix(name) else {
                break;
            };
            let Some(number) = value.as_number() else {
                continue;
            };
            if suffix == "num" {
                poly.voices = number.max(0.0).round() as usize + 1;
            } else if !suffix.is_empty() {
                poly.spread = number;
            }
        }
        self.polyphony = Some(poly);
    }

    fn source(&self, name: &str) -> Result<Source, ConfigurationError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownSignal(name.to_string()))
    }
}

impl Module {
    /// Loads `descriptor`, decoding sounds from the session's file inputs.
    pub fn load(
        session: &Session,
        descriptor: &ModuleDescriptor,
        config: &BufferConfig,
    ) -> Result<(Self, ModuleGraph), EngineError> {
        Self::load_with(session, descriptor, config, |_, input| SoundData::load(input))
    }

    /// Like [`Module::load`] with sounds supplied by `load_sound`, which gets
    /// the input name and the session entry for it.
    pub fn load_with<F>(
        session: &Session,
        descriptor: &ModuleDescriptor,
        config: &BufferConfig,
        mut load_sound: F,
    ) -> Result<(Self, ModuleGraph), EngineError>
    where
        F: FnMut(&str, &SoundInput) -> Result<SoundData, FileError>,
    {
        let ctx = BuildContext {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            duration: session.duration(),
        };
        let mut loader = Loader {
            session,
            ctx,
            claimed: BTreeSet::new(),
            signals: BTreeMap::new(),
            commands: BTreeMap::new(),
            values: BTreeMap::new(),
            fileins: BTreeMap::new(),
            sources: BTreeMap::new(),
            graph_signals: Vec::new(),
            writers: Vec::new(),
            polyphony: None,
        };

        // Parameter widgets first so samplers can resolve their modulations.
        for widget in &descriptor.widgets {
            loader.claim(widget.name())?;
            match widget {
                WidgetDescriptor::Slider { name, init, gliss } => {
                    loader.slider(name, *init, *gliss)?
                }
                WidgetDescriptor::Range { name, init } => loader.range(name, *init)?,
                WidgetDescriptor::Graph {
                    name,
                    table,
                    size,
                    func,
                } => loader.graph(name, *table, *size, func)?,
                WidgetDescriptor::Poly { name } => {
                    if loader.polyphony.is_some() {
                        return Err(
                            ConfigurationError::invalid(name, "second polyphony widget").into()
                        );
                    }
                    loader.polyphony(name);
                }
                WidgetDescriptor::Filein { name } => {
                    let input = session.input(name)?;
                    let sound = load_sound(name, input)?;
                    loader.fileins.insert(name.clone(), SoundTable::new(sound));
                }
                _ => {}
            }
        }

        let mut rng = match session.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let polyphony = loader.polyphony.unwrap_or_default();
        let mut voices = Vec::with_capacity(descriptor.samplers.len());
        for node in &descriptor.samplers {
            loader.claim(&node.name)?;
            let input_name = node.input_name();
            let input = session.input(input_name)?;
            let sound = load_sound(input_name, input)?;
            let detune = polyphony.detune(sound.channel_count(), &mut rng);
            let pitch = node.pitch.as_deref().map(|name| loader.source(name)).transpose()?;
            let amp = node.amp.as_deref().map(|name| loader.source(name)).transpose()?;

            let SamplerParts {
                mut control,
                voice,
                writers,
            } = SamplerParts::build(&node.name, sound, session, &loader.ctx, detune)?;
            control.set_pitch_mod(pitch.as_ref().map(|(_, cell)| Arc::clone(cell)));
            loader.writers.extend(writers);
            loader
                .signals
                .insert(node.name.clone(), SignalHandle::Sampler(control));
            voices.push(VoiceNode {
                voice,
                pitch_mod: pitch.map(|(index, _)| index),
                amp_mod: amp.map(|(index, _)| index),
            });
        }

        // Choice widgets last: their actions may point at any sampler.
        for widget in &descriptor.widgets {
            match widget {
                WidgetDescriptor::Toggle { name, init, action }
                | WidgetDescriptor::Popup { name, init, action } => {
                    loader.choice(name, WidgetValue::Number(*init), action.as_ref())?
                }
                WidgetDescriptor::Gen { name, init } => {
                    loader.choice(name, WidgetValue::List(init.clone()), None)?
                }
                WidgetDescriptor::Button { name } => {
                    loader.choice(name, WidgetValue::Number(0.0), None)?
                }
                _ => {}
            }
        }

        let clock = Arc::new(AtomicU64::new(0));
        tracing::info!(
            module = %descriptor.name,
            samplers = voices.len(),
            widgets = descriptor.widgets.len(),
            recording = loader.writers.len(),
            "module loaded"
        );
        let module = Module {
            name: descriptor.name.clone(),
            duration: ctx.duration,
            sample_rate: config.sample_rate,
            signals: loader.signals,
            commands: loader.commands,
            values: Mutex::new(loader.values),
            fileins: loader.fileins,
            polyphony: loader.polyphony,
            writers: Mutex::new(loader.writers),
            clock: Arc::clone(&clock),
        };
        let graph = ModuleGraph {
            signals: loader.graph_signals,
            voices,
            clock,
        };
        Ok((module, graph))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeline length in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn signal(&self, name: &str) -> Result<&SignalHandle, ConfigurationError> {
        self.signals
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingWidget(name.to_string()))
    }

    pub fn signals(&self) -> impl Iterator<Item = (&str, &SignalHandle)> {
        self.signals.iter().map(|(name, handle)| (name.as_str(), handle))
    }

    pub fn sampler(&self, name: &str) -> Option<&Sampler> {
        match self.signals.get(name) {
            Some(SignalHandle::Sampler(sampler)) => Some(sampler),
            _ => None,
        }
    }

    pub fn slider(&self, name: &str) -> Option<&Slider> {
        match self.signals.get(name) {
            Some(SignalHandle::Slider(slider)) => Some(slider),
            _ => None,
        }
    }

    pub fn range(&self, name: &str) -> Option<&Range> {
        match self.signals.get(name) {
            Some(SignalHandle::Range(range)) => Some(range),
            _ => None,
        }
    }

    /// Curve table behind a graph widget.
    pub fn table(&self, name: &str) -> Option<&SharedTable> {
        match self.signals.get(name) {
            Some(SignalHandle::Graph(graph)) => Some(graph.table()),
            _ => None,
        }
    }

    /// Sound of a file input or sampler.
    pub fn sound(&self, name: &str) -> Option<&SoundTable> {
        self.fileins.get(name).or_else(|| self.sampler(name).map(Sampler::sound))
    }

    pub fn polyphony(&self) -> Option<Polyphony> {
        self.polyphony
    }

    pub fn widget_value(&self, name: &str) -> Option<WidgetValue> {
        self.values.lock().get(name).cloned()
    }

    /// Runs the command registered for a toggle, popup, generator, or button.
    pub fn apply_widget_value(&self, name: &str, value: WidgetValue) -> Result<(), ConfigurationError> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingWidget(name.to_string()))?;
        command.run(&value);
        self.values.lock().insert(name.to_string(), value);
        Ok(())
    }

    /// Re-applies curves and widget values after the session was edited.
    pub fn set_widget_values(&self, session: &Session) {
        for (name, handle) in &self.signals {
            match handle {
                SignalHandle::Graph(graph) => {
                    if let Ok(line) = session.line(name) {
                        graph.set_value(&line.data);
                    }
                }
                SignalHandle::Slider(slider) => {
                    if let Ok(line) = session.line(name) {
                        slider.channel().replace_curve(&line.data);
                    }
                    if let Some(SliderValue::Single(value)) = session.slider_values.get(name) {
                        slider.set_value(*value);
                    }
                }
                SignalHandle::Range(range) => {
                    for (index, suffix) in Range::SUFFIXES.iter().enumerate() {
                        if let (Some(lane), Ok(line)) =
                            (range.lane(index), session.line(&format!("{name}{suffix}")))
                        {
                            lane.replace_curve(&line.data);
                        }
                    }
                    if let Some(SliderValue::Pair(value)) = session.slider_values.get(name) {
                        range.set_value(*value);
                    }
                }
                SignalHandle::Sampler(sampler) => {
                    for suffix in crate::sampler::CHANNEL_SUFFIXES {
                        if let (Some(channel), Ok(line)) =
                            (sampler.channel(suffix), session.line(&format!("{name}{suffix}")))
                        {
                            channel.replace_curve(&line.data);
                        }
                    }
                }
            }
        }
        for (name, value) in &session.widget_values {
            if !self.commands.contains_key(name) {
                continue;
            }
            if let Err(err) = self.apply_widget_value(name, value.clone()) {
                tracing::warn!(widget = %name, %err, "widget value not applied");
            }
        }
    }

    /// Position on the timeline in seconds, wrapping every pass.
    pub fn elapsed(&self) -> f64 {
        let seconds = self.clock.load(Ordering::Relaxed) as f64 / self.sample_rate.max(1.0) as f64;
        seconds % self.duration
    }

    /// Pushes replayed values shown by the UI, then the timeline position.
    pub fn update(&self, sink: &dyn WidgetSink) {
        for (name, handle) in &self.signals {
            match handle {
                SignalHandle::Slider(slider) if slider.mode() == PlayMode::Play => {
                    sink.slider_value(name, WidgetUpdate::Single(slider.value()));
                }
                SignalHandle::Range(range) if range.mode() == PlayMode::Play => {
                    sink.slider_value(name, WidgetUpdate::Pair(range.value()));
                }
                _ => {}
            }
        }
        sink.time(self.elapsed());
    }

    pub fn automation_tracks(&self) -> usize {
        self.writers.lock().len()
    }

    /// Truncates every automation file for a new performance.
    pub fn begin_automation(&self) {
        for writer in self.writers.lock().iter_mut() {
            writer.begin();
        }
    }

    pub fn drain_automation(&self) -> usize {
        self.writers
            .lock()
            .iter_mut()
            .map(|writer| writer.drain())
            .sum()
    }

    pub fn flush_automation(&self) {
        for writer in self.writers.lock().iter_mut() {
            writer.flush();
            tracing::debug!(track = writer.name(), written = writer.written(), "automation flushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ChannelLayout;
    use crate::session::{PluginSelection, SamplerInfo};

    fn config() -> BufferConfig {
        BufferConfig::new(1_000.0, 50, ChannelLayout::Stereo)
    }

    fn tone(_: &str, _: &SoundInput) -> Result<SoundData, FileError> {
        let wave = (0..4_000).map(|n| (n as f32 * 0.05).sin() * 0.5).collect();
        Ok(SoundData::from_channels(1_000.0, vec![wave]))
    }

    fn session() -> Session {
        Session::new(10.0)
            .with_input("snd", "snd.wav")
            .with_sampler("snd", SamplerInfo::live(1.0))
            .with_sampler_lines("snd")
            .with_plugin(0, PluginSelection::new("None", [0.0; 3]))
    }

    fn load(session: &Session, descriptor: &ModuleDescriptor) -> Result<(Module, ModuleGraph), EngineError> {
        Module::load_with(session, descriptor, &config(), tone)
    }

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<(String, WidgetUpdate)>>,
        time: Mutex<Option<f64>>,
    }

    impl WidgetSink for Recorder {
        fn slider_value(&self, name: &str, value: WidgetUpdate) {
            self.values.lock().push((name.to_string(), value));
        }

        fn time(&self, seconds: f64) {
            *self.time.lock() = Some(seconds);
        }
    }

    #[test]
    fn default_module_plays_its_sound() {
        let (module, mut graph) = load(&session(), &ModuleDescriptor::default_module()).unwrap();
        assert!(module.sampler("snd").is_some());
        let mut out = AudioBuffer::new(2, 50);
        let mut peak = 0.0f32;
        for _ in 0..10 {
            graph.process(&mut out, 50);
            peak = peak.max(out.peak());
        }
        assert!(peak > 0.1);
        assert!((module.elapsed() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn pitch_reaches_an_octave() {
        let (module, mut graph) = load(&session(), &ModuleDescriptor::default_module()).unwrap();
        let sampler = module.sampler("snd").unwrap();
        assert!(sampler.set_pitch(12.0));
        assert!((sampler.target_ratio() - 2.0).abs() < 1e-3);
        let mut out = AudioBuffer::new(2, 50);
        graph.process(&mut out, 50);
        assert!((sampler.playback_ratio() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn range_without_max_line_fails() {
        let session = session().with_line(CurveLine::new("cutmin", vec![]));
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Range {
            name: "cut".into(),
            init: [0.0, 1.0],
        });
        let err = load(&session, &descriptor).err().unwrap();
        assert!(matches!(
            err,
            EngineError::Configuration(ConfigurationError::MissingLine(ref line)) if line == "cutmax"
        ));
    }

    #[test]
    fn unknown_modulation_signal_fails() {
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.samplers[0] = SamplerNode::new("snd").with_pitch("wobble");
        let err = load(&session(), &descriptor).err().unwrap();
        assert!(matches!(
            err,
            EngineError::Configuration(ConfigurationError::UnknownSignal(_))
        ));
    }

    #[test]
    fn amp_modulation_from_a_slider() {
        let session = session().with_line(CurveLine::new("level", vec![]));
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Slider {
            name: "level".into(),
            init: 0.0,
            gliss: 0.1,
        });
        descriptor.samplers[0] = SamplerNode::new("snd").with_amp("level");
        let (module, mut graph) = load(&session, &descriptor).unwrap();
        let mut out = AudioBuffer::new(2, 50);
        graph.process(&mut out, 50);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(module.slider("level").unwrap().gliss(), 0.1);
    }

    #[test]
    fn polyphony_widget_sets_voices_and_spread() {
        let session = session()
            .with_widget_value("polynum", WidgetValue::Number(2.0))
            .with_widget_value("polyspread", WidgetValue::Number(0.1));
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Poly { name: "poly".into() });
        let (module, graph) = load(&session, &descriptor).unwrap();
        assert_eq!(
            module.polyphony(),
            Some(Polyphony {
                voices: 3,
                spread: 0.1
            })
        );
        let detune = module.sampler("snd").unwrap().detune();
        assert_eq!(detune.len(), 3);
        assert!(detune.iter().all(|d| (0.9..=1.1).contains(d)));
        assert_eq!(graph.voice_count(), 1);
    }

    #[test]
    fn seeded_sessions_detune_identically() {
        let mut session = session().with_widget_value("vnum", WidgetValue::Number(1.0));
        session.seed = Some(11);
        session = session.with_widget_value("vspread", WidgetValue::Number(0.2));
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Poly { name: "v".into() });
        let (a, _) = load(&session, &descriptor).unwrap();
        let (b, _) = load(&session, &descriptor).unwrap();
        assert_eq!(a.sampler("snd").unwrap().detune(), b.sampler("snd").unwrap().detune());
    }

    #[test]
    fn popup_action_drives_loop_mode() {
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Popup {
            name: "sndloopmode".into(),
            init: 2.0,
            action: Some(WidgetAction::LoopMode {
                sampler: "snd".into(),
            }),
        });
        let (module, _) = load(&session(), &descriptor).unwrap();
        let sampler = module.sampler("snd").unwrap();
        assert_eq!(sampler.loop_mode(), 2);
        module
            .apply_widget_value("sndloopmode", WidgetValue::Choice { index: 3, label: "Back and forth".into() })
            .unwrap();
        assert_eq!(sampler.loop_mode(), 3);
        assert!(matches!(
            module.apply_widget_value("nope", WidgetValue::Number(1.0)),
            Err(ConfigurationError::MissingWidget(_))
        ));
    }

    #[test]
    fn action_on_missing_sampler_is_rejected() {
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Toggle {
            name: "shape".into(),
            init: 0.0,
            action: Some(WidgetAction::XfadeShape {
                sampler: "other".into(),
            }),
        });
        let err = load(&session(), &descriptor).err().unwrap();
        assert!(matches!(
            err,
            EngineError::Configuration(ConfigurationError::InvalidWidget { .. })
        ));
    }

    #[test]
    fn update_reports_played_sliders_only() {
        let session = session()
            .with_line(CurveLine::new("a", vec![(0.0, 0.75)]).with_play(PlayMode::Play))
            .with_line(CurveLine::new("b", vec![(0.0, 0.25)]).with_play(PlayMode::Continuous))
            .with_line(CurveLine::new("c", vec![]));
        let mut descriptor = ModuleDescriptor::default_module();
        for name in ["a", "b", "c"] {
            descriptor.widgets.push(WidgetDescriptor::Slider {
                name: name.into(),
                init: 0.0,
                gliss: 0.0,
            });
        }
        let (module, mut graph) = load(&session, &descriptor).unwrap();
        let mut out = AudioBuffer::new(2, 50);
        graph.process(&mut out, 50);

        let sink = Recorder::default();
        module.update(&sink);
        let values = sink.values.lock();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], ("a".to_string(), WidgetUpdate::Single(0.75)));
        assert_eq!(*sink.time.lock(), Some(0.05));
    }

    #[test]
    fn graph_curves_follow_session_edits() {
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Graph {
            name: "env".into(),
            table: true,
            size: 256,
            func: vec![(0.0, 1.0)],
        });
        let with_env = session().with_line(CurveLine::new("env", vec![]));
        let (module, _) = load(&with_env, &descriptor).unwrap();
        assert_eq!(module.table("env").unwrap().load().value_at(0.5), 1.0);

        let edited = session().with_line(CurveLine::new("env", vec![(0.0, 0.5)]));
        module.set_widget_values(&edited);
        assert_eq!(module.table("env").unwrap().load().value_at(0.5), 0.5);
    }

    #[test]
    fn graph_without_session_line_fails() {
        let mut descriptor = ModuleDescriptor::default_module();
        descriptor.widgets.push(WidgetDescriptor::Graph {
            name: "env".into(),
            table: true,
            size: 256,
            func: vec![(0.0, 1.0)],
        });
        let err = load(&session(), &descriptor).err().unwrap();
        assert!(matches!(
            err,
            EngineError::Configuration(ConfigurationError::MissingLine(ref line)) if line == "env"
        ));
    }

    #[test]
    fn rewind_restarts_the_clock() {
        let (module, mut graph) = load(&session(), &ModuleDescriptor::default_module()).unwrap();
        let mut out = AudioBuffer::new(2, 50);
        graph.process(&mut out, 50);
        graph.rewind();
        assert_eq!(module.clock.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn descriptor_parses_from_json() {
        let descriptor: ModuleDescriptor = serde_json::from_str(
            r#"{
                "name": "granular",
                "widgets": [
                    { "type": "slider", "name": "drive", "init": 0.5 },
                    { "type": "popup", "name": "mode", "init": 1,
                      "action": { "kind": "loop_mode", "sampler": "snd" } },
                    { "type": "poly", "name": "poly" }
                ],
                "samplers": [ { "name": "snd", "amp": "drive" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(descriptor.widgets.len(), 3);
        assert_eq!(descriptor.samplers[0].input_name(), "snd");
        assert_eq!(descriptor.samplers[0].amp.as_deref(), Some("drive"));
    }
}
