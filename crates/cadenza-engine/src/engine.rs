use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use atomic_float::AtomicF32;
use cadenza_dsp::db_to_linear;
use cadenza_dsp::utils::flush_denormals;
use crossbeam_channel::{after, bounded, select, tick, Receiver, Sender};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use ringbuf::{HeapConsumer, HeapRb};

use crate::chain::{EffectSnapshot, PluginChain};
use crate::config::{AudioConfig, OutputTarget};
use crate::error::{EngineError, EngineResult, EngineState, FileError};
use crate::module::{Module, ModuleDescriptor, WidgetSink};
use crate::render::FileSink;
use crate::renderer::{BlockProbe, CommandQueue, RenderCommand, RenderGraph, Renderer};
use crate::session::{PluginSelection, Session};

/// Period of the UI updater, about 60 Hz.
pub const UPDATE_INTERVAL: Duration = Duration::from_micros(16_667);
const RECORD_BUFFER_SECONDS: usize = 2;
const RECORD_DRAIN_INTERVAL: Duration = Duration::from_millis(10);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

type StopCallback = Arc<dyn Fn() + Send + Sync>;

fn spawn<T, F>(name: &str, body: F) -> EngineResult<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(body)
        .map_err(|err| EngineError::device(format!("failed to spawn {name}: {err}")))
}

/// Helper thread stopped by dropping its cancel sender.
struct Background {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl Background {
    fn start<F>(name: &str, body: F) -> EngineResult<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (cancel, cancelled) = bounded(0);
        let handle = spawn(name, move || body(cancelled))?;
        Ok(Self { cancel, handle })
    }

    fn stop(self) {
        drop(self.cancel);
        if self.handle.join().is_err() {
            tracing::error!("background thread panicked");
        }
    }
}

enum Driver {
    #[cfg(feature = "native")]
    Device(crate::realtime::DeviceStream),
    Worker {
        running: Arc<AtomicBool>,
        handle: JoinHandle<Result<(), FileError>>,
    },
}

impl Driver {
    fn stop(self) -> EngineResult<()> {
        match self {
            #[cfg(feature = "native")]
            Driver::Device(stream) => stream.stop(),
            Driver::Worker { running, handle } => {
                running.store(false, Ordering::Relaxed);
                handle
                    .join()
                    .map_err(|_| EngineError::device("render worker panicked"))?
                    .map_err(EngineError::from)
            }
        }
    }
}

/// Captures the engine output into a float WAV file.
struct OutputRecorder {
    path: PathBuf,
    cancel: Sender<()>,
    handle: JoinHandle<Result<(), FileError>>,
}

impl OutputRecorder {
    fn start(path: &Path, sample_rate: f32, channels: usize) -> EngineResult<(Self, ringbuf::HeapProducer<f32>)> {
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate: sample_rate.round() as u32,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec).map_err(|source| FileError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        let capacity = (sample_rate as usize).max(1) * channels.max(1) * RECORD_BUFFER_SECONDS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let (cancel, cancelled) = bounded::<()>(0);
        let owned = path.to_path_buf();
        let handle = spawn("cadenza-recorder", move || {
            write_recording(owned, writer, consumer, cancelled)
        })?;
        tracing::info!(path = %path.display(), "output recording started");
        Ok((
            Self {
                path: path.to_path_buf(),
                cancel,
                handle,
            },
            producer,
        ))
    }

    fn finish(self) -> EngineResult<()> {
        drop(self.cancel);
        self.handle
            .join()
            .map_err(|_| EngineError::device("recorder thread panicked"))??;
        tracing::info!(path = %self.path.display(), "output recording finished");
        Ok(())
    }
}

fn write_recording(
    path: PathBuf,
    mut writer: WavWriter<BufWriter<File>>,
    mut consumer: HeapConsumer<f32>,
    cancelled: Receiver<()>,
) -> Result<(), FileError> {
    let ticker = tick(RECORD_DRAIN_INTERVAL);
    let encode = |source| FileError::Encode {
        path: path.clone(),
        source,
    };
    loop {
        let done = select! {
            recv(ticker) -> _ => false,
            recv(cancelled) -> _ => true,
        };
        while let Some(sample) = consumer.pop() {
            writer.write_sample(sample).map_err(encode)?;
        }
        if done {
            break;
        }
    }
    writer.finalize().map_err(encode)
}

/// Owns the device, the loaded module, and the render thread.
///
/// Control methods are called from one thread. Audio work happens on the
/// driver thread the engine starts, which only sees the [`Renderer`].
pub struct AudioEngine {
    config: AudioConfig,
    state: EngineState,
    queue: CommandQueue,
    renderer: Option<Arc<Mutex<Renderer>>>,
    driver: Option<Driver>,
    module: Arc<ArcSwapOption<Module>>,
    chain: Option<PluginChain>,
    loaded: Option<(Session, ModuleDescriptor)>,
    amp: Arc<AtomicF32>,
    amp_db: f32,
    probe: Option<Arc<dyn BlockProbe>>,
    sink: Option<Arc<dyn WidgetSink>>,
    stop_callback: Option<StopCallback>,
    finished: Arc<AtomicBool>,
    timed: bool,
    watcher: Option<Background>,
    updater: Option<Background>,
    recorder: Option<OutputRecorder>,
}

impl AudioEngine {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            state: EngineState::Uninitialized,
            queue: CommandQueue::new(),
            renderer: None,
            driver: None,
            module: Arc::new(ArcSwapOption::empty()),
            chain: None,
            loaded: None,
            amp: Arc::new(AtomicF32::new(1.0)),
            amp_db: 0.0,
            probe: None,
            sink: None,
            stop_callback: None,
            finished: Arc::new(AtomicBool::new(false)),
            timed: false,
            watcher: None,
            updater: None,
            recorder: None,
        }
    }

    /// Installs a probe called after every rendered block. Takes effect at
    /// the next boot.
    pub fn with_probe(mut self, probe: Arc<dyn BlockProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Receives replayed values and the timeline position while running.
    pub fn set_widget_sink(&mut self, sink: Arc<dyn WidgetSink>) {
        self.sink = Some(sink);
    }

    /// Called from a helper thread when a timed performance reaches its end.
    pub fn set_stop_callback<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stop_callback = Some(Arc::new(callback));
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn module(&self) -> Option<Arc<Module>> {
        self.module.load_full()
    }

    pub fn effects(&self) -> Option<&PluginChain> {
        self.chain.as_ref()
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::State {
            state: self.state,
            action,
        }
    }

    /// Validates the configuration and prepares the renderer. For the device
    /// target the output device is opened and its stream config negotiated.
    /// On failure the engine is left uninitialized.
    pub fn boot(&mut self) -> EngineResult<()> {
        if matches!(self.state, EngineState::Running | EngineState::Shutdown) {
            return Err(self.invalid("boot"));
        }
        if let Err(err) = self.check_config() {
            tracing::warn!(%err, "boot failed");
            self.state = EngineState::Uninitialized;
            self.renderer = None;
            return Err(err);
        }

        let buffer_config = self.config.buffer_config();
        let reuse = self
            .renderer
            .as_ref()
            .is_some_and(|renderer| renderer.lock().config() == &buffer_config);
        self.state = EngineState::Booted;
        tracing::info!(
            sample_rate = buffer_config.sample_rate,
            block = buffer_config.block_size,
            channels = buffer_config.channels(),
            target = ?self.config.target,
            "engine booted"
        );
        if reuse {
            return Ok(());
        }

        let mut renderer = Renderer::new(buffer_config, self.queue.clone(), Arc::clone(&self.amp));
        if let Some(probe) = self.probe.as_ref() {
            renderer = renderer.with_probe(Arc::clone(probe));
        }
        self.renderer = Some(Arc::new(Mutex::new(renderer)));
        if let Some((session, descriptor)) = self.loaded.take() {
            self.load_module(&session, &descriptor)?;
        }
        Ok(())
    }

    fn check_config(&self) -> EngineResult<()> {
        self.config.validate().map_err(EngineError::Device)?;
        if self.config.target.is_device() {
            Self::check_device(&self.config)?;
        }
        Ok(())
    }

    #[cfg(feature = "native")]
    fn check_device(config: &AudioConfig) -> EngineResult<()> {
        crate::realtime::check_output(config)
    }

    #[cfg(not(feature = "native"))]
    fn check_device(_config: &AudioConfig) -> EngineResult<()> {
        Err(EngineError::device("built without audio device support"))
    }

    /// Applies a configuration change, rebooting (and restarting) as needed.
    fn reconfigure(&mut self, change: impl FnOnce(&mut AudioConfig)) -> EngineResult<()> {
        if self.state == EngineState::Shutdown {
            return Err(self.invalid("reconfigure"));
        }
        let was_running = self.state == EngineState::Running;
        if was_running {
            self.stop()?;
        }
        change(&mut self.config);
        if self.state != EngineState::Uninitialized {
            self.boot()?;
            if was_running {
                self.start(self.timed)?;
            }
        }
        Ok(())
    }

    /// Switches between device, file, and null output. The loaded module is
    /// kept.
    pub fn reinit(&mut self, target: OutputTarget) -> EngineResult<()> {
        let was_running = self.state == EngineState::Running;
        if self.state == EngineState::Shutdown {
            return Err(self.invalid("reinit"));
        }
        if was_running {
            self.stop()?;
        }
        self.config.target = target;
        if self.state != EngineState::Uninitialized {
            self.boot()?;
        }
        Ok(())
    }

    pub fn set_sampling_rate(&mut self, sample_rate: f32) -> EngineResult<()> {
        self.reconfigure(|config| config.sample_rate = sample_rate)
    }

    pub fn set_output_device(&mut self, device: Option<String>) -> EngineResult<()> {
        self.reconfigure(|config| config.output_device = device)
    }

    pub fn set_midi_input_device(&mut self, device: Option<String>) -> EngineResult<()> {
        self.reconfigure(|config| config.midi_input = device)
    }

    fn renderer(&self, action: &'static str) -> EngineResult<Arc<Mutex<Renderer>>> {
        match (&self.renderer, self.state) {
            (_, EngineState::Uninitialized | EngineState::Shutdown) | (None, _) => {
                Err(self.invalid(action))
            }
            (Some(renderer), _) => Ok(Arc::clone(renderer)),
        }
    }

    /// Hands a command to the render thread, or applies it directly when no
    /// driver is running.
    fn deliver(&self, command: RenderCommand) -> EngineResult<()> {
        if self.state == EngineState::Running {
            self.queue.try_send(command).map_err(|command| {
                tracing::warn!(command = command.label(), "render command queue is full");
                EngineError::RuntimeParameter("render command queue is full".into())
            })
        } else {
            self.renderer("deliver a render command")?.lock().apply(command);
            self.queue.collect_retired();
            Ok(())
        }
    }

    /// Builds `descriptor` against `session` and swaps it in at the next
    /// block boundary. Nothing changes when the build fails.
    pub fn load_module(
        &mut self,
        session: &Session,
        descriptor: &ModuleDescriptor,
    ) -> EngineResult<()> {
        let renderer = self.renderer("load a module")?;
        let buffer_config = renderer.lock().config().clone();
        let (module, graph) = Module::load(session, descriptor, &buffer_config)?;
        let (chain, processor) = PluginChain::build(&session.plugins, &buffer_config)?;
        let module = Arc::new(module);
        if self.state == EngineState::Running {
            module.begin_automation();
        }
        self.deliver(RenderCommand::SwapGraph(Box::new(RenderGraph {
            module: graph,
            chain: processor,
        })))?;

        if let Some(old) = self.module.swap(Some(module)) {
            old.flush_automation();
        }
        self.chain = Some(chain);
        self.loaded = Some((session.clone(), descriptor.clone()));
        self.queue.collect_retired();
        Ok(())
    }

    fn chain(&self) -> EngineResult<&PluginChain> {
        self.chain
            .as_ref()
            .ok_or_else(|| self.invalid("use effects without a module"))
    }

    /// Replaces the effect in `slot`; the other slots keep their state.
    pub fn load_effect(&mut self, slot: usize, selection: &PluginSelection) -> EngineResult<()> {
        let chain = self.chain.as_ref().ok_or(EngineError::State {
            state: self.state,
            action: "load an effect without a module",
        })?;
        let (effect, prepared) = chain.prepare_effect(slot, selection)?;
        self.deliver(RenderCommand::InstallEffect { slot, effect })?;
        if let Some(chain) = self.chain.as_mut() {
            chain.commit(prepared);
        }
        if let Some((session, _)) = self.loaded.as_mut() {
            if session.plugins.len() <= slot {
                session.plugins.resize(slot + 1, None);
            }
            session.plugins[slot] = Some(selection.clone());
        }
        Ok(())
    }

    pub fn set_effect_value(&self, slot: usize, param: usize, value: f32) -> EngineResult<()> {
        self.chain()?.set_value(slot, param, value)
    }

    pub fn set_effect_preset(&mut self, slot: usize, value: f32, label: &str) -> EngineResult<()> {
        let state = self.state;
        self.chain
            .as_mut()
            .ok_or(EngineError::State {
                state,
                action: "use effects without a module",
            })?
            .set_preset(slot, value, label)
    }

    pub fn effect_snapshot(&self, slot: usize) -> EngineResult<EffectSnapshot> {
        self.chain()?.snapshot(slot)
    }

    /// Master amplitude in decibels, smoothed on the render thread.
    pub fn set_amp(&mut self, db: f32) {
        self.amp_db = db;
        self.amp.store(db_to_linear(db), Ordering::Relaxed);
    }

    pub fn amp(&self) -> f32 {
        self.amp_db
    }

    /// Timeline position of the loaded module in seconds.
    pub fn elapsed(&self) -> f64 {
        self.module
            .load_full()
            .map(|module| module.elapsed())
            .unwrap_or(0.0)
    }

    fn timeline(&self) -> Option<f64> {
        self.module.load_full().map(|module| module.duration())
    }

    /// Starts a performance from the top of the timeline.
    ///
    /// With `timed`, the engine flags itself finished after one timeline pass
    /// and calls the stop callback; [`AudioEngine::poll`] then stops it. The
    /// file target always renders exactly one pass.
    pub fn start(&mut self, timed: bool) -> EngineResult<()> {
        if !matches!(self.state, EngineState::Booted | EngineState::Stopped) {
            return Err(self.invalid("start"));
        }
        let renderer = self.renderer("start")?;
        {
            let mut renderer = renderer.lock();
            renderer.drain_commands();
            renderer.rewind();
        }
        self.queue.collect_retired();
        self.finished.store(false, Ordering::Relaxed);
        if let Some(module) = self.module.load_full() {
            module.begin_automation();
        }

        let driver = match self.config.target.clone() {
            OutputTarget::Device => self.start_device(renderer)?,
            OutputTarget::File {
                path,
                format,
                bit_depth,
            } => {
                let duration = self
                    .timeline()
                    .ok_or_else(|| self.invalid("render a file without a module"))?;
                let buffer_config = self.config.buffer_config();
                let sink = FileSink::create(
                    &path,
                    format,
                    bit_depth,
                    buffer_config.sample_rate,
                    buffer_config.channels(),
                )?;
                tracing::info!(path = %path.display(), duration, "offline render started");
                self.spawn_file_render(renderer, sink, duration)?
            }
            OutputTarget::Null => self.spawn_null(renderer)?,
        };
        self.driver = Some(driver);

        if timed && !matches!(self.config.target, OutputTarget::File { .. }) {
            if let Some(duration) = self.timeline() {
                self.watcher = Some(self.spawn_watcher(duration)?);
            }
        }
        self.updater = Some(self.spawn_updater()?);
        self.timed = timed;
        self.state = EngineState::Running;
        tracing::info!(timed, "engine started");
        Ok(())
    }

    #[cfg(feature = "native")]
    fn start_device(&self, renderer: Arc<Mutex<Renderer>>) -> EngineResult<Driver> {
        crate::realtime::start_device(renderer, &self.config).map(Driver::Device)
    }

    #[cfg(not(feature = "native"))]
    fn start_device(&self, _renderer: Arc<Mutex<Renderer>>) -> EngineResult<Driver> {
        Err(EngineError::device("built without audio device support"))
    }

    fn spawn_file_render(
        &self,
        renderer: Arc<Mutex<Renderer>>,
        mut sink: FileSink,
        duration: f64,
    ) -> EngineResult<Driver> {
        let running = Arc::new(AtomicBool::new(true));
        let finished = Arc::clone(&self.finished);
        let callback = self.stop_callback.clone();
        let flag = Arc::clone(&running);
        let handle = spawn("cadenza-file-render", move || {
            flush_denormals();
            let total = {
                let renderer = renderer.lock();
                (duration * renderer.config().sample_rate as f64).round() as usize
            };
            let mut result = Ok(());
            let mut done = 0;
            while done < total && flag.load(Ordering::Relaxed) {
                let mut renderer = renderer.lock();
                let block = renderer.config().block_size;
                let buffer = renderer.process_block();
                let frames = block.min(total - done);
                if let Err(err) = sink.write_block(buffer, frames) {
                    result = Err(err);
                    break;
                }
                done += frames;
            }
            let path = sink.path().to_path_buf();
            let result = result.and_then(|_| sink.finalize());
            tracing::info!(path = %path.display(), frames = done, ok = result.is_ok(), "offline render finished");
            finished.store(true, Ordering::Relaxed);
            if let Some(callback) = callback {
                callback();
            }
            result
        })?;
        Ok(Driver::Worker { running, handle })
    }

    fn spawn_null(&self, renderer: Arc<Mutex<Renderer>>) -> EngineResult<Driver> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let period = Duration::from_secs_f64(self.config.buffer_config().block_duration_secs());
        let handle = spawn("cadenza-null-render", move || {
            flush_denormals();
            let ticker = tick(period);
            while flag.load(Ordering::Relaxed) {
                if ticker.recv().is_err() {
                    break;
                }
                renderer.lock().process_block();
            }
            Ok(())
        })?;
        Ok(Driver::Worker { running, handle })
    }

    fn spawn_watcher(&self, duration: f64) -> EngineResult<Background> {
        let finished = Arc::clone(&self.finished);
        let callback = self.stop_callback.clone();
        let timeout = after(Duration::from_secs_f64(duration));
        Background::start("cadenza-timer", move |cancelled| {
            select! {
                recv(timeout) -> _ => {
                    finished.store(true, Ordering::Relaxed);
                    if let Some(callback) = callback {
                        callback();
                    }
                }
                recv(cancelled) -> _ => {}
            }
        })
    }

    fn spawn_updater(&self) -> EngineResult<Background> {
        let module = Arc::clone(&self.module);
        let sink = self.sink.clone();
        Background::start("cadenza-updater", move |cancelled| {
            let ticker = tick(UPDATE_INTERVAL);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        if let Some(module) = module.load_full() {
                            if let Some(sink) = sink.as_ref() {
                                module.update(sink.as_ref());
                            }
                            module.drain_automation();
                        }
                    }
                    recv(cancelled) -> _ => break,
                }
            }
        })
    }

    /// True once a timed performance or an offline render reached its end.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Control-thread housekeeping: drops retired graphs and stops a
    /// finished performance. Returns `true` when this call stopped it.
    pub fn poll(&mut self) -> EngineResult<bool> {
        self.queue.collect_retired();
        if self.state == EngineState::Running && self.is_finished() {
            self.stop()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Blocks until a timed performance or offline render has stopped.
    pub fn wait_until_stopped(&mut self) -> EngineResult<()> {
        while self.state == EngineState::Running {
            if self.poll()? {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    /// Stops the driver and writes out every automation track.
    pub fn stop(&mut self) -> EngineResult<()> {
        if self.state != EngineState::Running {
            return Err(self.invalid("stop"));
        }
        let result = self.halt();
        self.state = EngineState::Stopped;
        tracing::info!("engine stopped");
        result
    }

    fn halt(&mut self) -> EngineResult<()> {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        let driver = match self.driver.take() {
            Some(driver) => driver.stop(),
            None => Ok(()),
        };
        if let Some(updater) = self.updater.take() {
            updater.stop();
        }
        // No block runs past this point, so the recorder sees every rendered frame.
        if let Some(renderer) = self.renderer.as_ref() {
            let mut renderer = renderer.lock();
            renderer.drain_commands();
            if self.recorder.is_some() {
                renderer.apply(RenderCommand::Record(None));
            }
        }
        self.queue.collect_retired();
        let recording = match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        };
        if let Some(module) = self.module.load_full() {
            module.flush_automation();
        }
        driver.and(recording)
    }

    /// Starts capturing the output to a 32-bit float WAV file.
    pub fn rec_start(&mut self, path: impl AsRef<Path>) -> EngineResult<()> {
        if self.state != EngineState::Running {
            return Err(self.invalid("record"));
        }
        if self.recorder.is_some() {
            self.rec_stop()?;
        }
        let buffer_config = self.config.buffer_config();
        let (recorder, producer) =
            OutputRecorder::start(path.as_ref(), buffer_config.sample_rate, buffer_config.channels())?;
        if let Err(command) = self.queue.try_send(RenderCommand::Record(Some(producer))) {
            tracing::warn!("render command queue is full, recording not started");
            drop(command);
            recorder.finish()?;
            return Err(EngineError::RuntimeParameter("render command queue is full".into()));
        }
        self.recorder = Some(recorder);
        Ok(())
    }

    pub fn rec_stop(&mut self) -> EngineResult<()> {
        if self.recorder.is_none() {
            return Ok(());
        }
        // Keep the recorder on failure so a later stop can still detach it.
        self.deliver(RenderCommand::Record(None))?;
        match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Stops if needed and releases the module, renderer, and device.
    /// Terminal.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        if self.state == EngineState::Shutdown {
            return Ok(());
        }
        let result = if self.state == EngineState::Running {
            self.halt()
        } else {
            Ok(())
        };
        self.module.store(None);
        self.chain = None;
        self.renderer = None;
        self.queue.collect_retired();
        self.state = EngineState::Shutdown;
        tracing::info!("engine shut down");
        result
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(%err, "engine shutdown failed");
        }
    }
}
