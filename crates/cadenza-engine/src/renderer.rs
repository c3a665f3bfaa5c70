use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;
use cadenza_dsp::utils::sanitize;
use cadenza_dsp::OnePole;
use crossbeam_queue::ArrayQueue;
use ringbuf::HeapProducer;

use crate::buffer::{AudioBuffer, BufferConfig};
use crate::chain::ChainProcessor;
use crate::module::ModuleGraph;
use crate::plugin::InsertEffect;

const COMMAND_QUEUE_CAPACITY: usize = 64;
const RETIRED_QUEUE_CAPACITY: usize = 64;
const AMP_SMOOTHING_MS: f32 = 20.0;

/// Everything the render thread runs for one loaded module.
pub struct RenderGraph {
    pub module: ModuleGraph,
    pub chain: ChainProcessor,
}

/// Changes applied by the render thread at the next block boundary.
pub enum RenderCommand {
    SwapGraph(Box<RenderGraph>),
    InstallEffect {
        slot: usize,
        effect: Box<dyn InsertEffect>,
    },
    Rewind,
    /// Starts (`Some`) or stops (`None`) capturing the output.
    Record(Option<HeapProducer<f32>>),
}

impl RenderCommand {
    pub fn label(&self) -> &'static str {
        match self {
            RenderCommand::SwapGraph(_) => "swap_graph",
            RenderCommand::InstallEffect { .. } => "install_effect",
            RenderCommand::Rewind => "rewind",
            RenderCommand::Record(Some(_)) => "record_start",
            RenderCommand::Record(None) => "record_stop",
        }
    }
}

/// Objects replaced on the render thread, returned so they are dropped
/// elsewhere.
pub enum Retired {
    Graph(Box<RenderGraph>),
    Effect(Box<dyn InsertEffect>),
    Recorder(HeapProducer<f32>),
}

/// What happened in one rendered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    pub frames: usize,
    /// Incremented on every graph swap.
    pub generation: u64,
    /// No graph was installed, the block is silence.
    pub silent: bool,
}

/// Observer called from the render thread after every block. Must not block
/// or allocate.
pub trait BlockProbe: Send + Sync {
    fn on_block(&self, report: &BlockReport);
}

/// Both directions of render-thread traffic.
#[derive(Clone)]
pub struct CommandQueue {
    commands: Arc<ArrayQueue<RenderCommand>>,
    retired: Arc<ArrayQueue<Retired>>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            commands: Arc::new(ArrayQueue::new(COMMAND_QUEUE_CAPACITY)),
            retired: Arc::new(ArrayQueue::new(RETIRED_QUEUE_CAPACITY)),
        }
    }

    /// Pushes without blocking; a full queue hands the command back.
    pub fn try_send(&self, command: RenderCommand) -> Result<(), RenderCommand> {
        self.commands.push(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drops everything the render thread handed back. Control thread only.
    pub fn collect_retired(&self) -> usize {
        let mut count = 0;
        while let Some(retired) = self.retired.pop() {
            drop(retired);
            count += 1;
        }
        count
    }
}

/// Renders blocks of the installed graph through the effect chain and the
/// master gain.
pub struct Renderer {
    config: BufferConfig,
    queue: CommandQueue,
    graph: Option<Box<RenderGraph>>,
    buffer: AudioBuffer,
    interleaved: Vec<f32>,
    amp: Arc<AtomicF32>,
    smoother: OnePole,
    recorder: Option<HeapProducer<f32>>,
    probe: Option<Arc<dyn BlockProbe>>,
    generation: u64,
}

impl Renderer {
    pub fn new(config: BufferConfig, queue: CommandQueue, amp: Arc<AtomicF32>) -> Self {
        let mut smoother = OnePole::new(config.sample_rate, AMP_SMOOTHING_MS);
        smoother.reset(amp.load(Ordering::Relaxed));
        Self {
            buffer: AudioBuffer::from_config(&config),
            interleaved: vec![0.0; config.block_size * config.channels()],
            config,
            queue,
            graph: None,
            amp,
            smoother,
            recorder: None,
            probe: None,
            generation: 0,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn BlockProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    fn retire(&self, retired: Retired) {
        // A full queue means the control thread stopped collecting; dropping
        // here is the only option left.
        if let Err(retired) = self.queue.retired.push(retired) {
            drop(retired);
        }
    }

    pub fn apply(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::SwapGraph(graph) => {
                if let Some(old) = self.graph.replace(graph) {
                    self.retire(Retired::Graph(old));
                }
                self.generation += 1;
            }
            RenderCommand::InstallEffect { slot, effect } => match self.graph.as_mut() {
                Some(graph) => {
                    if let Some(old) = graph.chain.install(slot, effect) {
                        self.retire(Retired::Effect(old));
                    }
                }
                None => self.retire(Retired::Effect(effect)),
            },
            RenderCommand::Rewind => self.rewind(),
            RenderCommand::Record(producer) => {
                if let Some(old) = std::mem::replace(&mut self.recorder, producer) {
                    self.retire(Retired::Recorder(old));
                }
            }
        }
    }

    pub fn drain_commands(&mut self) {
        while let Some(command) = self.queue.commands.pop() {
            self.apply(command);
        }
    }

    /// Puts the installed graph back at the top of the timeline.
    pub fn rewind(&mut self) {
        if let Some(graph) = self.graph.as_mut() {
            graph.module.rewind();
            graph.chain.reset();
        }
    }

    /// Renders one block of `block_size` frames.
    pub fn process_block(&mut self) -> &AudioBuffer {
        let frames = self.config.block_size;
        self.drain_commands();

        let silent = match self.graph.as_mut() {
            Some(graph) => {
                graph.module.process(&mut self.buffer, frames);
                graph.chain.process(&mut self.buffer, frames);
                false
            }
            None => {
                self.buffer.clear();
                true
            }
        };

        let target = self.amp.load(Ordering::Relaxed);
        let channels = self.buffer.as_mut_slice();
        for n in 0..frames {
            let gain = self.smoother.next(target);
            for channel in channels.iter_mut() {
                channel[n] *= gain;
            }
        }
        for channel in channels.iter_mut() {
            sanitize(&mut channel[..frames]);
        }

        if let Some(producer) = self.recorder.as_mut() {
            let samples = self.buffer.interleave_into(frames, &mut self.interleaved);
            producer.push_slice(&self.interleaved[..samples]);
        }

        if let Some(probe) = self.probe.as_ref() {
            probe.on_block(&BlockReport {
                frames,
                generation: self.generation,
                silent,
            });
        }
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ChannelLayout;
    use crate::module::{Module, ModuleDescriptor};
    use crate::sampler::SoundData;
    use crate::session::{SamplerInfo, Session};

    fn config() -> BufferConfig {
        BufferConfig::new(1_000.0, 32, ChannelLayout::Stereo)
    }

    fn graph() -> Box<RenderGraph> {
        let session = Session::new(4.0)
            .with_input("snd", "snd.wav")
            .with_sampler("snd", SamplerInfo::live(1.0))
            .with_sampler_lines("snd");
        let (_, module) = Module::load_with(
            &session,
            &ModuleDescriptor::default_module(),
            &config(),
            |_, _| Ok(SoundData::from_channels(1_000.0, vec![vec![0.5; 1_000]])),
        )
        .unwrap();
        Box::new(RenderGraph {
            module,
            chain: ChainProcessor::empty(),
        })
    }

    #[test]
    fn empty_renderer_outputs_silence() {
        let amp = Arc::new(AtomicF32::new(1.0));
        let mut renderer = Renderer::new(config(), CommandQueue::new(), amp);
        assert_eq!(renderer.process_block().peak(), 0.0);
    }

    #[test]
    fn swapped_graphs_come_back_on_the_retired_queue() {
        let queue = CommandQueue::new();
        let amp = Arc::new(AtomicF32::new(1.0));
        let mut renderer = Renderer::new(config(), queue.clone(), amp);
        assert!(queue.try_send(RenderCommand::SwapGraph(graph())).is_ok());
        assert!(queue.try_send(RenderCommand::SwapGraph(graph())).is_ok());
        renderer.process_block();
        assert_eq!(renderer.generation(), 2);
        assert_eq!(queue.collect_retired(), 1);
        assert!(renderer.process_block().peak() > 0.0);
    }

    #[test]
    fn full_queue_hands_the_command_back() {
        let queue = CommandQueue::new();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            assert!(queue.try_send(RenderCommand::Rewind).is_ok());
        }
        let rejected = queue.try_send(RenderCommand::Record(None)).err().unwrap();
        assert_eq!(rejected.label(), "record_stop");
    }

    #[test]
    fn master_gain_is_smoothed() {
        let queue = CommandQueue::new();
        let amp = Arc::new(AtomicF32::new(1.0));
        let mut renderer = Renderer::new(config(), queue, Arc::clone(&amp));
        renderer.apply(RenderCommand::SwapGraph(graph()));
        let loud = renderer.process_block().peak();
        amp.store(0.0, Ordering::Relaxed);
        let fading = renderer.process_block().peak();
        assert!(fading > 0.0 && fading < loud + 1e-6);
        for _ in 0..20 {
            renderer.process_block();
        }
        assert!(renderer.process_block().peak() < 1e-3);
    }
}
