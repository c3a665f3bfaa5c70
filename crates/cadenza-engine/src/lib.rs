//! Cadenza Engine
//! ==============
//! Real-time engine for parameter-driven sound modules: automation curves,
//! looping samplers, an insert-effect chain, and the device, file, and null
//! outputs that drive them. Control calls happen on one thread; audio is
//! rendered on a dedicated thread that never blocks on the control side.

pub mod automation;
pub mod buffer;
pub mod chain;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod module;
pub mod plugin;
pub mod render;
pub mod renderer;
pub mod sampler;
pub mod session;

#[cfg(feature = "native")]
pub mod devices;
#[cfg(feature = "native")]
pub mod realtime;

pub use automation::{CurveTable, SharedTable};
pub use buffer::{AudioBuffer, BufferConfig, ChannelLayout};
pub use chain::{EffectSnapshot, PluginChain, PreparedEffect, EFFECT_PARAMS, EFFECT_SLOTS};
pub use config::{AudioConfig, BitDepth, FileFormat, OutputTarget};
pub use engine::AudioEngine;
pub use error::{ConfigurationError, EngineError, EngineResult, EngineState, FileError};
pub use media::{sound_info, sounds_from_list, SoundInfo};
pub use module::{
    Module, ModuleDescriptor, SamplerNode, SignalHandle, WidgetDescriptor, WidgetSink,
    WidgetUpdate,
};
pub use plugin::EffectKind;
pub use renderer::{BlockProbe, BlockReport};
pub use sampler::{LoopMode, Polyphony, Sampler};
pub use session::{
    CurveLine, PlayMode, PluginSelection, SamplerInfo, Session, SoundInput, WidgetValue,
};

#[cfg(feature = "native")]
pub use devices::{available_audio_midi_drivers, DeviceList};
