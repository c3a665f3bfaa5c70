//! Insert effects and the fixed catalog they are instantiated from.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF32;
use cadenza_dsp::reverb::{Freeverb, STEREO_SPREAD};
use cadenza_dsp::LinearGlide;
use serde::Serialize;

use crate::buffer::{AudioBuffer, BufferConfig};
use crate::error::ConfigurationError;

/// Smoothing time of effect parameters, in seconds.
pub const PARAM_RAMP: f32 = 0.025;

/// Metadata describing an effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectDescriptor {
    pub name: &'static str,
    pub params: [&'static str; 3],
    pub has_preset: bool,
}

/// Parameter targets shared between the rack and the running effect.
#[derive(Debug)]
pub struct EffectControls {
    params: [AtomicF32; 3],
    preset: AtomicF32,
}

impl EffectControls {
    pub fn new(params: [f32; 3], preset: f32) -> Self {
        Self {
            params: params.map(AtomicF32::new),
            preset: AtomicF32::new(preset),
        }
    }

    #[inline]
    pub fn param(&self, index: usize) -> f32 {
        self.params[index].load(Ordering::Relaxed)
    }

    pub fn set_param(&self, index: usize, value: f32) {
        self.params[index].store(value, Ordering::Relaxed);
    }

    pub fn params(&self) -> [f32; 3] {
        [self.param(0), self.param(1), self.param(2)]
    }

    #[inline]
    pub fn preset(&self) -> f32 {
        self.preset.load(Ordering::Relaxed)
    }

    pub fn set_preset(&self, value: f32) {
        self.preset.store(value, Ordering::Relaxed);
    }
}

/// An effect living in one slot of the chain. Processes in place.
pub trait InsertEffect: Send {
    fn descriptor(&self) -> EffectDescriptor;

    fn prepare(&mut self, config: &BufferConfig);

    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize);

    fn reset(&mut self) {}
}

/// Identity pass-through; its parameters never move.
#[derive(Debug, Default)]
pub struct NoneEffect;

impl InsertEffect for NoneEffect {
    fn descriptor(&self) -> EffectDescriptor {
        EffectKind::None.descriptor()
    }

    fn prepare(&mut self, _config: &BufferConfig) {}

    fn process(&mut self, _buffer: &mut AudioBuffer, _frames: usize) {}
}

/// Freeverb-style reverb: size `p2 / 10`, damping `p3`, balance `p1 × preset`.
pub struct ReverbEffect {
    controls: Arc<EffectControls>,
    tanks: Vec<Freeverb>,
    balance: LinearGlide,
    size: LinearGlide,
    damp: LinearGlide,
}

impl ReverbEffect {
    pub fn new(controls: Arc<EffectControls>, config: &BufferConfig) -> Self {
        let [balance, size, damp] = reverb_targets(&controls);
        let mut effect = Self {
            controls,
            tanks: Vec::new(),
            balance: LinearGlide::new(config.sample_rate, PARAM_RAMP, balance),
            size: LinearGlide::new(config.sample_rate, PARAM_RAMP, size),
            damp: LinearGlide::new(config.sample_rate, PARAM_RAMP, damp),
        };
        effect.prepare(config);
        effect
    }
}

/// `[balance, size, damp]` derived from the raw controls.
fn reverb_targets(controls: &EffectControls) -> [f32; 3] {
    let balance = (controls.param(0) * controls.preset()).clamp(0.0, 1.0);
    let size = (controls.param(1) / 10.0).clamp(0.0, 1.0);
    let damp = controls.param(2).clamp(0.0, 1.0);
    [balance, size, damp]
}

impl InsertEffect for ReverbEffect {
    fn descriptor(&self) -> EffectDescriptor {
        EffectKind::Reverb.descriptor()
    }

    fn prepare(&mut self, config: &BufferConfig) {
        self.tanks = (0..config.channels())
            .map(|channel| {
                let spread = if channel % 2 == 1 { STEREO_SPREAD } else { 0 };
                Freeverb::new(config.sample_rate, spread)
            })
            .collect();
        for glide in [&mut self.balance, &mut self.size, &mut self.damp] {
            glide.set_time(config.sample_rate, PARAM_RAMP);
        }
    }

    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        let [balance, size, damp] = reverb_targets(&self.controls);
        self.balance.set_target(balance);
        self.size.set_target(size);
        self.damp.set_target(damp);
        let size = self.size.advance(frames);
        let damp = self.damp.advance(frames);
        for tank in &mut self.tanks {
            tank.set_size(size);
            tank.set_damp(damp);
        }

        let channels = buffer.as_mut_slice();
        let frames = frames.min(channels.first().map(Vec::len).unwrap_or_default());
        for n in 0..frames {
            let balance = self.balance.next();
            for (channel, tank) in channels.iter_mut().zip(self.tanks.iter_mut()) {
                let dry = channel[n];
                let wet = tank.process(dry);
                channel[n] = dry * (1.0 - balance) + wet * balance;
            }
        }
    }

    fn reset(&mut self) {
        for tank in &mut self.tanks {
            tank.reset();
        }
    }
}

/// Effects that can be loaded into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EffectKind {
    #[default]
    None,
    Reverb,
}

impl EffectKind {
    pub const ALL: [EffectKind; 2] = [EffectKind::None, EffectKind::Reverb];

    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigurationError::UnknownEffect(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::None => "None",
            EffectKind::Reverb => "Reverb",
        }
    }

    pub fn descriptor(self) -> EffectDescriptor {
        match self {
            EffectKind::None => EffectDescriptor {
                name: "None",
                params: ["", "", ""],
                has_preset: false,
            },
            EffectKind::Reverb => EffectDescriptor {
                name: "Reverb",
                params: ["Mix", "Time", "Damp"],
                has_preset: true,
            },
        }
    }

    pub fn has_preset(self) -> bool {
        self.descriptor().has_preset
    }

    pub fn instantiate(
        self,
        controls: Arc<EffectControls>,
        config: &BufferConfig,
    ) -> Box<dyn InsertEffect> {
        match self {
            EffectKind::None => Box::new(NoneEffect),
            EffectKind::Reverb => Box::new(ReverbEffect::new(controls, config)),
        }
    }

    /// Values the effect derives from its controls, as the rack displays them.
    pub fn derived(self, controls: &EffectControls) -> Vec<(&'static str, f32)> {
        match self {
            EffectKind::None => Vec::new(),
            EffectKind::Reverb => {
                let [balance, size, damp] = reverb_targets(controls);
                vec![("balance", balance), ("size", size), ("damp", damp)]
            }
        }
    }
}
