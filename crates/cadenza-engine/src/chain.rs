//! Three ordered insert slots between the module output and the master gain.

use std::sync::Arc;

use serde::Serialize;

use crate::buffer::{AudioBuffer, BufferConfig};
use crate::error::{EngineError, EngineResult};
use crate::plugin::{EffectControls, EffectKind, InsertEffect, NoneEffect};
use crate::session::PluginSelection;

pub const EFFECT_SLOTS: usize = 3;
pub const EFFECT_PARAMS: usize = 3;

/// What the rack shows for one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectSnapshot {
    pub name: &'static str,
    pub params: [f32; 3],
    pub preset: f32,
    pub preset_label: String,
    pub knobs: [(u8, bool); 3],
    pub derived: Vec<(&'static str, f32)>,
}

#[derive(Debug)]
struct Slot {
    kind: EffectKind,
    controls: Arc<EffectControls>,
    preset_label: String,
    knobs: [(u8, bool); 3],
}

/// Control-side state of an effect that has not been committed to the rack.
pub struct PreparedEffect {
    slot: usize,
    state: Slot,
}

impl PreparedEffect {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            kind: EffectKind::None,
            controls: Arc::new(EffectControls::new([0.0; 3], 1.0)),
            preset_label: String::new(),
            knobs: [(0, false); 3],
        }
    }
}

/// Control-thread view of the effect slots.
#[derive(Debug)]
pub struct PluginChain {
    slots: [Slot; EFFECT_SLOTS],
    config: BufferConfig,
}

fn check_slot(slot: usize) -> EngineResult<()> {
    if slot >= EFFECT_SLOTS {
        return Err(EngineError::RuntimeParameter(format!(
            "effect slot {slot} out of range (0..{EFFECT_SLOTS})"
        )));
    }
    Ok(())
}

impl PluginChain {
    /// Builds the chain described by `selections` and the processor running it.
    pub fn build(
        selections: &[Option<PluginSelection>],
        config: &BufferConfig,
    ) -> EngineResult<(Self, ChainProcessor)> {
        let mut chain = Self {
            slots: Default::default(),
            config: config.clone(),
        };
        let mut processor = ChainProcessor::empty();
        for (slot, selection) in selections.iter().enumerate().take(EFFECT_SLOTS) {
            if let Some(selection) = selection {
                let (effect, prepared) = chain.prepare_effect(slot, selection)?;
                processor.slots[slot] = effect;
                chain.commit(prepared);
            }
        }
        Ok((chain, processor))
    }

    /// Instantiates the effect for `slot` without touching the rack.
    /// The caller installs the effect on the audio side and then hands the
    /// [`PreparedEffect`] to [`PluginChain::commit`].
    pub fn prepare_effect(
        &self,
        slot: usize,
        selection: &PluginSelection,
    ) -> EngineResult<(Box<dyn InsertEffect>, PreparedEffect)> {
        check_slot(slot)?;
        let kind = EffectKind::from_name(&selection.name)?;
        let controls = Arc::new(EffectControls::new(selection.params, selection.preset));
        let effect = kind.instantiate(Arc::clone(&controls), &self.config);
        let state = Slot {
            kind,
            controls,
            preset_label: selection.preset_label.clone(),
            knobs: selection.knobs,
        };
        Ok((effect, PreparedEffect { slot, state }))
    }

    /// Records a prepared effect as the slot's state.
    pub fn commit(&mut self, prepared: PreparedEffect) {
        let PreparedEffect { slot, state } = prepared;
        tracing::info!(slot, effect = state.kind.name(), "effect loaded");
        self.slots[slot] = state;
    }

    pub fn kind(&self, slot: usize) -> EngineResult<EffectKind> {
        check_slot(slot)?;
        Ok(self.slots[slot].kind)
    }

    /// Sets parameter `param` of `slot`; the effect glides to it.
    pub fn set_value(&self, slot: usize, param: usize, value: f32) -> EngineResult<()> {
        check_slot(slot)?;
        if param >= EFFECT_PARAMS {
            return Err(EngineError::RuntimeParameter(format!(
                "effect parameter {param} out of range (0..{EFFECT_PARAMS})"
            )));
        }
        let slot = &self.slots[slot];
        if slot.kind != EffectKind::None {
            slot.controls.set_param(param, value);
        }
        Ok(())
    }

    pub fn set_preset(&mut self, slot: usize, value: f32, label: &str) -> EngineResult<()> {
        check_slot(slot)?;
        let slot = &mut self.slots[slot];
        if slot.kind.has_preset() {
            slot.controls.set_preset(value);
            slot.preset_label = label.to_string();
        }
        Ok(())
    }

    pub fn snapshot(&self, slot: usize) -> EngineResult<EffectSnapshot> {
        check_slot(slot)?;
        let slot = &self.slots[slot];
        Ok(EffectSnapshot {
            name: slot.kind.name(),
            params: slot.controls.params(),
            preset: slot.controls.preset(),
            preset_label: slot.preset_label.clone(),
            knobs: slot.knobs,
            derived: slot.kind.derived(&slot.controls),
        })
    }
}

/// Audio-thread side: runs the slots in order over the block, in place.
pub struct ChainProcessor {
    slots: [Box<dyn InsertEffect>; EFFECT_SLOTS],
}

impl ChainProcessor {
    pub fn empty() -> Self {
        Self {
            slots: [
                Box::new(NoneEffect),
                Box::new(NoneEffect),
                Box::new(NoneEffect),
            ],
        }
    }

    /// Puts `effect` into `slot` and hands back the one it replaces.
    pub fn install(
        &mut self,
        slot: usize,
        effect: Box<dyn InsertEffect>,
    ) -> Option<Box<dyn InsertEffect>> {
        let target = self.slots.get_mut(slot)?;
        Some(std::mem::replace(target, effect))
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        for effect in &mut self.slots {
            effect.process(buffer, frames);
        }
    }

    pub fn reset(&mut self) {
        for effect in &mut self.slots {
            effect.reset();
        }
    }
}

impl Default for ChainProcessor {
    fn default() -> Self {
        Self::empty()
    }
}
