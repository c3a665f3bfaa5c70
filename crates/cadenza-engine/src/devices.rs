//! Read-only enumeration of audio and MIDI endpoints.

use cpal::traits::{DeviceTrait, HostTrait};
use midir::MidiInput;
use serde::Serialize;

use crate::config::AudioConfig;
use crate::error::{EngineError, EngineResult};

/// Names of endpoints with the index of the default entry of each list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceList {
    pub host: String,
    pub inputs: Vec<String>,
    pub default_input: Option<usize>,
    pub outputs: Vec<String>,
    pub default_output: Option<usize>,
    pub midi_inputs: Vec<String>,
    /// The first port, when there is one.
    pub default_midi_input: Option<usize>,
}

/// Lists audio devices of the configured host and the available MIDI input
/// ports.
pub fn available_audio_midi_drivers(config: &AudioConfig) -> EngineResult<DeviceList> {
    let host = match config.host.as_deref() {
        Some(name) => cpal::available_hosts()
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::device(format!("audio host `{name}` is not available")))
            .and_then(|id| {
                cpal::host_from_id(id).map_err(|err| EngineError::device(err.to_string()))
            })?,
        None => cpal::default_host(),
    };

    let default_input = host.default_input_device().and_then(|device| device.name().ok());
    let default_output = host.default_output_device().and_then(|device| device.name().ok());
    let inputs: Vec<String> = host
        .input_devices()
        .map(|devices| devices.filter_map(|device| device.name().ok()).collect())
        .unwrap_or_default();
    let outputs: Vec<String> = host
        .output_devices()
        .map(|devices| devices.filter_map(|device| device.name().ok()).collect())
        .unwrap_or_default();

    let midi_inputs = midi_input_ports();
    let list = DeviceList {
        host: host.id().name().to_string(),
        default_input: default_input.and_then(|name| inputs.iter().position(|n| *n == name)),
        default_output: default_output.and_then(|name| outputs.iter().position(|n| *n == name)),
        default_midi_input: (!midi_inputs.is_empty()).then_some(0),
        inputs,
        outputs,
        midi_inputs,
    };
    tracing::debug!(
        host = %list.host,
        outputs = list.outputs.len(),
        midi = list.midi_inputs.len(),
        "devices enumerated"
    );
    Ok(list)
}

fn midi_input_ports() -> Vec<String> {
    let input = match MidiInput::new("cadenza-midi") {
        Ok(input) => input,
        Err(err) => {
            tracing::warn!(%err, "MIDI unavailable");
            return Vec::new();
        }
    };
    input
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| {
            input
                .port_name(port)
                .unwrap_or_else(|_| format!("Port {index}"))
        })
        .collect()
}
