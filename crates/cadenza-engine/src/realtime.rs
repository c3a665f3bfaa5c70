use std::cmp;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cadenza_dsp::utils::flush_denormals;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use crate::buffer::{AudioBuffer, BufferConfig};
use crate::config::AudioConfig;
use crate::error::{EngineError, EngineResult};
use crate::renderer::Renderer;

const DEFAULT_QUEUE_DEPTH: usize = 3;

/// Running output stream fed by a render thread.
pub struct DeviceStream {
    _stream: Stream,
    running: Arc<AtomicBool>,
    queue: Arc<ArrayQueue<f32>>,
    render_thread: Option<JoinHandle<()>>,
}

impl DeviceStream {
    /// Interleaved samples waiting for the device callback.
    pub fn buffered_samples(&self) -> usize {
        self.queue.len()
    }

    /// Stops the render thread and closes the stream.
    pub fn stop(mut self) -> EngineResult<()> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.render_thread.take() {
            handle
                .join()
                .map_err(|_| EngineError::device("device render thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.render_thread.take() {
            if let Err(err) = handle.join() {
                tracing::error!(?err, "failed to join device render thread");
            }
        }
    }
}

fn select_host(config: &AudioConfig) -> EngineResult<cpal::Host> {
    let Some(name) = config.host.as_deref() else {
        return Ok(cpal::default_host());
    };
    let id = cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| EngineError::device(format!("audio host `{name}` is not available")))?;
    cpal::host_from_id(id).map_err(|err| EngineError::device(err.to_string()))
}

fn select_output(host: &cpal::Host, config: &AudioConfig) -> EngineResult<cpal::Device> {
    match config.output_device.as_deref() {
        Some(name) => host
            .output_devices()
            .map_err(|err| EngineError::device(err.to_string()))?
            .find(|device| device.name().map(|found| found == name).unwrap_or(false))
            .ok_or_else(|| EngineError::device(format!("output device `{name}` not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| EngineError::device("no default output device")),
    }
}

/// Opens the configured device and negotiates a stream config without
/// starting anything.
pub fn check_output(config: &AudioConfig) -> EngineResult<()> {
    let host = select_host(config)?;
    let device = select_output(&host, config)?;
    let supported = choose_stream_config(&device, &config.buffer_config())?;
    tracing::info!(
        host = host.id().name(),
        device = %device.name().unwrap_or_default(),
        channels = supported.channels(),
        sample_rate = supported.sample_rate().0,
        "output device ready"
    );
    Ok(())
}

/// Starts a cpal output stream pulling blocks from `renderer`.
///
/// A dedicated render thread does the work; the device callback only pops
/// samples from a lock-free queue.
pub fn start_device(
    renderer: Arc<Mutex<Renderer>>,
    config: &AudioConfig,
) -> EngineResult<DeviceStream> {
    let buffer_config = config.buffer_config();
    let host = select_host(config)?;
    let device = select_output(&host, config)?;
    let supported = choose_stream_config(&device, &buffer_config)?;
    let mut stream_config: StreamConfig = supported.config();

    let desired_channels = buffer_config.channels();
    let output_channels = stream_config.channels as usize;
    if output_channels != desired_channels {
        tracing::warn!(
            device_channels = output_channels,
            engine_channels = desired_channels,
            "device channel count differs from the configuration; extra channels will be silent"
        );
    }

    let frames_per_block = cmp::max(1, buffer_config.block_size);
    let buffer_frames = u32::try_from(frames_per_block).unwrap_or(u32::MAX);
    stream_config.buffer_size = BufferSize::Fixed(buffer_frames);

    let queue_capacity = frames_per_block
        .saturating_mul(output_channels.max(1))
        .saturating_mul(DEFAULT_QUEUE_DEPTH.max(2))
        .max(output_channels.max(1));
    let queue = Arc::new(ArrayQueue::new(queue_capacity));
    prefill_queue(&queue, frames_per_block.saturating_mul(output_channels.max(1)));

    let running = Arc::new(AtomicBool::new(true));
    let render_thread = spawn_render_thread(
        renderer,
        Arc::clone(&queue),
        Arc::clone(&running),
        output_channels,
    )?;

    let stream = match build_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        Arc::clone(&queue),
        Arc::clone(&running),
    )
    .and_then(|stream| {
        stream
            .play()
            .map_err(|err| EngineError::device(err.to_string()))?;
        Ok(stream)
    }) {
        Ok(stream) => stream,
        Err(err) => {
            running.store(false, Ordering::Relaxed);
            let _ = render_thread.join();
            return Err(err);
        }
    };

    Ok(DeviceStream {
        _stream: stream,
        running,
        queue,
        render_thread: Some(render_thread),
    })
}

fn spawn_render_thread(
    renderer: Arc<Mutex<Renderer>>,
    queue: Arc<ArrayQueue<f32>>,
    running: Arc<AtomicBool>,
    output_channels: usize,
) -> EngineResult<JoinHandle<()>> {
    thread::Builder::new()
        .name("cadenza-device-render".into())
        .spawn(move || {
            flush_denormals();
            let block = renderer.lock().config().block_size;
            let stride = output_channels.max(1);
            let mut interleaved = vec![0.0f32; stride.saturating_mul(cmp::max(1, block))];

            while running.load(Ordering::Relaxed) {
                let written = {
                    let mut guard = renderer.lock();
                    let buffer = guard.process_block();
                    interleave_buffer(buffer, output_channels, &mut interleaved)
                };

                for sample in interleaved[..written].iter().copied() {
                    if !push_sample(&queue, sample, &running) {
                        return;
                    }
                }
            }
        })
        .map_err(|err| EngineError::device(format!("failed to spawn render thread: {err}")))
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    queue: Arc<ArrayQueue<f32>>,
    running: Arc<AtomicBool>,
) -> EngineResult<Stream> {
    match format {
        SampleFormat::F32 => build_output_stream::<f32>(device, config, queue, running),
        SampleFormat::I16 => build_output_stream::<i16>(device, config, queue, running),
        SampleFormat::U16 => build_output_stream::<u16>(device, config, queue, running),
        other => Err(EngineError::device(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: Arc<ArrayQueue<f32>>,
    running: Arc<AtomicBool>,
) -> EngineResult<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32> + Send + 'static,
{
    let silence = T::from_sample(0.0f32);
    device
        .build_output_stream(
            config,
            move |output: &mut [T], _info| {
                if !running.load(Ordering::Relaxed) {
                    output.fill(silence);
                    return;
                }
                for sample in output.iter_mut() {
                    *sample = queue.pop().map(T::from_sample).unwrap_or(silence);
                }
            },
            move |err| {
                tracing::error!(?err, "cpal output stream error");
            },
            None,
        )
        .map_err(|err| EngineError::device(err.to_string()))
}

fn choose_stream_config(
    device: &cpal::Device,
    config: &BufferConfig,
) -> EngineResult<cpal::SupportedStreamConfig> {
    let desired_channels = cmp::max(1, config.channels()) as u16;
    let rate_hz = config.sample_rate.max(1.0).round();
    let desired_rate = SampleRate(rate_hz.clamp(1.0, u32::MAX as f32) as u32);

    let matching = |require_f32: bool, require_rate: bool| {
        device.supported_output_configs().ok().and_then(|mut configs| {
            configs.find(|range| {
                range.channels() == desired_channels
                    && (!require_f32 || range.sample_format() == SampleFormat::F32)
                    && (!require_rate
                        || (range.min_sample_rate() <= desired_rate
                            && desired_rate <= range.max_sample_rate()))
            })
        })
    };

    if let Some(range) = matching(true, true) {
        return Ok(range.with_sample_rate(desired_rate));
    }
    if let Some(range) = matching(false, true) {
        return Ok(range.with_sample_rate(desired_rate));
    }
    if let Some(range) = matching(true, false) {
        tracing::warn!(
            requested = desired_rate.0,
            using = range.max_sample_rate().0,
            "sample rate not supported by the device"
        );
        return Ok(range.with_max_sample_rate());
    }

    device
        .default_output_config()
        .map_err(|err| EngineError::device(format!("no usable output config: {err}")))
}

fn interleave_buffer(buffer: &AudioBuffer, output_channels: usize, target: &mut [f32]) -> usize {
    let channels = buffer.as_slice();
    let channel_count = channels.len();
    let mut index = 0;

    for frame in 0..buffer.len() {
        for channel in 0..output_channels {
            if index >= target.len() {
                return index;
            }
            target[index] = if channel < channel_count {
                channels[channel][frame]
            } else {
                0.0
            };
            index += 1;
        }
    }

    index
}

fn push_sample(queue: &ArrayQueue<f32>, mut value: f32, running: &AtomicBool) -> bool {
    while running.load(Ordering::Relaxed) {
        match queue.push(value) {
            Ok(()) => return true,
            Err(returned) => {
                value = returned;
                thread::yield_now();
            }
        }
    }
    false
}

fn prefill_queue(queue: &ArrayQueue<f32>, samples: usize) {
    for _ in 0..samples.min(queue.capacity()) {
        let _ = queue.push(0.0);
    }
}
