use serde::{Deserialize, Serialize};

/// Output channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Custom(u8),
}

impl ChannelLayout {
    pub fn channels(&self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Custom(channels) => (*channels).max(1),
        }
    }
}

/// Shared configuration passed to every node of the render graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    pub sample_rate: f32,
    pub block_size: usize,
    pub layout: ChannelLayout,
}

impl BufferConfig {
    pub fn new(sample_rate: f32, block_size: usize, layout: ChannelLayout) -> Self {
        Self {
            sample_rate,
            block_size,
            layout,
        }
    }

    pub fn channels(&self) -> usize {
        self.layout.channels() as usize
    }

    pub fn block_duration_secs(&self) -> f64 {
        self.block_size as f64 / self.sample_rate.max(1.0) as f64
    }
}

/// Non-interleaved audio buffer for processing.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(num_channels: usize, block_size: usize) -> Self {
        let channels = (0..num_channels).map(|_| vec![0.0; block_size]).collect();
        Self { channels }
    }

    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.channels(), config.block_size)
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    pub fn len(&self) -> usize {
        self.channels
            .first()
            .map(|channel| channel.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut Vec<f32>> {
        self.channels.iter_mut()
    }

    pub fn as_slice(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn as_mut_slice(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels
    }

    /// Writes `frames` frames into `target` as interleaved samples.
    pub fn interleave_into(&self, frames: usize, target: &mut [f32]) -> usize {
        let stride = self.channels.len();
        let frames = frames.min(self.len()).min(target.len() / stride.max(1));
        for (ch, channel) in self.channels.iter().enumerate() {
            for (frame, sample) in channel[..frames].iter().enumerate() {
                target[frame * stride + ch] = *sample;
            }
        }
        frames * stride
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|channel| channel.iter())
            .fold(0.0f32, |peak, sample| peak.max(sample.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_orders_frames_then_channels() {
        let mut buffer = AudioBuffer::new(2, 3);
        buffer.as_mut_slice()[0].copy_from_slice(&[1.0, 2.0, 3.0]);
        buffer.as_mut_slice()[1].copy_from_slice(&[-1.0, -2.0, -3.0]);
        let mut out = [0.0; 6];
        assert_eq!(buffer.interleave_into(3, &mut out), 6);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(buffer.peak(), 3.0);
    }
}
