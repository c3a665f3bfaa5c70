//! Schroeder/Moorer style reverb tank with the classic freeverb tunings.

const COMB_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_LENGTHS: [usize; 4] = [556, 441, 341, 225];
const TUNING_RATE: f32 = 44_100.0;
/// Offset added to every delay line of the right-hand tank.
pub const STEREO_SPREAD: usize = 23;

const FIXED_GAIN: f32 = 0.015;
const SCALE_ROOM: f32 = 0.28;
const OFFSET_ROOM: f32 = 0.7;
const SCALE_DAMP: f32 = 0.4;

#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp: f32,
    filter_store: f32,
}

impl CombFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            index: 0,
            feedback: 0.84,
            damp: 0.2,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - self.damp) + self.filter_store * self.damp;
        self.buffer[self.index] = input + self.filter_store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.filter_store = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllPassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllPassFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buf_out = self.buffer[self.index];
        self.buffer[self.index] = input + buf_out * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        buf_out - input
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// One mono reverb tank. Multichannel signals use one tank per channel,
/// offsetting every other channel by [`STEREO_SPREAD`].
#[derive(Debug, Clone)]
pub struct Freeverb {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllPassFilter>,
    size: f32,
    damp: f32,
}

impl Freeverb {
    pub fn new(sample_rate: f32, spread: usize) -> Self {
        let scale = (sample_rate / TUNING_RATE).max(0.25);
        let scaled = |length: usize| ((length + spread) as f32 * scale).round().max(1.0) as usize;
        let mut tank = Self {
            combs: COMB_LENGTHS.iter().map(|&l| CombFilter::new(scaled(l))).collect(),
            allpasses: ALLPASS_LENGTHS
                .iter()
                .map(|&l| AllPassFilter::new(scaled(l)))
                .collect(),
            size: 0.5,
            damp: 0.5,
        };
        tank.update_combs();
        tank
    }

    /// Room size in `0..=1`.
    pub fn set_size(&mut self, size: f32) {
        let size = size.clamp(0.0, 1.0);
        if size != self.size {
            self.size = size;
            self.update_combs();
        }
    }

    /// High frequency damping in `0..=1`.
    pub fn set_damp(&mut self, damp: f32) {
        let damp = damp.clamp(0.0, 1.0);
        if damp != self.damp {
            self.damp = damp;
            self.update_combs();
        }
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn damp(&self) -> f32 {
        self.damp
    }

    fn update_combs(&mut self) {
        let feedback = self.size * SCALE_ROOM + OFFSET_ROOM;
        let damp = self.damp * SCALE_DAMP;
        for comb in &mut self.combs {
            comb.feedback = feedback;
            comb.damp = damp;
        }
    }

    /// Returns the wet signal for one input sample.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let input = input * FIXED_GAIN;
        let mut sum = 0.0;
        for comb in &mut self.combs {
            sum += comb.process(input);
        }
        for allpass in &mut self.allpasses {
            sum = allpass.process(sum);
        }
        sum
    }

    pub fn reset(&mut self) {
        for comb in &mut self.combs {
            comb.reset();
        }
        for allpass in &mut self.allpasses {
            allpass.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_produces_a_decaying_tail() {
        let mut tank = Freeverb::new(44_100.0, 0);
        tank.set_size(0.5);
        let mut early = 0.0f32;
        let mut late = 0.0f32;
        for n in 0..88_200 {
            let input = if n == 0 { 1.0 } else { 0.0 };
            let out = tank.process(input).abs();
            if (1_000..11_025).contains(&n) {
                early = early.max(out);
            } else if n >= 80_000 {
                late = late.max(out);
            }
        }
        assert!(early > 0.0);
        assert!(late < early);
    }

    #[test]
    fn reset_clears_the_tail() {
        let mut tank = Freeverb::new(48_000.0, STEREO_SPREAD);
        for _ in 0..2_000 {
            tank.process(0.5);
        }
        tank.reset();
        assert_eq!(tank.process(0.0), 0.0);
    }
}
