/// One-pole smoothing filter suitable for real-time parameter transitions.
#[derive(Clone, Copy, Debug)]
pub struct OnePole {
    coeff: f32,
    state: f32,
}

impl OnePole {
    #[inline]
    pub fn new(sample_rate: f32, time_ms: f32) -> Self {
        let mut s = Self {
            coeff: 0.0,
            state: 0.0,
        };
        s.set_time_ms(sample_rate, time_ms);
        s
    }

    #[inline]
    pub fn set_time_ms(&mut self, sample_rate: f32, time_ms: f32) {
        let rate = sample_rate.max(1.0);
        let tau = time_ms.max(0.01) * 0.001 * rate;
        let coeff = if tau <= 1.0 {
            1.0
        } else {
            1.0 - (-1.0 / tau).exp()
        };
        self.coeff = coeff.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn reset(&mut self, value: f32) {
        self.state = value;
    }

    #[inline]
    pub fn next(&mut self, target: f32) -> f32 {
        self.state += self.coeff * (target - self.state);
        self.state
    }

    #[inline]
    pub fn state(&self) -> f32 {
        self.state
    }
}

/// Linear glide towards a target over a fixed time.
///
/// A new target restarts the ramp from the current value, so the output never
/// jumps. Retargeting to the value already being approached is a no-op.
#[derive(Clone, Copy, Debug)]
pub struct LinearGlide {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    ramp_samples: u32,
}

impl LinearGlide {
    pub fn new(sample_rate: f32, time_secs: f32, initial: f32) -> Self {
        let mut glide = Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
            ramp_samples: 0,
        };
        glide.set_time(sample_rate, time_secs);
        glide
    }

    pub fn set_time(&mut self, sample_rate: f32, time_secs: f32) {
        let samples = (time_secs.max(0.0) * sample_rate.max(1.0)).round();
        self.ramp_samples = samples.min(u32::MAX as f32) as u32;
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        if self.ramp_samples == 0 {
            self.current = target;
            self.remaining = 0;
            return;
        }
        self.remaining = self.ramp_samples;
        self.step = (target - self.current) / self.ramp_samples as f32;
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    /// Advances `frames` samples at once and returns the value reached.
    #[inline]
    pub fn advance(&mut self, frames: usize) -> f32 {
        let frames = frames.min(u32::MAX as usize) as u32;
        if frames >= self.remaining {
            self.remaining = 0;
            self.current = self.target;
        } else {
            self.remaining -= frames;
            self.current += self.step * frames as f32;
        }
        self.current
    }

    #[inline]
    pub fn reset(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.remaining = 0;
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_gliding(&self) -> bool {
        self.remaining > 0
    }
}
