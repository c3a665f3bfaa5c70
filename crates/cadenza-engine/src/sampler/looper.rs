//! Looping table reader with two alternating crossfading heads.

use cadenza_dsp::interp::read_cubic;
use cadenza_dsp::FadeShape;

/// Shortest crossfade ever applied, so even a zero-length fade cannot click.
pub const MIN_XFADE_FRAMES: f64 = 32.0;
const MAX_XFADE_PERCENT: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    Off,
    #[default]
    Forward,
    Backward,
    BackAndForth,
}

impl LoopMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => LoopMode::Off,
            2 => LoopMode::Backward,
            3 => LoopMode::BackAndForth,
            _ => LoopMode::Forward,
        }
    }
}

/// Loop region requested for the next iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopWindow {
    /// Loop start in seconds.
    pub start: f32,
    /// Loop length in seconds.
    pub dur: f32,
    /// Crossfade as a percentage of the loop length.
    pub xfade: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Head {
    active: bool,
    pos: f64,
    dir: f64,
    lo: f64,
    hi: f64,
    fade: f64,
    fade_in: bool,
    handed_off: bool,
}

impl Head {
    #[inline]
    fn gain(&self, shape: FadeShape) -> f32 {
        if self.fade <= 0.0 {
            return 1.0;
        }
        let (into, remaining) = if self.dir > 0.0 {
            (self.pos - self.lo, self.hi - self.pos)
        } else {
            (self.hi - self.pos, self.pos - self.lo)
        };
        let mut gain = 1.0;
        if self.fade_in && into < self.fade {
            gain *= shape.gain_in((into / self.fade) as f32);
        }
        if remaining < self.fade {
            gain *= shape.gain_out(1.0 - (remaining / self.fade) as f32);
        }
        gain
    }

    #[inline]
    fn handoff_due(&self) -> bool {
        if self.dir > 0.0 {
            self.pos >= self.hi - self.fade
        } else {
            self.pos <= self.lo + self.fade
        }
    }

    #[inline]
    fn finished(&self) -> bool {
        if self.dir > 0.0 {
            self.pos >= self.hi
        } else {
            self.pos <= self.lo
        }
    }
}

/// Sample-accurate looper for one stream.
///
/// Each iteration freezes its window when it starts; the next iteration is
/// launched on the other head while the current one fades out, so live
/// changes to start, length or fade never cut a head short.
#[derive(Debug, Clone, PartialEq)]
pub struct Looper {
    mode: LoopMode,
    shape: FadeShape,
    start_from_loop: bool,
    heads: [Head; 2],
    current: usize,
    started: bool,
    ended: bool,
    next_forward: bool,
}

impl Looper {
    pub fn new(mode: LoopMode, shape: FadeShape, start_from_loop: bool) -> Self {
        Self {
            mode,
            shape,
            start_from_loop,
            heads: [Head::default(); 2],
            current: 0,
            started: false,
            ended: false,
            next_forward: true,
        }
    }

    /// Takes effect at the next iteration.
    pub fn set_mode(&mut self, mode: LoopMode) {
        self.mode = mode;
    }

    /// Takes effect immediately.
    pub fn set_shape(&mut self, shape: FadeShape) {
        self.shape = shape;
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn shape(&self) -> FadeShape {
        self.shape
    }

    /// True once a non-looping pass has played out.
    pub fn is_finished(&self) -> bool {
        self.ended
    }

    pub fn reset(&mut self) {
        self.heads = [Head::default(); 2];
        self.current = 0;
        self.started = false;
        self.ended = false;
        self.next_forward = true;
    }

    fn launch(&mut self, index: usize, window: LoopWindow, frames: usize, rate: f32, from_loop: bool) {
        let last = frames.saturating_sub(1) as f64;
        let rate = rate.max(1.0) as f64;
        let mut lo = (window.start.max(0.0) as f64 * rate).clamp(0.0, last);
        let mut hi = (lo + window.dur.max(0.0) as f64 * rate).min(last);
        if hi - lo < 2.0 {
            hi = (lo + 2.0).min(last);
            lo = (hi - 2.0).max(0.0);
        }
        let span = hi - lo;
        let percent = window.xfade.clamp(0.0, MAX_XFADE_PERCENT) as f64;
        let fade = (span * percent / 100.0)
            .max(MIN_XFADE_FRAMES.min(span * 0.5))
            .min(span * 0.5);

        let dir = match self.mode {
            LoopMode::Backward => -1.0,
            LoopMode::BackAndForth => {
                let forward = self.next_forward;
                self.next_forward = !forward;
                if forward {
                    1.0
                } else {
                    -1.0
                }
            }
            LoopMode::Off | LoopMode::Forward => 1.0,
        };
        let pos = match (from_loop, dir > 0.0) {
            (true, true) => lo,
            (true, false) => hi,
            (false, true) => 0.0,
            (false, false) => last,
        };
        self.heads[index] = Head {
            active: true,
            pos,
            dir,
            lo,
            hi,
            fade,
            fade_in: from_loop,
            handed_off: false,
        };
    }

    /// Produces one output sample.
    ///
    /// `rate` is the table's sample rate, `step` the playback increment in
    /// table frames (pitch ratio times table rate over output rate).
    #[inline]
    pub fn tick(&mut self, table: &[f32], window: LoopWindow, rate: f32, step: f64) -> f32 {
        if table.is_empty() || self.ended {
            return 0.0;
        }
        if !self.started {
            self.started = true;
            self.current = 0;
            self.launch(0, window, table.len(), rate, self.start_from_loop);
        }

        let mut out = 0.0;
        for head in self.heads.iter().filter(|head| head.active) {
            out += read_cubic(table, head.pos) * head.gain(self.shape);
        }

        let step = step.abs();
        for head in self.heads.iter_mut().filter(|head| head.active) {
            head.pos += head.dir * step;
        }

        let current = self.heads[self.current];
        if current.active && !current.handed_off && current.handoff_due() {
            self.heads[self.current].handed_off = true;
            if self.mode != LoopMode::Off {
                let next = 1 - self.current;
                self.launch(next, window, table.len(), rate, true);
                self.current = next;
            }
        }

        for head in self.heads.iter_mut() {
            if head.active && head.finished() {
                head.active = false;
            }
        }
        if self.mode == LoopMode::Off && self.heads.iter().all(|head| !head.active) {
            self.ended = true;
        }
        out
    }
}
