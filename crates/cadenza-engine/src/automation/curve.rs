use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use cadenza_dsp::interp;

use crate::session::CurveShape;

/// Resolution used for every curve unless a graph widget asks otherwise.
pub const DEFAULT_TABLE_SIZE: usize = 8192;

/// Breakpoint curve resampled over one timeline pass.
///
/// Holds `size + 1` values; the extra guard point lets readers interpolate
/// past the last bin without wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveTable {
    values: Vec<f32>,
    breakpoints: Vec<(f64, f32)>,
    duration: f64,
    shape: CurveShape,
}

impl CurveTable {
    pub fn build(breakpoints: &[(f64, f32)], shape: CurveShape, duration: f64, size: usize) -> Self {
        let size = size.max(2);
        let duration = if duration.is_finite() && duration > 0.0 {
            duration
        } else {
            1.0
        };

        let mut points: Vec<(f64, f32)> = breakpoints
            .iter()
            .copied()
            .filter(|(time, value)| time.is_finite() && value.is_finite())
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut values = vec![points.first().map(|p| p.1).unwrap_or(0.0); size + 1];
        let bin = |time: f64| -> usize {
            let scaled = (time / duration * size as f64).floor();
            scaled.clamp(0.0, size as f64) as usize
        };

        for pair in points.windows(2) {
            let (b0, v0) = (bin(pair[0].0), pair[0].1);
            let (b1, v1) = (bin(pair[1].0), pair[1].1);
            if b1 <= b0 {
                values[b1] = v1;
                continue;
            }
            let span = (b1 - b0) as f32;
            for (offset, slot) in values[b0..=b1].iter_mut().enumerate() {
                let frac = offset as f32 / span;
                *slot = match shape {
                    CurveShape::Linear => interp::linear(v0, v1, frac),
                    CurveShape::Cosine => interp::cosine(v0, v1, frac),
                };
            }
        }
        if let Some(&(time, value)) = points.last() {
            values[bin(time)..].fill(value);
        }

        Self {
            values,
            breakpoints: points,
            duration,
            shape,
        }
    }

    /// A table holding `value` everywhere.
    pub fn constant(value: f32, duration: f64, size: usize) -> Self {
        Self::build(&[(0.0, value)], CurveShape::Linear, duration, size)
    }

    pub fn size(&self) -> usize {
        self.values.len() - 1
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn shape(&self) -> CurveShape {
        self.shape
    }

    /// Resampled values including the guard point.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Breakpoint times paired with the values the table actually holds there.
    pub fn to_breakpoints(&self) -> Vec<(f64, f32)> {
        let size = self.size() as f64;
        self.breakpoints
            .iter()
            .map(|&(time, _)| {
                let bin = (time / self.duration * size).floor().clamp(0.0, size) as usize;
                (time, self.values[bin])
            })
            .collect()
    }

    /// Value at `phase` in `0..1` of the pass, linearly interpolated between bins.
    #[inline]
    pub fn value_at(&self, phase: f64) -> f32 {
        let size = self.size();
        let position = phase.rem_euclid(1.0) * size as f64;
        let index = (position.floor() as usize).min(size - 1);
        let frac = (position - index as f64) as f32;
        interp::linear(self.values[index], self.values[index + 1], frac)
    }

    pub fn value_at_time(&self, seconds: f64) -> f32 {
        self.value_at(seconds / self.duration)
    }
}

/// A curve table that can be rebuilt while the audio thread reads it.
///
/// Readers grab the whole table once per block, so a replacement is observed
/// all at once or not at all.
#[derive(Debug, Clone)]
pub struct SharedTable {
    inner: Arc<ArcSwap<CurveTable>>,
}

impl SharedTable {
    pub fn new(table: CurveTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    #[inline]
    pub fn load(&self) -> Guard<Arc<CurveTable>> {
        self.inner.load()
    }

    pub fn snapshot(&self) -> Arc<CurveTable> {
        self.inner.load_full()
    }

    /// Rebuilds the table from new breakpoints, keeping shape, size and duration.
    pub fn replace(&self, breakpoints: &[(f64, f32)]) {
        let current = self.inner.load();
        let table = CurveTable::build(breakpoints, current.shape, current.duration, current.size());
        self.inner.store(Arc::new(table));
    }

    pub fn replace_table(&self, table: CurveTable) {
        self.inner.store(Arc::new(table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_land_on_their_bins() {
        let table = CurveTable::build(&[(0.0, 0.0), (5.0, 1.0), (10.0, 0.0)], CurveShape::Linear, 10.0, 8);
        assert_eq!(table.values(), &[0.0, 0.25, 0.5, 0.75, 1.0, 0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn values_hold_outside_the_breakpoints() {
        let table = CurveTable::build(&[(2.5, 3.0), (5.0, 5.0)], CurveShape::Linear, 10.0, 8);
        assert_eq!(table.values()[0], 3.0);
        assert_eq!(table.values()[8], 5.0);
        assert_eq!(table.values()[6], 5.0);
    }

    #[test]
    fn cosine_shape_eases_between_points() {
        let linear = CurveTable::build(&[(0.0, 0.0), (1.0, 1.0)], CurveShape::Linear, 1.0, 16);
        let cosine = CurveTable::build(&[(0.0, 0.0), (1.0, 1.0)], CurveShape::Cosine, 1.0, 16);
        assert!(cosine.values()[4] < linear.values()[4]);
        assert!(cosine.values()[12] > linear.values()[12]);
        assert!((cosine.values()[8] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unsorted_input_is_sorted() {
        let sorted = CurveTable::build(&[(0.0, 0.0), (1.0, 1.0)], CurveShape::Linear, 1.0, 64);
        let shuffled = CurveTable::build(&[(1.0, 1.0), (0.0, 0.0)], CurveShape::Linear, 1.0, 64);
        assert_eq!(sorted, shuffled);
    }

    #[test]
    fn empty_curve_is_silent() {
        let table = CurveTable::build(&[], CurveShape::Linear, 4.0, 32);
        assert!(table.values().iter().all(|value| *value == 0.0));
        assert!(table.to_breakpoints().is_empty());
    }

    #[test]
    fn value_at_interpolates_between_bins() {
        let table = CurveTable::build(&[(0.0, 0.0), (1.0, 8.0)], CurveShape::Linear, 1.0, 8);
        assert!((table.value_at(0.0625) - 0.5).abs() < 1e-6);
        assert!((table.value_at_time(0.5) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn replace_keeps_shape_and_size() {
        let shared = SharedTable::new(CurveTable::build(&[(0.0, 1.0)], CurveShape::Cosine, 3.0, 128));
        shared.replace(&[(0.0, 0.0), (3.0, 2.0)]);
        let table = shared.snapshot();
        assert_eq!(table.size(), 128);
        assert_eq!(table.shape(), CurveShape::Cosine);
        assert_eq!(table.values()[128], 2.0);
    }

    #[test]
    fn breakpoints_survive_a_rebuild_within_one_bin() {
        let points = [(0.0, 0.0), (2.5, 1.0), (5.0, -0.5), (7.25, 0.8), (10.0, 0.25)];
        let table = CurveTable::build(&points, CurveShape::Linear, 10.0, DEFAULT_TABLE_SIZE);
        let bin = 10.0 / DEFAULT_TABLE_SIZE as f64;
        // Steepest segment is 1.5 per 2.5 s, so one bin of drift moves the value this much.
        let tolerance = (1.5 / 2.5 * bin) as f32 + 1e-5;

        let restored = table.to_breakpoints();
        assert_eq!(restored.len(), points.len());
        for ((time, value), (restored_time, restored_value)) in points.iter().zip(&restored) {
            assert_eq!(time, restored_time);
            assert!(
                (value - restored_value).abs() <= tolerance,
                "{time}: {value} vs {restored_value}"
            );
            // The end of the pass wraps to phase zero.
            if *time < table.duration() {
                assert!((table.value_at_time(*time) - value).abs() <= tolerance);
            }
        }

        let rebuilt = CurveTable::build(&restored, CurveShape::Linear, 10.0, DEFAULT_TABLE_SIZE);
        for (a, b) in table.values().iter().zip(rebuilt.values()) {
            assert!((a - b).abs() <= tolerance);
        }
    }

    #[test]
    fn readers_never_see_a_half_replaced_table() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::thread;

        let shared = SharedTable::new(CurveTable::constant(0.25, 1.0, 1024));
        let done = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));

        let reader = {
            let shared = shared.clone();
            let done = Arc::clone(&done);
            let reads = Arc::clone(&reads);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let table = shared.load();
                    let first = table.values()[0];
                    assert!(first == 0.25 || first == 0.75, "unexpected value {first}");
                    assert!(table.values().iter().all(|value| *value == first));
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        for round in 0..2_000 {
            let value = if round % 2 == 0 { 0.75 } else { 0.25 };
            shared.replace(&[(0.0, value)]);
        }
        while reads.load(Ordering::Relaxed) == 0 {
            thread::yield_now();
        }
        done.store(true, Ordering::Release);
        reader.join().expect("reader panicked");
        assert_eq!(shared.snapshot().values()[1024], 0.25);
    }
}
