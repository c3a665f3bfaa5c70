use super::CurveTable;

/// Sweeps a [`CurveTable`] once per timeline pass and wraps around.
///
/// Position is kept as a frame count so the phase after `n` full passes is
/// exactly the phase it started at.
#[derive(Debug, Clone)]
pub struct TableReader {
    sample_rate: f64,
    duration: f64,
    elapsed_frames: u64,
}

impl TableReader {
    pub fn new(sample_rate: f32, duration: f64) -> Self {
        Self {
            sample_rate: sample_rate.max(1.0) as f64,
            duration: if duration > 0.0 { duration } else { 1.0 },
            elapsed_frames: 0,
        }
    }

    /// Phase in `0..1` of the current pass.
    #[inline]
    pub fn phase(&self) -> f64 {
        self.phase_at(self.elapsed_frames)
    }

    #[inline]
    fn phase_at(&self, frames: u64) -> f64 {
        let seconds = frames as f64 / self.sample_rate;
        seconds.rem_euclid(self.duration) / self.duration
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.elapsed_frames
    }

    pub fn reset(&mut self) {
        self.elapsed_frames = 0;
    }

    pub fn advance(&mut self, frames: usize) {
        self.elapsed_frames = self.elapsed_frames.wrapping_add(frames as u64);
    }

    /// Fills `out` with successive table reads.
    #[inline]
    pub fn process(&mut self, table: &CurveTable, out: &mut [f32]) {
        for (offset, sample) in out.iter_mut().enumerate() {
            *sample = table.value_at(self.phase_at(self.elapsed_frames + offset as u64));
        }
        self.advance(out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CurveShape;
    use proptest::prelude::*;

    #[test]
    fn sweeps_the_table_once_per_pass() {
        let table = CurveTable::build(&[(0.0, 0.0), (2.0, 1.0)], CurveShape::Linear, 2.0, 8192);
        let mut reader = TableReader::new(1_000.0, 2.0);
        let mut out = vec![0.0; 2_000];
        reader.process(&table, &mut out);
        assert_eq!(out[0], 0.0);
        assert!((out[1_000] - 0.5).abs() < 1e-3);
        assert!(out[1_999] > 0.99);
        reader.process(&table, &mut out[..1]);
        assert_eq!(out[0], 0.0);
    }

    proptest! {
        #[test]
        fn phase_is_periodic_in_the_timeline(millis in 10u64..600_000, offset in 0u64..1_000_000) {
            let duration = millis as f64 / 1_000.0;
            let period = millis * 48;
            let mut a = TableReader::new(48_000.0, duration);
            let mut b = TableReader::new(48_000.0, duration);
            a.advance(offset as usize);
            b.advance((offset + period) as usize);
            prop_assert!((a.phase() - b.phase()).abs() < 1e-9 || (a.phase() - b.phase()).abs() > 1.0 - 1e-9);
        }
    }
}
