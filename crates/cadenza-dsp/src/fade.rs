use std::f32::consts::{FRAC_PI_2, PI};

/// Crossfade curve used at loop boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeShape {
    #[default]
    Linear,
    EqualPower,
    Sigmoid,
}

impl FadeShape {
    /// Maps the numeric shape code used by the control surface.
    ///
    /// Unknown codes fall back to linear.
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => FadeShape::EqualPower,
            2 => FadeShape::Sigmoid,
            _ => FadeShape::Linear,
        }
    }

    #[inline]
    pub fn gain_in(self, progress: f32) -> f32 {
        let progress = progress.clamp(0.0, 1.0);
        match self {
            FadeShape::Linear => progress,
            FadeShape::EqualPower => (FRAC_PI_2 * progress).sin(),
            FadeShape::Sigmoid => 0.5 - 0.5 * (PI * progress).cos(),
        }
    }

    #[inline]
    pub fn gain_out(self, progress: f32) -> f32 {
        let progress = progress.clamp(0.0, 1.0);
        match self {
            FadeShape::Linear => 1.0 - progress,
            FadeShape::EqualPower => (FRAC_PI_2 * progress).cos(),
            FadeShape::Sigmoid => 0.5 + 0.5 * (PI * progress).cos(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_exact() {
        for shape in [FadeShape::Linear, FadeShape::EqualPower, FadeShape::Sigmoid] {
            assert!(shape.gain_in(0.0).abs() < 1e-6);
            assert!((shape.gain_in(1.0) - 1.0).abs() < 1e-6);
            assert!((shape.gain_out(0.0) - 1.0).abs() < 1e-6);
            assert!(shape.gain_out(1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn equal_power_keeps_energy() {
        for step in 0..=10 {
            let p = step as f32 / 10.0;
            let a = FadeShape::EqualPower.gain_in(p);
            let b = FadeShape::EqualPower.gain_out(p);
            assert!((a * a + b * b - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn unknown_codes_are_linear() {
        assert_eq!(FadeShape::from_index(7), FadeShape::Linear);
        assert_eq!(FadeShape::from_index(2), FadeShape::Sigmoid);
    }
}
