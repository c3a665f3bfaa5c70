/// Converts decibels to a linear amplitude factor, `10^(db / 20)`.
///
/// There is no silence floor: very low levels stay tiny but positive.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db * 0.05)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_at_zero_db() {
        assert_eq!(db_to_linear(0.0), 1.0);
    }

    #[test]
    fn six_db_is_roughly_double() {
        assert!((db_to_linear(6.0206) - 2.0).abs() < 1e-3);
        assert!((db_to_linear(-20.0) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn very_low_levels_are_not_clamped() {
        let level = db_to_linear(-150.0);
        assert!(level > 0.0);
        assert!((level / 10.0f32.powf(-7.5) - 1.0).abs() < 1e-3);
    }
}
