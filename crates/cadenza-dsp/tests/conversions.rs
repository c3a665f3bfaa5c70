use cadenza_dsp::{db_to_linear, semitone_ratio};
use proptest::prelude::*;

proptest! {
    #[test]
    fn semitone_steps_compose(a in -24.0f32..24.0, b in -24.0f32..24.0) {
        let combined = semitone_ratio(a + b);
        let chained = semitone_ratio(a) * semitone_ratio(b);
        prop_assert!((combined - chained).abs() <= combined * 1e-4);
    }

    #[test]
    fn gain_is_monotonic(db in -100.0f32..24.0) {
        prop_assert!(db_to_linear(db + 0.5) > db_to_linear(db));
    }
}
