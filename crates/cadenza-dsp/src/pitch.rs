/// Frequency ratio of one equal-tempered semitone.
pub const SEMITONE_RATIO: f32 = 1.059_463_094_359_3;

/// Playback ratio for a transposition in semitones.
#[inline]
pub fn semitone_ratio(semitones: f32) -> f32 {
    SEMITONE_RATIO.powf(semitones)
}
