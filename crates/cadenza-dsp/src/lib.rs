//! Allocation-free DSP building blocks shared by the Cadenza engine.
//!
//! Everything in here is safe to call from the audio thread once constructed:
//! no locking, no heap traffic after `new`.

pub mod fade;
pub mod gain;
pub mod interp;
pub mod pitch;
pub mod reverb;
pub mod smoothing;
pub mod utils;

pub use fade::FadeShape;
pub use gain::db_to_linear;
pub use pitch::{semitone_ratio, SEMITONE_RATIO};
pub use smoothing::{LinearGlide, OnePole};
