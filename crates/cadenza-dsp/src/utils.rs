/// Sets FTZ/DAZ on the calling thread. Render threads call this once at start.
#[inline]
pub fn flush_denormals() {
    #[cfg(all(any(feature = "simd", feature = "no-denormals"), target_arch = "x86_64"))]
    #[allow(deprecated)]
    unsafe {
        use core::arch::x86_64::{_mm_getcsr, _mm_setcsr};
        const FLUSH_TO_ZERO: u32 = 0x8000;
        const DENORMALS_ARE_ZERO: u32 = 0x0040;
        _mm_setcsr(_mm_getcsr() | FLUSH_TO_ZERO | DENORMALS_ARE_ZERO);
    }
}

/// Replaces NaN/inf with silence before a block reaches the output.
#[inline]
pub fn sanitize(buffer: &mut [f32]) {
    buffer
        .iter_mut()
        .filter(|sample| !sample.is_finite())
        .for_each(|sample| *sample = 0.0);
}
