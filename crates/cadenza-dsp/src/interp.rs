use std::f32::consts::PI;

#[inline]
pub fn linear(a: f32, b: f32, frac: f32) -> f32 {
    a + (b - a) * frac
}

/// Raised-cosine blend between two values.
#[inline]
pub fn cosine(a: f32, b: f32, frac: f32) -> f32 {
    let weight = (1.0 - (PI * frac).cos()) * 0.5;
    a + (b - a) * weight
}

/// Four-point Catmull-Rom interpolation between `x1` and `x2`.
#[inline]
pub fn cubic(x0: f32, x1: f32, x2: f32, x3: f32, frac: f32) -> f32 {
    let a0 = -0.5 * x0 + 1.5 * x1 - 1.5 * x2 + 0.5 * x3;
    let a1 = x0 - 2.5 * x1 + 2.0 * x2 - 0.5 * x3;
    let a2 = 0.5 * (x2 - x0);
    ((a0 * frac + a1) * frac + a2) * frac + x1
}

/// Reads `table` at a fractional position with cubic interpolation.
///
/// Neighbours outside the table are clamped to its edges.
#[inline]
pub fn read_cubic(table: &[f32], position: f64) -> f32 {
    let len = table.len();
    if len == 0 {
        return 0.0;
    }
    let last = (len - 1) as f64;
    let position = position.clamp(0.0, last);
    let index = position.floor() as usize;
    let frac = (position - index as f64) as f32;
    let at = |offset: isize| -> f32 {
        let i = (index as isize + offset).clamp(0, len as isize - 1) as usize;
        table[i]
    };
    cubic(at(-1), at(0), at(1), at(2), frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_passes_through_samples() {
        let table = [0.0, 1.0, 4.0, 9.0, 16.0];
        for (i, value) in table.iter().enumerate() {
            assert!((read_cubic(&table, i as f64) - value).abs() < 1e-6);
        }
    }

    #[test]
    fn cubic_reproduces_a_line() {
        let table: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();
        let value = read_cubic(&table, 6.25);
        assert!((value - 3.125).abs() < 1e-5);
    }

    #[test]
    fn cosine_is_symmetric() {
        assert!((cosine(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        assert!(cosine(0.0, 1.0, 0.25) < linear(0.0, 1.0, 0.25));
    }

    #[test]
    fn empty_table_reads_silence() {
        assert_eq!(read_cubic(&[], 3.0), 0.0);
    }
}
