//! Miscellaneous utility functions.

/// Iterates over `0..count` starting at `start`, wrapping around.
pub fn rotated_range(count: usize, start: usize) -> impl Iterator<Item = usize> {
    (0..count)
        .map(move |i| i + start)
        .map(move |i| if i >= count { i - count } else { i })
}

/// Linearly interpolates between `(x0, y0)` and `(x1, y1)` at `x`,
/// extrapolating beyond either end using the segment's slope.
pub fn lerp_extrapolate(x0: f64, y0: f64, x1: f64, y1: f64, x: f64) -> f64 {
    if x1 == x0 {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rotated_range_wraps() {
        let idxs = rotated_range(4, 2).collect::<Vec<_>>();
        assert_eq!(idxs, vec![2, 3, 0, 1]);
    }

    #[test]
    fn rotated_range_from_zero() {
        let idxs = rotated_range(3, 0).collect::<Vec<_>>();
        assert_eq!(idxs, vec![0, 1, 2]);
    }
}
