//! Nearest-neighbor resampling kernel.

use ndarray::ArrayView2;
use num_traits::NumCast;

/// Sample a 2D array using nearest-neighbor lookup.
///
/// Uses the corner-based pixel convention: pixel (0,0) has its upper-left
/// corner at coordinate (0.0, 0.0) and its center at (0.5, 0.5), so
/// `floor()` finds the containing pixel.
///
/// Returns `None` if the coordinate is outside the array bounds or the
/// containing pixel is rejected by `valid(col, row)`.
pub fn sample<T, F>(src: &ArrayView2<'_, T>, x: f64, y: f64, valid: &F) -> Option<f64>
where
    T: Copy + NumCast,
    F: Fn(usize, usize) -> bool,
{
    let col = x.floor() as isize;
    let row = y.floor() as isize;

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);
    if col < 0 || col >= cols || row < 0 || row >= rows {
        return None;
    }

    let (col, row) = (col as usize, row as usize);
    if !valid(col, row) {
        return None;
    }

    NumCast::from(src[(row, col)])
}
