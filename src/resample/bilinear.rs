//! Bilinear interpolation resampling kernel.

use ndarray::ArrayView2;
use num_traits::NumCast;

/// Sample a 2D array using bilinear interpolation.
///
/// Subtracts 0.5 from input coordinates to center on pixel centers
/// (corner-based convention: pixel center at col+0.5, row+0.5).
///
/// Performs 2×2 weighted interpolation. Returns `None` if any of the four
/// neighbors is out of bounds, rejected by `valid(col, row)`, or NaN.
pub fn sample<T, F>(src: &ArrayView2<'_, T>, x: f64, y: f64, valid: &F) -> Option<f64>
where
    T: Copy + NumCast,
    F: Fn(usize, usize) -> bool,
{
    // Convert from corner-based to center-based coordinates
    let cx = x - 0.5;
    let cy = y - 0.5;

    let x0 = cx.floor() as isize;
    let y0 = cy.floor() as isize;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);
    if x0 < 0 || x1 >= cols || y0 < 0 || y1 >= rows {
        return None;
    }

    let (x0u, y0u, x1u, y1u) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
    if !valid(x0u, y0u) || !valid(x1u, y0u) || !valid(x0u, y1u) || !valid(x1u, y1u) {
        return None;
    }

    // Convert to f64 for interpolation
    let f00: f64 = NumCast::from(src[(y0u, x0u)])?;
    let f10: f64 = NumCast::from(src[(y0u, x1u)])?;
    let f01: f64 = NumCast::from(src[(y1u, x0u)])?;
    let f11: f64 = NumCast::from(src[(y1u, x1u)])?;

    // Check for NaN (float types)
    if f00.is_nan() || f10.is_nan() || f01.is_nan() || f11.is_nan() {
        return None;
    }

    let dx = cx - x0 as f64;
    let dy = cy - y0 as f64;

    Some(
        f00 * (1.0 - dx) * (1.0 - dy)
            + f10 * dx * (1.0 - dy)
            + f01 * (1.0 - dx) * dy
            + f11 * dx * dy,
    )
}
