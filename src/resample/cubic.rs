//! Cubic convolution resampling kernel (Keys 1981, a = -0.5).
//!
//! Uses a 4×4 neighborhood with the classic Keys weight function.

use ndarray::ArrayView2;
use num_traits::NumCast;

/// Cubic convolution weight function (Keys 1981, a = -0.5).
///
/// ```text
/// W(t) = (a+2)|t|³ - (a+3)|t|² + 1       for 0 ≤ |t| ≤ 1
/// W(t) = a|t|³ - 5a|t|² + 8a|t| - 4a     for 1 < |t| ≤ 2
/// W(t) = 0                                 for |t| > 2
/// ```
fn cubic_weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t * t * t - (A + 3.0) * t * t + 1.0
    } else if t <= 2.0 {
        A * t * t * t - 5.0 * A * t * t + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

/// Sample a 2D array using cubic convolution interpolation.
///
/// Uses a 4×4 neighborhood centered on the sample point.
/// Corner-to-center conversion (-0.5 offset), anchor at `floor()`.
///
/// Returns `None` if any of the 16 neighbors is out of bounds, rejected by
/// `valid(col, row)`, or NaN.
pub fn sample<T, F>(src: &ArrayView2<'_, T>, x: f64, y: f64, valid: &F) -> Option<f64>
where
    T: Copy + NumCast,
    F: Fn(usize, usize) -> bool,
{
    // Convert from corner-based to center-based coordinates
    let cx = x - 0.5;
    let cy = y - 0.5;

    let ix = cx.floor() as isize;
    let iy = cy.floor() as isize;

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);

    // Check bounds for 4×4 neighborhood: offsets -1..+2
    if ix - 1 < 0 || ix + 2 >= cols || iy - 1 < 0 || iy + 2 >= rows {
        return None;
    }

    let dx = cx - ix as f64;
    let dy = cy - iy as f64;

    // Precompute 1D weight arrays to reduce cubic_weight calls from 16 to 8
    let wx: [f64; 4] = std::array::from_fn(|k| cubic_weight(dx - (k as f64 - 1.0)));
    let wy: [f64; 4] = std::array::from_fn(|k| cubic_weight(dy - (k as f64 - 1.0)));

    let mut result = 0.0;
    for (jk, j) in (-1..=2_isize).enumerate() {
        let w_row = wy[jk];
        for (ik, i) in (-1..=2_isize).enumerate() {
            let (col, row) = ((ix + i) as usize, (iy + j) as usize);
            if !valid(col, row) {
                return None;
            }

            let fval: f64 = NumCast::from(src[(row, col)])?;
            if fval.is_nan() {
                return None;
            }
            result += wx[ik] * w_row * fval;
        }
    }

    Some(result)
}
