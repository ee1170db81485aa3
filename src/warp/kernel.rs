//! Low-level warp kernel interface and the built-in resampling kernel.

use std::sync::Arc;

use ndarray::{ArrayView2, ShapeBuilder};
use num_traits::NumCast;

use crate::dataset::Window;
use crate::error::{Result, WarpError};
use crate::mask::BitMask;
use crate::pixel::{self, PixelType};
use crate::resample::{bilinear, cubic, nearest, ResampleAlg};
use crate::transform::PointTransformer;
use crate::warp::options::ProgressFn;

/// Unified source density values at or below this weight count as absent.
const DENSITY_THRESHOLD: f32 = 0.000_000_000_1;

/// Everything a low-level warp kernel needs for one chunk.
///
/// The descriptor owns the source band buffers and any mask planes it
/// carries; the destination band slices are wired into the caller's
/// buffer. All of it is released when the descriptor is dropped at the end
/// of the chunk.
pub struct KernelCall<'a> {
    pub resample: ResampleAlg,
    pub working_type: PixelType,
    pub band_count: usize,

    pub transformer: Arc<dyn PointTransformer>,
    pub progress: ProgressFn,
    /// Kernel-local progress in [0, 1] is remapped by the kernel onto
    /// [progress_base, progress_base + progress_scale].
    pub progress_base: f64,
    pub progress_scale: f64,

    pub warp_options: Vec<(String, String)>,

    pub src_window: Window,
    pub dst_window: Window,

    /// Band-major source buffers, `word_size * src_w * src_h` bytes each.
    pub src_bands: Vec<Vec<u8>>,
    /// Destination band planes, borrowed from the region executor's buffer.
    pub dst_bands: Vec<&'a mut [u8]>,

    /// Per-band source validity, lazily allocated per band.
    pub band_src_valid: Option<Vec<Option<BitMask>>>,
    pub unified_src_valid: Option<BitMask>,
    pub unified_src_density: Option<Vec<f32>>,
    pub dst_valid: Option<BitMask>,
    pub dst_density: Option<Vec<f32>>,
}

impl KernelCall<'_> {
    /// Ensure the named mask plane exists, allocating and default-filling
    /// it on demand. Existing planes are left untouched.
    ///
    /// `"BandSrcValid"` requires a band position (0-based within the band
    /// mapping); the other names are `"UnifiedSrcValid"`,
    /// `"UnifiedSrcDensity"`, `"DstValid"` and `"DstDensity"`.
    pub fn create_mask(&mut self, band: Option<usize>, name: &str) -> Result<()> {
        let src_px = self.src_window.pixel_count();
        let dst_px = self.dst_window.pixel_count();
        match name {
            "BandSrcValid" => {
                let band = band.ok_or_else(|| {
                    WarpError::Internal("BandSrcValid mask requires a band index".into())
                })?;
                let n = self.band_count;
                let planes = self
                    .band_src_valid
                    .get_or_insert_with(|| (0..n).map(|_| None).collect());
                if band >= planes.len() {
                    return Err(WarpError::Internal(format!(
                        "band index {band} out of range for {n} bands"
                    )));
                }
                if planes[band].is_none() {
                    planes[band] = Some(BitMask::all_valid(src_px)?);
                }
            }
            "UnifiedSrcValid" => {
                if self.unified_src_valid.is_none() {
                    self.unified_src_valid = Some(BitMask::all_valid(src_px)?);
                }
            }
            "UnifiedSrcDensity" => {
                if self.unified_src_density.is_none() {
                    self.unified_src_density = Some(try_alloc_density(src_px)?);
                }
            }
            "DstValid" => {
                if self.dst_valid.is_none() {
                    self.dst_valid = Some(BitMask::all_valid(dst_px)?);
                }
            }
            "DstDensity" => {
                if self.dst_density.is_none() {
                    self.dst_density = Some(try_alloc_density(dst_px)?);
                }
            }
            other => {
                return Err(WarpError::Internal(format!(
                    "unknown kernel mask name {other:?}"
                )));
            }
        }
        Ok(())
    }
}

fn try_alloc_density(count: usize) -> Result<Vec<f32>> {
    let mut plane = Vec::new();
    plane.try_reserve_exact(count).map_err(|_| WarpError::OutOfMemory {
        what: "density mask plane",
        bytes: count * 4,
    })?;
    plane.resize(count, 0.0);
    Ok(plane)
}

/// Low-level warp kernel: consumes a fully staged [`KernelCall`] and fills
/// the destination band planes.
pub trait WarpKernel: Send + Sync {
    fn perform(&self, call: &mut KernelCall<'_>) -> Result<()>;
}

/// Built-in inverse-mapping kernel.
///
/// For each destination scanline it batch-transforms the pixel centers
/// into source coordinates and samples every band with the configured
/// resampling algorithm. Source validity and density planes veto
/// contributing pixels; destination validity/density planes are updated
/// for pixels that received a value. Progress is reported once per
/// scanline, remapped onto the supplied [base, base + scale] range.
pub struct ResampleKernel;

impl WarpKernel for ResampleKernel {
    fn perform(&self, call: &mut KernelCall<'_>) -> Result<()> {
        let KernelCall {
            resample,
            working_type,
            band_count,
            transformer,
            progress,
            progress_base,
            progress_scale,
            src_window,
            dst_window,
            src_bands,
            dst_bands,
            band_src_valid,
            unified_src_valid,
            unified_src_density,
            dst_valid,
            dst_density,
            ..
        } = call;

        let (w, h) = (dst_window.width, dst_window.height);
        let (sw, sh) = (src_window.width, src_window.height);
        let ty = *working_type;

        let mut x = vec![0.0f64; w];
        let mut y = vec![0.0f64; w];
        let mut z = vec![0.0f64; w];
        let mut success = vec![false; w];

        for row in 0..h {
            for col in 0..w {
                x[col] = (dst_window.x_off + col) as f64 + 0.5;
                y[col] = (dst_window.y_off + row) as f64 + 0.5;
                z[col] = 0.0;
                success[col] = false;
            }

            if !transformer.transform_points(true, &mut x, &mut y, &mut z, &mut success) {
                return Err(WarpError::Transform(
                    "the point transformer rejected a scanline batch".into(),
                ));
            }

            for col in 0..w {
                if !success[col] {
                    continue;
                }
                let lx = x[col] - src_window.x_off as f64;
                let ly = y[col] - src_window.y_off as f64;
                let dst_idx = row * w + col;

                let mut wrote_any = false;
                for band in 0..*band_count {
                    let band_mask = band_src_valid
                        .as_ref()
                        .and_then(|planes| planes.get(band))
                        .and_then(|m| m.as_ref());
                    let unified = unified_src_valid.as_ref();
                    let density = unified_src_density.as_deref();
                    let valid = |c: usize, r: usize| {
                        let idx = r * sw + c;
                        unified.is_none_or(|m| m.get(idx))
                            && band_mask.is_none_or(|m| m.get(idx))
                            && density.is_none_or(|d| d[idx] > DENSITY_THRESHOLD)
                    };

                    if let Some((re, im)) =
                        sample_plane(*resample, ty, &src_bands[band], sw, sh, lx, ly, &valid)
                    {
                        pixel::put(&mut dst_bands[band][..], ty, dst_idx, re, im);
                        wrote_any = true;
                    }
                }

                if wrote_any {
                    if let Some(mask) = dst_valid.as_mut() {
                        mask.set(dst_idx);
                    }
                    if let Some(density) = dst_density.as_mut() {
                        density[dst_idx] = 1.0;
                    }
                }
            }

            let complete = *progress_base + *progress_scale * ((row + 1) as f64 / h as f64);
            if !(**progress)(complete) {
                return Err(WarpError::Aborted);
            }
        }

        Ok(())
    }
}

fn sample_real<T, F>(
    bytes: &[u8],
    width: usize,
    height: usize,
    alg: ResampleAlg,
    x: f64,
    y: f64,
    valid: &F,
) -> Option<f64>
where
    T: bytemuck::Pod + NumCast + Copy,
    F: Fn(usize, usize) -> bool,
{
    let slice: &[T] = bytemuck::cast_slice(bytes);
    let view = ArrayView2::from_shape((height, width), slice).ok()?;
    match alg {
        ResampleAlg::Nearest => nearest::sample(&view, x, y, valid),
        ResampleAlg::Bilinear => bilinear::sample(&view, x, y, valid),
        ResampleAlg::Cubic => cubic::sample(&view, x, y, valid),
    }
}

/// Sample the real and imaginary lanes of an interleaved complex plane
/// through strided views.
fn sample_complex<T, F>(
    bytes: &[u8],
    width: usize,
    height: usize,
    alg: ResampleAlg,
    x: f64,
    y: f64,
    valid: &F,
) -> Option<(f64, f64)>
where
    T: bytemuck::Pod + NumCast + Copy,
    F: Fn(usize, usize) -> bool,
{
    let slice: &[T] = bytemuck::cast_slice(bytes);
    if slice.is_empty() {
        return None;
    }
    let re_view =
        ArrayView2::from_shape((height, width).strides((2 * width, 2)), slice).ok()?;
    let im_view =
        ArrayView2::from_shape((height, width).strides((2 * width, 2)), &slice[1..]).ok()?;
    let sample_lane = |view: &ArrayView2<'_, T>| match alg {
        ResampleAlg::Nearest => nearest::sample(view, x, y, valid),
        ResampleAlg::Bilinear => bilinear::sample(view, x, y, valid),
        ResampleAlg::Cubic => cubic::sample(view, x, y, valid),
    };
    let re = sample_lane(&re_view)?;
    let im = sample_lane(&im_view)?;
    Some((re, im))
}

#[allow(clippy::too_many_arguments)]
fn sample_plane<F>(
    alg: ResampleAlg,
    ty: PixelType,
    bytes: &[u8],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
    valid: &F,
) -> Option<(f64, f64)>
where
    F: Fn(usize, usize) -> bool,
{
    match ty {
        PixelType::Byte => {
            sample_real::<u8, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::UInt16 => {
            sample_real::<u16, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::Int16 => {
            sample_real::<i16, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::UInt32 => {
            sample_real::<u32, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::Int32 => {
            sample_real::<i32, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::Float32 => {
            sample_real::<f32, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::Float64 => {
            sample_real::<f64, F>(bytes, width, height, alg, x, y, valid).map(|v| (v, 0.0))
        }
        PixelType::CFloat32 => sample_complex::<f32, F>(bytes, width, height, alg, x, y, valid),
        PixelType::CFloat64 => sample_complex::<f64, F>(bytes, width, height, alg, x, y, valid),
    }
}
