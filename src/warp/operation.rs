//! High-level warp operation: chunking, source-window estimation and
//! per-chunk buffer orchestration.
//!
//! [`WarpOperation::chunk_and_warp`] recursively subdivides the requested
//! destination region until the estimated source + destination + mask
//! memory fits the configured budget, then stages buffers and masks for
//! each chunk and hands them to the low-level kernel. The operation does
//! no I/O or resampling itself; those live behind the
//! [`RasterDataset`](crate::dataset::RasterDataset) and
//! [`WarpKernel`] collaborators.

use std::sync::Arc;

use crate::dataset::Window;
use crate::error::{Result, WarpError};
use crate::mask;
use crate::pixel::{self, PixelType};
use crate::warp::kernel::{KernelCall, ResampleKernel, WarpKernel};
use crate::warp::options::WarpOptions;

/// A stateful warp operation over a validated options record.
pub struct WarpOperation {
    options: Option<WarpOptions>,
    kernel: Arc<dyn WarpKernel>,
    progress_base: f64,
    progress_scale: f64,
}

impl Default for WarpOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl WarpOperation {
    /// Create an operation using the built-in resampling kernel.
    pub fn new() -> Self {
        Self::with_kernel(Arc::new(ResampleKernel))
    }

    /// Create an operation dispatching chunks to a custom kernel.
    pub fn with_kernel(kernel: Arc<dyn WarpKernel>) -> Self {
        Self {
            options: None,
            kernel,
            progress_base: 0.0,
            progress_scale: 1.0,
        }
    }

    /// Install a deep copy of `new_options`, applying defaults (band
    /// mapping, working type, memory limit) and validating the result.
    ///
    /// On validation failure the copy is discarded and the operation is
    /// left uninitialized. Re-initialization discards prior options.
    pub fn initialize(&mut self, new_options: &WarpOptions) -> Result<()> {
        self.wipe();

        let mut opts = new_options.clone();
        opts.apply_defaults();
        opts.validate()?;
        self.options = Some(opts);
        Ok(())
    }

    /// Discard the owned options. Idempotent.
    pub fn wipe(&mut self) {
        self.options = None;
    }

    /// The owned, defaulted options, if initialized.
    pub fn options(&self) -> Option<&WarpOptions> {
        self.options.as_ref()
    }

    fn opts(&self) -> Result<&WarpOptions> {
        self.options
            .as_ref()
            .ok_or_else(|| WarpError::ConfigInvalid("no options currently initialized".into()))
    }

    /// Estimate the smallest source window whose pixels may influence the
    /// destination rectangle, clipped to the source bounds and padded by
    /// the resampling half-width.
    ///
    /// Samples 84 points along the destination edges, inverse-transforms
    /// them in one batch and takes the bounding box of the survivors.
    /// Fails when fewer than 10 points survive.
    pub fn compute_source_window(&self, dst: Window) -> Result<Window> {
        let opts = self.opts()?;

        let (dx, dy) = (dst.x_off as f64, dst.y_off as f64);
        let (dw, dh) = (dst.width as f64, dst.height as f64);

        let mut x = Vec::with_capacity(84);
        let mut y = Vec::with_capacity(84);

        // 21 steps of 0.05 along each edge; anything past 0.99 snaps to
        // the exact end so the last sample lands on the far corner.
        let mut t = 0.0f64;
        while t <= 1.01 {
            if t > 0.99 {
                t = 1.0;
            }

            // Along top
            x.push(dx + t * dw);
            y.push(dy);
            // Along bottom
            x.push(dx + t * dw);
            y.push(dy + dh);
            // Along left
            x.push(dx);
            y.push(dy + t * dh);
            // Along right
            x.push(dx + dw);
            y.push(dy + t * dh);

            t += 0.05;
        }

        let n = x.len();
        assert_eq!(n, 84, "edge sampling must produce exactly 84 points");

        let mut z = vec![0.0f64; n];
        let mut success = vec![false; n];

        if !opts
            .transformer
            .transform_points(true, &mut x, &mut y, &mut z, &mut success)
        {
            return Err(WarpError::Transform(
                "the point transformer rejected the edge sample batch".into(),
            ));
        }

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        let mut failed = 0usize;

        for i in 0..n {
            if !success[i] {
                failed += 1;
                continue;
            }
            min_x = min_x.min(x[i]);
            min_y = min_y.min(y[i]);
            max_x = max_x.max(x[i]);
            max_y = max_y.max(y[i]);
        }

        if failed > n - 10 {
            return Err(WarpError::Transform(format!(
                "too many points ({failed} out of {n}) failed to transform, \
                 unable to compute source window"
            )));
        }

        if failed > 0 {
            log::debug!("compute_source_window: {failed} out of {n} points failed to transform");
        }

        let half_width = opts.resample_alg.half_width() as i64;
        let (src_w, src_h) = opts.src.raster_size();

        let sx = (min_x.floor() as i64 + half_width).max(0);
        let sy = (min_y.floor() as i64 + half_width).max(0);
        let sw = (src_w as i64 - sx)
            .min(max_x.ceil() as i64 - sx + half_width)
            .max(0);
        let sh = (src_h as i64 - sy)
            .min(max_y.ceil() as i64 - sy + half_width)
            .max(0);

        Ok(Window::new(sx as usize, sy as usize, sw as usize, sh as usize))
    }

    /// Warp the full destination rectangle, recursively subdividing it
    /// until each chunk's source + destination + mask memory fits the
    /// configured budget.
    ///
    /// Sub-chunks run lower half first, then upper half of the split
    /// dimension; progress reported through the callback spans [0, 1]
    /// across the whole call and is monotonically non-decreasing.
    pub fn chunk_and_warp(&mut self, dst: Window) -> Result<()> {
        let src = self.compute_source_window(dst)?;

        let (total_memory, memory_limit) = {
            let opts = self.opts()?;
            let src_cost = opts.src_pixel_cost_bits()? as f64;
            let dst_cost = opts.dst_pixel_cost_bits()? as f64;
            let total = (src_cost * src.pixel_count() as f64
                + dst_cost * dst.pixel_count() as f64)
                / 8.0;
            (total, opts.memory_limit)
        };

        // The 2-pixel guard stops the recursion on degenerate chunks whose
        // mask overhead alone exceeds the budget.
        if total_memory > memory_limit && (dst.width > 2 || dst.height > 2) {
            log::trace!(
                "chunk {}x{}+{}+{} needs {total_memory} bytes, splitting",
                dst.width,
                dst.height,
                dst.x_off,
                dst.y_off
            );

            let save_base = self.progress_base;
            let save_scale = self.progress_scale;
            self.progress_scale *= 0.5;

            let result = if dst.width > dst.height {
                let chunk1 = dst.width / 2;
                let chunk2 = dst.width - chunk1;

                let mut result =
                    self.chunk_and_warp(Window::new(dst.x_off, dst.y_off, chunk1, dst.height));
                if result.is_ok() {
                    self.progress_base += self.progress_scale;
                    result = self.chunk_and_warp(Window::new(
                        dst.x_off + chunk1,
                        dst.y_off,
                        chunk2,
                        dst.height,
                    ));
                }
                result
            } else {
                let chunk1 = dst.height / 2;
                let chunk2 = dst.height - chunk1;

                let mut result =
                    self.chunk_and_warp(Window::new(dst.x_off, dst.y_off, dst.width, chunk1));
                if result.is_ok() {
                    self.progress_base += self.progress_scale;
                    result = self.chunk_and_warp(Window::new(
                        dst.x_off,
                        dst.y_off + chunk1,
                        dst.width,
                        chunk2,
                    ));
                }
                result
            };

            self.progress_base = save_base;
            self.progress_scale = save_scale;

            return result;
        }

        self.warp_region(dst, src)
    }

    /// Produce one destination region in a single low-level warp, without
    /// checking the memory budget: allocate and initialize the destination
    /// buffer, dispatch to [`Self::warp_region_to_buffer`], write the
    /// result back.
    ///
    /// The initial fill is governed by the `INIT_DEST` string option:
    /// absent means read-modify-write against the destination dataset;
    /// `"NO_DATA"` uses the per-band destination no-data values; any other
    /// value is parsed as a complex literal `real[,imag]`.
    pub fn warp_region(&self, dst: Window, src: Window) -> Result<()> {
        let opts = self.opts()?;
        let ty = opts.working()?;

        if dst.is_empty() {
            return Ok(());
        }

        let band_size = ty.word_size() * dst.pixel_count();
        let band_count = opts.band_count();
        let mut dst_buffer = pixel::try_alloc("destination buffer", band_size * band_count)?;

        match opts.option("INIT_DEST") {
            Some(init) => {
                for band in 0..band_count {
                    let plane = &mut dst_buffer[band * band_size..(band + 1) * band_size];

                    let (re, im) = match (init, &opts.dst_nodata_real, &opts.dst_nodata_imag) {
                        ("NO_DATA", Some(res), Some(ims)) => (res[band], ims[band]),
                        _ => pixel::parse_complex(init),
                    };

                    if ty == PixelType::Byte {
                        plane.fill((re as i64).clamp(0, 255) as u8);
                    } else if re == 0.0 && im == 0.0 {
                        plane.fill(0);
                    } else if im == 0.0 {
                        pixel::fill(plane, ty, re, 0.0);
                    } else {
                        pixel::fill(plane, ty, re, im);
                    }
                }
            }
            None => {
                // Read the current destination content so the warp overlays
                // onto existing imagery.
                for band in 0..band_count {
                    let plane = &mut dst_buffer[band * band_size..(band + 1) * band_size];
                    opts.dst.read_band(opts.dst_bands[band], dst, ty, plane)?;
                }
            }
        }

        self.warp_region_to_buffer(dst, &mut dst_buffer, ty, src)?;

        for band in 0..band_count {
            let plane = &dst_buffer[band * band_size..(band + 1) * band_size];
            opts.dst.write_band(opts.dst_bands[band], dst, ty, plane)?;
        }

        Ok(())
    }

    /// Warp one destination window into a caller-supplied band-planar
    /// buffer of the working type.
    ///
    /// A zero source window means "estimate it from the destination
    /// window". Stages the source bands, materializes the mask planes the
    /// configuration asks for, and invokes the kernel.
    pub fn warp_region_to_buffer(
        &self,
        dst: Window,
        buf: &mut [u8],
        buf_type: PixelType,
        src: Window,
    ) -> Result<()> {
        let opts = self.opts()?;
        let ty = opts.working()?;

        if buf_type != ty {
            return Err(WarpError::ConfigInvalid(format!(
                "buffer type {buf_type} does not match working type {ty}"
            )));
        }

        if dst.is_empty() {
            return Ok(());
        }

        let src = if src.width == 0 && src.height == 0 {
            self.compute_source_window(dst)?
        } else {
            src
        };

        let word = ty.word_size();
        let band_count = opts.band_count();
        let band_size = word * dst.pixel_count();
        if buf.len() < band_size * band_count {
            return Err(WarpError::ConfigInvalid(
                "destination buffer too small for the requested window".into(),
            ));
        }

        // Stage the source bands, one working-type plane per mapped band.
        let mut src_bands = Vec::with_capacity(band_count);
        for band in 0..band_count {
            let mut plane = pixel::try_alloc("source band buffer", word * src.pixel_count())?;
            if !src.is_empty() {
                opts.src.read_band(opts.src_bands[band], src, ty, &mut plane)?;
            }
            src_bands.push(plane);
        }

        let dst_bands: Vec<&mut [u8]> = buf[..band_size * band_count]
            .chunks_exact_mut(band_size)
            .collect();

        let mut call = KernelCall {
            resample: opts.resample_alg,
            working_type: ty,
            band_count,
            transformer: Arc::clone(&opts.transformer),
            progress: Arc::clone(&opts.progress),
            progress_base: self.progress_base,
            progress_scale: self.progress_scale,
            warp_options: opts.warp_options.clone(),
            src_window: src,
            dst_window: dst,
            src_bands,
            dst_bands,
            band_src_valid: None,
            unified_src_valid: None,
            unified_src_density: None,
            dst_valid: None,
            dst_density: None,
        };

        // Per-band source validity hook.
        if let Some(gen) = &opts.band_src_validity_gen {
            for band in 0..band_count {
                call.create_mask(Some(band), "BandSrcValid")?;
                let views: Vec<&[u8]> = call.src_bands.iter().map(|p| p.as_slice()).collect();
                if let Some(planes) = call.band_src_valid.as_mut() {
                    if let Some(plane) = planes[band].as_mut() {
                        gen.generate(src, ty, Some(band), &views, plane)?;
                    }
                }
            }
        }

        // Per-band source no-data clears validity bits at matching pixels.
        if let (Some(re), Some(im)) = (&opts.src_nodata_real, &opts.src_nodata_imag) {
            for band in 0..band_count {
                call.create_mask(Some(band), "BandSrcValid")?;
                if let Some(planes) = call.band_src_valid.as_mut() {
                    if let Some(plane) = planes[band].as_mut() {
                        mask::mask_nodata(ty, (re[band], im[band]), &call.src_bands[band], plane);
                    }
                }
            }
        }

        if let Some(gen) = &opts.src_validity_gen {
            call.create_mask(None, "UnifiedSrcValid")?;
            let views: Vec<&[u8]> = call.src_bands.iter().map(|p| p.as_slice()).collect();
            if let Some(plane) = call.unified_src_valid.as_mut() {
                gen.generate(src, ty, None, &views, plane)?;
            }
        }

        if let Some(gen) = &opts.src_density_gen {
            call.create_mask(None, "UnifiedSrcDensity")?;
            let views: Vec<&[u8]> = call.src_bands.iter().map(|p| p.as_slice()).collect();
            if let Some(plane) = call.unified_src_density.as_mut() {
                gen.generate(src, ty, &views, plane)?;
            }
        }

        // Destination hooks see the staged destination planes.
        if let Some(gen) = &opts.dst_validity_gen {
            call.create_mask(None, "DstValid")?;
            let views: Vec<&[u8]> = call.dst_bands.iter().map(|p| &p[..]).collect();
            if let Some(plane) = call.dst_valid.as_mut() {
                gen.generate(dst, ty, None, &views, plane)?;
            }
        }

        if let Some(gen) = &opts.dst_density_gen {
            call.create_mask(None, "DstDensity")?;
            let views: Vec<&[u8]> = call.dst_bands.iter().map(|p| &p[..]).collect();
            if let Some(plane) = call.dst_density.as_mut() {
                gen.generate(dst, ty, &views, plane)?;
            }
        }

        self.kernel.perform(&mut call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::dataset::MemoryDataset;
    use crate::resample::ResampleAlg;
    use crate::transform::{AffineTransformer, PointTransformer};
    use std::sync::Mutex;

    /// Transformer wrapping the identity map, marking only the first
    /// `survivors` points of each batch successful and shifting x by
    /// `x_shift`. Also records batch sizes.
    struct SelectiveTransformer {
        survivors: usize,
        x_shift: f64,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl SelectiveTransformer {
        fn new(survivors: usize, x_shift: f64) -> Self {
            Self {
                survivors,
                x_shift,
                batch_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    impl PointTransformer for SelectiveTransformer {
        fn transform_points(
            &self,
            _dst_to_src: bool,
            x: &mut [f64],
            _y: &mut [f64],
            _z: &mut [f64],
            success: &mut [bool],
        ) -> bool {
            if let Ok(mut sizes) = self.batch_sizes.lock() {
                sizes.push(x.len());
            }
            for i in 0..x.len() {
                x[i] += self.x_shift;
                success[i] = i < self.survivors;
            }
            true
        }
    }

    /// Transformer that rejects every batch outright.
    struct RejectingTransformer;

    impl PointTransformer for RejectingTransformer {
        fn transform_points(
            &self,
            _dst_to_src: bool,
            _x: &mut [f64],
            _y: &mut [f64],
            _z: &mut [f64],
            _success: &mut [bool],
        ) -> bool {
            false
        }
    }

    /// Kernel recording the chunk windows it was handed.
    struct RecordingKernel {
        chunks: Mutex<Vec<(Window, Window)>>,
    }

    impl RecordingKernel {
        fn new() -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
            }
        }
    }

    impl WarpKernel for RecordingKernel {
        fn perform(&self, call: &mut KernelCall<'_>) -> Result<()> {
            if let Ok(mut chunks) = self.chunks.lock() {
                chunks.push((call.dst_window, call.src_window));
            }
            Ok(())
        }
    }

    fn byte_options(size: usize) -> WarpOptions {
        let src = Arc::new(MemoryDataset::new(size, size, &[PixelType::Byte]));
        let dst = Arc::new(MemoryDataset::new(size, size, &[PixelType::Byte]));
        WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()))
    }

    fn initialized(opts: &WarpOptions) -> WarpOperation {
        let mut op = WarpOperation::new();
        op.initialize(opts).unwrap();
        op
    }

    #[test]
    fn test_initialize_wipe_reinitialize() {
        let opts = byte_options(8);
        let mut op = WarpOperation::new();
        assert!(op.options().is_none());

        op.initialize(&opts).unwrap();
        let first: (Vec<usize>, Option<PixelType>, f64) = {
            let o = op.options().unwrap();
            (o.src_bands.clone(), o.working_type, o.memory_limit)
        };

        op.wipe();
        assert!(op.options().is_none());
        op.wipe(); // idempotent

        op.initialize(&opts).unwrap();
        let o = op.options().unwrap();
        assert_eq!(o.src_bands, first.0);
        assert_eq!(o.working_type, first.1);
        assert_eq!(o.memory_limit, first.2);
    }

    #[test]
    fn test_failed_initialize_discards_options() {
        let mut opts = byte_options(8);
        opts.memory_limit = 1.0;
        let mut op = WarpOperation::new();
        assert!(op.initialize(&opts).is_err());
        assert!(op.options().is_none());
        assert!(matches!(
            op.chunk_and_warp(Window::new(0, 0, 8, 8)),
            Err(WarpError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_source_window_identity() {
        let op = initialized(&byte_options(10));
        let win = op.compute_source_window(Window::new(0, 0, 10, 10)).unwrap();
        assert_eq!(win, Window::new(0, 0, 10, 10));
    }

    #[test]
    fn test_source_window_samples_84_points() {
        let transformer = Arc::new(SelectiveTransformer::new(usize::MAX, 0.0));
        let mut opts = byte_options(10);
        opts.transformer = Arc::clone(&transformer) as Arc<dyn PointTransformer>;
        let op = initialized(&opts);
        op.compute_source_window(Window::new(0, 0, 10, 10)).unwrap();
        assert_eq!(*transformer.batch_sizes.lock().unwrap(), vec![84]);
    }

    #[test]
    fn test_source_window_cubic_half_width_formula() {
        // Destination window [0,100]x[0,100] maps linearly onto the AABB
        // [100.3, 200.7] x [50.2, 60.9] in source pixel space.
        let dst_affine = Affine::new(1.004, 0.0, 100.3, 0.0, 0.107, 50.2);
        let transformer = AffineTransformer::new(Affine::identity(), dst_affine).unwrap();

        let src = Arc::new(MemoryDataset::new(300, 300, &[PixelType::Byte]));
        let dst = Arc::new(MemoryDataset::new(100, 100, &[PixelType::Byte]));
        let mut opts = WarpOptions::new(src, dst, Arc::new(transformer));
        opts.resample_alg = ResampleAlg::Cubic;
        let op = initialized(&opts);

        let win = op.compute_source_window(Window::new(0, 0, 100, 100)).unwrap();
        assert_eq!(win, Window::new(102, 52, 101, 11));
    }

    #[test]
    fn test_source_window_survivor_thresholds() {
        // Exactly 10 survivors is accepted, 9 is not.
        let mut opts = byte_options(1000);
        opts.transformer = Arc::new(SelectiveTransformer::new(10, 0.0));
        let op = initialized(&opts);
        assert!(op.compute_source_window(Window::new(0, 0, 100, 100)).is_ok());

        let mut opts = byte_options(1000);
        opts.transformer = Arc::new(SelectiveTransformer::new(9, 0.0));
        let op = initialized(&opts);
        assert!(matches!(
            op.compute_source_window(Window::new(0, 0, 100, 100)),
            Err(WarpError::Transform(_))
        ));
    }

    #[test]
    fn test_source_window_is_bbox_of_survivors() {
        // 12 surviving points, shifted by +7 in x. The survivors are the
        // first three sample groups, whose AABB is [7, 107] x [0, 100].
        let mut opts = byte_options(1000);
        opts.transformer = Arc::new(SelectiveTransformer::new(12, 7.0));
        let op = initialized(&opts);
        let win = op.compute_source_window(Window::new(0, 0, 100, 100)).unwrap();
        assert_eq!(win, Window::new(7, 0, 100, 100));
    }

    #[test]
    fn test_source_window_whole_batch_rejected() {
        let mut opts = byte_options(10);
        opts.transformer = Arc::new(RejectingTransformer);
        let op = initialized(&opts);
        assert!(matches!(
            op.compute_source_window(Window::new(0, 0, 10, 10)),
            Err(WarpError::Transform(_))
        ));
        // And the failure propagates out of the chunker.
        let mut op = op;
        assert!(matches!(
            op.chunk_and_warp(Window::new(0, 0, 10, 10)),
            Err(WarpError::Transform(_))
        ));
    }

    #[test]
    fn test_source_window_clipped_to_source_bounds() {
        // Destination extends past the 10x10 source; window is clipped.
        let src = Arc::new(MemoryDataset::new(10, 10, &[PixelType::Byte]));
        let dst = Arc::new(MemoryDataset::new(20, 20, &[PixelType::Byte]));
        let opts = WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()));
        let op = initialized(&opts);
        let win = op.compute_source_window(Window::new(0, 0, 20, 20)).unwrap();
        assert_eq!(win, Window::new(0, 0, 10, 10));
    }

    #[test]
    fn test_chunker_tiles_exactly() {
        // 64x64 bytes cost 8192 bytes per side; a 100000-byte limit is the
        // validation floor, so grow the raster instead: 512x512 costs
        // 2 * 262144 bytes and must split until chunks fit.
        let kernel = Arc::new(RecordingKernel::new());
        let mut op = WarpOperation::with_kernel(Arc::clone(&kernel) as Arc<dyn WarpKernel>);
        let mut opts = byte_options(512);
        opts.memory_limit = 100_000.0;
        opts.set_option("INIT_DEST", "0");
        op.initialize(&opts).unwrap();

        op.chunk_and_warp(Window::new(0, 0, 512, 512)).unwrap();

        let chunks = kernel.chunks.lock().unwrap();
        assert!(chunks.len() > 1, "expected at least one split");

        // Every chunk fits the budget (1 byte/pixel on each side).
        for (dst, src) in chunks.iter() {
            assert!(dst.pixel_count() + src.pixel_count() <= 100_000);
        }

        // The chunks tile the destination exactly: no overlap, no gap.
        let mut covered = vec![false; 512 * 512];
        for (dst, _) in chunks.iter() {
            for row in dst.y_off..dst.y_off + dst.height {
                for col in dst.x_off..dst.x_off + dst.width {
                    let idx = row * 512 + col;
                    assert!(!covered[idx], "overlapping chunks at ({col}, {row})");
                    covered[idx] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c), "gap in chunk coverage");
    }

    #[test]
    fn test_chunker_splits_longer_dimension_lower_first() {
        let kernel = Arc::new(RecordingKernel::new());
        let mut op = WarpOperation::with_kernel(Arc::clone(&kernel) as Arc<dyn WarpKernel>);
        let src = Arc::new(MemoryDataset::new(512, 8, &[PixelType::Byte]));
        let dst = Arc::new(MemoryDataset::new(512, 8, &[PixelType::Byte]));
        let mut opts = WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()));
        opts.memory_limit = 100_000.0;
        opts.set_option("INIT_DEST", "0");
        op.initialize(&opts).unwrap();

        // 512x8 = 4096 px per side -> 8192 bytes, under budget: no split.
        op.chunk_and_warp(Window::new(0, 0, 512, 8)).unwrap();
        assert_eq!(kernel.chunks.lock().unwrap().len(), 1);

        // Shrink the budget below the cost to force a width split.
        let kernel = Arc::new(RecordingKernel::new());
        let mut op = WarpOperation::with_kernel(Arc::clone(&kernel) as Arc<dyn WarpKernel>);
        let src = Arc::new(MemoryDataset::new(1024, 128, &[PixelType::Float64]));
        let dst = Arc::new(MemoryDataset::new(1024, 128, &[PixelType::Float64]));
        let mut opts = WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()));
        opts.memory_limit = 1_100_000.0;
        opts.set_option("INIT_DEST", "0");
        op.initialize(&opts).unwrap();

        // 1024x128 f64 = 1 MiB per side > budget: one split along width.
        op.chunk_and_warp(Window::new(0, 0, 1024, 128)).unwrap();
        let chunks = kernel.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, Window::new(0, 0, 512, 128));
        assert_eq!(chunks[1].0, Window::new(512, 0, 512, 128));
    }

    #[test]
    fn test_chunker_terminates_at_two_pixels() {
        // ~1700 Float64 bands make even a 2x2 chunk exceed the floor
        // budget; the chunker must still execute those chunks.
        let bands = vec![PixelType::Float64; 1700];
        let kernel = Arc::new(RecordingKernel::new());
        let mut op = WarpOperation::with_kernel(Arc::clone(&kernel) as Arc<dyn WarpKernel>);
        let src = Arc::new(MemoryDataset::new(4, 4, &bands));
        let dst = Arc::new(MemoryDataset::new(4, 4, &bands));
        let mut opts = WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()));
        opts.memory_limit = 100_000.0;
        opts.set_option("INIT_DEST", "0");
        op.initialize(&opts).unwrap();

        op.chunk_and_warp(Window::new(0, 0, 4, 4)).unwrap();
        let chunks = kernel.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 4);
        for (dst, src) in chunks.iter() {
            assert!(dst.width <= 2 && dst.height <= 2);
            // Still over budget, executed anyway.
            assert!((8.0 * 1700.0 * (dst.pixel_count() + src.pixel_count()) as f64) > 100_000.0);
        }
    }

    #[test]
    fn test_progress_state_restored_after_call() {
        let mut op = WarpOperation::new();
        let mut opts = byte_options(512);
        opts.memory_limit = 100_000.0;
        opts.set_option("INIT_DEST", "0");
        op.initialize(&opts).unwrap();

        assert_eq!((op.progress_base, op.progress_scale), (0.0, 1.0));
        op.chunk_and_warp(Window::new(0, 0, 512, 512)).unwrap();
        assert_eq!((op.progress_base, op.progress_scale), (0.0, 1.0));

        // Also restored on failure.
        let mut opts = byte_options(512);
        opts.memory_limit = 100_000.0;
        opts.transformer = Arc::new(RejectingTransformer);
        op.initialize(&opts).unwrap();
        assert!(op.chunk_and_warp(Window::new(0, 0, 512, 512)).is_err());
        assert_eq!((op.progress_base, op.progress_scale), (0.0, 1.0));
    }

    /// Validity generator clearing the bit at source pixel 0.
    struct ClearFirstPixel;

    impl crate::warp::options::ValidityMaskGenerator for ClearFirstPixel {
        fn generate(
            &self,
            _window: Window,
            _working_type: PixelType,
            _band: Option<usize>,
            _bands: &[&[u8]],
            mask: &mut crate::mask::BitMask,
        ) -> Result<()> {
            mask.clear(0);
            Ok(())
        }
    }

    #[test]
    fn test_unified_validity_generator_masks_source() {
        let src = Arc::new(MemoryDataset::new(2, 2, &[PixelType::Byte]));
        src.set_band_values(1, &[5.0, 6.0, 7.0, 8.0]).unwrap();
        let dst = Arc::new(MemoryDataset::new(2, 2, &[PixelType::Byte]));

        let mut opts = WarpOptions::new(
            Arc::clone(&src) as _,
            Arc::clone(&dst) as _,
            Arc::new(AffineTransformer::identity()),
        );
        opts.src_validity_gen = Some(Arc::new(ClearFirstPixel));
        opts.set_option("INIT_DEST", "99");
        let op = initialized(&opts);
        op.warp_region(Window::new(0, 0, 2, 2), Window::new(0, 0, 2, 2))
            .unwrap();

        // Source pixel 0 was vetoed by the generated unified mask, so the
        // destination keeps the initialization value there.
        assert_eq!(dst.band_values(1).unwrap(), vec![99.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_buffer_type_must_match_working_type() {
        let op = initialized(&byte_options(4));
        let mut buf = vec![0u8; 16 * 8];
        assert!(matches!(
            op.warp_region_to_buffer(
                Window::new(0, 0, 4, 4),
                &mut buf,
                PixelType::Float64,
                Window::default(),
            ),
            Err(WarpError::ConfigInvalid(_))
        ));
    }

    /// Dataset whose reads fail for a chosen band.
    struct FailingReadDataset {
        inner: MemoryDataset,
        failing_band: usize,
    }

    impl crate::dataset::RasterDataset for FailingReadDataset {
        fn raster_size(&self) -> (usize, usize) {
            self.inner.raster_size()
        }
        fn band_count(&self) -> usize {
            self.inner.band_count()
        }
        fn band_type(&self, band: usize) -> PixelType {
            self.inner.band_type(band)
        }
        fn read_band(
            &self,
            band: usize,
            window: Window,
            ty: PixelType,
            out: &mut [u8],
        ) -> Result<()> {
            if band == self.failing_band {
                return Err(WarpError::Io("simulated read failure".into()));
            }
            self.inner.read_band(band, window, ty, out)
        }
        fn write_band(&self, band: usize, window: Window, ty: PixelType, data: &[u8]) -> Result<()> {
            self.inner.write_band(band, window, ty, data)
        }
    }

    #[test]
    fn test_read_failure_propagates_from_region_executor() {
        // The second source band fails mid-stage; the chunk aborts with an
        // I/O error after the first band was already allocated and read.
        let src = Arc::new(FailingReadDataset {
            inner: MemoryDataset::new(4, 4, &[PixelType::Byte, PixelType::Byte]),
            failing_band: 2,
        });
        let dst = Arc::new(MemoryDataset::new(4, 4, &[PixelType::Byte, PixelType::Byte]));
        let opts = WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()));
        let op = initialized(&opts);
        assert!(matches!(
            op.warp_region(Window::new(0, 0, 4, 4), Window::new(0, 0, 4, 4)),
            Err(WarpError::Io(_))
        ));

        // A failing destination read-back (INIT_DEST absent) aborts too.
        let src = Arc::new(MemoryDataset::new(4, 4, &[PixelType::Byte]));
        let dst = Arc::new(FailingReadDataset {
            inner: MemoryDataset::new(4, 4, &[PixelType::Byte]),
            failing_band: 1,
        });
        let opts = WarpOptions::new(src, dst, Arc::new(AffineTransformer::identity()));
        let op = initialized(&opts);
        assert!(matches!(
            op.warp_region(Window::new(0, 0, 4, 4), Window::new(0, 0, 4, 4)),
            Err(WarpError::Io(_))
        ));
    }
}
