//! Raster dataset collaborator interface and an in-memory implementation.

use std::sync::Mutex;

use crate::error::{Result, WarpError};
use crate::pixel::{self, PixelType};

/// An integer pixel rectangle on a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub x_off: usize,
    pub y_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(x_off: usize, y_off: usize, width: usize, height: usize) -> Self {
        Self {
            x_off,
            y_off,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Band-wise windowed pixel I/O on a raster dataset.
///
/// Band numbers are 1-based. Implementations convert between the band's
/// storage type and the caller-requested buffer type; failures surface as
/// [`WarpError::Io`].
pub trait RasterDataset: Send + Sync {
    /// (width, height) of the raster in pixels.
    fn raster_size(&self) -> (usize, usize);

    fn band_count(&self) -> usize;

    fn band_type(&self, band: usize) -> PixelType;

    fn band_writable(&self, _band: usize) -> bool {
        true
    }

    /// Read `window` of `band` into `out`, converting to `ty`.
    /// `out` must hold `ty.word_size() * window.pixel_count()` bytes.
    fn read_band(&self, band: usize, window: Window, ty: PixelType, out: &mut [u8]) -> Result<()>;

    /// Write `data` (of type `ty`) to `window` of `band`.
    fn write_band(&self, band: usize, window: Window, ty: PixelType, data: &[u8]) -> Result<()>;
}

struct BandPlane {
    ty: PixelType,
    writable: bool,
    data: Mutex<Vec<u8>>,
}

/// An in-memory multi-band raster with per-band storage types.
///
/// Planes start zero-filled. Windowed reads and writes convert between the
/// storage type and the requested buffer type pixel by pixel.
pub struct MemoryDataset {
    width: usize,
    height: usize,
    bands: Vec<BandPlane>,
}

impl MemoryDataset {
    pub fn new(width: usize, height: usize, band_types: &[PixelType]) -> Self {
        let bands = band_types
            .iter()
            .map(|&ty| BandPlane {
                ty,
                writable: true,
                data: Mutex::new(vec![0u8; ty.word_size() * width * height]),
            })
            .collect();
        Self {
            width,
            height,
            bands,
        }
    }

    /// Mark a band (1-based) read-only.
    pub fn set_read_only(&mut self, band: usize) {
        if let Some(plane) = self.bands.get_mut(band - 1) {
            plane.writable = false;
        }
    }

    fn plane(&self, band: usize) -> Result<&BandPlane> {
        self.bands
            .get(band.wrapping_sub(1))
            .ok_or_else(|| WarpError::Io(format!("band {band} does not exist")))
    }

    fn check_window(&self, window: Window) -> Result<()> {
        if window.x_off + window.width > self.width || window.y_off + window.height > self.height {
            return Err(WarpError::Io(format!(
                "window {}x{}+{}+{} exceeds raster size {}x{}",
                window.width, window.height, window.x_off, window.y_off, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Replace the full contents of a band (1-based) from `values`, given in
    /// row-major order and converted to the band's storage type.
    pub fn set_band_values(&self, band: usize, values: &[f64]) -> Result<()> {
        let plane = self.plane(band)?;
        if values.len() != self.width * self.height {
            return Err(WarpError::Io(format!(
                "expected {} values, got {}",
                self.width * self.height,
                values.len()
            )));
        }
        let mut data = lock(&plane.data)?;
        for (i, &v) in values.iter().enumerate() {
            pixel::put(&mut data, plane.ty, i, v, 0.0);
        }
        Ok(())
    }

    /// Full contents of a band (1-based) as real values, row-major.
    pub fn band_values(&self, band: usize) -> Result<Vec<f64>> {
        let plane = self.plane(band)?;
        let data = lock(&plane.data)?;
        Ok((0..self.width * self.height)
            .map(|i| pixel::get(&data, plane.ty, i).0)
            .collect())
    }
}

fn lock(data: &Mutex<Vec<u8>>) -> Result<std::sync::MutexGuard<'_, Vec<u8>>> {
    data.lock()
        .map_err(|_| WarpError::Io("band plane lock poisoned".into()))
}

impl RasterDataset for MemoryDataset {
    fn raster_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band_type(&self, band: usize) -> PixelType {
        self.bands
            .get(band.wrapping_sub(1))
            .map_or(PixelType::Byte, |p| p.ty)
    }

    fn band_writable(&self, band: usize) -> bool {
        self.bands
            .get(band.wrapping_sub(1))
            .is_some_and(|p| p.writable)
    }

    fn read_band(&self, band: usize, window: Window, ty: PixelType, out: &mut [u8]) -> Result<()> {
        let plane = self.plane(band)?;
        self.check_window(window)?;
        if out.len() < ty.word_size() * window.pixel_count() {
            return Err(WarpError::Io("read buffer too small for window".into()));
        }
        let data = lock(&plane.data)?;
        for row in 0..window.height {
            for col in 0..window.width {
                let src_idx = (window.y_off + row) * self.width + window.x_off + col;
                let (re, im) = pixel::get(&data, plane.ty, src_idx);
                pixel::put(out, ty, row * window.width + col, re, im);
            }
        }
        Ok(())
    }

    fn write_band(&self, band: usize, window: Window, ty: PixelType, data: &[u8]) -> Result<()> {
        let plane = self.plane(band)?;
        if !plane.writable {
            return Err(WarpError::Io(format!("band {band} is read-only")));
        }
        self.check_window(window)?;
        if data.len() < ty.word_size() * window.pixel_count() {
            return Err(WarpError::Io("write buffer too small for window".into()));
        }
        let mut stored = lock(&plane.data)?;
        for row in 0..window.height {
            for col in 0..window.width {
                let (re, im) = pixel::get(data, ty, row * window.width + col);
                let dst_idx = (window.y_off + row) * self.width + window.x_off + col;
                pixel::put(&mut stored, plane.ty, dst_idx, re, im);
            }
        }
        Ok(())
    }
}
