//! Warp configuration: options record, defaulting and validation.

use std::sync::Arc;

use crate::dataset::{RasterDataset, Window};
use crate::error::{Result, WarpError};
use crate::mask::BitMask;
use crate::pixel::PixelType;
use crate::resample::ResampleAlg;
use crate::transform::PointTransformer;

/// Progress callback: receives the overall completion fraction in [0, 1]
/// and returns `true` to continue, `false` to request cancellation.
pub type ProgressFn = Arc<dyn Fn(f64) -> bool + Send + Sync>;

/// Hook filling a 1-bit validity plane.
///
/// `band` is `Some` for per-band invocations (0-based position in the band
/// mapping) and `None` for unified planes. `bands` holds the working-type
/// buffers of the side the mask belongs to.
pub trait ValidityMaskGenerator: Send + Sync {
    fn generate(
        &self,
        window: Window,
        working_type: PixelType,
        band: Option<usize>,
        bands: &[&[u8]],
        mask: &mut BitMask,
    ) -> Result<()>;
}

/// Hook filling a 32-bit float density plane (0 = absent, 1 = full weight).
pub trait DensityMaskGenerator: Send + Sync {
    fn generate(
        &self,
        window: Window,
        working_type: PixelType,
        bands: &[&[u8]],
        density: &mut [f32],
    ) -> Result<()>;
}

/// Configuration of a warp operation.
///
/// The operation deep-clones this record on initialization, so callers may
/// drop their copy immediately afterwards. Dataset handles, the
/// transformer, hooks and callbacks are shared references whose referents
/// must outlive the operation.
#[derive(Clone)]
pub struct WarpOptions {
    pub src: Arc<dyn RasterDataset>,
    pub dst: Arc<dyn RasterDataset>,

    /// Band mapping, 1-based, equal lengths. Empty on both sides at
    /// initialization defaults to the identity mapping when the datasets
    /// have the same band count.
    pub src_bands: Vec<usize>,
    pub dst_bands: Vec<usize>,

    /// Pixel type used for all in-memory data during the warp. Defaults to
    /// the type of the first mapped destination band.
    pub working_type: Option<PixelType>,

    pub resample_alg: ResampleAlg,

    /// Memory budget in bytes for a single chunk (source + destination
    /// buffers and mask planes). Zero defaults to 64 MiB.
    pub memory_limit: f64,

    /// Per-band source no-data, real and imaginary parts. Both present or
    /// both absent, lengths matching the band mapping.
    pub src_nodata_real: Option<Vec<f64>>,
    pub src_nodata_imag: Option<Vec<f64>>,
    pub dst_nodata_real: Option<Vec<f64>>,
    pub dst_nodata_imag: Option<Vec<f64>>,

    pub band_src_validity_gen: Option<Arc<dyn ValidityMaskGenerator>>,
    pub src_validity_gen: Option<Arc<dyn ValidityMaskGenerator>>,
    pub src_density_gen: Option<Arc<dyn DensityMaskGenerator>>,
    pub dst_validity_gen: Option<Arc<dyn ValidityMaskGenerator>>,
    pub dst_density_gen: Option<Arc<dyn DensityMaskGenerator>>,

    pub transformer: Arc<dyn PointTransformer>,
    pub progress: ProgressFn,

    /// Free-form string options. `INIT_DEST` is recognized by the region
    /// executor.
    pub warp_options: Vec<(String, String)>,
}

impl WarpOptions {
    pub fn new(
        src: Arc<dyn RasterDataset>,
        dst: Arc<dyn RasterDataset>,
        transformer: Arc<dyn PointTransformer>,
    ) -> Self {
        Self {
            src,
            dst,
            src_bands: Vec::new(),
            dst_bands: Vec::new(),
            working_type: None,
            resample_alg: ResampleAlg::Nearest,
            memory_limit: 0.0,
            src_nodata_real: None,
            src_nodata_imag: None,
            dst_nodata_real: None,
            dst_nodata_imag: None,
            band_src_validity_gen: None,
            src_validity_gen: None,
            src_density_gen: None,
            dst_validity_gen: None,
            dst_density_gen: None,
            transformer,
            progress: Arc::new(|_| true),
            warp_options: Vec::new(),
        }
    }

    /// Number of mapped bands.
    pub fn band_count(&self) -> usize {
        self.src_bands.len()
    }

    /// Fetch a string option by exact key.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.warp_options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_option(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.warp_options.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.warp_options.push((key.to_string(), value.to_string()));
        }
    }

    /// The resolved working type. Only valid after defaulting + validation.
    pub(crate) fn working(&self) -> Result<PixelType> {
        self.working_type
            .ok_or_else(|| WarpError::ConfigInvalid("working type not resolved".into()))
    }

    /// Apply initialization-time defaults: identity band mapping, working
    /// type from the first destination band, 64 MiB memory limit.
    pub(crate) fn apply_defaults(&mut self) {
        if self.src_bands.is_empty()
            && self.dst_bands.is_empty()
            && self.src.band_count() == self.dst.band_count()
        {
            let n = self.src.band_count();
            self.src_bands = (1..=n).collect();
            self.dst_bands = (1..=n).collect();
        }

        if self.working_type.is_none() {
            if let Some(&band) = self.dst_bands.first() {
                if band >= 1 && band <= self.dst.band_count() {
                    self.working_type = Some(self.dst.band_type(band));
                }
            }
        }

        if self.memory_limit == 0.0 {
            self.memory_limit = 64.0 * 1024.0 * 1024.0;
        }
    }

    /// Check the options record after defaulting. Emits one diagnostic and
    /// fails on the first violation.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.memory_limit < 100_000.0 {
            return Err(invalid(format!(
                "memory limit {} is unreasonably small",
                self.memory_limit
            )));
        }

        if self.src_bands.len() != self.dst_bands.len() {
            return Err(invalid(format!(
                "band mapping lengths differ: {} source vs {} destination",
                self.src_bands.len(),
                self.dst_bands.len()
            )));
        }

        if self.src_bands.is_empty() {
            return Err(invalid("no bands configured".into()));
        }

        if self.working_type.is_none() {
            return Err(invalid("working data type could not be resolved".into()));
        }

        for (i, &band) in self.src_bands.iter().enumerate() {
            if band < 1 || band > self.src.band_count() {
                return Err(invalid(format!(
                    "src_bands[{i}] = {band} is out of range for the source dataset"
                )));
            }
        }

        for (i, &band) in self.dst_bands.iter().enumerate() {
            if band < 1 || band > self.dst.band_count() {
                return Err(invalid(format!(
                    "dst_bands[{i}] = {band} is out of range for the destination dataset"
                )));
            }
            if !self.dst.band_writable(band) {
                return Err(invalid(format!("destination band {band} is read-only")));
            }
        }

        self.validate_nodata("source", &self.src_nodata_real, &self.src_nodata_imag)?;
        self.validate_nodata(
            "destination",
            &self.dst_nodata_real,
            &self.dst_nodata_imag,
        )?;

        Ok(())
    }

    fn validate_nodata(
        &self,
        side: &str,
        real: &Option<Vec<f64>>,
        imag: &Option<Vec<f64>>,
    ) -> Result<()> {
        match (real, imag) {
            (Some(_), None) => Err(invalid(format!(
                "{side} no-data real values set without imaginary values"
            ))),
            (Some(re), Some(im)) => {
                if re.len() != self.band_count() || im.len() != self.band_count() {
                    Err(invalid(format!(
                        "{side} no-data values must cover all {} bands",
                        self.band_count()
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Bits each source pixel costs under the current mask configuration.
    pub(crate) fn src_pixel_cost_bits(&self) -> Result<usize> {
        let mut cost = self.working()?.bits() * self.band_count();
        if self.src_density_gen.is_some() {
            cost += 32; // float mask
        }
        if self.band_src_validity_gen.is_some() || self.src_nodata_real.is_some() {
            cost += self.band_count(); // bit/band mask
        }
        if self.src_validity_gen.is_some() {
            cost += 1; // bit mask
        }
        Ok(cost)
    }

    /// Bits each destination pixel costs.
    pub(crate) fn dst_pixel_cost_bits(&self) -> Result<usize> {
        let mut cost = self.working()?.bits() * self.band_count();
        if self.dst_density_gen.is_some() {
            cost += 32;
        }
        if self.dst_nodata_real.is_some() || self.dst_validity_gen.is_some() {
            cost += self.band_count();
        }
        Ok(cost)
    }
}

fn invalid(msg: String) -> WarpError {
    log::debug!("warp options rejected: {msg}");
    WarpError::ConfigInvalid(msg)
}
