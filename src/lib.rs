//! Memory-bounded raster warp orchestration.
//!
//! Given a source raster, a destination raster, a pixel-to-pixel
//! coordinate transformer and a resampling algorithm, [`WarpOperation`]
//! produces destination pixels by recursively chunking the destination
//! region to a memory budget, estimating the source window for each chunk
//! from edge-sampled inverse transforms, staging band buffers and
//! validity/density mask planes, and handing each chunk to a low-level
//! [`WarpKernel`].
//!
//! Raster I/O, the coordinate transform and the resampling kernel are
//! collaborators behind traits; in-memory implementations of all three
//! ship with the crate.

pub mod affine;
pub mod dataset;
pub mod error;
pub mod mask;
pub mod pixel;
pub mod resample;
pub mod transform;
pub mod warp;

pub use affine::Affine;
pub use dataset::{MemoryDataset, RasterDataset, Window};
pub use error::{Result, WarpError};
pub use mask::BitMask;
pub use pixel::PixelType;
pub use resample::ResampleAlg;
pub use transform::{AffineTransformer, PointTransformer};
pub use warp::{
    DensityMaskGenerator, KernelCall, ProgressFn, ResampleKernel, ValidityMaskGenerator,
    WarpKernel, WarpOperation, WarpOptions,
};
