//! Warp orchestration: options, per-chunk kernel descriptors and the
//! chunked operation driver.

mod kernel;
mod operation;
mod options;

pub use kernel::{KernelCall, ResampleKernel, WarpKernel};
pub use operation::WarpOperation;
pub use options::{
    DensityMaskGenerator, ProgressFn, ValidityMaskGenerator, WarpOptions,
};
