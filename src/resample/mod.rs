//! Resampling kernels for the warp engine.

pub mod bilinear;
pub mod cubic;
pub mod nearest;

/// Resampling algorithms accepted by the warp engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResampleAlg {
    Nearest,
    Bilinear,
    Cubic,
}

impl ResampleAlg {
    /// Parse from a string name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nearest" => Some(Self::Nearest),
            "bilinear" => Some(Self::Bilinear),
            "cubic" => Some(Self::Cubic),
            _ => None,
        }
    }

    /// Radius in source pixels of the kernel's support.
    ///
    /// Also the half-width the source-window estimator pads with.
    pub fn half_width(&self) -> usize {
        match self {
            Self::Nearest => 0,
            Self::Bilinear => 1,
            Self::Cubic => 2,
        }
    }
}
