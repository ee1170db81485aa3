//! Coordinate transformer collaborator interface.

use crate::affine::Affine;
use crate::error::Result;

/// Batch pixel-coordinate transformer between destination and source rasters.
///
/// Coordinates are transformed in place. `success` receives a per-point
/// flag; a `false` return value means the whole batch was rejected. The
/// warp engine always calls with `dst_to_src = true`.
pub trait PointTransformer: Send + Sync {
    fn transform_points(
        &self,
        dst_to_src: bool,
        x: &mut [f64],
        y: &mut [f64],
        z: &mut [f64],
        success: &mut [bool],
    ) -> bool;
}

/// Transformer composing two affine geotransforms: destination pixel
/// coordinates are mapped through the destination geotransform into
/// projected space and back through the inverse source geotransform.
///
/// Both rasters must share a projected coordinate system; reprojection
/// between coordinate systems is out of scope for this transformer.
pub struct AffineTransformer {
    src_fwd: Affine,
    src_inv: Affine,
    dst_fwd: Affine,
    dst_inv: Affine,
}

impl AffineTransformer {
    pub fn new(src: Affine, dst: Affine) -> Result<Self> {
        Ok(Self {
            src_inv: src.inverse()?,
            dst_inv: dst.inverse()?,
            src_fwd: src,
            dst_fwd: dst,
        })
    }

    /// Maps destination pixel coordinates 1:1 onto source pixel coordinates.
    pub fn identity() -> Self {
        let ident = Affine::identity();
        Self {
            src_fwd: ident,
            src_inv: ident,
            dst_fwd: ident,
            dst_inv: ident,
        }
    }
}

impl PointTransformer for AffineTransformer {
    fn transform_points(
        &self,
        dst_to_src: bool,
        x: &mut [f64],
        y: &mut [f64],
        _z: &mut [f64],
        success: &mut [bool],
    ) -> bool {
        let (fwd, inv) = if dst_to_src {
            (&self.dst_fwd, &self.src_inv)
        } else {
            (&self.src_fwd, &self.dst_inv)
        };
        for i in 0..x.len() {
            let (wx, wy) = fwd.forward(x[i], y[i]);
            let (px, py) = inv.forward(wx, wy);
            x[i] = px;
            y[i] = py;
            success[i] = px.is_finite() && py.is_finite();
        }
        true
    }
}
