use thiserror::Error;

/// Crate-wide result type.
pub type Result<T = ()> = std::result::Result<T, WarpError>;

/// Failure kinds surfaced by the warp engine.
///
/// Every fallible operation returns one of these; there is no partial
/// recovery beyond what the individual operations document.
#[derive(Error, Debug)]
pub enum WarpError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("out of memory allocating {bytes} bytes for {what}")]
    OutOfMemory { what: &'static str, bytes: usize },

    #[error("raster I/O failed: {0}")]
    Io(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("operation aborted by progress callback")]
    Aborted,

    #[error("internal error: {0}")]
    Internal(String),
}
