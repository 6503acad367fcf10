//! Error types for pixel operations.

use thiserror::Error;

/// Error type for pixel operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpsError {
    /// Invalid dimensions specified.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Buffer length does not match the declared image size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for pixel operations.
pub type OpsResult<T> = Result<T, OpsError>;

/// Checks that `data` holds exactly `width * height * bpp` bytes.
pub(crate) fn check_len(data: &[u8], width: u32, height: u32, bpp: usize) -> OpsResult<()> {
    let expected = width as usize * height as usize * bpp;
    if data.len() != expected {
        return Err(OpsError::SizeMismatch { expected, actual: data.len() });
    }
    Ok(())
}
