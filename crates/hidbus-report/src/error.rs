use thiserror::Error;

/// Errors produced while building descriptors or encoding/decoding reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Growing a descriptor or report buffer failed.
    #[error("Out of memory")]
    OutOfMemory,
    /// The caller's buffer cannot hold the result.
    #[error("Buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },
    /// No report with this id is handled.
    #[error("Report {0} not implemented")]
    NotImplemented(u8),
    /// A report field holds a value the device cannot accept.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// A report is shorter than its declared layout.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    /// A native sample lies outside the field's logical range.
    #[error("Value {value} outside logical range {min}..={max}")]
    OutOfRange { value: i32, min: i32, max: i32 },
    /// A builder call does not fit the declared layout.
    #[error("Invalid layout: {0}")]
    InvalidLayout(&'static str),
}

/// Convenient result alias for descriptor and report operations.
pub type Result<T> = std::result::Result<T, Error>;
