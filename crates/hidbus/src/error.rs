use thiserror::Error;

/// Error type for bus and device operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Descriptor building or report encoding failed.
    #[error(transparent)]
    Report(#[from] hidbus_report::Error),
    /// The device was removed while the operation was pending.
    #[error("Device deleted")]
    DeviceDeleted,
    /// A device with the same bus id and native handle is already known.
    #[error("Device already registered: {0}")]
    AlreadyRegistered(String),
    /// Failed to initialize a backend.
    #[error("Backend init failed: {0}")]
    BackendInit(String),
    /// Operation is not supported on the current device/backend.
    #[error("Operation unsupported")]
    Unsupported,
    /// A generic backend error.
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid options: {0}")]
    Options(#[from] serde_yaml::Error),
}

/// Convenient result alias for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Completion status reported to consumers of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// Carries the required buffer size.
    BufferTooSmall(usize),
    NotImplemented,
    DeviceDeleted,
    InvalidParameter,
    OutOfMemory,
    Unsuccessful,
}

impl Error {
    /// Maps the error onto the status a consumer observes.
    pub fn status(&self) -> Status {
        use hidbus_report::Error as ReportError;

        match self {
            Error::Report(err) => match err {
                ReportError::OutOfMemory => Status::OutOfMemory,
                ReportError::BufferTooSmall { required } => Status::BufferTooSmall(*required),
                ReportError::NotImplemented(_) => Status::NotImplemented,
                ReportError::InvalidParameter(_)
                | ReportError::SizeMismatch { .. }
                | ReportError::OutOfRange { .. } => Status::InvalidParameter,
                ReportError::InvalidLayout(_) => Status::Unsuccessful,
            },
            Error::DeviceDeleted => Status::DeviceDeleted,
            Error::Unsupported => Status::NotImplemented,
            Error::AlreadyRegistered(_)
            | Error::BackendInit(_)
            | Error::Backend(_)
            | Error::Io(_)
            | Error::Options(_) => Status::Unsuccessful,
        }
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_report_errors_to_status() {
        let err: Error = hidbus_report::Error::BufferTooSmall { required: 64 }.into();
        assert_eq!(err.status(), Status::BufferTooSmall(64));
        let err: Error = hidbus_report::Error::NotImplemented(9).into();
        assert_eq!(err.status(), Status::NotImplemented);
        let err: Error = hidbus_report::Error::SizeMismatch {
            expected: 5,
            actual: 2,
        }
        .into();
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn status_from_result() {
        let ok: Result<usize> = Ok(3);
        assert_eq!(Status::from(&ok), Status::Success);
        let deleted: Result<usize> = Err(Error::DeviceDeleted);
        assert_eq!(Status::from(&deleted), Status::DeviceDeleted);
    }
}
