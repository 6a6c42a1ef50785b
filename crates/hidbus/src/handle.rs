use std::sync::Arc;

use hidbus_report::copy_descriptor;

use crate::error::{Error, Result};
use crate::pending::ReadTicket;
use crate::registry::DeviceEntry;
use crate::types::{DeviceDesc, DeviceInfo, DeviceRef};

/// A handle to a registered device, providing report I/O.
///
/// Handles stay valid after removal; every operation then fails with
/// [`Error::DeviceDeleted`].
#[derive(Clone)]
pub struct DeviceHandle {
    pub(crate) entry: Arc<DeviceEntry>,
}

impl DeviceHandle {
    pub fn reference(&self) -> DeviceRef {
        self.entry.reference
    }

    pub fn desc(&self) -> &DeviceDesc {
        &self.entry.desc
    }

    pub fn info(&self) -> DeviceInfo {
        self.entry.info()
    }

    /// Descriptor bytes as reported by the device.
    pub fn report_descriptor(&self) -> &[u8] {
        self.entry.native.report_descriptor()
    }

    /// Copies the descriptor into `buffer` and returns its length.
    pub fn get_report_descriptor(&self, buffer: &mut [u8]) -> Result<usize> {
        Ok(copy_descriptor(self.report_descriptor(), buffer)?)
    }

    /// Requests the next input report of at most `capacity` bytes.
    pub fn read_report(&self, capacity: usize) -> ReadTicket {
        self.entry.reads().read(capacity)
    }

    /// Most recent input report without waiting; empty before the first one.
    pub fn input_report(&self) -> Result<Vec<u8>> {
        self.entry.reads().last_report()
    }

    pub fn set_output_report(&self, report: &[u8]) -> Result<usize> {
        self.ensure_live()?;
        self.entry.native.set_output_report(report)
    }

    pub fn get_feature_report(&self, report: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        self.entry.native.get_feature_report(report)
    }

    pub fn set_feature_report(&self, report: &[u8]) -> Result<usize> {
        self.ensure_live()?;
        self.entry.native.set_feature_report(report)
    }

    pub fn is_removed(&self) -> bool {
        self.entry.reads().is_deleted()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_removed() {
            return Err(Error::DeviceDeleted);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("reference", &self.entry.reference)
            .field("desc", &self.entry.desc)
            .finish_non_exhaustive()
    }
}
