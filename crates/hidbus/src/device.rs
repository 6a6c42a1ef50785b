use std::sync::{Mutex, MutexGuard, PoisonError};

use hidbus_report::haptics::RumbleEffect;
use hidbus_report::physical::ForceCommand;
use hidbus_report::{
    Error as ReportError, Haptics, OutputReport, PhysicalState, ReportDescriptor, RumbleReport,
};
use log::trace;

use crate::error::{Error, Result};

/// Per-device operations a backend exposes to consumers.
///
/// Reports passed in and out carry the report id in their first byte.
pub(crate) trait NativeDevice: Send + Sync {
    /// Called once the device is registered.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn report_descriptor(&self) -> &[u8];

    fn set_output_report(&self, report: &[u8]) -> Result<usize>;

    fn get_feature_report(&self, report: &mut [u8]) -> Result<usize>;

    fn set_feature_report(&self, report: &[u8]) -> Result<usize>;

    /// Called after the device is unregistered; releases native resources.
    fn stop(&self) {}
}

/// Motor control implemented by backends that can play effects.
pub(crate) trait Actuator: Send + Sync {
    fn rumble(&self, effect: RumbleEffect) -> Result<()>;

    fn force(&self, command: ForceCommand) -> Result<()> {
        let _ = command;
        Err(Error::Unsupported)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device whose descriptor was synthesized by this crate.
///
/// Output and feature reports are decoded against the descriptor and turned
/// into actuator calls.
pub(crate) struct VirtualDevice {
    descriptor: ReportDescriptor,
    haptics: Option<Mutex<Haptics>>,
    physical: Option<Mutex<PhysicalState>>,
    actuator: Option<Box<dyn Actuator>>,
}

impl VirtualDevice {
    pub fn new(descriptor: ReportDescriptor, actuator: Option<Box<dyn Actuator>>) -> Self {
        Self {
            haptics: descriptor.haptics().map(|ids| Mutex::new(Haptics::new(ids))),
            physical: descriptor
                .physical()
                .map(|_| Mutex::new(PhysicalState::default())),
            descriptor,
            actuator,
        }
    }

    pub fn descriptor(&self) -> &ReportDescriptor {
        &self.descriptor
    }

    fn actuator(&self) -> Result<&dyn Actuator> {
        self.actuator.as_deref().ok_or(Error::Unsupported)
    }

    fn haptics(&self, report_id: u8) -> Result<MutexGuard<'_, Haptics>> {
        self.haptics
            .as_ref()
            .map(|haptics| lock(haptics))
            .ok_or(Error::Report(ReportError::NotImplemented(report_id)))
    }
}

fn report_id(report: &[u8]) -> Result<u8> {
    report
        .first()
        .copied()
        .ok_or(Error::Report(ReportError::BufferTooSmall { required: 1 }))
}

impl NativeDevice for VirtualDevice {
    fn report_descriptor(&self) -> &[u8] {
        self.descriptor.as_bytes()
    }

    fn set_output_report(&self, report: &[u8]) -> Result<usize> {
        let id = report_id(report)?;
        match self.descriptor.decode_output(report)? {
            OutputReport::VendorRumble(rumble) => {
                trace!("vendor rumble {}/{}", rumble.left, rumble.right);
                self.actuator()?.rumble(RumbleEffect {
                    strong: rumble.left,
                    weak: rumble.right,
                    duration_ms: u32::MAX,
                })?;
                Ok(RumbleReport::REPORT_LEN)
            }
            OutputReport::HapticsWaveform(_) => {
                let (written, effect) = {
                    let mut haptics = self.haptics(id)?;
                    let written = haptics.set_output_waveform(id, report)?;
                    (written, haptics.rumble())
                };
                self.actuator()?.rumble(effect)?;
                Ok(written)
            }
            OutputReport::Physical(physical) => {
                let state = self
                    .physical
                    .as_ref()
                    .ok_or(Error::Report(ReportError::NotImplemented(id)))?;
                let command = lock(state).apply(physical)?;
                if let Some(command) = command {
                    trace!("force command {command:?}");
                    self.actuator()?.force(command)?;
                }
                Ok(report.len())
            }
        }
    }

    fn get_feature_report(&self, report: &mut [u8]) -> Result<usize> {
        let id = report_id(report)?;
        Ok(self.haptics(id)?.get_feature(id, report)?)
    }

    fn set_feature_report(&self, report: &[u8]) -> Result<usize> {
        let id = report_id(report)?;
        Ok(self.haptics(id)?.set_feature(id, report)?)
    }
}
