//! Input device bus: discovers devices through native backends, describes
//! each one with a synthesized HID report descriptor and serves its input
//! reports to blocking readers.

mod backend;
mod bus;
pub mod classify;
mod device;
mod error;
mod events;
mod handle;
mod options;
mod pending;
pub mod pseudo;
mod queue;
mod registry;
mod types;

pub use hidbus_report as report;

pub use crate::bus::Bus;
pub use crate::error::{Error, Result, Status};
pub use crate::events::{Notification, NotificationReceiver};
pub use crate::handle::DeviceHandle;
pub use crate::options::{parse_options, BusOptions, PlatformOptions, SdlOptions, UdevOptions};
pub use crate::pending::ReadTicket;
pub use crate::pseudo::PseudoInput;
pub use crate::types::{BusId, DeviceDesc, DeviceInfo, DeviceRef, NativeHandle};
