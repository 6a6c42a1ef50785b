use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::device::NativeDevice;
use crate::types::{BusId, DeviceDesc, DeviceInfo, NativeHandle};

/// Events carried from backend threads to the dispatch loop.
pub(crate) enum BusEvent {
    DeviceCreated {
        desc: DeviceDesc,
        handle: NativeHandle,
        device: Arc<dyn NativeDevice>,
    },
    DeviceRemoved {
        bus: BusId,
        handle: NativeHandle,
    },
    InputReport {
        bus: BusId,
        handle: NativeHandle,
        report: Vec<u8>,
    },
}

impl std::fmt::Debug for BusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusEvent::DeviceCreated { desc, handle, .. } => f
                .debug_struct("DeviceCreated")
                .field("desc", desc)
                .field("handle", handle)
                .finish_non_exhaustive(),
            BusEvent::DeviceRemoved { bus, handle } => f
                .debug_struct("DeviceRemoved")
                .field("bus", bus)
                .field("handle", handle)
                .finish(),
            BusEvent::InputReport {
                bus,
                handle,
                report,
            } => f
                .debug_struct("InputReport")
                .field("bus", bus)
                .field("handle", handle)
                .field("len", &report.len())
                .finish(),
        }
    }
}

/// Device lifecycle notifications broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A device has been registered and can be opened.
    Arrived(DeviceInfo),
    /// A device has been removed; its pending reads were failed.
    Removed(DeviceInfo),
}

/// Receiving end for notification subscription.
pub type NotificationReceiver = Receiver<Notification>;
