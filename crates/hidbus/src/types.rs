use std::fmt;

/// Identifier of the backend family a device was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId(&'static str);

impl BusId {
    pub const SDL: BusId = BusId("SDLJOY");
    pub const HIDRAW: BusId = BusId("HIDRAW");
    pub const EVDEV: BusId = BusId("LNXEV");
    pub const PLATFORM: BusId = BusId("IOHID");
    pub const PSEUDO: BusId = BusId("VIRTUAL");

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Backend-specific device key, unique within one bus id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

/// Consumer-facing device reference, never reused during a bus lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceRef(pub u64);

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device meta information that remains stable across events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDesc {
    pub bus: BusId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
    /// Interface number, when the device exposes one.
    pub interface: Option<u16>,
    pub is_gamepad: bool,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

impl DeviceDesc {
    pub fn new(bus: BusId) -> Self {
        Self {
            bus,
            vendor_id: 0,
            product_id: 0,
            version: 0,
            interface: None,
            is_gamepad: false,
            manufacturer: String::new(),
            product: String::new(),
            serial: String::new(),
        }
    }
}

impl fmt::Display for DeviceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:04x}:{:04x} \"{}\"",
            self.bus, self.vendor_id, self.product_id, self.product
        )?;
        if self.is_gamepad {
            f.write_str(" gamepad")?;
        }
        Ok(())
    }
}

/// Snapshot of a registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub reference: DeviceRef,
    pub handle: NativeHandle,
    pub desc: DeviceDesc,
}
