//! Gamepad classification shared by all backends.

use crate::types::DeviceDesc;

pub const VID_MICROSOFT: u16 = 0x045e;

const XBOX_PIDS: &[u16] = &[
    0x0202, // Xbox
    0x0285, // Xbox Controller S
    0x0289, // Xbox Controller S
    0x028e, // Xbox 360
    0x028f, // Xbox 360 wireless
    0x02d1, // Xbox One
    0x02dd, // Xbox One (2015 firmware)
    0x02e0, // Xbox One S (Bluetooth)
    0x02e3, // Xbox One Elite
    0x02e6, // Xbox wireless adapter
    0x02ea, // Xbox One S
    0x02fd, // Xbox One S (Bluetooth)
    0x0719, // Xbox 360 wireless adapter
];

/// Literal descriptors carry at most this many absolute axes.
pub const MAX_LITERAL_AXES: usize = 6;

pub fn is_xbox_gamepad(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == VID_MICROSOFT && XBOX_PIDS.contains(&product_id)
}

/// Exactly six axes and at least fourteen buttons.
pub fn is_gamepad_layout(axes: usize, buttons: usize) -> bool {
    axes == 6 && buttons >= 14
}

/// Sets the gamepad flag and gives gamepads interface 0 when none is known.
pub(crate) fn finalize(desc: &mut DeviceDesc, axes: usize, buttons: usize) {
    desc.is_gamepad = desc.is_gamepad
        || is_xbox_gamepad(desc.vendor_id, desc.product_id)
        || is_gamepad_layout(axes, buttons);
    if desc.is_gamepad && desc.interface.is_none() {
        desc.interface = Some(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BusId;

    #[test]
    fn layout_rule() {
        assert!(is_gamepad_layout(6, 14));
        assert!(is_gamepad_layout(6, 20));
        assert!(!is_gamepad_layout(6, 13));
        assert!(!is_gamepad_layout(7, 20));
        assert!(!is_gamepad_layout(5, 14));
    }

    #[test]
    fn xbox_ids() {
        assert!(is_xbox_gamepad(0x045e, 0x028e));
        assert!(is_xbox_gamepad(0x045e, 0x0719));
        assert!(!is_xbox_gamepad(0x045e, 0x0001));
        assert!(!is_xbox_gamepad(0x054c, 0x028e));
    }

    #[test]
    fn gamepads_get_interface_zero() {
        let mut desc = DeviceDesc::new(BusId::EVDEV);
        desc.vendor_id = 0x045e;
        desc.product_id = 0x02ea;
        finalize(&mut desc, 0, 0);
        assert!(desc.is_gamepad);
        assert_eq!(desc.interface, Some(0));

        let mut desc = DeviceDesc::new(BusId::HIDRAW);
        desc.interface = Some(2);
        finalize(&mut desc, 6, 15);
        assert_eq!(desc.interface, Some(2));

        let mut desc = DeviceDesc::new(BusId::HIDRAW);
        finalize(&mut desc, 3, 15);
        assert!(!desc.is_gamepad);
        assert_eq!(desc.interface, None);
    }
}
