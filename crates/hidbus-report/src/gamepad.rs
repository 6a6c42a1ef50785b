//! Canonical controller layout shared by every backend that remaps
//! controller-style devices.

use crate::codec::{AxisBits, AxisBlock, ButtonBlock, HatBlock, HatDirection};
use crate::descriptor::{DescriptorBuilder, ReportDescriptor, ReportKind};
use crate::error::{Error, Result};
use crate::usage::{generic, page};

pub const STICK_MIN: i32 = -32768;
pub const STICK_MAX: i32 = 32767;
pub const TRIGGER_MIN: i32 = 0;
pub const TRIGGER_MAX: i32 = 32767;

/// Number of buttons in the canonical layout.
pub const BUTTON_COUNT: u16 = 14;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CanonicalAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    LeftTrigger,
    RightTrigger,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CanonicalButton {
    A = 0,
    B = 1,
    X = 2,
    Y = 3,
    LeftShoulder = 4,
    RightShoulder = 5,
    Back = 6,
    Start = 7,
    LeftStick = 8,
    RightStick = 9,
    Guide = 10,
    Misc = 11,
    Paddle1 = 12,
    Paddle2 = 13,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DpadButton {
    Up,
    Down,
    Left,
    Right,
}

/// Pressed state of the four directional buttons folded into the hat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dpad {
    up: bool,
    down: bool,
    left: bool,
    right: bool,
}

impl Dpad {
    /// Records a press or release and returns the composed direction.
    pub fn update(&mut self, button: DpadButton, pressed: bool) -> HatDirection {
        match button {
            DpadButton::Up => self.up = pressed,
            DpadButton::Down => self.down = pressed,
            DpadButton::Left => self.left = pressed,
            DpadButton::Right => self.right = pressed,
        }
        self.direction()
    }

    pub fn direction(&self) -> HatDirection {
        HatDirection::from_dpad(self.up, self.down, self.left, self.right)
    }
}

/// Field positions of the canonical input report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GamepadLayout {
    left_stick: AxisBlock,
    right_stick: AxisBlock,
    triggers: AxisBlock,
    buttons: ButtonBlock,
    hat: HatBlock,
}

impl GamepadLayout {
    /// Appends the canonical input report fields. Must be called inside an
    /// open input report.
    pub fn append(builder: &mut DescriptorBuilder) -> Result<Self> {
        let left_stick = builder.add_axes(
            page::GENERIC,
            &[generic::X, generic::Y],
            false,
            AxisBits::Sixteen,
            STICK_MIN,
            STICK_MAX,
        )?;
        let right_stick = builder.add_axes(
            page::GENERIC,
            &[generic::RX, generic::RY],
            false,
            AxisBits::Sixteen,
            STICK_MIN,
            STICK_MAX,
        )?;
        let triggers = builder.add_axes(
            page::GENERIC,
            &[generic::Z, generic::RZ],
            false,
            AxisBits::Sixteen,
            TRIGGER_MIN,
            TRIGGER_MAX,
        )?;
        let buttons = builder.add_buttons(page::BUTTON, 1, BUTTON_COUNT)?;
        let hat = builder.add_hatswitch(1)?;
        builder.align_input()?;
        Ok(Self {
            left_stick,
            right_stick,
            triggers,
            buttons,
            hat,
        })
    }

    /// Builds a complete gamepad descriptor, optionally with haptics.
    pub fn descriptor(haptics: bool) -> Result<(ReportDescriptor, Self)> {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::GAMEPAD)?;
        builder.begin_report(ReportKind::Input)?;
        let layout = Self::append(&mut builder)?;
        builder.end_report()?;
        if haptics {
            builder.add_haptics()?;
        }
        Ok((builder.end()?, layout))
    }

    fn axis(&self, axis: CanonicalAxis) -> (&AxisBlock, u8) {
        match axis {
            CanonicalAxis::LeftX => (&self.left_stick, 0),
            CanonicalAxis::LeftY => (&self.left_stick, 1),
            CanonicalAxis::RightX => (&self.right_stick, 0),
            CanonicalAxis::RightY => (&self.right_stick, 1),
            CanonicalAxis::LeftTrigger => (&self.triggers, 0),
            CanonicalAxis::RightTrigger => (&self.triggers, 1),
        }
    }

    /// Stick values are -32768..=32767, trigger values 0..=32767.
    pub fn set_axis(&self, report: &mut [u8], axis: CanonicalAxis, value: i32) -> Result<()> {
        let (block, index) = self.axis(axis);
        block.set(report, index, value)
    }

    pub fn axis_value(&self, report: &[u8], axis: CanonicalAxis) -> Option<i32> {
        let (block, index) = self.axis(axis);
        block.get(report, index)
    }

    pub fn set_button(&self, report: &mut [u8], button: CanonicalButton, pressed: bool) {
        self.buttons.set(report, button as u16, pressed);
    }

    pub fn button(&self, report: &[u8], button: CanonicalButton) -> Option<bool> {
        self.buttons.get(report, button as u16)
    }

    pub fn set_hat(&self, report: &mut [u8], direction: HatDirection) -> Result<()> {
        self.hat.set(report, 0, direction)
    }

    pub fn hat(&self, report: &[u8]) -> Option<HatDirection> {
        self.hat.get(report, 0)
    }
}

/// Linearly maps `value` from one range onto another, clamping to the
/// target range.
pub fn rescale(value: i32, from: (i32, i32), to: (i32, i32)) -> Result<i32> {
    let (from_min, from_max) = from;
    let (to_min, to_max) = to;
    if from_min >= from_max || to_min > to_max {
        return Err(Error::InvalidParameter("empty range"));
    }
    let value = i64::from(value.clamp(from_min, from_max));
    let span = i64::from(from_max) - i64::from(from_min);
    let target = i64::from(to_max) - i64::from(to_min);
    let scaled = i64::from(to_min) + (value - i64::from(from_min)) * target / span;
    Ok(scaled as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::summarize;

    #[test]
    fn canonical_descriptor_shape() {
        let (desc, _) = GamepadLayout::descriptor(false).unwrap();
        let summary = summarize(desc.as_bytes()).unwrap();
        assert_eq!(summary.axes, 6);
        assert_eq!(summary.buttons, 14);
        assert_eq!(summary.hats, 1);
        assert_eq!(summary.top_usage, (page::GENERIC, generic::GAMEPAD));
        // id + 6 axes + 14 buttons + 4-bit hat + 6 padding bits
        assert_eq!(desc.input().size(), 1 + 12 + 3);
        assert_eq!(summary.max_input_len, desc.input().size());
    }

    #[test]
    fn haptics_ids_follow_input() {
        let (desc, _) = GamepadLayout::descriptor(true).unwrap();
        let ids = desc.haptics().unwrap();
        assert_eq!(desc.input().report_id(), Some(1));
        assert_eq!((ids.vendor_rumble, ids.features, ids.waveform), (1, 1, 2));
    }

    #[test]
    fn encodes_every_control() {
        let (desc, layout) = GamepadLayout::descriptor(false).unwrap();
        let mut report = vec![0u8; desc.input().size()];
        layout.set_axis(&mut report, CanonicalAxis::LeftX, -32768).unwrap();
        layout.set_axis(&mut report, CanonicalAxis::RightY, 1234).unwrap();
        layout.set_axis(&mut report, CanonicalAxis::RightTrigger, 32767).unwrap();
        layout.set_button(&mut report, CanonicalButton::Paddle2, true);
        layout.set_hat(&mut report, HatDirection::DownLeft).unwrap();

        assert_eq!(layout.axis_value(&report, CanonicalAxis::LeftX), Some(-32768));
        assert_eq!(layout.axis_value(&report, CanonicalAxis::RightY), Some(1234));
        assert_eq!(layout.axis_value(&report, CanonicalAxis::LeftTrigger), Some(0));
        assert_eq!(layout.button(&report, CanonicalButton::Paddle2), Some(true));
        assert_eq!(layout.button(&report, CanonicalButton::A), Some(false));
        assert_eq!(layout.hat(&report), Some(HatDirection::DownLeft));
        assert!(layout
            .set_axis(&mut report, CanonicalAxis::LeftTrigger, -1)
            .is_err());
    }

    #[test]
    fn dpad_composes_hat() {
        let mut dpad = Dpad::default();
        assert_eq!(dpad.update(DpadButton::Up, true), HatDirection::Up);
        assert_eq!(dpad.update(DpadButton::Right, true), HatDirection::UpRight);
        assert_eq!(dpad.update(DpadButton::Up, false), HatDirection::Right);
        assert_eq!(dpad.update(DpadButton::Right, false), HatDirection::Centered);
    }

    #[test]
    fn rescale_maps_ranges() {
        assert_eq!(rescale(0, (0, 255), (0, 32767)), Ok(0));
        assert_eq!(rescale(255, (0, 255), (0, 32767)), Ok(32767));
        assert_eq!(rescale(-1, (0, 1023), (0, 32767)), Ok(0));
        assert_eq!(rescale(127, (-128, 127), (-32768, 32767)), Ok(32767));
        assert!(rescale(1, (5, 5), (0, 1)).is_err());
    }
}
