//! Report synthesis for Linux input event devices.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::ptr;
use std::sync::{Arc, Mutex};

use hidbus_report::gamepad::{
    rescale, CanonicalAxis, CanonicalButton, Dpad, DpadButton, GamepadLayout, STICK_MAX,
    STICK_MIN, TRIGGER_MAX, TRIGGER_MIN,
};
use hidbus_report::haptics::RumbleEffect;
use hidbus_report::physical::{EffectParams, EffectType, ForceCommand, INFINITE_DURATION, MAX_EFFECTS};
use hidbus_report::usage::{consumer, digitizer, generic, page, simulation};
use hidbus_report::{
    AxisBits, AxisBlock, ButtonBlock, DescriptorBuilder, HatBlock, HatDirection, InputReport,
    ReportDescriptor, ReportKind,
};
use log::{debug, trace, warn};
use smallvec::SmallVec;

use super::ioctl::{self, FfConstant, FfEffect, FfEnvelope, FfParams, FfPeriodic, FfRumble};
use crate::classify::MAX_LITERAL_AXES;
use crate::device::{lock, Actuator};
use crate::error::{Error, Result};

pub(crate) const EV_SYN: u16 = 0x00;
pub(crate) const EV_KEY: u16 = 0x01;
pub(crate) const EV_REL: u16 = 0x02;
pub(crate) const EV_ABS: u16 = 0x03;
pub(crate) const EV_FF: u16 = 0x15;

pub(crate) const SYN_REPORT: u16 = 0;
pub(crate) const SYN_DROPPED: u16 = 3;

pub(crate) const BTN_MISC: u16 = 0x100;
pub(crate) const KEY_MAX: u16 = 0x2ff;
pub(crate) const ABS_HAT0X: u16 = 0x10;
pub(crate) const ABS_HAT3Y: u16 = 0x17;
pub(crate) const ABS_MAX: u16 = 0x3f;
pub(crate) const REL_MAX: u16 = 0x0f;
pub(crate) const FF_MAX: u16 = 0x7f;

const FF_RUMBLE: u16 = 0x50;
const FF_PERIODIC: u16 = 0x51;
const FF_CONSTANT: u16 = 0x52;
const FF_SQUARE: u16 = 0x58;
const FF_TRIANGLE: u16 = 0x59;
const FF_SINE: u16 = 0x5a;
const FF_SAW_UP: u16 = 0x5b;
const FF_SAW_DOWN: u16 = 0x5c;

const NONE: (u16, u16) = (0, 0);
const ABS_CODES: usize = 0x21;

/// Usage of each absolute axis code, indexed by code. Hat codes are handled
/// separately and map to nothing here.
static ABS_USAGES: [(u16, u16); ABS_CODES] = [
    (page::GENERIC, generic::X),                 // ABS_X
    (page::GENERIC, generic::Y),                 // ABS_Y
    (page::GENERIC, generic::Z),                 // ABS_Z
    (page::GENERIC, generic::RX),                // ABS_RX
    (page::GENERIC, generic::RY),                // ABS_RY
    (page::GENERIC, generic::RZ),                // ABS_RZ
    (page::SIMULATION, simulation::THROTTLE),    // ABS_THROTTLE
    (page::SIMULATION, simulation::RUDDER),      // ABS_RUDDER
    (page::GENERIC, generic::WHEEL),             // ABS_WHEEL
    (page::SIMULATION, simulation::ACCELERATOR), // ABS_GAS
    (page::SIMULATION, simulation::BRAKE),       // ABS_BRAKE
    NONE,
    NONE,
    NONE,
    NONE,
    NONE,
    NONE, // ABS_HAT0X
    NONE,
    NONE,
    NONE,
    NONE,
    NONE,
    NONE,
    NONE, // ABS_HAT3Y
    (page::DIGITIZER, digitizer::TIP_PRESSURE), // ABS_PRESSURE
    NONE,                                       // ABS_DISTANCE
    (page::DIGITIZER, digitizer::X_TILT),       // ABS_TILT_X
    (page::DIGITIZER, digitizer::Y_TILT),       // ABS_TILT_Y
    NONE,                                       // ABS_TOOL_WIDTH
    NONE,
    NONE,
    NONE,
    (page::CONSUMER, consumer::VOLUME), // ABS_VOLUME
];

static REL_USAGES: [(u16, u16); 10] = [
    (page::GENERIC, generic::X),     // REL_X
    (page::GENERIC, generic::Y),     // REL_Y
    (page::GENERIC, generic::Z),     // REL_Z
    (page::GENERIC, generic::RX),    // REL_RX
    (page::GENERIC, generic::RY),    // REL_RY
    (page::GENERIC, generic::RZ),    // REL_RZ
    NONE,                            // REL_HWHEEL
    (page::GENERIC, generic::DIAL),  // REL_DIAL
    (page::GENERIC, generic::WHEEL), // REL_WHEEL
    NONE,                            // REL_MISC
];

fn abs_usage(code: u16) -> Option<(u16, u16)> {
    ABS_USAGES
        .get(usize::from(code))
        .copied()
        .filter(|usage| *usage != NONE)
}

fn rel_usage(code: u16) -> Option<(u16, u16)> {
    REL_USAGES
        .get(usize::from(code))
        .copied()
        .filter(|usage| *usage != NONE)
}

fn is_hat(code: u16) -> bool {
    (ABS_HAT0X..=ABS_HAT3Y).contains(&code)
}

#[derive(Clone, Copy)]
enum Target {
    Button(CanonicalButton),
    Dpad(DpadButton),
    Axis(CanonicalAxis),
}

/// Key codes of evdev gamepads and where they land in the canonical layout.
static CANONICAL_KEYS: &[(u16, Target)] = &[
    (0x130, Target::Button(CanonicalButton::A)),             // BTN_SOUTH
    (0x131, Target::Button(CanonicalButton::B)),             // BTN_EAST
    (0x133, Target::Button(CanonicalButton::X)),             // BTN_NORTH
    (0x134, Target::Button(CanonicalButton::Y)),             // BTN_WEST
    (0x136, Target::Button(CanonicalButton::LeftShoulder)),  // BTN_TL
    (0x137, Target::Button(CanonicalButton::RightShoulder)), // BTN_TR
    (0x13a, Target::Button(CanonicalButton::Back)),          // BTN_SELECT
    (0x13b, Target::Button(CanonicalButton::Start)),         // BTN_START
    (0x13c, Target::Button(CanonicalButton::Guide)),         // BTN_MODE
    (0x13d, Target::Button(CanonicalButton::LeftStick)),     // BTN_THUMBL
    (0x13e, Target::Button(CanonicalButton::RightStick)),    // BTN_THUMBR
    (0x220, Target::Dpad(DpadButton::Up)),                   // BTN_DPAD_UP
    (0x221, Target::Dpad(DpadButton::Down)),                 // BTN_DPAD_DOWN
    (0x222, Target::Dpad(DpadButton::Left)),                 // BTN_DPAD_LEFT
    (0x223, Target::Dpad(DpadButton::Right)),                // BTN_DPAD_RIGHT
    (0x2c0, Target::Button(CanonicalButton::Misc)),          // BTN_TRIGGER_HAPPY1
    (0x2c1, Target::Button(CanonicalButton::Paddle1)),       // BTN_TRIGGER_HAPPY2
    (0x2c2, Target::Button(CanonicalButton::Paddle2)),       // BTN_TRIGGER_HAPPY3
];

static CANONICAL_ABS: &[(u16, Target)] = &[
    (0x00, Target::Axis(CanonicalAxis::LeftX)),        // ABS_X
    (0x01, Target::Axis(CanonicalAxis::LeftY)),        // ABS_Y
    (0x02, Target::Axis(CanonicalAxis::LeftTrigger)),  // ABS_Z
    (0x03, Target::Axis(CanonicalAxis::RightX)),       // ABS_RX
    (0x04, Target::Axis(CanonicalAxis::RightY)),       // ABS_RY
    (0x05, Target::Axis(CanonicalAxis::RightTrigger)), // ABS_RZ
    (0x09, Target::Axis(CanonicalAxis::RightTrigger)), // ABS_GAS
    (0x0a, Target::Axis(CanonicalAxis::LeftTrigger)),  // ABS_BRAKE
];

fn lookup(table: &[(u16, Target)], code: u16) -> Option<Target> {
    table
        .iter()
        .find(|(native, _)| *native == code)
        .map(|(_, target)| *target)
}

/// One absolute axis as reported by `EVIOCGABS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AbsAxis {
    pub code: u16,
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

/// What an event device can report and play.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Capabilities {
    pub top_usage: (u16, u16),
    pub abs: Vec<AbsAxis>,
    pub rel: Vec<u16>,
    /// Key codes from `BTN_MISC` up, in code order.
    pub keys: Vec<u16>,
    /// Force-feedback capability codes.
    pub ff: Vec<u16>,
}

fn bits_of(fd: BorrowedFd<'_>, ev: u16, max: u16) -> Vec<u8> {
    let mut bits = vec![0u8; usize::from(max) / 8 + 1];
    if let Err(e) = ioctl::evdev_bits(fd, ev, &mut bits) {
        warn!("EVIOCGBIT({ev}) failed: {e}");
        bits.fill(0);
    }
    bits
}

impl Capabilities {
    pub fn probe(fd: BorrowedFd<'_>, top_usage: (u16, u16)) -> Self {
        let abs_bits = bits_of(fd, EV_ABS, ABS_MAX);
        let rel_bits = bits_of(fd, EV_REL, REL_MAX);
        let key_bits = bits_of(fd, EV_KEY, KEY_MAX);
        let ff_bits = bits_of(fd, EV_FF, FF_MAX);

        let abs = (0..=ABS_MAX)
            .filter(|code| ioctl::test_bit(&abs_bits, usize::from(*code)))
            .filter(|code| is_hat(*code) || abs_usage(*code).is_some())
            .filter_map(|code| match ioctl::evdev_absinfo(fd, code) {
                Ok(info) => Some(AbsAxis {
                    code,
                    value: info.value,
                    min: info.minimum,
                    max: info.maximum,
                }),
                Err(e) => {
                    warn!("EVIOCGABS({code}) failed: {e}");
                    None
                }
            })
            .collect();
        Self {
            top_usage,
            abs,
            rel: (0..=REL_MAX)
                .filter(|code| ioctl::test_bit(&rel_bits, usize::from(*code)))
                .collect(),
            keys: (BTN_MISC..=KEY_MAX)
                .filter(|code| ioctl::test_bit(&key_bits, usize::from(*code)))
                .collect(),
            ff: (0..=FF_MAX)
                .filter(|code| ioctl::test_bit(&ff_bits, usize::from(*code)))
                .collect(),
        }
    }

    /// Absolute axes on the generic desktop page between X and wheel.
    pub fn axis_count(&self) -> usize {
        self.abs
            .iter()
            .filter_map(|axis| abs_usage(axis.code))
            .filter(|(page, usage)| {
                *page == page::GENERIC && (generic::X..=generic::WHEEL).contains(usage)
            })
            .count()
    }

    /// True when the device reports nothing a descriptor could describe.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
            && self.rel.iter().all(|code| rel_usage(*code).is_none())
            && self.abs.is_empty()
    }

    pub fn button_count(&self) -> usize {
        self.keys.len()
    }

    pub fn has_rumble(&self) -> bool {
        self.ff.contains(&FF_RUMBLE)
    }

    /// Effect types the device can play, in physical block order.
    pub fn effect_types(&self) -> SmallVec<[EffectType; 6]> {
        let mut types = SmallVec::new();
        if self.ff.contains(&FF_CONSTANT) {
            types.push(EffectType::ConstantForce);
        }
        if self.ff.contains(&FF_PERIODIC) {
            for (code, effect) in [
                (FF_SQUARE, EffectType::Square),
                (FF_SINE, EffectType::Sine),
                (FF_TRIANGLE, EffectType::Triangle),
                (FF_SAW_UP, EffectType::SawtoothUp),
                (FF_SAW_DOWN, EffectType::SawtoothDown),
            ] {
                if self.ff.contains(&code) {
                    types.push(effect);
                }
            }
        }
        types
    }
}

struct LiteralLayout {
    abs: [Option<AxisBlock>; ABS_CODES],
    rel: [Option<AxisBlock>; REL_MAX as usize + 1],
    buttons: Option<ButtonBlock>,
    /// Key code to button index.
    button_map: Vec<(u16, u16)>,
    hats: Option<HatBlock>,
    /// Hat pair to hat field index.
    hat_map: [Option<u8>; 4],
}

struct CanonicalState {
    layout: GamepadLayout,
    ranges: Vec<(u16, (i32, i32))>,
    dpad: Dpad,
}

enum Mapping {
    Literal(Box<LiteralLayout>),
    Canonical(CanonicalState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncState {
    First,
    Normal,
    Dropped,
}

/// Live report of one event device and the event-to-field routing.
pub(crate) struct EvdevReport {
    mapping: Mapping,
    current: InputReport,
    last: Vec<u8>,
    sync: SyncState,
    hat_values: [i32; 8],
}

impl EvdevReport {
    /// Builds the descriptor and the initial report. `canonical` remaps the
    /// device onto the gamepad layout.
    pub fn build(caps: &Capabilities, canonical: bool) -> Result<(ReportDescriptor, Self)> {
        let top_usage = if canonical {
            (page::GENERIC, generic::GAMEPAD)
        } else {
            caps.top_usage
        };
        let mut builder = DescriptorBuilder::begin(top_usage.0, top_usage.1)?;
        builder.begin_report(ReportKind::Input)?;
        let mapping = if canonical {
            Mapping::Canonical(CanonicalState {
                layout: GamepadLayout::append(&mut builder)?,
                ranges: caps
                    .abs
                    .iter()
                    .filter(|axis| axis.min < axis.max)
                    .map(|axis| (axis.code, (axis.min, axis.max)))
                    .collect(),
                dpad: Dpad::default(),
            })
        } else {
            Mapping::Literal(Box::new(literal_layout(&mut builder, caps)?))
        };
        builder.end_report()?;
        if caps.has_rumble() {
            builder.add_haptics()?;
        }
        let effect_types = caps.effect_types();
        if !effect_types.is_empty() {
            builder.add_physical(&effect_types)?;
        }
        let descriptor = builder.end()?;

        let current = InputReport::new(descriptor.input())?;
        let last = current.as_bytes().to_vec();
        let mut report = Self {
            mapping,
            current,
            last,
            sync: SyncState::First,
            hat_values: [0; 8],
        };
        for axis in &caps.abs {
            report.set_abs(axis.code, axis.value);
        }
        Ok((descriptor, report))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.current.as_bytes()
    }

    /// Applies one input event. Returns the completed report on a
    /// `SYN_REPORT` that closes a consistent frame.
    pub fn process(&mut self, kind: u16, code: u16, value: i32) -> Option<Vec<u8>> {
        match kind {
            EV_SYN => {
                match code {
                    SYN_REPORT => match self.sync {
                        SyncState::Normal => {
                            self.last.copy_from_slice(self.current.as_bytes());
                            return Some(self.last.clone());
                        }
                        SyncState::Dropped => {
                            self.current.as_mut_bytes().copy_from_slice(&self.last);
                            self.sync = SyncState::Normal;
                        }
                        SyncState::First => self.sync = SyncState::Normal,
                    },
                    SYN_DROPPED => {
                        trace!("evdev events dropped");
                        self.sync = SyncState::Dropped;
                    }
                    _ => {}
                }
                None
            }
            EV_KEY => {
                self.set_key(code, value != 0);
                None
            }
            EV_ABS => {
                self.set_abs(code, value);
                None
            }
            EV_REL => {
                self.set_rel(code, value);
                None
            }
            _ => None,
        }
    }

    fn set_key(&mut self, code: u16, pressed: bool) {
        let report = self.current.as_mut_bytes();
        match &mut self.mapping {
            Mapping::Literal(layout) => {
                let index = layout
                    .button_map
                    .iter()
                    .find(|(native, _)| *native == code)
                    .map(|(_, index)| *index);
                if let (Some(buttons), Some(index)) = (layout.buttons, index) {
                    buttons.set(report, index, pressed);
                }
            }
            Mapping::Canonical(state) => match lookup(CANONICAL_KEYS, code) {
                Some(Target::Button(button)) => state.layout.set_button(report, button, pressed),
                Some(Target::Dpad(button)) => {
                    let direction = state.dpad.update(button, pressed);
                    let _ = state.layout.set_hat(report, direction);
                }
                _ => {}
            },
        }
    }

    fn hat_direction(&mut self, code: u16, value: i32) -> (u8, HatDirection) {
        let index = usize::from(code - ABS_HAT0X);
        self.hat_values[index] = value;
        let pair = index / 2;
        let direction =
            HatDirection::from_axes(self.hat_values[pair * 2], self.hat_values[pair * 2 + 1]);
        (pair as u8, direction)
    }

    fn set_abs(&mut self, code: u16, value: i32) {
        if is_hat(code) {
            let (pair, direction) = self.hat_direction(code, value);
            let report = self.current.as_mut_bytes();
            let result = match &self.mapping {
                Mapping::Literal(layout) => match (layout.hats, layout.hat_map[usize::from(pair)]) {
                    (Some(hats), Some(index)) => hats.set(report, index, direction),
                    _ => Ok(()),
                },
                Mapping::Canonical(state) if pair == 0 => {
                    // a hat and dpad buttons on the same device both drive the one hat
                    state.layout.set_hat(report, direction)
                }
                Mapping::Canonical(_) => Ok(()),
            };
            if let Err(e) = result {
                trace!("hat {code}: {e}");
            }
            return;
        }

        let report = self.current.as_mut_bytes();
        let result = match &self.mapping {
            Mapping::Literal(layout) => match layout.abs.get(usize::from(code)).copied().flatten() {
                Some(axis) => axis.set(report, 0, value),
                None => Ok(()),
            },
            Mapping::Canonical(state) => match lookup(CANONICAL_ABS, code) {
                Some(Target::Axis(axis)) => {
                    let Some((_, range)) = state.ranges.iter().find(|(c, _)| *c == code) else {
                        return;
                    };
                    let target = match axis {
                        CanonicalAxis::LeftTrigger | CanonicalAxis::RightTrigger => {
                            (TRIGGER_MIN, TRIGGER_MAX)
                        }
                        _ => (STICK_MIN, STICK_MAX),
                    };
                    rescale(value, *range, target)
                        .and_then(|scaled| state.layout.set_axis(report, axis, scaled))
                }
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            trace!("axis {code}: {e}");
        }
    }

    fn set_rel(&mut self, code: u16, value: i32) {
        let Mapping::Literal(layout) = &self.mapping else {
            return;
        };
        if let Some(axis) = layout.rel.get(usize::from(code)).copied().flatten() {
            let _ = axis.set(self.current.as_mut_bytes(), 0, value);
        }
    }
}

fn literal_layout(builder: &mut DescriptorBuilder, caps: &Capabilities) -> Result<LiteralLayout> {
    let mut layout = LiteralLayout {
        abs: [None; ABS_CODES],
        rel: [None; REL_MAX as usize + 1],
        buttons: None,
        button_map: Vec::new(),
        hats: None,
        hat_map: [None; 4],
    };

    let mut axes = 0;
    for axis in &caps.abs {
        let Some((usage_page, usage)) = abs_usage(axis.code) else {
            continue;
        };
        if axis.min > axis.max {
            warn!("skipping axis {} with inverted range", axis.code);
            continue;
        }
        if axes == MAX_LITERAL_AXES {
            debug!("dropping axis {}, already at {MAX_LITERAL_AXES}", axis.code);
            continue;
        }
        axes += 1;
        layout.abs[usize::from(axis.code)] = Some(builder.add_axes(
            usage_page,
            &[usage],
            false,
            AxisBits::ThirtyTwo,
            axis.min,
            axis.max,
        )?);
    }

    for code in &caps.rel {
        let Some((usage_page, usage)) = rel_usage(*code) else {
            continue;
        };
        layout.rel[usize::from(*code)] =
            Some(builder.add_axes(usage_page, &[usage], true, AxisBits::Eight, -127, 127)?);
    }

    if !caps.keys.is_empty() {
        let count = u16::try_from(caps.keys.len()).unwrap_or(u16::MAX);
        layout.buttons = Some(builder.add_buttons(page::BUTTON, 1, count)?);
        layout.button_map = caps.keys.iter().copied().zip(0..count).collect();
        builder.align_input()?;
    }

    let mut hats = 0u8;
    for pair in 0..4u16 {
        let code = ABS_HAT0X + pair * 2;
        if caps.abs.iter().any(|axis| axis.code == code) {
            layout.hat_map[usize::from(pair)] = Some(hats);
            hats += 1;
        }
    }
    if hats > 0 {
        layout.hats = Some(builder.add_hatswitch(hats)?);
    }
    builder.align_input()?;
    Ok(layout)
}

fn scale(value: i32, from: i32, to: i32) -> i32 {
    (i64::from(value) * i64::from(to) / i64::from(from)) as i32
}

fn replay_length(duration_ms: u32) -> u16 {
    match u16::try_from(duration_ms) {
        Ok(INFINITE_DURATION) | Err(_) => 0,
        Ok(length) => length,
    }
}

fn force_effect(params: &EffectParams, effect: &hidbus_report::physical::Effect) -> FfEffect {
    let gain = |value: i32| scale(value, 255, i32::from(params.gain));
    let mut uploaded = match params.effect_type {
        EffectType::ConstantForce => {
            let level = gain(scale(i32::from(effect.constant_magnitude), 10000, 0x7fff));
            FfEffect::new(
                FF_CONSTANT,
                FfParams {
                    constant: FfConstant {
                        level: level as i16,
                        envelope: FfEnvelope::default(),
                    },
                },
            )
        }
        periodic => {
            let waveform = match periodic {
                EffectType::Square => FF_SQUARE,
                EffectType::Triangle => FF_TRIANGLE,
                EffectType::SawtoothUp => FF_SAW_UP,
                EffectType::SawtoothDown => FF_SAW_DOWN,
                _ => FF_SINE,
            };
            let shape = effect.periodic;
            FfEffect::new(
                FF_PERIODIC,
                FfParams {
                    periodic: FfPeriodic {
                        waveform,
                        period: shape.period_ms,
                        magnitude: gain(scale(i32::from(shape.magnitude), 10000, 0x7fff)) as i16,
                        offset: scale(i32::from(shape.offset), 10000, 0x7fff) as i16,
                        phase: scale(i32::from(shape.phase), 36000, 0x10000) as u16,
                        envelope: FfEnvelope::default(),
                        custom_len: 0,
                        custom_data: ptr::null_mut(),
                    },
                },
            )
        }
    };
    uploaded.replay.length = replay_length(u32::from(params.duration_ms));
    uploaded.replay.delay = params.start_delay_ms;
    uploaded.trigger.button = u16::from(params.trigger_button);
    uploaded.trigger.interval = params.trigger_repeat_ms;
    uploaded
}

/// Maps a 1-based effect block index to its upload slot.
fn slot(index: u8) -> Result<usize> {
    index
        .checked_sub(1)
        .filter(|slot| *slot < MAX_EFFECTS)
        .map(usize::from)
        .ok_or_else(|| hidbus_report::Error::InvalidParameter("effect index").into())
}

#[derive(Debug)]
struct Uploaded {
    rumble: i16,
    /// Kernel effect id per effect slot.
    slots: [i16; MAX_EFFECTS as usize],
}

/// Plays effects through the event device's force-feedback interface.
pub(crate) struct EvdevActuator {
    file: Arc<File>,
    uploaded: Mutex<Uploaded>,
}

impl EvdevActuator {
    pub fn new(file: Arc<File>) -> Self {
        Self {
            file,
            uploaded: Mutex::new(Uploaded {
                rumble: -1,
                slots: [-1; MAX_EFFECTS as usize],
            }),
        }
    }

    fn play(&self, id: i16, count: i32) -> Result<()> {
        ioctl::write_event(self.file.as_fd(), EV_FF, id as u16, count)?;
        Ok(())
    }

    fn stop_all(&self, uploaded: &Uploaded) -> Result<()> {
        for id in uploaded.slots.iter().filter(|id| **id >= 0) {
            self.play(*id, 0)?;
        }
        Ok(())
    }
}

impl Actuator for EvdevActuator {
    fn rumble(&self, effect: RumbleEffect) -> Result<()> {
        let mut uploaded = lock(&self.uploaded);
        if effect.strong == 0 && effect.weak == 0 {
            if uploaded.rumble >= 0 {
                self.play(uploaded.rumble, 0)?;
            }
            return Ok(());
        }
        let mut native = FfEffect::new(
            FF_RUMBLE,
            FfParams {
                rumble: FfRumble {
                    strong_magnitude: effect.strong,
                    weak_magnitude: effect.weak,
                },
            },
        );
        native.id = uploaded.rumble;
        native.replay.length = replay_length(effect.duration_ms);
        uploaded.rumble = ioctl::upload_effect(self.file.as_fd(), &mut native)?;
        self.play(uploaded.rumble, 1)
    }

    fn force(&self, command: ForceCommand) -> Result<()> {
        let mut uploaded = lock(&self.uploaded);
        match command {
            ForceCommand::Play {
                index,
                params,
                effect,
                loop_count,
                solo,
            } => {
                if solo {
                    self.stop_all(&uploaded)?;
                }
                let slot = slot(index)?;
                let mut native = force_effect(&params, &effect);
                native.id = uploaded.slots[slot];
                uploaded.slots[slot] = ioctl::upload_effect(self.file.as_fd(), &mut native)?;
                self.play(uploaded.slots[slot], i32::from(loop_count.max(1)))
            }
            ForceCommand::Stop { index } => match uploaded.slots[slot(index)?] {
                id if id >= 0 => self.play(id, 0),
                _ => Ok(()),
            },
            ForceCommand::StopAll | ForceCommand::EnableActuators(false) => {
                self.stop_all(&uploaded)
            }
            ForceCommand::EnableActuators(true) => Ok(()),
            ForceCommand::Reset => {
                for id in uploaded.slots.iter_mut() {
                    if *id >= 0 {
                        if let Err(e) = ioctl::remove_effect(self.file.as_fd(), *id) {
                            debug!("failed to remove effect {id}: {e}");
                        }
                        *id = -1;
                    }
                }
                Ok(())
            }
            ForceCommand::Pause | ForceCommand::Continue => Err(Error::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidbus_report::summarize;

    fn joystick() -> Capabilities {
        Capabilities {
            top_usage: (page::GENERIC, generic::JOYSTICK),
            abs: vec![
                AbsAxis {
                    code: 0x00,
                    value: 512,
                    min: 0,
                    max: 1023,
                },
                AbsAxis {
                    code: 0x01,
                    value: 0,
                    min: 0,
                    max: 1023,
                },
                AbsAxis {
                    code: ABS_HAT0X,
                    value: 0,
                    min: -1,
                    max: 1,
                },
                AbsAxis {
                    code: ABS_HAT0X + 1,
                    value: 0,
                    min: -1,
                    max: 1,
                },
            ],
            rel: vec![0x08],
            keys: vec![0x120, 0x121, 0x122],
            ff: Vec::new(),
        }
    }

    fn gamepad() -> Capabilities {
        Capabilities {
            top_usage: (page::GENERIC, generic::GAMEPAD),
            abs: [0x00, 0x01, 0x03, 0x04]
                .into_iter()
                .map(|code| AbsAxis {
                    code,
                    value: 0,
                    min: -32768,
                    max: 32767,
                })
                .chain([0x02, 0x05].into_iter().map(|code| AbsAxis {
                    code,
                    value: 0,
                    min: 0,
                    max: 255,
                }))
                .collect(),
            rel: Vec::new(),
            keys: CANONICAL_KEYS.iter().map(|(code, _)| *code).collect(),
            ff: vec![FF_RUMBLE, FF_PERIODIC, FF_SINE, FF_CONSTANT],
        }
    }

    fn frame(report: &mut EvdevReport, events: &[(u16, u16, i32)]) -> Option<Vec<u8>> {
        events
            .iter()
            .filter_map(|(kind, code, value)| report.process(*kind, *code, *value))
            .last()
    }

    #[test]
    fn literal_layout_follows_capabilities() {
        let caps = joystick();
        let (descriptor, report) = EvdevReport::build(&caps, false).unwrap();
        let summary = summarize(descriptor.as_bytes()).unwrap();
        assert_eq!(summary.top_usage, (page::GENERIC, generic::JOYSTICK));
        assert_eq!((summary.axes, summary.buttons, summary.hats), (3, 3, 1));
        // id, 2 x 32-bit axes, wheel, buttons byte, hat byte
        assert_eq!(report.as_bytes().len(), 1 + 8 + 1 + 1 + 1);
        assert!(descriptor.haptics().is_none());
        assert_eq!(caps.axis_count(), 2);
    }

    #[test]
    fn literal_axes_are_capped() {
        let caps = Capabilities {
            top_usage: (page::GENERIC, generic::JOYSTICK),
            abs: (0..=10)
                .map(|code| AbsAxis {
                    code,
                    value: 0,
                    min: 0,
                    max: 255,
                })
                .collect(),
            ..Capabilities::default()
        };
        let (_, report) = EvdevReport::build(&caps, false).unwrap();
        let Mapping::Literal(layout) = &report.mapping else {
            panic!("expected a literal layout");
        };
        let kept: Vec<usize> = (0..ABS_CODES).filter(|&code| layout.abs[code].is_some()).collect();
        assert_eq!(kept, vec![0, 1, 2, 3, 4, 5]);
        // id, 6 x 32-bit axes
        assert_eq!(report.as_bytes().len(), 1 + 6 * 4);
    }

    #[test]
    fn initial_axis_values_come_from_absinfo() {
        let (_, report) = EvdevReport::build(&joystick(), false).unwrap();
        assert_eq!(&report.as_bytes()[1..5], &512i32.to_le_bytes());
    }

    #[test]
    fn reports_only_after_first_sync() {
        let (_, mut report) = EvdevReport::build(&joystick(), false).unwrap();
        assert!(frame(&mut report, &[(EV_KEY, 0x121, 1), (EV_SYN, SYN_REPORT, 0)]).is_none());

        let bytes = frame(&mut report, &[(EV_KEY, 0x122, 1), (EV_SYN, SYN_REPORT, 0)]).unwrap();
        assert_eq!(bytes[10], 0b110);
    }

    #[test]
    fn dropped_events_roll_back() {
        let (_, mut report) = EvdevReport::build(&joystick(), false).unwrap();
        frame(&mut report, &[(EV_SYN, SYN_REPORT, 0)]);
        let good = frame(&mut report, &[(EV_KEY, 0x120, 1), (EV_SYN, SYN_REPORT, 0)]).unwrap();

        let dropped = frame(
            &mut report,
            &[
                (EV_KEY, 0x121, 1),
                (EV_SYN, SYN_DROPPED, 0),
                (EV_SYN, SYN_REPORT, 0),
            ],
        );
        assert!(dropped.is_none());
        assert_eq!(report.as_bytes(), good.as_slice());

        let next = frame(&mut report, &[(EV_SYN, SYN_REPORT, 0)]).unwrap();
        assert_eq!(next, good);
    }

    #[test]
    fn hat_pairs_and_relative_clamp() {
        let (_, mut report) = EvdevReport::build(&joystick(), false).unwrap();
        frame(&mut report, &[(EV_SYN, SYN_REPORT, 0)]);
        let bytes = frame(
            &mut report,
            &[
                (EV_ABS, ABS_HAT0X, 1),
                (EV_ABS, ABS_HAT0X + 1, -1),
                (EV_REL, 0x08, -400),
                (EV_SYN, SYN_REPORT, 0),
            ],
        )
        .unwrap();
        assert_eq!(bytes[9] as i8, -127);
        assert_eq!(bytes[11] & 0x0f, HatDirection::UpRight.value());
    }

    #[test]
    fn canonical_gamepad_remaps_and_rescales() {
        let caps = gamepad();
        assert_eq!(caps.axis_count(), 6);
        assert!(caps.button_count() >= 14);

        let (descriptor, mut report) = EvdevReport::build(&caps, true).unwrap();
        let ids = descriptor.haptics().unwrap();
        assert!(ids.vendor_rumble > 0);
        let physical = descriptor.physical().unwrap();
        assert_eq!(
            physical.effect_types.as_slice(),
            &[EffectType::ConstantForce, EffectType::Sine]
        );

        let (_, layout) = GamepadLayout::descriptor(true).unwrap();
        frame(&mut report, &[(EV_SYN, SYN_REPORT, 0)]);
        let bytes = frame(
            &mut report,
            &[
                (EV_KEY, 0x13a, 1),
                (EV_KEY, 0x220, 1),
                (EV_KEY, 0x223, 1),
                (EV_ABS, 0x05, 255),
                (EV_ABS, 0x00, -32768),
                (EV_SYN, SYN_REPORT, 0),
            ],
        )
        .unwrap();
        assert_eq!(layout.button(&bytes, CanonicalButton::Back), Some(true));
        assert_eq!(layout.button(&bytes, CanonicalButton::A), Some(false));
        assert_eq!(layout.hat(&bytes), Some(HatDirection::UpRight));
        assert_eq!(
            layout.axis_value(&bytes, CanonicalAxis::RightTrigger),
            Some(TRIGGER_MAX)
        );
        assert_eq!(
            layout.axis_value(&bytes, CanonicalAxis::LeftX),
            Some(STICK_MIN)
        );
    }

    #[test]
    fn effect_slots_are_one_based() {
        assert_eq!(slot(1).unwrap(), 0);
        assert_eq!(slot(MAX_EFFECTS).unwrap(), usize::from(MAX_EFFECTS) - 1);
        assert!(slot(0).is_err());
        assert!(slot(MAX_EFFECTS + 1).is_err());
    }

    #[test]
    fn replay_lengths() {
        assert_eq!(replay_length(250), 250);
        assert_eq!(replay_length(u32::from(INFINITE_DURATION)), 0);
        assert_eq!(replay_length(u32::MAX), 0);
    }
}
