//! Force-feedback output reports on the PID usage page and the per-device
//! effect table they drive.

use smallvec::SmallVec;

use crate::descriptor::{Collection, Items, ABS, ARY, DATA, VAR};
use crate::error::{Error, Result};
use crate::usage::{page, pid};

/// Number of effect slots per device.
pub const MAX_EFFECTS: u8 = 16;

/// Duration value meaning "play until stopped".
pub const INFINITE_DURATION: u16 = 0xffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectType {
    ConstantForce,
    Square,
    Sine,
    Triangle,
    SawtoothUp,
    SawtoothDown,
}

impl EffectType {
    pub const fn usage(self) -> u16 {
        match self {
            EffectType::ConstantForce => pid::ET_CONSTANT_FORCE,
            EffectType::Square => pid::ET_SQUARE,
            EffectType::Sine => pid::ET_SINE,
            EffectType::Triangle => pid::ET_TRIANGLE,
            EffectType::SawtoothUp => pid::ET_SAWTOOTH_UP,
            EffectType::SawtoothDown => pid::ET_SAWTOOTH_DOWN,
        }
    }

    pub const fn is_periodic(self) -> bool {
        !matches!(self, EffectType::ConstantForce)
    }
}

/// Report ids assigned by [`crate::DescriptorBuilder::add_physical`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalReportIds {
    pub device_control: u8,
    pub effect_operation: u8,
    pub set_effect: u8,
    pub set_periodic: Option<u8>,
    pub set_constant_force: Option<u8>,
    /// Supported types, in the order of the effect type array.
    pub effect_types: SmallVec<[EffectType; 6]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceControl {
    EnableActuators,
    DisableActuators,
    StopAllEffects,
    Reset,
    Pause,
    Continue,
}

impl DeviceControl {
    fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            1 => DeviceControl::EnableActuators,
            2 => DeviceControl::DisableActuators,
            3 => DeviceControl::StopAllEffects,
            4 => DeviceControl::Reset,
            5 => DeviceControl::Pause,
            6 => DeviceControl::Continue,
            _ => return Err(Error::InvalidParameter("device control")),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectOperation {
    Start,
    StartSolo,
    Stop,
}

impl EffectOperation {
    fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            1 => EffectOperation::Start,
            2 => EffectOperation::StartSolo,
            3 => EffectOperation::Stop,
            _ => return Err(Error::InvalidParameter("effect operation")),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectParams {
    pub effect_type: EffectType,
    pub duration_ms: u16,
    pub trigger_repeat_ms: u16,
    pub sample_period_ms: u16,
    pub start_delay_ms: u16,
    pub gain: u8,
    pub trigger_button: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Periodic {
    /// 0..=10000
    pub magnitude: u16,
    /// -10000..=10000
    pub offset: i16,
    /// Hundredths of a degree, 0..=35999.
    pub phase: u16,
    pub period_ms: u16,
}

/// Decoded physical-force output report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhysicalReport {
    DeviceControl(DeviceControl),
    EffectOperation {
        index: u8,
        operation: EffectOperation,
        loop_count: u8,
    },
    SetEffect {
        index: u8,
        params: EffectParams,
    },
    SetPeriodic {
        index: u8,
        periodic: Periodic,
    },
    SetConstantForce {
        index: u8,
        magnitude: i16,
    },
}

const DEVICE_CONTROL_LEN: usize = 2;
const EFFECT_OPERATION_LEN: usize = 4;
const SET_EFFECT_LEN: usize = 13;
const SET_PERIODIC_LEN: usize = 10;
const SET_CONSTANT_FORCE_LEN: usize = 4;

fn check_len(report: &[u8], expected: usize) -> Result<()> {
    if report.len() < expected {
        return Err(Error::SizeMismatch {
            expected,
            actual: report.len(),
        });
    }
    Ok(())
}

fn effect_index(value: u8) -> Result<u8> {
    if value == 0 || value > MAX_EFFECTS {
        return Err(Error::InvalidParameter("effect index"));
    }
    Ok(value)
}

fn u16_at(report: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([report[at], report[at + 1]])
}

fn i16_at(report: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([report[at], report[at + 1]])
}

impl PhysicalReportIds {
    pub fn owns(&self, report_id: u8) -> bool {
        [
            Some(self.device_control),
            Some(self.effect_operation),
            Some(self.set_effect),
            self.set_periodic,
            self.set_constant_force,
        ]
        .contains(&Some(report_id))
    }

    /// Decodes an output report whose first byte is its report id.
    pub fn decode(&self, report: &[u8]) -> Result<PhysicalReport> {
        let Some(&id) = report.first() else {
            return Err(Error::SizeMismatch {
                expected: 1,
                actual: 0,
            });
        };

        if id == self.device_control {
            check_len(report, DEVICE_CONTROL_LEN)?;
            return DeviceControl::from_value(report[1]).map(PhysicalReport::DeviceControl);
        }
        if id == self.effect_operation {
            check_len(report, EFFECT_OPERATION_LEN)?;
            return Ok(PhysicalReport::EffectOperation {
                index: effect_index(report[1])?,
                operation: EffectOperation::from_value(report[2])?,
                loop_count: report[3],
            });
        }
        if id == self.set_effect {
            check_len(report, SET_EFFECT_LEN)?;
            let index = effect_index(report[1])?;
            let effect_type = usize::from(report[2])
                .checked_sub(1)
                .and_then(|i| self.effect_types.get(i))
                .copied()
                .ok_or(Error::InvalidParameter("effect type"))?;
            return Ok(PhysicalReport::SetEffect {
                index,
                params: EffectParams {
                    effect_type,
                    duration_ms: u16_at(report, 3),
                    trigger_repeat_ms: u16_at(report, 5),
                    sample_period_ms: u16_at(report, 7),
                    start_delay_ms: u16_at(report, 9),
                    gain: report[11],
                    trigger_button: report[12],
                },
            });
        }
        if Some(id) == self.set_periodic {
            check_len(report, SET_PERIODIC_LEN)?;
            let periodic = Periodic {
                magnitude: u16_at(report, 2),
                offset: i16_at(report, 4),
                phase: u16_at(report, 6),
                period_ms: u16_at(report, 8),
            };
            if periodic.magnitude > 10000 {
                return Err(Error::InvalidParameter("periodic magnitude"));
            }
            if !(-10000..=10000).contains(&periodic.offset) {
                return Err(Error::InvalidParameter("periodic offset"));
            }
            if periodic.phase > 35999 {
                return Err(Error::InvalidParameter("periodic phase"));
            }
            return Ok(PhysicalReport::SetPeriodic {
                index: effect_index(report[1])?,
                periodic,
            });
        }
        if Some(id) == self.set_constant_force {
            check_len(report, SET_CONSTANT_FORCE_LEN)?;
            let magnitude = i16_at(report, 2);
            if !(-10000..=10000).contains(&magnitude) {
                return Err(Error::InvalidParameter("constant force magnitude"));
            }
            return Ok(PhysicalReport::SetConstantForce {
                index: effect_index(report[1])?,
                magnitude,
            });
        }
        Err(Error::NotImplemented(id))
    }
}

/// One slot of the effect table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effect {
    pub params: Option<EffectParams>,
    pub periodic: Periodic,
    pub constant_magnitude: i16,
}

/// Command a backend executes in response to a physical-force report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceCommand {
    Play {
        index: u8,
        params: EffectParams,
        effect: Effect,
        loop_count: u8,
        solo: bool,
    },
    Stop {
        index: u8,
    },
    StopAll,
    EnableActuators(bool),
    Reset,
    Pause,
    Continue,
}

/// Per-device force-feedback state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalState {
    effects: [Effect; MAX_EFFECTS as usize],
    actuators_enabled: bool,
    paused: bool,
}

impl Default for PhysicalState {
    fn default() -> Self {
        Self {
            effects: [Effect::default(); MAX_EFFECTS as usize],
            actuators_enabled: true,
            paused: false,
        }
    }
}

impl PhysicalState {
    pub fn effect(&self, index: u8) -> Option<&Effect> {
        self.effects.get(usize::from(index.checked_sub(1)?))
    }

    pub fn actuators_enabled(&self) -> bool {
        self.actuators_enabled
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn slot(&mut self, index: u8) -> Result<&mut Effect> {
        effect_index(index)?;
        Ok(&mut self.effects[usize::from(index - 1)])
    }

    /// Updates the effect table and returns what the device should do, if
    /// anything.
    pub fn apply(&mut self, report: PhysicalReport) -> Result<Option<ForceCommand>> {
        match report {
            PhysicalReport::DeviceControl(control) => Ok(Some(match control {
                DeviceControl::EnableActuators => {
                    self.actuators_enabled = true;
                    ForceCommand::EnableActuators(true)
                }
                DeviceControl::DisableActuators => {
                    self.actuators_enabled = false;
                    ForceCommand::EnableActuators(false)
                }
                DeviceControl::StopAllEffects => ForceCommand::StopAll,
                DeviceControl::Reset => {
                    *self = Self::default();
                    ForceCommand::Reset
                }
                DeviceControl::Pause => {
                    self.paused = true;
                    ForceCommand::Pause
                }
                DeviceControl::Continue => {
                    self.paused = false;
                    ForceCommand::Continue
                }
            })),
            PhysicalReport::EffectOperation {
                index,
                operation,
                loop_count,
            } => {
                let effect = *self.slot(index)?;
                match operation {
                    EffectOperation::Stop => Ok(Some(ForceCommand::Stop { index })),
                    EffectOperation::Start | EffectOperation::StartSolo => {
                        let params = effect
                            .params
                            .ok_or(Error::InvalidParameter("effect not set"))?;
                        Ok(Some(ForceCommand::Play {
                            index,
                            params,
                            effect,
                            loop_count,
                            solo: operation == EffectOperation::StartSolo,
                        }))
                    }
                }
            }
            PhysicalReport::SetEffect { index, params } => {
                self.slot(index)?.params = Some(params);
                Ok(None)
            }
            PhysicalReport::SetPeriodic { index, periodic } => {
                self.slot(index)?.periodic = periodic;
                Ok(None)
            }
            PhysicalReport::SetConstantForce { index, magnitude } => {
                self.slot(index)?.constant_magnitude = magnitude;
                Ok(None)
            }
        }
    }
}

pub(crate) fn append_items(items: &mut Items, ids: &PhysicalReportIds) {
    let max_effects = i32::from(MAX_EFFECTS);

    items
        .usage_page(page::PID)
        .usage(pid::DEVICE_CONTROL_REPORT)
        .collection(Collection::Logical)
        .report_id(ids.device_control)
        .usage(pid::DEVICE_CONTROL)
        .collection(Collection::Logical);
    for usage in pid::DC_ENABLE_ACTUATORS..=pid::DC_DEVICE_CONTINUE {
        items.usage(usage);
    }
    items
        .logical(1, 6)
        .report(8, 1)
        .output(DATA | ARY | ABS)
        .end_collection()
        .end_collection();

    items
        .usage(pid::EFFECT_OPERATION_REPORT)
        .collection(Collection::Logical)
        .report_id(ids.effect_operation)
        .usage(pid::EFFECT_BLOCK_INDEX)
        .logical(1, max_effects)
        .report(8, 1)
        .output(DATA | VAR | ABS)
        .usage(pid::EFFECT_OPERATION)
        .collection(Collection::NamedArray)
        .usage(pid::OP_EFFECT_START)
        .usage(pid::OP_EFFECT_START_SOLO)
        .usage(pid::OP_EFFECT_STOP)
        .logical(1, 3)
        .report(8, 1)
        .output(DATA | ARY | ABS)
        .end_collection()
        .usage(pid::LOOP_COUNT)
        .logical(0, 255)
        .report(8, 1)
        .output(DATA | VAR | ABS)
        .end_collection();

    items
        .usage(pid::SET_EFFECT_REPORT)
        .collection(Collection::Logical)
        .report_id(ids.set_effect)
        .usage(pid::EFFECT_BLOCK_INDEX)
        .logical(1, max_effects)
        .report(8, 1)
        .output(DATA | VAR | ABS)
        .usage(pid::EFFECT_TYPE)
        .collection(Collection::NamedArray);
    for effect_type in &ids.effect_types {
        items.usage(effect_type.usage());
    }
    items
        .logical(1, ids.effect_types.len() as i32)
        .report(8, 1)
        .output(DATA | ARY | ABS)
        .end_collection()
        .usage(pid::DURATION)
        .usage(pid::TRIGGER_REPEAT_INTERVAL)
        .usage(pid::SAMPLE_PERIOD)
        .usage(pid::START_DELAY)
        // seconds, 10^-3
        .unit(0x1001, -3)
        .logical(0, 0xffff)
        .physical(0, 0xffff)
        .report(16, 4)
        .output(DATA | VAR | ABS)
        .unit(0, 0)
        .usage(pid::GAIN)
        .usage(pid::TRIGGER_BUTTON)
        .logical(0, 255)
        .physical(0, 255)
        .report(8, 2)
        .output(DATA | VAR | ABS)
        .end_collection();

    if let Some(id) = ids.set_periodic {
        items
            .usage(pid::SET_PERIODIC_REPORT)
            .collection(Collection::Logical)
            .report_id(id)
            .usage(pid::EFFECT_BLOCK_INDEX)
            .logical(1, max_effects)
            .report(8, 1)
            .output(DATA | VAR | ABS)
            .usage(pid::MAGNITUDE)
            .logical(0, 10000)
            .physical(0, 10000)
            .report(16, 1)
            .output(DATA | VAR | ABS)
            .usage(pid::OFFSET)
            .logical(-10000, 10000)
            .physical(-10000, 10000)
            .report(16, 1)
            .output(DATA | VAR | ABS)
            .usage(pid::PHASE)
            .logical(0, 35999)
            .physical(0, 35999)
            .report(16, 1)
            .output(DATA | VAR | ABS)
            .usage(pid::PERIOD)
            .unit(0x1001, -3)
            .logical(0, 0xffff)
            .physical(0, 0xffff)
            .report(16, 1)
            .output(DATA | VAR | ABS)
            .unit(0, 0)
            .end_collection();
    }

    if let Some(id) = ids.set_constant_force {
        items
            .usage(pid::SET_CONSTANT_FORCE_REPORT)
            .collection(Collection::Logical)
            .report_id(id)
            .usage(pid::EFFECT_BLOCK_INDEX)
            .logical(1, max_effects)
            .report(8, 1)
            .output(DATA | VAR | ABS)
            .usage(pid::MAGNITUDE)
            .logical(-10000, 10000)
            .physical(-10000, 10000)
            .report(16, 1)
            .output(DATA | VAR | ABS)
            .end_collection();
    }
}
