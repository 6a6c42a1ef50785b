//! SDL2 joystick and game controller backend.

use std::collections::VecDeque;
use std::ptr;

use ahash::AHashMap;
use crossbeam_channel::{unbounded, Receiver, Sender};
use hidbus_report::gamepad::{CanonicalAxis, CanonicalButton, Dpad, DpadButton, GamepadLayout};
use hidbus_report::haptics::RumbleEffect;
use hidbus_report::usage::{generic, page};
use hidbus_report::{
    AxisBits, AxisBlock, ButtonBlock, DescriptorBuilder, HatBlock, HatDirection, InputReport,
    ReportDescriptor, ReportKind,
};
use log::{debug, trace, warn};
use sdl2::controller::{Axis as SdlAxis, Button as SdlButton, GameController};
use sdl2::event::{Event, EventSender};
use sdl2::haptic::Haptic;
use sdl2::joystick::{HatState, Joystick};
use sdl2::{EventPump, GameControllerSubsystem, HapticSubsystem, JoystickSubsystem, Sdl};

use super::{Backend, BackendHandle, Wait, Waker};
use crate::classify::{self, MAX_LITERAL_AXES};
use crate::device::{Actuator, VirtualDevice};
use crate::error::{Error, Result};
use crate::events::BusEvent;
use crate::options::SdlOptions;
use crate::queue::EventSink;
use crate::types::{BusId, DeviceDesc, NativeHandle};

const PUMP_TIMEOUT_MS: u32 = 10;

const JOYSTICK_USAGES: [u16; 9] = [
    generic::X,
    generic::Y,
    generic::Z,
    generic::RX,
    generic::RY,
    generic::RZ,
    generic::SLIDER,
    generic::DIAL,
    generic::WHEEL,
];

/// Control counts of a joystick without a controller mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct JoystickCounts {
    pub axes: usize,
    pub balls: usize,
    pub buttons: usize,
    pub hats: usize,
}

impl JoystickCounts {
    /// Applies the axis caps: six absolute axes, nine usages in total with
    /// each ball taking two.
    fn capped(self) -> Self {
        let axes = self.axes.min(MAX_LITERAL_AXES);
        let balls = if axes + self.balls * 2 > JOYSTICK_USAGES.len() {
            (JOYSTICK_USAGES.len() - axes) / 2
        } else {
            self.balls
        };
        Self {
            axes,
            balls,
            ..self
        }
    }
}

/// Field positions of a literal joystick report.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JoystickLayout {
    axes: Option<AxisBlock>,
    balls: Option<AxisBlock>,
    buttons: Option<ButtonBlock>,
    hats: Option<HatBlock>,
}

pub(crate) fn joystick_descriptor(
    counts: JoystickCounts,
    haptics: bool,
) -> Result<(ReportDescriptor, JoystickLayout)> {
    let counts = counts.capped();
    let mut builder = DescriptorBuilder::begin(page::GENERIC, generic::JOYSTICK)?;
    builder.begin_report(ReportKind::Input)?;
    let mut layout = JoystickLayout::default();
    if counts.axes > 0 {
        layout.axes = Some(builder.add_axes(
            page::GENERIC,
            &JOYSTICK_USAGES[..counts.axes],
            false,
            AxisBits::Sixteen,
            i32::from(i16::MIN),
            i32::from(i16::MAX),
        )?);
    }
    if counts.balls > 0 {
        layout.balls = Some(builder.add_axes(
            page::GENERIC,
            &JOYSTICK_USAGES[counts.axes..counts.axes + counts.balls * 2],
            true,
            AxisBits::Eight,
            -127,
            127,
        )?);
    }
    if counts.buttons > 0 {
        let max = u16::try_from(counts.buttons).unwrap_or(u16::MAX);
        layout.buttons = Some(builder.add_buttons(page::BUTTON, 1, max)?);
    }
    if counts.hats > 0 {
        let hats = u8::try_from(counts.hats).unwrap_or(u8::MAX);
        layout.hats = Some(builder.add_hatswitch(hats)?);
    }
    builder.align_input()?;
    builder.end_report()?;
    if haptics {
        builder.add_haptics()?;
    }
    Ok((builder.end()?, layout))
}

/// Reads vendor, product and version from a joystick GUID string.
///
/// Returns `None` when the GUID carries no vendor id.
pub(crate) fn guid_ids(guid: &str) -> Option<(u16, u16, u16)> {
    if guid.len() != 32 || !guid.is_ascii() {
        return None;
    }
    let byte = |at: usize| u8::from_str_radix(&guid[at * 2..at * 2 + 2], 16).ok();
    let word = |at: usize| Some(u16::from_le_bytes([byte(at)?, byte(at + 1)?]));
    let vendor = word(4)?;
    if vendor == 0 {
        return None;
    }
    Some((vendor, word(8)?, word(12)?))
}

fn hat_direction(state: HatState) -> HatDirection {
    match state {
        HatState::Centered => HatDirection::Centered,
        HatState::Up => HatDirection::Up,
        HatState::RightUp => HatDirection::UpRight,
        HatState::Right => HatDirection::Right,
        HatState::RightDown => HatDirection::DownRight,
        HatState::Down => HatDirection::Down,
        HatState::LeftDown => HatDirection::DownLeft,
        HatState::Left => HatDirection::Left,
        HatState::LeftUp => HatDirection::UpLeft,
    }
}

fn canonical_axis(axis: SdlAxis) -> CanonicalAxis {
    match axis {
        SdlAxis::LeftX => CanonicalAxis::LeftX,
        SdlAxis::LeftY => CanonicalAxis::LeftY,
        SdlAxis::RightX => CanonicalAxis::RightX,
        SdlAxis::RightY => CanonicalAxis::RightY,
        SdlAxis::TriggerLeft => CanonicalAxis::LeftTrigger,
        SdlAxis::TriggerRight => CanonicalAxis::RightTrigger,
    }
}

enum Mapped {
    Button(CanonicalButton),
    Dpad(DpadButton),
}

fn map_sdl_button(button: SdlButton) -> Option<Mapped> {
    Some(match button {
        SdlButton::A => Mapped::Button(CanonicalButton::A),
        SdlButton::B => Mapped::Button(CanonicalButton::B),
        SdlButton::X => Mapped::Button(CanonicalButton::X),
        SdlButton::Y => Mapped::Button(CanonicalButton::Y),
        SdlButton::LeftShoulder => Mapped::Button(CanonicalButton::LeftShoulder),
        SdlButton::RightShoulder => Mapped::Button(CanonicalButton::RightShoulder),
        SdlButton::Back => Mapped::Button(CanonicalButton::Back),
        SdlButton::Start => Mapped::Button(CanonicalButton::Start),
        SdlButton::LeftStick => Mapped::Button(CanonicalButton::LeftStick),
        SdlButton::RightStick => Mapped::Button(CanonicalButton::RightStick),
        SdlButton::Guide => Mapped::Button(CanonicalButton::Guide),
        SdlButton::Misc1 => Mapped::Button(CanonicalButton::Misc),
        SdlButton::Paddle1 => Mapped::Button(CanonicalButton::Paddle1),
        SdlButton::Paddle2 => Mapped::Button(CanonicalButton::Paddle2),
        SdlButton::DPadUp => Mapped::Dpad(DpadButton::Up),
        SdlButton::DPadDown => Mapped::Dpad(DpadButton::Down),
        SdlButton::DPadLeft => Mapped::Dpad(DpadButton::Left),
        SdlButton::DPadRight => Mapped::Dpad(DpadButton::Right),
        _ => return None,
    })
}

/// Internal commands sent to the pump thread.
enum Command {
    Rumble { instance: u32, effect: RumbleEffect },
}

struct SdlActuator {
    instance: u32,
    tx: Sender<Command>,
}

impl Actuator for SdlActuator {
    fn rumble(&self, effect: RumbleEffect) -> Result<()> {
        self.tx
            .send(Command::Rumble {
                instance: self.instance,
                effect,
            })
            .map_err(|e| Error::Backend(format!("{e}")))
    }
}

struct SdlWaker {
    sender: EventSender,
    quit: u32,
}

impl Waker for SdlWaker {
    fn wake(&self) {
        let event = Event::User {
            timestamp: 0,
            window_id: 0,
            type_: self.quit,
            code: 0,
            data1: ptr::null_mut(),
            data2: ptr::null_mut(),
        };
        if let Err(e) = self.sender.push_event(event) {
            warn!("unable to post SDL quit event: {e}");
        }
    }
}

enum Layout {
    Controller { layout: GamepadLayout, dpad: Dpad },
    Joystick(JoystickLayout),
}

struct SdlDevice {
    joystick: Joystick,
    controller: Option<GameController>,
    haptic: Option<Haptic>,
    report: InputReport,
    layout: Layout,
}

impl SdlDevice {
    fn play(&mut self, effect: RumbleEffect) {
        let RumbleEffect {
            strong,
            weak,
            duration_ms,
        } = effect;
        let result = if let Some(controller) = self.controller.as_mut() {
            controller.set_rumble(strong, weak, duration_ms)
        } else if self.joystick.has_rumble() {
            self.joystick.set_rumble(strong, weak, duration_ms)
        } else if let Some(haptic) = self.haptic.as_mut() {
            haptic.rumble_stop();
            if strong != 0 || weak != 0 {
                let strength = f32::from(strong.max(weak)) / f32::from(u16::MAX);
                haptic.rumble_play(strength, duration_ms);
            }
            Ok(())
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!("failed to set rumble: {e}");
        }
    }

    fn fill_initial(&mut self) {
        let report = self.report.as_mut_bytes();
        match &mut self.layout {
            Layout::Controller { layout, dpad } => {
                let Some(controller) = self.controller.as_ref() else {
                    return;
                };
                for axis in [
                    SdlAxis::LeftX,
                    SdlAxis::LeftY,
                    SdlAxis::RightX,
                    SdlAxis::RightY,
                    SdlAxis::TriggerLeft,
                    SdlAxis::TriggerRight,
                ] {
                    let value = i32::from(controller.axis(axis));
                    let _ = layout.set_axis(report, canonical_axis(axis), value);
                }
                for (button, direction) in [
                    (SdlButton::DPadUp, DpadButton::Up),
                    (SdlButton::DPadDown, DpadButton::Down),
                    (SdlButton::DPadLeft, DpadButton::Left),
                    (SdlButton::DPadRight, DpadButton::Right),
                ] {
                    dpad.update(direction, controller.button(button));
                }
                let _ = layout.set_hat(report, dpad.direction());
            }
            Layout::Joystick(layout) => {
                if let Some(axes) = layout.axes {
                    for index in 0..axes.count() {
                        if let Ok(value) = self.joystick.axis(u32::from(index)) {
                            let _ = axes.set(report, index, i32::from(value));
                        }
                    }
                }
                if let Some(hats) = layout.hats {
                    for index in 0..hats.count() {
                        if let Ok(state) = self.joystick.hat(u32::from(index)) {
                            let _ = hats.set(report, index, hat_direction(state));
                        }
                    }
                }
            }
        }
    }
}

/// SDL2 backend state, owned by the pump thread.
pub(crate) struct SdlBackend {
    // keeps SDL initialized
    _sdl: Sdl,
    joysticks: JoystickSubsystem,
    controllers: GameControllerSubsystem,
    haptics: Option<HapticSubsystem>,
    pump: EventPump,
    quit: u32,
    options: SdlOptions,
    devices: AHashMap<u32, SdlDevice>,
    ready: VecDeque<BusEvent>,
    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
}

impl SdlBackend {
    /// Initializes SDL on the calling thread.
    pub fn init(options: SdlOptions) -> Result<(Self, Box<dyn Waker>)> {
        sdl2::hint::set("SDL_JOYSTICK_ALLOW_BACKGROUND_EVENTS", "1");
        let sdl = sdl2::init().map_err(Error::BackendInit)?;
        let joysticks = sdl.joystick().map_err(Error::BackendInit)?;
        let controllers = sdl.game_controller().map_err(Error::BackendInit)?;
        let haptics = match sdl.haptic() {
            Ok(haptics) => Some(haptics),
            Err(e) => {
                debug!("SDL haptic subsystem unavailable: {e}");
                None
            }
        };
        let events = sdl.event().map_err(Error::BackendInit)?;
        // SAFETY: registering a user event type has no preconditions.
        let quit = unsafe { events.register_event() }.map_err(Error::BackendInit)?;
        let pump = sdl.event_pump().map_err(Error::BackendInit)?;

        for mapping in &options.mappings {
            if let Err(e) = controllers.add_mapping(mapping) {
                warn!("rejected SDL controller mapping: {e}");
            }
        }

        let waker = SdlWaker {
            sender: events.event_sender(),
            quit,
        };
        let (cmd_tx, cmd_rx) = unbounded();
        let backend = Self {
            _sdl: sdl,
            joysticks,
            controllers,
            haptics,
            pump,
            quit,
            options,
            devices: AHashMap::new(),
            ready: VecDeque::new(),
            cmd_tx,
            cmd_rx,
        };
        Ok((backend, Box::new(waker)))
    }

    fn add_device(&mut self, index: u32) {
        let joystick = match self.joysticks.open(index) {
            Ok(joystick) => joystick,
            Err(e) => {
                warn!("unable to open SDL device {index}: {e}");
                return;
            }
        };
        let instance = joystick.instance_id();
        if self.devices.contains_key(&instance) {
            return;
        }
        let controller = if self.options.map_controllers && self.controllers.is_game_controller(index)
        {
            self.controllers.open(index).ok()
        } else {
            None
        };

        let mut desc = DeviceDesc::new(BusId::SDL);
        desc.manufacturer = "SDL".to_string();
        desc.product = controller
            .as_ref()
            .map_or_else(|| joystick.name(), |controller| controller.name());
        desc.serial = joystick.guid().to_string();
        let (vendor_id, product_id, version) =
            guid_ids(&desc.serial).unwrap_or((1, (instance + 1) as u16, 0));
        desc.vendor_id = vendor_id;
        desc.product_id = product_id;
        desc.version = version;

        let haptic = if joystick.has_rumble() {
            None
        } else {
            self.haptics
                .as_ref()
                .and_then(|haptics| haptics.open_from_joystick_id(index).ok())
        };
        let rumble = joystick.has_rumble() || haptic.is_some();

        let built = if controller.is_some() {
            desc.is_gamepad = true;
            GamepadLayout::descriptor(rumble).map(|(descriptor, layout)| {
                (
                    descriptor,
                    Layout::Controller {
                        layout,
                        dpad: Dpad::default(),
                    },
                )
            })
            .map_err(Error::from)
        } else {
            joystick_descriptor(
                JoystickCounts {
                    axes: joystick.num_axes() as usize,
                    balls: joystick.num_balls() as usize,
                    buttons: joystick.num_buttons() as usize,
                    hats: joystick.num_hats() as usize,
                },
                rumble,
            )
            .map(|(descriptor, layout)| (descriptor, Layout::Joystick(layout)))
        };
        classify::finalize(
            &mut desc,
            joystick.num_axes() as usize,
            joystick.num_buttons() as usize,
        );

        let (descriptor, layout) = match built {
            Ok(built) => built,
            Err(e) => {
                warn!("failed to build descriptor for SDL device {index}: {e}");
                return;
            }
        };
        let report = match InputReport::new(descriptor.input()) {
            Ok(report) => report,
            Err(e) => {
                warn!("failed to allocate report for SDL device {index}: {e}");
                return;
            }
        };

        debug!(
            "{} {instance}: {desc}",
            if controller.is_some() { "controller" } else { "joystick" }
        );

        let actuator: Option<Box<dyn Actuator>> = rumble.then(|| {
            Box::new(SdlActuator {
                instance,
                tx: self.cmd_tx.clone(),
            }) as Box<dyn Actuator>
        });
        let mut device = SdlDevice {
            joystick,
            controller,
            haptic,
            report,
            layout,
        };
        device.fill_initial();

        self.ready.push_back(BusEvent::DeviceCreated {
            desc,
            handle: NativeHandle(u64::from(instance)),
            device: std::sync::Arc::new(VirtualDevice::new(descriptor, actuator)),
        });
        self.devices.insert(instance, device);
    }

    fn remove_device(&mut self, instance: u32) {
        if self.devices.remove(&instance).is_some() {
            self.ready.push_back(BusEvent::DeviceRemoved {
                bus: BusId::SDL,
                handle: NativeHandle(u64::from(instance)),
            });
        } else {
            warn!("failed to find SDL device with id {instance}");
        }
    }

    fn update<F>(&mut self, instance: u32, controller_event: bool, apply: F)
    where
        F: FnOnce(&mut [u8], &mut Layout) -> hidbus_report::Result<()>,
    {
        let Some(device) = self.devices.get_mut(&instance) else {
            warn!("failed to find SDL device with id {instance}");
            return;
        };
        // controller-mapped devices report through controller events only
        if device.controller.is_some() != controller_event {
            return;
        }
        if let Err(e) = apply(device.report.as_mut_bytes(), &mut device.layout) {
            trace!("SDL device {instance}: {e}");
            return;
        }
        match device.report.snapshot() {
            Ok(report) => self.ready.push_back(BusEvent::InputReport {
                bus: BusId::SDL,
                handle: NativeHandle(u64::from(instance)),
                report,
            }),
            Err(e) => warn!("dropping SDL report: {e}"),
        }
    }

    fn process(&mut self, event: Event) {
        match event {
            Event::JoyDeviceAdded { which, .. } => self.add_device(which),
            Event::JoyDeviceRemoved { which, .. } => self.remove_device(which),
            Event::JoyAxisMotion {
                which,
                axis_idx,
                value,
                ..
            } => {
                if usize::from(axis_idx) < MAX_LITERAL_AXES {
                    self.update(which, false, |report, layout| match layout {
                        Layout::Joystick(JoystickLayout {
                            axes: Some(axes), ..
                        }) if axis_idx < axes.count() => axes.set(report, axis_idx, i32::from(value)),
                        _ => Ok(()),
                    });
                }
            }
            Event::JoyBallMotion {
                which,
                ball_idx,
                xrel,
                yrel,
                ..
            } => self.update(which, false, |report, layout| match layout {
                Layout::Joystick(JoystickLayout {
                    balls: Some(balls), ..
                }) if ball_idx < balls.count() / 2 => {
                    balls.set(report, ball_idx * 2, i32::from(xrel))?;
                    balls.set(report, ball_idx * 2 + 1, i32::from(yrel))
                }
                _ => Ok(()),
            }),
            Event::JoyHatMotion {
                which,
                hat_idx,
                state,
                ..
            } => self.update(which, false, |report, layout| match layout {
                Layout::Joystick(JoystickLayout {
                    hats: Some(hats), ..
                }) if hat_idx < hats.count() => hats.set(report, hat_idx, hat_direction(state)),
                _ => Ok(()),
            }),
            Event::JoyButtonDown {
                which, button_idx, ..
            } => self.joystick_button(which, button_idx, true),
            Event::JoyButtonUp {
                which, button_idx, ..
            } => self.joystick_button(which, button_idx, false),
            Event::ControllerAxisMotion {
                which, axis, value, ..
            } => self.update(which, true, |report, layout| match layout {
                Layout::Controller { layout, .. } => {
                    layout.set_axis(report, canonical_axis(axis), i32::from(value))
                }
                Layout::Joystick(_) => Ok(()),
            }),
            Event::ControllerButtonDown { which, button, .. } => {
                self.controller_button(which, button, true);
            }
            Event::ControllerButtonUp { which, button, .. } => {
                self.controller_button(which, button, false);
            }
            _ => {}
        }
    }

    fn joystick_button(&mut self, instance: u32, button: u8, pressed: bool) {
        self.update(instance, false, |report, layout| {
            if let Layout::Joystick(JoystickLayout {
                buttons: Some(buttons),
                ..
            }) = layout
            {
                buttons.set(report, u16::from(button), pressed);
            }
            Ok(())
        });
    }

    fn controller_button(&mut self, instance: u32, button: SdlButton, pressed: bool) {
        let Some(mapped) = map_sdl_button(button) else {
            return;
        };
        self.update(instance, true, |report, layout| {
            let Layout::Controller { layout, dpad } = layout else {
                return Ok(());
            };
            match mapped {
                Mapped::Button(button) => {
                    layout.set_button(report, button, pressed);
                    Ok(())
                }
                Mapped::Dpad(direction) => layout.set_hat(report, dpad.update(direction, pressed)),
            }
        });
    }

    fn run_commands(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            match command {
                Command::Rumble { instance, effect } => {
                    if let Some(device) = self.devices.get_mut(&instance) {
                        device.play(effect);
                    }
                }
            }
        }
    }
}

impl Backend for SdlBackend {
    fn wait(&mut self) -> Wait {
        if let Some(event) = self.ready.pop_front() {
            return Wait::Event(event);
        }
        self.run_commands();
        match self.pump.wait_event_timeout(PUMP_TIMEOUT_MS) {
            Some(Event::User { type_, .. }) if type_ == self.quit => Wait::Terminal,
            Some(event) => {
                self.process(event);
                Wait::Pending
            }
            None => Wait::Pending,
        }
    }
}

pub(crate) fn start(options: SdlOptions, sink: EventSink) -> Result<BackendHandle> {
    BackendHandle::spawn("sdl", sink, move || SdlBackend::init(options))
}
