//! Linux backend: hidraw and evdev nodes discovered and watched through udev.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hidbus_report::summarize;
use hidbus_report::usage::{digitizer, generic, page};
use libudev::{Context, Enumerator, EventType, Monitor, MonitorSocket};
use log::{debug, info, trace, warn};
use smallvec::SmallVec;

use super::evdev::{Capabilities, EvdevActuator, EvdevReport};
use super::{ioctl, Backend, BackendHandle, Wait, Waker};
use crate::classify;
use crate::device::{lock, Actuator, NativeDevice, VirtualDevice};
use crate::error::{Error, Result};
use crate::events::BusEvent;
use crate::options::UdevOptions;
use crate::queue::EventSink;
use crate::types::{BusId, DeviceDesc, NativeHandle};

const HIDRAW_SUBSYSTEM: &str = "hidraw";
const INPUT_SUBSYSTEM: &str = "input";
const MAX_REPORT_LEN: usize = 1024;
/// How far up the device tree property lookups go.
const PARENT_DEPTH: usize = 8;
const QUIT: u8 = b'q';

/// Top-level usage of an evdev node, from the first `ID_INPUT_*` udev flag
/// found on the node or its parents.
static INPUT_CLASSES: &[(&str, (u16, u16))] = &[
    ("ID_INPUT_MOUSE", (page::GENERIC, generic::MOUSE)),
    ("ID_INPUT_KEYBOARD", (page::GENERIC, generic::KEYBOARD)),
    ("ID_INPUT_JOYSTICK", (page::GENERIC, generic::GAMEPAD)),
    ("ID_INPUT_KEY", (page::GENERIC, generic::KEYPAD)),
    ("ID_INPUT_TOUCHPAD", (page::DIGITIZER, digitizer::TOUCH_PAD)),
    ("ID_INPUT_TOUCHSCREEN", (page::DIGITIZER, digitizer::TOUCH_SCREEN)),
    ("ID_INPUT_TABLET", (page::DIGITIZER, digitizer::PEN)),
];

fn input_class(is_set: impl Fn(&str) -> bool) -> (u16, u16) {
    INPUT_CLASSES
        .iter()
        .find(|(property, _)| is_set(property))
        .map_or((page::GENERIC, 0), |(_, usage)| *usage)
}

/// Parses `HID_ID`, formatted `bus:vendor:product` in hex.
fn parse_hid_id(value: &str) -> Option<(u16, u16)> {
    let mut parts = value.split(':').skip(1);
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((vendor as u16, product as u16))
}

/// Interface number from a `HID_PHYS` path such as `usb-0000:00:14.0-1/input2`.
fn parse_interface(phys: &str) -> Option<u16> {
    let (_, tail) = phys.rsplit_once("/input")?;
    let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn parse_bcd(value: &str) -> Option<u16> {
    u16::from_str_radix(value.trim(), 16).ok()
}

fn text(value: Option<&OsStr>) -> Option<String> {
    value
        .map(|value| value.to_string_lossy().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn property(device: &libudev::Device, name: &str) -> Option<String> {
    text(device.property_value(name))
}

fn attribute(device: &libudev::Device, name: &str) -> Option<String> {
    text(device.attribute_value(name))
}

/// Applies `find` to `device` and then to its ancestors, returning the first
/// hit.
fn walk<T>(
    device: &libudev::Device,
    depth: usize,
    find: &impl Fn(&libudev::Device) -> Option<T>,
) -> Option<T> {
    if let Some(found) = find(device) {
        return Some(found);
    }
    if depth == 0 {
        return None;
    }
    walk(&device.parent()?, depth - 1, find)
}

fn is_hid(device: &libudev::Device) -> bool {
    device.property_value("HID_ID").is_some()
}

fn is_usb_device(device: &libudev::Device) -> bool {
    device.property_value("DEVTYPE") == Some(OsStr::new("usb_device"))
}

/// Identifies the physical device behind a node, so its hidraw and evdev
/// nodes are only added once.
fn physical_key(device: &libudev::Device) -> Option<String> {
    walk(device, PARENT_DEPTH, &|node| {
        is_hid(node).then(|| property(node, "DEVPATH")).flatten()
    })
    .or_else(|| {
        walk(device, PARENT_DEPTH, &|node| {
            is_usb_device(node).then(|| property(node, "DEVPATH")).flatten()
        })
    })
}

/// Fills the description from udev properties and sysfs attributes.
fn describe(device: &libudev::Device, desc: &mut DeviceDesc) {
    let hid = |name: &'static str| {
        walk(device, PARENT_DEPTH, &|node| {
            is_hid(node).then(|| property(node, name)).flatten()
        })
    };
    let usb = |name: &'static str| {
        walk(device, PARENT_DEPTH, &|node| {
            is_usb_device(node).then(|| attribute(node, name)).flatten()
        })
    };

    if let Some((vendor, product)) = hid("HID_ID").as_deref().and_then(parse_hid_id) {
        desc.vendor_id = vendor;
        desc.product_id = product;
    }
    desc.interface = hid("HID_PHYS").as_deref().and_then(parse_interface);
    if let Some(serial) = hid("HID_UNIQ").or_else(|| usb("serial")) {
        desc.serial = serial;
    }
    if let Some(product) = usb("product").or_else(|| hid("HID_NAME")) {
        desc.product = product;
    }
    if let Some(manufacturer) = usb("manufacturer") {
        desc.manufacturer = manufacturer;
    }
    desc.version = walk(device, PARENT_DEPTH, &|node| {
        attribute(node, "bcdDevice").as_deref().and_then(parse_bcd)
    })
    .unwrap_or(0);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Hidraw,
    Evdev,
}

impl NodeKind {
    fn of(devnode: &Path) -> Option<Self> {
        let name = devnode.file_name()?.to_str()?;
        if name.starts_with("hidraw") {
            Some(NodeKind::Hidraw)
        } else if name.starts_with("event") {
            Some(NodeKind::Evdev)
        } else {
            None
        }
    }

    fn bus(self) -> BusId {
        match self {
            NodeKind::Hidraw => BusId::HIDRAW,
            NodeKind::Evdev => BusId::EVDEV,
        }
    }
}

/// Owns a node's fd on behalf of its registered device. `stop` releases it,
/// so the node is closed only after the device was unregistered.
struct NodeFile(Mutex<Option<Arc<File>>>);

impl NodeFile {
    fn new(file: &Arc<File>) -> Self {
        Self(Mutex::new(Some(Arc::clone(file))))
    }

    fn get(&self) -> Result<Arc<File>> {
        lock(&self.0).clone().ok_or(Error::DeviceDeleted)
    }

    fn release(&self) {
        lock(&self.0).take();
    }
}

/// A hidraw node passed through unchanged.
struct HidrawDevice {
    file: NodeFile,
    descriptor: Vec<u8>,
}

impl NativeDevice for HidrawDevice {
    fn report_descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    fn set_output_report(&self, report: &[u8]) -> Result<usize> {
        Ok((&*self.file.get()?).write(report)?)
    }

    fn get_feature_report(&self, report: &mut [u8]) -> Result<usize> {
        Ok(ioctl::hidraw_get_feature(self.file.get()?.as_fd(), report)?)
    }

    fn set_feature_report(&self, report: &[u8]) -> Result<usize> {
        Ok(ioctl::hidraw_set_feature(self.file.get()?.as_fd(), report)?)
    }

    fn stop(&self) {
        self.file.release();
    }
}

/// An evdev node described by a synthesized descriptor.
struct EvdevDevice {
    device: VirtualDevice,
    file: NodeFile,
}

impl NativeDevice for EvdevDevice {
    fn report_descriptor(&self) -> &[u8] {
        self.device.report_descriptor()
    }

    fn set_output_report(&self, report: &[u8]) -> Result<usize> {
        self.device.set_output_report(report)
    }

    fn get_feature_report(&self, report: &mut [u8]) -> Result<usize> {
        self.device.get_feature_report(report)
    }

    fn set_feature_report(&self, report: &[u8]) -> Result<usize> {
        self.device.set_feature_report(report)
    }

    fn stop(&self) {
        self.file.release();
    }
}

enum Reader {
    Hidraw,
    Evdev(Box<EvdevReport>),
}

struct Node {
    handle: NativeHandle,
    kind: NodeKind,
    devnode: PathBuf,
    key: Option<String>,
    file: Arc<File>,
    reader: Reader,
}

fn open(devnode: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC);
    match options.clone().write(true).open(devnode) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!("{} is read-only: {e}", devnode.display());
            options.open(devnode)
        }
        Err(e) => Err(e),
    }
}

/// Device bookkeeping of the udev thread.
struct Nodes {
    options: UdevOptions,
    nodes: Vec<Node>,
    next_handle: u64,
    ready: VecDeque<BusEvent>,
    buffer: Vec<u8>,
}

impl Nodes {
    fn new(options: UdevOptions) -> Self {
        Self {
            options,
            nodes: Vec::new(),
            next_handle: 1,
            ready: VecDeque::new(),
            buffer: vec![0; MAX_REPORT_LEN],
        }
    }

    fn wanted(&self, kind: NodeKind) -> bool {
        match kind {
            NodeKind::Hidraw => !self.options.disable_hidraw,
            NodeKind::Evdev => !self.options.disable_input,
        }
    }

    fn add(&mut self, device: &libudev::Device) {
        let Some(devnode) = device.devnode().map(Path::to_path_buf) else {
            return;
        };
        let Some(kind) = NodeKind::of(&devnode) else {
            return;
        };
        if !self.wanted(kind) || self.nodes.iter().any(|node| node.devnode == devnode) {
            return;
        }
        let key = physical_key(device);
        if key.is_some() && self.nodes.iter().any(|node| node.key == key) {
            debug!("{} duplicates a known device", devnode.display());
            return;
        }

        let file = match open(&devnode) {
            Ok(file) => Arc::new(file),
            Err(e) => {
                warn!("failed to open {}: {e}", devnode.display());
                return;
            }
        };
        let mut desc = DeviceDesc::new(kind.bus());
        describe(device, &mut desc);

        let built = match kind {
            NodeKind::Hidraw => hidraw_device(&file, &mut desc),
            NodeKind::Evdev => {
                let top_usage = walk(device, PARENT_DEPTH, &|node| {
                    let class = input_class(|name| {
                        node.property_value(name) == Some(OsStr::new("1"))
                    });
                    (class.1 != 0).then_some(class)
                })
                .unwrap_or((page::GENERIC, 0));
                evdev_device(&file, &mut desc, top_usage, self.options.map_controllers)
            }
        };
        let (native, reader) = match built {
            Ok(Some(built)) => built,
            Ok(None) => {
                trace!("{} has nothing to report", devnode.display());
                return;
            }
            Err(e) => {
                warn!("failed to set up {}: {e}", devnode.display());
                return;
            }
        };

        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        info!("{} at {}", desc, devnode.display());
        self.ready.push_back(BusEvent::DeviceCreated {
            desc,
            handle,
            device: native,
        });
        self.nodes.push(Node {
            handle,
            kind,
            devnode,
            key,
            file,
            reader,
        });
    }

    fn remove_at(&mut self, index: usize) {
        let node = self.nodes.swap_remove(index);
        debug!("{} removed", node.devnode.display());
        self.ready.push_back(BusEvent::DeviceRemoved {
            bus: node.kind.bus(),
            handle: node.handle,
        });
    }

    fn remove(&mut self, devnode: &Path) {
        if let Some(index) = self.nodes.iter().position(|node| node.devnode == devnode) {
            self.remove_at(index);
        }
    }

    /// Drains what one node has buffered. Returns false once the node is gone.
    fn read(&mut self, index: usize) -> bool {
        let node = &mut self.nodes[index];
        let bus = node.kind.bus();
        let handle = node.handle;
        let result = match &mut node.reader {
            Reader::Hidraw => (&*node.file).read(&mut self.buffer).map(|len| {
                if len > 0 {
                    self.ready.push_back(BusEvent::InputReport {
                        bus,
                        handle,
                        report: self.buffer[..len].to_vec(),
                    });
                }
            }),
            Reader::Evdev(state) => ioctl::read_events(node.file.as_fd()).map(|events| {
                for (kind, code, value) in events {
                    if let Some(report) = state.process(kind, code, value) {
                        self.ready.push_back(BusEvent::InputReport {
                            bus,
                            handle,
                            report,
                        });
                    }
                }
            }),
        };
        match result {
            Ok(()) => true,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                self.remove_at(index);
                false
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => {
                trace!("read from {} failed: {e}", self.nodes[index].devnode.display());
                true
            }
        }
    }
}

type Built = Option<(Arc<dyn NativeDevice>, Reader)>;

fn hidraw_device(file: &Arc<File>, desc: &mut DeviceDesc) -> Result<Built> {
    let descriptor = ioctl::hidraw_descriptor(file.as_fd())?;
    let (axes, buttons) = summarize(&descriptor)
        .map(|summary| (summary.axes, summary.buttons))
        .unwrap_or_default();
    if desc.product.is_empty() {
        desc.product = ioctl::hidraw_name(file.as_fd()).unwrap_or_default();
    }
    if desc.manufacturer.is_empty() {
        desc.manufacturer = "hidraw".to_string();
    }
    if desc.serial.is_empty() {
        desc.serial = "0000".to_string();
    }
    classify::finalize(desc, axes, buttons);
    let device = HidrawDevice {
        file: NodeFile::new(file),
        descriptor,
    };
    Ok(Some((Arc::new(device), Reader::Hidraw)))
}

fn evdev_device(
    file: &Arc<File>,
    desc: &mut DeviceDesc,
    top_usage: (u16, u16),
    map_controllers: bool,
) -> Result<Built> {
    let caps = Capabilities::probe(file.as_fd(), top_usage);
    if caps.is_empty() {
        return Ok(None);
    }
    if desc.vendor_id == 0 {
        match ioctl::evdev_id(file.as_fd()) {
            Ok(id) => {
                desc.vendor_id = id.vendor;
                desc.product_id = id.product;
                desc.version = id.version;
            }
            Err(e) => debug!("EVIOCGID failed: {e}"),
        }
    }
    if desc.serial.is_empty() {
        desc.serial = ioctl::evdev_uniq(file.as_fd()).unwrap_or_else(|| "0000".to_string());
    }
    if desc.product.is_empty() {
        desc.product = ioctl::evdev_name(file.as_fd()).unwrap_or_default();
    }
    if desc.manufacturer.is_empty() {
        desc.manufacturer = "evdev".to_string();
    }
    classify::finalize(desc, caps.axis_count(), caps.button_count());

    let canonical = map_controllers && desc.is_gamepad;
    let (descriptor, report) = EvdevReport::build(&caps, canonical)?;
    let actuator = (caps.has_rumble() || !caps.effect_types().is_empty())
        .then(|| Box::new(EvdevActuator::new(Arc::clone(file))) as Box<dyn Actuator>);
    let device = EvdevDevice {
        device: VirtualDevice::new(descriptor, actuator),
        file: NodeFile::new(file),
    };
    Ok(Some((Arc::new(device), Reader::Evdev(Box::new(report)))))
}

/// Write end of the control pipe.
struct PipeWaker(File);

impl Waker for PipeWaker {
    fn wake(&self) {
        if let Err(e) = (&self.0).write_all(&[QUIT]) {
            warn!("failed to wake udev thread: {e}");
        }
    }
}

fn control_pipe() -> io::Result<(File, File)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: pipe2 writes two descriptors into the array.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((File::from(read), File::from(write)))
}

struct UdevBackend<'ctx> {
    monitor: MonitorSocket<'ctx>,
    control: File,
    nodes: Nodes,
}

fn udev_error(e: libudev::Error) -> Error {
    Error::BackendInit(format!("udev: {e}"))
}

impl<'ctx> UdevBackend<'ctx> {
    fn new(context: &'ctx Context, options: UdevOptions, control: File) -> Result<Self> {
        let mut subsystems: SmallVec<[&str; 2]> = SmallVec::new();
        if !options.disable_hidraw {
            subsystems.push(HIDRAW_SUBSYSTEM);
        }
        if !options.disable_input {
            subsystems.push(INPUT_SUBSYSTEM);
        }
        if subsystems.is_empty() {
            return Err(Error::BackendInit("udev: hidraw and input both disabled".into()));
        }

        let mut monitor = Monitor::new(context).map_err(udev_error)?;
        for subsystem in subsystems.iter().copied() {
            monitor.match_subsystem(subsystem).map_err(udev_error)?;
        }
        let monitor = monitor.listen().map_err(udev_error)?;

        let mut nodes = Nodes::new(options);
        for subsystem in subsystems.iter().copied() {
            let mut enumerator = Enumerator::new(context).map_err(udev_error)?;
            enumerator.match_subsystem(subsystem).map_err(udev_error)?;
            for device in enumerator.scan_devices().map_err(udev_error)? {
                nodes.add(&device);
            }
        }
        debug!("udev found {} devices", nodes.nodes.len());
        Ok(Self {
            monitor,
            control,
            nodes,
        })
    }

    fn monitor_events(&mut self) {
        while let Some(event) = self.monitor.receive_event() {
            let device = event.device();
            match event.event_type() {
                EventType::Add => self.nodes.add(device),
                EventType::Remove => {
                    if let Some(devnode) = device.devnode() {
                        self.nodes.remove(devnode);
                    }
                }
                _ => {}
            }
        }
    }

    /// Returns true when a quit byte was read.
    fn control_requested_quit(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!((&self.control).read(&mut byte), Ok(1) if byte[0] == QUIT)
    }
}

fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

impl Backend for UdevBackend<'_> {
    fn wait(&mut self) -> Wait {
        if let Some(event) = self.nodes.ready.pop_front() {
            return Wait::Event(event);
        }

        let mut fds: Vec<libc::pollfd> = [self.control.as_raw_fd(), self.monitor.as_raw_fd()]
            .into_iter()
            .chain(self.nodes.nodes.iter().map(|node| node.file.as_raw_fd()))
            .map(pollfd)
            .collect();
        // SAFETY: `fds` is a valid array of pollfd for the duration of the call.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if ready < 0 {
            let e = io::Error::last_os_error();
            if e.kind() != io::ErrorKind::Interrupted {
                warn!("poll failed: {e}");
            }
            return Wait::Pending;
        }

        if fds[0].revents != 0 && self.control_requested_quit() {
            return Wait::Terminal;
        }

        // Reverse order keeps indices valid across swap_remove.
        let handles: Vec<NativeHandle> = self.nodes.nodes.iter().map(|node| node.handle).collect();
        for (slot, fd) in fds.iter().enumerate().skip(2).rev() {
            if fd.revents == 0 {
                continue;
            }
            let handle = handles[slot - 2];
            let Some(index) = self.nodes.nodes.iter().position(|node| node.handle == handle) else {
                continue;
            };
            if fd.revents & libc::POLLIN != 0 {
                self.nodes.read(index);
            } else if fd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
                self.nodes.remove_at(index);
            }
        }

        if fds[1].revents != 0 {
            self.monitor_events();
        }
        Wait::Pending
    }
}

/// Starts the udev thread. The udev context lives on that thread's stack.
pub(crate) fn start(options: UdevOptions, sink: EventSink) -> Result<BackendHandle> {
    BackendHandle::spawn_with("udev", sink, move |starter| {
        let context = Context::new().map_err(udev_error)?;
        let (control, wake) = control_pipe()?;
        let backend = UdevBackend::new(&context, options, control)?;
        starter.run(backend, Box::new(PipeWaker(wake)));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hid_ids() {
        assert_eq!(parse_hid_id("0003:0000045E:0000028E"), Some((0x045e, 0x028e)));
        assert_eq!(parse_hid_id("0005:0000054C:000009CC"), Some((0x054c, 0x09cc)));
        assert_eq!(parse_hid_id("garbage"), None);
    }

    #[test]
    fn interface_from_phys() {
        assert_eq!(parse_interface("usb-0000:00:14.0-1/input2"), Some(2));
        assert_eq!(parse_interface("usb-0000:00:14.0-1/input0/extra"), Some(0));
        assert_eq!(parse_interface("bluetooth-aa:bb"), None);
        assert_eq!(parse_bcd("0114\n"), Some(0x0114));
    }

    #[test]
    fn input_class_precedence() {
        let joystick = input_class(|name| name == "ID_INPUT_JOYSTICK" || name == "ID_INPUT_KEY");
        assert_eq!(joystick, (page::GENERIC, generic::GAMEPAD));
        let tablet = input_class(|name| name == "ID_INPUT_TABLET");
        assert_eq!(tablet, (page::DIGITIZER, digitizer::PEN));
        assert_eq!(input_class(|_| false), (page::GENERIC, 0));
    }

    #[test]
    fn node_kinds() {
        assert_eq!(NodeKind::of(Path::new("/dev/hidraw3")), Some(NodeKind::Hidraw));
        assert_eq!(NodeKind::of(Path::new("/dev/input/event12")), Some(NodeKind::Evdev));
        assert_eq!(NodeKind::of(Path::new("/dev/input/js0")), None);
        assert_eq!(NodeKind::of(Path::new("/dev/input/mouse0")), None);
        assert_eq!(NodeKind::Evdev.bus(), BusId::EVDEV);
    }

    #[test]
    fn node_stays_open_until_stopped() {
        let (read, _write) = control_pipe().unwrap();
        let file = Arc::new(read);
        let device = HidrawDevice {
            file: NodeFile::new(&file),
            descriptor: vec![0x05, 0x01],
        };
        // the backend drops its own reference when the node disappears
        let weak = Arc::downgrade(&file);
        drop(file);
        assert!(weak.upgrade().is_some());

        device.stop();
        assert!(weak.upgrade().is_none());
        assert!(matches!(device.set_output_report(&[0, 1]), Err(Error::DeviceDeleted)));
    }

    #[test]
    fn control_pipe_carries_quit() {
        let (mut read, write) = control_pipe().unwrap();
        PipeWaker(write).wake();
        let mut byte = [0u8; 1];
        assert_eq!(read.read(&mut byte).unwrap(), 1);
        assert_eq!(byte[0], QUIT);
    }
}
