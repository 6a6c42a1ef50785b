//! Linux ioctl request codes and thin wrappers for hidraw and evdev nodes.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};

use smallvec::SmallVec;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;
const IOC_READ_WRITE: u32 = 3;

const HIDRAW: u8 = b'H';
const EVDEV: u8 = b'E';

pub(crate) const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

const fn ior<T>(kind: u8, nr: u8) -> libc::c_ulong {
    ioctl_code(IOC_READ, kind, nr, mem::size_of::<T>())
}

const fn iow<T>(kind: u8, nr: u8) -> libc::c_ulong {
    ioctl_code(IOC_WRITE, kind, nr, mem::size_of::<T>())
}

#[repr(C)]
struct HidrawReportDescriptor {
    size: u32,
    value: [u8; HID_MAX_DESCRIPTOR_SIZE],
}

const HIDIOCGRDESCSIZE: libc::c_ulong = ior::<libc::c_int>(HIDRAW, 0x01);
const HIDIOCGRDESC: libc::c_ulong = ior::<HidrawReportDescriptor>(HIDRAW, 0x02);
const EVIOCGID: libc::c_ulong = ior::<libc::input_id>(EVDEV, 0x02);
const EVIOCSFF: libc::c_ulong = iow::<FfEffect>(EVDEV, 0x80);
const EVIOCRMFF: libc::c_ulong = iow::<libc::c_int>(EVDEV, 0x81);

fn check(result: libc::c_int) -> io::Result<usize> {
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(result as usize)
}

/// Reads the native report descriptor of a hidraw node.
pub(crate) fn hidraw_descriptor(fd: BorrowedFd<'_>) -> io::Result<Vec<u8>> {
    let mut size: libc::c_int = 0;
    // SAFETY: the kernel writes one c_int through the pointer.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), HIDIOCGRDESCSIZE, &mut size) })?;

    let mut descriptor = Box::new(HidrawReportDescriptor {
        size: size.clamp(0, HID_MAX_DESCRIPTOR_SIZE as libc::c_int) as u32,
        value: [0; HID_MAX_DESCRIPTOR_SIZE],
    });
    // SAFETY: `descriptor` matches the kernel's hidraw_report_descriptor.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), HIDIOCGRDESC, &mut *descriptor) })?;
    let used = (descriptor.size as usize).min(HID_MAX_DESCRIPTOR_SIZE);
    Ok(descriptor.value[..used].to_vec())
}

/// Product name of a hidraw node.
pub(crate) fn hidraw_name(fd: BorrowedFd<'_>) -> Option<String> {
    let mut buffer = [0u8; 256];
    let request = ioctl_code(IOC_READ, HIDRAW, 0x04, buffer.len() - 1);
    // SAFETY: the kernel writes at most `len - 1` bytes into the buffer.
    let written = check(unsafe { libc::ioctl(fd.as_raw_fd(), request, buffer.as_mut_ptr()) });
    written.ok().and_then(|_| c_string(&buffer))
}

/// Fetches a feature report; `report[0]` holds the report id on entry.
pub(crate) fn hidraw_get_feature(fd: BorrowedFd<'_>, report: &mut [u8]) -> io::Result<usize> {
    let request = ioctl_code(IOC_READ_WRITE, HIDRAW, 0x07, report.len());
    // SAFETY: the kernel reads and writes at most `report.len()` bytes.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), request, report.as_mut_ptr()) })
}

/// Sends a feature report whose first byte is the report id.
pub(crate) fn hidraw_set_feature(fd: BorrowedFd<'_>, report: &[u8]) -> io::Result<usize> {
    let request = ioctl_code(IOC_READ_WRITE, HIDRAW, 0x06, report.len());
    // SAFETY: the kernel only reads `report.len()` bytes.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), request, report.as_ptr()) })
}

pub(crate) fn evdev_id(fd: BorrowedFd<'_>) -> io::Result<libc::input_id> {
    // SAFETY: input_id is plain data.
    let mut id: libc::input_id = unsafe { mem::zeroed() };
    // SAFETY: the kernel writes one input_id.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), EVIOCGID, &mut id) })?;
    Ok(id)
}

fn evdev_string(fd: BorrowedFd<'_>, nr: u8) -> Option<String> {
    let mut buffer = [0u8; 256];
    let request = ioctl_code(IOC_READ, EVDEV, nr, buffer.len() - 1);
    // SAFETY: the kernel writes at most `len - 1` bytes into the buffer.
    let written = check(unsafe { libc::ioctl(fd.as_raw_fd(), request, buffer.as_mut_ptr()) });
    written.ok().filter(|n| *n > 0).and_then(|_| c_string(&buffer))
}

pub(crate) fn evdev_name(fd: BorrowedFd<'_>) -> Option<String> {
    evdev_string(fd, 0x06)
}

pub(crate) fn evdev_uniq(fd: BorrowedFd<'_>) -> Option<String> {
    evdev_string(fd, 0x08)
}

/// Capability bits of event type `ev` (0 for the supported types).
pub(crate) fn evdev_bits(fd: BorrowedFd<'_>, ev: u16, bits: &mut [u8]) -> io::Result<()> {
    let request = ioctl_code(IOC_READ, EVDEV, 0x20 + ev as u8, bits.len());
    // SAFETY: the kernel writes at most `bits.len()` bytes.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), request, bits.as_mut_ptr()) }).map(|_| ())
}

pub(crate) fn evdev_absinfo(fd: BorrowedFd<'_>, code: u16) -> io::Result<libc::input_absinfo> {
    // SAFETY: input_absinfo is plain data.
    let mut info: libc::input_absinfo = unsafe { mem::zeroed() };
    let request = ior::<libc::input_absinfo>(EVDEV, 0x40 + code as u8);
    // SAFETY: the kernel writes one input_absinfo.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), request, &mut info) })?;
    Ok(info)
}

pub(crate) fn test_bit(bits: &[u8], bit: usize) -> bool {
    bits.get(bit / 8).is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}

fn c_string(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = String::from_utf8_lossy(&bytes[..end]).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct FfReplay {
    pub length: u16,
    pub delay: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct FfTrigger {
    pub button: u16,
    pub interval: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct FfEnvelope {
    pub attack_length: u16,
    pub attack_level: u16,
    pub fade_length: u16,
    pub fade_level: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct FfConstant {
    pub level: i16,
    pub envelope: FfEnvelope,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct FfPeriodic {
    pub waveform: u16,
    pub period: u16,
    pub magnitude: i16,
    pub offset: i16,
    pub phase: u16,
    pub envelope: FfEnvelope,
    pub custom_len: u32,
    pub custom_data: *mut i16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct FfRumble {
    pub strong_magnitude: u16,
    pub weak_magnitude: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union FfParams {
    pub constant: FfConstant,
    pub periodic: FfPeriodic,
    pub rumble: FfRumble,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct FfEffect {
    pub kind: u16,
    pub id: i16,
    pub direction: u16,
    pub trigger: FfTrigger,
    pub replay: FfReplay,
    pub params: FfParams,
}

impl FfEffect {
    pub fn new(kind: u16, params: FfParams) -> Self {
        Self {
            kind,
            id: -1,
            direction: 0,
            trigger: FfTrigger::default(),
            replay: FfReplay::default(),
            params,
        }
    }
}

/// Uploads an effect, returning the id the kernel assigned. Pass `id = -1`
/// for a new effect, or an existing id to update it.
pub(crate) fn upload_effect(fd: BorrowedFd<'_>, effect: &mut FfEffect) -> io::Result<i16> {
    // SAFETY: `effect` matches the kernel's ff_effect and is updated in place.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), EVIOCSFF, effect as *mut FfEffect) })?;
    Ok(effect.id)
}

pub(crate) fn remove_effect(fd: BorrowedFd<'_>, id: i16) -> io::Result<()> {
    // SAFETY: EVIOCRMFF takes the effect id by value.
    check(unsafe { libc::ioctl(fd.as_raw_fd(), EVIOCRMFF, libc::c_int::from(id)) }).map(|_| ())
}

/// Writes one input event to an evdev node (used to start, stop, or tune
/// force-feedback playback).
pub(crate) fn write_event(fd: BorrowedFd<'_>, kind: u16, code: u16, value: i32) -> io::Result<()> {
    // SAFETY: input_event is plain data.
    let mut event: libc::input_event = unsafe { mem::zeroed() };
    event.type_ = kind;
    event.code = code;
    event.value = value;
    let size = mem::size_of::<libc::input_event>();
    // SAFETY: writes exactly one input_event from a valid reference.
    let written = unsafe {
        libc::write(
            fd.as_raw_fd(),
            (&event as *const libc::input_event).cast(),
            size,
        )
    };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// One decoded input event: type, code, value.
pub(crate) type RawEvent = (u16, u16, i32);

const EVENT_BATCH: usize = 32;

/// Reads the events currently buffered on a non-blocking evdev node.
pub(crate) fn read_events(fd: BorrowedFd<'_>) -> io::Result<SmallVec<[RawEvent; EVENT_BATCH]>> {
    // SAFETY: input_event is plain data.
    let mut events: [libc::input_event; EVENT_BATCH] = unsafe { mem::zeroed() };
    let size = mem::size_of::<libc::input_event>();
    // SAFETY: the buffer holds EVENT_BATCH input_event values; the kernel
    // only writes whole events.
    let read = unsafe {
        libc::read(
            fd.as_raw_fd(),
            events.as_mut_ptr().cast(),
            EVENT_BATCH * size,
        )
    };
    if read < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(events[..read as usize / size]
        .iter()
        .map(|event| (event.type_, event.code, event.value))
        .collect())
}
