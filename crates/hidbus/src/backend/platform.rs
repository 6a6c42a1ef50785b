//! Platform HID backend built on hidapi, polled from its own thread.

use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hidapi::{DeviceInfo, HidApi, HidDevice, HidError};
use hidbus_report::summarize;
use hidbus_report::usage::{generic, page};
use log::{debug, info, trace, warn};

use super::{Backend, BackendHandle, Wait, Waker};
use crate::classify;
use crate::device::{lock, NativeDevice};
use crate::error::{Error, Result};
use crate::events::BusEvent;
use crate::options::PlatformOptions;
use crate::queue::EventSink;
use crate::types::{BusId, DeviceDesc, NativeHandle};

/// Reports drained per device and cycle, so one busy device cannot starve
/// the others.
const MAX_REPORTS_PER_CYCLE: usize = 32;
const MAX_REPORT_LEN: usize = 1024;
const MAX_DESCRIPTOR_LEN: usize = 4096;
/// `ENODEV` on Linux and the BSDs.
const ENODEV: i32 = 19;

fn hid_error(e: HidError) -> Error {
    Error::Backend(e.to_string())
}

/// Whether a read failure means the device is gone. Anything else is
/// skipped for this cycle; the rescan presence check still removes devices
/// hidapi reports ambiguously.
fn is_disconnect(e: &HidError) -> bool {
    match e {
        HidError::IoError { error } => {
            error.raw_os_error() == Some(ENODEV)
                || error.kind() == std::io::ErrorKind::NotConnected
        }
        HidError::HidApiError { message } => {
            let message = message.to_ascii_lowercase();
            message.contains("disconnected") || message.contains("no such device")
        }
        _ => false,
    }
}

/// Only game controllers are taken from the platform manager.
fn accepted(usage_page: u16, usage: u16) -> bool {
    usage_page == page::GENERIC
        && matches!(
            usage,
            generic::JOYSTICK | generic::GAMEPAD | generic::MULTI_AXIS_CONTROLLER
        )
}

struct PlatformDevice {
    device: Mutex<HidDevice>,
    descriptor: Vec<u8>,
}

impl NativeDevice for PlatformDevice {
    fn report_descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    fn set_output_report(&self, report: &[u8]) -> Result<usize> {
        lock(&self.device).write(report).map_err(hid_error)
    }

    fn get_feature_report(&self, report: &mut [u8]) -> Result<usize> {
        lock(&self.device)
            .get_feature_report(report)
            .map_err(hid_error)
    }

    fn set_feature_report(&self, report: &[u8]) -> Result<usize> {
        lock(&self.device)
            .send_feature_report(report)
            .map_err(hid_error)?;
        Ok(report.len())
    }
}

struct Opened {
    handle: NativeHandle,
    path: CString,
    device: Arc<PlatformDevice>,
    /// Set while reads keep failing, so the failure is logged once.
    failing: bool,
}

struct StopFlag(Arc<AtomicBool>);

impl Waker for StopFlag {
    fn wake(&self) {
        self.0.store(true, Ordering::Release);
    }
}

pub(crate) struct PlatformBackend {
    api: HidApi,
    poll_interval: Duration,
    rescan_interval: Duration,
    last_scan: Option<Instant>,
    stop: Arc<AtomicBool>,
    opened: Vec<Opened>,
    next_handle: u64,
    ready: VecDeque<BusEvent>,
    buffer: Vec<u8>,
}

impl PlatformBackend {
    pub fn init(options: PlatformOptions) -> Result<(Self, Box<dyn Waker>)> {
        let api = HidApi::new().map_err(|e| Error::BackendInit(format!("hidapi: {e}")))?;
        let stop = Arc::new(AtomicBool::new(false));
        let backend = Self {
            api,
            poll_interval: Duration::from_millis(options.poll_interval_ms.max(1)),
            rescan_interval: Duration::from_millis(options.rescan_interval_ms),
            last_scan: None,
            stop: Arc::clone(&stop),
            opened: Vec::new(),
            next_handle: 1,
            ready: VecDeque::new(),
            buffer: vec![0; MAX_REPORT_LEN],
        };
        Ok((backend, Box::new(StopFlag(stop))))
    }

    fn open(&mut self, info: &DeviceInfo) -> Result<()> {
        let device = info.open_device(&self.api).map_err(hid_error)?;
        device.set_blocking_mode(false).map_err(hid_error)?;
        let mut descriptor = vec![0; MAX_DESCRIPTOR_LEN];
        let len = device
            .get_report_descriptor(&mut descriptor)
            .map_err(hid_error)?;
        descriptor.truncate(len);

        let mut desc = DeviceDesc::new(BusId::PLATFORM);
        desc.vendor_id = info.vendor_id();
        desc.product_id = info.product_id();
        desc.version = info.release_number();
        desc.interface = u16::try_from(info.interface_number()).ok();
        desc.manufacturer = info.manufacturer_string().unwrap_or_default().to_string();
        desc.product = info.product_string().unwrap_or_default().to_string();
        desc.serial = info.serial_number().unwrap_or("0000").to_string();
        let (axes, buttons) = summarize(&descriptor)
            .map(|summary| (summary.axes, summary.buttons))
            .unwrap_or_default();
        classify::finalize(&mut desc, axes, buttons);

        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        let device = Arc::new(PlatformDevice {
            device: Mutex::new(device),
            descriptor,
        });
        info!("{desc} opened");
        self.ready.push_back(BusEvent::DeviceCreated {
            desc,
            handle,
            device: Arc::clone(&device) as Arc<dyn NativeDevice>,
        });
        self.opened.push(Opened {
            handle,
            path: info.path().to_owned(),
            device,
            failing: false,
        });
        Ok(())
    }

    fn remove_at(&mut self, index: usize) {
        let opened = self.opened.swap_remove(index);
        debug!("{:?} removed", opened.path);
        self.ready.push_back(BusEvent::DeviceRemoved {
            bus: BusId::PLATFORM,
            handle: opened.handle,
        });
    }

    fn rescan(&mut self) {
        if let Err(e) = self.api.refresh_devices() {
            warn!("hid rescan failed: {e}");
            return;
        }
        let present: Vec<CString> = self
            .api
            .device_list()
            .filter(|info| accepted(info.usage_page(), info.usage()))
            .map(|info| info.path().to_owned())
            .collect();

        for index in (0..self.opened.len()).rev() {
            if !present.contains(&self.opened[index].path) {
                self.remove_at(index);
            }
        }

        let fresh: Vec<DeviceInfo> = self
            .api
            .device_list()
            .filter(|info| accepted(info.usage_page(), info.usage()))
            .filter(|info| !self.is_open(info.path()))
            .cloned()
            .collect();
        for info in fresh {
            if let Err(e) = self.open(&info) {
                warn!("failed to open {:?}: {e}", info.path());
            }
        }
    }

    fn is_open(&self, path: &CStr) -> bool {
        self.opened.iter().any(|opened| opened.path.as_c_str() == path)
    }

    /// Drains buffered reports. Returns false once the device is gone.
    fn read(&mut self, index: usize) -> bool {
        let opened = &mut self.opened[index];
        let device = lock(&opened.device.device);
        for _ in 0..MAX_REPORTS_PER_CYCLE {
            match device.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(len) => {
                    opened.failing = false;
                    self.ready.push_back(BusEvent::InputReport {
                        bus: BusId::PLATFORM,
                        handle: opened.handle,
                        report: self.buffer[..len].to_vec(),
                    });
                }
                Err(e) if is_disconnect(&e) => {
                    debug!("{:?} disconnected: {e}", opened.path);
                    return false;
                }
                Err(e) => {
                    if !opened.failing {
                        warn!("read from {:?} failed: {e}", opened.path);
                        opened.failing = true;
                    } else {
                        trace!("read from {:?} failed: {e}", opened.path);
                    }
                    break;
                }
            }
        }
        true
    }
}

impl Backend for PlatformBackend {
    fn wait(&mut self) -> Wait {
        if let Some(event) = self.ready.pop_front() {
            return Wait::Event(event);
        }
        if self.stop.load(Ordering::Acquire) {
            return Wait::Terminal;
        }

        if self
            .last_scan
            .map_or(true, |last| last.elapsed() >= self.rescan_interval)
        {
            self.rescan();
            self.last_scan = Some(Instant::now());
        }

        for index in (0..self.opened.len()).rev() {
            if !self.read(index) {
                self.remove_at(index);
            }
        }

        if self.ready.is_empty() {
            thread::sleep(self.poll_interval);
        }
        Wait::Pending
    }
}

pub(crate) fn start(options: PlatformOptions, sink: EventSink) -> Result<BackendHandle> {
    BackendHandle::spawn("platform", sink, move || PlatformBackend::init(options))
}
