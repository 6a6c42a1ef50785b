use std::fmt::Write;
use std::io;
use std::thread::{self, JoinHandle};

use colored::Colorize;
use hidbus::report::summarize;
use hidbus::{DeviceHandle, Error, Status};

use crate::{print_debug, print_info, print_warning};

/// Read capacity when the descriptor can't be summarized.
const FALLBACK_REPORT_LEN: usize = 64;

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// One-line description of the device and its descriptor.
pub(crate) fn describe(device: &DeviceHandle) -> String {
    let summary = match summarize(device.report_descriptor()) {
        Ok(s) => format!(
            "usage {:02x}:{:02x}, {} axes, {} buttons, {} hats, {} byte reports",
            s.top_usage.0, s.top_usage.1, s.axes, s.buttons, s.hats, s.max_input_len
        ),
        Err(e) => format!("unparsed descriptor ({e})"),
    };
    format!("{} {}: {summary}", device.reference(), device.desc())
}

/// Logs every input report of `device` until it is removed.
pub(crate) fn spawn_dump(device: DeviceHandle) -> io::Result<JoinHandle<()>> {
    let mut capacity = summarize(device.report_descriptor())
        .map(|s| s.max_input_len)
        .ok()
        .filter(|&len| len > 0)
        .unwrap_or(FALLBACK_REPORT_LEN);
    thread::Builder::new()
        .name(format!("dump-{}", device.reference()))
        .spawn(move || loop {
            match device.read_report(capacity).wait() {
                Ok(report) => {
                    print_info!("{} {}", device.reference(), hex(&report));
                }
                Err(Error::DeviceDeleted) => {
                    print_debug!("{} reader finished", device.reference());
                    break;
                }
                Err(e) => {
                    if let Status::BufferTooSmall(required) = e.status() {
                        print_warning!("{} sent a {required} byte report", device.reference());
                        capacity = required;
                        continue;
                    }
                    print_warning!("{} read failed: {e}", device.reference());
                    break;
                }
            }
        })
}
