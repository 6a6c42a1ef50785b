//! Virtual mouse and keyboard owned by the bus itself.

use std::sync::{Arc, Mutex};

use hidbus_report::usage::{generic, page};
use hidbus_report::{ButtonBlock, DescriptorBuilder, Error as ReportError, InputReport};
use log::debug;

use crate::device::{lock, VirtualDevice};
use crate::error::{Error, Result};
use crate::events::BusEvent;
use crate::queue::EventSink;
use crate::types::{BusId, DeviceDesc, NativeHandle};

pub(crate) const MOUSE: NativeHandle = NativeHandle(1);
pub(crate) const KEYBOARD: NativeHandle = NativeHandle(2);

pub const MOUSE_BUTTONS: u16 = 3;
/// Highest keyboard usage the virtual keyboard reports.
pub const KEYBOARD_MAX_USAGE: u16 = 101;

struct PseudoDevice {
    handle: NativeHandle,
    buttons: ButtonBlock,
    report: Mutex<InputReport>,
}

impl PseudoDevice {
    fn build(
        handle: NativeHandle,
        usage: u16,
        button_page: u16,
        usage_range: (u16, u16),
        product: &str,
    ) -> Result<(Self, DeviceDesc, VirtualDevice)> {
        let mut builder = DescriptorBuilder::begin(page::GENERIC, usage)?;
        let buttons = builder.add_buttons(button_page, usage_range.0, usage_range.1)?;
        builder.align_input()?;
        let descriptor = builder.end()?;
        let report = InputReport::new(descriptor.input())?;

        let mut desc = DeviceDesc::new(BusId::PSEUDO);
        desc.manufacturer = "hidbus".to_string();
        desc.product = product.to_string();
        desc.serial = "0000".to_string();

        let device = Self {
            handle,
            buttons,
            report: Mutex::new(report),
        };
        Ok((device, desc, VirtualDevice::new(descriptor, None)))
    }

    fn set(&self, sink: &EventSink, index: u16, pressed: bool) -> Result<()> {
        if index >= self.buttons.count() {
            return Err(ReportError::InvalidParameter("button index").into());
        }
        // queued under the lock so reports reach the bus in state order
        let mut report = lock(&self.report);
        self.buttons.set(report.as_mut_bytes(), index, pressed);
        if !sink.push(BusEvent::InputReport {
            bus: BusId::PSEUDO,
            handle: self.handle,
            report: report.snapshot()?,
        }) {
            return Err(Error::DeviceDeleted);
        }
        Ok(())
    }
}

/// Injects input into the virtual mouse and keyboard.
#[derive(Clone)]
pub struct PseudoInput {
    mouse: Arc<PseudoDevice>,
    keyboard: Arc<PseudoDevice>,
    sink: EventSink,
}

impl PseudoInput {
    /// Presses or releases mouse button `index` (0-based).
    pub fn mouse_button(&self, index: u16, pressed: bool) -> Result<()> {
        self.mouse.set(&self.sink, index, pressed)
    }

    /// Presses or releases the key with keyboard page usage `usage`.
    pub fn key(&self, usage: u16, pressed: bool) -> Result<()> {
        self.keyboard.set(&self.sink, usage, pressed)
    }
}

/// Builds both devices and queues their arrival.
pub(crate) fn create(sink: EventSink) -> Result<PseudoInput> {
    let (mouse, mouse_desc, mouse_native) = PseudoDevice::build(
        MOUSE,
        generic::MOUSE,
        page::BUTTON,
        (1, MOUSE_BUTTONS),
        "hidbus mouse",
    )?;
    let (keyboard, keyboard_desc, keyboard_native) = PseudoDevice::build(
        KEYBOARD,
        generic::KEYBOARD,
        page::KEYBOARD,
        (0, KEYBOARD_MAX_USAGE),
        "hidbus keyboard",
    )?;

    for (desc, handle, native) in [
        (mouse_desc, MOUSE, mouse_native),
        (keyboard_desc, KEYBOARD, keyboard_native),
    ] {
        debug!("queueing pseudo device {desc}");
        sink.push(BusEvent::DeviceCreated {
            desc,
            handle,
            device: Arc::new(native),
        });
    }

    Ok(PseudoInput {
        mouse: Arc::new(mouse),
        keyboard: Arc::new(keyboard),
        sink,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NativeDevice;
    use crate::queue::EventQueue;
    use hidbus_report::summarize;

    fn created(queue: &EventQueue) -> Vec<(DeviceDesc, Arc<dyn NativeDevice>)> {
        let mut out = Vec::new();
        while let Some(event) = queue.try_pop() {
            if let BusEvent::DeviceCreated { desc, device, .. } = event {
                out.push((desc, device));
            }
        }
        out
    }

    #[test]
    fn creates_mouse_and_keyboard() {
        let queue = EventQueue::new();
        create(queue.sink()).unwrap();
        let devices = created(&queue);
        assert_eq!(devices.len(), 2);

        let mouse = summarize(devices[0].1.report_descriptor()).unwrap();
        assert_eq!(mouse.top_usage, (page::GENERIC, generic::MOUSE));
        assert_eq!(mouse.buttons, 3);
        assert_eq!(mouse.max_input_len, 1);

        let keyboard = summarize(devices[1].1.report_descriptor()).unwrap();
        assert_eq!(keyboard.top_usage, (page::GENERIC, generic::KEYBOARD));
        assert_eq!(keyboard.max_input_len, 13);
        assert_eq!(devices[1].0.product, "hidbus keyboard");
    }

    #[test]
    fn outputs_are_not_implemented() {
        let queue = EventQueue::new();
        create(queue.sink()).unwrap();
        let (_, mouse) = created(&queue).remove(0);
        let err = mouse.set_output_report(&[0, 1]).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::NotImplemented);
    }

    #[test]
    fn injection_queues_reports() {
        let queue = EventQueue::new();
        let input = create(queue.sink()).unwrap();
        created(&queue);

        input.mouse_button(1, true).unwrap();
        input.key(4, true).unwrap();
        assert!(input.mouse_button(3, true).is_err());

        let Some(BusEvent::InputReport { handle, report, .. }) = queue.try_pop() else {
            panic!("expected mouse report");
        };
        assert_eq!((handle, report), (MOUSE, vec![0b010]));
        let Some(BusEvent::InputReport { handle, report, .. }) = queue.try_pop() else {
            panic!("expected keyboard report");
        };
        assert_eq!(handle, KEYBOARD);
        assert_eq!(report[0], 0b1_0000);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn concurrent_injection_ends_on_final_state() {
        let queue = EventQueue::new();
        let input = create(queue.sink()).unwrap();
        created(&queue);

        let threads: Vec<_> = (0..MOUSE_BUTTONS)
            .map(|button| {
                let input = input.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        input.mouse_button(button, i % 2 == 0).unwrap();
                    }
                    input.mouse_button(button, true).unwrap();
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let mut last = None;
        while let Some(event) = queue.try_pop() {
            if let BusEvent::InputReport { report, .. } = event {
                last = Some(report);
            }
        }
        assert_eq!(last, Some(vec![0b111]));
    }
}
