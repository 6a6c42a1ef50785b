use std::time::Duration;

use hidbus::report::summarize;
use hidbus::report::usage::{generic, page};
use hidbus::{Bus, BusId, BusOptions, DeviceHandle, Error, Notification, Status};

const TIMEOUT: Duration = Duration::from_secs(5);

fn pseudo_only() -> BusOptions {
    let mut options = BusOptions::default();
    options.sdl.enabled = false;
    options.udev.enabled = false;
    options.platform.enabled = false;
    options
}

fn arrivals(bus: &Bus, count: usize) -> Vec<DeviceHandle> {
    let rx = bus.subscribe();
    (0..count)
        .map(|_| match rx.recv_timeout(TIMEOUT).unwrap() {
            Notification::Arrived(info) => bus.device(info.reference).unwrap(),
            other => panic!("unexpected {other:?}"),
        })
        .collect()
}

#[test]
fn pseudo_devices_arrive_without_backends() {
    let bus = Bus::start(&pseudo_only()).unwrap();
    assert!(bus.backends().is_empty());

    let devices = arrivals(&bus, 2);
    assert!(devices.iter().all(|d| d.desc().bus == BusId::PSEUDO));

    let usages: Vec<_> = devices
        .iter()
        .map(|d| summarize(d.report_descriptor()).unwrap().top_usage)
        .collect();
    assert!(usages.contains(&(page::GENERIC, generic::MOUSE)));
    assert!(usages.contains(&(page::GENERIC, generic::KEYBOARD)));
    assert_eq!(bus.devices().len(), 2);
}

#[test]
fn injected_input_completes_pending_read() {
    let bus = Bus::start(&pseudo_only()).unwrap();
    let devices = arrivals(&bus, 2);
    let mouse = devices
        .iter()
        .find(|d| d.desc().product.contains("mouse"))
        .unwrap();

    let ticket = mouse.read_report(8);
    assert!(ticket.try_take().is_none());
    bus.pseudo_input().unwrap().mouse_button(0, true).unwrap();
    assert_eq!(ticket.wait_timeout(TIMEOUT).unwrap().unwrap(), vec![0b001]);
    assert_eq!(mouse.input_report().unwrap(), vec![0b001]);
}

#[test]
fn descriptor_copy_reports_required_size() {
    let bus = Bus::start(&pseudo_only()).unwrap();
    let device = arrivals(&bus, 1).remove(0);
    let len = device.report_descriptor().len();

    let mut small = vec![0u8; len - 1];
    let err = device.get_report_descriptor(&mut small).unwrap_err();
    assert_eq!(err.status(), Status::BufferTooSmall(len));

    let mut exact = vec![0u8; len];
    assert_eq!(device.get_report_descriptor(&mut exact).unwrap(), len);
    assert_eq!(exact, device.report_descriptor());
}

#[test]
fn stop_fails_pending_reads() {
    let mut bus = Bus::start(&pseudo_only()).unwrap();
    let rx = bus.subscribe();
    let device = arrivals(&bus, 1).remove(0);
    let ticket = device.read_report(16);

    bus.stop();
    assert!(matches!(ticket.wait(), Err(Error::DeviceDeleted)));
    assert!(device.is_removed());
    assert_eq!(
        device.set_output_report(&[0, 1]).unwrap_err().status(),
        Status::DeviceDeleted
    );
    assert!(bus.devices().is_empty());

    let removed = rx
        .try_iter()
        .filter(|n| matches!(n, Notification::Removed(_)))
        .count();
    assert_eq!(removed, 2);
}

#[test]
fn pseudo_devices_can_be_disabled() {
    let mut options = pseudo_only();
    options.pseudo_devices = false;
    let bus = Bus::start(&options).unwrap();
    assert!(bus.pseudo_input().is_none());
    assert!(bus.subscribe().recv_timeout(Duration::from_millis(100)).is_err());
}
