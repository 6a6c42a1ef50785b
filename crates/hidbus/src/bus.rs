use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, unbounded, Sender};
use log::{debug, info, trace, warn};

use crate::backend::BackendHandle;
use crate::device::lock;
use crate::error::Result;
use crate::events::{BusEvent, Notification, NotificationReceiver};
use crate::handle::DeviceHandle;
use crate::options::BusOptions;
use crate::pseudo::{self, PseudoInput};
use crate::queue::{EventQueue, EventSink};
use crate::registry::Registry;
use crate::types::{DeviceInfo, DeviceRef};

pub(crate) struct Inner {
    pub registry: Registry,
    pub subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl Inner {
    fn notify(subscribers: &mut Vec<Sender<Notification>>, notification: Notification) {
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Applies one backend event to the registry.
    pub(crate) fn dispatch(&self, event: BusEvent) {
        match event {
            BusEvent::DeviceCreated {
                desc,
                handle,
                device,
            } => {
                if let Err(e) = device.start() {
                    warn!("failed to start {desc}: {e}");
                    device.stop();
                    return;
                }
                let mut subscribers = lock(&self.subscribers);
                match self.registry.register(desc, handle, Arc::clone(&device)) {
                    Ok(entry) => {
                        info!("{} arrived as {}", entry.desc, entry.reference);
                        Self::notify(&mut subscribers, Notification::Arrived(entry.info()));
                    }
                    Err(e) => {
                        warn!("{e}");
                        device.stop();
                    }
                }
            }
            BusEvent::DeviceRemoved { bus, handle } => {
                let mut subscribers = lock(&self.subscribers);
                let Some(entry) = self.registry.unregister(bus, handle) else {
                    trace!("{bus} {handle:?} already removed");
                    return;
                };
                let cancelled = entry.reads().cancel_all();
                entry.native.stop();
                info!(
                    "{} removed, {cancelled} pending reads failed",
                    entry.reference
                );
                Self::notify(&mut subscribers, Notification::Removed(entry.info()));
            }
            BusEvent::InputReport {
                bus,
                handle,
                report,
            } => {
                let Some(entry) = self.registry.get(bus, handle) else {
                    trace!("report for unknown device {bus} {handle:?}");
                    return;
                };
                let pushed = entry.reads().push_report(&report);
                if let Err(e) = pushed {
                    warn!("dropped report of {}: {e}", entry.reference);
                }
            }
        }
    }

    /// Removes every device, failing their pending reads.
    fn teardown(&self) {
        let mut subscribers = lock(&self.subscribers);
        for entry in self.registry.drain() {
            entry.reads().cancel_all();
            entry.native.stop();
            Self::notify(&mut subscribers, Notification::Removed(entry.info()));
        }
    }
}

#[cfg(feature = "sdl2-backend")]
fn start_sdl(options: &BusOptions, sink: &EventSink) -> Option<BackendHandle> {
    if !options.sdl.enabled {
        return None;
    }
    crate::backend::sdl::start(options.sdl.clone(), sink.clone())
        .map_err(|e| warn!("sdl backend unavailable: {e}"))
        .ok()
}

#[cfg(not(feature = "sdl2-backend"))]
fn start_sdl(_: &BusOptions, _: &EventSink) -> Option<BackendHandle> {
    None
}

#[cfg(all(target_os = "linux", feature = "udev-backend"))]
fn start_udev(options: &BusOptions, sink: &EventSink) -> Option<BackendHandle> {
    if !options.udev.enabled {
        return None;
    }
    crate::backend::udev::start(options.udev.clone(), sink.clone())
        .map_err(|e| warn!("udev backend unavailable: {e}"))
        .ok()
}

#[cfg(not(all(target_os = "linux", feature = "udev-backend")))]
fn start_udev(_: &BusOptions, _: &EventSink) -> Option<BackendHandle> {
    None
}

#[cfg(feature = "hidapi-backend")]
fn start_platform(options: &BusOptions, sink: &EventSink) -> Option<BackendHandle> {
    if !options.platform.enabled {
        return None;
    }
    crate::backend::platform::start(options.platform.clone(), sink.clone())
        .map_err(|e| warn!("platform backend unavailable: {e}"))
        .ok()
}

#[cfg(not(feature = "hidapi-backend"))]
fn start_platform(_: &BusOptions, _: &EventSink) -> Option<BackendHandle> {
    None
}

/// SDL takes every device when it starts. Otherwise udev runs, and the
/// platform manager covers systems without it.
fn start_backends(options: &BusOptions, sink: &EventSink) -> Vec<BackendHandle> {
    if let Some(sdl) = start_sdl(options, sink) {
        return vec![sdl];
    }
    match start_udev(options, sink) {
        Some(udev) => vec![udev],
        None => start_platform(options, sink).into_iter().collect(),
    }
}

/// The running device bus: native backends feeding one dispatch thread.
pub struct Bus {
    inner: Arc<Inner>,
    backends: Vec<BackendHandle>,
    pseudo: Option<PseudoInput>,
    stop_tx: Sender<()>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Bus {
    /// Starts the dispatcher, the pseudo devices and the enabled backends.
    ///
    /// A backend that fails to initialize is logged and skipped.
    pub fn start(options: &BusOptions) -> Result<Self> {
        let queue = EventQueue::new();
        let sink = queue.sink();
        let inner = Arc::new(Inner {
            registry: Registry::default(),
            subscribers: Mutex::new(Vec::new()),
        });

        let pseudo = if options.pseudo_devices {
            Some(pseudo::create(sink.clone())?)
        } else {
            None
        };

        let (stop_tx, stop_rx) = unbounded::<()>();
        let dispatch = Arc::clone(&inner);
        let dispatcher = thread::Builder::new()
            .name("hidbus-dispatch".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(queue.receiver()) -> event => match event {
                            Ok(event) => dispatch.dispatch(event),
                            Err(_) => break,
                        },
                    }
                }
                let dropped = queue.drain();
                if dropped > 0 {
                    debug!("dropped {dropped} queued events");
                }
                dispatch.teardown();
            })?;

        let backends = start_backends(options, &sink);
        info!(
            "bus started with backends: {}",
            backends
                .iter()
                .map(BackendHandle::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            inner,
            backends,
            pseudo,
            stop_tx,
            dispatcher: Some(dispatcher),
        })
    }

    /// Subscribes to arrivals and removals. Devices already registered are
    /// announced first.
    pub fn subscribe(&self) -> NotificationReceiver {
        let (tx, rx) = unbounded();
        let mut subscribers = lock(&self.inner.subscribers);
        for info in self.inner.registry.list() {
            let _ = tx.send(Notification::Arrived(info));
        }
        subscribers.push(tx);
        rx
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.inner.registry.list()
    }

    pub fn device(&self, reference: DeviceRef) -> Option<DeviceHandle> {
        self.inner
            .registry
            .find(reference)
            .map(|entry| DeviceHandle { entry })
    }

    /// Injection handle of the virtual mouse and keyboard.
    pub fn pseudo_input(&self) -> Option<&PseudoInput> {
        self.pseudo.as_ref()
    }

    /// Names of the backends that started.
    pub fn backends(&self) -> Vec<&'static str> {
        self.backends.iter().map(BackendHandle::name).collect()
    }

    /// Stops the backends, then the dispatcher. Every remaining device is
    /// removed and its pending reads fail.
    pub fn stop(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        for backend in &mut self.backends {
            backend.stop();
        }
        self.backends.clear();
        let _ = self.stop_tx.send(());
        if dispatcher.join().is_err() {
            warn!("dispatch thread panicked");
        }
        debug!("bus stopped");
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::Recorder;
    use crate::device::{NativeDevice, VirtualDevice};
    use crate::types::{BusId, DeviceDesc, NativeHandle};
    use hidbus_report::gamepad::GamepadLayout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn inner() -> Inner {
        Inner {
            registry: Registry::default(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn created(handle: u64) -> BusEvent {
        let (descriptor, _) = GamepadLayout::descriptor(true).unwrap();
        let device: Arc<dyn NativeDevice> = Arc::new(VirtualDevice::new(
            descriptor,
            Some(Box::new(Recorder::default())),
        ));
        BusEvent::DeviceCreated {
            desc: DeviceDesc::new(BusId::SDL),
            handle: NativeHandle(handle),
            device,
        }
    }

    fn report(handle: u64, byte: u8) -> BusEvent {
        BusEvent::InputReport {
            bus: BusId::SDL,
            handle: NativeHandle(handle),
            report: vec![1, byte],
        }
    }

    #[test]
    fn queued_reads_complete_in_order() {
        let inner = inner();
        inner.dispatch(created(7));
        let entry = inner.registry.get(BusId::SDL, NativeHandle(7)).unwrap();
        let tickets: Vec<_> = (0..3).map(|_| entry.reads().read(16)).collect();
        for byte in 0..3 {
            inner.dispatch(report(7, byte));
        }
        for (byte, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.wait().unwrap(), vec![1, byte as u8]);
        }
    }

    #[test]
    fn removal_fails_reads_and_notifies() {
        let inner = inner();
        let (tx, rx) = unbounded();
        lock(&inner.subscribers).push(tx);
        inner.dispatch(created(3));
        let entry = inner.registry.get(BusId::SDL, NativeHandle(3)).unwrap();
        let tickets: Vec<_> = (0..2).map(|_| entry.reads().read(16)).collect();

        inner.dispatch(BusEvent::DeviceRemoved {
            bus: BusId::SDL,
            handle: NativeHandle(3),
        });
        inner.dispatch(BusEvent::DeviceRemoved {
            bus: BusId::SDL,
            handle: NativeHandle(3),
        });
        for ticket in tickets {
            assert!(matches!(ticket.wait(), Err(crate::Error::DeviceDeleted)));
        }
        assert!(inner.registry.list().is_empty());

        assert!(matches!(rx.try_recv(), Ok(Notification::Arrived(_))));
        assert!(matches!(rx.try_recv(), Ok(Notification::Removed(_))));
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn reports_for_unknown_devices_are_ignored() {
        let inner = inner();
        inner.dispatch(report(9, 1));
        assert!(inner.registry.list().is_empty());
    }

    /// Native device counting `stop` calls.
    struct Tracked {
        descriptor: Vec<u8>,
        stops: Arc<AtomicUsize>,
    }

    impl NativeDevice for Tracked {
        fn report_descriptor(&self) -> &[u8] {
            &self.descriptor
        }

        fn set_output_report(&self, _: &[u8]) -> crate::Result<usize> {
            Err(crate::Error::Unsupported)
        }

        fn get_feature_report(&self, _: &mut [u8]) -> crate::Result<usize> {
            Err(crate::Error::Unsupported)
        }

        fn set_feature_report(&self, _: &[u8]) -> crate::Result<usize> {
            Err(crate::Error::Unsupported)
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn rejected_duplicate_is_stopped() {
        let inner = inner();
        inner.dispatch(created(5));
        let stops = Arc::new(AtomicUsize::new(0));
        inner.dispatch(BusEvent::DeviceCreated {
            desc: DeviceDesc::new(BusId::SDL),
            handle: NativeHandle(5),
            device: Arc::new(Tracked {
                descriptor: Vec::new(),
                stops: Arc::clone(&stops),
            }),
        });
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(inner.registry.list().len(), 1);
    }

    #[test]
    fn duplicate_creation_keeps_first_device() {
        let inner = inner();
        inner.dispatch(created(1));
        let first = inner.registry.get(BusId::SDL, NativeHandle(1)).unwrap();
        inner.dispatch(created(1));
        assert_eq!(inner.registry.list().len(), 1);
        assert_eq!(
            inner.registry.get(BusId::SDL, NativeHandle(1)).unwrap().reference,
            first.reference
        );
    }
}
