use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap;

use crate::device::{lock, NativeDevice};
use crate::error::{Error, Result};
use crate::pending::PendingReads;
use crate::types::{BusId, DeviceDesc, DeviceInfo, DeviceRef, NativeHandle};

/// Registered device: description, native operations and read state.
pub(crate) struct DeviceEntry {
    pub reference: DeviceRef,
    pub handle: NativeHandle,
    pub desc: DeviceDesc,
    pub native: Arc<dyn NativeDevice>,
    reads: Mutex<PendingReads>,
}

impl DeviceEntry {
    pub fn reads(&self) -> MutexGuard<'_, PendingReads> {
        lock(&self.reads)
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            reference: self.reference,
            handle: self.handle,
            desc: self.desc.clone(),
        }
    }
}

/// Live devices keyed by bus id and native handle.
pub(crate) struct Registry {
    devices: Mutex<AHashMap<(BusId, NativeHandle), Arc<DeviceEntry>>>,
    next_ref: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            devices: Mutex::new(AHashMap::new()),
            next_ref: AtomicU64::new(1),
        }
    }
}

impl Registry {
    pub fn register(
        &self,
        desc: DeviceDesc,
        handle: NativeHandle,
        native: Arc<dyn NativeDevice>,
    ) -> Result<Arc<DeviceEntry>> {
        let mut devices = lock(&self.devices);
        let key = (desc.bus, handle);
        if devices.contains_key(&key) {
            return Err(Error::AlreadyRegistered(format!("{} {:?}", desc.bus, handle)));
        }
        let entry = Arc::new(DeviceEntry {
            reference: DeviceRef(self.next_ref.fetch_add(1, Ordering::Relaxed)),
            handle,
            desc,
            native,
            reads: Mutex::new(PendingReads::default()),
        });
        devices.insert(key, entry.clone());
        Ok(entry)
    }

    /// Removes a device. A second call for the same key returns `None`.
    pub fn unregister(&self, bus: BusId, handle: NativeHandle) -> Option<Arc<DeviceEntry>> {
        lock(&self.devices).remove(&(bus, handle))
    }

    pub fn get(&self, bus: BusId, handle: NativeHandle) -> Option<Arc<DeviceEntry>> {
        lock(&self.devices).get(&(bus, handle)).cloned()
    }

    pub fn find(&self, reference: DeviceRef) -> Option<Arc<DeviceEntry>> {
        lock(&self.devices)
            .values()
            .find(|entry| entry.reference == reference)
            .cloned()
    }

    /// Snapshot ordered by registration.
    pub fn list(&self) -> Vec<DeviceInfo> {
        let mut list: Vec<_> = lock(&self.devices).values().map(|e| e.info()).collect();
        list.sort_by_key(|info| info.reference);
        list
    }

    pub fn drain(&self) -> Vec<Arc<DeviceEntry>> {
        let mut entries: Vec<_> = lock(&self.devices).drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|entry| entry.reference);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl NativeDevice for Null {
        fn report_descriptor(&self) -> &[u8] {
            &[]
        }

        fn set_output_report(&self, _: &[u8]) -> Result<usize> {
            Err(Error::Unsupported)
        }

        fn get_feature_report(&self, _: &mut [u8]) -> Result<usize> {
            Err(Error::Unsupported)
        }

        fn set_feature_report(&self, _: &[u8]) -> Result<usize> {
            Err(Error::Unsupported)
        }
    }

    fn register(registry: &Registry, bus: BusId, handle: u64) -> Result<Arc<DeviceEntry>> {
        registry.register(DeviceDesc::new(bus), NativeHandle(handle), Arc::new(Null))
    }

    #[test]
    fn handles_are_unique_per_bus() {
        let registry = Registry::default();
        let first = register(&registry, BusId::SDL, 1).unwrap();
        assert!(matches!(
            register(&registry, BusId::SDL, 1),
            Err(Error::AlreadyRegistered(_))
        ));
        let other = register(&registry, BusId::EVDEV, 1).unwrap();
        assert_ne!(first.reference, other.reference);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Registry::default();
        let entry = register(&registry, BusId::HIDRAW, 5).unwrap();
        assert!(registry.unregister(BusId::HIDRAW, NativeHandle(5)).is_some());
        assert!(registry.unregister(BusId::HIDRAW, NativeHandle(5)).is_none());
        assert!(registry.find(entry.reference).is_none());
        assert!(registry.get(BusId::HIDRAW, NativeHandle(5)).is_none());
    }

    #[test]
    fn references_are_not_reused() {
        let registry = Registry::default();
        let first = register(&registry, BusId::SDL, 1).unwrap().reference;
        registry.unregister(BusId::SDL, NativeHandle(1));
        let second = register(&registry, BusId::SDL, 1).unwrap().reference;
        assert!(second > first);
        assert_eq!(registry.find(second).unwrap().handle, NativeHandle(1));
    }
}
