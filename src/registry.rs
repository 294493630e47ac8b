/// In-memory store of known devices keyed by identity
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{AccelerometerSample, Device, DeviceId};

/// Currently known devices for one scan session
///
/// Holds at most one [`Device`] per [`DeviceId`]. Entries live until the
/// registry is dropped; there is no eviction.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the reading for `id`
    ///
    /// Returns the device and whether it was created by this call. An
    /// existing device is mutated in place, so references held by
    /// observers keep seeing the latest sample.
    pub fn upsert(&mut self, id: DeviceId, sample: AccelerometerSample) -> (Arc<Device>, bool) {
        let mut is_new = false;
        let device = self
            .devices
            .entry(id)
            .or_insert_with(|| {
                is_new = true;
                Arc::new(Device::new(id))
            })
            .clone();

        device.record(sample);
        (device, is_new)
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.get(id).cloned()
    }

    /// All known devices, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
