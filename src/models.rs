use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

/// Raw Q14 value that represents 1.0 g
pub const Q14_SCALE: f64 = 16384.0;

/// Opaque per-session identity of a physical advertiser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u128);

impl DeviceId {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// Build an identity from a 48-bit device address
    pub fn from_address(address: [u8; 6]) -> Self {
        let value = address
            .iter()
            .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte));
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// One received broadcast event, consumed synchronously by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub device_id: DeviceId,
    pub service_data: HashMap<u16, Vec<u8>>,
    pub manufacturer_data: Option<Vec<u8>>,
}

impl RawAdvertisement {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            service_data: HashMap::new(),
            manufacturer_data: None,
        }
    }

    pub fn with_service_data(mut self, service: u16, data: impl Into<Vec<u8>>) -> Self {
        self.service_data.insert(service, data.into());
        self
    }

    pub fn with_manufacturer_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = Some(data.into());
        self
    }
}

/// Acceleration in units of standard gravity, converted from Q14 fixed point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerometerSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerometerSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_raw(x: i16, y: i16, z: i16) -> Self {
        Self {
            x: q14_to_g(x),
            y: q14_to_g(y),
            z: q14_to_g(z),
        }
    }
}

impl fmt::Display for AccelerometerSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x:{:.2} y:{:.2} z:{:.2}", self.x, self.y, self.z)
    }
}

/// Convert one Q14 sample (16384 = 1.0 g) to g
pub fn q14_to_g(value: i16) -> f64 {
    f64::from(value) / Q14_SCALE
}

#[derive(Debug, Clone, Copy)]
struct DeviceState {
    latest_sample: Option<AccelerometerSample>,
    last_seen: OffsetDateTime,
    samples: u64,
}

/// A known advertiser and its most recent reading
///
/// The registry hands out shared references to a single `Device` per
/// identity; later readings mutate it in place.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    first_seen: OffsetDateTime,
    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(id: DeviceId) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            first_seen: now,
            state: Mutex::new(DeviceState {
                latest_sample: None,
                last_seen: now,
                samples: 0,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn first_seen(&self) -> OffsetDateTime {
        self.first_seen
    }

    pub fn latest_sample(&self) -> Option<AccelerometerSample> {
        self.lock().latest_sample
    }

    pub fn last_seen(&self) -> OffsetDateTime {
        self.lock().last_seen
    }

    /// Number of samples recorded since the device was first seen
    pub fn samples(&self) -> u64 {
        self.lock().samples
    }

    /// Overwrite the latest sample in place
    pub fn record(&self, sample: AccelerometerSample) {
        let mut state = self.lock();
        state.latest_sample = Some(sample);
        state.last_seen = OffsetDateTime::now_utc();
        state.samples += 1;
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.latest_sample() {
            Some(sample) => write!(f, "{} Accelerometer: {}", self.id, sample),
            None => write!(f, "{} Accelerometer: ", self.id),
        }
    }
}
