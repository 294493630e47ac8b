//! Connectionless accelerometer telemetry over Bluetooth LE advertisements.
//!
//! Advertisements flow from the radio driver through [`ScanSession`], which
//! filters them on service data, decodes the accelerometer payload and keeps
//! the latest reading per device in a [`DeviceRegistry`].

pub mod bluetooth;
pub mod bytes;
pub mod config;
pub mod models;
pub mod registry;
pub mod session;
pub mod utils;

pub use bluetooth::{decode_payload, AdvertisementFilter, DecodeError, Rejection};
pub use bytes::{ByteReader, InsufficientData};
pub use config::{ConfigError, ScanConfig};
pub use models::{AccelerometerSample, Device, DeviceId, RawAdvertisement};
pub use registry::DeviceRegistry;
pub use session::{
    AdapterState, DeviceObserver, Radio, RadioError, RadioEvent, ScanSession, SessionOptions,
    SessionState, SessionStats,
};
