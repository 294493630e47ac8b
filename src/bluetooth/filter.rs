/// Service-data filtering of raw advertisements
use thiserror::Error;

use crate::bytes::ByteReader;
use crate::models::RawAdvertisement;

// Vendor service-data layout
pub const UNITY_SERVICE: u16 = 0x9AEF; // Advertised 16-bit service identifier
const DEVICE_TYPE_OFFSET: usize = 6;
const PACKET_TYPE_OFFSET: usize = 7;
const MIN_SERVICE_DATA_LEN: usize = 8; // Must exceed 7 bytes

/// Why an advertisement is not one of ours
///
/// None of these are failures: coexisting broadcasters and other packet
/// types are expected, so rejections are counted and otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no service data for the known service")]
    UnknownService,
    #[error("service data too short: {len} bytes")]
    ShortServiceData { len: usize },
    #[error("unrecognised device type {device_type} / packet type {packet_type}")]
    UnexpectedType { device_type: u8, packet_type: u8 },
    #[error("missing manufacturer data")]
    MissingManufacturerData,
}

/// Matches advertisements carrying the known service with the expected
/// device and packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementFilter {
    service: u16,
    device_type: u8,
    packet_type: u8,
}

impl Default for AdvertisementFilter {
    fn default() -> Self {
        Self::new(UNITY_SERVICE)
    }
}

impl AdvertisementFilter {
    /// Filter for `service` accepting device type 0, packet type 0
    pub fn new(service: u16) -> Self {
        Self {
            service,
            device_type: 0,
            packet_type: 0,
        }
    }

    pub fn service(&self) -> u16 {
        self.service
    }

    /// Return the manufacturer bytes if `raw` passes the filter
    pub fn matches<'a>(&self, raw: &'a RawAdvertisement) -> Option<&'a [u8]> {
        self.classify(raw).ok()
    }

    /// Like [`matches`](Self::matches), but reports the reason for a rejection
    pub fn classify<'a>(&self, raw: &'a RawAdvertisement) -> Result<&'a [u8], Rejection> {
        let service_data = raw
            .service_data
            .get(&self.service)
            .ok_or(Rejection::UnknownService)?;

        if service_data.len() < MIN_SERVICE_DATA_LEN {
            return Err(Rejection::ShortServiceData {
                len: service_data.len(),
            });
        }

        let reader = ByteReader::new(service_data);
        let short = |_| Rejection::ShortServiceData {
            len: service_data.len(),
        };
        let device_type: u8 = reader.read(DEVICE_TYPE_OFFSET).map_err(short)?;
        let packet_type: u8 = reader.read(PACKET_TYPE_OFFSET).map_err(short)?;

        if device_type != self.device_type || packet_type != self.packet_type {
            return Err(Rejection::UnexpectedType {
                device_type,
                packet_type,
            });
        }

        raw.manufacturer_data
            .as_deref()
            .ok_or(Rejection::MissingManufacturerData)
    }
}
