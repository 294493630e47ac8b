/// Accelerometer payload decoding
use thiserror::Error;

use crate::bytes::{ByteReader, InsufficientData};
use crate::models::AccelerometerSample;

// Manufacturer-data layout: three little-endian int16 samples, 1/16384 g per LSB
const ACCEL_X_OFFSET: usize = 0;
const ACCEL_Y_OFFSET: usize = 2;
const ACCEL_Z_OFFSET: usize = 4;
pub const PAYLOAD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("accelerometer payload too short: {len} bytes, need 6")]
    TooShort { len: usize },
    #[error(transparent)]
    InsufficientData(#[from] InsufficientData),
}

/// Decode the accelerometer record from manufacturer data
///
/// Layout:
/// - Bytes 0-1: Acceleration X (signed 16-bit, Q14)
/// - Bytes 2-3: Acceleration Y (signed 16-bit, Q14)
/// - Bytes 4-5: Acceleration Z (signed 16-bit, Q14)
///
/// Trailing bytes are ignored.
pub fn decode_payload(data: &[u8]) -> Result<AccelerometerSample, DecodeError> {
    if data.len() < PAYLOAD_LEN {
        return Err(DecodeError::TooShort { len: data.len() });
    }

    let reader = ByteReader::new(data);
    let x: i16 = reader.read(ACCEL_X_OFFSET)?;
    let y: i16 = reader.read(ACCEL_Y_OFFSET)?;
    let z: i16 = reader.read(ACCEL_Z_OFFSET)?;

    Ok(AccelerometerSample::from_raw(x, y, z))
}
