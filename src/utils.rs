/// Utility functions for formatting log output
use std::fmt::Write;
use time::{format_description, OffsetDateTime};

use crate::models::Device;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Render bytes as a contiguous hex string, e.g. `[0xA1, 0xB2]` -> `"a1b2"`
pub fn hex_string(bytes: &[u8], upper_case: bool) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
            let _ = if upper_case {
                write!(out, "{:02X}", byte)
            } else {
                write!(out, "{:02x}", byte)
            };
            out
        })
}

/// One row of the device summary table
pub fn format_device_row(device: &Device) -> String {
    let sample = device
        .latest_sample()
        .map(|s| s.to_string())
        .unwrap_or_default();

    format!(
        "{}  Accelerometer: {:<26} samples: {:>6}  last seen: {}",
        device.id(),
        sample,
        device.samples(),
        format_datetime(&device.last_seen())
    )
}
