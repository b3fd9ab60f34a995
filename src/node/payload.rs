//! Payload builders.
//!
//! Every payload is a single-line JSON object; the queue and archive rely
//! on that. Data payloads omit sensor groups whose validity flag is off,
//! so a half-dead bus still produces a useful (smaller) record.

use serde_json::{json, Map, Value};

use crate::clock::TimeSource;
use crate::config::DeviceConfig;
use crate::sensors::Reading;

use super::state::RuntimeCounters;

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Message id: `XXXXXXXX-BBBB-RRRRR`, built from the CRC-32 of the
/// device id, the boot count, and the reading count. Unique per reading
/// across reboots as long as the device id is stable, and cheap enough to
/// build on every sample.
pub fn message_id(device_id: &str, boot_count: u32, reading_count: u64) -> String {
    format!(
        "{:08X}-{:04}-{:05}",
        CRC32.checksum(device_id.as_bytes()),
        boot_count,
        reading_count
    )
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Serialize one sampled reading.
pub fn data_payload(
    device: &DeviceConfig,
    clock: &dyn TimeSource,
    counters: &RuntimeCounters,
    reading: &Reading,
) -> String {
    let mut sensors = Map::new();
    if reading.air_valid {
        sensors.insert("co2".into(), json!(round_to(reading.co2, 1)));
        sensors.insert("temperature".into(), json!(round_to(reading.temperature, 2)));
        sensors.insert("humidity".into(), json!(round_to(reading.humidity, 1)));
    }
    if reading.light_valid {
        sensors.insert("light".into(), json!(round_to(reading.light, 1)));
    }
    if reading.soil_valid {
        sensors.insert(
            "soil_moisture".into(),
            json!(round_to(reading.soil_moisture, 1)),
        );
        sensors.insert("soil_raw".into(), json!(reading.soil_raw));
    }

    let doc = json!({
        "device": device.id,
        "msg_id": message_id(&device.id, counters.boot_count, counters.reading_count),
        "timestamp": clock.iso_timestamp(),
        "reading": counters.reading_count,
        "sensors": Value::Object(sensors),
        "valid": {
            "air": reading.air_valid,
            "light": reading.light_valid,
            "soil": reading.soil_valid,
        },
    });
    doc.to_string()
}

/// Serialize the periodic device status record.
#[allow(clippy::too_many_arguments)]
pub fn status_payload(
    device: &DeviceConfig,
    clock: &dyn TimeSource,
    counters: &RuntimeCounters,
    network_up: bool,
    broker_up: bool,
    storage_available: bool,
    backlog: usize,
) -> String {
    let doc = json!({
        "device": device.id,
        "firmware": env!("CARGO_PKG_VERSION"),
        "location": device.location,
        "timestamp": clock.iso_timestamp(),
        "uptime_sec": clock.uptime_seconds(),
        "readings": counters.reading_count,
        "publish_failures": counters.publish_failures,
        "boot_count": counters.boot_count,
        "time_synced": clock.is_synced(),
        "network": {
            "connected": network_up,
            "broker_connected": broker_up,
        },
        "storage": {
            "available": storage_available,
            "buffered": backlog,
        },
    });
    doc.to_string()
}

/// Serialize a best-effort error report for the error topic.
pub fn error_payload(device: &DeviceConfig, message: &str) -> String {
    json!({ "device": device.id, "error": message }).to_string()
}
