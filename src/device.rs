//! Simulated IoT devices.
//!
//! Every device owns a seeded RNG, so a fleet built from the same seed emits
//! the same event types and payloads on every run (timestamps aside).

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::protocol::{EventPayload, RawEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cctv,
    Traffic,
    Pollution,
    Generic,
}

impl DeviceType {
    /// Types a fleet is drawn from.
    pub const FLEET: [DeviceType; 3] = [DeviceType::Cctv, DeviceType::Traffic, DeviceType::Pollution];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Cctv => "cctv",
            DeviceType::Traffic => "traffic",
            DeviceType::Pollution => "pollution",
            DeviceType::Generic => "generic",
        }
    }

    pub fn event_types(&self) -> &'static [&'static str] {
        match self {
            DeviceType::Cctv => &["motion_detected", "access_attempt", "frame_snapshot"],
            DeviceType::Traffic => &["vehicle_count", "speed_sample", "congestion_alert"],
            DeviceType::Pollution => &["pm2_5_reading", "co_reading", "sensor_error"],
            DeviceType::Generic => &["status"],
        }
    }
}

impl From<&str> for DeviceType {
    fn from(value: &str) -> Self {
        match value {
            "cctv" => DeviceType::Cctv,
            "traffic" => DeviceType::Traffic,
            "pollution" => DeviceType::Pollution,
            _ => DeviceType::Generic,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct IoTDevice {
    device_id: String,
    device_type: DeviceType,
    rng: StdRng,
}

impl IoTDevice {
    pub fn new(device_id: impl Into<String>, device_type: DeviceType, seed: u64) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn generate_event(&mut self) -> RawEvent {
        let event_type = self
            .device_type
            .event_types()
            .choose(&mut self.rng)
            .copied()
            .unwrap_or("status");

        let mut payload = EventPayload::new();
        match self.device_type {
            DeviceType::Cctv => {
                let confidence = round_to(self.rng.gen_range(0.5..0.99), 3);
                let frame = self.rng.gen_range(0..=99_999u32);
                payload.insert("camera_id".into(), Value::from(self.device_id.clone()));
                payload.insert("confidence".into(), Value::from(confidence));
                payload.insert("frame_hash".into(), Value::from(format!("frame_{}", frame)));
            }
            DeviceType::Traffic => {
                payload.insert("lane".into(), Value::from(self.rng.gen_range(1..=4u32)));
                payload.insert(
                    "vehicle_count".into(),
                    Value::from(self.rng.gen_range(0..=50u32)),
                );
                payload.insert(
                    "avg_speed_kmh".into(),
                    Value::from(round_to(self.rng.gen_range(10.0..120.0), 2)),
                );
            }
            DeviceType::Pollution => {
                payload.insert(
                    "pm2_5".into(),
                    Value::from(round_to(self.rng.gen_range(0.0..300.0), 2)),
                );
                payload.insert(
                    "co".into(),
                    Value::from(round_to(self.rng.gen_range(0.0..50.0), 2)),
                );
            }
            DeviceType::Generic => {
                payload.insert("status".into(), Value::from("ok"));
            }
        }

        RawEvent::new(
            self.device_id.clone(),
            self.device_type.as_str(),
            event_type,
            payload,
            Utc::now(),
        )
    }

    /// Finite, lazily generated run of events.
    pub fn events(&mut self, count: usize) -> impl Iterator<Item = RawEvent> + '_ {
        (0..count).map(move |_| self.generate_event())
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Build `count` devices named `dev-001`, `dev-002`, ...
///
/// Device types are drawn from [`DeviceType::FLEET`] with an RNG seeded by
/// `seed`; device `i` is seeded with `seed + i`.
pub fn build_fleet(count: usize, seed: u64) -> Vec<IoTDevice> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let device_type = DeviceType::FLEET
                .choose(&mut rng)
                .copied()
                .unwrap_or(DeviceType::Generic);
            IoTDevice::new(
                format!("dev-{:03}", i + 1),
                device_type,
                seed.wrapping_add(i as u64),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_events() {
        let mut a = IoTDevice::new("dev-001", DeviceType::Traffic, 11);
        let mut b = IoTDevice::new("dev-001", DeviceType::Traffic, 11);
        for _ in 0..5 {
            let x = a.generate_event();
            let y = b.generate_event();
            assert_eq!(x.event_type, y.event_type);
            assert_eq!(x.payload, y.payload);
        }
    }

    #[test]
    fn test_payload_shapes() {
        let mut cctv = IoTDevice::new("dev-002", DeviceType::Cctv, 1);
        let event = cctv.generate_event();
        assert_eq!(event.device_type, "cctv");
        assert_eq!(event.payload["camera_id"], Value::from("dev-002"));
        let confidence = event.payload["confidence"].as_f64().unwrap();
        assert!((0.5..=0.99).contains(&confidence));
        assert!(event.payload["frame_hash"].as_str().unwrap().starts_with("frame_"));
        assert!(DeviceType::Cctv.event_types().contains(&event.event_type.as_str()));

        let mut traffic = IoTDevice::new("dev-003", DeviceType::Traffic, 2);
        let event = traffic.generate_event();
        let lane = event.payload["lane"].as_u64().unwrap();
        assert!((1..=4).contains(&lane));
        assert!(event.payload["vehicle_count"].as_u64().unwrap() <= 50);

        let mut generic = IoTDevice::new("dev-004", DeviceType::from("thermostat"), 3);
        let event = generic.generate_event();
        assert_eq!(event.event_type, "status");
        assert_eq!(event.payload["status"], Value::from("ok"));
    }

    #[test]
    fn test_events_are_finite_and_valid() {
        let mut device = IoTDevice::new("dev-005", DeviceType::Pollution, 4);
        let events: Vec<RawEvent> = device.events(10).collect();
        assert_eq!(events.len(), 10);
        assert!(events.iter().all(|e| e.validate().is_ok()));
    }

    #[test]
    fn test_fleet_naming_and_determinism() {
        let fleet = build_fleet(20, 42);
        assert_eq!(fleet.len(), 20);
        assert_eq!(fleet[0].device_id(), "dev-001");
        assert_eq!(fleet[19].device_id(), "dev-020");

        let again = build_fleet(20, 42);
        let types: Vec<DeviceType> = fleet.iter().map(|d| d.device_type()).collect();
        let again: Vec<DeviceType> = again.iter().map(|d| d.device_type()).collect();
        assert_eq!(types, again);
    }
}
