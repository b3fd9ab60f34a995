//! # Sensors Module
//!
//! Sensor acquisition is an external collaborator: the node only depends
//! on the [`SensorSource`] seam, which must return within a bounded
//! sampling window and reports partial validity instead of failing
//! outright. A reading carries one validity flag per sensor group (air =
//! CO₂/temperature/humidity, light, soil); out-of-range values mark the
//! group invalid and are dropped from payloads, they never raise an error.
//!
//! [`SimulatedSensors`] produces jittered plausible values so the node
//! runs end-to-end without hardware; real drivers live behind the same
//! trait.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Raw ADC value of the soil probe in dry air (0 % moisture).
const SOIL_AIR_RAW: f64 = 3500.0;
/// Raw ADC value of the soil probe submerged (100 % moisture).
const SOIL_WATER_RAW: f64 = 1500.0;

/// One sampled measurement with per-group validity flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reading {
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
    pub soil_moisture: f64,
    pub soil_raw: u32,
    pub air_valid: bool,
    pub light_valid: bool,
    pub soil_valid: bool,
}

/// Acquisition seam. `read` must return within a bounded sampling window
/// and may report any subset of groups as valid.
pub trait SensorSource: Send {
    fn read(&mut self) -> Reading;
}

/// Clamp a reading against physical sanity bounds, invalidating any group
/// that reports impossible values (a wedged bus tends to produce them).
pub fn apply_bounds(mut reading: Reading) -> Reading {
    if reading.air_valid {
        let co2_ok = (0.0..=10_000.0).contains(&reading.co2);
        let temp_ok = (-40.0..=80.0).contains(&reading.temperature);
        let rh_ok = (0.0..=100.0).contains(&reading.humidity);
        reading.air_valid = co2_ok && temp_ok && rh_ok;
    }
    if reading.light_valid {
        reading.light_valid = reading.light >= 0.0;
    }
    if reading.soil_valid {
        reading.soil_valid = reading.soil_raw > 0 && reading.soil_raw < 4095;
    }
    reading
}

/// Random-walk simulation around greenhouse-plausible values.
pub struct SimulatedSensors {
    rng: StdRng,
    co2: f64,
    temperature: f64,
    humidity: f64,
    light: f64,
    soil: f64,
}

impl SimulatedSensors {
    pub fn new() -> Self {
        SimulatedSensors {
            rng: StdRng::from_entropy(),
            co2: 550.0,
            temperature: 22.0,
            humidity: 65.0,
            light: 9_000.0,
            soil: 45.0,
        }
    }

    fn wander(rng: &mut StdRng, value: f64, step: f64, lo: f64, hi: f64) -> f64 {
        (value + rng.gen_range(-step..=step)).clamp(lo, hi)
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSensors {
    fn read(&mut self) -> Reading {
        self.co2 = Self::wander(&mut self.rng, self.co2, 25.0, 380.0, 1500.0);
        self.temperature = Self::wander(&mut self.rng, self.temperature, 0.3, 10.0, 35.0);
        self.humidity = Self::wander(&mut self.rng, self.humidity, 1.5, 35.0, 95.0);
        self.light = Self::wander(&mut self.rng, self.light, 600.0, 0.0, 40_000.0);
        self.soil = Self::wander(&mut self.rng, self.soil, 0.8, 5.0, 90.0);

        let soil_raw = SOIL_AIR_RAW - (self.soil / 100.0) * (SOIL_AIR_RAW - SOIL_WATER_RAW);
        apply_bounds(Reading {
            co2: self.co2,
            temperature: self.temperature,
            humidity: self.humidity,
            light: self.light,
            soil_moisture: self.soil,
            soil_raw: soil_raw as u32,
            air_valid: true,
            light_valid: true,
            soil_valid: true,
        })
    }
}
