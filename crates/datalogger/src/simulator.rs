// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor simulator
//!
//! Stands in for the Modbus bus when logging readings. Each sensor declares a
//! register width and a data type; the simulator draws a raw register value
//! from a [`ValueSource`] and scales it.
//!
//! Sensor file (`cpuid.json`):
//!
//! ```json
//! {
//!   "cpu_temp": {"slave_id": 1, "function_code": 3, "mem_address": 100,
//!                "number_of_bytes": 2, "data_type": "uint16", "scaling_factor": 0.1}
//! }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Default sensor definition file
pub const DEFAULT_SENSOR_FILE: &str = "cpuid.json";

/// Register interpretation, matched loosely on the declared type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int,
    Float,
    Bool,
    Unsupported,
}

impl DataType {
    /// `"uint16"`, `"INT32"` -> Int; `"float32"` -> Float; `"bool"` -> Bool.
    pub fn parse(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("int") {
            DataType::Int
        } else if name.contains("float") {
            DataType::Float
        } else if name.contains("bool") {
            DataType::Bool
        } else {
            DataType::Unsupported
        }
    }
}

/// One sensor definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub slave_id: u8,
    pub function_code: u8,
    pub mem_address: u16,
    pub number_of_bytes: u32,
    pub data_type: String,
    pub scaling_factor: f64,
}

impl SensorSpec {
    /// Largest raw value the register can hold.
    pub fn max_raw(&self) -> u128 {
        match self.number_of_bytes {
            0 => 0,
            n if n >= 16 => u128::MAX,
            n => (1u128 << (n * 8)) - 1,
        }
    }
}

/// A simulated sensor value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Source of raw register values
pub trait ValueSource {
    /// Uniform value in `0..=max`
    fn raw(&mut self, max: u128) -> u128;

    /// Uniform coil state
    fn flag(&mut self) -> bool;
}

/// Pseudo-random source
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: fastrand::Rng,
}

impl RandomSource {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Reproducible sequence
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueSource for RandomSource {
    fn raw(&mut self, max: u128) -> u128 {
        self.rng.u128(..=max)
    }

    fn flag(&mut self) -> bool {
        self.rng.bool()
    }
}

/// Simulate one read of `spec`. Unsupported types yield `None`.
pub fn read_sensor<V: ValueSource + ?Sized>(
    spec: &SensorSpec,
    source: &mut V,
) -> Option<SensorValue> {
    match DataType::parse(&spec.data_type) {
        DataType::Int => {
            let raw = source.raw(spec.max_raw());
            // Float-to-int `as` saturates and truncates toward zero.
            Some(SensorValue::Int((raw as f64 * spec.scaling_factor) as i64))
        }
        DataType::Float => {
            let raw = source.raw(spec.max_raw());
            Some(SensorValue::Float(raw as f64 * spec.scaling_factor))
        }
        DataType::Bool => Some(SensorValue::Bool(source.flag())),
        DataType::Unsupported => None,
    }
}

/// Ordered set of sensor definitions
#[derive(Debug, Clone, Default)]
pub struct SensorSet {
    sensors: Vec<(String, SensorSpec)>,
}

impl SensorSet {
    /// Load definitions from a JSON file.
    ///
    /// Entries with missing or mistyped parameters are logged and skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path.to_path_buf(), &content)
    }

    /// Parse definitions from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::parse(PathBuf::from("<inline>"), json)
    }

    fn parse(path: PathBuf, json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;

        let entries = match value {
            Value::Object(entries) => entries,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "JSON content in '{}' is not a map of sensors",
                    path.display()
                )))
            }
        };

        let mut sensors = Vec::with_capacity(entries.len());
        for (name, params) in entries {
            match serde_json::from_value::<SensorSpec>(params) {
                Ok(spec) => sensors.push((name, spec)),
                Err(e) => tracing::warn!(
                    "Invalid or missing parameters for sensor '{}' in {}: {}",
                    name,
                    path.display(),
                    e
                ),
            }
        }

        Ok(Self { sensors })
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SensorSpec)> {
        self.sensors.iter().map(|(name, spec)| (name.as_str(), spec))
    }
}

/// Sensor simulator
pub struct Simulator<V: ValueSource = RandomSource> {
    sensors: SensorSet,
    source: V,
}

impl Simulator<RandomSource> {
    pub fn new(sensors: SensorSet) -> Self {
        Self::with_source(sensors, RandomSource::new())
    }
}

impl<V: ValueSource> Simulator<V> {
    pub fn with_source(sensors: SensorSet, source: V) -> Self {
        Self { sensors, source }
    }

    /// Read every sensor once; keyed by sensor name in declaration order.
    pub fn sample(&mut self) -> Map<String, Value> {
        let mut readings = Map::new();
        for (name, spec) in self.sensors.iter() {
            let value = match read_sensor(spec, &mut self.source) {
                Some(SensorValue::Int(v)) => Value::from(v),
                Some(SensorValue::Float(v)) => Value::from(v),
                Some(SensorValue::Bool(v)) => Value::Bool(v),
                None => Value::Null,
            };
            readings.insert(name.to_string(), value);
        }
        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always returns the register maximum
    struct MaxSource;

    impl ValueSource for MaxSource {
        fn raw(&mut self, max: u128) -> u128 {
            max
        }

        fn flag(&mut self) -> bool {
            true
        }
    }

    fn spec(bytes: u32, data_type: &str, scale: f64) -> SensorSpec {
        SensorSpec {
            slave_id: 1,
            function_code: 3,
            mem_address: 40001,
            number_of_bytes: bytes,
            data_type: data_type.into(),
            scaling_factor: scale,
        }
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!(DataType::parse("uint16"), DataType::Int);
        assert_eq!(DataType::parse("INT32"), DataType::Int);
        assert_eq!(DataType::parse("Float32"), DataType::Float);
        assert_eq!(DataType::parse("bool"), DataType::Bool);
        assert_eq!(DataType::parse("string"), DataType::Unsupported);
    }

    #[test]
    fn test_max_raw() {
        assert_eq!(spec(0, "int", 1.0).max_raw(), 0);
        assert_eq!(spec(1, "int", 1.0).max_raw(), 255);
        assert_eq!(spec(2, "int", 1.0).max_raw(), 65535);
        assert_eq!(spec(16, "int", 1.0).max_raw(), u128::MAX);
        assert_eq!(spec(40, "int", 1.0).max_raw(), u128::MAX);
    }

    #[test]
    fn test_int_is_scaled_and_truncated() {
        let value = read_sensor(&spec(1, "uint8", 0.5), &mut MaxSource);
        assert_eq!(value, Some(SensorValue::Int(127)));
    }

    #[test]
    fn test_float_is_scaled() {
        let value = read_sensor(&spec(2, "float", 0.1), &mut MaxSource);
        match value {
            Some(SensorValue::Float(v)) => assert!((v - 6553.5).abs() < 1e-9),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_type_is_none() {
        assert_eq!(read_sensor(&spec(2, "ascii", 1.0), &mut MaxSource), None);
    }

    #[test]
    fn test_random_values_stay_in_range() {
        let mut source = RandomSource::with_seed(7);
        let s = spec(1, "int16", 1.0);
        for _ in 0..500 {
            match read_sensor(&s, &mut source) {
                Some(SensorValue::Int(v)) => assert!((0..=255).contains(&v)),
                other => panic!("unexpected value: {other:?}"),
            }
        }

        let zero = spec(0, "float", 3.0);
        assert_eq!(read_sensor(&zero, &mut source), Some(SensorValue::Float(0.0)));
    }

    #[test]
    fn test_sensor_set_skips_malformed_entries() {
        let json = r#"{
            "cpu_temp": {"slave_id": 1, "function_code": 3, "mem_address": 100,
                         "number_of_bytes": 2, "data_type": "uint16", "scaling_factor": 0.1},
            "broken": {"slave_id": 2},
            "fan_on": {"slave_id": 1, "function_code": 1, "mem_address": 5,
                       "number_of_bytes": 1, "data_type": "bool", "scaling_factor": 1}
        }"#;
        let set = SensorSet::from_json_str(json).unwrap();
        let names: Vec<_> = set.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["cpu_temp", "fan_on"]);
    }

    #[test]
    fn test_sensor_set_rejects_non_object() {
        assert!(matches!(
            SensorSet::from_json_str("[1, 2]"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_simulator_sample_shape() {
        let json = r#"{
            "pressure": {"slave_id": 1, "function_code": 3, "mem_address": 1,
                         "number_of_bytes": 1, "data_type": "int", "scaling_factor": 2},
            "label": {"slave_id": 1, "function_code": 3, "mem_address": 2,
                      "number_of_bytes": 4, "data_type": "text", "scaling_factor": 1},
            "alarm": {"slave_id": 1, "function_code": 1, "mem_address": 3,
                      "number_of_bytes": 1, "data_type": "bool", "scaling_factor": 1}
        }"#;
        let mut sim = Simulator::with_source(SensorSet::from_json_str(json).unwrap(), MaxSource);

        let sample = sim.sample();
        assert_eq!(
            Value::Object(sample),
            serde_json::json!({"pressure": 510, "label": null, "alarm": true})
        );
    }
}
