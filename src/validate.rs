//! Normalization of untyped payloads into [`Reading`]s.
//!
//! Both producers go through [`validate`]. What differs between them is the
//! [`Strictness`]: operator input fails fast on the first doubtful value,
//! field input from sensors keeps everything that can be kept and reports the
//! rest as warnings.

use std::{fmt, str::FromStr};

use anyhow::bail;
use chrono::{DateTime, SubsecRound as _, Timelike as _, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::telemetry::{Field, GasLevel, Reading, SensorValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Type and range problems are warnings. Wrongly typed values become unknown.
    Lenient,
    /// Type and range problems reject the payload.
    Strict,
}

/// How the gas channel is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GasMode {
    /// Booleans and integer 0/1 are flags, any other number is a level.
    #[default]
    Auto,
    /// Only booleans and 0/1 are accepted.
    Flag,
    /// Any finite number is a level. Booleans are still kept as flags.
    Continuous,
}

impl GasMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GasMode::Auto => "auto",
            GasMode::Flag => "flag",
            GasMode::Continuous => "continuous",
        }
    }
}

impl fmt::Display for GasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GasMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(GasMode::Auto),
            "flag" => Ok(GasMode::Flag),
            "continuous" => Ok(GasMode::Continuous),
            _ => bail!("unknown gas mode: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    pub strictness: Strictness,
    pub gas_mode: GasMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Key as it appeared in the payload.
    pub field: String,

    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid reading: {}", join_field_errors(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub reading: Reading,

    /// Problems that were tolerated under lenient validation.
    pub warnings: Vec<FieldError>,
}

pub fn validate(raw: &Map<String, Value>, rules: ValidationRules) -> Result<Validated, ValidationError> {
    let mut v = Validator {
        rules,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let reading = Reading {
        timestamp: v.timestamp(raw),
        values: SensorValues {
            temperature: v.number(raw, Field::Temperature),
            humidity: v.number(raw, Field::Humidity),
            voltage: v.number(raw, Field::Voltage),
            current_primary: v.number(raw, Field::CurrentPrimary),
            current_secondary: v.number(raw, Field::CurrentSecondary),
            current_rms: v.number(raw, Field::CurrentRms),
            water_flow: v.number(raw, Field::WaterFlow),
            gas_level: v.field(raw, Field::GasLevel, |value| parse_gas_level(value, rules.gas_mode)),
            tank_level: v.number(raw, Field::TankLevel),
        },
    };

    if !v.errors.is_empty() {
        return Err(ValidationError { errors: v.errors });
    }

    Ok(Validated {
        reading,
        warnings: v.warnings,
    })
}

struct Validator {
    rules: ValidationRules,
    errors: Vec<FieldError>,
    warnings: Vec<FieldError>,
}

impl Validator {
    fn reject(&mut self, key: &str, reason: String) {
        let error = FieldError {
            field: key.to_owned(),
            reason,
        };
        match self.rules.strictness {
            Strictness::Strict => self.errors.push(error),
            Strictness::Lenient => self.warnings.push(error),
        }
    }

    /// First usable value among the keys of `field`. Under lenient rules a
    /// value that fails to parse is skipped in favour of the next alias.
    fn lookup<T>(
        &mut self,
        raw: &Map<String, Value>,
        field: Field,
        parse: impl Fn(&Value) -> Result<Option<T>, String>,
    ) -> Option<(&'static str, T)> {
        for key in field.keys() {
            let Some(value) = raw.get(key) else {
                continue;
            };
            match parse(value) {
                Ok(Some(parsed)) => return Some((key, parsed)),
                Ok(None) => {}
                Err(reason) => {
                    self.reject(key, reason);
                    if self.rules.strictness == Strictness::Strict {
                        return None;
                    }
                }
            }
        }
        None
    }

    fn field<T>(
        &mut self,
        raw: &Map<String, Value>,
        field: Field,
        parse: impl Fn(&Value) -> Result<Option<T>, String>,
    ) -> Option<T> {
        self.lookup(raw, field, parse).map(|(_, parsed)| parsed)
    }

    fn number(&mut self, raw: &Map<String, Value>, field: Field) -> Option<f64> {
        let (key, value) = self.lookup(raw, field, parse_number)?;

        if let Some(range) = field.range()
            && !range.contains(&value)
        {
            self.reject(key, out_of_range_reason(field, value));

            // Out-of-range sensor data is kept so drift stays visible.
            if self.rules.strictness == Strictness::Strict {
                return None;
            }
        }

        Some(value)
    }

    /// Stored timestamps have microsecond resolution. Finer input is refused
    /// under strict rules and truncated under lenient ones.
    fn timestamp(&mut self, raw: &Map<String, Value>) -> Option<DateTime<Utc>> {
        let (key, ts) = self.lookup(raw, Field::Timestamp, parse_timestamp)?;

        if ts.nanosecond() % 1_000 != 0 {
            self.reject(
                key,
                format!("sub-microsecond precision is not stored, got {}", ts.to_rfc3339()),
            );
            if self.rules.strictness == Strictness::Strict {
                return None;
            }
        }

        Some(ts.trunc_subsecs(6))
    }
}

fn out_of_range_reason(field: Field, value: f64) -> String {
    match field.range() {
        Some(range) if range.end().is_infinite() => {
            format!("out of range: expected at least {}, got {value}", range.start())
        }
        Some(range) => format!(
            "out of range: expected {} to {}, got {value}",
            range.start(),
            range.end()
        ),
        None => format!("out of range: got {value}"),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_number(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => finite(n).map(Some),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(format!("expected a number, got string {s:?}")),
        },
        other => Err(format!("expected a number, got {}", describe(other))),
    }
}

fn finite(n: &Number) -> Result<f64, String> {
    match n.as_f64() {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(format!("expected a finite number, got {n}")),
    }
}

fn parse_gas_level(value: &Value, mode: GasMode) -> Result<Option<GasLevel>, String> {
    let n = match value {
        Value::Null => return Ok(None),
        Value::Bool(detected) => return Ok(Some(GasLevel::Detected(*detected))),
        Value::Number(n) => n.clone(),
        Value::String(s) => s
            .trim()
            .parse::<Number>()
            .map_err(|_| format!("expected a flag or a number, got string {s:?}"))?,
        other => return Err(format!("expected a flag or a number, got {}", describe(other))),
    };

    let level = finite(&n)?;
    let flag = if level == 0.0 {
        Some(false)
    } else if level == 1.0 {
        Some(true)
    } else {
        None
    };

    match (mode, flag) {
        (GasMode::Flag, Some(detected)) => Ok(Some(GasLevel::Detected(detected))),
        (GasMode::Flag, None) => Err(format!("expected 0 or 1, got {n}")),
        (GasMode::Auto, Some(detected)) if !n.is_f64() => Ok(Some(GasLevel::Detected(detected))),
        (GasMode::Auto | GasMode::Continuous, _) => Ok(Some(GasLevel::Level(level))),
    }
}

fn parse_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| format!("expected an RFC 3339 timestamp, got {s:?}: {e}")),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Some)
            .ok_or_else(|| format!("expected Unix seconds, got {n}")),
        other => Err(format!("expected a timestamp, got {}", describe(other))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Timelike as _};
    use serde_json::json;

    use super::*;

    const STRICT: ValidationRules = ValidationRules {
        strictness: Strictness::Strict,
        gas_mode: GasMode::Auto,
    };

    const LENIENT: ValidationRules = ValidationRules {
        strictness: Strictness::Lenient,
        gas_mode: GasMode::Auto,
    };

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn field_names(err: &ValidationError) -> Vec<&str> {
        err.errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn maps_firmware_keys_to_reading_fields() {
        let raw = map(json!({
            "temperature": 21.0,
            "humidity": 55,
            "voltage": 229.8,
            "current_20A": 1.5,
            "current_30A": 2.25,
            "sct013": 0.8,
            "waterFlow": 3.0,
            "gasDetected": 1,
            "level": 75,
        }));

        let validated = validate(&raw, STRICT).unwrap();
        assert!(validated.warnings.is_empty());
        assert_eq!(
            validated.reading.values,
            SensorValues {
                temperature: Some(21.0),
                humidity: Some(55.0),
                voltage: Some(229.8),
                current_primary: Some(1.5),
                current_secondary: Some(2.25),
                current_rms: Some(0.8),
                water_flow: Some(3.0),
                gas_level: Some(GasLevel::Detected(true)),
                tank_level: Some(75.0),
            }
        );
        assert_eq!(validated.reading.timestamp, None);
    }

    #[test]
    fn canonical_key_wins_over_alias() {
        let raw = map(json!({ "current_rms": 1.0, "Irms": 2.0 }));
        let validated = validate(&raw, STRICT).unwrap();
        assert_eq!(validated.reading.values.current_rms, Some(1.0));
    }

    #[test]
    fn lenient_falls_through_to_next_alias_on_bad_value() {
        let raw = map(json!({ "current_rms": "n/a", "sct013": 0.8 }));

        let validated = validate(&raw, LENIENT).unwrap();
        assert_eq!(validated.reading.values.current_rms, Some(0.8));
        assert_eq!(validated.warnings.len(), 1);
        assert_eq!(validated.warnings[0].field, "current_rms");

        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(field_names(&err), ["current_rms"]);
    }

    #[test]
    fn null_canonical_value_defers_to_alias() {
        let raw = map(json!({ "water_flow": null, "waterFlow": 2.5 }));
        let validated = validate(&raw, STRICT).unwrap();
        assert_eq!(validated.reading.values.water_flow, Some(2.5));
    }

    #[test]
    fn absent_and_null_fields_are_unknown_not_zero() {
        let raw = map(json!({ "temperature": null, "voltage": 0 }));
        let validated = validate(&raw, STRICT).unwrap();
        assert_eq!(validated.reading.values.temperature, None);
        assert_eq!(validated.reading.values.humidity, None);
        assert_eq!(validated.reading.values.voltage, Some(0.0));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = map(json!({ "temperature": 20, "rssi": -70, "fw": "1.2.0" }));
        assert!(validate(&raw, STRICT).is_ok());
    }

    #[test]
    fn strict_rejects_wrong_type_with_field_name() {
        let raw = map(json!({ "temperature": "hot", "humidity": 40 }));
        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(field_names(&err), ["temperature"]);
        assert!(err.errors[0].reason.contains("expected a number"));
    }

    #[test]
    fn lenient_stores_wrong_type_as_unknown_with_warning() {
        let raw = map(json!({ "temperature": "hot", "humidity": 40 }));
        let validated = validate(&raw, LENIENT).unwrap();
        assert_eq!(validated.reading.values.temperature, None);
        assert_eq!(validated.reading.values.humidity, Some(40.0));
        assert_eq!(validated.warnings.len(), 1);
        assert_eq!(validated.warnings[0].field, "temperature");
    }

    #[test]
    fn strict_rejects_out_of_range_values() {
        let raw = map(json!({ "humidity": 140, "level": -3, "voltage": -1 }));
        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(field_names(&err), ["humidity", "voltage", "level"]);
    }

    #[test]
    fn lenient_keeps_out_of_range_values() {
        let raw = map(json!({ "temperature": 120.5 }));
        let validated = validate(&raw, LENIENT).unwrap();
        assert_eq!(validated.reading.values.temperature, Some(120.5));
        assert_eq!(validated.warnings[0].field, "temperature");
        assert!(validated.warnings[0].reason.contains("out of range"));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let raw = map(json!({ "temperature": " 22.5 " }));
        let validated = validate(&raw, STRICT).unwrap();
        assert_eq!(validated.reading.values.temperature, Some(22.5));
    }

    #[test]
    fn reports_every_offending_field() {
        let raw = map(json!({ "temperature": [1], "humidity": {}, "voltage": true }));
        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(field_names(&err), ["temperature", "humidity", "voltage"]);
    }

    #[test]
    fn gas_auto_mode_keeps_both_representations() {
        let cases = [
            (json!(true), GasLevel::Detected(true)),
            (json!(0), GasLevel::Detected(false)),
            (json!(1), GasLevel::Detected(true)),
            (json!(1.0), GasLevel::Level(1.0)),
            (json!(350), GasLevel::Level(350.0)),
            (json!("0"), GasLevel::Detected(false)),
        ];

        for (value, expected) in cases {
            let raw = map(json!({ "gasDetected": value }));
            let validated = validate(&raw, STRICT).unwrap();
            assert_eq!(validated.reading.values.gas_level, Some(expected), "{value}");
        }
    }

    #[test]
    fn gas_flag_mode_rejects_levels() {
        let rules = ValidationRules {
            gas_mode: GasMode::Flag,
            ..STRICT
        };
        let raw = map(json!({ "gasDetected": 0.0 }));
        assert_eq!(
            validate(&raw, rules).unwrap().reading.values.gas_level,
            Some(GasLevel::Detected(false))
        );

        let raw = map(json!({ "gasDetected": 512 }));
        let err = validate(&raw, rules).unwrap_err();
        assert_eq!(field_names(&err), ["gasDetected"]);
    }

    #[test]
    fn gas_continuous_mode_reads_numbers_as_levels() {
        let rules = ValidationRules {
            gas_mode: GasMode::Continuous,
            ..STRICT
        };
        let raw = map(json!({ "gas_level": 1 }));
        assert_eq!(
            validate(&raw, rules).unwrap().reading.values.gas_level,
            Some(GasLevel::Level(1.0))
        );

        let raw = map(json!({ "gas_level": false }));
        assert_eq!(
            validate(&raw, rules).unwrap().reading.values.gas_level,
            Some(GasLevel::Detected(false))
        );
    }

    #[test]
    fn timestamps_accept_rfc3339_and_unix_seconds() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let raw = map(json!({ "timestamp": "2025-03-01T13:00:00+01:00" }));
        assert_eq!(validate(&raw, STRICT).unwrap().reading.timestamp, Some(expected));

        let raw = map(json!({ "timestamp": expected.timestamp() }));
        assert_eq!(validate(&raw, STRICT).unwrap().reading.timestamp, Some(expected));
    }

    #[test]
    fn microsecond_timestamps_are_kept_exactly() {
        let expected = Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .unwrap()
            .with_nanosecond(123_456_000)
            .unwrap();

        let raw = map(json!({ "timestamp": "2025-03-01T12:00:00.123456Z" }));
        assert_eq!(validate(&raw, STRICT).unwrap().reading.timestamp, Some(expected));
    }

    #[test]
    fn sub_microsecond_timestamps_are_refused_or_truncated() {
        let raw = map(json!({ "timestamp": "2025-03-01T12:00:00.123456789Z" }));

        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(field_names(&err), ["timestamp"]);
        assert!(err.errors[0].reason.contains("sub-microsecond"));

        let validated = validate(&raw, LENIENT).unwrap();
        let ts = validated.reading.timestamp.unwrap();
        assert_eq!(ts.nanosecond(), 123_456_000);
        assert_eq!(validated.warnings[0].field, "timestamp");
    }

    #[test]
    fn bad_timestamp_falls_back_to_unknown_when_lenient() {
        let raw = map(json!({ "timestamp": "yesterday", "temperature": 20 }));

        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(field_names(&err), ["timestamp"]);

        let validated = validate(&raw, LENIENT).unwrap();
        assert_eq!(validated.reading.timestamp, None);
        assert_eq!(validated.warnings[0].field, "timestamp");
    }

    #[test]
    fn validation_is_idempotent() {
        let raw = map(json!({ "temperature": "hot", "humidity": 101, "gas": 3 }));
        assert_eq!(validate(&raw, LENIENT), validate(&raw, LENIENT));
        assert_eq!(validate(&raw, STRICT), validate(&raw, STRICT));
    }

    #[test]
    fn error_message_lists_fields() {
        let raw = map(json!({ "temperature": "hot" }));
        let err = validate(&raw, STRICT).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid reading: temperature: expected a number, got string \"hot\""
        );
    }
}
