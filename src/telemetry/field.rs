use std::{fmt, ops::RangeInclusive, str::FromStr};

use anyhow::{Error, bail};

/// A logical field of a reading, independent of the key a producer used for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Temperature,
    Humidity,
    Voltage,
    CurrentPrimary,
    CurrentSecondary,
    CurrentRms,
    WaterFlow,
    GasLevel,
    TankLevel,
    Timestamp,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Temperature,
        Field::Humidity,
        Field::Voltage,
        Field::CurrentPrimary,
        Field::CurrentSecondary,
        Field::CurrentRms,
        Field::WaterFlow,
        Field::GasLevel,
        Field::TankLevel,
        Field::Timestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Voltage => "voltage",
            Field::CurrentPrimary => "current_primary",
            Field::CurrentSecondary => "current_secondary",
            Field::CurrentRms => "current_rms",
            Field::WaterFlow => "water_flow",
            Field::GasLevel => "gas_level",
            Field::TankLevel => "tank_level",
            Field::Timestamp => "timestamp",
        }
    }

    /// Keys used by the sensor firmware generations for the same field.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::CurrentPrimary => &["current_20A"],
            Field::CurrentSecondary => &["current_30A"],
            Field::CurrentRms => &["sct013", "Irms"],
            Field::WaterFlow => &["waterFlow"],
            Field::GasLevel => &["gasDetected", "gas"],
            Field::TankLevel => &["level"],
            _ => &[],
        }
    }

    /// Every accepted key, canonical name first.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.as_str()).chain(self.aliases().iter().copied())
    }

    /// Plausible range for numeric fields. `None` for fields without one.
    pub fn range(&self) -> Option<RangeInclusive<f64>> {
        match self {
            Field::Temperature => Some(-50.0..=100.0),
            Field::Humidity | Field::TankLevel => Some(0.0..=100.0),
            Field::Voltage
            | Field::CurrentPrimary
            | Field::CurrentSecondary
            | Field::CurrentRms
            | Field::WaterFlow => Some(0.0..=f64::INFINITY),
            Field::GasLevel | Field::Timestamp => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Field::ALL.into_iter().find(|f| f.keys().any(|k| k == s)) {
            Some(field) => Ok(field),
            None => bail!("unknown reading field: {}", s),
        }
    }
}
