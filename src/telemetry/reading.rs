use chrono::{DateTime, SubsecRound as _, Utc};
use serde::Serialize;

use crate::telemetry::GasLevel;

/// Sensor channels of a reading. `None` means unknown, which is distinct
/// from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorValues {
    pub temperature: Option<f64>,

    pub humidity: Option<f64>,

    pub voltage: Option<f64>,

    pub current_primary: Option<f64>,

    pub current_secondary: Option<f64>,

    pub current_rms: Option<f64>,

    pub water_flow: Option<f64>,

    pub gas_level: Option<GasLevel>,

    pub tank_level: Option<f64>,
}

/// A validated reading that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    /// Time reported by the producer. The store assigns one when absent.
    pub timestamp: Option<DateTime<Utc>>,

    pub values: SensorValues,
}

impl Reading {
    /// Stored form of this reading. Timestamps keep microsecond precision,
    /// the resolution of the durable store.
    pub fn into_stored(self, id: i64, now: DateTime<Utc>) -> StoredReading {
        StoredReading {
            id,
            timestamp: self.timestamp.unwrap_or(now).trunc_subsecs(6),
            values: self.values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    /// Insertion sequence; breaks ties between equal timestamps.
    pub id: i64,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub values: SensorValues,
}
