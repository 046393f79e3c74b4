use serde::{Serialize, Serializer};

/// Gas sensor output. Older nodes report a detection flag, newer ones an
/// analog level; both are kept as reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GasLevel {
    Detected(bool),
    Level(f64),
}

impl GasLevel {
    pub fn as_f64(&self) -> f64 {
        match self {
            GasLevel::Detected(detected) => f64::from(u8::from(*detected)),
            GasLevel::Level(level) => *level,
        }
    }
}

impl Serialize for GasLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GasLevel::Detected(detected) => serializer.serialize_u8(u8::from(*detected)),
            GasLevel::Level(level) => serializer.serialize_f64(*level),
        }
    }
}
