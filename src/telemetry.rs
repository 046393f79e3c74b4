mod field;
mod gas_level;
mod reading;

pub use field::*;
pub use gas_level::*;
pub use reading::*;
