//! Baseband sample conversions feeding the pulse detector: I/Q to AM
//! envelope, I/Q to FM frequency offset, and the shared low-pass filter.

pub mod envelope;
pub mod filter;
pub mod fm;

pub use envelope::{envelope_cu8, magnitude_cs16};
pub use filter::LowPassFilter;
pub use fm::FmDiscriminator;
