//! Streaming OOK/FSK pulse detection.

pub mod fsk;
pub mod ook;

pub use fsk::{FskSubDetector, FskVariant};
pub use ook::{FeedResult, PulseDetector};
