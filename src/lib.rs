//! Demodulation and pulse-analysis core for ISM-band receivers.
//!
//! Raw baseband chunks (complex I/Q or pre-demodulated AM/FM samples) go in,
//! one [`pulse::PulseData`] per detected RF burst comes out, annotated with
//! carrier statistics and ready for protocol slicers. The
//! [`analyze::PulseAnalyzer`] classifies a captured burst into slicer
//! parameters, and [`rfraw`] round-trips the textual bucket format.

pub mod analyze;
pub mod baseband;
pub mod detect;
pub mod error;
pub mod format;
pub mod pulse;
pub mod rfraw;
pub mod stream;
pub mod utils;

pub use detect::{FeedResult, FskVariant, PulseDetector};
pub use error::PulseError;
pub use pulse::PulseData;
