//! Burst classification: width histograms, tolerance clustering and
//! modulation guessing for the flex slicer.

pub mod analyzer;
pub mod histogram;

pub use analyzer::{Analysis, Keying, ModulationFamily, ModulationSpec, PulseAnalyzer, Verdict};
pub use histogram::{HistBin, Histogram};
