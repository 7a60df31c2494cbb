/// Log level used when `RUST_LOG` is unset
pub const LOG_LEVEL: &str = "info";

// ============================================================================
// Pulse detector parameters
// ============================================================================

/// Maximum number of (mark, space) entries in one burst
pub const PD_MAX_PULSES: usize = 1200;

/// Minimum number of FSK pulses before a burst is promoted to FSK
pub const PD_MIN_PULSES: usize = 16;

/// Shorter pulses and gaps are discarded as spurious
pub const PD_MIN_PULSE_SAMPLES: i32 = 10;

/// Pulses longer than this end the burst (ms)
pub const PD_MAX_PULSE_MS: i32 = 100;

/// Minimum gap size before the gap/pulse ratio may end the burst (ms)
pub const PD_MIN_GAP_MS: i32 = 10;

/// Gaps longer than this always end the burst (ms)
pub const PD_MAX_GAP_MS: i32 = 100;

/// A gap this many times the longest pulse ends the burst
pub const PD_MAX_GAP_RATIO: i32 = 10;

// ============================================================================
// OOK level estimators
// ============================================================================

/// Noise (low) level estimator ratio; also the lead-in settle count
pub const OOK_EST_LOW_RATIO: i32 = 1024;

/// Signal (high) level estimator ratio, used only inside a pulse
pub const OOK_EST_HIGH_RATIO: i32 = 64;

/// Ceiling for the high level estimate (envelope full scale)
pub const OOK_MAX_HIGH_LEVEL: i32 = 16384;

/// Default minimum-signal threshold in dB below full scale
pub const OOK_DEFAULT_MIN_LEVEL_DB: f32 = -12.1442;

/// Default high/low ratio for squared-amplitude envelopes (dB)
pub const OOK_DEFAULT_HIGH_LOW_RATIO_DB: f32 = 9.0;

/// Default high/low ratio for true-magnitude envelopes (dB)
pub const OOK_DEFAULT_HIGH_LOW_RATIO_MAG_DB: f32 = 11.0;

// ============================================================================
// FSK sub-detector
// ============================================================================

/// Minimum discriminator swing to split F1/F2 estimates
pub const FSK_DEFAULT_FM_DELTA: i32 = 6000;

/// Estimator ratio for the frequency currently keyed
pub const FSK_EST_FAST: i32 = 16;

/// Estimator ratio for the idle frequency
pub const FSK_EST_SLOW: i32 = 64;

/// Samples the minmax variant skips while the range estimate settles
pub const FSK_MINMAX_SKIP_SAMPLES: u32 = 40;

/// Per-sample decay applied to the minmax running extremes
pub const FSK_MINMAX_DECAY: i32 = 10;

// ============================================================================
// Pulse analyzer
// ============================================================================

/// Maximum number of histogram bins
pub const MAX_HIST_BINS: usize = 16;

/// Relative width tolerance when bucketing and fusing bins
pub const HIST_TOLERANCE: f32 = 0.2;

/// Maximum RfRaw code blocks emitted for one burst
pub const RFRAW_MAX_CODES: usize = 32;

/// Envelope full scale (squared 8-bit amplitude, also Q0.15 half scale)
pub const ENVELOPE_FULL_SCALE: i32 = 16384;
