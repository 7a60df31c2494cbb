use tracing::{error, warn};

use crate::pulse::PulseData;
use crate::utils::consts::{
    FSK_DEFAULT_FM_DELTA, FSK_EST_FAST, FSK_EST_SLOW, FSK_MINMAX_DECAY, FSK_MINMAX_SKIP_SAMPLES,
    PD_MAX_PULSES, PD_MIN_PULSE_SAMPLES,
};

/// Which FSK algorithm rides inside the OOK pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FskVariant {
    /// Dual-estimator state machine keyed on deviation from F1/F2.
    #[default]
    Classic,
    /// Running min/max midpoint tracker; simpler and more drift-tolerant.
    MinMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FskState {
    #[default]
    Init,
    FreqHigh,
    FreqLow,
    Error,
}

/// Per-sample FSK state machine, fed with discriminator samples for the
/// duration of the first OOK mark. Mark entries are intervals at F1, space
/// entries intervals at F2.
#[derive(Debug, Default)]
pub struct FskSubDetector {
    state: FskState,
    pulse_length: i32,
    pub fm_f1_est: i32,
    pub fm_f2_est: i32,
    // minmax range tracker
    var_test_max: i32,
    var_test_min: i32,
    skip_samples: u32,
    // one overflow notice per chunk
    overflow_warned: bool,
}

fn iir(est: &mut i32, sample: i32, ratio: i32) {
    *est += sample / ratio - *est / ratio;
}

impl FskSubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for a new burst.
    pub fn reset(&mut self) {
        *self = Self {
            var_test_max: i32::MIN,
            var_test_min: i32::MAX,
            skip_samples: FSK_MINMAX_SKIP_SAMPLES,
            overflow_warned: self.overflow_warned,
            ..Self::default()
        };
    }

    /// Allow one overflow notice for the next chunk.
    pub fn rearm_overflow_notice(&mut self) {
        self.overflow_warned = false;
    }

    pub fn process(&mut self, fm_n: i16, pulses: &mut PulseData, variant: FskVariant) {
        match variant {
            FskVariant::Classic => self.process_classic(fm_n, pulses),
            FskVariant::MinMax => self.process_minmax(fm_n, pulses),
        }
    }

    fn process_classic(&mut self, fm_n: i16, pulses: &mut PulseData) {
        let fm_n = fm_n as i32;
        let f1_delta = (fm_n - self.fm_f1_est).abs();
        let f2_delta = (fm_n - self.fm_f2_est).abs();
        self.pulse_length += 1;

        match self.state {
            FskState::Init => {
                if self.pulse_length < PD_MIN_PULSE_SAMPLES {
                    // Quick initial estimate
                    self.fm_f1_est = self.fm_f1_est / 2 + fm_n / 2;
                } else if f1_delta > FSK_DEFAULT_FM_DELTA / 2 {
                    if fm_n > self.fm_f1_est {
                        // Deviation is positive: the initial interval was the
                        // low frequency, so the burst starts with a gap.
                        self.fm_f2_est = self.fm_f1_est;
                        self.fm_f1_est = fm_n;
                        pulses.pulse.push(0);
                        pulses.gap.push(self.pulse_length);
                        self.state = FskState::FreqHigh;
                    } else {
                        self.fm_f2_est = fm_n;
                        pulses.pulse.push(self.pulse_length);
                        self.state = FskState::FreqLow;
                    }
                    self.pulse_length = 0;
                } else {
                    iir(&mut self.fm_f1_est, fm_n, FSK_EST_SLOW);
                }
            }
            FskState::FreqHigh => {
                if f2_delta < f1_delta {
                    // Closer to F2: the mark interval ends here
                    self.state = FskState::FreqLow;
                    if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        pulses.pulse.push(self.pulse_length);
                        self.pulse_length = 0;
                    } else if let Some(prev_gap) = pulses.gap.pop() {
                        // Spurious mark: rewind into the previous space
                        self.pulse_length += prev_gap;
                    } else {
                        error!("fsk rewind with no previous gap");
                        self.state = FskState::Error;
                    }
                } else {
                    iir(&mut self.fm_f1_est, fm_n, FSK_EST_FAST);
                }
            }
            FskState::FreqLow => {
                if f1_delta < f2_delta {
                    // Closer to F1: the space interval ends here
                    self.state = FskState::FreqHigh;
                    if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        pulses.gap.push(self.pulse_length);
                        self.pulse_length = 0;
                        self.check_overflow(pulses);
                    } else if let Some(prev_pulse) = pulses.pulse.pop() {
                        // Spurious space: rewind into the previous mark
                        self.pulse_length += prev_pulse;
                    } else {
                        error!("fsk rewind with no previous pulse");
                        self.state = FskState::Error;
                    }
                } else {
                    iir(&mut self.fm_f2_est, fm_n, FSK_EST_FAST);
                }
            }
            FskState::Error => {} // hold until the burst is wrapped up
        }
    }

    fn process_minmax(&mut self, fm_n: i16, pulses: &mut PulseData) {
        let fm_n = fm_n as i32;
        self.var_test_max = self.var_test_max.max(fm_n);
        self.var_test_min = self.var_test_min.min(fm_n);
        if self.skip_samples > 0 {
            // Initial settling: only form the range estimate
            self.skip_samples -= 1;
            return;
        }
        let mid = (self.var_test_max + self.var_test_min) / 2;
        // Asymmetric decay keeps the extremes tracking slow drift
        if fm_n > mid {
            self.var_test_max -= FSK_MINMAX_DECAY;
        } else {
            self.var_test_min += FSK_MINMAX_DECAY;
        }
        self.pulse_length += 1;

        match self.state {
            FskState::Init => {
                self.state = if fm_n > mid { FskState::FreqHigh } else { FskState::FreqLow };
                self.fm_f1_est = self.var_test_max;
                self.fm_f2_est = self.var_test_min;
                self.pulse_length = 0;
            }
            FskState::FreqHigh => {
                if fm_n <= mid {
                    self.state = FskState::FreqLow;
                    if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        pulses.pulse.push(self.pulse_length);
                        self.pulse_length = 0;
                    } else if let Some(prev_gap) = pulses.gap.pop() {
                        self.pulse_length += prev_gap;
                    } else {
                        // Sub-threshold leading mark: record it as zero-width
                        // and let its samples count into the space
                        pulses.pulse.push(0);
                    }
                } else {
                    iir(&mut self.fm_f1_est, fm_n, FSK_EST_FAST);
                }
            }
            FskState::FreqLow => {
                if fm_n > mid {
                    self.state = FskState::FreqHigh;
                    if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        if pulses.pulse.len() == pulses.gap.len() {
                            // Burst began at F2: synthesize the zero-width mark
                            pulses.pulse.push(0);
                        }
                        pulses.gap.push(self.pulse_length);
                        self.pulse_length = 0;
                        self.check_overflow(pulses);
                    } else if pulses.pulse.len() > pulses.gap.len() {
                        // Spurious space: rewind into the previous mark
                        self.pulse_length += pulses.pulse.pop().unwrap_or(0);
                    }
                } else {
                    iir(&mut self.fm_f2_est, fm_n, FSK_EST_FAST);
                }
            }
            FskState::Error => {}
        }
    }

    /// Keep decoding through very long bursts by discarding the oldest half.
    fn check_overflow(&mut self, pulses: &mut PulseData) {
        if pulses.num_pulses() >= PD_MAX_PULSES {
            if !self.overflow_warned {
                warn!("Too many pulses detected");
                self.overflow_warned = true;
            }
            pulses.shift();
        }
    }

    /// Flush the trailing partial interval at the end of the burst.
    pub fn wrap_up(&mut self, pulses: &mut PulseData) {
        if pulses.num_pulses() >= PD_MAX_PULSES {
            return;
        }
        self.pulse_length += 1;
        match self.state {
            FskState::FreqHigh => {
                pulses.pulse.push(self.pulse_length);
                pulses.gap.push(0);
            }
            FskState::FreqLow => {
                if pulses.pulse.len() > pulses.gap.len() {
                    pulses.gap.push(self.pulse_length);
                }
            }
            FskState::Init | FskState::Error => {}
        }
        self.pulse_length = 0;
    }
}
