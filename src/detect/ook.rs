use std::mem;

use tracing::debug;

use crate::pulse::PulseData;
use crate::utils::consts::{
    ENVELOPE_FULL_SCALE, OOK_DEFAULT_HIGH_LOW_RATIO_DB, OOK_DEFAULT_HIGH_LOW_RATIO_MAG_DB,
    OOK_DEFAULT_MIN_LEVEL_DB, OOK_EST_HIGH_RATIO, OOK_EST_LOW_RATIO, OOK_MAX_HIGH_LEVEL,
    PD_MAX_GAP_MS, PD_MAX_GAP_RATIO, PD_MAX_PULSES, PD_MIN_GAP_MS, PD_MIN_PULSES,
    PD_MIN_PULSE_SAMPLES,
};

use super::fsk::{FskSubDetector, FskVariant};

/// Outcome of feeding one chunk (or part of one) to the detector.
#[derive(Debug, PartialEq)]
pub enum FeedResult {
    /// Chunk exhausted with no completed burst.
    None,
    /// An OOK burst completed inside the chunk.
    Ook(PulseData),
    /// An FSK burst completed inside the chunk.
    Fsk(PulseData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OokState {
    #[default]
    Idle,
    Pulse,
    GapStart,
    Gap,
}

/// Streaming OOK pulse detector with adaptive level estimation, hysteresis
/// thresholds and an embedded FSK sub-detector riding inside each burst.
///
/// The detector is resumable: [`PulseDetector::feed`] walks the chunk from
/// its internal sample cursor and returns as soon as a burst completes; the
/// caller then calls `feed` again with the *same* chunk to continue, until
/// `FeedResult::None` signals the chunk is exhausted.
#[derive(Debug)]
pub struct PulseDetector {
    use_magnitude: bool,
    /// Manual threshold override; 0 disables
    ook_fixed_high_level: i32,
    /// Floor for the high level estimate
    ook_min_high_level: i32,
    /// Default high level is this ratio above the noise estimate
    ook_high_low_ratio: f32,
    /// Sample depth stamped on emitted bursts
    pub depth_bits: u32,

    state: OokState,
    ook_low_estimate: i32,
    ook_high_estimate: i32,
    pulse_length: i32,
    max_pulse: i32,
    data_counter: usize,
    lead_in_counter: i32,
    fsk: FskSubDetector,
    pulses: PulseData,
    fsk_pulses: PulseData,
}

impl Default for PulseDetector {
    fn default() -> Self {
        let mut detector = Self {
            use_magnitude: false,
            ook_fixed_high_level: 0,
            ook_min_high_level: 0,
            ook_high_low_ratio: 0.0,
            depth_bits: 8,
            state: OokState::Idle,
            ook_low_estimate: 0,
            ook_high_estimate: 0,
            pulse_length: 0,
            max_pulse: 0,
            data_counter: 0,
            lead_in_counter: 0,
            fsk: FskSubDetector::new(),
            pulses: PulseData::new(),
            fsk_pulses: PulseData::new(),
        };
        detector.set_levels(false, None, OOK_DEFAULT_MIN_LEVEL_DB, OOK_DEFAULT_HIGH_LOW_RATIO_DB);
        detector
    }
}

impl PulseDetector {
    /// Detector for squared-amplitude envelopes (the CU8 path).
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector for true-magnitude envelopes (the CS16 path).
    pub fn new_magnitude() -> Self {
        let mut detector = Self::default();
        detector.set_levels(
            true,
            None,
            OOK_DEFAULT_MIN_LEVEL_DB,
            OOK_DEFAULT_HIGH_LOW_RATIO_MAG_DB,
        );
        detector
    }

    /// Configure the level model. dB figures are relative to envelope full
    /// scale; amplitude (squared) envelopes scale by 10 dB per decade,
    /// magnitude envelopes by 20. A fixed high level disables the adaptive
    /// threshold entirely.
    pub fn set_levels(
        &mut self,
        use_magnitude: bool,
        fixed_high_level_db: Option<f32>,
        min_level_db: f32,
        high_low_ratio_db: f32,
    ) {
        let scale = if use_magnitude { 20.0 } else { 10.0 };
        self.use_magnitude = use_magnitude;
        self.ook_min_high_level =
            (ENVELOPE_FULL_SCALE as f32 * 10f32.powf(min_level_db / scale)) as i32;
        self.ook_high_low_ratio = 10f32.powf(high_low_ratio_db / scale);
        self.ook_fixed_high_level = match fixed_high_level_db {
            Some(db) => (ENVELOPE_FULL_SCALE as f32 * 10f32.powf(db / scale)) as i32,
            None => 0,
        };
    }

    pub fn use_magnitude(&self) -> bool {
        self.use_magnitude
    }

    /// Process samples from `envelope`/`fm` (same length) starting at the
    /// internal cursor. `sample_offset` is the absolute index of the chunk's
    /// first sample.
    pub fn feed(
        &mut self,
        envelope: &[i16],
        fm: &[i16],
        sample_rate: u32,
        sample_offset: u64,
        variant: FskVariant,
    ) -> FeedResult {
        let len = envelope.len().min(fm.len());
        let samples_per_ms = (sample_rate / 1000) as i32;

        if self.data_counter == 0 {
            // Age the in-flight bursts by the new chunk
            self.pulses.start_ago = self.pulses.start_ago.saturating_add(len as u32);
            self.fsk_pulses.start_ago = self.fsk_pulses.start_ago.saturating_add(len as u32);
            self.pulses.end_ago = self.pulses.end_ago.saturating_add(len as u32);
            self.fsk_pulses.end_ago = self.fsk_pulses.end_ago.saturating_add(len as u32);
            self.fsk.rearm_overflow_notice();
        }
        self.ook_high_estimate = self.ook_high_estimate.max(self.ook_min_high_level);

        while self.data_counter < len {
            let am_n = envelope[self.data_counter] as i32;
            let mut threshold =
                self.ook_low_estimate + (self.ook_high_estimate - self.ook_low_estimate) / 2;
            if self.ook_fixed_high_level != 0 {
                threshold = self.ook_fixed_high_level;
            }
            let hysteresis = threshold / 8; // +-12%

            match self.state {
                OokState::Idle => {
                    if am_n > threshold + hysteresis && self.lead_in_counter > OOK_EST_LOW_RATIO {
                        // Burst starts here
                        self.pulses.clear();
                        self.fsk_pulses.clear();
                        self.pulses.sample_rate = sample_rate;
                        self.fsk_pulses.sample_rate = sample_rate;
                        self.pulses.depth_bits = self.depth_bits;
                        self.fsk_pulses.depth_bits = self.depth_bits;
                        let offset = sample_offset + self.data_counter as u64;
                        self.pulses.offset = offset;
                        self.fsk_pulses.offset = offset;
                        let start_ago = (len - self.data_counter) as u32;
                        self.pulses.start_ago = start_ago;
                        self.fsk_pulses.start_ago = start_ago;
                        self.pulse_length = 0;
                        self.max_pulse = 0;
                        self.fsk.reset();
                        self.state = OokState::Pulse;
                        debug!("burst start at offset {offset}");
                    } else {
                        // Track the noise level; the +-1 keeps the integer
                        // estimator from dead-zoning on small deltas
                        let delta = am_n - self.ook_low_estimate;
                        self.ook_low_estimate += delta / OOK_EST_LOW_RATIO;
                        self.ook_low_estimate += if delta > 0 { 1 } else { -1 };
                        self.ook_high_estimate =
                            (self.ook_high_low_ratio * self.ook_low_estimate as f32) as i32;
                        self.ook_high_estimate = self
                            .ook_high_estimate
                            .clamp(self.ook_min_high_level, OOK_MAX_HIGH_LEVEL);
                        if self.lead_in_counter <= OOK_EST_LOW_RATIO {
                            self.lead_in_counter += 1; // settle before detecting
                        }
                    }
                }
                OokState::Pulse => {
                    self.pulse_length += 1;
                    if am_n < threshold - hysteresis {
                        // End of mark
                        if self.pulse_length < PD_MIN_PULSE_SAMPLES {
                            if self.pulses.num_pulses() == 0 {
                                // Spurious first mark, not a burst
                                self.state = OokState::Idle;
                            } else {
                                // Spurious later mark: fold it back into the
                                // preceding space and let the gap limits
                                // close the burst
                                self.pulse_length += self.pulses.gap.pop().unwrap_or(0);
                                self.state = OokState::Gap;
                            }
                        } else {
                            self.pulses.pulse.push(self.pulse_length);
                            self.max_pulse = self.max_pulse.max(self.pulse_length);
                            self.pulse_length = 0;
                            self.state = OokState::GapStart;
                        }
                    } else {
                        // Still marking: fast high level estimate and
                        // per-burst carrier estimate
                        self.ook_high_estimate +=
                            am_n / OOK_EST_HIGH_RATIO - self.ook_high_estimate / OOK_EST_HIGH_RATIO;
                        self.ook_high_estimate = self
                            .ook_high_estimate
                            .clamp(self.ook_min_high_level, OOK_MAX_HIGH_LEVEL);
                        let fm_n = fm[self.data_counter] as i32;
                        self.pulses.fsk_f1_est += fm_n / OOK_EST_HIGH_RATIO
                            - self.pulses.fsk_f1_est / OOK_EST_HIGH_RATIO;
                    }
                    if self.pulses.num_pulses() == 0 {
                        // FSK rides inside the first mark only
                        self.fsk
                            .process(fm[self.data_counter], &mut self.fsk_pulses, variant);
                    }
                }
                OokState::GapStart => {
                    self.pulse_length += 1;
                    if am_n > threshold + hysteresis {
                        // Spurious gap: merge back into the mark
                        self.pulse_length += self.pulses.pulse.pop().unwrap_or(0);
                        self.state = OokState::Pulse;
                    } else if self.pulse_length >= PD_MIN_PULSE_SAMPLES {
                        self.state = OokState::Gap;
                        if self.fsk_pulses.num_pulses() > PD_MIN_PULSES {
                            // FSK pre-empts the enclosing OOK burst
                            if variant == FskVariant::Classic {
                                self.fsk.wrap_up(&mut self.fsk_pulses);
                            }
                            self.fsk_pulses.fsk_f1_est = self.fsk.fm_f1_est;
                            self.fsk_pulses.fsk_f2_est = self.fsk.fm_f2_est;
                            self.fsk_pulses.ook_low_estimate = self.ook_low_estimate;
                            self.fsk_pulses.ook_high_estimate = self.ook_high_estimate;
                            self.fsk_pulses.end_ago = (len - self.data_counter) as u32;
                            self.state = OokState::Idle;
                            debug!(
                                "fsk burst end, {} pulses",
                                self.fsk_pulses.num_pulses()
                            );
                            return FeedResult::Fsk(mem::take(&mut self.fsk_pulses));
                        }
                    }
                }
                OokState::Gap => {
                    self.pulse_length += 1;
                    if am_n > threshold + hysteresis {
                        // New mark: commit the space
                        self.pulses.gap.push(self.pulse_length);
                        if self.pulses.num_pulses() >= PD_MAX_PULSES {
                            // Buffer full: emit what we have
                            self.state = OokState::Idle;
                            return self.emit_ook(len);
                        }
                        self.pulse_length = 0;
                        self.state = OokState::Pulse;
                    }
                    let eop = (self.pulse_length > PD_MAX_GAP_RATIO * self.max_pulse
                        && self.pulse_length > PD_MIN_GAP_MS * samples_per_ms)
                        || self.pulse_length > PD_MAX_GAP_MS * samples_per_ms;
                    if eop {
                        self.pulses.gap.push(self.pulse_length);
                        self.state = OokState::Idle;
                        return self.emit_ook(len);
                    }
                }
            }
            self.data_counter += 1;
        }
        self.data_counter = 0;
        FeedResult::None
    }

    fn emit_ook(&mut self, chunk_len: usize) -> FeedResult {
        self.pulses.ook_low_estimate = self.ook_low_estimate;
        self.pulses.ook_high_estimate = self.ook_high_estimate;
        self.pulses.end_ago = (chunk_len - self.data_counter) as u32;
        debug!("ook burst end, {} pulses", self.pulses.num_pulses());
        FeedResult::Ook(mem::take(&mut self.pulses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 250_000;

    /// Noise floor long enough to satisfy the lead-in counter.
    fn lead_in(buf: &mut Vec<i16>) {
        for n in 0..2048 {
            buf.push(if n % 2 == 0 { 20 } else { 10 });
        }
    }

    fn feed_all(
        det: &mut PulseDetector,
        am: &[i16],
        fm: &[i16],
        rate: u32,
        variant: FskVariant,
    ) -> Vec<FeedResult> {
        let mut bursts = Vec::new();
        let mut offset = 0u64;
        for (am_chunk, fm_chunk) in am.chunks(8192).zip(fm.chunks(8192)) {
            loop {
                match det.feed(am_chunk, fm_chunk, rate, offset, variant) {
                    FeedResult::None => break,
                    burst => bursts.push(burst),
                }
            }
            offset += am_chunk.len() as u64;
        }
        bursts
    }

    #[test]
    fn detects_ppm_style_ook_burst() {
        let mut am = Vec::new();
        lead_in(&mut am);
        let gaps = [500usize, 1000, 500, 1000, 500, 1000, 500];
        for &gap in gaps.iter().chain(std::iter::once(&0)) {
            am.extend(std::iter::repeat_n(10000i16, 100));
            am.extend(std::iter::repeat_n(0i16, gap));
        }
        am.extend(std::iter::repeat_n(0i16, 50_000));
        let fm = vec![0i16; am.len()];

        let mut det = PulseDetector::new();
        let bursts = feed_all(&mut det, &am, &fm, RATE, FskVariant::Classic);
        assert_eq!(bursts.len(), 1);
        let FeedResult::Ook(data) = &bursts[0] else {
            panic!("expected an ook burst");
        };
        assert_eq!(data.num_pulses(), 8);
        for n in 0..8 {
            assert!((data.pulse[n] - 100).abs() <= 1, "pulse[{n}] = {}", data.pulse[n]);
        }
        for (n, &gap) in gaps.iter().enumerate() {
            assert!(
                (data.gap[n] - gap as i32).abs() <= 1,
                "gap[{n}] = {}",
                data.gap[n]
            );
        }
        assert!(data.ook_high_estimate > data.ook_low_estimate);
        assert_eq!(data.sample_rate, RATE);
    }

    #[test]
    fn emitted_bursts_keep_monotonic_offsets() {
        let mut am = Vec::new();
        lead_in(&mut am);
        for _ in 0..3 {
            for _ in 0..4 {
                am.extend(std::iter::repeat_n(12000i16, 100));
                am.extend(std::iter::repeat_n(0i16, 300));
            }
            am.extend(std::iter::repeat_n(0i16, 30_000)); // inter-burst silence
        }
        let fm = vec![0i16; am.len()];

        let mut det = PulseDetector::new();
        let bursts = feed_all(&mut det, &am, &fm, RATE, FskVariant::Classic);
        assert_eq!(bursts.len(), 3);
        let mut prev_end = 0u64;
        for burst in &bursts {
            let FeedResult::Ook(data) = burst else {
                panic!("expected ook bursts");
            };
            assert!(data.offset >= prev_end, "offset {} < {}", data.offset, prev_end);
            assert!(data.pulse[..data.num_pulses() - 1]
                .iter()
                .all(|&p| p >= PD_MIN_PULSE_SAMPLES));
            prev_end = data.offset + data.total_samples() as u64;
        }
    }

    #[test]
    fn promotes_long_constant_envelope_with_fm_swings_to_fsk() {
        let mut am = Vec::new();
        lead_in(&mut am);
        let mut fm = vec![0i16; am.len()];
        am.extend(std::iter::repeat_n(12000i16, 20_000));
        for n in 0..20_000 {
            fm.push(if (n / 400) % 2 == 0 { 6000 } else { -6000 });
        }
        am.extend(std::iter::repeat_n(0i16, 50_000));
        fm.extend(std::iter::repeat_n(0i16, 50_000));

        let mut det = PulseDetector::new();
        let bursts = feed_all(&mut det, &am, &fm, RATE, FskVariant::Classic);
        assert_eq!(bursts.len(), 1);
        let FeedResult::Fsk(data) = &bursts[0] else {
            panic!("expected an fsk burst");
        };
        // 50 alternating intervals pair up into 25 (mark, space) entries
        assert_eq!(data.num_pulses(), 25);
        assert!(data.is_fsk());
        assert!(data.fsk_f1_est > 0, "f1 {}", data.fsk_f1_est);
        assert!(data.fsk_f2_est < 0, "f2 {}", data.fsk_f2_est);
        for n in 1..data.num_pulses() - 1 {
            assert!((data.pulse[n] - 400).abs() <= 2, "pulse {}", data.pulse[n]);
            assert!((data.gap[n] - 400).abs() <= 2, "gap {}", data.gap[n]);
        }
    }

    #[test]
    fn overflow_emits_full_buffer_then_resumes() {
        let mut am = Vec::new();
        lead_in(&mut am);
        for _ in 0..2000 {
            am.extend(std::iter::repeat_n(12000i16, 40));
            am.extend(std::iter::repeat_n(0i16, 40));
        }
        am.extend(std::iter::repeat_n(0i16, 200_000));
        let fm = vec![0i16; am.len()];

        let mut det = PulseDetector::new();
        let bursts = feed_all(&mut det, &am, &fm, 1_000_000, FskVariant::Classic);
        assert_eq!(bursts.len(), 2);
        let FeedResult::Ook(first) = &bursts[0] else {
            panic!("expected ook");
        };
        let FeedResult::Ook(second) = &bursts[1] else {
            panic!("expected ook");
        };
        assert_eq!(first.num_pulses(), PD_MAX_PULSES);
        // The remaining pulses start a fresh burst right where emission cut
        assert_eq!(second.num_pulses(), 2000 - PD_MAX_PULSES);
        assert_eq!(second.offset, first.offset + first.total_samples() as u64);
        assert!(second.start_ago > 0);
    }

    #[test]
    fn fixed_level_overrides_adaptive_threshold() {
        let mut det = PulseDetector::new();
        det.set_levels(false, Some(-6.0), OOK_DEFAULT_MIN_LEVEL_DB, 9.0);
        // Fixed threshold ~4115; a 3000-amplitude burst stays invisible
        let mut am = Vec::new();
        lead_in(&mut am);
        am.extend(std::iter::repeat_n(3000i16, 500));
        am.extend(std::iter::repeat_n(0i16, 50_000));
        let fm = vec![0i16; am.len()];
        let bursts = feed_all(&mut det, &am, &fm, RATE, FskVariant::Classic);
        assert!(bursts.is_empty());
    }

    #[test]
    fn short_spike_is_not_a_burst() {
        let mut am = Vec::new();
        lead_in(&mut am);
        am.extend(std::iter::repeat_n(12000i16, 3)); // below PD_MIN_PULSE_SAMPLES
        am.extend(std::iter::repeat_n(0i16, 50_000));
        let fm = vec![0i16; am.len()];
        let mut det = PulseDetector::new();
        let bursts = feed_all(&mut det, &am, &fm, RATE, FskVariant::Classic);
        assert!(bursts.is_empty());
    }
}
