use std::f32::consts::PI;

use super::filter::LowPassFilter;

/// FM discriminator: converts I/Q samples to signed 16-bit frequency
/// offsets from the carrier via the atan2 phase difference, then smooths
/// the result with the fixed low-pass. All state (previous phase, filter
/// taps) is carried across chunks so the stream can be fed in arbitrary
/// block sizes.
#[derive(Debug, Default)]
pub struct FmDiscriminator {
    prev_phase: f32,
    lpf: LowPassFilter,
    raw: Vec<i16>,
}

impl FmDiscriminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset carried phase and filter state, e.g. after a retune.
    pub fn reset(&mut self) {
        self.prev_phase = 0.0;
        self.lpf.reset();
    }

    /// Interleaved unsigned 8-bit I/Q centred around 128.
    pub fn process_cu8(&mut self, iq: &[u8], fm: &mut Vec<i16>) {
        self.raw.clear();
        self.raw.reserve(iq.len() / 2);
        let mut prev_phase = self.prev_phase;
        for pair in iq.chunks_exact(2) {
            let i = pair[0] as f32 - 128.0;
            let q = pair[1] as f32 - 128.0;
            self.raw.push(step(&mut prev_phase, i, q));
        }
        self.prev_phase = prev_phase;
        self.lpf.process(&self.raw, fm);
    }

    /// Interleaved signed 16-bit I/Q.
    pub fn process_cs16(&mut self, iq: &[i16], fm: &mut Vec<i16>) {
        self.raw.clear();
        self.raw.reserve(iq.len() / 2);
        let mut prev_phase = self.prev_phase;
        for pair in iq.chunks_exact(2) {
            self.raw.push(step(&mut prev_phase, pair[0] as f32, pair[1] as f32));
        }
        self.prev_phase = prev_phase;
        self.lpf.process(&self.raw, fm);
    }
}

fn step(prev_phase: &mut f32, i: f32, q: f32) -> i16 {
    let phase = q.atan2(i);
    let mut delta = phase - *prev_phase;
    *prev_phase = phase;
    // Unwrap to (-pi, pi]
    if delta > PI {
        delta -= 2.0 * PI;
    } else if delta < -PI {
        delta += 2.0 * PI;
    }
    // Half the sample rate maps to full scale
    (delta / PI * 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_cu8(freq_norm: f32, len: usize) -> Vec<u8> {
        // freq_norm: cycles per sample
        let mut iq = Vec::with_capacity(2 * len);
        for n in 0..len {
            let ph = 2.0 * PI * freq_norm * n as f32;
            iq.push((128.0 + 100.0 * ph.cos()) as u8);
            iq.push((128.0 + 100.0 * ph.sin()) as u8);
        }
        iq
    }

    #[test]
    fn positive_offset_gives_positive_output() {
        let mut disc = FmDiscriminator::new();
        let mut fm = Vec::new();
        disc.process_cu8(&tone_cu8(0.05, 512), &mut fm);
        // Skip the filter settling tail
        let settled = &fm[128..];
        let mean: f32 = settled.iter().map(|&s| s as f32).sum::<f32>() / settled.len() as f32;
        // 0.05 cycles/sample = 0.1 of half the sample rate
        assert!((mean / 32767.0 - 0.1).abs() < 0.02, "mean {mean}");
    }

    #[test]
    fn negative_offset_gives_negative_output() {
        let mut disc = FmDiscriminator::new();
        let mut fm = Vec::new();
        disc.process_cu8(&tone_cu8(-0.05, 512), &mut fm);
        let settled = &fm[128..];
        let mean: f32 = settled.iter().map(|&s| s as f32).sum::<f32>() / settled.len() as f32;
        assert!(mean < -2500.0, "mean {mean}");
    }

    #[test]
    fn chunked_processing_matches_whole_buffer() {
        let iq = tone_cu8(0.03, 600);
        let mut whole = FmDiscriminator::new();
        let mut expected = Vec::new();
        whole.process_cu8(&iq, &mut expected);

        let mut chunked = FmDiscriminator::new();
        let mut got = Vec::new();
        let mut part = Vec::new();
        for chunk in iq.chunks(100) {
            chunked.process_cu8(chunk, &mut part);
            got.extend_from_slice(&part);
        }
        assert_eq!(got, expected);
    }
}
