use std::io::{BufRead, Write};

use tracing::warn;

use crate::error::PulseError;
use crate::rfraw;
use crate::utils::consts::{ENVELOPE_FULL_SCALE, PD_MAX_PULSES};

/// One captured RF burst: an ordered list of (mark, space) durations in
/// samples, plus carrier statistics. Built up by the detector, emitted by
/// value, read-only for consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulseData {
    /// Absolute sample index of the first mark, relative to the stream origin
    pub offset: u64,
    /// Samples per second
    pub sample_rate: u32,
    /// ADC sample depth
    pub depth_bits: u32,
    /// Samples ago (within the latest chunk) that the burst started
    pub start_ago: u32,
    /// Samples ago (within the latest chunk) that the burst ended
    pub end_ago: u32,
    /// Mark durations in samples. May transiently hold one more entry than
    /// `gap` while a mark has ended but its space has not.
    pub pulse: Vec<i32>,
    /// Space durations in samples; the last entry may be the synthetic
    /// terminating gap
    pub gap: Vec<i32>,
    /// Noise level estimate at emission (envelope units)
    pub ook_low_estimate: i32,
    /// Signal level estimate at emission (envelope units)
    pub ook_high_estimate: i32,
    /// Mark carrier frequency estimate (signed 16-bit discriminator units)
    pub fsk_f1_est: i32,
    /// Space carrier frequency estimate; non-zero iff the burst is FSK
    pub fsk_f2_est: i32,
    pub freq1_hz: f32,
    pub freq2_hz: f32,
    pub centerfreq_hz: f32,
    pub rssi_db: f32,
    pub snr_db: f32,
    pub noise_db: f32,
    pub range_db: f32,
}

impl PulseData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed (mark, space) entries.
    pub fn num_pulses(&self) -> usize {
        self.pulse.len().min(self.gap.len())
    }

    pub fn is_empty(&self) -> bool {
        self.num_pulses() == 0
    }

    /// True when the burst was emitted by the FSK path.
    pub fn is_fsk(&self) -> bool {
        self.fsk_f2_est != 0
    }

    /// Total burst length in samples, terminating gap included.
    pub fn total_samples(&self) -> i64 {
        let n = self.num_pulses();
        self.pulse[..n].iter().map(|&p| p as i64).sum::<i64>()
            + self.gap[..n].iter().map(|&g| g as i64).sum::<i64>()
    }

    /// Reset to the zero state, keeping allocations.
    pub fn clear(&mut self) {
        let pulse = std::mem::take(&mut self.pulse);
        let gap = std::mem::take(&mut self.gap);
        *self = Self::default();
        self.pulse = pulse;
        self.gap = gap;
        self.pulse.clear();
        self.gap.clear();
    }

    /// Append one (mark, space) entry, dropping it when the buffer is full.
    pub fn push(&mut self, pulse: i32, gap: i32) {
        if self.num_pulses() >= PD_MAX_PULSES {
            return;
        }
        self.pulse.push(pulse);
        self.gap.push(gap);
    }

    /// Drop the oldest half of the entries and advance `offset` by the
    /// samples they covered. Used during very long FSK bursts to trade
    /// truncation for continued decoding.
    pub fn shift(&mut self) {
        let half = PD_MAX_PULSES / 2;
        let n = half.min(self.num_pulses());
        let dropped: i64 = self.pulse[..n].iter().map(|&p| p as i64).sum::<i64>()
            + self.gap[..n].iter().map(|&g| g as i64).sum::<i64>();
        self.pulse.drain(..n);
        self.gap.drain(..n);
        self.offset += dropped as u64;
    }

    /// Rasterize the burst into a logic-trace byte buffer covering absolute
    /// sample positions `[buf_offset, buf_offset + buf.len())`. Marks are
    /// written as `0x01 | bits`, spaces as `0x01`; `bits` distinguishes the
    /// OOK (0x02) and FSK (0x04) channels. Writes outside the buffer are
    /// clipped.
    pub fn dump_raw(&self, buf: &mut [u8], buf_offset: u64, bits: u8) {
        let len = buf.len() as i64;
        let mut pos = self.offset as i64 - buf_offset as i64;
        for n in 0..self.num_pulses() {
            let mark_end = pos + self.pulse[n] as i64;
            for i in pos.max(0)..mark_end.min(len) {
                buf[i as usize] |= 0x01 | bits;
            }
            pos = mark_end;
            let gap_end = pos + self.gap[n] as i64;
            for i in pos.max(0)..gap_end.min(len) {
                buf[i as usize] |= 0x01;
            }
            pos = gap_end;
        }
    }

    /// Derive the Hz/dB statistics from the raw estimates.
    ///
    /// Envelope samples from the squared-amplitude path need 10*log10 against
    /// full scale 16384; true-magnitude samples need 20*log10.
    pub fn finalize(&mut self, center_freq_hz: f32, use_magnitude: bool) {
        let full = ENVELOPE_FULL_SCALE as f32;
        let offs1 = self.fsk_f1_est as f32 / 32768.0 * self.sample_rate as f32 / 2.0;
        let offs2 = self.fsk_f2_est as f32 / 32768.0 * self.sample_rate as f32 / 2.0;
        self.centerfreq_hz = center_freq_hz;
        self.freq1_hz = center_freq_hz + offs1;
        self.freq2_hz = if self.is_fsk() { center_freq_hz + offs2 } else { 0.0 };
        let high = self.ook_high_estimate.max(1) as f32;
        let low = (self.ook_low_estimate + 1).max(1) as f32;
        let scale = if use_magnitude { 20.0 } else { 10.0 };
        self.rssi_db = scale * (high / full).log10();
        self.noise_db = scale * (low / full).log10();
        self.snr_db = scale * (high / low).log10();
        self.range_db = scale * full.log10();
    }

    /// Classic per-entry listing, widths in samples.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "Pulse data: {} pulses", self.num_pulses())?;
        for n in 0..self.num_pulses() {
            writeln!(
                out,
                "[{n:4}] Pulse: {:5}, Gap: {:5}, Period: {:5}",
                self.pulse[n],
                self.gap[n],
                self.pulse[n] + self.gap[n]
            )?;
        }
        Ok(())
    }

    /// File-level header for the textual pulse format.
    pub fn write_file_header<W: Write>(out: &mut W) -> std::io::Result<()> {
        writeln!(out, ";pulse data")?;
        writeln!(out, ";version 1")?;
        writeln!(out, ";timescale 1us")?;
        Ok(())
    }

    /// Write one record of the textual pulse format: header comments, one
    /// "mark_us gap_us" line per entry, `;end` terminator.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<(), PulseError> {
        if self.is_fsk() {
            writeln!(out, ";fsk {} pulses", self.num_pulses())?;
            writeln!(out, ";freq1 {:.0}", self.freq1_hz)?;
            writeln!(out, ";freq2 {:.0}", self.freq2_hz)?;
        } else {
            writeln!(out, ";ook {} pulses", self.num_pulses())?;
            writeln!(out, ";freq1 {:.0}", self.freq1_hz)?;
        }
        writeln!(out, ";samplerate {} Hz", self.sample_rate)?;
        writeln!(out, ";rssi {:.1} dB", self.rssi_db)?;
        writeln!(out, ";snr {:.1} dB", self.snr_db)?;
        writeln!(out, ";noise {:.1} dB", self.noise_db)?;
        let to_us = 1e6 / self.sample_rate as f64;
        for n in 0..self.num_pulses() {
            writeln!(
                out,
                "{:.0} {:.0}",
                self.pulse[n] as f64 * to_us,
                self.gap[n] as f64 * to_us
            )?;
        }
        writeln!(out, ";end")?;
        Ok(())
    }

    /// Read one record of the textual pulse format. Durations on data lines
    /// are in µs and converted via `sample_rate / 1e6`; `aa`-prefixed data
    /// lines are RfRaw and delegated to its parser. Malformed data lines are
    /// skipped with a warning. Returns false when the reader was exhausted
    /// without any data.
    pub fn load<R: BufRead>(&mut self, reader: &mut R, sample_rate: u32) -> Result<bool, PulseError> {
        self.clear();
        self.sample_rate = sample_rate;
        let to_sample = sample_rate as f64 / 1e6;
        let mut line = String::new();
        let mut seen_data = false;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break; // EOF
            }
            let s = line.trim();
            if s.starts_with(";end") {
                break;
            }
            if s.starts_with(';') {
                if seen_data {
                    break; // next record's header
                }
                continue; // header keys carry nothing the widths need
            }
            if s.is_empty() {
                continue;
            }
            if rfraw::check(s) {
                rfraw::parse(self, s)?;
                seen_data = true;
                continue;
            }
            let mut it = s.split_whitespace();
            let parsed = (|| {
                let mark: i64 = it.next()?.parse().ok()?;
                let space: i64 = it.next()?.parse().ok()?;
                Some((mark, space))
            })();
            match parsed {
                Some((mark, space)) => {
                    self.push((mark as f64 * to_sample) as i32, (space as f64 * to_sample) as i32);
                    seen_data = true;
                }
                None => warn!("skipping malformed pulse line: {s:?}"),
            }
            if self.num_pulses() >= PD_MAX_PULSES {
                break;
            }
        }
        Ok(seen_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_burst() -> PulseData {
        let mut data = PulseData::new();
        data.sample_rate = 1_000_000;
        data.offset = 5000;
        for n in 0..20 {
            data.push(100 + n, 200 + n);
        }
        data
    }

    #[test]
    fn shift_preserves_absolute_timing() {
        let mut data = PulseData::new();
        data.offset = 1000;
        for _ in 0..PD_MAX_PULSES {
            data.push(40, 60);
        }
        let first_half: i64 = (0..PD_MAX_PULSES / 2).map(|_| 100i64).sum();
        data.shift();
        assert_eq!(data.num_pulses(), PD_MAX_PULSES / 2);
        assert_eq!(data.offset, 1000 + first_half as u64);
    }

    #[test]
    fn push_refuses_overflow() {
        let mut data = PulseData::new();
        for _ in 0..PD_MAX_PULSES + 10 {
            data.push(10, 10);
        }
        assert_eq!(data.num_pulses(), PD_MAX_PULSES);
    }

    #[test]
    fn dump_then_load_is_identity_at_1mhz() {
        let data = sample_burst();
        let mut text = Vec::new();
        data.dump(&mut text).unwrap();

        let mut reloaded = PulseData::new();
        let mut cursor = Cursor::new(text);
        assert!(reloaded.load(&mut cursor, 1_000_000).unwrap());
        assert_eq!(reloaded.pulse, data.pulse);
        assert_eq!(reloaded.gap, data.gap);
    }

    #[test]
    fn load_tolerates_crlf_and_whitespace() {
        let text = ";ook 2 pulses\r\n  100 200\r\n\t300 400\r\n;end\r\n";
        let mut data = PulseData::new();
        let mut cursor = Cursor::new(text.as_bytes());
        assert!(data.load(&mut cursor, 1_000_000).unwrap());
        assert_eq!(data.pulse, vec![100, 300]);
        assert_eq!(data.gap, vec![200, 400]);
    }

    #[test]
    fn load_skips_malformed_lines() {
        let text = ";ook\n100 200\nnot a line\n300 400\n;end\n";
        let mut data = PulseData::new();
        let mut cursor = Cursor::new(text.as_bytes());
        assert!(data.load(&mut cursor, 1_000_000).unwrap());
        assert_eq!(data.num_pulses(), 2);
    }

    #[test]
    fn dump_raw_clips_out_of_range_writes() {
        let mut data = PulseData::new();
        data.offset = 90;
        data.push(20, 10);
        let mut buf = vec![0u8; 100];
        // Mark covers [90, 110), clipped at 100; gap falls fully outside.
        data.dump_raw(&mut buf, 0, 0x02);
        assert!(buf[..90].iter().all(|&b| b == 0));
        assert!(buf[90..].iter().all(|&b| b == 0x03));

        // Entirely before the buffer window.
        let mut buf2 = vec![0u8; 10];
        data.dump_raw(&mut buf2, 10_000, 0x02);
        assert!(buf2.iter().all(|&b| b == 0));
    }

    #[test]
    fn finalize_derives_consistent_db_figures() {
        let mut data = sample_burst();
        data.ook_high_estimate = 16384;
        data.ook_low_estimate = 163;
        data.finalize(433_920_000.0, false);
        assert!((data.rssi_db - 0.0).abs() < 0.01);
        assert!((data.snr_db - 20.0).abs() < 0.1);
        assert!((data.noise_db + 20.0).abs() < 0.1);
        assert_eq!(data.centerfreq_hz, 433_920_000.0);
        assert!(data.freq1_hz > 0.0);
    }
}
