//! RfRaw textual burst codec: ASCII-hex "bucket and index" codes in the
//! Portisch/OpenMQTTGateway style. A `B1` code carries one burst; `B0`
//! codes add a payload length and a repeat count. Bucket words are in µs,
//! so parsed bursts carry a 1 MHz sample rate.

use tracing::warn;

use crate::analyze::Histogram;
use crate::error::PulseError;
use crate::pulse::PulseData;
use crate::utils::consts::{HIST_TOLERANCE, RFRAW_MAX_CODES};

const MAX_BUCKETS: usize = 8;

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '-' | ':' | '\t')
}

/// True iff the first four non-separator nibbles read `aab0` or `aab1`.
pub fn check(text: &str) -> bool {
    let mut nibbles = text
        .chars()
        .filter(|&c| !is_separator(c))
        .map(|c| c.to_digit(16));
    matches!(
        (nibbles.next(), nibbles.next(), nibbles.next(), nibbles.next()),
        (Some(Some(0xa)), Some(Some(0xa)), Some(Some(0xb)), Some(Some(b))) if b <= 1
    )
}

fn to_nibbles(text: &str) -> Result<Vec<u8>, PulseError> {
    text.chars()
        .filter(|&c| !is_separator(c))
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| PulseError::MalformedInput { line: format!("bad hex digit {c:?}") })
        })
        .collect()
}

struct ByteStream {
    bytes: Vec<u8>,
    pos: usize,
}

impl ByteStream {
    fn from_text(text: &str) -> Result<Self, PulseError> {
        let nibbles = to_nibbles(text)?;
        if nibbles.len() % 2 != 0 {
            return Err(PulseError::MalformedInput { line: "odd nibble count".into() });
        }
        let bytes = nibbles.chunks_exact(2).map(|p| (p[0] << 4) | p[1]).collect();
        Ok(Self { bytes, pos: 0 })
    }

    fn exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn byte(&mut self) -> Result<u8, PulseError> {
        let b = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| PulseError::MalformedInput { line: "truncated code".into() })?;
        self.pos += 1;
        Ok(b)
    }

    fn word(&mut self) -> Result<u16, PulseError> {
        let hi = self.byte()? as u16;
        let lo = self.byte()? as u16;
        Ok((hi << 8) | lo)
    }
}

/// Parse one or more concatenated codes, appending (mark, space) entries to
/// `data`. Repeated `B0` codes append their block once per repeat.
pub fn parse(data: &mut PulseData, text: &str) -> Result<(), PulseError> {
    let mut stream = ByteStream::from_text(text)?;
    while !stream.exhausted() {
        parse_code(data, &mut stream)?;
    }
    data.sample_rate = 1_000_000; // bucket words are µs
    Ok(())
}

fn parse_code(data: &mut PulseData, stream: &mut ByteStream) -> Result<(), PulseError> {
    if stream.byte()? != 0xaa {
        return Err(PulseError::MalformedInput { line: "missing 0xaa preamble".into() });
    }
    let fmt = stream.byte()?;
    let (nbins, repeats) = match fmt {
        0xb0 => {
            let _payload_len = stream.byte()?;
            let nbins = stream.byte()? as usize;
            let repeats = stream.byte()? as usize;
            (nbins, repeats.max(1))
        }
        0xb1 => (stream.byte()? as usize, 1),
        other => {
            return Err(PulseError::MalformedInput { line: format!("unknown code 0x{other:02x}") });
        }
    };
    if nbins > MAX_BUCKETS {
        return Err(PulseError::MalformedInput { line: format!("{nbins} buckets") });
    }
    let mut buckets = [0i32; MAX_BUCKETS];
    for bucket in buckets.iter_mut().take(nbins) {
        *bucket = stream.word()? as i32;
    }
    let mut payload = Vec::new();
    loop {
        let b = stream.byte()?;
        if b == 0x55 {
            break;
        }
        payload.push(b);
    }

    // Old codes carry plain index pairs; new codes mark each pulse nibble
    // with the 0x8 bit. The presence test can misfire on very short codes.
    let new_format = payload.iter().any(|&b| b & 0x88 != 0);

    let index = |nib: u8| -> Result<i32, PulseError> {
        let i = (nib & 0x7) as usize;
        if i >= nbins {
            return Err(PulseError::MalformedInput { line: format!("bucket index {i} of {nbins}") });
        }
        Ok(buckets[i])
    };

    let mut pairs = Vec::new();
    if new_format {
        for &b in &payload {
            pairs.push((index(b >> 4)?, index(b & 0xf)?));
        }
    } else {
        let mut nibbles = Vec::with_capacity(payload.len() * 2);
        for &b in &payload {
            nibbles.push(b >> 4);
            nibbles.push(b & 0xf);
        }
        for pair in nibbles.chunks_exact(2) {
            pairs.push((index(pair[0])?, index(pair[1])?));
        }
    }

    for _ in 0..repeats {
        for &(mark, space) in &pairs {
            data.push(mark, space);
        }
    }
    Ok(())
}

/// One synthesized RfRaw rendering of a burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub text: String,
    /// Pulses that could not be placed (no bucket, or past the code cap)
    pub missed: usize,
}

/// Quantize a burst into bucket codes. Returns None when the burst needs
/// more than eight distinct timings.
pub fn synthesize(data: &PulseData) -> Option<Synthesis> {
    let n = data.num_pulses();
    if n == 0 {
        return None;
    }
    let mut timings = Histogram::new();
    timings.accumulate(&data.pulse[..n], HIST_TOLERANCE);
    timings.accumulate(&data.gap[..n], HIST_TOLERANCE);
    timings.fuse(HIST_TOLERANCE);
    if timings.bins_count() > MAX_BUCKETS {
        return None;
    }
    timings.sort_by_mean();

    let mut gaps = Histogram::new();
    gaps.accumulate(&data.gap[..n.saturating_sub(1)], HIST_TOLERANCE);
    gaps.fuse(HIST_TOLERANCE);
    gaps.sort_by_mean();

    let to_us = 1e6 / data.sample_rate as f64;
    let bucket_word = |mean: i32| -> u16 { ((mean as f64 * to_us).round() as u32).min(0xffff) as u16 };

    if gaps.bins_count() <= 2 {
        synthesize_b1(data, &timings, bucket_word)
    } else {
        synthesize_b0(data, &timings, &gaps, bucket_word)
    }
}

fn push_buckets(out: &mut String, timings: &Histogram, bucket_word: impl Fn(i32) -> u16) {
    use std::fmt::Write;
    for bin in timings.bins() {
        let _ = write!(out, "{:04X}", bucket_word(bin.mean));
    }
}

fn synthesize_b1(
    data: &PulseData,
    timings: &Histogram,
    bucket_word: impl Fn(i32) -> u16,
) -> Option<Synthesis> {
    use std::fmt::Write;
    let mut text = String::new();
    let _ = write!(text, "AAB1{:02X}", timings.bins_count());
    push_buckets(&mut text, timings, bucket_word);
    let mut missed = 0;
    for i in 0..data.num_pulses() {
        let (Some(p), Some(g)) = (
            timings.find_bin_index(data.pulse[i]),
            timings.find_bin_index(data.gap[i]),
        ) else {
            missed = data.num_pulses() - i;
            break;
        };
        let _ = write!(text, "{:02X}", (((p | 8) << 4) | g) as u8);
    }
    text.push_str("55");
    Some(Synthesis { text, missed })
}

fn synthesize_b0(
    data: &PulseData,
    timings: &Histogram,
    gaps: &Histogram,
    bucket_word: impl Fn(i32) -> u16 + Copy,
) -> Option<Synthesis> {
    use std::fmt::Write;
    // Packets split at the 4th-shortest gap cluster (or the longest one
    // when there are fewer)
    let split_bin = gaps.bins_count().min(4) - 1;
    let limit = gaps.bins()[split_bin].min;

    let mut blocks: Vec<(Vec<u8>, usize)> = Vec::new(); // payload bytes, repeats
    let mut current: Vec<u8> = Vec::new();
    let mut missed = 0;

    // Returns the number of pairs dropped when the code cap is hit
    let close = |blocks: &mut Vec<(Vec<u8>, usize)>, current: &mut Vec<u8>| -> usize {
        if current.is_empty() {
            return 0;
        }
        let payload = std::mem::take(current);
        if let Some(last) = blocks.last_mut()
            && last.0 == payload
            && last.1 < 0xff
        {
            last.1 += 1;
            return 0;
        }
        if blocks.len() >= RFRAW_MAX_CODES {
            return payload.len();
        }
        blocks.push((payload, 1));
        0
    };

    for i in 0..data.num_pulses() {
        let (Some(p), Some(g)) = (
            timings.find_bin_index(data.pulse[i]),
            timings.find_bin_index(data.gap[i]),
        ) else {
            missed += 1;
            continue;
        };
        current.push((((p | 8) << 4) | g) as u8);
        if data.gap[i] >= limit {
            let dropped = close(&mut blocks, &mut current);
            if dropped > 0 {
                missed += dropped + data.num_pulses() - i - 1;
                break;
            }
        }
    }
    let dropped = close(&mut blocks, &mut current);
    if dropped > 0 {
        missed += dropped;
        warn!("rfraw code cap reached, trailing packet dropped");
    }

    let nbins = timings.bins_count();
    let mut text = String::new();
    for (payload, repeats) in &blocks {
        if !text.is_empty() {
            text.push(' ');
        }
        let len = 2 + 2 * nbins + payload.len(); // nbins + repeats + words + data
        let _ = write!(text, "AAB0{:02X}{:02X}{:02X}", len as u8, nbins as u8, *repeats as u8);
        push_buckets(&mut text, timings, bucket_word);
        for &b in payload {
            let _ = write!(text, "{b:02X}");
        }
        text.push_str("55");
    }
    Some(Synthesis { text, missed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_accepts_separators_and_case() {
        assert!(check("AA B1 03 01F4 03E8 07D0 81 92 55"));
        assert!(check("aa-b0-20-04-08"));
        assert!(check("  aAb1"));
        assert!(!check("AB B1 00"));
        assert!(!check("AA B2 00"));
        assert!(!check("112233"));
    }

    #[test]
    fn parses_b1_code() {
        let mut data = PulseData::new();
        parse(&mut data, "AA B1 03 01F4 03E8 07D0 81 92 55").unwrap();
        assert_eq!(data.num_pulses(), 2);
        assert_eq!(data.pulse, vec![500, 1000]);
        assert_eq!(data.gap, vec![1000, 2000]);
        assert_eq!(data.sample_rate, 1_000_000);
    }

    #[test]
    fn parses_b0_code_with_repeats() {
        let mut data = PulseData::new();
        // len 0x08 = nbins + repeats + 2 words + 2 payload bytes
        parse(&mut data, "AA B0 08 02 03 012C 0258 80 91 55").unwrap();
        assert_eq!(data.num_pulses(), 6);
        assert_eq!(data.pulse, vec![300, 600, 300, 600, 300, 600]);
        assert_eq!(data.gap, vec![300, 600, 300, 600, 300, 600]);
    }

    #[test]
    fn parses_old_format_without_pulse_markers() {
        let mut data = PulseData::new();
        // No 0x88 bits anywhere: nibbles alternate mark/space implicitly
        parse(&mut data, "AA B1 03 01F4 03E8 07D0 01 12 55").unwrap();
        assert_eq!(data.pulse, vec![500, 1000]);
        assert_eq!(data.gap, vec![1000, 2000]);
    }

    #[test]
    fn rejects_garbage() {
        let mut data = PulseData::new();
        assert!(parse(&mut data, "AA B7 00 55").is_err());
        assert!(parse(&mut data, "AA B1 03 01F4").is_err());
        assert!(parse(&mut data, "zz").is_err());
    }

    #[test]
    fn synthesize_then_parse_is_identity_on_bucket_means() {
        let mut data = PulseData::new();
        data.sample_rate = 1_000_000;
        data.push(500, 1000);
        data.push(1000, 2000);
        let synth = synthesize(&data).unwrap();
        assert_eq!(synth.missed, 0);
        assert!(synth.text.starts_with("AAB1"));

        let mut reparsed = PulseData::new();
        parse(&mut reparsed, &synth.text).unwrap();
        assert_eq!(reparsed.num_pulses(), data.num_pulses());
        assert_eq!(reparsed.pulse, data.pulse);
        assert_eq!(reparsed.gap, data.gap);

        // And the rendering is stable across the round trip
        let again = synthesize(&reparsed).unwrap();
        assert_eq!(again.text, synth.text);
    }

    #[test]
    fn synthesize_splits_multi_packet_bursts() {
        let mut data = PulseData::new();
        data.sample_rate = 1_000_000;
        // Three identical packets separated by three distinct long gaps
        for &packet_gap in &[4000, 5500, 8000] {
            data.push(300, 900);
            data.push(300, 300);
            data.push(900, packet_gap);
        }
        let synth = synthesize(&data).unwrap();
        assert!(synth.text.starts_with("AAB0"));
        assert_eq!(synth.missed, 0);

        let mut reparsed = PulseData::new();
        parse(&mut reparsed, &synth.text).unwrap();
        assert_eq!(reparsed.num_pulses(), data.num_pulses());
    }

    #[test]
    fn synthesize_dedupes_repeated_packets() {
        let mut data = PulseData::new();
        data.sample_rate = 1_000_000;
        // Three identical packets, each closed by the same packet gap
        for _ in 0..3 {
            data.push(300, 900);
            data.push(300, 300);
            data.push(900, 6000);
        }
        let synth = synthesize(&data).unwrap();
        assert_eq!(synth.missed, 0);
        // All three collapse into one code block with a repeat count of 3
        let blocks: Vec<&str> = synth.text.split(' ').collect();
        assert_eq!(blocks.len(), 1, "{}", synth.text);
        assert!(synth.text.starts_with("AAB00B0303"), "{}", synth.text);

        let mut reparsed = PulseData::new();
        parse(&mut reparsed, &synth.text).unwrap();
        assert_eq!(reparsed.num_pulses(), 9);
    }

    #[test]
    fn synthesize_refuses_too_many_timings() {
        let mut data = PulseData::new();
        data.sample_rate = 1_000_000;
        for n in 0..12 {
            data.push(100 << n, 100 << n);
        }
        assert!(synthesize(&data).is_none());
    }
}
