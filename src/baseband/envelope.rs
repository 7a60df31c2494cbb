//! AM envelope conversions. Both variants emit non-negative samples with a
//! full scale of about 16384, which is what the detector's level estimators
//! and the dB derivations assume.

/// Squared envelope of interleaved unsigned 8-bit I/Q centred around 128.
///
/// The output is `(i-128)^2 + (q-128)^2`, i.e. squared amplitude; the
/// detector consumes it as-is, so all dB math downstream uses 10*log10.
pub fn envelope_cu8(iq: &[u8], am: &mut Vec<i16>) {
    am.clear();
    am.reserve(iq.len() / 2);
    for pair in iq.chunks_exact(2) {
        let i = pair[0] as i32 - 128;
        let q = pair[1] as i32 - 128;
        let sq = i * i + q * q; // max 32768
        am.push(sq.min(i16::MAX as i32) as i16);
    }
}

/// True magnitude of interleaved signed 16-bit I/Q, scaled to Q0.15 half
/// scale (full scale 16384).
pub fn magnitude_cs16(iq: &[i16], am: &mut Vec<i16>) {
    am.clear();
    am.reserve(iq.len() / 2);
    for pair in iq.chunks_exact(2) {
        let i = pair[0] as f32;
        let q = pair[1] as f32;
        let mag = (i * i + q * q).sqrt() * 0.5;
        am.push(mag.min(i16::MAX as f32) as i16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_of_silence_is_zero() {
        let iq = vec![128u8; 64];
        let mut am = Vec::new();
        envelope_cu8(&iq, &mut am);
        assert_eq!(am.len(), 32);
        assert!(am.iter().all(|&s| s == 0));
    }

    #[test]
    fn envelope_clips_at_the_rails() {
        // I and Q both at the rail squares to 32768, one past i16::MAX
        let iq = vec![0u8, 0u8, 0u8, 128u8];
        let mut am = Vec::new();
        envelope_cu8(&iq, &mut am);
        assert_eq!(am[0], i16::MAX);
        assert_eq!(am[1] as i32, 128 * 128);
    }

    #[test]
    fn magnitude_is_scaled_to_half() {
        let iq = vec![i16::MAX, 0];
        let mut am = Vec::new();
        magnitude_cs16(&iq, &mut am);
        assert!((am[0] as i32 - 16383).abs() <= 1);
    }
}
