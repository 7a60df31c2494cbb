//! File-format descriptors for capture I/O: a 32-bit tag encoding channel
//! count, signedness, int/float, sample width and content kind, parsed from
//! strings such as `cu8`, `am.s16`, `logic.u8`, `vcd`, `ook`, or full file
//! names like `g001_433.92M_250ksps.cu8`. A `<tag>:<path>` prefix forces the
//! tag regardless of the path.

use std::path::PathBuf;

use bitflags::bitflags;

use crate::error::PulseError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatTag: u32 {
        const SIGNED  = 1 << 0;
        const FLOAT   = 1 << 1;
        const CH_1    = 1 << 2;
        const CH_2    = 1 << 3;
        const W8      = 1 << 4;
        const W12     = 1 << 5;
        const W16     = 1 << 6;
        const W32     = 1 << 7;
        const W64     = 1 << 8;
        const K_I     = 1 << 9;
        const K_Q     = 1 << 10;
        const K_AM    = 1 << 11;
        const K_FM    = 1 << 12;
        const K_IQ    = 1 << 13;
        const K_LOGIC = 1 << 14;
        const K_VCD   = 1 << 15;
        const K_OOK   = 1 << 16;

        const CU8_IQ  = Self::CH_2.bits() | Self::W8.bits() | Self::K_IQ.bits();
        const CS16_IQ = Self::CH_2.bits() | Self::SIGNED.bits() | Self::W16.bits() | Self::K_IQ.bits();
        const CF32_IQ = Self::CH_2.bits() | Self::SIGNED.bits() | Self::FLOAT.bits() | Self::W32.bits() | Self::K_IQ.bits();
        const S16_AM  = Self::CH_1.bits() | Self::SIGNED.bits() | Self::W16.bits() | Self::K_AM.bits();
        const S16_FM  = Self::CH_1.bits() | Self::SIGNED.bits() | Self::W16.bits() | Self::K_FM.bits();
        const F32_AM  = Self::CH_1.bits() | Self::SIGNED.bits() | Self::FLOAT.bits() | Self::W32.bits() | Self::K_AM.bits();
        const F32_FM  = Self::CH_1.bits() | Self::SIGNED.bits() | Self::FLOAT.bits() | Self::W32.bits() | Self::K_FM.bits();
        const U8_LOGIC = Self::CH_1.bits() | Self::W8.bits() | Self::K_LOGIC.bits();
        const VCD_LOGIC = Self::K_VCD.bits();
        const PULSE_OOK = Self::K_OOK.bits();
    }
}

impl FormatTag {
    const KIND_MASK: FormatTag = FormatTag::K_I
        .union(FormatTag::K_Q)
        .union(FormatTag::K_AM)
        .union(FormatTag::K_FM)
        .union(FormatTag::K_IQ)
        .union(FormatTag::K_LOGIC)
        .union(FormatTag::K_VCD)
        .union(FormatTag::K_OOK);

    /// Formats the demodulation core accepts as input.
    pub fn is_supported_input(self) -> bool {
        self == FormatTag::CU8_IQ
            || self == FormatTag::CS16_IQ
            || self == FormatTag::CF32_IQ
            || self == FormatTag::S16_AM
            || self == FormatTag::PULSE_OOK
    }

    /// Formats the logic-trace dumper can produce.
    pub fn is_supported_logic_output(self) -> bool {
        self == FormatTag::U8_LOGIC || self == FormatTag::VCD_LOGIC
    }

    fn has_kind(self) -> bool {
        self.intersects(Self::KIND_MASK)
    }
}

/// A parsed descriptor: the tag plus any frequency/rate found in the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFormat {
    pub tag: FormatTag,
    pub center_frequency: Option<u32>,
    pub sample_rate: Option<u32>,
    pub path: PathBuf,
}

fn format_token(token: &str) -> Option<FormatTag> {
    Some(match token.to_ascii_lowercase().as_str() {
        "cu8" => FormatTag::CU8_IQ,
        "cs16" => FormatTag::CS16_IQ,
        "cf32" => FormatTag::CF32_IQ,
        "u8" => FormatTag::CH_1 | FormatTag::W8,
        "s8" => FormatTag::CH_1 | FormatTag::SIGNED | FormatTag::W8,
        "u16" => FormatTag::CH_1 | FormatTag::W16,
        "s16" => FormatTag::CH_1 | FormatTag::SIGNED | FormatTag::W16,
        "f32" => FormatTag::CH_1 | FormatTag::SIGNED | FormatTag::FLOAT | FormatTag::W32,
        "i" => FormatTag::K_I,
        "q" => FormatTag::K_Q,
        "am" => FormatTag::K_AM,
        "fm" => FormatTag::K_FM,
        "iq" => FormatTag::K_IQ,
        "logic" => FormatTag::K_LOGIC,
        "vcd" => FormatTag::VCD_LOGIC,
        "ook" => FormatTag::PULSE_OOK,
        _ => return None,
    })
}

/// `433.92M`, `868M`, `915MHz`, `433920000` style center frequencies.
fn freq_token(token: &str) -> Option<u32> {
    let t = token.strip_suffix("Hz").or_else(|| token.strip_suffix("hz")).unwrap_or(token);
    let (num, mult) = match t.chars().last()? {
        'M' => (&t[..t.len() - 1], 1e6),
        'k' | 'K' => (&t[..t.len() - 1], 1e3),
        'G' => (&t[..t.len() - 1], 1e9),
        '0'..='9' => (t, 1.0),
        _ => return None,
    };
    let value: f64 = num.parse().ok()?;
    // A bare number is only plausibly a frequency in the RF range
    if mult == 1.0 && value < 1e6 {
        return None;
    }
    Some((value * mult) as u32)
}

/// `250ksps`, `1Msps`, `2000000sps` style sample rates.
fn rate_token(token: &str) -> Option<u32> {
    let t = token.strip_suffix("sps")?;
    let (num, mult) = match t.chars().last()? {
        'M' => (&t[..t.len() - 1], 1e6),
        'k' | 'K' => (&t[..t.len() - 1], 1e3),
        '0'..='9' => (t, 1.0),
        _ => return None,
    };
    let value: f64 = num.parse().ok()?;
    Some((value * mult) as u32)
}

impl FileFormat {
    pub fn parse(descriptor: &str) -> Result<Self, PulseError> {
        let mut tag = FormatTag::empty();
        let mut forced = false;
        let mut center_frequency = None;
        let mut sample_rate = None;

        // A "<tag>:<path>" prefix forces the format
        let path_part = match descriptor.split_once(':') {
            Some((prefix, rest)) if format_token(prefix).is_some() => {
                tag = format_token(prefix).unwrap();
                forced = true;
                rest
            }
            _ => descriptor,
        };

        let name = path_part.rsplit(['/', '\\']).next().unwrap_or(path_part);
        for token in name.split('_') {
            if let Some(rate) = rate_token(token) {
                sample_rate = Some(rate);
                continue;
            }
            if let Some(freq) = freq_token(token) {
                center_frequency = Some(freq);
                continue;
            }
            for sub in token.split(['.', '-']) {
                if let Some(rate) = rate_token(sub) {
                    sample_rate = Some(rate);
                } else if let Some(freq) = freq_token(sub) {
                    center_frequency = Some(freq);
                } else if let Some(part) = format_token(sub) {
                    if !forced {
                        tag |= part;
                    }
                }
            }
        }

        // A sample layout without a content kind defaults by channel count
        if !tag.has_kind() {
            if tag.contains(FormatTag::CH_2) {
                tag |= FormatTag::K_IQ;
            } else if tag.contains(FormatTag::CH_1) {
                tag |= FormatTag::K_AM;
            }
        }
        if tag.is_empty() {
            return Err(PulseError::UnsupportedFormat { spec: descriptor.into() });
        }
        Ok(Self {
            tag,
            center_frequency,
            sample_rate,
            path: PathBuf::from(path_part),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_specs() {
        assert_eq!(FileFormat::parse("cu8").unwrap().tag, FormatTag::CU8_IQ);
        assert_eq!(FileFormat::parse("cs16").unwrap().tag, FormatTag::CS16_IQ);
        assert_eq!(FileFormat::parse("cf32").unwrap().tag, FormatTag::CF32_IQ);
        assert_eq!(FileFormat::parse("vcd").unwrap().tag, FormatTag::VCD_LOGIC);
        assert_eq!(FileFormat::parse("ook").unwrap().tag, FormatTag::PULSE_OOK);
    }

    #[test]
    fn parses_compound_specs() {
        assert_eq!(FileFormat::parse("am.s16").unwrap().tag, FormatTag::S16_AM);
        assert_eq!(FileFormat::parse("fm.f32").unwrap().tag, FormatTag::F32_FM);
        assert_eq!(FileFormat::parse("logic.u8").unwrap().tag, FormatTag::U8_LOGIC);
        assert_eq!(FileFormat::parse("cu8.iq").unwrap().tag, FormatTag::CU8_IQ);
    }

    #[test]
    fn parses_file_names_with_freq_and_rate() {
        let info = FileFormat::parse("captures/g001_433.92M_250ksps.cu8").unwrap();
        assert_eq!(info.tag, FormatTag::CU8_IQ);
        assert_eq!(info.center_frequency, Some(433_920_000));
        assert_eq!(info.sample_rate, Some(250_000));
    }

    #[test]
    fn tag_prefix_forces_format() {
        let info = FileFormat::parse("cs16:weird.bin").unwrap();
        assert_eq!(info.tag, FormatTag::CS16_IQ);
        assert_eq!(info.path, PathBuf::from("weird.bin"));
    }

    #[test]
    fn unknown_spec_is_an_error() {
        assert!(matches!(
            FileFormat::parse("capture.xyz"),
            Err(PulseError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn input_output_allow_lists() {
        assert!(FormatTag::CU8_IQ.is_supported_input());
        assert!(FormatTag::S16_AM.is_supported_input());
        assert!(FormatTag::PULSE_OOK.is_supported_input());
        assert!(!FormatTag::U8_LOGIC.is_supported_input());
        assert!(FormatTag::U8_LOGIC.is_supported_logic_output());
        assert!(FormatTag::VCD_LOGIC.is_supported_logic_output());
        assert!(!FormatTag::CU8_IQ.is_supported_logic_output());
    }
}
