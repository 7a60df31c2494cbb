//! Value-Change-Dump rendering of pulse trains. One file may hold several
//! bursts; the header is written once, each burst then appends its change
//! points on the wire identified by `ch_id` (`'` for AM, `"` for FM), with
//! the frame wire `/` bracketing each burst.

use std::io::Write;

use super::PulseData;

/// Wire id for bursts from the OOK path.
pub const VCD_CH_AM: char = '\'';
/// Wire id for bursts from the FSK path.
pub const VCD_CH_FM: char = '"';

fn timescale(sample_rate: u32) -> (&'static str, f64) {
    if sample_rate <= 500_000 {
        ("1 us", 1e6 / sample_rate as f64)
    } else {
        ("100 ns", 1e7 / sample_rate as f64)
    }
}

pub fn write_header<W: Write>(out: &mut W, sample_rate: u32) -> std::io::Result<()> {
    let (scale, _) = timescale(sample_rate);
    writeln!(out, "$comment Acquisition at {sample_rate} Hz $end")?;
    writeln!(out, "$timescale {scale} $end")?;
    writeln!(out, "$scope module pulserx $end")?;
    writeln!(out, "$var wire 1 / FRAME $end")?;
    writeln!(out, "$var wire 1 ' AM $end")?;
    writeln!(out, "$var wire 1 \" FM $end")?;
    writeln!(out, "$upscope $end")?;
    writeln!(out, "$enddefinitions $end")?;
    Ok(())
}

pub fn write_burst<W: Write>(out: &mut W, data: &PulseData, ch_id: char) -> std::io::Result<()> {
    let (_, scale) = timescale(data.sample_rate);
    let mut pos = data.offset;
    for n in 0..data.num_pulses() {
        if n == 0 {
            writeln!(out, "#{:.0} 1/ 1{ch_id}", pos as f64 * scale)?;
        } else {
            writeln!(out, "#{:.0} 1{ch_id}", pos as f64 * scale)?;
        }
        pos += data.pulse[n] as u64;
        writeln!(out, "#{:.0} 0{ch_id}", pos as f64 * scale)?;
        pos += data.gap[n] as u64;
    }
    if data.num_pulses() > 0 {
        writeln!(out, "#{:.0} 0/", pos as f64 * scale)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timescale_is_1us_up_to_500khz() {
        let mut out = Vec::new();
        write_header(&mut out, 250_000).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("$timescale 1 us $end"));
    }

    #[test]
    fn timescale_is_100ns_above_500khz() {
        let mut out = Vec::new();
        write_header(&mut out, 1_000_000).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("$timescale 100 ns $end"));
    }

    #[test]
    fn burst_brackets_frame_wire() {
        let mut data = PulseData::new();
        data.sample_rate = 250_000;
        data.offset = 10;
        data.push(5, 5);
        data.push(5, 10);
        let mut out = Vec::new();
        write_burst(&mut out, &data, VCD_CH_AM).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // 4 us per sample at 250 kHz
        assert_eq!(lines[0], "#40 1/ 1'");
        assert_eq!(lines[1], "#60 0'");
        assert_eq!(lines[2], "#80 1'");
        assert_eq!(lines[3], "#100 0'");
        assert_eq!(lines.last().unwrap(), &"#140 0/");
    }
}
