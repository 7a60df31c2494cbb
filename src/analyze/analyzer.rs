use std::fmt::Write as _;
use std::io::Write;

use serde::Serialize;
use tracing::debug;

use crate::pulse::PulseData;
use crate::rfraw;
use crate::utils::consts::HIST_TOLERANCE;

use super::histogram::Histogram;

/// How the carrier is keyed. Comes from the burst itself, not the
/// classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Keying {
    Ook,
    Fsk,
}

/// The timing structure the classifier recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModulationFamily {
    /// Fixed pulse width, data in the gaps
    PulsePosition,
    /// Data in the pulse widths
    PulseWidth,
    /// NRZ bit stream, width multiples of one bit time
    Pcm,
    /// Biphase, shortest pulse is a half period
    ManchesterZeroBit,
}

/// Slicer parameters synthesized from a classified burst. Widths are µs;
/// everything upstream of this boundary stays in samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModulationSpec {
    pub keying: Keying,
    pub family: ModulationFamily,
    pub short_width_us: f32,
    pub long_width_us: f32,
    pub sync_width_us: Option<f32>,
    pub gap_limit_us: Option<f32>,
    pub reset_limit_us: f32,
    pub tolerance_us: Option<f32>,
}

impl ModulationSpec {
    fn tag(&self) -> &'static str {
        match (self.keying, self.family) {
            (Keying::Ook, ModulationFamily::PulsePosition) => "OOK_PPM",
            (Keying::Ook, ModulationFamily::PulseWidth) => "OOK_PWM",
            (Keying::Ook, ModulationFamily::Pcm) => "OOK_PCM",
            (Keying::Ook, ModulationFamily::ManchesterZeroBit) => "OOK_MC_ZEROBIT",
            (Keying::Fsk, ModulationFamily::PulsePosition) => "FSK_PPM",
            (Keying::Fsk, ModulationFamily::PulseWidth) => "FSK_PWM",
            (Keying::Fsk, ModulationFamily::Pcm) => "FSK_PCM",
            (Keying::Fsk, ModulationFamily::ManchesterZeroBit) => "FSK_MC_ZEROBIT",
        }
    }

    /// Parameter line for the generic flex slicer.
    pub fn flex_line(&self, name: &str) -> String {
        let mut line = format!(
            "n={name},m={},s={:.0},l={:.0},r={:.0}",
            self.tag(),
            self.short_width_us,
            self.long_width_us,
            self.reset_limit_us
        );
        if let Some(gap) = self.gap_limit_us {
            let _ = write!(line, ",g={gap:.0}");
        }
        if let Some(tol) = self.tolerance_us {
            let _ = write!(line, ",t={tol:.0}");
        }
        if let Some(sync) = self.sync_width_us {
            let _ = write!(line, ",y={sync:.0}");
        }
        line
    }
}

/// Classifier outcome, including the no-spec cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Single pulse: frequency keying or just noise
    SinglePulse,
    /// One pulse and one gap width: an unmodulated preamble
    Preamble,
    Classified,
    NoClue,
}

/// Everything the analyzer learned about one burst.
#[derive(Debug)]
pub struct Analysis {
    pub verdict: Verdict,
    pub spec: Option<ModulationSpec>,
    pub pulses: Histogram,
    pub gaps: Histogram,
    pub periods: Histogram,
    pub timings: Histogram,
    pub num_pulses: usize,
    pub sample_rate: u32,
    pub rfraw: Option<rfraw::Synthesis>,
}

impl Analysis {
    fn to_us(&self) -> f64 {
        1e6 / self.sample_rate as f64
    }

    /// Human-readable report: histogram tables in µs, the guessed
    /// modulation and the flex line.
    pub fn write_report<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "Analyzing pulses...")?;
        writeln!(out, "Total count: {:5}", self.num_pulses)?;
        for (label, hist) in [
            ("Pulse width", &self.pulses),
            ("Gap width", &self.gaps),
            ("Pulse period", &self.periods),
            ("Pulse timing", &self.timings),
        ] {
            writeln!(out, "{label} distribution ({} bins):", hist.bins_count())?;
            for (n, bin) in hist.bins().iter().enumerate() {
                writeln!(
                    out,
                    " [{n:2}] count: {:5},  width: {:.0} us [{:.0};{:.0}]",
                    bin.count,
                    bin.mean as f64 * self.to_us(),
                    bin.min as f64 * self.to_us(),
                    bin.max as f64 * self.to_us()
                )?;
            }
        }
        match self.verdict {
            Verdict::SinglePulse => {
                writeln!(out, "Single pulse detected. Frequency shift keying or just noise...")?
            }
            Verdict::Preamble => writeln!(out, "Un-modulated signal. Maybe a preamble...")?,
            Verdict::NoClue => writeln!(out, "No clue...")?,
            Verdict::Classified => {}
        }
        if let Some(spec) = &self.spec {
            writeln!(out, "Guessed modulation: {}", spec.tag())?;
            writeln!(out, "Use a flex decoder with {}", spec.flex_line("name"))?;
        }
        if let Some(synth) = &self.rfraw {
            writeln!(out, "RfRaw: {}", synth.text)?;
            if synth.missed > 0 {
                writeln!(out, "RfRaw: {} pulses missed", synth.missed)?;
            }
        }
        Ok(())
    }
}

/// Width-histogram classifier. The period scratch buffer is owned by the
/// instance and reused across bursts.
#[derive(Debug, Default)]
pub struct PulseAnalyzer {
    periods: Vec<i32>,
}

impl PulseAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&mut self, data: &PulseData) -> Analysis {
        let keying = if data.is_fsk() { Keying::Fsk } else { Keying::Ook };
        let n = data.num_pulses();
        let to_us = 1e6 / data.sample_rate.max(1) as f64;

        self.periods.clear();
        for i in 0..n {
            self.periods.push(data.pulse[i] + data.gap[i]);
        }

        let mut pulses = Histogram::new();
        let mut gaps = Histogram::new();
        let mut periods = Histogram::new();
        let mut timings = Histogram::new();
        pulses.accumulate(&data.pulse[..n], HIST_TOLERANCE);
        // Leave out the last gap and period: they end at the burst cutoff
        gaps.accumulate(&data.gap[..n.saturating_sub(1)], HIST_TOLERANCE);
        periods.accumulate(&self.periods[..n.saturating_sub(1)], HIST_TOLERANCE);
        timings.accumulate(&data.pulse[..n], HIST_TOLERANCE);
        timings.accumulate(&data.gap[..n], HIST_TOLERANCE);
        pulses.fuse(HIST_TOLERANCE);
        gaps.fuse(HIST_TOLERANCE);
        periods.fuse(HIST_TOLERANCE);
        timings.fuse(HIST_TOLERANCE);

        pulses.sort_by_mean();
        gaps.sort_by_mean();
        timings.sort_by_mean();
        if pulses.bins_count() > 0 && pulses.bins()[0].mean == 0 {
            // Zero-width marks are the FSK leading-gap artifact
            pulses.delete(0);
        }

        let reset_limit_us = gaps
            .bins()
            .last()
            .map(|bin| (bin.max + 1) as f64 * to_us)
            .unwrap_or(0.0) as f32;

        let mut verdict = Verdict::Classified;
        let mut spec = None;

        let p = pulses.bins_count();
        let g = gaps.bins_count();
        let per = periods.bins_count();

        if n == 1 {
            debug!("single pulse, no modulation to guess");
            verdict = Verdict::SinglePulse;
        } else if p == 1 && g == 1 {
            debug!("unmodulated signal, maybe a preamble");
            verdict = Verdict::Preamble;
        } else if p == 1 && g > 1 {
            debug!("pulse position modulation with fixed pulse width");
            spec = Some(ModulationSpec {
                keying,
                family: ModulationFamily::PulsePosition,
                short_width_us: (gaps.bins()[0].mean as f64 * to_us) as f32,
                long_width_us: (gaps.bins()[1].mean as f64 * to_us) as f32,
                sync_width_us: None,
                gap_limit_us: Some(((gaps.bins()[1].max + 1) as f64 * to_us) as f32),
                reset_limit_us,
                tolerance_us: None,
            });
        } else if p == 2 && g == 1 {
            debug!("pulse width modulation with fixed gap");
            spec = Some(self.pwm_spec(keying, &pulses, None, reset_limit_us, to_us));
        } else if p == 2 && g == 2 && per == 1 {
            debug!("pulse width modulation with fixed period");
            spec = Some(self.pwm_spec(keying, &pulses, None, reset_limit_us, to_us));
        } else if p == 2 && g == 2 && per == 3 {
            debug!("manchester coding");
            let short = pulses.bins()[0].mean.min(pulses.bins()[1].mean);
            spec = Some(ModulationSpec {
                keying,
                family: ModulationFamily::ManchesterZeroBit,
                short_width_us: (short as f64 * to_us) as f32,
                long_width_us: 0.0,
                sync_width_us: None,
                gap_limit_us: None,
                reset_limit_us,
                tolerance_us: None,
            });
        } else if p == 2 && g >= 3 {
            debug!("pulse width modulation with multiple packets");
            let gap_limit = ((gaps.bins()[1].max + 1) as f64 * to_us) as f32;
            spec = Some(self.pwm_spec(keying, &pulses, Some(gap_limit), reset_limit_us, to_us));
        } else if p >= 3 && g >= 3 && Self::widths_are_bit_multiples(&pulses, &gaps) {
            debug!("pulse code modulation (not return to zero)");
            let bit = pulses.bins()[0].mean as f64 * to_us;
            spec = Some(ModulationSpec {
                keying,
                family: ModulationFamily::Pcm,
                short_width_us: bit as f32,
                long_width_us: bit as f32, // NRZ: bit period equals pulse width
                sync_width_us: None,
                gap_limit_us: None,
                reset_limit_us: (bit * 1024.0) as f32,
                tolerance_us: None,
            });
        } else if p == 3 {
            debug!("pulse width modulation with sync/delimiter");
            // The rarest pulse width is the sync symbol
            pulses.sort_by_count();
            let sync = pulses.bins()[0].mean;
            let p1 = pulses.bins()[1].mean;
            let p2 = pulses.bins()[2].mean;
            let short = (p1.min(p2) as f64 * to_us) as f32;
            let long = (p1.max(p2) as f64 * to_us) as f32;
            spec = Some(ModulationSpec {
                keying,
                family: ModulationFamily::PulseWidth,
                short_width_us: short,
                long_width_us: long,
                sync_width_us: Some((sync as f64 * to_us) as f32),
                gap_limit_us: None,
                reset_limit_us,
                tolerance_us: Some((long - short) * 0.4),
            });
        } else {
            debug!("no clue");
            verdict = Verdict::NoClue;
        }

        Analysis {
            verdict,
            spec,
            pulses,
            gaps,
            periods,
            timings,
            num_pulses: n,
            sample_rate: data.sample_rate.max(1),
            rfraw: rfraw::synthesize(data),
        }
    }

    fn pwm_spec(
        &self,
        keying: Keying,
        pulses: &Histogram,
        gap_limit_us: Option<f32>,
        reset_limit_us: f32,
        to_us: f64,
    ) -> ModulationSpec {
        let short = (pulses.bins()[0].mean as f64 * to_us) as f32;
        let long = (pulses.bins()[1].mean as f64 * to_us) as f32;
        ModulationSpec {
            keying,
            family: ModulationFamily::PulseWidth,
            short_width_us: short,
            long_width_us: long,
            sync_width_us: None,
            gap_limit_us,
            reset_limit_us,
            tolerance_us: Some((long - short) * 0.4),
        }
    }

    /// NRZ check: every pulse and gap width is an integer multiple of the
    /// shortest pulse, within 12.5% of it.
    fn widths_are_bit_multiples(pulses: &Histogram, gaps: &Histogram) -> bool {
        let bit = pulses.bins()[0].mean;
        if bit <= 0 {
            return false;
        }
        let near_multiple = |value: i32| {
            let factor = ((value + bit / 2) / bit).max(1);
            (value - factor * bit).abs() <= bit / 8
        };
        pulses
            .bins()
            .iter()
            .chain(gaps.bins())
            .all(|bin| near_multiple(bin.mean))
    }
}
