//! Offline burst analyzer: reads a capture file named by a file-format
//! descriptor, runs the demodulation core over it and prints one analyzer
//! report (or JSON line) per detected burst.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use pulserx::analyze::{Keying, ModulationSpec, PulseAnalyzer};
use pulserx::baseband::{FmDiscriminator, envelope_cu8, magnitude_cs16};
use pulserx::detect::{FeedResult, FskVariant, PulseDetector};
use pulserx::error::PulseError;
use pulserx::format::{FileFormat, FormatTag};
use pulserx::pulse::{PulseData, vcd};
use pulserx::stream::{ReaderSource, SampleSize, SampleSource, bytes_to_cf32, bytes_to_cs16};
use pulserx::utils::logging::init_logging;

/// Analyze RF bursts in a baseband capture or pulse file
#[derive(Parser)]
#[command(name = "analyze_pulses")]
struct Args {
    /// Input file; format, frequency and sample rate are read from the
    /// name (e.g. g001_433.92M_250ksps.cu8), with `<tag>:<path>` forcing
    /// the format
    input: String,

    /// Sample rate when the file name does not carry one
    #[arg(short = 'r', long, default_value_t = 250_000)]
    sample_rate: u32,

    /// Center frequency when the file name does not carry one
    #[arg(short = 'f', long, default_value_t = 433_920_000)]
    frequency: u32,

    /// Use the min/max FSK tracker instead of the classic one
    #[arg(long)]
    minmax: bool,

    /// Emit one JSON line per burst instead of the report
    #[arg(long)]
    json: bool,

    /// Append each burst to this file in the textual pulse format
    #[arg(long)]
    write_ook: Option<PathBuf>,

    /// Append each burst to this file as a VCD trace
    #[arg(long)]
    write_vcd: Option<PathBuf>,
}

static DO_EXIT: AtomicBool = AtomicBool::new(false);

#[derive(Serialize)]
struct BurstRecord<'a> {
    keying: Keying,
    offset: u64,
    num_pulses: usize,
    rssi_db: f32,
    snr_db: f32,
    noise_db: f32,
    freq1_hz: f32,
    freq2_hz: f32,
    spec: Option<&'a ModulationSpec>,
    flex: Option<String>,
}

struct Sinks {
    analyzer: PulseAnalyzer,
    json: bool,
    ook_out: Option<File>,
    vcd_out: Option<File>,
    bursts: usize,
}

impl Sinks {
    fn open(args: &Args, sample_rate: u32) -> Result<Self, PulseError> {
        let ook_out = match &args.write_ook {
            Some(path) => {
                let mut file = File::create(path)?;
                PulseData::write_file_header(&mut file)?;
                Some(file)
            }
            None => None,
        };
        let vcd_out = match &args.write_vcd {
            Some(path) => {
                let mut file = File::create(path)?;
                vcd::write_header(&mut file, sample_rate)?;
                Some(file)
            }
            None => None,
        };
        Ok(Self {
            analyzer: PulseAnalyzer::new(),
            json: args.json,
            ook_out,
            vcd_out,
            bursts: 0,
        })
    }

    fn handle(&mut self, data: &PulseData) -> Result<(), PulseError> {
        self.bursts += 1;
        let analysis = self.analyzer.analyze(data);
        let mut stdout = std::io::stdout().lock();
        if self.json {
            let record = BurstRecord {
                keying: if data.is_fsk() { Keying::Fsk } else { Keying::Ook },
                offset: data.offset,
                num_pulses: data.num_pulses(),
                rssi_db: data.rssi_db,
                snr_db: data.snr_db,
                noise_db: data.noise_db,
                freq1_hz: data.freq1_hz,
                freq2_hz: data.freq2_hz,
                spec: analysis.spec.as_ref(),
                flex: analysis.spec.as_ref().map(|s| s.flex_line("name")),
            };
            serde_json::to_writer(&mut stdout, &record).map_err(std::io::Error::other)?;
            writeln!(stdout)?;
        } else {
            data.write_summary(&mut stdout)?;
            analysis.write_report(&mut stdout)?;
        }
        if let Some(out) = &mut self.ook_out {
            data.dump(out)?;
        }
        if let Some(out) = &mut self.vcd_out {
            let ch = if data.is_fsk() { vcd::VCD_CH_FM } else { vcd::VCD_CH_AM };
            vcd::write_burst(out, data, ch)?;
        }
        Ok(())
    }
}

fn run() -> Result<(), PulseError> {
    let args = Args::parse();
    let info = FileFormat::parse(&args.input)?;
    if !info.tag.is_supported_input() {
        return Err(PulseError::UnsupportedFormat { spec: args.input.clone() });
    }
    let sample_rate = info.sample_rate.unwrap_or(args.sample_rate);
    let frequency = info.center_frequency.unwrap_or(args.frequency);
    let variant = if args.minmax { FskVariant::MinMax } else { FskVariant::Classic };
    let mut sinks = Sinks::open(&args, sample_rate)?;

    info!(
        "reading {} at {} Hz around {} Hz",
        info.path.display(),
        sample_rate,
        frequency
    );

    if info.tag == FormatTag::PULSE_OOK {
        let mut reader = BufReader::new(File::open(&info.path)?);
        let mut data = PulseData::new();
        while data.load(&mut reader, sample_rate)? {
            sinks.handle(&data)?;
            if DO_EXIT.load(Ordering::Relaxed) {
                break;
            }
        }
    } else {
        demodulate(&info, sample_rate, frequency, variant, &mut sinks)?;
    }

    info!("done, {} bursts", sinks.bursts);
    Ok(())
}

fn demodulate(
    info: &FileFormat,
    sample_rate: u32,
    frequency: u32,
    variant: FskVariant,
    sinks: &mut Sinks,
) -> Result<(), PulseError> {
    let use_magnitude = info.tag != FormatTag::CU8_IQ && info.tag != FormatTag::S16_AM;
    let mut detector = if use_magnitude {
        PulseDetector::new_magnitude()
    } else {
        PulseDetector::new()
    };
    detector.depth_bits = if info.tag == FormatTag::CU8_IQ {
        8
    } else if info.tag == FormatTag::CF32_IQ {
        32
    } else {
        16
    };
    let sample_size = if info.tag == FormatTag::CU8_IQ { SampleSize::One } else { SampleSize::Two };
    let mut source = ReaderSource::new(File::open(&info.path)?, sample_size);
    let mut discriminator = FmDiscriminator::new();

    let mut bytes = Vec::new();
    let mut scratch16 = Vec::new();
    let mut scratch32 = Vec::new();
    let mut am = Vec::new();
    let mut fm = Vec::new();
    let mut offset = 0u64;

    while !DO_EXIT.load(Ordering::Relaxed) {
        if source.read_chunk(&mut bytes)? == 0 {
            break;
        }
        if info.tag == FormatTag::CU8_IQ {
            envelope_cu8(&bytes, &mut am);
            discriminator.process_cu8(&bytes, &mut fm);
        } else if info.tag == FormatTag::CS16_IQ {
            bytes_to_cs16(&bytes, &mut scratch16);
            magnitude_cs16(&scratch16, &mut am);
            discriminator.process_cs16(&scratch16, &mut fm);
        } else if info.tag == FormatTag::CF32_IQ {
            bytes_to_cf32(&bytes, &mut scratch32);
            // Unit-scale floats; reuse the fixed-point path
            scratch16.clear();
            scratch16.extend(
                scratch32
                    .iter()
                    .map(|&v| (v.clamp(-1.0, 1.0) * 32767.0) as i16),
            );
            magnitude_cs16(&scratch16, &mut am);
            discriminator.process_cs16(&scratch16, &mut fm);
        } else if info.tag == FormatTag::S16_AM {
            bytes_to_cs16(&bytes, &mut am);
            fm.clear();
            fm.resize(am.len(), 0);
        } else {
            unreachable!("checked against the input allow list");
        }
        loop {
            match detector.feed(&am, &fm, sample_rate, offset, variant) {
                FeedResult::None => break,
                FeedResult::Ook(mut data) | FeedResult::Fsk(mut data) => {
                    data.finalize(frequency as f32, use_magnitude);
                    sinks.handle(&data)?;
                }
            }
        }
        offset += am.len() as u64;
    }
    Ok(())
}

fn main() {
    init_logging();
    ctrlc::set_handler(|| {
        if DO_EXIT.load(Ordering::Relaxed) {
            warn!("second interrupt, exiting immediately");
            std::process::exit(1);
        }
        DO_EXIT.store(true, Ordering::Relaxed);
    })
    .expect("install interrupt handler");

    if let Err(err) = run() {
        eprintln!("analyze_pulses: {err}");
        std::process::exit(1);
    }
}
