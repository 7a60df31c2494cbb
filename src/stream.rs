//! Seams to the collaborators outside the core: the SDR front end above
//! (a [`SampleSource`] delivering raw byte chunks) and the protocol
//! decoders below (a [`Slicer`] per protocol, dispatched in registration
//! order for every emitted burst).

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::analyze::ModulationSpec;
use crate::error::PulseError;
use crate::pulse::PulseData;

/// Bytes per sample component delivered by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSize {
    /// Interleaved `u8 I, u8 Q`, centred around 128
    One,
    /// Interleaved `i16 LE I, i16 LE Q`
    Two,
}

impl SampleSize {
    pub fn bytes(self) -> usize {
        match self {
            SampleSize::One => 1,
            SampleSize::Two => 2,
        }
    }
}

/// Upstream collaborator: yields fixed-size byte chunks of raw baseband.
pub trait SampleSource {
    fn sample_size(&self) -> SampleSize;

    /// Fill `buf` with the next chunk. Returns the byte count; 0 means end
    /// of stream.
    fn read_chunk(&mut self, buf: &mut Vec<u8>) -> Result<usize, PulseError>;
}

/// Byte chunks from any reader, e.g. a capture file or stdin.
pub struct ReaderSource<R> {
    reader: R,
    sample_size: SampleSize,
    chunk_bytes: usize,
}

impl<R: Read> ReaderSource<R> {
    /// Chunk size used when none is given, in samples.
    pub const DEFAULT_CHUNK_SAMPLES: usize = 128 * 1024;

    pub fn new(reader: R, sample_size: SampleSize) -> Self {
        Self {
            reader,
            sample_size,
            chunk_bytes: Self::DEFAULT_CHUNK_SAMPLES * 2 * sample_size.bytes(),
        }
    }
}

impl<R: Read> SampleSource for ReaderSource<R> {
    fn sample_size(&self) -> SampleSize {
        self.sample_size
    }

    fn read_chunk(&mut self, buf: &mut Vec<u8>) -> Result<usize, PulseError> {
        buf.resize(self.chunk_bytes, 0);
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // Keep whole samples only
        let granularity = 2 * self.sample_size.bytes();
        filled -= filled % granularity;
        buf.truncate(filled);
        Ok(filled)
    }
}

/// Decode an interleaved little-endian CS16 byte chunk.
pub fn bytes_to_cs16(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.reserve(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        out.push(LittleEndian::read_i16(pair));
    }
}

/// Decode an interleaved little-endian CF32 byte chunk.
pub fn bytes_to_cf32(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(bytes.len() / 4);
    for quad in bytes.chunks_exact(4) {
        out.push(LittleEndian::read_f32(quad));
    }
}

/// Downstream collaborator: turns a pulse train into typed records. The
/// core never inspects the record type.
pub trait Slicer {
    type Record;

    fn slice(&mut self, pulses: &PulseData, hint: Option<&ModulationSpec>) -> Vec<Self::Record>;
}

/// Bridge between the detector and the decoders: every registered slicer
/// sees every burst, in registration order.
#[derive(Default)]
pub struct SlicerRegistry<R> {
    slicers: Vec<Box<dyn Slicer<Record = R>>>,
}

impl<R> SlicerRegistry<R> {
    pub fn new() -> Self {
        Self { slicers: Vec::new() }
    }

    pub fn register(&mut self, slicer: Box<dyn Slicer<Record = R>>) {
        self.slicers.push(slicer);
    }

    pub fn len(&self) -> usize {
        self.slicers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slicers.is_empty()
    }

    pub fn dispatch(&mut self, pulses: &PulseData, hint: Option<&ModulationSpec>) -> Vec<R> {
        let mut records = Vec::new();
        for slicer in &mut self.slicers {
            records.extend(slicer.slice(pulses, hint));
        }
        records
    }
}
