use thiserror::Error;

/// Error taxonomy of the core. Recoverable conditions (spurious lines,
/// FSK buffer overflow) are handled and logged where they occur and never
/// reach this type.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Text or hex input the parsers reject.
    #[error("malformed input: {line}")]
    MalformedInput { line: String },

    /// A burst would exceed the pulse buffer and could not be recovered.
    #[error("too many pulses for one burst")]
    Overflow,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A file-format descriptor that does not map to a known sample layout.
    #[error("unsupported file format: {spec}")]
    UnsupportedFormat { spec: String },
}
