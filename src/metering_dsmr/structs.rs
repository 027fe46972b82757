use thiserror::Error;

/// Everything the telegram parser can reject a telegram for.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("Telegram does not start with '/'")]
    MissingStart,
    #[error("No '!' found")]
    MissingTerminator,
    #[error("Incomplete checksum")]
    IncompleteChecksum,
    #[error("Malformed checksum")]
    InvalidChecksum,
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("Invalid identification line")]
    InvalidIdentification,
    #[error("OBIS id is empty")]
    ObisIdEmpty,
    #[error("OBIS id has number over 255")]
    ObisIdNumberOver255,
    #[error("Missing '('")]
    MissingOpeningParen,
    #[error("Missing ')' or extra data")]
    MissingClosingParen,
    #[error("Invalid string length")]
    InvalidStringLength,
    #[error("Invalid number")]
    InvalidNumber,
    #[error("Missing unit separator")]
    MissingUnitSeparator,
    #[error("Invalid unit")]
    InvalidUnit,
    #[error("Duplicate field")]
    DuplicateField,
    #[error("Unknown OBIS field")]
    UnknownField,
    #[error("Trailing characters on data line")]
    TrailingCharacters,
    #[error("Last data line not terminated before '!'")]
    UnexpectedTrailingData,
}

/// A parse failure, pointing at the telegram byte that caused it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} at offset {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, offset: usize) -> Self {
        return ParseError { kind, offset };
    }
}

/// Byte stream level failures while assembling a telegram or frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("Telegram exceeds the maximum of {0} bytes")]
    BufferOverflow(usize),
    #[error("Timed out waiting for telegram data")]
    Timeout,
    #[error("Invalid encrypted frame header")]
    InvalidFrameHeader,
    #[error("Encrypted frame of {0} bytes exceeds the configured maximum")]
    FrameTooLarge(usize),
    #[error("Encrypted frame length does not match its header")]
    FrameLengthMismatch,
    #[error("Encrypted frame carries no ciphertext")]
    EmptyCiphertext,
    #[error("Decryption failed, check the decryption key")]
    DecryptionFailed,
}

/// A successfully parsed value plus the offset parsing continues at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<T> {
    pub value: T,
    pub next: usize,
}

pub type ParseResult<T> = Result<Parsed<T>, ParseError>;

/// Fixed-point meter value stored in thousandths of its unit, so
/// `1-0:1.8.0(00123.456*kWh)` is stored as 123456 milli-kWh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedValue(pub u32);

impl FixedValue {
    /// The value scaled back to its unit, e.g. kWh.
    pub fn value(&self) -> f64 {
        return self.0 as f64 / 1000.0;
    }

    /// The raw value in thousandths, e.g. Wh.
    pub fn int_value(&self) -> u32 {
        return self.0;
    }
}

/// An M-Bus style reading: when it was taken plus the value itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedFixedValue {
    /// 13 character DSMR timestamp (YYMMDDhhmmssX).
    pub timestamp: String,
    pub value: FixedValue,
}

/// How the value of a field is encoded on its data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// The rest of the line, verbatim (identification line).
    Raw,
    /// Parenthesized string whose length must fall in `min..=max`.
    Str { min: usize, max: usize },
    /// Parenthesized 13 character DSMR timestamp.
    Timestamp,
    /// Fixed-point number with up to three decimals, scaled to
    /// thousandths. The meter usually sends `unit`; plain integers in
    /// `int_unit` (already in thousandths) are accepted as fallback.
    Fixed {
        unit: &'static str,
        int_unit: &'static str,
    },
    /// A timestamp group followed by a fixed-point group.
    TimestampedFixed {
        unit: &'static str,
        int_unit: &'static str,
    },
    /// Repeated parenthesized groups of which only the last one is
    /// kept, as in the 13 month maximum demand log.
    LastFixed {
        unit: &'static str,
        int_unit: &'static str,
    },
    /// Plain integer, e.g. failure and sag counters.
    Int { unit: &'static str },
}

impl FieldKind {
    /// Unit published next to the value, if the field carries one.
    pub fn unit(&self) -> Option<&'static str> {
        let unit = match self {
            FieldKind::Fixed { unit, .. } => unit,
            FieldKind::TimestampedFixed { unit, .. } => unit,
            FieldKind::LastFixed { unit, .. } => unit,
            FieldKind::Int { unit } => unit,
            _ => return None,
        };
        if unit.is_empty() {
            return None;
        }
        return Some(unit);
    }
}

/// A parsed field value, matching the shapes in `FieldKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Fixed(FixedValue),
    TimestampedFixed(TimestampedFixedValue),
    Int(u32),
}
