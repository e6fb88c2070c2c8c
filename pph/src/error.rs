//! Errors surfaced by construction and (de)serialization.

use crate::serial::ParseError;

/// Errors of table construction and of reading a serialized table.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The secondary-hash search exhausted its wall-clock budget for one
    /// bucket.
    ///
    /// Almost always caused by duplicate keys in the input, which no hash
    /// function can separate; otherwise retry with another seed, a longer
    /// timeout or another key function.
    BuildTimeout,

    /// The slot allocator failed to place a window even after growing the
    /// slot array. Indicates internal corruption and must not occur.
    Allocator,

    /// Re-looking-up the key of the given slot after construction did not
    /// return its stored value.
    SelfCheck(u64),

    /// The input contained an empty key, which is indistinguishable from a
    /// free slot in the serialized form.
    EmptyKey,

    /// The key and value lists passed to `load` differ in length.
    LengthMismatch,

    /// The serialized form could not be parsed.
    Parse(ParseError),

    /// I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BuildTimeout => write!(f, "no collision-free secondary hash found within the timeout"),
            Error::Allocator => write!(f, "slot allocator failed to place a window"),
            Error::SelfCheck(slot) => write!(f, "key stored in slot {slot} failed re-lookup"),
            Error::EmptyKey => write!(f, "empty keys cannot be stored"),
            Error::LengthMismatch => write!(f, "key and value lists differ in length"),
            Error::Parse(e) => write!(f, "malformed table: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<ParseError> for Error {
    fn from(value: ParseError) -> Self {
        Error::Parse(value)
    }
}
