use core::fmt;

/// The error type for parsing of segment data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An incoming segment could not be parsed because it was shorter than
    /// assumed.
    ///
    /// The segment may be shorter than the minimum header length, or a field
    /// such as the data offset or an option length may point past the end of
    /// the received data.
    Truncated,

    /// An incoming segment had an incorrect checksum and was dropped.
    WrongChecksum,

    /// An incoming segment was recognized but self-contradictory.
    ///
    /// Examples: a header length below the minimum, an option whose declared
    /// length does not match its kind.
    Malformed,
}

/// The result type for the wire codecs.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated     => write!(f, "truncated segment"),
            Error::WrongChecksum => write!(f, "checksum error"),
            Error::Malformed     => write!(f, "malformed segment"),
        }
    }
}
