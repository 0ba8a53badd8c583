//! Contains all error types that can be returned by this crate.

use std::error;
use std::fmt;
use std::io;

/// Convenient `Result` type for custom errors.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// Errors - General
// -----------------------------------------------------------------------------------------------

/// Main error structure which is just a simple wrapper for all errors that can be returned by the
/// library.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Memory-dump-related errors.
    Dump(DumpError),
    /// Process-memory-related errors.
    Memory(MemoryError),
    /// Probe- and tracing-related errors.
    Probe(ProbeError),
    /// Scan-pattern-related errors.
    Scan(ScanError),
    /// Symbol-table-related errors.
    Symbol(SymbolError),
    /// Generic user-defined errors.
    Generic(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Dump(e) => write!(f, "[Dump error] {}", e),
            Error::Memory(e) => write!(f, "[Memory error] {}", e),
            Error::Probe(e) => write!(f, "[Probe error] {}", e),
            Error::Scan(e) => write!(f, "[Scan error] {}", e),
            Error::Symbol(e) => write!(f, "[Symbol error] {}", e),
            Error::Generic(e) => write!(f, "[Error] {}", e),
        }
    }
}

impl From<DumpError> for Error {
    fn from(error: DumpError) -> Self {
        Error::Dump(error)
    }
}

impl From<MemoryError> for Error {
    fn from(error: MemoryError) -> Self {
        Error::Memory(error)
    }
}

impl From<ProbeError> for Error {
    fn from(error: ProbeError) -> Self {
        Error::Probe(error)
    }
}

impl From<ScanError> for Error {
    fn from(error: ScanError) -> Self {
        Error::Scan(error)
    }
}

impl From<SymbolError> for Error {
    fn from(error: SymbolError) -> Self {
        Error::Symbol(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Generic(format!("{}", error))
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Memory
// -----------------------------------------------------------------------------------------------

/// Process-memory-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MemoryError {
    /// The string at the given address is not valid UTF-8 or is unterminated.
    InvalidString(u64),
    /// The module is not loaded in the target process.
    UnknownModule(String),
    /// The address range is not readable in the target process.
    Unreadable(u64, usize),
    /// User-defined memory error.
    Generic(String),
}

impl error::Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::InvalidString(a) => write!(f, "invalid string at address {:#x}", a),
            MemoryError::UnknownModule(m) => write!(f, "unknown module: {}", m),
            MemoryError::Unreadable(a, s) => {
                write!(f, "cannot read {:#x} byte(s) at address {:#x}", s, a)
            }
            MemoryError::Generic(e) => write!(f, "{}", e),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Probe
// -----------------------------------------------------------------------------------------------

/// Probe- and tracing-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeError {
    /// The feed is already armed and probes are attached.
    AlreadyArmed,
    /// The engine could not place a probe at the given address.
    AttachFailed(u64),
    /// No targets were registered before arming the feed.
    NoTargets,
    /// User-defined probe error.
    Generic(String),
}

impl error::Error for ProbeError {}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::AlreadyArmed => write!(f, "coverage feed is already armed"),
            ProbeError::AttachFailed(a) => write!(f, "could not attach a probe at {:#x}", a),
            ProbeError::NoTargets => write!(f, "no targets registered"),
            ProbeError::Generic(e) => write!(f, "{}", e),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Scan
// -----------------------------------------------------------------------------------------------

/// Scan-pattern-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScanError {
    /// The pattern string contains no byte tokens.
    EmptyPattern,
    /// The pattern string contains a token that is neither a hex byte nor a wildcard.
    InvalidToken(String),
    /// User-defined scan error.
    Generic(String),
}

impl error::Error for ScanError {}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::EmptyPattern => write!(f, "empty scan pattern"),
            ScanError::InvalidToken(t) => write!(f, "invalid pattern token: {}", t),
            ScanError::Generic(e) => write!(f, "{}", e),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Symbol
// -----------------------------------------------------------------------------------------------

/// Symbol-table-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SymbolError {
    /// The name pattern is not a valid regular expression.
    InvalidPattern(String),
    /// The table header could not be read back after validation.
    UnreadableTable(u64),
    /// User-defined symbol error.
    Generic(String),
}

impl error::Error for SymbolError {}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolError::InvalidPattern(p) => write!(f, "invalid name pattern: {}", p),
            SymbolError::UnreadableTable(a) => write!(f, "unreadable symbol table at {:#x}", a),
            SymbolError::Generic(e) => write!(f, "{}", e),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Dump
// -----------------------------------------------------------------------------------------------

/// Memory-dump-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DumpError {
    /// The dump output directory does not exist.
    MissingDirectory(String),
    /// User-defined dump error.
    Generic(String),
}

impl error::Error for DumpError {}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::MissingDirectory(d) => {
                write!(f, "dump output directory does not exist: {}", d)
            }
            DumpError::Generic(e) => write!(f, "{}", e),
        }
    }
}
