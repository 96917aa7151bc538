use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    /// A record with the same primary key already exists.
    DuplicatePrimaryKey,
    /// No record with the given primary key.
    RecordNotFound,
    /// A record carried more distinct keywords than a forward list can hold.
    KeywordLimitExceeded,
    /// The schema declares more attributes than the engine supports.
    AttributeLimitExceeded,
    /// An index file was written by an incompatible engine or architecture.
    IncompatibleIndexVersion,
    /// An index file failed its checksum or structural checks.
    IndexFileCorrupt,
    /// A phrase query that cannot be evaluated.
    PhraseMalformed,
    /// The filter-query predicate failed to parse.
    FilterQueryMalformed,
    /// The query deadline expired; results are partial.
    TimeoutExpired,
    InvalidArgument,
    InvalidState,
    Internal,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error { kind: ErrorKind::Io, context: err.to_string() }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error { kind: ErrorKind::Parse, context: err.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
