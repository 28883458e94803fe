use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error at {}: {source}", path.display())]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("malformed record {line:?}: {reason}")]
    MalformedRecord { line: String, reason: String },

    #[error("{}:{line}: {source}", file.display())]
    Manifest {
        file: PathBuf,
        line: usize,
        #[source]
        source: Box<OtaError>,
    },

    #[error("latest kernel {} has no matching initrd", kernel.display())]
    MissingInitrd { kernel: PathBuf },

    #[error("destination {} is not an empty directory", .0.display())]
    DestinationNotEmpty(PathBuf),

    #[error("source and destination are the same directory: {}", .0.display())]
    SourceDestinationSame(PathBuf),

    #[error("unsafe path in manifest: {}", .0.display())]
    UnsafePath(PathBuf),

    #[error("path cannot be recorded in a manifest line: {}", .0.display())]
    UnencodablePath(PathBuf),

    #[error("content hash mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid protection policy: {0}")]
    Policy(String),

    #[error("signing error: {0}")]
    Sign(String),
}

impl OtaError {
    pub(crate) fn malformed(line: &[u8], reason: impl Into<String>) -> Self {
        OtaError::MalformedRecord {
            line: String::from_utf8_lossy(line).into_owned(),
            reason: reason.into(),
        }
    }

    pub fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OtaError::PathIo {
            path: path.into(),
            source,
        }
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, OtaError>;
