use crate::error::{OtaError, Result};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression recorded in the `compress_alg` field of a regular-file line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompressAlg {
    Zstd,
}

impl CompressAlg {
    /// Tag written to the manifest and used as the blob file extension.
    pub const fn tag(&self) -> &'static str {
        match self {
            CompressAlg::Zstd => "zst",
        }
    }

    pub fn compressor(&self) -> Box<dyn Compressor> {
        match self {
            CompressAlg::Zstd => Box::new(zstdc::ZstdCompressor),
        }
    }
}

impl fmt::Display for CompressAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CompressAlg {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zst" => Ok(CompressAlg::Zstd),
            other => Err(OtaError::malformed(
                other.as_bytes(),
                format!("unknown compression tag {other:?}"),
            )),
        }
    }
}

pub trait Compressor: Send + Sync {
    fn alg(&self) -> CompressAlg;
    /// Returns the number of uncompressed bytes consumed from `src`.
    fn compress(
        &self,
        src: &mut dyn Read,
        dst: &mut dyn Write,
        level: i32,
        threads: u32,
    ) -> Result<u64>;
    /// Returns the number of uncompressed bytes written to `dst`.
    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64>;
}

pub mod zstdc;
