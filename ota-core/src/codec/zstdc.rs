use super::{CompressAlg, Compressor};
use crate::error::Result;
use std::io::{Read, Write};

pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn alg(&self) -> CompressAlg {
        CompressAlg::Zstd
    }

    fn compress(
        &self,
        src: &mut dyn Read,
        dst: &mut dyn Write,
        level: i32,
        threads: u32,
    ) -> Result<u64> {
        let mut enc = zstd::stream::Encoder::new(dst, level.max(1))?;
        if threads > 0 {
            enc.multithread(threads)?;
        }
        let consumed = std::io::copy(src, &mut enc)?;
        enc.finish()?;
        Ok(consumed)
    }

    fn decompress(&self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut dec = zstd::stream::Decoder::new(src)?;
        let written_uncompressed = std::io::copy(&mut dec, dst)?;
        Ok(written_uncompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip_with_threads() {
        let data = b"Stream writer test ".repeat(200);
        let mut compressed = Vec::new();
        let consumed = ZstdCompressor
            .compress(&mut &data[..], &mut compressed, 10, 2)
            .unwrap();
        assert_eq!(consumed, data.len() as u64);
        assert!(compressed.len() < data.len());

        let mut restored = Vec::new();
        let n = ZstdCompressor
            .decompress(&mut &compressed[..], &mut restored)
            .unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(restored, data);
    }

    #[test]
    fn test_zstd_empty_input() {
        let mut compressed = Vec::new();
        ZstdCompressor
            .compress(&mut &b""[..], &mut compressed, 10, 0)
            .unwrap();
        assert!(!compressed.is_empty());

        let mut restored = Vec::new();
        ZstdCompressor
            .decompress(&mut &compressed[..], &mut restored)
            .unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!("zst".parse::<CompressAlg>().unwrap(), CompressAlg::Zstd);
        assert!("gz".parse::<CompressAlg>().is_err());
    }
}
