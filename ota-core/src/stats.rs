/// Totals of one manifest generation.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub dirs: u64,
    pub symlinks: u64,
    pub regulars: u64,
    /// Regular entries whose inode has more than one link.
    pub hardlinks: u64,
    pub logical_bytes: u64,
    pub compressed_files: u64,
    pub uncompressed_bytes_compressed: u64,
    pub blob_bytes: u64,
}

impl Stats {
    /// Uncompressed over compressed size of the blobs kept; 0.0 without blobs.
    pub fn compression_ratio(&self) -> f64 {
        if self.blob_bytes == 0 {
            0.0
        } else {
            self.uncompressed_bytes_compressed as f64 / self.blob_bytes as f64
        }
    }
}

/// Totals of one reconstruction.
#[derive(Clone, Debug, Default)]
pub struct ExtractStats {
    pub dirs: u64,
    pub symlinks: u64,
    /// Regular files written from the content source.
    pub copied: u64,
    /// Of `copied`, how many came out of the blob store.
    pub decompressed: u64,
    pub hardlinks: u64,
    pub bytes: u64,
}
