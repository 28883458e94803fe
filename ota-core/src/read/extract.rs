use crate::codec::Compressor;
use crate::container::manifest::Manifest;
use crate::container::record::{LinkKey, RegularEntry};
use crate::error::{OtaError, Result};
use crate::pack::writer::blob_path;
use crate::stats::ExtractStats;
use crate::util::digest::hex_digest;
use crate::util::hash_forward::HashingForward;
use crate::util::paths::{normalize, safe_join};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::{PermissionsExt, chown, lchown, symlink};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Entries between two progress lines.
const PROGRESS_EVERY: usize = 1000;

#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// Blob store written by the encoder. Entries with a `compress_alg` are
    /// restored from `<dir>/<hash>.<tag>` instead of the content source.
    pub compressed_dir: Option<PathBuf>,
    /// Log progress while replaying each entry kind.
    pub progress: bool,
}

/// Rebuild the tree described by `manifest` under `dest`, reading regular
/// file content from `src` (or the blob store).
///
/// `dest` is created if missing and must be empty. Any error is fatal and
/// leaves a partial tree behind for the caller to discard.
pub fn extract(
    manifest: &Manifest,
    dest: &Path,
    src: &Path,
    opts: &ExtractOptions,
) -> Result<ExtractStats> {
    let dest_norm = normalize(dest);
    let src_norm = normalize(src);
    if dest_norm == src_norm {
        return Err(OtaError::SourceDestinationSame(dest_norm));
    }
    fs::create_dir_all(&dest_norm).map_err(|e| OtaError::at(&dest_norm, e))?;
    let mut rd = fs::read_dir(&dest_norm).map_err(|e| OtaError::at(&dest_norm, e))?;
    if rd.next().is_some() {
        return Err(OtaError::DestinationNotEmpty(dest_norm));
    }

    let mut stats = ExtractStats::default();
    let total = manifest.dirs.len();
    for (i, d) in manifest.dirs.iter().enumerate() {
        let path = safe_join(&dest_norm, &d.path)?;
        fs::create_dir(&path).map_err(|e| OtaError::at(&path, e))?;
        chown(&path, Some(d.uid), Some(d.gid)).map_err(|e| OtaError::at(&path, e))?;
        set_mode(&path, d.mode)?;
        stats.dirs += 1;
        report(opts, "directories", i, total);
    }

    let total = manifest.symlinks.len();
    for (i, s) in manifest.symlinks.iter().enumerate() {
        let path = safe_join(&dest_norm, &s.path)?;
        symlink(&s.target, &path).map_err(|e| OtaError::at(&path, e))?;
        lchown(&path, Some(s.uid), Some(s.gid)).map_err(|e| OtaError::at(&path, e))?;
        stats.symlinks += 1;
        report(opts, "symlinks", i, total);
    }

    let total = manifest.regulars.len();
    let mut links: HashMap<LinkKey, PathBuf> = HashMap::new();
    for (i, r) in manifest.regulars.iter().enumerate() {
        let path = safe_join(&dest_norm, &r.path)?;
        let key = r.link_key();
        if let Some(first) = links.get(&key) {
            fs::hard_link(first, &path).map_err(|e| OtaError::at(&path, e))?;
            debug!(path = %path.display(), first = %first.display(), "hardlinked");
            stats.hardlinks += 1;
        } else {
            let (bytes, from_blob) = restore_regular(r, &path, &src_norm, opts)?;
            chown(&path, Some(r.uid), Some(r.gid)).map_err(|e| OtaError::at(&path, e))?;
            set_mode(&path, r.mode)?;
            stats.copied += 1;
            stats.bytes += bytes;
            if from_blob {
                stats.decompressed += 1;
            }
            if r.nlink >= 2 {
                links.insert(key, path);
            }
        }
        report(opts, "regular files", i, total);
    }

    info!(
        dirs = stats.dirs,
        symlinks = stats.symlinks,
        copied = stats.copied,
        hardlinks = stats.hardlinks,
        "reconstructed {}",
        dest_norm.display()
    );
    Ok(stats)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| OtaError::at(path, e))
}

fn report(opts: &ExtractOptions, phase: &str, done: usize, total: usize) {
    let done = done + 1;
    if opts.progress && (done % PROGRESS_EVERY == 0 || done == total) {
        info!("{phase}: {done}/{total}");
    }
}

/// Write the content of `r` to `dst`. Returns the byte count and whether it
/// came out of the blob store.
fn restore_regular(
    r: &RegularEntry,
    dst: &Path,
    src_root: &Path,
    opts: &ExtractOptions,
) -> Result<(u64, bool)> {
    let out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .map_err(|e| OtaError::at(dst, e))?;

    if let (Some(dir), Some(alg)) = (&opts.compressed_dir, r.compress_alg) {
        let blob = blob_path(dir, &r.hash, alg);
        let mut input = File::open(&blob).map_err(|e| OtaError::at(&blob, e))?;
        let mut hasher = Sha256::new();
        let written = {
            let mut fwd = HashingForward::new(BufWriter::new(out), &mut hasher);
            let n = alg.compressor().decompress(&mut input, &mut fwd)?;
            fwd.flush().map_err(|e| OtaError::at(dst, e))?;
            n
        };
        let actual = hex_digest(hasher);
        if actual != r.hash {
            return Err(OtaError::HashMismatch {
                path: dst.to_path_buf(),
                expected: r.hash.clone(),
                actual,
            });
        }
        debug!(path = %dst.display(), blob = %blob.display(), "restored from blob");
        return Ok((written, true));
    }

    let from = safe_join(src_root, &r.path)?;
    let mut input = File::open(&from).map_err(|e| OtaError::at(&from, e))?;
    let mut w = BufWriter::new(out);
    let n = io::copy(&mut input, &mut w).map_err(|e| OtaError::at(&from, e))?;
    w.flush().map_err(|e| OtaError::at(dst, e))?;
    debug!(path = %dst.display(), bytes = n, "copied");
    Ok((n, false))
}
