use crate::codec::zstdc::ZstdCompressor;
use crate::codec::{CompressAlg, Compressor};
use crate::container::manifest::{Manifest, ManifestFiles};
use crate::container::record::{DirectoryEntry, MODE_MASK, RegularEntry, SymlinkEntry};
use crate::error::{OtaError, Result};
use crate::scan::classify::Classification;
use crate::stats::Stats;
use crate::util::digest::{CHUNK_SIZE, hex_digest, sha256_file};
use crate::util::hash_forward::HashingReader;
use crate::util::paths::byte_ordered;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Blob-store compression settings.
#[derive(Clone, Debug)]
pub struct CompressOptions {
    /// Files smaller than this are never compressed.
    pub min_size: u64,
    /// Keep a blob only if `size / compressed >= min_ratio`.
    pub min_ratio: f64,
    pub level: i32,
    /// zstd worker threads; 0 compresses on the calling thread.
    pub threads: u32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            min_size: 16 * 1024,
            min_ratio: 1.25,
            level: 10,
            threads: 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PackOptions {
    /// Joined in front of every recorded path.
    pub prefix: PathBuf,
    /// Where `<sha256>.zst` blobs go. No blobs are written when unset.
    pub compressed_dir: Option<PathBuf>,
    pub compress: CompressOptions,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("/"),
            compressed_dir: None,
            compress: CompressOptions::default(),
        }
    }
}

/// Hash and compression result shared by every link of one inode.
#[derive(Clone)]
struct Content {
    hash: String,
    alg: Option<CompressAlg>,
}

/// Record every kept path of `root` and write the manifest files.
pub fn pack(
    root: &Path,
    classes: &Classification,
    files: &ManifestFiles,
    opts: &PackOptions,
) -> Result<Stats> {
    let manifest = build_manifest(root, classes, opts)?;
    manifest.write(files)?;

    let mut stats = Stats {
        dirs: manifest.dirs.len() as u64,
        symlinks: manifest.symlinks.len() as u64,
        regulars: manifest.regulars.len() as u64,
        logical_bytes: manifest.total_regular_size,
        ..Stats::default()
    };
    if let Some(dir) = &opts.compressed_dir {
        for r in manifest.regulars.iter().filter(|r| r.compress_alg.is_some()) {
            stats.compressed_files += 1;
            stats.uncompressed_bytes_compressed += r.size.unwrap_or(0);
            if let Some(alg) = r.compress_alg {
                let blob = blob_path(dir, &r.hash, alg);
                stats.blob_bytes += fs::metadata(&blob).map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    stats.hardlinks = manifest.regulars.iter().filter(|r| r.nlink > 1).count() as u64;
    info!(
        dirs = stats.dirs,
        symlinks = stats.symlinks,
        regulars = stats.regulars,
        bytes = stats.logical_bytes,
        compressed = stats.compressed_files,
        "manifest written"
    );
    Ok(stats)
}

pub fn blob_path(dir: &Path, hash: &str, alg: CompressAlg) -> PathBuf {
    dir.join(format!("{hash}.{}", alg.tag()))
}

/// Build the in-memory manifest without writing anything but blobs.
pub fn build_manifest(
    root: &Path,
    classes: &Classification,
    opts: &PackOptions,
) -> Result<Manifest> {
    if let Some(dir) = &opts.compressed_dir {
        fs::create_dir_all(dir).map_err(|e| OtaError::at(dir, e))?;
    }
    let mut manifest = Manifest::default();

    for rel in byte_ordered(&classes.dirs) {
        let md = lstat(root, rel)?;
        manifest.dirs.push(DirectoryEntry {
            mode: md.mode() & MODE_MASK,
            uid: md.uid(),
            gid: md.gid(),
            path: recorded(&opts.prefix, rel)?,
        });
    }

    for rel in byte_ordered(&classes.symlinks) {
        let abs = root.join(rel);
        let md = lstat(root, rel)?;
        let target = fs::read_link(&abs).map_err(|e| OtaError::at(&abs, e))?;
        check_encodable(&target)?;
        manifest.symlinks.push(SymlinkEntry {
            mode: md.mode() & MODE_MASK,
            uid: md.uid(),
            gid: md.gid(),
            path: recorded(&opts.prefix, rel)?,
            target,
        });
    }

    let mut by_inode: HashMap<u64, Content> = HashMap::new();
    let mut total = 0u64;
    for rel in byte_ordered(&classes.regulars) {
        let abs = root.join(rel);
        let md = lstat(root, rel)?;
        let nlink = md.nlink();
        let size = md.len();

        let cached = if nlink > 1 {
            by_inode.get(&md.ino()).cloned()
        } else {
            None
        };
        let content = match cached {
            Some(c) => c,
            None => {
                let c = digest_and_store(&abs, size, opts)?;
                if nlink > 1 {
                    by_inode.insert(md.ino(), c.clone());
                }
                c
            }
        };
        debug!(path = %rel.display(), hash = %content.hash, nlink, "regular");

        total += size;
        manifest.regulars.push(RegularEntry {
            mode: md.mode() & MODE_MASK,
            uid: md.uid(),
            gid: md.gid(),
            nlink,
            hash: content.hash,
            path: recorded(&opts.prefix, rel)?,
            size: Some(size),
            inode: (nlink > 1).then_some(md.ino()),
            compress_alg: content.alg,
        });
    }
    manifest.total_regular_size = total;
    Ok(manifest)
}

fn lstat(root: &Path, rel: &Path) -> Result<fs::Metadata> {
    let abs = root.join(rel);
    fs::symlink_metadata(&abs).map_err(|e| OtaError::at(abs, e))
}

fn recorded(prefix: &Path, rel: &Path) -> Result<PathBuf> {
    let p = prefix.join(rel);
    check_encodable(&p)?;
    Ok(p)
}

fn check_encodable(p: &Path) -> Result<()> {
    if p.as_os_str().as_bytes().contains(&b'\n') {
        return Err(OtaError::UnencodablePath(p.to_path_buf()));
    }
    Ok(())
}

/// Hash `path`; with a blob store configured and the file large enough,
/// compress it in the same pass and keep the blob if it pays off.
fn digest_and_store(path: &Path, size: u64, opts: &PackOptions) -> Result<Content> {
    let plain = |path: &Path| -> Result<Content> {
        Ok(Content {
            hash: sha256_file(path)?,
            alg: None,
        })
    };
    let Some(dir) = &opts.compressed_dir else {
        return plain(path);
    };
    if size < opts.compress.min_size {
        return plain(path);
    }

    match compress_into(path, size, dir, &opts.compress) {
        Ok(content) => Ok(content),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "compression failed, storing uncompressed");
            plain(path)
        }
    }
}

fn compress_into(path: &Path, size: u64, dir: &Path, copts: &CompressOptions) -> Result<Content> {
    let zstd = ZstdCompressor;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| OtaError::at(dir, e))?;
    let mut hasher = Sha256::new();
    {
        let src = File::open(path).map_err(|e| OtaError::at(path, e))?;
        let mut reader = HashingReader::new(BufReader::with_capacity(CHUNK_SIZE, src), &mut hasher);
        zstd.compress(&mut reader, tmp.as_file_mut(), copts.level, copts.threads)?;
    }
    let hash = hex_digest(hasher);
    let compressed = tmp.as_file().metadata()?.len();

    let ratio = size as f64 / compressed.max(1) as f64;
    if ratio < copts.min_ratio {
        debug!(path = %path.display(), ratio, "compression below threshold, blob discarded");
        return Ok(Content { hash, alg: None });
    }

    let alg = zstd.alg();
    let blob = blob_path(dir, &hash, alg);
    if !blob.exists() {
        tmp.persist(&blob).map_err(|e| OtaError::at(&blob, e.error))?;
    }
    Ok(Content {
        hash,
        alg: Some(alg),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::digest::sha256_reader;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn classes(dirs: &[&str], symlinks: &[&str], regulars: &[&str]) -> Classification {
        let set = |v: &[&str]| v.iter().map(PathBuf::from).collect::<BTreeSet<_>>();
        Classification {
            dirs: set(dirs),
            symlinks: set(symlinks),
            regulars: set(regulars),
            ..Classification::default()
        }
    }

    #[test]
    fn test_prefix_and_modes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join("etc")).unwrap();
        fs::write(root.join("etc/hosts"), b"hello").unwrap();
        std::os::unix::fs::symlink("hosts", root.join("etc/alias")).unwrap();
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(root.join("etc"), fs::Permissions::from_mode(0o750)).unwrap();
        fs::set_permissions(root.join("etc/hosts"), fs::Permissions::from_mode(0o4755))
            .unwrap();

        let m = build_manifest(
            root,
            &classes(&["etc"], &["etc/alias"], &["etc/hosts"]),
            &PackOptions::default(),
        )
        .unwrap();
        assert_eq!(m.dirs[0].path, PathBuf::from("/etc"));
        assert_eq!(m.dirs[0].mode, 0o750);
        assert_eq!(m.symlinks[0].target, PathBuf::from("hosts"));
        let r = &m.regulars[0];
        assert_eq!(r.path, PathBuf::from("/etc/hosts"));
        assert_eq!(r.mode, 0o4755);
        assert_eq!(
            r.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!((r.nlink, r.size, r.inode), (1, Some(5), None));
        assert_eq!(m.total_regular_size, 5);
    }

    #[test]
    fn test_empty_prefix_records_relative_paths() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), b"x").unwrap();
        let opts = PackOptions {
            prefix: PathBuf::new(),
            ..PackOptions::default()
        };
        let m = build_manifest(tmp.path(), &classes(&[], &[], &["f"]), &opts).unwrap();
        assert_eq!(m.regulars[0].path, PathBuf::from("f"));
    }

    #[test]
    fn test_records_in_byte_order() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir(root.join("a-b")).unwrap();
        fs::write(root.join("a/b/f"), b"x").unwrap();
        fs::write(root.join("a-b/f"), b"y").unwrap();

        let m = build_manifest(
            root,
            &classes(&["a", "a/b", "a-b"], &[], &["a/b/f", "a-b/f"]),
            &PackOptions::default(),
        )
        .unwrap();
        let dirs: Vec<&Path> = m.dirs.iter().map(|d| d.path.as_path()).collect();
        assert_eq!(dirs, vec![Path::new("/a"), Path::new("/a-b"), Path::new("/a/b")]);
        let regs: Vec<&Path> = m.regulars.iter().map(|r| r.path.as_path()).collect();
        assert_eq!(regs, vec![Path::new("/a-b/f"), Path::new("/a/b/f")]);
    }

    #[test]
    fn test_hardlinks_share_inode_and_hash() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a"), b"same").unwrap();
        fs::hard_link(root.join("a"), root.join("b")).unwrap();
        fs::write(root.join("c"), b"same").unwrap();

        let m = build_manifest(root, &classes(&[], &[], &["a", "b", "c"]), &PackOptions::default())
            .unwrap();
        let (a, b, c) = (&m.regulars[0], &m.regulars[1], &m.regulars[2]);
        assert_eq!(a.nlink, 2);
        assert!(a.inode.is_some());
        assert_eq!(a.inode, b.inode);
        assert_eq!(a.hash, c.hash);
        assert_eq!(c.inode, None);
    }

    #[test]
    fn test_newline_in_path_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad\nname"), b"x").unwrap();
        let err = build_manifest(
            tmp.path(),
            &classes(&[], &[], &["bad\nname"]),
            &PackOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OtaError::UnencodablePath(_)));
    }

    #[test]
    fn test_compression_gate() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let blobs = tmp.path().join("blobs");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("small"), b"0123456789").unwrap();
        let big = b"compressible ".repeat(80_000);
        fs::write(root.join("big"), &big).unwrap();

        let opts = PackOptions {
            compressed_dir: Some(blobs.clone()),
            compress: CompressOptions {
                min_size: 1024,
                ..CompressOptions::default()
            },
            ..PackOptions::default()
        };
        let m = build_manifest(&root, &classes(&[], &[], &["big", "small"]), &opts).unwrap();
        let big_entry = &m.regulars[0];
        let small_entry = &m.regulars[1];

        assert_eq!(small_entry.compress_alg, None);
        assert_eq!(big_entry.compress_alg, Some(CompressAlg::Zstd));
        assert_eq!(big_entry.hash, sha256_reader(&mut &big[..]).unwrap());

        let blob = blob_path(&blobs, &big_entry.hash, CompressAlg::Zstd);
        assert!(fs::metadata(&blob).unwrap().len() < big.len() as u64);
        // only the persisted blob remains
        assert_eq!(fs::read_dir(&blobs).unwrap().count(), 1);
    }

    #[test]
    fn test_incompressible_blob_discarded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let blobs = tmp.path().join("blobs");
        fs::create_dir(&root).unwrap();
        // xorshift noise does not compress
        let mut x: u64 = 0x9e3779b97f4a7c15;
        let noise: Vec<u8> = (0..64 * 1024)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                x as u8
            })
            .collect();
        fs::write(root.join("noise"), &noise).unwrap();

        let opts = PackOptions {
            compressed_dir: Some(blobs.clone()),
            ..PackOptions::default()
        };
        let m = build_manifest(&root, &classes(&[], &[], &["noise"]), &opts).unwrap();
        assert_eq!(m.regulars[0].compress_alg, None);
        assert_eq!(fs::read_dir(&blobs).unwrap().count(), 0);
    }
}
