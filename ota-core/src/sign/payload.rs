//! Claims carried by the metadata token.
//!
//! The payload is a JSON array of single-purpose objects in a fixed order:
//!
//! ```text
//! [{"version":1},
//!  {"directory":"dirs.txt","hash":"…"},
//!  {"symboliclink":"symlinks.txt","hash":"…"},
//!  {"regular":"regulars.txt","hash":"…"},
//!  {"persistent":"persistents.txt","hash":"…"},
//!  {"rootfs_directory":"rootfs"},
//!  {"certificate":"sign.pem","hash":"…"},
//!  {"total_regular_size":"1234"},              optional
//!  {"compressed_rootfs_directory":"data.zst"}] optional
//! ```

use crate::container::manifest::ManifestFiles;
use crate::error::{OtaError, Result};
use crate::util::digest::sha256_file;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const PAYLOAD_VERSION: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileRole {
    Directory,
    Symlink,
    Regular,
    Persistent,
    Certificate,
}

impl FileRole {
    pub const fn key(&self) -> &'static str {
        match self {
            FileRole::Directory => "directory",
            FileRole::Symlink => "symboliclink",
            FileRole::Regular => "regular",
            FileRole::Persistent => "persistent",
            FileRole::Certificate => "certificate",
        }
    }

    const ALL: [FileRole; 5] = [
        FileRole::Directory,
        FileRole::Symlink,
        FileRole::Regular,
        FileRole::Persistent,
        FileRole::Certificate,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadEntry {
    Version(u64),
    /// A file attested by name (basename only) and SHA-256.
    File {
        role: FileRole,
        name: String,
        hash: String,
    },
    RootfsDirectory(String),
    TotalRegularSize(String),
    CompressedRootfsDirectory(String),
}

impl PayloadEntry {
    /// Entry for `path`, hashing its content.
    pub fn file(role: FileRole, path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(PayloadEntry::File {
            role,
            name,
            hash: sha256_file(path)?,
        })
    }

    pub fn from_value(v: &Value) -> Result<Self> {
        let obj = v
            .as_object()
            .ok_or_else(|| OtaError::Sign(format!("payload entry is not an object: {v}")))?;
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

        if let Some(n) = obj.get("version") {
            return n
                .as_u64()
                .map(PayloadEntry::Version)
                .ok_or_else(|| OtaError::Sign(format!("bad version {n}")));
        }
        for role in FileRole::ALL {
            if let Some(name) = text(role.key()) {
                let hash = text("hash")
                    .ok_or_else(|| OtaError::Sign(format!("{} entry has no hash", role.key())))?;
                return Ok(PayloadEntry::File { role, name, hash });
            }
        }
        if let Some(dir) = text("rootfs_directory") {
            return Ok(PayloadEntry::RootfsDirectory(dir));
        }
        if let Some(total) = text("total_regular_size") {
            return Ok(PayloadEntry::TotalRegularSize(total));
        }
        if let Some(dir) = text("compressed_rootfs_directory") {
            return Ok(PayloadEntry::CompressedRootfsDirectory(dir));
        }
        Err(OtaError::Sign(format!("unknown payload entry {v}")))
    }
}

impl Serialize for PayloadEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PayloadEntry::Version(v) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("version", v)?;
                m.end()
            }
            PayloadEntry::File { role, name, hash } => {
                let mut m = serializer.serialize_map(Some(2))?;
                m.serialize_entry(role.key(), name)?;
                m.serialize_entry("hash", hash)?;
                m.end()
            }
            PayloadEntry::RootfsDirectory(d) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("rootfs_directory", d)?;
                m.end()
            }
            PayloadEntry::TotalRegularSize(t) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("total_regular_size", t)?;
                m.end()
            }
            PayloadEntry::CompressedRootfsDirectory(d) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("compressed_rootfs_directory", d)?;
                m.end()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SignOptions {
    /// The total-size file is attested only if it exists.
    pub manifest: ManifestFiles,
    pub persistent_file: PathBuf,
    pub certificate_file: PathBuf,
    pub rootfs_directory: String,
    pub compressed_rootfs_directory: Option<String>,
}

pub fn build_payload(opts: &SignOptions) -> Result<Vec<PayloadEntry>> {
    let mut out = vec![
        PayloadEntry::Version(PAYLOAD_VERSION),
        PayloadEntry::file(FileRole::Directory, &opts.manifest.dirs)?,
        PayloadEntry::file(FileRole::Symlink, &opts.manifest.symlinks)?,
        PayloadEntry::file(FileRole::Regular, &opts.manifest.regulars)?,
        PayloadEntry::file(FileRole::Persistent, &opts.persistent_file)?,
        PayloadEntry::RootfsDirectory(opts.rootfs_directory.clone()),
        PayloadEntry::file(FileRole::Certificate, &opts.certificate_file)?,
    ];
    let total = &opts.manifest.total_regular_size;
    if total.is_file() {
        let text = std::fs::read_to_string(total).map_err(|e| OtaError::at(total, e))?;
        out.push(PayloadEntry::TotalRegularSize(text));
    }
    if let Some(dir) = &opts.compressed_rootfs_directory {
        out.push(PayloadEntry::CompressedRootfsDirectory(dir.clone()));
    }
    Ok(out)
}

/// Recompute the hash of every attested file found under `dir`. The three
/// manifest files must be present; persistent and certificate files are
/// checked when they are.
pub fn verify_manifest_hashes(entries: &[PayloadEntry], dir: &Path) -> Result<()> {
    for entry in entries {
        let PayloadEntry::File { role, name, hash } = entry else {
            continue;
        };
        let path = dir.join(name);
        let required = matches!(
            role,
            FileRole::Directory | FileRole::Symlink | FileRole::Regular
        );
        if !required && !path.is_file() {
            continue;
        }
        let actual = sha256_file(&path)?;
        if &actual != hash {
            return Err(OtaError::HashMismatch {
                path,
                expected: hash.clone(),
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn fixture(dir: &Path) -> SignOptions {
        for f in ["dirs.txt", "symlinks.txt", "regulars.txt", "persistents.txt", "sign.pem"] {
            fs::write(dir.join(f), b"hello").unwrap();
        }
        SignOptions {
            manifest: ManifestFiles::in_dir(dir),
            persistent_file: dir.join("persistents.txt"),
            certificate_file: dir.join("sign.pem"),
            rootfs_directory: "rootfs".into(),
            compressed_rootfs_directory: None,
        }
    }

    #[test]
    fn test_payload_layout() {
        let tmp = TempDir::new().unwrap();
        let opts = fixture(tmp.path());
        let json = serde_json::to_string(&build_payload(&opts).unwrap()).unwrap();
        assert_eq!(
            json,
            format!(
                "[{{\"version\":1}},\
                 {{\"directory\":\"dirs.txt\",\"hash\":\"{HELLO}\"}},\
                 {{\"symboliclink\":\"symlinks.txt\",\"hash\":\"{HELLO}\"}},\
                 {{\"regular\":\"regulars.txt\",\"hash\":\"{HELLO}\"}},\
                 {{\"persistent\":\"persistents.txt\",\"hash\":\"{HELLO}\"}},\
                 {{\"rootfs_directory\":\"rootfs\"}},\
                 {{\"certificate\":\"sign.pem\",\"hash\":\"{HELLO}\"}}]"
            )
        );
    }

    #[test]
    fn test_optional_entries() {
        let tmp = TempDir::new().unwrap();
        let mut opts = fixture(tmp.path());
        fs::write(&opts.manifest.total_regular_size, b"108108").unwrap();
        opts.compressed_rootfs_directory = Some("data.zst".into());
        let p = build_payload(&opts).unwrap();
        assert_eq!(p.len(), 9);
        assert_eq!(p[7], PayloadEntry::TotalRegularSize("108108".into()));
        assert_eq!(p[8], PayloadEntry::CompressedRootfsDirectory("data.zst".into()));
    }

    #[test]
    fn test_from_value_reads_back_every_entry() {
        let tmp = TempDir::new().unwrap();
        let mut opts = fixture(tmp.path());
        fs::write(&opts.manifest.total_regular_size, b"5").unwrap();
        opts.compressed_rootfs_directory = Some("data.zst".into());
        let p = build_payload(&opts).unwrap();

        let value = serde_json::to_value(&p).unwrap();
        let back: Vec<PayloadEntry> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| PayloadEntry::from_value(v).unwrap())
            .collect();
        assert_eq!(back, p);
        assert!(PayloadEntry::from_value(&serde_json::json!({"bogus": 1})).is_err());
    }

    #[test]
    fn test_missing_input_file() {
        let tmp = TempDir::new().unwrap();
        let mut opts = fixture(tmp.path());
        opts.persistent_file = tmp.path().join("absent.txt");
        assert!(matches!(build_payload(&opts), Err(OtaError::PathIo { .. })));
    }

    #[test]
    fn test_verify_manifest_hashes() {
        let tmp = TempDir::new().unwrap();
        let opts = fixture(tmp.path());
        let p = build_payload(&opts).unwrap();
        verify_manifest_hashes(&p, tmp.path()).unwrap();

        fs::remove_file(tmp.path().join("sign.pem")).unwrap();
        verify_manifest_hashes(&p, tmp.path()).unwrap();

        fs::write(tmp.path().join("regulars.txt"), b"changed").unwrap();
        assert!(matches!(
            verify_manifest_hashes(&p, tmp.path()),
            Err(OtaError::HashMismatch { .. })
        ));
    }
}
