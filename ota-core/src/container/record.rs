//! Line format of the three manifest files.
//!
//! ```text
//! dirs.txt      mode,uid,gid,'path'
//! symlinks.txt  mode,uid,gid,'path','target'
//! regulars.txt  mode,uid,gid,nlink,sha256,'path'[,size[,inode[,compress_alg]]]
//! ```
//!
//! `mode` is unpadded octal. Trailing regular fields may be omitted or left
//! empty; both decode to `None`.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::escape::{quote, take_quoted, unquote};
use crate::codec::CompressAlg;
use crate::error::{OtaError, Result};

/// Permission bits kept in a record (type bits are implied by the manifest file).
pub const MODE_MASK: u32 = 0o7777;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    Symlink,
    Regular,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
            EntryKind::Regular => "regular",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymlinkEntry {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub path: PathBuf,
    /// Raw link value, never resolved.
    pub target: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegularEntry {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    /// Lowercase hex SHA-256 of the uncompressed content.
    pub hash: String,
    pub path: PathBuf,
    pub size: Option<u64>,
    /// Source inode, recorded only for files with more than one link.
    pub inode: Option<u64>,
    pub compress_alg: Option<CompressAlg>,
}

/// Key under which regular files are hardlinked together on reconstruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LinkKey {
    Inode(u64),
    Hash(String),
}

impl RegularEntry {
    pub fn link_key(&self) -> LinkKey {
        match self.inode {
            Some(ino) => LinkKey::Inode(ino),
            None => LinkKey::Hash(self.hash.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Directory(DirectoryEntry),
    Symlink(SymlinkEntry),
    Regular(RegularEntry),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Directory(_) => EntryKind::Directory,
            Entry::Symlink(_) => EntryKind::Symlink,
            Entry::Regular(_) => EntryKind::Regular,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Entry::Directory(d) => &d.path,
            Entry::Symlink(s) => &s.path,
            Entry::Regular(r) => &r.path,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Entry::Directory(d) => d.encode(),
            Entry::Symlink(s) => s.encode(),
            Entry::Regular(r) => r.encode(),
        }
    }

    pub fn parse(kind: EntryKind, line: &[u8]) -> Result<Entry> {
        Ok(match kind {
            EntryKind::Directory => Entry::Directory(DirectoryEntry::parse(line)?),
            EntryKind::Symlink => Entry::Symlink(SymlinkEntry::parse(line)?),
            EntryKind::Regular => Entry::Regular(RegularEntry::parse(line)?),
        })
    }
}

impl DirectoryEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = encode_owner(self.mode, self.uid, self.gid);
        out.extend(quote(self.path.as_os_str().as_bytes()));
        out
    }

    pub fn parse(line: &[u8]) -> Result<Self> {
        let (mode, uid, gid, rest) = parse_owner(line)?;
        let raw = unquote(rest).ok_or_else(|| OtaError::malformed(line, "bad quoted path"))?;
        Ok(Self {
            mode,
            uid,
            gid,
            path: bytes_to_path(raw),
        })
    }
}

impl SymlinkEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = encode_owner(self.mode, self.uid, self.gid);
        out.extend(quote(self.path.as_os_str().as_bytes()));
        out.push(b',');
        out.extend(quote(self.target.as_os_str().as_bytes()));
        out
    }

    pub fn parse(line: &[u8]) -> Result<Self> {
        let (mode, uid, gid, rest) = parse_owner(line)?;
        let (link, rest) =
            take_quoted(rest).ok_or_else(|| OtaError::malformed(line, "bad quoted link path"))?;
        let rest = rest
            .strip_prefix(b",")
            .ok_or_else(|| OtaError::malformed(line, "missing link target"))?;
        let target =
            unquote(rest).ok_or_else(|| OtaError::malformed(line, "bad quoted link target"))?;
        Ok(Self {
            mode,
            uid,
            gid,
            path: bytes_to_path(link),
            target: bytes_to_path(target),
        })
    }
}

impl RegularEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = encode_owner(self.mode, self.uid, self.gid);
        out.extend(format!("{},{},", self.nlink, self.hash).into_bytes());
        out.extend(quote(self.path.as_os_str().as_bytes()));
        if self.size.is_some() || self.inode.is_some() || self.compress_alg.is_some() {
            let size = self.size.map(|s| s.to_string()).unwrap_or_default();
            let inode = self.inode.map(|i| i.to_string()).unwrap_or_default();
            let alg = self.compress_alg.map(|a| a.tag()).unwrap_or_default();
            out.extend(format!(",{size},{inode},{alg}").into_bytes());
        }
        out
    }

    pub fn parse(line: &[u8]) -> Result<Self> {
        let (mode, uid, gid, rest) = parse_owner(line)?;
        let (nlink, rest) = split_field(line, rest)?;
        let nlink: u64 = parse_number(line, nlink, "nlink")?;
        if nlink == 0 {
            return Err(OtaError::malformed(line, "link count must be positive"));
        }
        let (hash, rest) = split_field(line, rest)?;
        if hash.is_empty() || !hash.iter().all(u8::is_ascii_alphanumeric) {
            return Err(OtaError::malformed(line, "bad content hash"));
        }
        let (path, rest) =
            take_quoted(rest).ok_or_else(|| OtaError::malformed(line, "bad quoted path"))?;

        let mut trailing: Vec<&[u8]> = Vec::new();
        if !rest.is_empty() {
            let rest = rest
                .strip_prefix(b",")
                .ok_or_else(|| OtaError::malformed(line, "garbage after path"))?;
            trailing = rest.split(|&b| b == b',').collect();
            if trailing.len() > 3 {
                return Err(OtaError::malformed(line, "too many trailing fields"));
            }
        }
        let field = |i: usize| trailing.get(i).copied().filter(|f| !f.is_empty());

        let size = field(0)
            .map(|f| parse_number(line, f, "size"))
            .transpose()?;
        let inode = field(1)
            .map(|f| parse_number(line, f, "inode"))
            .transpose()?;
        let compress_alg = field(2)
            .map(|f| parse_number::<CompressAlg>(line, f, "compress_alg"))
            .transpose()?;

        Ok(Self {
            mode,
            uid,
            gid,
            nlink,
            hash: String::from_utf8_lossy(hash).into_owned(),
            path: bytes_to_path(path),
            size,
            inode,
            compress_alg,
        })
    }
}

fn encode_owner(mode: u32, uid: u32, gid: u32) -> Vec<u8> {
    format!("{:o},{uid},{gid},", mode & MODE_MASK).into_bytes()
}

fn parse_owner(line: &[u8]) -> Result<(u32, u32, u32, &[u8])> {
    let (mode, rest) = split_field(line, line)?;
    let mode = std::str::from_utf8(mode)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| u32::from_str_radix(s, 8).ok())
        .ok_or_else(|| OtaError::malformed(line, "mode is not octal"))?;
    let (uid, rest) = split_field(line, rest)?;
    let uid = parse_number(line, uid, "uid")?;
    let (gid, rest) = split_field(line, rest)?;
    let gid = parse_number(line, gid, "gid")?;
    Ok((mode, uid, gid, rest))
}

fn split_field<'a>(line: &[u8], input: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
    let pos = input
        .iter()
        .position(|&b| b == b',')
        .ok_or_else(|| OtaError::malformed(line, "truncated record"))?;
    Ok((&input[..pos], &input[pos + 1..]))
}

fn parse_number<T: FromStr>(line: &[u8], field: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OtaError::malformed(line, format!("bad {what} field")))
}

fn bytes_to_path(raw: Vec<u8>) -> PathBuf {
    PathBuf::from(OsString::from_vec(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(path: &str) -> DirectoryEntry {
        DirectoryEntry {
            mode: 0o755,
            uid: 1000,
            gid: 1000,
            path: PathBuf::from(path),
        }
    }

    fn regular(path: &str) -> RegularEntry {
        RegularEntry {
            mode: 0o644,
            uid: 0,
            gid: 0,
            nlink: 1,
            hash: "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".into(),
            path: PathBuf::from(path),
            size: Some(5),
            inode: None,
            compress_alg: None,
        }
    }

    #[test]
    fn test_directory_line() {
        let d = dir("/usr/share/doc");
        assert_eq!(d.encode(), b"755,1000,1000,'/usr/share/doc'");
        assert_eq!(DirectoryEntry::parse(&d.encode()).unwrap(), d);
    }

    #[test]
    fn test_mode_with_leading_zero() {
        let d = DirectoryEntry::parse(b"0755,0,0,'/etc'").unwrap();
        assert_eq!(d.mode, 0o755);
        let d = DirectoryEntry::parse(b"1777,0,0,'/tmp'").unwrap();
        assert_eq!(d.mode, 0o1777);
    }

    #[test]
    fn test_roundtrip_awkward_paths() {
        let paths = [
            "it's",
            "a,b,c",
            " leading and trailing ",
            "'",
            "''",
            "x','y",
            "dir/'\\''/name",
            "ends with quote'",
        ];
        for p in paths {
            let d = Entry::Directory(dir(p));
            assert_eq!(Entry::parse(EntryKind::Directory, &d.encode()).unwrap(), d);

            let s = Entry::Symlink(SymlinkEntry {
                mode: 0o777,
                uid: 0,
                gid: 0,
                path: PathBuf::from(p),
                target: PathBuf::from(format!("../{p}")),
            });
            assert_eq!(Entry::parse(EntryKind::Symlink, &s.encode()).unwrap(), s);

            let r = Entry::Regular(regular(p));
            assert_eq!(Entry::parse(EntryKind::Regular, &r.encode()).unwrap(), r);
        }
    }

    #[test]
    fn test_roundtrip_non_utf8_path() {
        let raw = vec![b'b', 0xff, b'\'', 0xfe];
        let d = Entry::Directory(DirectoryEntry {
            mode: 0o700,
            uid: 1,
            gid: 2,
            path: bytes_to_path(raw),
        });
        assert_eq!(Entry::parse(EntryKind::Directory, &d.encode()).unwrap(), d);
    }

    #[test]
    fn test_symlink_separator_after_escaped_quote() {
        let line = b"777,0,0,'a'\\''','b'\\'''";
        let s = SymlinkEntry::parse(line).unwrap();
        assert_eq!(s.path, PathBuf::from("a'"));
        assert_eq!(s.target, PathBuf::from("b'"));
    }

    #[test]
    fn test_regular_empty_trailing_fields() {
        let r = RegularEntry::parse(b"644,1000,1000,1,abcd1234567890,'./file1.txt',100,12345,")
            .unwrap();
        assert_eq!(r.nlink, 1);
        assert_eq!(r.hash, "abcd1234567890");
        assert_eq!(r.path, PathBuf::from("./file1.txt"));
        assert_eq!(r.size, Some(100));
        assert_eq!(r.inode, Some(12345));
        assert_eq!(r.compress_alg, None);
    }

    #[test]
    fn test_regular_optional_fields() {
        let r = RegularEntry::parse(b"644,0,0,1,abc,'f'").unwrap();
        assert_eq!((r.size, r.inode, r.compress_alg), (None, None, None));

        let r = RegularEntry::parse(b"644,0,0,1,abc,'f',10").unwrap();
        assert_eq!((r.size, r.inode), (Some(10), None));

        let r = RegularEntry::parse(b"644,0,0,1,abc,'f',10,,zst").unwrap();
        assert_eq!(r.size, Some(10));
        assert_eq!(r.inode, None);
        assert_eq!(r.compress_alg, Some(CompressAlg::Zstd));
    }

    #[test]
    fn test_regular_encode_writes_all_trailing_fields() {
        let mut r = regular("/bin/sh");
        r.nlink = 2;
        r.inode = Some(42);
        r.compress_alg = Some(CompressAlg::Zstd);
        let line = String::from_utf8(r.encode()).unwrap();
        assert!(line.ends_with("'/bin/sh',5,42,zst"), "{line}");

        let plain = String::from_utf8(regular("/a").encode()).unwrap();
        assert!(plain.ends_with("'/a',5,,"), "{plain}");
    }

    #[test]
    fn test_link_key_prefers_inode() {
        let mut r = regular("/a");
        assert_eq!(r.link_key(), LinkKey::Hash(r.hash.clone()));
        r.inode = Some(7);
        assert_eq!(r.link_key(), LinkKey::Inode(7));
    }

    #[test]
    fn test_malformed_records() {
        let bad: [&[u8]; 8] = [
            b"",
            b"rwx,0,0,'a'",
            b"755,root,0,'a'",
            b"755,0,0,a",
            b"755,0,0,'unterminated",
            b"777,0,0,'a''b'",
            b"644,0,0,0,abc,'f'",
            b"644,0,0,1,abc,'f',1,2,zst,extra",
        ];
        for line in &bad[..6] {
            let text = String::from_utf8_lossy(line);
            assert!(
                matches!(DirectoryEntry::parse(line), Err(OtaError::MalformedRecord { .. })),
                "{text:?} should not parse as a directory"
            );
            assert!(
                matches!(SymlinkEntry::parse(line), Err(OtaError::MalformedRecord { .. })),
                "{text:?} should not parse as a symlink"
            );
        }
        for line in &bad[6..] {
            assert!(matches!(
                RegularEntry::parse(line),
                Err(OtaError::MalformedRecord { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_compress_tag_is_malformed() {
        assert!(RegularEntry::parse(b"644,0,0,1,abc,'f',1,,lz4").is_err());
    }
}
