use crate::container::record::{
    DirectoryEntry, Entry, EntryKind, RegularEntry, SymlinkEntry,
};
use crate::error::{OtaError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DIRECTORY_FILE: &str = "dirs.txt";
pub const SYMLINK_FILE: &str = "symlinks.txt";
pub const REGULAR_FILE: &str = "regulars.txt";
pub const TOTAL_REGULAR_SIZE_FILE: &str = "total_regular_size.txt";

/// Locations of the four manifest files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFiles {
    pub dirs: PathBuf,
    pub symlinks: PathBuf,
    pub regulars: PathBuf,
    pub total_regular_size: PathBuf,
}

impl Default for ManifestFiles {
    fn default() -> Self {
        Self {
            dirs: DIRECTORY_FILE.into(),
            symlinks: SYMLINK_FILE.into(),
            regulars: REGULAR_FILE.into(),
            total_regular_size: TOTAL_REGULAR_SIZE_FILE.into(),
        }
    }
}

impl ManifestFiles {
    /// Default file names placed under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::default().relative_to(dir)
    }

    /// Resolve relative file names against `dir`; absolute ones are kept.
    pub fn relative_to(self, dir: &Path) -> Self {
        Self {
            dirs: dir.join(self.dirs),
            symlinks: dir.join(self.symlinks),
            regulars: dir.join(self.regulars),
            total_regular_size: dir.join(self.total_regular_size),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub dirs: Vec<DirectoryEntry>,
    pub symlinks: Vec<SymlinkEntry>,
    pub regulars: Vec<RegularEntry>,
    pub total_regular_size: u64,
}

impl Manifest {
    /// Load all three record files. A missing total-size file falls back to
    /// the sum of recorded sizes.
    pub fn load(files: &ManifestFiles) -> Result<Self> {
        let dirs = read_records(&files.dirs, EntryKind::Directory)?
            .into_iter()
            .filter_map(|e| match e {
                Entry::Directory(d) => Some(d),
                _ => None,
            })
            .collect();
        let symlinks = read_records(&files.symlinks, EntryKind::Symlink)?
            .into_iter()
            .filter_map(|e| match e {
                Entry::Symlink(s) => Some(s),
                _ => None,
            })
            .collect();
        let regulars: Vec<RegularEntry> = read_records(&files.regulars, EntryKind::Regular)?
            .into_iter()
            .filter_map(|e| match e {
                Entry::Regular(r) => Some(r),
                _ => None,
            })
            .collect();

        let total_regular_size: u64 = match fs::read_to_string(&files.total_regular_size) {
            Ok(text) => text.trim().parse().map_err(|_| OtaError::Manifest {
                file: files.total_regular_size.clone(),
                line: 1,
                source: Box::new(OtaError::malformed(text.trim().as_bytes(), "not a byte count")),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                regulars.iter().filter_map(|r| r.size).sum()
            }
            Err(e) => return Err(OtaError::at(&files.total_regular_size, e)),
        };

        Ok(Self {
            dirs,
            symlinks,
            regulars,
            total_regular_size,
        })
    }

    pub fn write(&self, files: &ManifestFiles) -> Result<()> {
        write_lines(&files.dirs, self.dirs.iter().map(DirectoryEntry::encode))?;
        write_lines(&files.symlinks, self.symlinks.iter().map(SymlinkEntry::encode))?;
        write_lines(&files.regulars, self.regulars.iter().map(RegularEntry::encode))?;
        fs::write(
            &files.total_regular_size,
            self.total_regular_size.to_string(),
        )
        .map_err(|e| OtaError::at(&files.total_regular_size, e))
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.dirs
            .iter()
            .cloned()
            .map(Entry::Directory)
            .chain(self.symlinks.iter().cloned().map(Entry::Symlink))
            .chain(self.regulars.iter().cloned().map(Entry::Regular))
    }
}

/// Parse one record file. Blank lines are skipped; the first bad line aborts
/// the load with its file name and 1-based line number.
pub fn read_records(path: &Path, kind: EntryKind) -> Result<Vec<Entry>> {
    let data = fs::read(path).map_err(|e| OtaError::at(path, e))?;
    let mut out = Vec::new();
    for (idx, line) in data.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let entry = Entry::parse(kind, line).map_err(|e| OtaError::Manifest {
            file: path.to_path_buf(),
            line: idx + 1,
            source: Box::new(e),
        })?;
        out.push(entry);
    }
    Ok(out)
}

/// Lines joined with `\n`, no trailing newline.
pub fn write_lines(path: &Path, lines: impl IntoIterator<Item = Vec<u8>>) -> Result<()> {
    let mut buf = Vec::new();
    for (i, line) in lines.into_iter().enumerate() {
        if i > 0 {
            buf.push(b'\n');
        }
        buf.extend(line);
    }
    fs::write(path, buf).map_err(|e| OtaError::at(path, e))
}
