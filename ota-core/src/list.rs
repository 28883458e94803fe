use crate::container::manifest::{Manifest, ManifestFiles};
use crate::container::record::Entry;
use crate::error::Result;
use std::io::Write;

/// Print one line per manifest entry: kind, mode, owner, path and the
/// kind-specific tail (link target, or size and hash).
pub fn list(files: &ManifestFiles, out: &mut dyn Write) -> Result<()> {
    let manifest = Manifest::load(files)?;
    for entry in manifest.entries() {
        let line = match &entry {
            Entry::Directory(d) => {
                format!("d {:04o} {}:{} {}", d.mode, d.uid, d.gid, d.path.display())
            }
            Entry::Symlink(s) => format!(
                "l {:04o} {}:{} {} -> {}",
                s.mode,
                s.uid,
                s.gid,
                s.path.display(),
                s.target.display()
            ),
            Entry::Regular(r) => format!(
                "f {:04o} {}:{} {}  {} bytes  {}{}{}",
                r.mode,
                r.uid,
                r.gid,
                r.path.display(),
                r.size.map(|s| s.to_string()).unwrap_or_else(|| "?".into()),
                r.hash,
                if r.nlink > 1 {
                    format!("  links={}", r.nlink)
                } else {
                    String::new()
                },
                r.compress_alg
                    .map(|a| format!("  [{a}]"))
                    .unwrap_or_default(),
            ),
        };
        writeln!(out, "{line}")?;
    }
    writeln!(
        out,
        "{} dirs, {} symlinks, {} regular files, {} bytes",
        manifest.dirs.len(),
        manifest.symlinks.len(),
        manifest.regulars.len(),
        manifest.total_regular_size
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_lines() {
        let tmp = TempDir::new().unwrap();
        let files = ManifestFiles::in_dir(tmp.path());
        fs::write(&files.dirs, "755,0,0,'/etc'").unwrap();
        fs::write(&files.symlinks, "777,0,0,'/bin','usr/bin'").unwrap();
        fs::write(&files.regulars, "644,0,0,2,abc,'/etc/hosts',9,42,zst").unwrap();
        fs::write(&files.total_regular_size, "9").unwrap();

        let mut out = Vec::new();
        list(&files, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "d 0755 0:0 /etc");
        assert_eq!(lines[1], "l 0777 0:0 /bin -> usr/bin");
        assert_eq!(lines[2], "f 0644 0:0 /etc/hosts  9 bytes  abc  links=2  [zst]");
        assert_eq!(lines[3], "1 dirs, 1 symlinks, 1 regular files, 9 bytes");
    }
}
