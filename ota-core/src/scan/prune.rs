use crate::container::manifest::write_lines;
use crate::error::Result;
use crate::scan::classify::Deletions;
use crate::util::paths::{byte_cmp, depth};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DELETED_KERNELS_FILE: &str = "deleted_kernels.txt";
pub const DELETED_IGNORED_FILE: &str = "deleted_ignored.txt";
/// `path<TAB>error` for every path that could not be removed.
pub const DELETED_FAILED_FILE: &str = "deleted_failed.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reason {
    Kernel,
    Ignored,
}

#[derive(Clone, Debug, Default)]
pub struct PruneReport {
    /// Absolute paths actually removed.
    pub kernels: Vec<PathBuf>,
    pub ignored: Vec<PathBuf>,
    /// Paths that could not be removed, with the error text.
    pub failed: Vec<(PathBuf, String)>,
}

/// Remove every path in `deletions` from under `root`: non-directories
/// deepest first, then directories deepest first. A failed removal is logged
/// and recorded; the pass goes on. With `audit_dir`, the removed paths are
/// listed in [`DELETED_KERNELS_FILE`] and [`DELETED_IGNORED_FILE`], the
/// failures in [`DELETED_FAILED_FILE`].
pub fn execute(root: &Path, deletions: &Deletions, audit_dir: Option<&Path>) -> Result<PruneReport> {
    let mut files: Vec<(PathBuf, Reason)> = Vec::new();
    let mut dirs: Vec<(PathBuf, Reason)> = Vec::new();
    let mut failed: Vec<(PathBuf, String)> = Vec::new();
    let tagged = deletions
        .kernels
        .iter()
        .map(|p| (p, Reason::Kernel))
        .chain(deletions.ignored.iter().map(|p| (p, Reason::Ignored)));
    for (rel, reason) in tagged {
        let abs = root.join(rel);
        match fs::symlink_metadata(&abs) {
            Ok(md) if md.is_dir() => dirs.push((abs, reason)),
            Ok(_) => files.push((abs, reason)),
            Err(e) => {
                warn!(path = %abs.display(), error = %e, "cannot stat path marked for deletion");
                failed.push((abs, e.to_string()));
            }
        }
    }
    files.sort_by(|a, b| depth(&b.0).cmp(&depth(&a.0)).then_with(|| b.0.cmp(&a.0)));
    dirs.sort_by(|a, b| depth(&b.0).cmp(&depth(&a.0)).then_with(|| b.0.cmp(&a.0)));

    let mut report = PruneReport {
        failed,
        ..PruneReport::default()
    };
    for (path, reason, is_dir) in files
        .into_iter()
        .map(|(p, r)| (p, r, false))
        .chain(dirs.into_iter().map(|(p, r)| (p, r, true)))
    {
        let res = if is_dir {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        match res {
            Ok(()) => {
                debug!(path = %path.display(), ?reason, "deleted");
                match reason {
                    Reason::Kernel => report.kernels.push(path),
                    Reason::Ignored => report.ignored.push(path),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "delete failed");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    report.kernels.sort_by(|a, b| byte_cmp(a, b));
    report.ignored.sort_by(|a, b| byte_cmp(a, b));
    report.failed.sort_by(|a, b| byte_cmp(&a.0, &b.0));

    if let Some(dir) = audit_dir {
        write_audit(&dir.join(DELETED_KERNELS_FILE), &report.kernels)?;
        write_audit(&dir.join(DELETED_IGNORED_FILE), &report.ignored)?;
        write_lines(
            &dir.join(DELETED_FAILED_FILE),
            report.failed.iter().map(|(path, err)| {
                let mut line = path.as_os_str().as_bytes().to_vec();
                line.push(b'\t');
                line.extend_from_slice(err.as_bytes());
                line
            }),
        )?;
    }
    info!(
        kernels = report.kernels.len(),
        ignored = report.ignored.len(),
        failed = report.failed.len(),
        "pruned {}",
        root.display()
    );
    Ok(report)
}

fn write_audit(file: &Path, paths: &[PathBuf]) -> Result<()> {
    write_lines(file, paths.iter().map(|p| p.as_os_str().as_bytes().to_vec()))
}

/// Remove a file, symlink or whole directory tree. `false` when nothing was
/// there or removal failed.
pub fn delete_path(path: &Path) -> bool {
    let res = match fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return false,
    };
    match res {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "delete failed");
            false
        }
    }
}
