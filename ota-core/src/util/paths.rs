use std::cmp::Ordering;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use crate::error::{OtaError, Result};

/// Lexically resolve `.` and `..` without touching the filesystem.
///
/// `..` at the root of an absolute path is dropped, matching how the kernel
/// resolves `/..`. For relative paths an excess `..` is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join a path recorded in a manifest (possibly carrying a `/` prefix) under `root`.
///
/// Rejects `..` components and empty paths so a manifest can never write
/// outside the destination.
pub fn safe_join(root: &Path, recorded: &Path) -> Result<PathBuf> {
    let mut rel = PathBuf::new();
    for comp in recorded.components() {
        match comp {
            Component::Normal(c) => rel.push(c),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(OtaError::UnsafePath(recorded.to_path_buf())),
        }
    }
    if rel.as_os_str().is_empty() {
        return Err(OtaError::UnsafePath(recorded.to_path_buf()));
    }
    Ok(root.join(rel))
}

/// Raw byte comparison. Unlike `Path`'s component order, `a-b` sorts
/// before `a/b`; a parent still precedes everything below it.
pub fn byte_cmp(a: &Path, b: &Path) -> Ordering {
    a.as_os_str().as_bytes().cmp(b.as_os_str().as_bytes())
}

/// The paths of `paths` in byte order.
pub fn byte_ordered<'a, I>(paths: I) -> Vec<&'a PathBuf>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let mut out: Vec<&PathBuf> = paths.into_iter().collect();
    out.sort_by(|a, b| byte_cmp(a, b));
    out
}

pub fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Every proper ancestor of a relative path, nearest last (`a`, `a/b` for `a/b/c`).
pub fn ancestors_of(rel: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = rel
        .ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .collect();
    out.reverse();
    out
}
