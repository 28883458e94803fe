//! Selection of stale kernel artifacts under `boot/`.
//!
//! The newest `vmlinuz-<major>.<minor>.<patch>-<build><suffix>` is kept with
//! its `initrd.img-`, `System.map-` and `config-` companions. Every other
//! kernel artifact in the directory is stale.

use crate::error::{OtaError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const KERNEL_PREFIX: &str = "vmlinuz-";
pub const INITRD_PREFIX: &str = "initrd.img-";
pub const ARTIFACT_PREFIXES: [&str; 4] = [KERNEL_PREFIX, INITRD_PREFIX, "System.map-", "config-"];

/// Relative to the boot directory. Its presence pins the kernel elsewhere.
pub const EXTLINUX_CONF: &str = "extlinux/extlinux.conf";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub build: u64,
}

/// Parse `<major>.<minor>.<patch>-<build><suffix>`, returning the version and
/// the suffix.
pub fn parse_release(release: &str) -> Option<(KernelVersion, &str)> {
    let (numbers, rest) = release.split_once('-')?;
    let mut parts = numbers.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let build = rest[..digits].parse().ok()?;
    Some((
        KernelVersion {
            major,
            minor,
            patch,
            build,
        },
        &rest[digits..],
    ))
}

fn sorted_names(boot_dir: &Path) -> Result<Vec<String>> {
    let rd = match fs::read_dir(boot_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(OtaError::at(boot_dir, e)),
    };
    let mut names = Vec::new();
    for ent in rd {
        let ent = ent.map_err(|e| OtaError::at(boot_dir, e))?;
        if let Some(name) = ent.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Path of the newest kernel image in `boot_dir`, if any parses.
pub fn latest_kernel(boot_dir: &Path) -> Result<Option<PathBuf>> {
    let mut best: Option<(KernelVersion, String)> = None;
    for name in sorted_names(boot_dir)? {
        let Some(release) = name.strip_prefix(KERNEL_PREFIX) else {
            continue;
        };
        let Some((version, _)) = parse_release(release) else {
            continue;
        };
        // strict comparison keeps the first name among equal versions
        if best.as_ref().is_none_or(|(v, _)| version > *v) {
            best = Some((version, name));
        }
    }
    Ok(best.map(|(_, name)| boot_dir.join(name)))
}

/// Every kernel artifact in `boot_dir` other than the latest kernel's own
/// set. Empty when `extlinux/extlinux.conf` exists or no kernel parses.
pub fn list_non_latest_kernels(boot_dir: &Path) -> Result<Vec<PathBuf>> {
    if boot_dir.join(EXTLINUX_CONF).exists() {
        debug!(boot = %boot_dir.display(), "extlinux config present, kernel pruning skipped");
        return Ok(Vec::new());
    }
    let Some(latest) = latest_kernel(boot_dir)? else {
        return Ok(Vec::new());
    };
    let release = latest
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(KERNEL_PREFIX))
        .unwrap_or_default()
        .to_string();

    let initrd = boot_dir.join(format!("{INITRD_PREFIX}{release}"));
    if fs::symlink_metadata(&initrd).is_err() {
        return Err(OtaError::MissingInitrd { kernel: latest });
    }

    let keep: Vec<String> = ARTIFACT_PREFIXES
        .iter()
        .map(|p| format!("{p}{release}"))
        .collect();

    let mut out = Vec::new();
    for name in sorted_names(boot_dir)? {
        if !ARTIFACT_PREFIXES.iter().any(|p| name.starts_with(p)) || keep.contains(&name) {
            continue;
        }
        let path = boot_dir.join(&name);
        let is_link = fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .map_err(|e| OtaError::at(&path, e))?;
        if is_link {
            continue;
        }
        out.push(path);
    }
    debug!(latest = %latest.display(), stale = out.len(), "kernel artifacts");
    Ok(out)
}
