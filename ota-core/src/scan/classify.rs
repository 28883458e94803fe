use crate::error::{OtaError, Result};
use crate::scan::ignore::IgnoreRules;
use crate::scan::kernel::list_non_latest_kernels;
use crate::scan::protect::ProtectionPolicy;
use crate::util::paths::{ancestors_of, normalize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Paths selected for removal, relative to the scanned root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deletions {
    /// Stale kernel artifacts and anything below them.
    pub kernels: BTreeSet<PathBuf>,
    pub ignored: BTreeSet<PathBuf>,
}

impl Deletions {
    pub fn len(&self) -> usize {
        self.kernels.len() + self.ignored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty() && self.ignored.is_empty()
    }

    pub fn contains(&self, rel: &Path) -> bool {
        self.kernels.contains(rel) || self.ignored.contains(rel)
    }

    fn rescue(&mut self, rel: &Path) -> bool {
        let k = self.kernels.remove(rel);
        let i = self.ignored.remove(rel);
        k || i
    }
}

/// Outcome of a scan. All paths are relative to the root, sorted so every
/// directory precedes its contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub dirs: BTreeSet<PathBuf>,
    pub symlinks: BTreeSet<PathBuf>,
    pub regulars: BTreeSet<PathBuf>,
    pub deletions: Deletions,
}

/// Partition every path under `root` into kept entries and deletions.
/// Nothing on disk is modified.
pub fn classify(
    root: &Path,
    ignore: &IgnoreRules,
    policy: &ProtectionPolicy,
) -> Result<Classification> {
    let mut out = Classification::default();

    let stale_kernels: Vec<PathBuf> = list_non_latest_kernels(&root.join("boot"))?
        .into_iter()
        .filter_map(|p| p.strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    let protection = policy.activate(ignore.rules());
    if protection.is_active() {
        debug!("build/src protection enabled by ignore rules");
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.loop_ancestor().is_some() => {
                warn!(error = %e, "filesystem loop, subtree skipped");
                continue;
            }
            Err(e) => return Err(OtaError::Walk(e)),
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_path_buf();
        let ft = entry.file_type();

        if ft.is_symlink() {
            out.symlinks.insert(rel);
            continue;
        }
        let is_dir = ft.is_dir();

        if stale_kernels.iter().any(|k| rel.starts_with(k)) {
            out.deletions.kernels.insert(rel);
            continue;
        }
        if ignore.is_ignored_rel(&rel, is_dir) && !protection.rescues(&rel, is_dir) {
            out.deletions.ignored.insert(rel);
            continue;
        }

        if is_dir {
            out.dirs.insert(rel);
        } else if ft.is_file() {
            out.regulars.insert(rel);
        } else {
            debug!(path = %rel.display(), "special file not recorded");
        }
    }

    protect_symlink_targets(root, &mut out)?;
    close_ancestors(&mut out);

    info!(
        dirs = out.dirs.len(),
        symlinks = out.symlinks.len(),
        regulars = out.regulars.len(),
        kernels = out.deletions.kernels.len(),
        ignored = out.deletions.ignored.len(),
        "classified {}",
        root.display()
    );
    Ok(out)
}

/// Where the link at `link_rel` points, as an absolute, lexically normalised
/// path. Absolute targets are taken relative to `root`.
pub fn resolve_link_target(root: &Path, link_rel: &Path, target: &Path) -> PathBuf {
    let joined = if target.is_absolute() {
        let inner: PathBuf = target
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        root.join(inner)
    } else {
        root.join(link_rel.parent().unwrap_or(Path::new(""))).join(target)
    };
    normalize(&joined)
}

/// Keep every path on the way to an existing in-root symlink target.
/// Stale kernel artifacts are not rescued; a link to one is left dangling.
fn protect_symlink_targets(root: &Path, out: &mut Classification) -> Result<()> {
    let root = normalize(root);
    let links: Vec<PathBuf> = out.symlinks.iter().cloned().collect();
    for link in links {
        let target = fs::read_link(root.join(&link)).map_err(|e| OtaError::at(root.join(&link), e))?;
        let resolved = resolve_link_target(&root, &link, &target);
        let Ok(target_rel) = resolved.strip_prefix(&root) else {
            debug!(link = %link.display(), "target outside root");
            continue;
        };
        if target_rel.as_os_str().is_empty() || fs::metadata(&resolved).is_err() {
            continue;
        }

        let mut cur = PathBuf::new();
        for comp in target_rel.components() {
            cur.push(comp);
            let md = match fs::symlink_metadata(root.join(&cur)) {
                Ok(md) => md,
                Err(_) => break,
            };
            let ft = md.file_type();
            if ft.is_symlink() {
                break;
            }
            if out.deletions.kernels.contains(&cur) {
                debug!(path = %cur.display(), link = %link.display(), "link into stale kernel");
                break;
            }
            if out.deletions.rescue(&cur) {
                debug!(path = %cur.display(), link = %link.display(), "kept as symlink target");
            }
            if ft.is_dir() {
                out.dirs.insert(cur.clone());
            } else if ft.is_file() {
                out.regulars.insert(cur.clone());
            }
        }
    }
    Ok(())
}

/// Every kept path keeps its ancestors.
fn close_ancestors(out: &mut Classification) {
    let kept: Vec<PathBuf> = out
        .dirs
        .iter()
        .chain(&out.symlinks)
        .chain(&out.regulars)
        .cloned()
        .collect();
    for path in kept {
        for anc in ancestors_of(&path) {
            if out.dirs.contains(&anc) {
                continue;
            }
            out.deletions.rescue(&anc);
            out.dirs.insert(anc);
        }
    }
}
