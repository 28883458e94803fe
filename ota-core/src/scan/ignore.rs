//! Gitignore-style exclusion rules evaluated against a base directory.
//!
//! - blank lines and `#` comments are skipped; `\#` and `\!` escape them
//! - `!pattern` re-includes a path excluded by an earlier rule
//! - a trailing `/` restricts the rule to directories
//! - a `/` at the start or in the middle anchors the rule to the base,
//!   otherwise it matches at any depth (implicit `**/`)
//! - the last matching rule wins, and nothing below an excluded directory
//!   can be re-included

use crate::error::{OtaError, Result};
use crate::util::paths::ancestors_of;
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
struct CompiledRule {
    negated: bool,
    dir_only: bool,
    matcher: GlobMatcher,
}

#[derive(Clone, Debug)]
pub struct IgnoreRules {
    base: PathBuf,
    rules: Vec<String>,
    compiled: Vec<CompiledRule>,
}

impl IgnoreRules {
    /// No rules: nothing is ignored.
    pub fn empty(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            rules: Vec::new(),
            compiled: Vec::new(),
        }
    }

    pub fn parse(base: &Path, text: &str) -> Result<Self> {
        let mut out = Self::empty(base);
        for line in text.lines() {
            out.add_rule(line)?;
        }
        Ok(out)
    }

    pub fn from_file(base: &Path, file: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(file).map_err(|e| OtaError::at(file, e))?;
        Self::parse(base, &text)
    }

    /// Add one line of ignore-file text. Blank and comment lines are accepted
    /// and dropped.
    pub fn add_rule(&mut self, line: &str) -> Result<()> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let line = trim_trailing_spaces(line);
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let (negated, mut pat) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        if pat.starts_with("\\#") || pat.starts_with("\\!") {
            pat = &pat[1..];
        }
        let dir_only = pat.ends_with('/');
        let pat = pat.trim_end_matches('/');
        if pat.is_empty() {
            return Ok(());
        }
        let anchored = pat.contains('/');
        let pat = pat.trim_start_matches('/');
        let glob = if anchored {
            pat.to_string()
        } else {
            format!("**/{pat}")
        };

        let matcher = GlobBuilder::new(&glob)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source| OtaError::Pattern {
                pattern: line.to_string(),
                source,
            })?
            .compile_matcher();

        self.rules.push(line.to_string());
        self.compiled.push(CompiledRule {
            negated,
            dir_only,
            matcher,
        });
        Ok(())
    }

    /// Literal text of every effective rule, in file order.
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Whether `abs_path` (under the base) is excluded. Paths outside the
    /// base and the base itself are never ignored.
    pub fn is_ignored(&self, abs_path: &Path, is_dir: bool) -> bool {
        match abs_path.strip_prefix(&self.base) {
            Ok(rel) => self.is_ignored_rel(rel, is_dir),
            Err(_) => false,
        }
    }

    pub fn is_ignored_rel(&self, rel: &Path, is_dir: bool) -> bool {
        if rel.as_os_str().is_empty() || self.compiled.is_empty() {
            return false;
        }
        if ancestors_of(rel)
            .iter()
            .any(|anc| self.last_match(anc, true) == Some(true))
        {
            return true;
        }
        self.last_match(rel, is_dir) == Some(true)
    }

    fn last_match(&self, rel: &Path, is_dir: bool) -> Option<bool> {
        self.compiled
            .iter()
            .rev()
            .find(|r| (is_dir || !r.dir_only) && r.matcher.is_match(rel))
            .map(|r| !r.negated)
    }
}

fn trim_trailing_spaces(line: &str) -> &str {
    let mut end = line.len();
    let bytes = line.as_bytes();
    while end > 0 && bytes[end - 1] == b' ' {
        if end >= 2 && bytes[end - 2] == b'\\' {
            break;
        }
        end -= 1;
    }
    &line[..end]
}
