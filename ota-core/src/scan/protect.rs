//! Rescue rules for runtime artifacts that live inside otherwise disposable
//! workspace trees (`build/`, `src/`).
//!
//! A rule becomes active when one of the ignore rules' literal text matches
//! its `trigger`. While active, an ignored path matching `scope` survives if it
//! is a directory, or a file whose relative path matches one of `keep`.

use crate::error::{OtaError, Result};
use regex::Regex;
use regex::bytes::Regex as BytesRegex;
use serde::{Deserialize, Serialize};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Serialized form of one rule, as found in a policy JSON file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRuleSpec {
    pub trigger: String,
    pub scope: String,
    #[serde(default)]
    pub keep: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    pub rules: Vec<ProtectionRuleSpec>,
}

/// Install hooks, Python packaging metadata, shared objects.
const SAFE_ARTIFACTS: [&str; 4] = [
    r"/hook/",
    r"\.egg-info(/|$)",
    r"\.dist-info(/|$)",
    r"\.so(\.[0-9]+)*$",
];

impl PolicyFile {
    pub fn builtin() -> Self {
        let rule = |dir: &str| ProtectionRuleSpec {
            trigger: format!("(^|/){dir}/?$"),
            scope: format!("(^|/){dir}(/|$)"),
            keep: SAFE_ARTIFACTS.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            rules: vec![rule("build"), rule("src")],
        }
    }
}

#[derive(Clone, Debug)]
struct ProtectionRule {
    trigger: Regex,
    scope: BytesRegex,
    keep: Vec<BytesRegex>,
}

impl ProtectionRule {
    fn rescues(&self, rel: &[u8], is_dir: bool) -> bool {
        self.scope.is_match(rel) && (is_dir || self.keep.iter().any(|k| k.is_match(rel)))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProtectionPolicy {
    rules: Vec<ProtectionRule>,
}

impl ProtectionPolicy {
    /// Policy with no rules: ignored paths are never rescued.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        // literal patterns; an empty policy is only possible if they stop compiling
        Self::compile(&PolicyFile::builtin()).unwrap_or_default()
    }

    pub fn compile(file: &PolicyFile) -> Result<Self> {
        let bad = |what: &str, pat: &str, e: regex::Error| {
            OtaError::Policy(format!("{what} pattern {pat:?}: {e}"))
        };
        let mut rules = Vec::with_capacity(file.rules.len());
        for rule in &file.rules {
            let trigger = Regex::new(&rule.trigger).map_err(|e| bad("trigger", &rule.trigger, e))?;
            let scope =
                BytesRegex::new(&rule.scope).map_err(|e| bad("scope", &rule.scope, e))?;
            let keep = rule
                .keep
                .iter()
                .map(|k| BytesRegex::new(k).map_err(|e| bad("keep", k, e)))
                .collect::<Result<Vec<_>>>()?;
            rules.push(ProtectionRule {
                trigger,
                scope,
                keep,
            });
        }
        Ok(Self { rules })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: PolicyFile =
            serde_json::from_str(text).map_err(|e| OtaError::Policy(e.to_string()))?;
        Self::compile(&file)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| OtaError::at(path, e))?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Narrow the policy to the rules triggered by `ignore_rules`.
    pub fn activate<S: AsRef<str>>(&self, ignore_rules: &[S]) -> ActiveProtection<'_> {
        let rules = self
            .rules
            .iter()
            .filter(|r| ignore_rules.iter().any(|t| r.trigger.is_match(t.as_ref())))
            .collect();
        ActiveProtection { rules }
    }
}

#[derive(Debug)]
pub struct ActiveProtection<'a> {
    rules: Vec<&'a ProtectionRule>,
}

impl ActiveProtection<'_> {
    pub fn is_active(&self) -> bool {
        !self.rules.is_empty()
    }

    /// `rel` is relative to the scanned root.
    pub fn rescues(&self, rel: &Path, is_dir: bool) -> bool {
        let bytes = rel.as_os_str().as_bytes();
        self.rules.iter().any(|r| r.rescues(bytes, is_dir))
    }
}
