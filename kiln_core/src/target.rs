//! The user-declared unit of build work and its canonical identity.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `(workspace, package_path, name)`, total-ordered, with canonical string
/// form `workspace//path:name`. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    workspace: String,
    package_path: String,
    name: String,
}

impl TargetId {
    pub fn new(
        workspace: impl Into<String>,
        package_path: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            package_path: package_path.into(),
            name: name.into(),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical string form: `workspace//path:name`.
    pub fn canonical(&self) -> String {
        format!("{}//{}:{}", self.workspace, self.package_path, self.name)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Ordering key used for this type and for the scheduler's ready-node
/// tie-break (`spec.md` §4.E: "target_id lex ascending").
impl PartialOrd for TargetId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetId {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.workspace, &self.package_path, &self.name).cmp(&(
            &other.workspace,
            &other.package_path,
            &other.name,
        ))
    }
}

impl FromStr for TargetId {
    type Err = ConfigError;

    /// Parses `workspace//path:name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (workspace, rest) = s
            .split_once("//")
            .ok_or_else(|| ConfigError::InvalidTargetId(s.to_owned()))?;
        let (package_path, name) = rest
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidTargetId(s.to_owned()))?;
        Ok(TargetId::new(workspace, package_path, name))
    }
}

/// The kind of build artifact a target produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Executable,
    Library,
    Test,
    Custom,
}

/// A language tag identifying which [`kiln_handler`]-style handler owns a
/// target. Defined here (rather than in the handler crate) so that
/// `kiln_core` has no dependency on `kiln_handler`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguageTag(pub String);

impl LanguageTag {
    pub fn new(tag: impl Into<String>) -> Self {
        LanguageTag(tag.into())
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dependency reference as declared by the user; `Resolved` is the
/// common case, `Symbolic` stands for references like `:sibling` that are
/// resolved relative to the declaring target's package at graph
/// construction time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyRef {
    Resolved(TargetId),
    Symbolic(String),
}

/// User-declared unit of build work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub language: LanguageTag,
    pub sources: Vec<String>,
    pub dependencies: Vec<DependencyRef>,
    pub output_hint: Option<String>,
    /// Opaque, language-specific configuration blob interpreted only by the
    /// handler for `language`.
    pub config: BTreeMap<String, serde_json::Value>,
    pub flags: Vec<String>,
}

impl Target {
    pub fn new(id: TargetId, kind: TargetKind, language: LanguageTag) -> Self {
        Self {
            id,
            kind,
            language,
            sources: Vec::new(),
            dependencies: Vec::new(),
            output_hint: None,
            config: BTreeMap::new(),
            flags: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = String>) -> Self {
        self.sources = sources.into_iter().collect();
        self
    }

    pub fn with_dependency(mut self, dep: TargetId) -> Self {
        self.dependencies.push(DependencyRef::Resolved(dep));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_roundtrip() {
        let id = TargetId::new("ws", "a/b", "lib");
        assert_eq!(id.canonical(), "ws//a/b:lib");
        let parsed: TargetId = id.canonical().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn ordering_is_lexicographic_by_triple() {
        let a = TargetId::new("ws", "a", "x");
        let b = TargetId::new("ws", "a", "y");
        let c = TargetId::new("ws", "b", "a");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("not-a-target".parse::<TargetId>().is_err());
        assert!("ws//path".parse::<TargetId>().is_err());
    }
}
