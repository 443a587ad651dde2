//! Error taxonomy shared across the workspace (`spec.md` §7).
//!
//! Leaf crates define their own `thiserror` enums for kinds specific to
//! their layer (`CacheError` in `kiln_cache`, `ExecutionError` in
//! `kiln_execute`, `ResilienceError` in `kiln_resilience`, ...). This
//! module defines the kinds that belong to the core data model
//! (`ConfigError`, `GraphError`) plus [`BuildError`], the aggregating enum
//! that carries a cause chain and a context breadcrumb trail, matching the
//! propagation policy in `spec.md` §7 without forcing every crate onto
//! `anyhow`.

use crate::target::TargetId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("duplicate target: {0}")]
    DuplicateTarget(TargetId),
    #[error("invalid target id: {0}")]
    InvalidTargetId(String),
    #[error("invalid metadata for target {target}: {reason}")]
    InvalidMetadata { target: TargetId, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("dependency edge {from} -> {to} references a missing target")]
    MissingDependency { from: TargetId, to: TargetId },
    #[error("cycle detected: {}", format_cycle(.0))]
    Cycle(Vec<TargetId>),
}

fn format_cycle(path: &[TargetId]) -> String {
    path.iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A single breadcrumb: which operation, on which target, was in flight
/// when an error was raised or rethrown.
#[derive(Debug, Clone)]
pub struct Breadcrumb {
    pub operation: &'static str,
    pub target: Option<TargetId>,
}

impl std::fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(t) => write!(f, "{} (target {t})", self.operation),
            None => write!(f, "{}", self.operation),
        }
    }
}

/// The top-level structured error propagated across component boundaries.
///
/// Carries the original typed cause plus an accumulated breadcrumb trail,
/// appended to by each layer that rethrows it (outermost caller reads
/// first-to-last as "what was happening, in order, when this failed").
#[derive(Debug, thiserror::Error)]
#[error("{kind}{}", format_trail(.breadcrumbs))]
pub struct BuildError {
    #[source]
    pub kind: BuildErrorKind,
    pub breadcrumbs: Vec<Breadcrumb>,
}

fn format_trail(trail: &[Breadcrumb]) -> String {
    if trail.is_empty() {
        String::new()
    } else {
        let joined = trail
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" <- ");
        format!(" [while: {joined}]")
    }
}

/// The taxonomy of fallible operations named in `spec.md` §7. Each variant
/// wraps the owning crate's typed error via `#[from]` where that crate is a
/// dependency of `kiln_core`; kinds owned by crates that depend on
/// `kiln_core` instead (cache, execute, resilience, scheduler) are
/// represented as opaque, already-formatted strings, since `kiln_core`
/// cannot name their concrete error types without an upward dependency.
#[derive(Debug, thiserror::Error)]
pub enum BuildErrorKind {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("input error: {0}")]
    Input(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("resilience error: {0}")]
    Resilience(String),
    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    pub fn new(kind: impl Into<BuildErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            breadcrumbs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_breadcrumb(mut self, operation: &'static str, target: Option<TargetId>) -> Self {
        self.breadcrumbs.push(Breadcrumb { operation, target });
        self
    }
}
