//! The target manifest: a minimal, explicitly-not-a-DSL JSON/TOML list
//! of target records (`SPEC_FULL.md` §6). Parsing this is not a general
//! build-language front end — deps are plain canonical target-id
//! strings, not the symbolic `:sibling` shorthand `kiln_core` models for
//! a fuller language.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_core::{BuildGraph, ConstructionMode, LanguageTag, Target, TargetId, TargetKind};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error(transparent)]
    Graph(#[from] kiln_core::GraphError),
    #[error("target {0} depends on {1}, which is not declared in this manifest")]
    UnknownDependency(String, String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ManifestTargetKind {
    Executable,
    Library,
    Test,
    Custom,
}

impl From<ManifestTargetKind> for TargetKind {
    fn from(kind: ManifestTargetKind) -> Self {
        match kind {
            ManifestTargetKind::Executable => TargetKind::Executable,
            ManifestTargetKind::Library => TargetKind::Library,
            ManifestTargetKind::Test => TargetKind::Test,
            ManifestTargetKind::Custom => TargetKind::Custom,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestTarget {
    /// Canonical `workspace//path:name` string.
    id: String,
    kind: ManifestTargetKind,
    language: String,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    targets: Vec<ManifestTarget>,
}

/// Loads a target manifest from `path`, inferring JSON vs TOML from the
/// extension (`.toml` is TOML, anything else is JSON), and builds a
/// `BuildGraph` from it. The graph is returned unvalidated; the caller
/// (the engine) runs cycle detection.
pub fn load(path: &Path, mode: ConstructionMode) -> Result<BuildGraph, ManifestError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let manifest: ManifestFile = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        toml::from_str(&raw).map_err(|e| ManifestError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::from_str(&raw).map_err(|e| ManifestError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    };

    let mut graph = BuildGraph::new(mode);

    for entry in &manifest.targets {
        let id: TargetId = entry.id.parse().map_err(|_| ManifestError::Parse {
            path: path.display().to_string(),
            reason: format!("invalid target id {:?}", entry.id),
        })?;
        let mut target = Target::new(id, entry.kind.into(), LanguageTag::new(&entry.language))
            .with_sources(entry.sources.clone());
        target.output_hint = entry.output.clone();
        target.config = entry.config.clone();
        target.flags = entry.flags.clone();
        graph.add_target(target)?;
    }

    for entry in &manifest.targets {
        let from: TargetId = entry.id.parse().expect("validated above");
        for dep in &entry.deps {
            let to: TargetId = dep.parse().map_err(|_| ManifestError::UnknownDependency(
                entry.id.clone(),
                dep.clone(),
            ))?;
            graph.add_dependency(from.clone(), to)?;
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_json_manifest_with_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            "targets.json",
            r#"{
                "targets": [
                    {"id": "ws//pkg:lib", "kind": "library", "language": "generic_exec",
                     "sources": ["lib.rs"], "config": {"argv": ["true"]}},
                    {"id": "ws//pkg:bin", "kind": "executable", "language": "generic_exec",
                     "sources": ["main.rs"], "deps": ["ws//pkg:lib"],
                     "config": {"argv": ["true"]}}
                ]
            }"#,
        );

        let graph = load(&path, ConstructionMode::Deferred).unwrap();
        assert_eq!(graph.len(), 2);
        let bin = TargetId::new("ws", "pkg", "bin");
        let lib = TargetId::new("ws", "pkg", "lib");
        assert!(graph.dependencies_of(&bin).contains(&lib));
    }

    #[test]
    fn loads_toml_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            "targets.toml",
            r#"
            [[targets]]
            id = "ws//pkg:only"
            kind = "custom"
            language = "generic_exec"
            sources = []
            [targets.config]
            argv = ["true"]
            "#,
        );

        let graph = load(&path, ConstructionMode::Deferred).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn rejects_dependency_on_undeclared_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            "targets.json",
            r#"{
                "targets": [
                    {"id": "ws//pkg:bin", "kind": "executable", "language": "generic_exec",
                     "deps": ["ws//pkg:missing"], "config": {"argv": ["true"]}}
                ]
            }"#,
        );

        assert!(load(&path, ConstructionMode::Deferred).is_err());
    }
}
