//! Core data model for kiln: targets, the build graph, action identity,
//! the `BuildStatus` state machine, shared error taxonomy, and typed
//! environment configuration. See `SPEC_FULL.md` §3–§4.E.

pub mod action;
pub mod env;
pub mod error;
pub mod graph;
pub mod node;
pub mod status;
pub mod target;

pub use action::{ActionId, ActionKind, ActionKey};
pub use error::{BuildError, BuildErrorKind, ConfigError, GraphError};
pub use graph::{BuildGraph, ConstructionMode};
pub use node::BuildNode;
pub use status::{BuildStatus, FailureReason};
pub use target::{DependencyRef, LanguageTag, Target, TargetId, TargetKind};
