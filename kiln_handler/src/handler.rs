//! The handler contract (`spec.md` §4.G/§6): the engine never invokes a
//! compiler directly, it always goes through the handler registered for
//! a target's language tag.

use std::path::PathBuf;

use async_trait::async_trait;
use kiln_cache::ActionCache;
use kiln_core::{LanguageTag, Target};
use kiln_execute::HermeticExecutor;

use crate::action::{Action, ActionResult};
use crate::error::HandlerError;

/// A workspace root and any handler-agnostic paths a plan needs. Kept
/// deliberately small; handlers reach into `Target::config` for
/// anything language-specific.
#[derive(Clone, Debug)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// A pluggable, per-language build handler.
///
/// `plan` must be pure (no I/O, no side effects) so the engine can call
/// it speculatively and cache its result; all side effects happen in
/// `execute`. Handlers must not mutate the build graph directly — any
/// target discovered while planning goes through the dynamic-target
/// interface the engine exposes instead.
#[async_trait]
pub trait Handler: Send + Sync {
    fn language_tag(&self) -> LanguageTag;

    fn plan(&self, target: &Target, workspace: &Workspace) -> Result<Vec<Action>, HandlerError>;

    async fn execute(
        &self,
        action: &Action,
        cache: &ActionCache,
        executor: &HermeticExecutor,
    ) -> Result<ActionResult, HandlerError>;

    fn outputs(&self, target: &Target, workspace: &Workspace) -> Vec<PathBuf>;
}
