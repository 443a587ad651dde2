//! `GenericExecHandler` — a built-in handler for targets that declare a
//! literal `argv` in their config blob rather than needing
//! language-specific planning. Useful for shell-script targets, and as
//! the reference implementation new handlers are grounded on.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use kiln_cache::{ActionCache, ActionEntry, Reservation};
use kiln_core::{ActionId, ActionKind, LanguageTag, Target};
use kiln_execute::{ExecutionSpec, HermeticExecutor};

use crate::action::{Action, ActionResult};
use crate::error::HandlerError;
use crate::handler::{Handler, Workspace};

pub const LANGUAGE_TAG: &str = "generic_exec";

/// Seconds since the Unix epoch, for cache timestamping. Falls back to
/// `0` only if the system clock is set before 1970.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct GenericExecHandler;

impl GenericExecHandler {
    pub fn new() -> Self {
        Self
    }

    fn argv(target: &Target) -> Result<Vec<String>, HandlerError> {
        let value = target.config.get("argv").ok_or_else(|| HandlerError::InvalidTarget {
            target: target.id.canonical(),
            reason: "generic_exec target requires an \"argv\" config entry".to_string(),
        })?;
        let argv: Vec<String> = serde_json::from_value(value.clone()).map_err(|e| {
            HandlerError::InvalidTarget {
                target: target.id.canonical(),
                reason: format!("argv must be a list of strings: {e}"),
            }
        })?;
        if argv.is_empty() {
            return Err(HandlerError::InvalidTarget {
                target: target.id.canonical(),
                reason: "argv must not be empty".to_string(),
            });
        }
        Ok(argv)
    }
}

impl Default for GenericExecHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for GenericExecHandler {
    fn language_tag(&self) -> LanguageTag {
        LanguageTag::new(LANGUAGE_TAG)
    }

    fn plan(&self, target: &Target, _workspace: &Workspace) -> Result<Vec<Action>, HandlerError> {
        let argv = Self::argv(target)?;
        let inputs: Vec<PathBuf> = target.sources.iter().map(PathBuf::from).collect();
        let outputs = self.outputs(target, &Workspace::new("."));

        let input_hash = kiln_hash::hash_sequence(
            inputs
                .iter()
                .map(|p| p.display().to_string())
                .chain(argv.iter().cloned()),
        );
        let id = ActionId::new(target.id.clone(), ActionKind::Custom, input_hash);

        let action = Action::new(id, argv)
            .with_inputs(inputs)
            .with_outputs(outputs);
        Ok(vec![action])
    }

    async fn execute(
        &self,
        action: &Action,
        cache: &ActionCache,
        executor: &HermeticExecutor,
    ) -> Result<ActionResult, HandlerError> {
        use kiln_cache::{compute_action_key, ToolIdentity};

        let tool = ToolIdentity {
            name: LANGUAGE_TAG.to_string(),
            version: "1".to_string(),
            flags: Vec::new(),
        };
        let key = compute_action_key(&action.id, &action.metadata, &tool);

        let now = unix_now();
        let reservation = cache.reserve(&key, now).await?;
        let permit = match reservation {
            Reservation::Cached(entry) => {
                return Ok(ActionResult {
                    action_id: action.id.clone(),
                    success: entry.success,
                    output_hashes: entry.output_hashes,
                    non_hermetic: false,
                    cache_hit: true,
                });
            }
            Reservation::Build(permit) => permit,
        };

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let spec = ExecutionSpec::new(action.argv.clone(), cwd.clone())
            .with_inputs(action.inputs.clone())
            .with_outputs(action.outputs.clone())
            .with_limits(action.limits.clone());

        let exec_result = executor.execute(&spec).await;

        let (success, output_hashes, non_hermetic) = match exec_result {
            Ok(result) => (result.succeeded(), result.output_hashes, result.non_hermetic),
            Err(_) => (false, BTreeMap::new(), false),
        };

        let mut total_size: u64 = 0;
        if success {
            for name in output_hashes.keys() {
                let full_path = cwd.join(name);
                let bytes = std::fs::read(&full_path).map_err(|e| {
                    HandlerError::Cache(kiln_cache::CacheError::Io {
                        path: full_path.display().to_string(),
                        source: e,
                    })
                })?;
                total_size += bytes.len() as u64;
                cache.blobs().put(&bytes)?;
            }
        }

        let entry = if success {
            ActionEntry::new_success(output_hashes.clone(), total_size, now)
        } else {
            ActionEntry::new_failure(now)
        };
        cache.record(permit, entry)?;

        Ok(ActionResult {
            action_id: action.id.clone(),
            success,
            output_hashes,
            non_hermetic,
            cache_hit: false,
        })
    }

    fn outputs(&self, target: &Target, _workspace: &Workspace) -> Vec<PathBuf> {
        target
            .output_hint
            .as_ref()
            .map(|hint| vec![PathBuf::from(hint)])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{Target, TargetId, TargetKind};
    use serde_json::json;

    fn target_with_argv(argv: Vec<&str>) -> Target {
        let mut t = Target::new(
            TargetId::new("ws", "pkg", "name"),
            TargetKind::Custom,
            LanguageTag::new(LANGUAGE_TAG),
        );
        t.config.insert(
            "argv".to_string(),
            json!(argv.into_iter().map(String::from).collect::<Vec<_>>()),
        );
        t
    }

    #[test]
    fn plan_produces_one_action_from_argv() {
        let handler = GenericExecHandler::new();
        let target = target_with_argv(vec!["echo", "hi"]);
        let actions = handler.plan(&target, &Workspace::new(".")).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].argv, vec!["echo", "hi"]);
    }

    #[test]
    fn plan_rejects_target_without_argv() {
        let handler = GenericExecHandler::new();
        let target = Target::new(
            TargetId::new("ws", "pkg", "name"),
            TargetKind::Custom,
            LanguageTag::new(LANGUAGE_TAG),
        );
        assert!(handler.plan(&target, &Workspace::new(".")).is_err());
    }

    #[tokio::test]
    async fn execute_runs_command_and_caches_result() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActionCache::open(dir.path()).unwrap();
        let executor = HermeticExecutor::new();
        let handler = GenericExecHandler::new();

        let target = target_with_argv(vec!["true"]);
        let action = handler.plan(&target, &Workspace::new(".")).unwrap().remove(0);

        let result = handler.execute(&action, &cache, &executor).await.unwrap();
        assert!(result.success);
        assert!(!result.cache_hit, "first execution must not be a cache hit");

        let result2 = handler.execute(&action, &cache, &executor).await.unwrap();
        assert!(result2.success);
        assert!(result2.cache_hit, "second execution must reuse the cached entry");
    }
}
