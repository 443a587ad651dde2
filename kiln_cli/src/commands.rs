//! Subcommand bodies. Kept thin: argument handling and printing live
//! here, everything else is a call into `kiln_engine`/`kiln_cache`.

use std::path::{Path, PathBuf};

use kiln_cache::ActionCache;
use kiln_core::ConstructionMode;
use kiln_engine::{Engine, EngineConfig, EngineError};
use kiln_handler::{GenericExecHandler, HandlerRegistry};
use tracing::info;

use crate::manifest;

fn default_registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    registry.register(std::sync::Arc::new(GenericExecHandler::new()));
    registry
}

/// `kiln build <manifest>`: loads the manifest, runs the engine to
/// completion, prints a one-line summary, and returns the process exit
/// code per `spec.md` §6.
pub fn build(manifest_path: &Path, cache_dir: &Path, continue_on_failure: bool) -> i32 {
    let graph = match manifest::load(manifest_path, ConstructionMode::default()) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("kiln: failed to load manifest: {e}");
            return 2;
        }
    };

    let workspace_root = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = EngineConfig::new(cache_dir.to_path_buf(), workspace_root);
    config.continue_on_failure = continue_on_failure;

    let engine = match Engine::open(graph, default_registry(), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("kiln: {e}");
            return e.exit_code();
        }
    };

    info!("starting build");
    let outcome = engine.run();
    println!(
        "build finished: {} succeeded, {} cached, {} failed",
        outcome.summary.succeeded, outcome.summary.cached, outcome.summary.failed
    );
    outcome.exit_code
}

/// `kiln cache stats [--cache-dir DIR]`: opens the cache read-only and
/// prints entry/blob counts and total size.
pub fn cache_stats(cache_dir: &Path) -> i32 {
    let cache = match ActionCache::open(cache_dir) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("kiln: failed to open cache at {}: {e}", cache_dir.display());
            return EngineError::Cache(e).exit_code();
        }
    };
    let stats = match cache.stats() {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("kiln: failed to read cache stats: {e}");
            return EngineError::Cache(e).exit_code();
        }
    };
    println!("entries:       {}", stats.entry_count);
    println!("  successes:   {}", stats.success_count);
    println!("  failures:    {}", stats.failure_count);
    println!("total size:    {} bytes", stats.total_size_bytes);
    0
}

/// Default total-size cap applied by `kiln cache gc` when
/// `BUILDER_ACTION_CACHE_MAX_SIZE` is unset.
const DEFAULT_GC_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;
/// Default max-age cap, in days, applied by `kiln cache gc` when
/// `BUILDER_ACTION_CACHE_MAX_AGE_DAYS` is unset.
const DEFAULT_GC_MAX_AGE_DAYS: u64 = 30;

/// `kiln cache gc [--cache-dir DIR]`: runs eviction to the configured
/// caps immediately, reading `BUILDER_ACTION_CACHE_MAX_SIZE` and
/// `BUILDER_ACTION_CACHE_MAX_AGE_DAYS` the same way a background
/// eviction pass would.
pub fn cache_gc(cache_dir: &Path) -> i32 {
    let cache = match ActionCache::open(cache_dir) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("kiln: failed to open cache at {}: {e}", cache_dir.display());
            return EngineError::Cache(e).exit_code();
        }
    };

    let max_size = kiln_core::env::ACTION_CACHE_MAX_SIZE
        .get_or(DEFAULT_GC_MAX_SIZE_BYTES)
        .unwrap_or(DEFAULT_GC_MAX_SIZE_BYTES);
    let max_age_days = kiln_core::env::ACTION_CACHE_MAX_AGE_DAYS
        .get_or(DEFAULT_GC_MAX_AGE_DAYS)
        .unwrap_or(DEFAULT_GC_MAX_AGE_DAYS);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut evicted = match cache.evict_to_size(max_size) {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("kiln: gc failed: {e}");
            return EngineError::Cache(e).exit_code();
        }
    };
    match cache.evict_older_than(now, max_age_days * 86_400) {
        Ok(keys) => evicted.extend(keys),
        Err(e) => {
            eprintln!("kiln: gc failed: {e}");
            return EngineError::Cache(e).exit_code();
        }
    }

    println!("evicted {} entries", evicted.len());
    0
}
