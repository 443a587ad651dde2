//! `Engine`: orchestrates one build end to end (`spec.md` §4.I).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_cache::ActionCache;
use kiln_core::{BuildGraph, ConstructionMode};
use kiln_events::{Event, EventBus, EventMask, MessageLevel};
use kiln_execute::HermeticExecutor;
use kiln_handler::{HandlerRegistry, Workspace};
use kiln_observability::{BuildSession, CheckpointWriter};
use kiln_scheduler::{BuildSummary, RetryPolicy, Scheduler};
use tracing::info;

use crate::error::EngineError;
use crate::shutdown::ShutdownCoordinator;

/// Cross-cutting policies the engine owns and the CLI configures
/// (`spec.md` §4.I: "max retries, worker count, strict/deferred cycle
/// mode, continue on failure").
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub worker_count: Option<usize>,
    pub continue_on_failure: bool,
    pub retry_policy: RetryPolicy,
    pub cycle_mode: ConstructionMode,
    pub event_queue_capacity: usize,
    /// How long a cached failure is trusted before a retry (or a later
    /// build) is allowed to re-attempt the action (`spec.md` §4.D "TTL
    /// shorter than successes"). Defaults to
    /// `kiln_cache::DEFAULT_FAILURE_TTL_SECS`.
    pub action_cache_failure_ttl_secs: u64,
}

impl EngineConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            workspace_root: workspace_root.into(),
            worker_count: None,
            continue_on_failure: false,
            retry_policy: RetryPolicy::default(),
            cycle_mode: ConstructionMode::default(),
            event_queue_capacity: 1024,
            action_cache_failure_ttl_secs: kiln_cache::DEFAULT_FAILURE_TTL_SECS,
        }
    }
}

#[derive(Debug)]
pub struct EngineOutcome {
    pub exit_code: i32,
    pub summary: BuildSummary,
}

/// Owns every long-lived build resource and drives one build to
/// completion. One `Engine` per invocation of `kiln build`.
pub struct Engine {
    scheduler: Scheduler,
    bus: Arc<EventBus>,
    session: Arc<BuildSession>,
    cache_dir: PathBuf,
    shutdown: ShutdownCoordinator,
    interrupted: Arc<AtomicBool>,
}

impl Engine {
    /// Opens the action cache, registers handlers, validates the graph
    /// (cycle rejection happens here, before any handler is invoked —
    /// `spec.md` §8 scenario 3), and wires the scheduler.
    pub fn open(
        mut graph: BuildGraph,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        graph.validate()?;

        let bus = Arc::new(EventBus::new(config.event_queue_capacity));
        let tamper_bus = bus.clone();
        let cache = Arc::new(
            ActionCache::open(&config.cache_dir)?
                .with_failure_ttl_secs(config.action_cache_failure_ttl_secs)
                .with_tamper_hook(Arc::new(move |key| {
                    tamper_bus.publish(Event::Message {
                        level: MessageLevel::Warning,
                        text: format!("cache entry {key} failed MAC verification and was evicted"),
                    });
                })),
        );
        let executor = Arc::new(HermeticExecutor::new());
        let registry = Arc::new(registry);
        let graph = Arc::new(graph);
        let workspace = Workspace::new(config.workspace_root.clone());

        let mut scheduler = Scheduler::new(
            graph,
            registry,
            cache.clone(),
            executor,
            bus.clone(),
            workspace,
        )
        .with_retry_policy(config.retry_policy)
        .with_continue_on_failure(config.continue_on_failure);
        if let Some(count) = config.worker_count {
            scheduler = scheduler.with_worker_count(count);
        }

        let worker_count = config.worker_count.unwrap_or_else(num_cpus::get);
        let session = Arc::new(BuildSession::new(worker_count));
        bus.subscribe(EventMask::default(), session.clone());

        let cache_dir = config.cache_dir.clone();
        let shutdown = ShutdownCoordinator::new();
        shutdown.register(move || info!("action cache closed"));

        Ok(Self {
            scheduler,
            bus,
            session,
            cache_dir,
            shutdown,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs the build to completion, installing a `ctrl_c` listener for
    /// graceful cancellation, then finalizes observability and releases
    /// resources via the `ShutdownCoordinator`.
    pub fn run(&self) -> EngineOutcome {
        self.install_signal_handler();

        let summary = match self.scheduler.run() {
            Ok(summary) => summary,
            Err(_) => BuildSummary::default(),
        };

        if let Some(checkpoint) = self.session.finalize() {
            if let Ok(writer) = CheckpointWriter::open(&self.cache_dir) {
                let _ = writer.write(&checkpoint);
            }
        }

        let exit_code = if self.interrupted.load(Ordering::SeqCst) {
            130
        } else if summary.failed > 0 {
            1
        } else {
            0
        };

        self.shutdown.shutdown();
        EngineOutcome { exit_code, summary }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn session(&self) -> Arc<BuildSession> {
        self.session.clone()
    }

    /// Exposes the validated graph for post-build introspection (node
    /// status, retry counts) — the engine itself never needs this, it's
    /// for callers that want to report per-target detail.
    pub fn graph(&self) -> &Arc<kiln_core::BuildGraph> {
        self.scheduler.graph()
    }

    fn install_signal_handler(&self) {
        let abort = self.scheduler.abort_flag();
        let interrupted = self.interrupted.clone();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(_) => return,
            };
            rt.block_on(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupted.store(true, Ordering::SeqCst);
                    abort.trigger();
                }
            });
        });
    }
}
