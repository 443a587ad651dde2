//! The work-stealing worker pool (`spec.md` §4.H): a fixed pool of `N`
//! workers, each with its own deque, pulling ready nodes from a shared
//! injector or by stealing from a sibling, dispatching through the
//! handler registry, and pushing newly-ready dependents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use kiln_cache::ActionCache;
use kiln_core::{BuildError, BuildGraph, BuildStatus, FailureReason, TargetId};
use kiln_events::{Event, EventBus};
use kiln_execute::HermeticExecutor;
use kiln_handler::{HandlerRegistry, Workspace};
use rand::seq::SliceRandom;

use crate::abort::AbortFlag;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildSummary {
    pub succeeded: usize,
    pub cached: usize,
    pub failed: usize,
}

pub struct Scheduler {
    graph: Arc<BuildGraph>,
    registry: Arc<HandlerRegistry>,
    cache: Arc<ActionCache>,
    executor: Arc<HermeticExecutor>,
    bus: Arc<EventBus>,
    abort: AbortFlag,
    retry_policy: RetryPolicy,
    worker_count: usize,
    continue_on_failure: bool,
    workspace: Workspace,
}

impl Scheduler {
    pub fn new(
        graph: Arc<BuildGraph>,
        registry: Arc<HandlerRegistry>,
        cache: Arc<ActionCache>,
        executor: Arc<HermeticExecutor>,
        bus: Arc<EventBus>,
        workspace: Workspace,
    ) -> Self {
        Self {
            graph,
            registry,
            cache,
            executor,
            bus,
            abort: AbortFlag::new(),
            retry_policy: RetryPolicy::default(),
            worker_count: default_worker_count(),
            continue_on_failure: false,
            workspace,
        }
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    pub fn graph(&self) -> &Arc<BuildGraph> {
        &self.graph
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Runs the build to completion (or cancellation), returning a
    /// summary of terminal node outcomes.
    pub fn run(&self) -> Result<BuildSummary, BuildError> {
        let injector: Arc<Injector<TargetId>> = Arc::new(Injector::new());
        let workers: Vec<Worker<TargetId>> = (0..self.worker_count)
            .map(|_| Worker::new_fifo())
            .collect();
        let stealers: Arc<Vec<Stealer<TargetId>>> =
            Arc::new(workers.iter().map(|w| w.stealer()).collect());

        for id in self.graph.ready_nodes() {
            if let Some(node) = self.graph.node(&id) {
                if node.transition(BuildStatus::Ready) && node.try_claim_ready_enqueue() {
                    injector.push(id);
                }
            }
        }

        let active = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));
        let total = self.graph.all_ids().len() as u64;

        self.bus.publish(Event::BuildStarted {
            target_count: total as usize,
        });

        let handles: Vec<_> = workers
            .into_iter()
            .enumerate()
            .map(|(idx, local)| {
                let ctx = WorkerContext {
                    graph: self.graph.clone(),
                    registry: self.registry.clone(),
                    cache: self.cache.clone(),
                    executor: self.executor.clone(),
                    bus: self.bus.clone(),
                    abort: self.abort.clone(),
                    retry_policy: self.retry_policy,
                    continue_on_failure: self.continue_on_failure,
                    workspace: self.workspace.clone(),
                    injector: injector.clone(),
                    stealers: stealers.clone(),
                    active: active.clone(),
                    completed: completed.clone(),
                    total,
                };
                std::thread::Builder::new()
                    .name(format!("kiln-worker-{idx}"))
                    .spawn(move || ctx.run(local))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        for handle in handles {
            let _ = handle.join();
        }

        let mut summary = BuildSummary::default();
        for id in self.graph.all_ids() {
            if let Some(node) = self.graph.node(&id) {
                match node.status() {
                    BuildStatus::Success => summary.succeeded += 1,
                    BuildStatus::Cached => summary.cached += 1,
                    BuildStatus::Failed => summary.failed += 1,
                    _ => {}
                }
            }
        }

        self.bus.publish(Event::BuildCompleted {
            succeeded: summary.succeeded,
            cached: summary.cached,
            failed: summary.failed,
        });

        Ok(summary)
    }
}

fn default_worker_count() -> usize {
    let cpus = num_cpus::get();
    let configured = std::env::var("BUILDER_PARALLEL")
        .ok()
        .and_then(|s| s.parse::<usize>().ok());
    match configured {
        Some(max) => cpus.min(max).max(1),
        None => cpus.max(1),
    }
}

struct WorkerContext {
    graph: Arc<BuildGraph>,
    registry: Arc<HandlerRegistry>,
    cache: Arc<ActionCache>,
    executor: Arc<HermeticExecutor>,
    bus: Arc<EventBus>,
    abort: AbortFlag,
    retry_policy: RetryPolicy,
    continue_on_failure: bool,
    workspace: Workspace,
    injector: Arc<Injector<TargetId>>,
    stealers: Arc<Vec<Stealer<TargetId>>>,
    active: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    total: u64,
}

impl WorkerContext {
    fn run(self, local: Worker<TargetId>) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build per-worker tokio runtime");

        let mut idle_spins = 0u32;
        loop {
            if self.abort.is_set() {
                return;
            }

            let next = local.pop().or_else(|| self.steal_from_injector(&local)).or_else(|| self.steal_from_sibling(&local));

            let Some(target_id) = next else {
                if self.completed.load(Ordering::Acquire) >= self.total {
                    return;
                }
                idle_spins += 1;
                std::thread::sleep(Duration::from_millis((idle_spins.min(20)) as u64));
                continue;
            };
            idle_spins = 0;

            self.active.fetch_add(1, Ordering::AcqRel);
            rt.block_on(self.process_target(&target_id, &local));
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn steal_from_injector(&self, local: &Worker<TargetId>) -> Option<TargetId> {
        loop {
            match self.injector.steal_batch_and_pop(local) {
                Steal::Success(id) => return Some(id),
                Steal::Retry => continue,
                Steal::Empty => return None,
            }
        }
    }

    fn steal_from_sibling(&self, local: &Worker<TargetId>) -> Option<TargetId> {
        let mut order: Vec<usize> = (0..self.stealers.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        for idx in order {
            loop {
                match self.stealers[idx].steal_batch_and_pop(local) {
                    Steal::Success(id) => return Some(id),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    async fn process_target(&self, target_id: &TargetId, local: &Worker<TargetId>) {
        let Some(node) = self.graph.node(target_id) else {
            return;
        };

        if !node.transition(BuildStatus::Running) {
            return;
        }
        self.bus.publish(Event::TargetStarted {
            target: target_id.clone(),
        });

        let outcome = self.run_actions(target_id).await;

        match outcome {
            Ok(ActionsOutcome::AllCached { output_hash }) => {
                if let Some(hash) = output_hash {
                    node.set_output_hash(hash);
                }
                node.transition(BuildStatus::Cached);
                self.bus.publish(Event::TargetCached {
                    target: target_id.clone(),
                });
            }
            Ok(ActionsOutcome::Ran { output_hash }) => {
                if let Some(hash) = output_hash {
                    node.set_output_hash(hash);
                }
                node.transition(BuildStatus::Success);
                self.bus.publish(Event::TargetCompleted {
                    target: target_id.clone(),
                    output_hash: node.output_hash(),
                });
            }
            Err(message) => {
                node.set_last_error(message);
                self.handle_failure(target_id, node, local);
                return;
            }
        }

        self.completed.fetch_add(1, Ordering::AcqRel);
        self.enqueue_ready_dependents(target_id, local);
    }

    fn handle_failure(
        &self,
        target_id: &TargetId,
        node: &kiln_core::BuildNode,
        local: &Worker<TargetId>,
    ) {
        let attempt = node.increment_retry();
        if let Some(delay) = self.retry_policy.delay_for(attempt) {
            node.transition(BuildStatus::Failed);
            node.transition(BuildStatus::Ready);
            std::thread::sleep(delay);
            node.reset_ready_claim();
            if node.try_claim_ready_enqueue() {
                local.push(target_id.clone());
            }
            return;
        }

        node.set_failure_reason(FailureReason::ActionFailed);
        node.transition(BuildStatus::Failed);
        self.bus.publish(Event::TargetFailed {
            target: target_id.clone(),
            reason: FailureReason::ActionFailed,
        });
        self.completed.fetch_add(1, Ordering::AcqRel);

        if self.continue_on_failure {
            self.cascade_upstream_failure(target_id);
        } else {
            self.abort.trigger();
        }
    }

    /// Marks every transitive dependent of a failed target as
    /// `UpstreamFailed` so the build can keep making progress on
    /// unrelated branches (`spec.md` §7 "continue-on-failure").
    fn cascade_upstream_failure(&self, failed: &TargetId) {
        let mut frontier = vec![failed.clone()];
        while let Some(id) = frontier.pop() {
            let dependents = self.graph.dependents_of(&id);
            for dep_id in dependents.iter() {
                if let Some(dep_node) = self.graph.node(dep_id) {
                    if dep_node.transition(BuildStatus::Ready) && dep_node.transition(BuildStatus::Running) {
                        dep_node.set_failure_reason(FailureReason::UpstreamFailed);
                        dep_node.transition(BuildStatus::Failed);
                        self.bus.publish(Event::TargetFailed {
                            target: dep_id.clone(),
                            reason: FailureReason::UpstreamFailed,
                        });
                        self.completed.fetch_add(1, Ordering::AcqRel);
                        frontier.push(dep_id.clone());
                    }
                }
            }
        }
    }

    fn enqueue_ready_dependents(&self, target_id: &TargetId, local: &Worker<TargetId>) {
        for dep_id in self.graph.dependents_of(target_id).iter() {
            let Some(dep_node) = self.graph.node(dep_id) else {
                continue;
            };
            if dep_node.status() != BuildStatus::Pending {
                continue;
            }
            let deps_satisfied = self
                .graph
                .dependencies_of(dep_id)
                .iter()
                .all(|d| self.graph.node(d).map(|n| n.status().is_terminal_satisfied()).unwrap_or(false));
            if deps_satisfied && dep_node.transition(BuildStatus::Ready) && dep_node.try_claim_ready_enqueue() {
                local.push(dep_id.clone());
            }
        }
    }

    async fn run_actions(&self, target_id: &TargetId) -> Result<ActionsOutcome, String> {
        let Some(node) = self.graph.node(target_id) else {
            return Err("target vanished from graph".to_string());
        };
        let language = node.target.language.clone();
        let handler = self
            .registry
            .get(&language)
            .map_err(|e| e.to_string())?;

        let actions = handler
            .plan(&node.target, &self.workspace)
            .map_err(|e| e.to_string())?;

        if actions.is_empty() {
            return Ok(ActionsOutcome::AllCached { output_hash: None });
        }

        let mut last_hash = None;
        let mut all_cached = true;

        for action in &actions {
            if self.abort.is_set() {
                return Err("cancelled".to_string());
            }

            let result = handler
                .execute(action, &self.cache, &self.executor)
                .await
                .map_err(|e| e.to_string())?;

            if !result.success {
                return Err(format!("action {} failed", action.id.sub_id));
            }
            all_cached &= result.cache_hit;
            if let Some(hash) = result.output_hashes.values().next() {
                last_hash = Some(*hash);
            }
        }

        if all_cached {
            Ok(ActionsOutcome::AllCached { output_hash: last_hash })
        } else {
            Ok(ActionsOutcome::Ran { output_hash: last_hash })
        }
    }
}

enum ActionsOutcome {
    AllCached { output_hash: Option<kiln_hash::Digest> },
    Ran { output_hash: Option<kiln_hash::Digest> },
}
