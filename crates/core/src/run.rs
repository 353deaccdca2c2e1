//! Per-run progress record.
//!
//! The caller creates a [`RunContext`], hands it to a pipeline by reference
//! and reads [`RunSnapshot`]s from it, possibly from another task. A
//! [`RunRegistry`] indexes the contexts of the current process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::PipelineState;
use crate::stage::Stage;

/// Events kept per run; older ones are dropped.
pub const MAX_EVENTS: usize = 200;

/// Runs kept by a [`RunRegistry`]. Beyond this the oldest finished runs are
/// dropped; running ones are always kept.
pub const MAX_RUNS: usize = 100;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    /// Finished, but the outcome needs a human to confirm.
    Indeterminate,
    Failed,
    Cancelled,
}

/// One recorded transition or note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub at: DateTime<Utc>,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: String,
    pub service: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub state: PipelineState,
    /// Searches started, the first one included.
    pub search_attempts: u32,
    pub sessions_opened: u32,
    /// Counted rejections per stage in the current session.
    pub stage_retries: BTreeMap<Stage, u32>,
    pub recognition_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub events: Vec<RunEvent>,
}

/// Progress of one pipeline run.
pub struct RunContext {
    clock: Instant,
    inner: Mutex<RunSnapshot>,
}

impl RunContext {
    pub fn new(service: &str) -> Self {
        Self {
            clock: Instant::now(),
            inner: Mutex::new(RunSnapshot {
                id: Uuid::new_v4().to_string(),
                service: service.to_string(),
                started_at: Utc::now(),
                finished_at: None,
                status: RunStatus::Running,
                state: PipelineState::Init,
                search_attempts: 0,
                sessions_opened: 0,
                stage_retries: BTreeMap::new(),
                recognition_failures: 0,
                summary: None,
                events: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn service(&self) -> String {
        self.lock().service.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn transition(&self, state: PipelineState) {
        let mut inner = self.lock();
        debug!(run_id = %inner.id, from = %inner.state, to = %state, "Transition");
        inner.state = state;
        push_event(&mut inner, state, None);
    }

    /// Record a message against the current state.
    pub fn note(&self, detail: impl Into<String>) {
        let mut inner = self.lock();
        let state = inner.state;
        push_event(&mut inner, state, Some(detail.into()));
    }

    /// Start a fresh search. Returns the search attempt number.
    pub fn begin_search(&self) -> u32 {
        let mut inner = self.lock();
        inner.search_attempts += 1;
        inner.stage_retries.clear();
        inner.search_attempts
    }

    /// A new session replaces the old one; its stage counters start at zero.
    pub fn session_opened(&self) {
        let mut inner = self.lock();
        inner.sessions_opened += 1;
        inner.stage_retries.clear();
    }

    /// Count a rejection against `stage`. Returns the new count.
    pub fn bump_retry(&self, stage: Stage) -> u32 {
        let mut inner = self.lock();
        let retries = inner.stage_retries.entry(stage).or_insert(0);
        *retries += 1;
        *retries
    }

    pub fn retries(&self, stage: Stage) -> u32 {
        self.lock().stage_retries.get(&stage).copied().unwrap_or(0)
    }

    pub fn search_attempts(&self) -> u32 {
        self.lock().search_attempts
    }

    pub fn sessions_opened(&self) -> u32 {
        self.lock().sessions_opened
    }

    pub fn recognition_failed(&self) {
        self.lock().recognition_failures += 1;
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished_at.is_some()
    }

    pub fn finish(&self, status: RunStatus, summary: impl Into<String>) {
        let mut inner = self.lock();
        inner.status = status;
        inner.finished_at = Some(Utc::now());
        inner.summary = Some(summary.into());
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().clone()
    }
}

fn push_event(inner: &mut RunSnapshot, state: PipelineState, detail: Option<String>) {
    if inner.events.len() >= MAX_EVENTS {
        inner.events.remove(0);
    }
    inner.events.push(RunEvent {
        at: Utc::now(),
        state,
        detail,
    });
}

#[derive(Default)]
struct Runs {
    by_id: HashMap<String, Arc<RunContext>>,
    /// Ids in registration order.
    order: VecDeque<String>,
}

/// The runs of this process, by id.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<Runs>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, run: Arc<RunContext>) {
        let id = run.id();
        let mut runs = self.lock();
        if runs.by_id.insert(id.clone(), run).is_none() {
            runs.order.push_back(id);
        }
        prune(&mut runs);
    }

    pub fn get(&self, id: &str) -> Option<Arc<RunContext>> {
        self.lock().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots, oldest first.
    pub fn list(&self) -> Vec<RunSnapshot> {
        let runs: Vec<Arc<RunContext>> = self.lock().by_id.values().cloned().collect();
        let mut snapshots: Vec<RunSnapshot> = runs.iter().map(|run| run.snapshot()).collect();
        snapshots.sort_by_key(|snapshot| snapshot.started_at);
        snapshots
    }
}

fn prune(runs: &mut Runs) {
    let runs_over_cap = runs.by_id.len().saturating_sub(MAX_RUNS);
    if runs_over_cap == 0 {
        return;
    }
    let mut excess = runs_over_cap;
    let Runs { by_id, order } = runs;
    order.retain(|id| {
        if excess == 0 {
            return true;
        }
        let finished = by_id.get(id).map_or(true, |run| run.is_finished());
        if finished {
            by_id.remove(id);
            excess -= 1;
        }
        !finished
    });
    if excess < runs_over_cap {
        debug!(kept = by_id.len(), "Pruned finished runs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_reset_with_new_session() {
        let run = RunContext::new("thsrc");
        assert_eq!(run.begin_search(), 1);
        run.session_opened();
        assert_eq!(run.bump_retry(Stage::Query), 1);
        assert_eq!(run.bump_retry(Stage::Query), 2);
        assert_eq!(run.retries(Stage::Query), 2);

        run.session_opened();
        assert_eq!(run.retries(Stage::Query), 0);
        assert_eq!(run.sessions_opened(), 2);

        run.bump_retry(Stage::SelectTrain);
        assert_eq!(run.begin_search(), 2);
        assert_eq!(run.retries(Stage::SelectTrain), 0);
    }

    #[test]
    fn test_events_are_bounded() {
        let run = RunContext::new("thsrc");
        for _ in 0..(MAX_EVENTS + 10) {
            run.transition(PipelineState::ChallengeRefresh);
        }
        run.note("last");
        let snapshot = run.snapshot();
        assert_eq!(snapshot.events.len(), MAX_EVENTS);
        assert_eq!(snapshot.events.last().unwrap().detail.as_deref(), Some("last"));
    }

    #[test]
    fn test_finish_and_snapshot_json() {
        let run = RunContext::new("thsrc-cancel");
        run.transition(PipelineState::Submitted(Stage::Lookup));
        run.bump_retry(Stage::Lookup);
        run.finish(RunStatus::Failed, "reservation not found");

        let json = serde_json::to_value(run.snapshot()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["service"], "thsrc-cancel");
        assert_eq!(json["stage_retries"]["lookup"], 1);
        assert_eq!(json["state"]["stage"], "lookup");
        assert!(json["finished_at"].is_string());
    }

    #[test]
    fn test_registry() {
        let registry = RunRegistry::new();
        let first = Arc::new(RunContext::new("thsrc"));
        let second = Arc::new(RunContext::new("thsrc-cancel"));
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(registry.get(&first.id()).is_some());
        assert!(registry.get("missing").is_none());
        let services: Vec<String> = registry.list().into_iter().map(|s| s.service).collect();
        assert_eq!(services.len(), 2);
        assert!(services.contains(&"thsrc".to_string()));
    }

    #[test]
    fn test_registry_drops_oldest_finished_runs() {
        let registry = RunRegistry::new();
        let running = Arc::new(RunContext::new("thsrc"));
        registry.register(running.clone());

        let mut finished = Vec::new();
        for _ in 0..MAX_RUNS {
            let run = Arc::new(RunContext::new("thsrc-cancel"));
            run.finish(RunStatus::Failed, "reservation not found");
            registry.register(run.clone());
            finished.push(run);
        }

        assert_eq!(registry.len(), MAX_RUNS);
        assert!(registry.get(&running.id()).is_some());
        assert!(registry.get(&finished[0].id()).is_none());
        assert!(registry.get(&finished[1].id()).is_some());

        let late = Arc::new(RunContext::new("thsrc"));
        registry.register(late.clone());
        assert_eq!(registry.len(), MAX_RUNS);
        assert!(registry.get(&finished[1].id()).is_none());
        assert!(registry.get(&late.id()).is_some());
        assert!(registry.get(&running.id()).is_some());
    }

    #[test]
    fn test_registry_keeps_running_runs_over_the_cap() {
        let registry = RunRegistry::new();
        for _ in 0..(MAX_RUNS + 5) {
            registry.register(Arc::new(RunContext::new("thsrc")));
        }
        assert_eq!(registry.len(), MAX_RUNS + 5);
    }
}
