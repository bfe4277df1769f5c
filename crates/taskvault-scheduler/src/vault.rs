//! The Vault: owns the four task queues and drives every task through its
//! lifecycle on a fixed tick.
//!
//! Each tick, in order:
//! 1. cancellation sweep (and reaping of canceled executions)
//! 2. sort `queued` by (priority, queued) and `ready` by (priority, added)
//! 3. promote due `queued` tasks whose dependencies are satisfied
//! 4. elevate long-waiting `queued`/`ready` tasks
//! 5. sort again
//! 6. supervise `running` (timeouts, completions, repeat)
//! 7. admit `ready` tasks under the weight budget
//! 8. trim `done` to the retention count
//!
//! Only the tick mutates queue membership. External calls (submit, cancel,
//! delete, queries) take the same lock for the duration of one mutation.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use taskvault_core::config::{TaskDefaults, VaultConfig};
use taskvault_core::{
    Component, Event, EventQueue, EventSource, Result, ServiceLoop, Severity, VaultError,
};

use crate::registry::{KindRegistry, TaskPayload};
use crate::runnable::TaskContext;
use crate::task::{Task, TaskId, TaskRecord, TaskSnapshot, TaskStatus, add_secs};

const VAULT_NAME: &str = "vault";

type RunResult = Result<Option<String>>;

/// A spawned run of a task.
struct Execution {
    cancel: CancellationToken,
    handle: JoinHandle<RunResult>,
}

/// A canceled or timed-out run that has not exited yet.
struct Reaping {
    id: TaskId,
    name: String,
    handle: JoinHandle<RunResult>,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct VaultState {
    queued: Vec<Task>,
    ready: Vec<Task>,
    running: Vec<Task>,
    done: VecDeque<Task>,
    executions: HashMap<TaskId, Execution>,
    reaping: Vec<Reaping>,
}

impl VaultState {
    fn iter(&self) -> impl Iterator<Item = &Task> {
        self.queued
            .iter()
            .chain(self.ready.iter())
            .chain(self.running.iter())
            .chain(self.done.iter())
    }

    fn find(&self, id: TaskId) -> Option<&Task> {
        self.iter().find(|t| t.id == Some(id))
    }

    fn find_active_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.queued
            .iter_mut()
            .chain(self.ready.iter_mut())
            .chain(self.running.iter_mut())
            .find(|t| t.id == Some(id))
    }

    fn remove(&mut self, id: TaskId) -> Option<Task> {
        let matches = |t: &Task| t.id == Some(id);
        if let Some(i) = self.queued.iter().position(matches) {
            return Some(self.queued.remove(i));
        }
        if let Some(i) = self.ready.iter().position(matches) {
            return Some(self.ready.remove(i));
        }
        if let Some(i) = self.running.iter().position(matches) {
            return Some(self.running.remove(i));
        }
        let i = self.done.iter().position(matches)?;
        self.done.remove(i)
    }

    /// Stop tracking a run: signal it and give it until `deadline` to exit.
    fn reap(&mut self, task: &Task, deadline: DateTime<Utc>) {
        let Some(id) = task.id else { return };
        if let Some(exec) = self.executions.remove(&id) {
            exec.cancel.cancel();
            self.reaping.push(Reaping {
                id,
                name: task.name.clone(),
                handle: exec.handle,
                deadline,
            });
        }
    }

    fn running_weight(&self) -> f64 {
        self.running
            .iter()
            .filter(|t| t.priority != 0)
            .map(|t| t.weight)
            .sum()
    }
}

/// Per-queue task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub ready: usize,
    pub running: usize,
    pub done: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.queued + self.ready + self.running + self.done
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub canceled: usize,
    pub promoted: usize,
    pub elevated: usize,
    pub timed_out: usize,
    pub completed: usize,
    pub requeued: usize,
    pub admitted: usize,
    pub evicted: usize,
    pub aborted: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// How a due task's dependencies look right now.
enum DependencyState {
    Satisfied,
    Blocked(TaskStatus),
}

struct Shared {
    config: VaultConfig,
    defaults: TaskDefaults,
    registry: KindRegistry,
    state: Mutex<VaultState>,
    events: EventQueue,
    next_id: AtomicU64,
}

/// The scheduler.
pub struct Vault {
    shared: Arc<Shared>,
    service: ServiceLoop,
}

impl Vault {
    pub fn new(config: VaultConfig, defaults: TaskDefaults) -> Self {
        Self::with_registry(config, defaults, KindRegistry::builtin())
    }

    pub fn with_registry(config: VaultConfig, defaults: TaskDefaults, registry: KindRegistry) -> Self {
        let events = EventQueue::new(VAULT_NAME, config.event_queue_size);
        Self {
            shared: Arc::new(Shared {
                config,
                defaults,
                registry,
                state: Mutex::new(VaultState::default()),
                events,
                next_id: AtomicU64::new(1),
            }),
            service: ServiceLoop::new(VAULT_NAME),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.shared.registry
    }

    /// The vault's own event queue (rejections, reaper aborts, loop failures).
    pub fn events(&self) -> &EventQueue {
        &self.shared.events
    }

    // ── Submission ────────────────────────────────────────

    /// Admit a task into `queued`. Returns its id.
    ///
    /// A task whose id is already tracked is not added again; the existing
    /// id is returned.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        self.submit_at(task, Utc::now())
    }

    pub fn submit_at(&self, task: Task, now: DateTime<Utc>) -> Result<TaskId> {
        self.shared.submit(task, now)
    }

    /// Build a task from a key/value payload and submit it.
    pub fn submit_payload(&self, payload: &serde_json::Value) -> Result<TaskId> {
        let header = TaskPayload::from_value(payload)?;
        self.shared.check_blacklist(&header.kind, header.display_name())?;
        let task = self
            .shared
            .registry
            .build_task(payload, &self.shared.defaults)?;
        self.submit(task)
    }

    // ── Control ───────────────────────────────────────────

    /// Request cancellation. The status flips now; the next tick moves the
    /// task to `done` and stops its execution.
    ///
    /// Returns `false` if the task already reached a terminal status.
    pub fn cancel(&self, id: TaskId) -> Result<bool> {
        let mut state = self.shared.lock();
        if let Some(task) = state.find_active_mut(id) {
            if task.status == TaskStatus::Canceled {
                return Ok(false);
            }
            tracing::info!("🚫 Cancel requested for '{}' ({id})", task.name);
            task.status = TaskStatus::Canceled;
            return Ok(true);
        }
        if state.find(id).is_some() {
            return Ok(false);
        }
        Err(VaultError::NotFound(id.to_string()))
    }

    /// Drop a task entirely, stopping its execution if it is running.
    pub fn delete(&self, id: TaskId) -> Result<TaskSnapshot> {
        let now = Utc::now();
        let grace = self.shared.config.cancel_grace_secs;
        let mut state = self.shared.lock();
        let task = state
            .remove(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        state.reap(&task, add_secs(now, grace));
        self.shared.salvage_events(&task);
        tracing::info!("🗑️ Task deleted: '{}' ({id})", task.name);
        Ok(task.snapshot())
    }

    // ── Queries ───────────────────────────────────────────

    pub fn get(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.shared.lock().find(id).map(Task::snapshot)
    }

    /// First task with this name, searching queued, ready, running, done.
    pub fn find_by_name(&self, name: &str) -> Option<TaskSnapshot> {
        self.shared
            .lock()
            .iter()
            .find(|t| t.name == name)
            .map(Task::snapshot)
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.shared.lock().iter().map(Task::snapshot).collect()
    }

    pub fn queue_counts(&self) -> QueueCounts {
        let state = self.shared.lock();
        QueueCounts {
            queued: state.queued.len(),
            ready: state.ready.len(),
            running: state.running.len(),
            done: state.done.len(),
        }
    }

    pub fn history(&self, id: TaskId) -> Result<Vec<TaskRecord>> {
        let state = self.shared.lock();
        let task = state
            .find(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        Ok(task.history().cloned().collect())
    }

    /// Weight currently consumed against the budget (priority-0 tasks excluded).
    pub fn running_weight(&self) -> f64 {
        self.shared.lock().running_weight()
    }

    // ── Ticking ───────────────────────────────────────────

    pub fn tick(&self) -> TickReport {
        self.tick_at(Utc::now())
    }

    /// Run one tick as if the clock read `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        self.shared.tick_at(now)
    }

    /// Cancel every running execution, wait up to `grace`, then abort the rest.
    /// Running tasks end up `canceled` in `done`. Returns how many were aborted.
    pub async fn shutdown_tasks(&self, grace: Duration) -> usize {
        let now = Utc::now();
        let handles: Vec<(String, JoinHandle<RunResult>)> = {
            let mut state = self.shared.lock();
            let running = std::mem::take(&mut state.running);
            for mut task in running {
                state.reap(&task, now);
                task.finish(
                    TaskStatus::Canceled,
                    now,
                    None,
                    Some("canceled on shutdown".into()),
                );
                state.done.push_back(task);
            }
            state
                .reaping
                .drain(..)
                .map(|r| (r.name, r.handle))
                .collect()
        };
        if handles.is_empty() {
            return 0;
        }
        tracing::info!("🛑 Waiting up to {grace:?} for {} task(s) to stop", handles.len());

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;
        for (name, mut handle) in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!("⏱️ Task '{name}' ignored cancellation, aborting");
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, VaultState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_blacklist(&self, kind: &str, name: &str) -> Result<()> {
        let hit = self
            .config
            .blacklist
            .iter()
            .find(|entry| entry.eq_ignore_ascii_case(kind) || entry.eq_ignore_ascii_case(name));
        match hit {
            Some(entry) => {
                tracing::warn!("⛔ Rejected blacklisted task '{name}' ({kind})");
                self.events.push(
                    Event::new(VAULT_NAME, Severity::Warn, format!("rejected blacklisted task '{name}'"))
                        .with_tags(["submission"])
                        .with_data(serde_json::json!({ "kind": kind, "name": name })),
                );
                Err(VaultError::Blacklisted(entry.clone()))
            }
            None => Ok(()),
        }
    }

    fn submit(&self, mut task: Task, now: DateTime<Utc>) -> Result<TaskId> {
        self.check_blacklist(task.kind(), &task.name)?;

        let mut state = self.lock();
        if let Some(id) = task.id {
            if state.find(id).is_some() {
                tracing::debug!("Task {id} already tracked, ignoring duplicate submission");
                return Ok(id);
            }
            self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
        }

        let start_at = task.calculate_start_time(now).ok_or_else(|| {
            VaultError::InvalidPayload(format!("task '{}' would never run", task.name))
        })?;
        let id = match task.id {
            Some(id) => id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        task.id = Some(id);
        task.start_at = Some(start_at);
        task.mark_queued(now);

        tracing::info!(
            "📅 Task submitted: '{}' ({id}, {}, priority {}, weight {})",
            task.name,
            task.kind(),
            task.priority,
            task.weight
        );
        state.queued.push(task);
        Ok(id)
    }

    /// Move whatever a task still has queued into the vault's queue so the
    /// bus sees it after the task is gone.
    fn salvage_events(&self, task: &Task) {
        for event in task.events().drain() {
            self.events.push(event);
        }
    }

    fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let mut state = self.lock();
        let state = &mut *state;

        self.sweep_canceled(state, now, &mut report);
        sort_queues(state);
        self.promote(state, now, &mut report);
        self.elevate(state, now, &mut report);
        sort_queues(state);
        self.supervise(state, now, &mut report);
        self.admit(state, now, &mut report);
        self.enforce_retention(state, &mut report);

        report
    }

    fn sweep_canceled(&self, state: &mut VaultState, now: DateTime<Utc>, report: &mut TickReport) {
        let deadline = add_secs(now, self.config.cancel_grace_secs);
        let is_canceled = |t: &Task| t.status == TaskStatus::Canceled;
        let mut canceled = take_where(&mut state.queued, is_canceled);
        canceled.extend(take_where(&mut state.ready, is_canceled));
        canceled.extend(take_where(&mut state.running, is_canceled));

        for mut task in canceled {
            state.reap(&task, deadline);
            task.finish(TaskStatus::Canceled, now, None, Some("canceled".into()));
            task.events()
                .emit(Severity::Info, format!("task '{}' canceled", task.name));
            tracing::info!("🚫 Task canceled: '{}'", task.name);
            state.done.push_back(task);
            report.canceled += 1;
        }

        // Runs that ignored cancellation past their grace period are killed.
        let mut still = Vec::with_capacity(state.reaping.len());
        for r in state.reaping.drain(..) {
            if r.handle.is_finished() {
                continue;
            }
            if now >= r.deadline {
                tracing::warn!("⏱️ Task '{}' ({}) ignored cancellation, aborting", r.name, r.id);
                self.events.emit(
                    Severity::Warn,
                    format!("aborted task '{}' after cancel grace period", r.name),
                );
                r.handle.abort();
                report.aborted += 1;
            } else {
                still.push(r);
            }
        }
        state.reaping = still;
    }

    fn promote(&self, state: &mut VaultState, now: DateTime<Utc>, report: &mut TickReport) {
        // name → status of the first task with that name
        let mut statuses: HashMap<&str, TaskStatus> = HashMap::new();
        for t in state.iter() {
            statuses.entry(t.name.as_str()).or_insert(t.status);
        }
        let blocked: Vec<(TaskId, TaskStatus)> = state
            .queued
            .iter()
            .filter(|t| t.is_due(now) && !t.dependencies.is_empty())
            .filter_map(|t| match dependency_state(t, &statuses) {
                DependencyState::Satisfied => None,
                DependencyState::Blocked(status) => t.id.map(|id| (id, status)),
            })
            .collect();
        drop(statuses);

        let queued = std::mem::take(&mut state.queued);
        for mut task in queued {
            if !task.is_due(now) {
                state.queued.push(task);
                continue;
            }
            if let Some((_, status)) = blocked.iter().find(|(id, _)| task.id == Some(*id)) {
                if task.status != *status {
                    tracing::debug!("⏳ '{}' held back: {status}", task.name);
                    task.status = *status;
                }
                state.queued.push(task);
                continue;
            }
            task.mark_ready(now);
            state.ready.push(task);
            report.promoted += 1;
        }
    }

    fn elevate(&self, state: &mut VaultState, now: DateTime<Utc>, report: &mut TickReport) {
        let fallback = self.config.elevate_interval_secs;
        for task in state.queued.iter_mut().chain(state.ready.iter_mut()) {
            if task.elevate_check(fallback, now) {
                tracing::debug!("⬆️ '{}' elevated to priority {}", task.name, task.priority);
                report.elevated += 1;
            }
        }
    }

    fn supervise(&self, state: &mut VaultState, now: DateTime<Utc>, report: &mut TickReport) {
        let deadline = add_secs(now, self.config.cancel_grace_secs);
        let running = std::mem::take(&mut state.running);
        for mut task in running {
            let id = task.id.unwrap_or_default();

            if task.is_timed_out(now) {
                let limit = task.timeout.unwrap_or_default();
                state.reap(&task, deadline);
                task.finish(
                    TaskStatus::TimedOut,
                    now,
                    None,
                    Some(format!("timed out after {limit}s")),
                );
                tracing::warn!("⏱️ Task timed out: '{}' after {limit}s", task.name);
                task.events().push(outcome_event(&task, Severity::Warn, "timed out"));
                report.timed_out += 1;
                self.retire(state, task, now, report);
                continue;
            }

            let outcome = match state.executions.remove(&id) {
                Some(exec) if exec.handle.is_finished() => exec.handle.now_or_never(),
                Some(exec) => {
                    state.executions.insert(id, exec);
                    state.running.push(task);
                    continue;
                }
                None => None,
            };

            match outcome {
                Some(Ok(Ok(output))) => {
                    task.finish(TaskStatus::Finished, now, output, None);
                    tracing::info!("✅ Task finished: '{}' (run #{})", task.name, task.run_count);
                    task.events().push(outcome_event(&task, Severity::Debug, "finished"));
                }
                Some(Ok(Err(e))) => {
                    task.finish(TaskStatus::Error, now, None, Some(e.to_string()));
                    tracing::warn!("❌ Task failed: '{}': {e}", task.name);
                    task.events().push(outcome_event(&task, Severity::Error, "failed"));
                }
                Some(Err(join_err)) => {
                    let reason = if join_err.is_panic() {
                        format!("panicked: {}", panic_message(join_err.into_panic().as_ref()))
                    } else {
                        "execution aborted".to_string()
                    };
                    task.finish(TaskStatus::Error, now, None, Some(reason.clone()));
                    tracing::error!("💥 Task '{}' {reason}", task.name);
                    task.events().push(outcome_event(&task, Severity::Error, "crashed"));
                }
                None => {
                    task.finish(TaskStatus::Error, now, None, Some("execution lost".into()));
                    tracing::error!("💥 Task '{}' has no execution", task.name);
                }
            }
            report.completed += 1;
            self.retire(state, task, now, report);
        }
    }

    /// A task just reached a terminal status: re-queue it if it repeats,
    /// otherwise park it in `done`.
    fn retire(&self, state: &mut VaultState, mut task: Task, now: DateTime<Utc>, report: &mut TickReport) {
        match task.calculate_start_time(now) {
            Some(start_at) => {
                task.start_at = Some(start_at);
                task.mark_queued(now);
                tracing::debug!("🔁 '{}' re-queued for {start_at}", task.name);
                state.queued.push(task);
                report.requeued += 1;
            }
            None => state.done.push_back(task),
        }
    }

    fn admit(&self, state: &mut VaultState, now: DateTime<Utc>, report: &mut TickReport) {
        let limit = self.config.weight_limit;
        let mut used = state.running_weight();
        let ready = std::mem::take(&mut state.ready);
        for mut task in ready {
            let bypass = task.priority == 0;
            if !bypass && !limit.is_none_or(|l| used + task.weight <= l) {
                state.ready.push(task);
                continue;
            }
            if !bypass {
                used += task.weight;
            }
            self.launch(state, &mut task, now);
            state.running.push(task);
            report.admitted += 1;
        }
    }

    fn launch(&self, state: &mut VaultState, task: &mut Task, now: DateTime<Utc>) {
        task.mark_running(now);
        let id = task.id.unwrap_or_default();
        let ctx = TaskContext::new(id, &task.name, task.run_count, task.events().clone());
        let cancel = ctx.cancel.clone();
        let runnable = task.runnable();
        tracing::info!(
            "🚀 Task started: '{}' (run #{}, priority {}, weight {})",
            task.name,
            task.run_count,
            task.priority,
            task.weight
        );
        let handle = tokio::spawn(async move { runnable.execute(&ctx).await });
        state.executions.insert(id, Execution { cancel, handle });
    }

    fn enforce_retention(&self, state: &mut VaultState, report: &mut TickReport) {
        while state.done.len() > self.config.retention {
            let Some(task) = state.done.pop_front() else { break };
            self.salvage_events(&task);
            report.evicted += 1;
        }
    }
}

fn sort_queues(state: &mut VaultState) {
    state
        .queued
        .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.queued_at.cmp(&b.queued_at)));
    state
        .ready
        .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.added_at.cmp(&b.added_at)));
}

fn dependency_state(task: &Task, statuses: &HashMap<&str, TaskStatus>) -> DependencyState {
    let mut result = DependencyState::Satisfied;
    for dep in &task.dependencies {
        match statuses.get(dep.as_str()) {
            None => return DependencyState::Blocked(TaskStatus::MissingDependency),
            Some(TaskStatus::Finished) => {}
            Some(TaskStatus::Error | TaskStatus::TimedOut | TaskStatus::Canceled) => {
                result = DependencyState::Blocked(TaskStatus::FailedDependency);
            }
            Some(_) => {
                if matches!(result, DependencyState::Satisfied) {
                    result = DependencyState::Blocked(TaskStatus::Waiting);
                }
            }
        }
    }
    result
}

/// Remove and return every element matching `pred`, keeping the order of the rest.
fn take_where(tasks: &mut Vec<Task>, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
    let (hit, keep): (Vec<Task>, Vec<Task>) = std::mem::take(tasks).into_iter().partition(|t| pred(t));
    *tasks = keep;
    hit
}

fn outcome_event(task: &Task, severity: Severity, what: &str) -> Event {
    let record = task.last_record();
    Event::new(&task.name, severity, format!("task '{}' {what}", task.name))
        .with_tags(["task", task.status.as_str()])
        .with_data(serde_json::json!({
            "task_id": task.id,
            "status": task.status,
            "run": task.run_count,
            "duration_secs": record.and_then(|r| r.duration_secs),
            "error": record.and_then(|r| r.error.clone()),
        }))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_loop(shared: Arc<Shared>, token: CancellationToken) {
    let interval = shared.config.interval();
    tracing::info!("⏰ Vault started (tick every {:?})", interval);
    loop {
        let started = tokio::time::Instant::now();
        match std::panic::catch_unwind(AssertUnwindSafe(|| shared.tick_at(Utc::now()))) {
            Ok(report) if !report.is_idle() => tracing::debug!("🔄 Vault tick: {report:?}"),
            Ok(_) => {}
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!("💀 FATAL: vault tick panicked: {msg}");
                shared
                    .events
                    .emit(Severity::Fatal, format!("vault tick panicked: {msg}"));
            }
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(started + interval) => {}
        }
    }
    tracing::info!("🛑 Vault loop stopped");
}

#[async_trait]
impl Component for Vault {
    fn name(&self) -> &str {
        VAULT_NAME
    }

    fn is_running(&self) -> bool {
        self.service.is_running()
    }

    async fn start(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        if !self.service.spawn(move |token| run_loop(shared, token)) {
            tracing::debug!("Vault loop already running");
        }
        Ok(())
    }

    /// Stops the tick loop only; running tasks keep going and are picked up
    /// again when the loop restarts.
    async fn stop(&self) -> Result<()> {
        self.service.shutdown(self.shared.config.cancel_grace()).await;
        Ok(())
    }
}

impl EventSource for Vault {
    fn source_name(&self) -> &str {
        VAULT_NAME
    }

    fn drain_events(&self) -> Vec<Event> {
        let mut events = self.shared.events.drain();
        let state = self.shared.lock();
        for task in state.iter() {
            events.extend(task.events().drain());
        }
        events.sort_by_key(|e| e.timestamp);
        events
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.service.abort();
    }
}
