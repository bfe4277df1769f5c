//! Task definitions: the core data model for scheduled work.
//!
//! A `Task` wraps a [`Runnable`] with scheduling attributes (priority,
//! weight, repeat, timeout, ...) and the mutable lifecycle state the vault
//! drives. Transition helpers stamp their timestamps; the vault decides
//! which queue a task lives in.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskvault_core::EventQueue;
use taskvault_core::config::MAX_PRIORITY;

use crate::repeat::Repeat;
use crate::runnable::Runnable;

/// Task identifier, assigned by the vault at submission.
pub type TaskId = u64;

/// Lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Queued,
    Ready,
    Running,
    Finished,
    Error,
    Waiting,
    FailedDependency,
    MissingDependency,
    TimedOut,
    Canceled,
    Unknown,
}

impl TaskStatus {
    /// Terminal for the current cycle (the task sits in `done` unless re-queued).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Error | Self::TimedOut | Self::Canceled
        )
    }

    /// Statuses that can still be canceled.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// The queue a task with this status belongs to.
    pub fn queue(&self) -> QueueKind {
        match self {
            Self::Created
            | Self::Queued
            | Self::Waiting
            | Self::FailedDependency
            | Self::MissingDependency
            | Self::Unknown => QueueKind::Queued,
            Self::Ready => QueueKind::Ready,
            Self::Running => QueueKind::Running,
            Self::Finished | Self::Error | Self::TimedOut | Self::Canceled => QueueKind::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Waiting => "waiting",
            Self::FailedDependency => "failed_dependency",
            Self::MissingDependency => "missing_dependency",
            Self::TimedOut => "timedout",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four vault queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Queued,
    Ready,
    Running,
    Done,
}

/// One execution of a task, kept in its history ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Run number (value of `run_count` when this run started).
    pub run: u32,
    pub status: TaskStatus,
    pub started: Option<DateTime<Utc>>,
    pub finished: DateTime<Utc>,
    pub duration_secs: Option<f64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// A unit of schedulable work.
#[derive(Debug)]
pub struct Task {
    /// Assigned at submission; `None` until then.
    pub id: Option<TaskId>,
    /// Human-readable name (not guaranteed unique).
    pub name: String,
    /// 0 bypasses the weight budget; lower is more urgent.
    pub priority: u8,
    /// Priority restored whenever the task reaches a terminal status.
    pub initial_priority: u8,
    /// Budget consumed while running.
    pub weight: f64,
    /// Seconds before the first run.
    pub delay: f64,
    pub run_limit: Option<u32>,
    /// Seconds a run may take before it is timed out.
    pub timeout: Option<f64>,
    pub repeat: Repeat,
    /// Overrides the vault's elevation interval (seconds).
    pub elevate_interval: Option<f64>,
    /// Names of tasks that must have finished before this one is promoted.
    pub dependencies: Vec<String>,

    pub status: TaskStatus,
    pub run_count: u32,
    pub start_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub added_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_elevated: Option<DateTime<Utc>>,

    history: VecDeque<TaskRecord>,
    history_size: usize,
    events: EventQueue,
    runnable: Arc<dyn Runnable>,
}

const DEFAULT_HISTORY: usize = 10;
const DEFAULT_EVENT_CAPACITY: usize = 100;

impl Task {
    /// Create a task with default scheduling attributes (priority 3, weight 1, no repeat).
    pub fn new(name: &str, runnable: Arc<dyn Runnable>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            priority: 3,
            initial_priority: 3,
            weight: 1.0,
            delay: 0.0,
            run_limit: None,
            timeout: None,
            repeat: Repeat::Never,
            elevate_interval: None,
            dependencies: Vec::new(),
            status: TaskStatus::Created,
            run_count: 0,
            start_at: None,
            created_at: None,
            queued_at: None,
            added_at: None,
            started_at: None,
            finished_at: None,
            last_elevated: None,
            history: VecDeque::new(),
            history_size: DEFAULT_HISTORY,
            events: EventQueue::new(name, DEFAULT_EVENT_CAPACITY),
            runnable,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        let p = priority.min(MAX_PRIORITY);
        self.priority = p;
        self.initial_priority = p;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        self
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay.max(0.0);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<f64>) -> Self {
        self.timeout = timeout.filter(|t| *t > 0.0);
        self
    }

    pub fn with_run_limit(mut self, run_limit: Option<u32>) -> Self {
        self.run_limit = run_limit;
        self
    }

    pub fn with_elevate_interval(mut self, interval: Option<f64>) -> Self {
        self.elevate_interval = interval.filter(|i| *i > 0.0);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size.max(1);
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.events = EventQueue::new(&self.name, capacity);
        self
    }

    /// Type tag of the wrapped runnable ("command", "sleep", ...).
    pub fn kind(&self) -> &'static str {
        self.runnable.kind()
    }

    pub fn runnable(&self) -> Arc<dyn Runnable> {
        Arc::clone(&self.runnable)
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn history(&self) -> impl Iterator<Item = &TaskRecord> {
        self.history.iter()
    }

    pub fn last_record(&self) -> Option<&TaskRecord> {
        self.history.back()
    }

    /// Append an execution record, evicting the oldest one when full.
    pub fn record(&mut self, record: TaskRecord) {
        while self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Compute the next eligible start time, or `None` if the task must not run again.
    ///
    /// Pure: evaluating twice at different instants before the next admission
    /// yields the same answer for fixed-cadence (`every`) repeats.
    pub fn calculate_start_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.status == TaskStatus::Canceled {
            return None;
        }
        if self.run_limit.is_some_and(|limit| self.run_count >= limit) {
            return None;
        }
        if self.run_count == 0 {
            let base = add_secs(now, self.delay);
            return match &self.repeat {
                Repeat::Cron(schedule) => schedule.next_after(base),
                _ => Some(base),
            };
        }
        if self.repeat.is_falsy() {
            return None;
        }
        match &self.repeat {
            Repeat::Never => None,
            Repeat::Always => Some(now),
            Repeat::Times(times) => (self.run_count < *times).then_some(now),
            Repeat::Every(every) => {
                let base = self.started_at.unwrap_or(now);
                chrono::Duration::from_std(*every)
                    .ok()
                    .and_then(|d| base.checked_add_signed(d))
            }
            Repeat::After(after) => chrono::Duration::from_std(*after)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
            Repeat::Cron(schedule) => schedule.next_after(now),
        }
    }

    /// Escalate priority by one step if the elevation interval has elapsed.
    /// The task's own interval overrides `parent_interval`.
    pub fn elevate_check(&mut self, parent_interval: Option<f64>, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.elevate_interval.or(parent_interval) else {
            return false;
        };
        let since = self.last_elevated.or(self.queued_at).unwrap_or(now);
        if now < add_secs(since, interval) {
            return false;
        }
        self.last_elevated = Some(now);
        if self.priority == 0 {
            return false;
        }
        self.priority -= 1;
        true
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.start_at.is_some_and(|at| at <= now)
    }

    /// created/terminal → queued.
    pub fn mark_queued(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.status = TaskStatus::Queued;
        self.queued_at = Some(now);
        self.last_elevated = Some(now);
    }

    /// queued → ready.
    pub fn mark_ready(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Ready;
        self.added_at = Some(now);
        self.last_elevated = Some(now);
    }

    /// ready → running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.finished_at = None;
        self.run_count += 1;
    }

    /// Enter a terminal status: stamp, restore priority and record history.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        now: DateTime<Utc>,
        output: Option<String>,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(now);
        self.priority = self.initial_priority;
        let started = if status == TaskStatus::Canceled && self.started_at.is_none() {
            None
        } else {
            self.started_at
        };
        let record = TaskRecord {
            run: self.run_count,
            status,
            started,
            finished: now,
            duration_secs: started.map(|s| elapsed_secs(s, now)),
            output,
            error,
        };
        self.record(record);
    }

    /// Seconds spent in the current run, if running.
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<f64> {
        (self.status == TaskStatus::Running)
            .then_some(self.started_at)
            .flatten()
            .map(|s| elapsed_secs(s, now))
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.timeout, self.running_for(now)) {
            (Some(timeout), Some(elapsed)) => elapsed > timeout,
            _ => false,
        }
    }

    /// Serializable copy of the public state.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.unwrap_or_default(),
            name: self.name.clone(),
            kind: self.kind().to_string(),
            status: self.status,
            queue: self.status.queue(),
            priority: self.priority,
            initial_priority: self.initial_priority,
            weight: self.weight,
            delay: self.delay,
            run_limit: self.run_limit,
            timeout: self.timeout,
            repeat: self.repeat.to_string(),
            dependencies: self.dependencies.clone(),
            run_count: self.run_count,
            start_at: self.start_at,
            created_at: self.created_at,
            queued_at: self.queued_at,
            added_at: self.added_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_elevated: self.last_elevated,
            last_run: self.last_record().cloned(),
        }
    }
}

/// Read-only view of a task handed out by the vault.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub kind: String,
    pub status: TaskStatus,
    pub queue: QueueKind,
    pub priority: u8,
    pub initial_priority: u8,
    pub weight: f64,
    pub delay: f64,
    pub run_limit: Option<u32>,
    pub timeout: Option<f64>,
    pub repeat: String,
    pub dependencies: Vec<String>,
    pub run_count: u32,
    pub start_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub added_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_elevated: Option<DateTime<Utc>>,
    pub last_run: Option<TaskRecord>,
}

/// `t + secs`, saturating on overflow.
pub fn add_secs(t: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    if !secs.is_finite() || secs <= 0.0 {
        return t;
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    t.checked_add_signed(chrono::Duration::microseconds(micros))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Seconds between two instants (negative if `to` is earlier).
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to.signed_duration_since(from);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::sleep::SleepTask;
    use chrono::TimeZone;
    use std::time::Duration;

    fn task(name: &str) -> Task {
        Task::new(name, Arc::new(SleepTask::new(0.0)))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_queue_mapping() {
        assert_eq!(TaskStatus::Waiting.queue(), QueueKind::Queued);
        assert_eq!(TaskStatus::MissingDependency.queue(), QueueKind::Queued);
        assert_eq!(TaskStatus::TimedOut.queue(), QueueKind::Done);
        assert_eq!(TaskStatus::Ready.queue(), QueueKind::Ready);
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert_eq!(TaskStatus::TimedOut.to_string(), "timedout");
    }

    #[test]
    fn test_first_run_uses_delay() {
        let t = task("delayed").with_delay(30.0);
        assert_eq!(
            t.calculate_start_time(t0()),
            Some(t0() + chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_first_run_cron_waits_for_fire_time() {
        let t = task("cron").with_repeat(Repeat::parse("0 13 * * *"));
        assert_eq!(
            t.calculate_start_time(t0()),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_no_repeat_after_first_run() {
        let mut t = task("once");
        t.run_count = 1;
        assert_eq!(t.calculate_start_time(t0()), None);
    }

    #[test]
    fn test_canceled_never_reschedules() {
        let mut t = task("c").with_repeat(Repeat::Always);
        t.status = TaskStatus::Canceled;
        assert_eq!(t.calculate_start_time(t0()), None);
    }

    #[test]
    fn test_repeat_true_and_times() {
        let mut t = task("always").with_repeat(Repeat::Always);
        t.run_count = 7;
        assert_eq!(t.calculate_start_time(t0()), Some(t0()));

        let mut t = task("thrice").with_repeat(Repeat::Times(3));
        t.run_count = 2;
        assert_eq!(t.calculate_start_time(t0()), Some(t0()));
        t.run_count = 3;
        assert_eq!(t.calculate_start_time(t0()), None);
    }

    #[test]
    fn test_every_is_anchored_to_start() {
        let mut t = task("every").with_repeat(Repeat::parse("every 5m"));
        t.run_count = 1;
        t.started_at = Some(t0());
        let expected = t0() + chrono::Duration::minutes(5);
        // same answer no matter when evaluation happens
        assert_eq!(t.calculate_start_time(t0() + chrono::Duration::seconds(2)), Some(expected));
        assert_eq!(t.calculate_start_time(t0() + chrono::Duration::seconds(90)), Some(expected));
    }

    #[test]
    fn test_after_is_relative_to_now() {
        let mut t = task("after").with_repeat(Repeat::After(Duration::from_secs(60)));
        t.run_count = 1;
        t.started_at = Some(t0());
        let now = t0() + chrono::Duration::seconds(10);
        assert_eq!(t.calculate_start_time(now), Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_run_limit_caps_every_repeat_kind() {
        for repeat in [
            Repeat::Always,
            Repeat::Times(10),
            Repeat::parse("every 1s"),
            Repeat::parse("after 1s"),
            Repeat::parse("* * * * *"),
        ] {
            let mut t = task("limited").with_repeat(repeat).with_run_limit(Some(3));
            t.run_count = 3;
            t.started_at = Some(t0());
            assert_eq!(t.calculate_start_time(t0()), None);
        }
    }

    #[test]
    fn test_elevation_once_per_interval() {
        let mut t = task("slow").with_priority(3);
        t.mark_queued(t0());
        t.mark_ready(t0());
        assert!(!t.elevate_check(Some(10.0), t0() + chrono::Duration::seconds(9)));
        assert!(t.elevate_check(Some(10.0), t0() + chrono::Duration::seconds(10)));
        assert_eq!(t.priority, 2);
        // interval restarts from the elevation instant
        assert!(!t.elevate_check(Some(10.0), t0() + chrono::Duration::seconds(15)));
        assert!(t.elevate_check(Some(10.0), t0() + chrono::Duration::seconds(20)));
        assert_eq!(t.priority, 1);
    }

    #[test]
    fn test_elevation_floor_and_override() {
        let mut t = task("urgent").with_priority(0).with_elevate_interval(Some(1.0));
        t.mark_queued(t0());
        assert!(!t.elevate_check(Some(1000.0), t0() + chrono::Duration::seconds(5)));
        assert_eq!(t.priority, 0);

        let mut t = task("no-interval").with_priority(4);
        t.mark_queued(t0());
        assert!(!t.elevate_check(None, t0() + chrono::Duration::days(1)));
        assert_eq!(t.priority, 4);
    }

    #[test]
    fn test_finish_restores_priority_and_records() {
        let mut t = task("f").with_priority(5).with_history_size(2);
        t.mark_queued(t0());
        t.priority = 1;
        for i in 0..3 {
            t.mark_running(t0());
            t.finish(
                TaskStatus::Finished,
                t0() + chrono::Duration::seconds(2),
                Some(format!("run {i}")),
                None,
            );
        }
        assert_eq!(t.priority, 5);
        assert_eq!(t.run_count, 3);
        let runs: Vec<u32> = t.history().map(|r| r.run).collect();
        assert_eq!(runs, vec![2, 3]);
        assert_eq!(t.last_record().unwrap().duration_secs, Some(2.0));
    }

    #[test]
    fn test_timeout_detection() {
        let mut t = task("slow").with_timeout(Some(2.0));
        t.mark_running(t0());
        assert!(!t.is_timed_out(t0() + chrono::Duration::seconds(2)));
        assert!(t.is_timed_out(t0() + chrono::Duration::milliseconds(2100)));
    }

    #[test]
    fn test_priority_is_clamped() {
        let t = task("p").with_priority(42);
        assert_eq!(t.priority, MAX_PRIORITY);
    }
}
