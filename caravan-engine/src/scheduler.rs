//! The scheduling actor.
//!
//! One task owns every piece of mutable scheduling state — the due times,
//! the single-flight running set, the pending queue, and the active-run
//! count — and serves ticks, manual triggers, status queries, and run
//! completions over channels. Executor runs are spawned tasks; nothing
//! here needs a lock.
//!
//! Guarantees:
//! - **Single-flight**: a task with a non-terminal run is never admitted
//!   again; due ticks that hit the gate are skipped (not queued) and
//!   logged as missed.
//! - **Bounded pool**: at most `max_concurrent_runs` executors at once;
//!   admitted runs past the bound wait in the queue in trigger order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use caravan_core::types::{BackupTask, ExecutionRun, RunId, RunStatus, StorageTarget, TaskId};
use caravan_core::{catalog, runlog, Schedule};

use crate::error::EngineError;
use crate::executor::{execute_run, ExecutorDeps};

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Result of asking the engine to start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started(RunId),
    /// The task's previous run has not reached a terminal state.
    AlreadyRunning,
    /// Unknown task, disabled task, or a catalog problem — with the reason.
    Rejected(String),
}

/// One scheduled task as the status query reports it.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTaskStatus {
    pub task: String,
    pub schedule: String,
    pub next_due: Option<DateTime<Utc>>,
    pub running: bool,
}

/// Snapshot of the actor's state for `caravan status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub active_runs: usize,
    pub queued_runs: usize,
    pub running_tasks: Vec<String>,
    pub scheduled: Vec<ScheduledTaskStatus>,
}

pub enum EngineCommand {
    Trigger {
        task: TaskId,
        respond_to: oneshot::Sender<TriggerOutcome>,
    },
    Status {
        respond_to: oneshot::Sender<EngineStatus>,
    },
    CancelRun {
        run: RunId,
        respond_to: oneshot::Sender<bool>,
    },
}

/// Cheap clonable handle to the actor's command channel.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Create a handle plus the receiver side for [`Scheduler::run`].
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        (Self { cmd_tx }, cmd_rx)
    }

    pub async fn trigger(&self, task: TaskId) -> Result<TriggerOutcome, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Trigger {
                task,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed("engine commands"))?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed("trigger response"))
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Status { respond_to: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed("engine commands"))?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed("status response"))
    }

    /// `true` if the run was found and cancellation was delivered.
    pub async fn cancel_run(&self, run: RunId) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::CancelRun {
                run,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed("engine commands"))?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed("cancel response"))
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ScheduleEntry {
    schedule: Schedule,
    next_due: Option<DateTime<Utc>>,
}

struct QueuedRun {
    task: BackupTask,
    targets: Vec<StorageTarget>,
    run: ExecutionRun,
    cancel: CancellationToken,
}

struct RunCompletion {
    task: TaskId,
    run: RunId,
}

pub struct Scheduler {
    deps: Arc<ExecutorDeps>,
    entries: HashMap<TaskId, ScheduleEntry>,
    running: HashSet<TaskId>,
    cancels: HashMap<RunId, CancellationToken>,
    queue: VecDeque<QueuedRun>,
    active: usize,
}

impl Scheduler {
    /// Build the schedule set from the enabled tasks. A task with an
    /// unparseable expression is logged and left manual-only rather than
    /// taking the daemon down.
    pub fn new(deps: Arc<ExecutorDeps>, tasks: &[BackupTask]) -> Self {
        let now = Utc::now();
        let mut entries = HashMap::new();
        for task in tasks.iter().filter(|t| t.enabled) {
            let Some(expression) = &task.schedule else {
                continue;
            };
            match Schedule::parse(expression) {
                Ok(schedule) => {
                    let next_due = schedule.next_after(now);
                    tracing::info!(
                        task = %task.id,
                        schedule = %schedule,
                        next_due = ?next_due,
                        "task scheduled",
                    );
                    entries.insert(task.id.clone(), ScheduleEntry { schedule, next_due });
                }
                Err(err) => {
                    tracing::error!(
                        task = %task.id,
                        error = %err,
                        "invalid schedule expression; task is manual-only until fixed",
                    );
                }
            }
        }
        Self {
            deps,
            entries,
            running: HashSet::new(),
            cancels: HashMap::new(),
            queue: VecDeque::new(),
            active: 0,
        }
    }

    /// Run the actor until shutdown. Cancels and drains in-flight runs
    /// before returning.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<EngineCommand>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), EngineError> {
        let (done_tx, mut done_rx) = mpsc::channel::<RunCompletion>(64);
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.deps.config.tick_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => self.on_tick(&done_tx),
                maybe_cmd = cmd_rx.recv() => {
                    let Some(cmd) = maybe_cmd else { break };
                    self.on_command(cmd, &done_tx);
                }
                maybe_done = done_rx.recv() => {
                    if let Some(done) = maybe_done {
                        self.on_completion(done, &done_tx);
                    }
                }
            }
        }

        self.drain(&mut done_rx).await;
        Ok(())
    }

    fn on_tick(&mut self, done_tx: &mpsc::Sender<RunCompletion>) {
        let now = Utc::now();
        let due: Vec<(TaskId, DateTime<Utc>)> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry.next_due {
                Some(due_at) if due_at <= now => Some((id.clone(), due_at)),
                _ => None,
            })
            .collect();

        for (task_id, due_at) in due {
            if self.running.contains(&task_id) {
                // Skipped, not queued: the next firing comes from the
                // recomputed due time below.
                tracing::warn!(
                    task = %task_id,
                    due = %due_at,
                    "missed tick: previous run still active",
                );
            } else {
                match self.admit(&task_id, done_tx) {
                    TriggerOutcome::Started(run) => {
                        tracing::info!(task = %task_id, run = %run, "scheduled run admitted");
                    }
                    // admit re-checks the gate; the contains() above makes
                    // this arm dead in practice.
                    TriggerOutcome::AlreadyRunning => {}
                    TriggerOutcome::Rejected(reason) => {
                        tracing::error!(task = %task_id, reason = %reason, "scheduled trigger rejected");
                    }
                }
            }
            if let Some(entry) = self.entries.get_mut(&task_id) {
                entry.next_due = entry.schedule.next_after(now);
            }
        }
    }

    fn on_command(&mut self, cmd: EngineCommand, done_tx: &mpsc::Sender<RunCompletion>) {
        match cmd {
            EngineCommand::Trigger { task, respond_to } => {
                let outcome = if self.running.contains(&task) {
                    tracing::info!(task = %task, "manual trigger refused: already running");
                    TriggerOutcome::AlreadyRunning
                } else {
                    self.admit(&task, done_tx)
                };
                let _ = respond_to.send(outcome);
            }
            EngineCommand::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            EngineCommand::CancelRun { run, respond_to } => {
                let _ = respond_to.send(self.cancel_run(run));
            }
        }
    }

    /// Admission: fresh snapshot from the catalog, run record appended,
    /// single-flight flag set, then into the queue.
    fn admit(&mut self, task_id: &TaskId, done_tx: &mpsc::Sender<RunCompletion>) -> TriggerOutcome {
        if self.running.contains(task_id) {
            return TriggerOutcome::AlreadyRunning;
        }
        let task = match catalog::load_task_at(&self.deps.home, task_id) {
            Ok(task) => task,
            Err(err) => return TriggerOutcome::Rejected(err.to_string()),
        };
        if !task.enabled {
            return TriggerOutcome::Rejected(format!("task '{task_id}' is disabled"));
        }
        let targets = match catalog::load_targets_at(&self.deps.home) {
            Ok(targets) => targets,
            Err(err) => return TriggerOutcome::Rejected(err.to_string()),
        };

        let run = ExecutionRun::admitted(&task);
        if let Err(err) = runlog::append_run_at(&self.deps.home, &run) {
            return TriggerOutcome::Rejected(format!("could not record run: {err}"));
        }

        let run_id = run.id;
        let cancel = CancellationToken::new();
        self.running.insert(task_id.clone());
        self.cancels.insert(run_id, cancel.clone());
        self.queue.push_back(QueuedRun {
            task,
            targets,
            run,
            cancel,
        });
        self.dispatch(done_tx);
        TriggerOutcome::Started(run_id)
    }

    /// Start queued runs while the pool has room, in trigger order.
    fn dispatch(&mut self, done_tx: &mpsc::Sender<RunCompletion>) {
        while self.active < self.deps.config.max_concurrent_runs.max(1) {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.active += 1;
            let deps = self.deps.clone();
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let task_id = next.task.id.clone();
                let run_id = next.run.id;
                execute_run(&deps, next.task, next.targets, next.run, next.cancel).await;
                let _ = done_tx
                    .send(RunCompletion {
                        task: task_id,
                        run: run_id,
                    })
                    .await;
            });
        }
    }

    fn on_completion(&mut self, done: RunCompletion, done_tx: &mpsc::Sender<RunCompletion>) {
        self.active = self.active.saturating_sub(1);
        self.running.remove(&done.task);
        self.cancels.remove(&done.run);
        self.dispatch(done_tx);
    }

    fn cancel_run(&mut self, run_id: RunId) -> bool {
        // Still queued: terminalize it here; no executor will ever see it.
        let queued_pos = self.queue.iter().position(|q| q.run.id == run_id);
        if let Some(mut queued) = queued_pos.and_then(|pos| self.queue.remove(pos)) {
            queued.run.finish(RunStatus::Cancelled);
            if let Err(err) = runlog::update_run_at(&self.deps.home, &queued.run) {
                tracing::warn!(run = %run_id, error = %err, "failed to persist cancelled queued run");
            }
            self.running.remove(&queued.task.id);
            self.cancels.remove(&run_id);
            tracing::info!(run = %run_id, "queued run cancelled");
            return true;
        }
        // In flight: the executor observes the token at its next checkpoint.
        if let Some(cancel) = self.cancels.get(&run_id) {
            cancel.cancel();
            tracing::info!(run = %run_id, "cancellation requested for active run");
            return true;
        }
        false
    }

    fn status(&self) -> EngineStatus {
        let mut running_tasks: Vec<String> = self.running.iter().map(|t| t.0.clone()).collect();
        running_tasks.sort();
        let mut scheduled: Vec<ScheduledTaskStatus> = self
            .entries
            .iter()
            .map(|(id, entry)| ScheduledTaskStatus {
                task: id.0.clone(),
                schedule: entry.schedule.expression().to_string(),
                next_due: entry.next_due,
                running: self.running.contains(id),
            })
            .collect();
        scheduled.sort_by(|a, b| a.task.cmp(&b.task));
        EngineStatus {
            active_runs: self.active,
            queued_runs: self.queue.len(),
            running_tasks,
            scheduled,
        }
    }

    /// Shutdown: cancel everything, terminalize the queue, wait for the
    /// in-flight executors to reach their terminal states.
    async fn drain(&mut self, done_rx: &mut mpsc::Receiver<RunCompletion>) {
        for cancel in self.cancels.values() {
            cancel.cancel();
        }
        while let Some(mut queued) = self.queue.pop_front() {
            queued.run.finish(RunStatus::Cancelled);
            if let Err(err) = runlog::update_run_at(&self.deps.home, &queued.run) {
                tracing::warn!(run = %queued.run.id, error = %err, "failed to persist cancelled queued run");
            }
            self.running.remove(&queued.task.id);
            self.cancels.remove(&queued.run.id);
        }
        while self.active > 0 {
            match done_rx.recv().await {
                Some(done) => {
                    self.active = self.active.saturating_sub(1);
                    self.running.remove(&done.task);
                    self.cancels.remove(&done.run);
                }
                None => break,
            }
        }
        tracing::info!("scheduler drained");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use caravan_core::types::{StorageKind, StorageTarget, TargetBinding, TargetId};
    use caravan_core::CaravanConfig;
    use caravan_transfer::{BoundaryMap, RemoteEntry, SyncOutcome, TargetTransfer, TransferError};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Copies block until a permit is released, so tests control exactly
    /// when a run completes.
    struct GatedTransfer {
        gate: Arc<Semaphore>,
        started: Arc<Semaphore>,
    }

    #[async_trait]
    impl TargetTransfer for GatedTransfer {
        async fn copy_to(
            &self,
            _target: &StorageTarget,
            _artifact: &Path,
            _remote_path: &str,
            _timeout: Duration,
            cancel: &CancellationToken,
        ) -> SyncOutcome {
            self.started.add_permits(1);
            tokio::select! {
                permit = self.gate.acquire() => {
                    permit.expect("gate open").forget();
                    SyncOutcome::Success { bytes_transferred: 1, size_unknown: false }
                }
                _ = cancel.cancelled() => SyncOutcome::Cancelled,
            }
        }

        async fn list_remote(
            &self,
            _target: &StorageTarget,
            _remote_path: &str,
        ) -> Result<Vec<RemoteEntry>, TransferError> {
            Ok(vec![])
        }

        async fn delete_remote(
            &self,
            _target: &StorageTarget,
            _remote_path: &str,
            _name: &str,
        ) -> Result<(), TransferError> {
            Ok(())
        }
    }

    struct Harness {
        _home: TempDir,
        _source: TempDir,
        home: PathBuf,
        deps: Arc<ExecutorDeps>,
        gate: Arc<Semaphore>,
        started: Arc<Semaphore>,
    }

    fn harness(max_concurrent: usize, task_ids: &[&str]) -> Harness {
        let home_dir = TempDir::new().expect("home");
        let source = TempDir::new().expect("source");
        fs::write(source.path().join("f"), "data").expect("write");

        let home = home_dir.path().to_path_buf();
        catalog::save_targets_at(
            &home,
            &[StorageTarget {
                id: TargetId::from("mem"),
                name: "mem".to_string(),
                kind: StorageKind::RawConfig {
                    params: BTreeMap::from([("type".to_string(), "memory".to_string())]),
                },
            }],
        )
        .expect("save targets");

        for id in task_ids {
            let now = Utc::now();
            catalog::save_task_at(
                &home,
                &BackupTask {
                    id: TaskId::from(*id),
                    name: id.to_string(),
                    description: None,
                    source_path: source.path().to_path_buf(),
                    targets: vec![TargetBinding {
                        target: TargetId::from("mem"),
                        remote_path: format!("backups/{id}"),
                    }],
                    schedule: Some("0 3 * * *".to_string()),
                    compress: false,
                    encryption: None,
                    retention_count: 0,
                    enabled: true,
                    created_at: now,
                    updated_at: now,
                },
            )
            .expect("save task");
        }

        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(Semaphore::new(0));
        let mut config = CaravanConfig::default();
        config.max_concurrent_runs = max_concurrent;
        config.tick_secs = 1;
        let deps = Arc::new(ExecutorDeps {
            home: home.clone(),
            config,
            boundary: BoundaryMap::identity(),
            transfer: Arc::new(GatedTransfer {
                gate: gate.clone(),
                started: started.clone(),
            }),
            temp_dir: home.join(".caravan").join("temp"),
        });

        Harness {
            _home: home_dir,
            _source: source,
            home,
            deps,
            gate,
            started,
        }
    }

    fn load_tasks(h: &Harness) -> Vec<BackupTask> {
        catalog::list_tasks_at(&h.home).expect("list tasks")
    }

    async fn wait_started(h: &Harness) {
        let permit = tokio::time::timeout(Duration::from_secs(5), h.started.acquire())
            .await
            .expect("a run should have started")
            .expect("semaphore open");
        permit.forget();
    }

    async fn wait_idle(handle: &EngineHandle) {
        for _ in 0..200 {
            let status = handle.status().await.expect("status");
            if status.active_runs == 0 && status.queued_runs == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never became idle");
    }

    #[tokio::test]
    async fn manual_trigger_is_single_flight() {
        let h = harness(4, &["alpha"]);
        let tasks = load_tasks(&h);
        let scheduler = Scheduler::new(h.deps.clone(), &tasks);
        let (handle, cmd_rx) = EngineHandle::channel(16);
        let (shutdown_tx, _) = broadcast::channel(4);
        let join = tokio::spawn(scheduler.run(cmd_rx, shutdown_tx.subscribe()));

        let first = handle.trigger(TaskId::from("alpha")).await.expect("trigger");
        let TriggerOutcome::Started(first_run) = first else {
            panic!("expected Started, got {first:?}");
        };
        wait_started(&h).await;

        // Gate still closed: the run is non-terminal, so a second trigger
        // is refused and no second run record appears.
        let second = handle.trigger(TaskId::from("alpha")).await.expect("trigger");
        assert_eq!(second, TriggerOutcome::AlreadyRunning);
        let runs = runlog::list_runs_at(&h.home, &TaskId::from("alpha")).expect("runs");
        assert_eq!(runs.len(), 1, "no second ExecutionRun may exist");

        h.gate.add_permits(1);
        wait_idle(&handle).await;

        let third = handle.trigger(TaskId::from("alpha")).await.expect("trigger");
        assert!(matches!(third, TriggerOutcome::Started(run) if run != first_run));
        h.gate.add_permits(1);
        wait_idle(&handle).await;

        let _ = shutdown_tx.send(());
        join.await.expect("join").expect("scheduler");
        let runs = runlog::list_runs_at(&h.home, &TaskId::from("alpha")).expect("runs");
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::Success));
    }

    #[tokio::test]
    async fn pool_bound_queues_second_task_in_trigger_order() {
        let h = harness(1, &["alpha", "beta"]);
        let tasks = load_tasks(&h);
        let scheduler = Scheduler::new(h.deps.clone(), &tasks);
        let (handle, cmd_rx) = EngineHandle::channel(16);
        let (shutdown_tx, _) = broadcast::channel(4);
        let join = tokio::spawn(scheduler.run(cmd_rx, shutdown_tx.subscribe()));

        assert!(matches!(
            handle.trigger(TaskId::from("alpha")).await.expect("trigger"),
            TriggerOutcome::Started(_)
        ));
        wait_started(&h).await;
        assert!(matches!(
            handle.trigger(TaskId::from("beta")).await.expect("trigger"),
            TriggerOutcome::Started(_)
        ));

        let status = handle.status().await.expect("status");
        assert_eq!(status.active_runs, 1);
        assert_eq!(status.queued_runs, 1, "beta must wait for the pool");
        assert_eq!(status.running_tasks, vec!["alpha", "beta"]);

        // Release alpha; beta starts; release beta.
        h.gate.add_permits(1);
        wait_started(&h).await;
        h.gate.add_permits(1);
        wait_idle(&handle).await;

        for id in ["alpha", "beta"] {
            let runs = runlog::list_runs_at(&h.home, &TaskId::from(id)).expect("runs");
            assert_eq!(runs[0].status, RunStatus::Success, "{id} should succeed");
        }

        let _ = shutdown_tx.send(());
        join.await.expect("join").expect("scheduler");
    }

    #[tokio::test]
    async fn queued_run_can_be_cancelled_without_starting() {
        let h = harness(1, &["alpha", "beta"]);
        let tasks = load_tasks(&h);
        let scheduler = Scheduler::new(h.deps.clone(), &tasks);
        let (handle, cmd_rx) = EngineHandle::channel(16);
        let (shutdown_tx, _) = broadcast::channel(4);
        let join = tokio::spawn(scheduler.run(cmd_rx, shutdown_tx.subscribe()));

        handle.trigger(TaskId::from("alpha")).await.expect("trigger");
        wait_started(&h).await;
        let TriggerOutcome::Started(beta_run) =
            handle.trigger(TaskId::from("beta")).await.expect("trigger")
        else {
            panic!("beta should be admitted");
        };

        assert!(handle.cancel_run(beta_run).await.expect("cancel"));
        let status = handle.status().await.expect("status");
        assert_eq!(status.queued_runs, 0);

        let stored = runlog::get_run_at(&h.home, &beta_run).expect("stored");
        assert_eq!(stored.status, RunStatus::Cancelled);
        assert!(stored
            .target_results
            .iter()
            .all(|r| r.outcome == caravan_core::types::TargetOutcome::Skipped));

        // Beta is no longer single-flight-blocked.
        assert!(matches!(
            handle.trigger(TaskId::from("beta")).await.expect("trigger"),
            TriggerOutcome::Started(_)
        ));

        h.gate.add_permits(2);
        wait_idle(&handle).await;
        let _ = shutdown_tx.send(());
        join.await.expect("join").expect("scheduler");
    }

    #[tokio::test]
    async fn cancelling_an_active_run_interrupts_the_transfer() {
        let h = harness(2, &["alpha"]);
        let tasks = load_tasks(&h);
        let scheduler = Scheduler::new(h.deps.clone(), &tasks);
        let (handle, cmd_rx) = EngineHandle::channel(16);
        let (shutdown_tx, _) = broadcast::channel(4);
        let join = tokio::spawn(scheduler.run(cmd_rx, shutdown_tx.subscribe()));

        let TriggerOutcome::Started(run) =
            handle.trigger(TaskId::from("alpha")).await.expect("trigger")
        else {
            panic!("expected Started");
        };
        wait_started(&h).await;

        assert!(handle.cancel_run(run).await.expect("cancel"));
        wait_idle(&handle).await;

        let stored = runlog::get_run_at(&h.home, &run).expect("stored");
        assert_eq!(stored.status, RunStatus::Cancelled);

        let _ = shutdown_tx.send(());
        join.await.expect("join").expect("scheduler");
    }

    #[tokio::test]
    async fn unknown_and_never_cancelled_runs_report_false() {
        let h = harness(1, &["alpha"]);
        let tasks = load_tasks(&h);
        let scheduler = Scheduler::new(h.deps.clone(), &tasks);
        let (handle, cmd_rx) = EngineHandle::channel(16);
        let (shutdown_tx, _) = broadcast::channel(4);
        let join = tokio::spawn(scheduler.run(cmd_rx, shutdown_tx.subscribe()));

        assert!(!handle.cancel_run(RunId::new()).await.expect("cancel"));
        assert!(matches!(
            handle.trigger(TaskId::from("ghost")).await.expect("trigger"),
            TriggerOutcome::Rejected(_)
        ));

        let _ = shutdown_tx.send(());
        join.await.expect("join").expect("scheduler");
    }

    #[tokio::test]
    async fn due_tick_admits_and_missed_tick_skips() {
        let h = harness(4, &["alpha"]);
        let tasks = load_tasks(&h);
        let mut scheduler = Scheduler::new(h.deps.clone(), &tasks);
        let (done_tx, mut done_rx) = mpsc::channel(8);
        let alpha = TaskId::from("alpha");

        // Force the entry due and tick: one run is admitted.
        scheduler.entries.get_mut(&alpha).expect("entry").next_due =
            Some(Utc::now() - chrono::Duration::minutes(5));
        scheduler.on_tick(&done_tx);
        assert!(scheduler.running.contains(&alpha));
        assert_eq!(scheduler.active, 1);
        let next_due = scheduler.entries[&alpha].next_due.expect("next due");
        assert!(next_due > Utc::now(), "due time must be recomputed forward");

        // Force due again while the run is still active: skipped, not
        // queued — exactly one run record exists.
        wait_started(&h).await;
        scheduler.entries.get_mut(&alpha).expect("entry").next_due =
            Some(Utc::now() - chrono::Duration::minutes(5));
        scheduler.on_tick(&done_tx);
        assert_eq!(scheduler.queue.len(), 0);
        let runs = runlog::list_runs_at(&h.home, &alpha).expect("runs");
        assert_eq!(runs.len(), 1, "missed tick must not create a second run");

        // Completion clears the gate.
        h.gate.add_permits(1);
        let done = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("completion in time")
            .expect("completion");
        scheduler.on_completion(done, &done_tx);
        assert!(!scheduler.running.contains(&alpha));
        assert_eq!(scheduler.active, 0);
    }

    #[tokio::test]
    async fn disabled_and_unscheduled_tasks_are_not_in_the_schedule_set() {
        let h = harness(4, &["alpha", "beta"]);
        let mut tasks = load_tasks(&h);
        tasks[0].enabled = false; // alpha
        tasks[1].schedule = None; // beta
        let scheduler = Scheduler::new(h.deps.clone(), &tasks);
        assert!(scheduler.entries.is_empty());
    }
}
