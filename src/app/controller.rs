use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::link::DeviceBridge;
use crate::app::automator::{ItemOutcome, TransferAutomator};
use crate::app::error::AutomationError;
use crate::app::models::{
    AbortReason, Batch, BatchSnapshot, BatchStatus, FailedItem, OperationKind, WorkItem,
};
use crate::app::publisher::{StatusPublisher, StatusSubscription};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run status shared between the control API and the worker. Pause and stop
/// only flip the status; the worker reads it between items.
struct RunControl {
    status: Mutex<BatchStatus>,
    signal: Condvar,
}

#[derive(Debug, PartialEq, Eq)]
enum Turn {
    Proceed,
    Stop,
}

enum RunEnd {
    Finished,
    Stopped,
    Failed(AutomationError),
}

impl RunControl {
    /// Blocks while paused. Stop wins over pause.
    fn next_turn(&self) -> Turn {
        let mut status = lock(&self.status);
        loop {
            match *status {
                BatchStatus::Stopping => return Turn::Stop,
                BatchStatus::Paused => {
                    status = self
                        .signal
                        .wait(status)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                _ => return Turn::Proceed,
            }
        }
    }
}

/// Runs one batch at a time on a background thread and exposes
/// pause/resume/stop. Items are never interrupted half way.
pub struct BatchController<B: DeviceBridge + 'static> {
    automator: Arc<Mutex<TransferAutomator<B>>>,
    control: Arc<RunControl>,
    publisher: Arc<StatusPublisher>,
    start_gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    trace_id: String,
}

impl<B: DeviceBridge + 'static> BatchController<B> {
    pub fn new(automator: TransferAutomator<B>, trace_id: impl Into<String>) -> Self {
        Self {
            automator: Arc::new(Mutex::new(automator)),
            control: Arc::new(RunControl {
                status: Mutex::new(BatchStatus::Idle),
                signal: Condvar::new(),
            }),
            publisher: Arc::new(StatusPublisher::new()),
            start_gate: Mutex::new(()),
            worker: Mutex::new(None),
            trace_id: trace_id.into(),
        }
    }

    pub fn status(&self) -> BatchSnapshot {
        self.publisher.latest()
    }

    pub fn subscribe(&self) -> StatusSubscription {
        self.publisher.subscribe()
    }

    pub fn publisher(&self) -> Arc<StatusPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Checks for an online device, then processes `batch` on a worker thread.
    /// Allowed from idle, completed and aborted.
    pub fn start(&self, batch: Batch) -> Result<BatchSnapshot, AutomationError> {
        let _gate = lock(&self.start_gate);
        if lock(&self.control.status).is_active() {
            return Err(AutomationError::AlreadyRunning);
        }
        self.join_worker();

        let device = lock(&self.automator).require_online()?;
        let run_id = Uuid::new_v4().to_string();
        info!(
            trace_id = %self.trace_id,
            run_id = %run_id,
            operation = batch.operation.label(),
            items = batch.len(),
            serial = %device.serial,
            "batch started"
        );

        let mut snapshot = BatchSnapshot {
            run_id: Some(run_id.clone()),
            operation: Some(batch.operation),
            status: BatchStatus::Running,
            total: batch.len(),
            message: format!("opening {} on {}", batch.operation.label(), device.serial),
            started_at: Some(Utc::now()),
            ..BatchSnapshot::default()
        };
        {
            let mut status = lock(&self.control.status);
            *status = BatchStatus::Running;
            snapshot.version = self.publisher.publish(snapshot.clone());
        }

        let worker = Worker {
            automator: Arc::clone(&self.automator),
            control: Arc::clone(&self.control),
            publisher: Arc::clone(&self.publisher),
            trace_id: self.trace_id.clone(),
            run_id,
        };
        let initial = snapshot.clone();
        *lock(&self.worker) = Some(thread::spawn(move || worker.run(batch, initial)));
        Ok(snapshot)
    }

    /// A batch of one.
    pub fn run_single(
        &self,
        operation: OperationKind,
        item: WorkItem,
    ) -> Result<BatchSnapshot, AutomationError> {
        let from = item.from_location.clone();
        let to = item.to_location.clone();
        let batch = Batch::new(operation, &from, &to, vec![item])?;
        self.start(batch)
    }

    /// Takes effect after the current item.
    pub fn pause(&self) -> Result<BatchSnapshot, AutomationError> {
        self.transition(
            "pause",
            |status| status == BatchStatus::Running,
            BatchStatus::Paused,
            "paused",
        )
    }

    pub fn resume(&self) -> Result<BatchSnapshot, AutomationError> {
        self.transition(
            "resume",
            |status| status == BatchStatus::Paused,
            BatchStatus::Running,
            "resumed",
        )
    }

    /// The current item still finishes; the run then tears down and aborts.
    pub fn stop(&self) -> Result<BatchSnapshot, AutomationError> {
        self.transition(
            "stop",
            |status| matches!(status, BatchStatus::Running | BatchStatus::Paused),
            BatchStatus::Stopping,
            "stopping after the current item",
        )
    }

    /// Waits for the current run, if any, to reach a terminal status.
    pub fn wait_for_finish(&self, timeout: Duration) -> Option<BatchSnapshot> {
        self.publisher
            .wait_until(timeout, |snapshot| !snapshot.status.is_active())
    }

    /// Stops an active run and joins the worker.
    pub fn shutdown(&self) {
        let _ = self.stop();
        self.join_worker();
    }

    fn transition(
        &self,
        action: &str,
        allowed: fn(BatchStatus) -> bool,
        next: BatchStatus,
        message: &str,
    ) -> Result<BatchSnapshot, AutomationError> {
        let mut status = lock(&self.control.status);
        if !allowed(*status) {
            return Err(AutomationError::InvalidTransition {
                action: action.to_string(),
                status: status.label().to_string(),
            });
        }
        *status = next;
        self.control.signal.notify_all();
        let snapshot = self.publisher.update(|snapshot| {
            snapshot.status = next;
            snapshot.message = message.to_string();
        });
        info!(trace_id = %self.trace_id, action = action, status = next.label(), "run control");
        Ok(snapshot)
    }

    fn join_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(trace_id = %self.trace_id, "batch worker panicked");
            }
        }
    }
}

struct Worker<B: DeviceBridge + 'static> {
    automator: Arc<Mutex<TransferAutomator<B>>>,
    control: Arc<RunControl>,
    publisher: Arc<StatusPublisher>,
    trace_id: String,
    run_id: String,
}

impl<B: DeviceBridge + 'static> Worker<B> {
    fn run(self, batch: Batch, mut snapshot: BatchSnapshot) {
        let mut automator = lock(&self.automator);
        let mut end = self.drive(&mut automator, &batch, &mut snapshot);
        if matches!(end, RunEnd::Finished | RunEnd::Stopped) {
            if let Err(err) = automator.finish() {
                warn!(trace_id = %self.trace_id, run_id = %self.run_id, error = %err, "final confirm failed");
                if err.is_connection_loss() {
                    end = RunEnd::Failed(err);
                }
            }
        }

        let (final_status, abort_reason) = match end {
            RunEnd::Finished => (BatchStatus::Completed, None),
            RunEnd::Stopped => (BatchStatus::Aborted, Some(AbortReason::StopRequested)),
            RunEnd::Failed(err) if err.is_connection_loss() => {
                (BatchStatus::Aborted, Some(AbortReason::DeviceLost(err.to_string())))
            }
            RunEnd::Failed(err) => (BatchStatus::Aborted, Some(AbortReason::Fatal(err.to_string()))),
        };

        snapshot.current_item = None;
        if let Err(err) = automator.teardown() {
            warn!(trace_id = %self.trace_id, run_id = %self.run_id, error = %err, "teardown failed");
            snapshot.teardown_error = Some(err.to_string());
        }
        drop(automator);

        snapshot.abort_reason = abort_reason;
        snapshot.finished_at = Some(Utc::now());
        let mut status = lock(&self.control.status);
        *status = final_status;
        snapshot.status = final_status;
        snapshot.message = snapshot.summary();
        self.publisher.publish(snapshot.clone());
        self.control.signal.notify_all();
        info!(
            trace_id = %self.trace_id,
            run_id = %self.run_id,
            status = final_status.label(),
            summary = %snapshot.message,
            "batch finished"
        );
    }

    fn drive(
        &self,
        automator: &mut TransferAutomator<B>,
        batch: &Batch,
        snapshot: &mut BatchSnapshot,
    ) -> RunEnd {
        if let Err(err) = automator.begin(batch) {
            warn!(trace_id = %self.trace_id, run_id = %self.run_id, error = %err, "setup failed");
            return RunEnd::Failed(err);
        }

        for item in &batch.items {
            if self.control.next_turn() == Turn::Stop {
                return RunEnd::Stopped;
            }
            snapshot.current_item = Some(item.clone());
            snapshot.message = format!(
                "{} {}/{}: {}",
                batch.operation.label(),
                snapshot.current_index + 1,
                snapshot.total,
                item.imei
            );
            self.publish(snapshot);

            let outcome = automator.transfer_one(item);
            snapshot.current_index += 1;
            match outcome {
                Ok(ItemOutcome::Succeeded) => snapshot.succeeded_count += 1,
                Ok(ItemOutcome::Failed(reason)) => snapshot.failed_items.push(FailedItem {
                    item: item.clone(),
                    reason,
                }),
                Err(err) => {
                    snapshot.failed_items.push(FailedItem {
                        item: item.clone(),
                        reason: err.to_string(),
                    });
                    return RunEnd::Failed(err);
                }
            }
            self.publish(snapshot);
        }
        RunEnd::Finished
    }

    fn publish(&self, snapshot: &mut BatchSnapshot) {
        let status = lock(&self.control.status);
        snapshot.status = *status;
        snapshot.version = self.publisher.publish(snapshot.clone());
    }
}
