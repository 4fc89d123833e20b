use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::config::UploadConfig;
use crate::transport::{DocumentRecord, DocumentTransport, TransportError, UploadMetadata};
use super::errors::{ProgressRegression, Result, UploadError};
use super::file::FileRef;
use super::manager::TaskSnapshot;
use super::observer::UploadObserver;
use super::task::UploadTask;
use super::types::{
    DocumentType, ManagerCommand, RemovalReason, TaskId, UploadEvent, UploadStatus, UploadTarget,
};
use super::validator::Validator;
use super::worker::{UploadWorker, WorkerMessage};

struct TaskHandle {
    task: UploadTask,
    cancellation_token: Option<CancellationToken>,
    /// Retried tasks sit out their backoff before joining the queue
    waiting_backoff: bool,
}

/// Owns the task registry. Every mutation happens on this task.
pub(crate) struct UploadManagerWorker {
    transport: Arc<dyn DocumentTransport>,
    observer: Arc<dyn UploadObserver>,
    validator: Validator,
    config: UploadConfig,

    tasks: HashMap<TaskId, TaskHandle>,
    /// Registry order, oldest first
    order: Vec<TaskId>,
    queued_tasks: VecDeque<TaskId>,
    /// Tasks whose worker has not reported back yet
    in_flight: HashSet<TaskId>,

    event_tx: broadcast::Sender<UploadEvent>,
    snapshot_tx: watch::Sender<TaskSnapshot>,
    message_tx: mpsc::UnboundedSender<WorkerMessage>,
    message_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Parent of every retention and backoff timer
    shutdown_token: CancellationToken,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        transport: Arc<dyn DocumentTransport>,
        observer: Arc<dyn UploadObserver>,
        config: UploadConfig,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
        snapshot_tx: watch::Sender<TaskSnapshot>,
    ) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            transport,
            observer,
            validator: Validator::new(config.max_file_size),
            config,
            tasks: HashMap::new(),
            order: Vec::new(),
            queued_tasks: VecDeque::new(),
            in_flight: HashSet::new(),
            event_tx,
            snapshot_tx,
            message_tx,
            message_rx,
            shutdown_token: CancellationToken::new(),
        };

        info!(
            max_concurrent = worker.config.max_concurrent,
            max_file_size = worker.config.max_file_size,
            "upload manager started"
        );

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown) | None => break,
                    Some(command) => worker.handle_command(command),
                },
                Some(message) = worker.message_rx.recv() => {
                    worker.handle_message(message);
                    worker.settle();
                }
            }
        }

        worker.shutdown();
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Submit { files, target, document_type, description, reply } => {
                let result = self.submit(files, target, document_type, description);
                self.settle();
                let _ = reply.send(result);
            }
            ManagerCommand::Dismiss { task_id, reply } => {
                let removed = self.remove_task(task_id, RemovalReason::Dismissed);
                self.settle();
                let _ = reply.send(removed);
            }
            ManagerCommand::Cancel { task_id, reply } => {
                let result = self.cancel_upload(task_id);
                self.settle();
                let _ = reply.send(result);
            }
            ManagerCommand::Retry { task_id, reply } => {
                let result = self.retry_upload(task_id);
                self.settle();
                let _ = reply.send(result);
            }
            ManagerCommand::ClearFinished { reply } => {
                let cleared = self.clear_finished();
                self.settle();
                let _ = reply.send(cleared);
            }
            ManagerCommand::Shutdown => {}
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Progress { task_id, loaded, total } => {
                self.handle_progress(task_id, loaded, total);
            }
            WorkerMessage::Finished { task_id, result } => {
                self.handle_task_completion(task_id, result);
            }
            WorkerMessage::Expired(task_id) => {
                let expired = self
                    .tasks
                    .get(&task_id)
                    .is_some_and(|handle| handle.task.status == UploadStatus::Succeeded);
                if expired {
                    self.remove_task(task_id, RemovalReason::Expired);
                }
            }
            WorkerMessage::RetryReady(task_id) => {
                if let Some(handle) = self.tasks.get_mut(&task_id) {
                    if handle.waiting_backoff && handle.task.status == UploadStatus::Pending {
                        handle.waiting_backoff = false;
                        self.queued_tasks.push_back(task_id);
                    }
                }
            }
        }
    }

    fn submit(
        &mut self,
        files: Vec<FileRef>,
        target: UploadTarget,
        document_type: DocumentType,
        description: Option<String>,
    ) -> Result<Vec<TaskId>> {
        target.ensure_valid()?;

        let mut task_ids = Vec::with_capacity(files.len());
        for file in files {
            if let Err(err) = self.validator.validate(&file) {
                warn!(file = %file.name, error = %err, "file rejected");
                self.notify(|observer| observer.on_rejected(&file.name, &err));
                let _ = self.event_tx.send(UploadEvent::Rejected {
                    file_name: file.name,
                    error: err,
                });
                continue;
            }

            let task = UploadTask::new(file, target.clone(), document_type, description.clone());
            task_ids.push(self.insert_task(task, false));
        }

        Ok(task_ids)
    }

    fn insert_task(&mut self, task: UploadTask, waiting_backoff: bool) -> TaskId {
        let task_id = task.id;
        let file_name = task.file.name.clone();
        debug!(%task_id, file = %file_name, attempt = task.attempt, "task added");

        self.tasks.insert(task_id, TaskHandle {
            task,
            cancellation_token: None,
            waiting_backoff,
        });
        self.order.push(task_id);
        if !waiting_backoff {
            self.queued_tasks.push_back(task_id);
        }

        let _ = self.event_tx.send(UploadEvent::TaskAdded { task_id, file_name });
        task_id
    }

    /// Dispatch whatever fits, then publish. Runs before any reply goes out
    /// so callers observe their own changes.
    fn settle(&mut self) {
        self.process_queue();
        self.publish_snapshot();
    }

    fn process_queue(&mut self) {
        while self.has_free_slot() {
            let Some(task_id) = self.queued_tasks.pop_front() else {
                break;
            };

            let pending = self
                .tasks
                .get(&task_id)
                .is_some_and(|handle| handle.task.status == UploadStatus::Pending);
            if pending {
                self.start_upload(task_id);
            }
        }
    }

    fn has_free_slot(&self) -> bool {
        self.config.max_concurrent == 0 || self.in_flight.len() < self.config.max_concurrent
    }

    fn start_upload(&mut self, task_id: TaskId) {
        let Some(handle) = self.tasks.get_mut(&task_id) else {
            return;
        };

        let old_state = match handle.task.start() {
            Ok(old_state) => old_state,
            Err(err) => {
                error!(%task_id, error = %err, "cannot start upload");
                return;
            }
        };

        let cancellation_token = CancellationToken::new();
        handle.cancellation_token = Some(cancellation_token.clone());

        let worker = UploadWorker {
            task_id,
            transport: self.transport.clone(),
            cancellation_token,
            message_tx: self.message_tx.clone(),
        };
        let target = handle.task.target.clone();
        let file = handle.task.file.clone();
        let metadata = UploadMetadata {
            document_type: handle.task.document_type,
            description: handle.task.description.clone(),
        };

        info!(%task_id, file = %file.name, %target, "upload started");
        tokio::spawn(worker.run(target, file, metadata));

        self.in_flight.insert(task_id);
        self.emit_state_change(task_id, old_state, UploadStatus::Uploading);
    }

    fn handle_progress(&mut self, task_id: TaskId, loaded: u64, total: Option<u64>) {
        let Some(handle) = self.tasks.get_mut(&task_id) else {
            return;
        };

        match handle.task.record_progress(loaded, total) {
            Ok(Some(percent)) => {
                let _ = self.event_tx.send(UploadEvent::Progress { task_id, percent });
            }
            Ok(None) => {}
            Err(regression) => self.handle_regression(task_id, regression),
        }
    }

    fn handle_regression(&mut self, task_id: TaskId, regression: ProgressRegression) {
        error!(%task_id, %regression, "aborting upload");
        if let Some(token) = self
            .tasks
            .get(&task_id)
            .and_then(|handle| handle.cancellation_token.as_ref())
        {
            token.cancel();
        }
        self.fail_task(task_id, regression.to_string());
    }

    fn handle_task_completion(
        &mut self,
        task_id: TaskId,
        result: std::result::Result<DocumentRecord, TransportError>,
    ) {
        self.in_flight.remove(&task_id);

        let Some(handle) = self.tasks.get_mut(&task_id) else {
            debug!(%task_id, "completion for removed task");
            return;
        };
        handle.cancellation_token = None;
        if handle.task.status != UploadStatus::Uploading {
            debug!(%task_id, status = ?handle.task.status, "late completion ignored");
            return;
        }

        match result {
            Ok(record) => {
                let old_state = match handle.task.succeed(record.clone()) {
                    Ok(old_state) => old_state,
                    Err(err) => {
                        error!(%task_id, error = %err, "cannot complete upload");
                        return;
                    }
                };
                info!(%task_id, document_id = %record.id, "upload succeeded");

                self.emit_state_change(task_id, old_state, UploadStatus::Succeeded);
                self.notify(|observer| observer.on_complete(task_id, &record));
                let _ = self.event_tx.send(UploadEvent::Completed { task_id, record });
                self.schedule_expiry(task_id);
            }
            Err(err) => {
                warn!(%task_id, error = %err, "upload failed");
                self.fail_task(task_id, err.to_string());
            }
        }
    }

    fn fail_task(&mut self, task_id: TaskId, message: String) {
        let Some(handle) = self.tasks.get_mut(&task_id) else {
            return;
        };

        let old_state = match handle.task.fail(message) {
            Ok(old_state) => old_state,
            Err(err) => {
                debug!(%task_id, error = %err, "task already finished");
                return;
            }
        };
        let error = handle.task.error.clone().unwrap_or_default();

        self.emit_state_change(task_id, old_state, UploadStatus::Failed);
        self.notify(|observer| observer.on_error(Some(task_id), &error));
        let _ = self.event_tx.send(UploadEvent::Failed { task_id, error });
    }

    /// Run an observer callback. A panicking observer is logged and
    /// otherwise ignored.
    fn notify(&self, callback: impl FnOnce(&dyn UploadObserver)) {
        let observer = self.observer.as_ref();
        if panic::catch_unwind(AssertUnwindSafe(|| callback(observer))).is_err() {
            error!("upload observer panicked");
        }
    }

    fn schedule_expiry(&self, task_id: TaskId) {
        self.schedule(self.config.retention, WorkerMessage::Expired(task_id));
    }

    /// Deliver `message` after `delay` unless the worker shuts down first.
    fn schedule(&self, delay: Duration, message: WorkerMessage) {
        let message_tx = self.message_tx.clone();
        let token = self.shutdown_token.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = message_tx.send(message);
                }
                _ = token.cancelled() => {}
            }
        });
    }

    fn cancel_upload(&mut self, task_id: TaskId) -> Result<()> {
        let handle = self.tasks.get_mut(&task_id).ok_or(UploadError::TaskNotFound(task_id))?;

        match handle.task.status {
            UploadStatus::Pending => {
                self.queued_tasks.retain(|id| *id != task_id);
                handle.waiting_backoff = false;
            }
            UploadStatus::Uploading => {
                if let Some(token) = &handle.cancellation_token {
                    token.cancel();
                }
            }
            status => return Err(UploadError::invalid_state(task_id, status, "cancel")),
        }

        info!(%task_id, "upload cancelled");
        self.fail_task(task_id, TransportError::Cancelled.to_string());
        Ok(())
    }

    fn retry_upload(&mut self, task_id: TaskId) -> Result<TaskId> {
        let handle = self.tasks.get(&task_id).ok_or(UploadError::TaskNotFound(task_id))?;
        if handle.task.status != UploadStatus::Failed {
            return Err(UploadError::invalid_state(task_id, handle.task.status, "retry"));
        }

        let attempts = handle.task.attempt + 1;
        if attempts > self.config.max_retries {
            return Err(UploadError::RetryLimitExceeded { attempts });
        }

        let delay = self.config.retry_backoff.delay(handle.task.attempt);
        let task = handle.task.next_attempt();

        self.remove_task(task_id, RemovalReason::Retried);
        let new_id = self.insert_task(task, true);
        info!(%task_id, %new_id, attempt = attempts, ?delay, "retry scheduled");

        self.schedule(delay, WorkerMessage::RetryReady(new_id));

        Ok(new_id)
    }

    fn clear_finished(&mut self) -> usize {
        let finished: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.tasks
                    .get(*id)
                    .is_some_and(|handle| handle.task.status.is_terminal())
            })
            .copied()
            .collect();

        for task_id in &finished {
            self.remove_task(*task_id, RemovalReason::Cleared);
        }
        finished.len()
    }

    /// Unknown ids are a no-op. An in-flight upload is cancelled; its slot
    /// frees once the worker reports back.
    fn remove_task(&mut self, task_id: TaskId, reason: RemovalReason) -> bool {
        let Some(handle) = self.tasks.remove(&task_id) else {
            return false;
        };

        if let Some(token) = handle.cancellation_token {
            token.cancel();
        }
        self.order.retain(|id| *id != task_id);
        self.queued_tasks.retain(|id| *id != task_id);

        debug!(%task_id, ?reason, "task removed");
        let _ = self.event_tx.send(UploadEvent::Removed { task_id, reason });
        true
    }

    fn emit_state_change(&self, task_id: TaskId, old_state: UploadStatus, new_state: UploadStatus) {
        let _ = self.event_tx.send(UploadEvent::StateChanged {
            task_id,
            old_state,
            new_state,
        });
    }

    fn publish_snapshot(&self) {
        let tasks: Vec<UploadTask> = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|handle| handle.task.clone()))
            .collect();
        self.snapshot_tx.send_replace(Arc::new(tasks));
    }

    fn shutdown(&mut self) {
        self.shutdown_token.cancel();
        for handle in self.tasks.values() {
            if let Some(token) = &handle.cancellation_token {
                token.cancel();
            }
        }
        self.queued_tasks.clear();
        self.publish_snapshot();
        info!(tasks = self.tasks.len(), "upload manager stopped");
    }
}
