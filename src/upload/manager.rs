use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use crate::config::UploadConfig;
use crate::transport::DocumentTransport;
use super::errors::{Result, UploadError};
use super::file::FileRef;
use super::manager_worker::UploadManagerWorker;
use super::observer::{NoopObserver, UploadObserver};
use super::task::UploadTask;
use super::types::{DocumentType, ManagerCommand, TaskId, UploadEvent, UploadTarget};

/// Registry contents in insertion order, as of the last worker turn.
pub type TaskSnapshot = Arc<Vec<UploadTask>>;

/// Cheap, cloneable front end to the manager worker.
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
    snapshot_rx: watch::Receiver<TaskSnapshot>,
}

/// Manager front end plus the join handle of its worker task.
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Stop the worker, cancelling in-flight uploads, and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.manager.command_tx.send(ManagerCommand::Shutdown).await;
        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|_| UploadError::ManagerShutdown)
    }
}

pub struct UploadManagerBuilder {
    transport: Arc<dyn DocumentTransport>,
    observer: Arc<dyn UploadObserver>,
    config: UploadConfig,
}

impl UploadManagerBuilder {
    pub fn config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Spawns the worker; must be called inside a tokio runtime.
    pub fn build(self) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(self.config.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(TaskSnapshot::default());

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            self.transport,
            self.observer,
            self.config,
            command_rx,
            event_tx.clone(),
            snapshot_tx,
        ));

        UploadManagerHandle {
            manager: UploadManager {
                command_tx,
                event_tx,
                snapshot_rx,
            },
            worker_handle,
        }
    }
}

impl UploadManager {
    pub fn builder(transport: Arc<dyn DocumentTransport>) -> UploadManagerBuilder {
        UploadManagerBuilder {
            transport,
            observer: Arc::new(NoopObserver),
            config: UploadConfig::default(),
        }
    }

    /// Default observer, given config.
    pub fn new(transport: Arc<dyn DocumentTransport>, config: UploadConfig) -> UploadManagerHandle {
        Self::builder(transport).config(config).build()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Validate each file and queue the accepted ones.
    ///
    /// Rejected files produce an `UploadEvent::Rejected` and an observer
    /// callback but no task. An invalid target rejects the whole batch.
    pub async fn submit(
        &self,
        files: Vec<FileRef>,
        target: UploadTarget,
        document_type: DocumentType,
        description: Option<String>,
    ) -> Result<Vec<TaskId>> {
        self.request(|reply| ManagerCommand::Submit {
            files,
            target,
            document_type,
            description,
            reply,
        })
        .await?
    }

    /// Remove a task whatever its state. Returns false for unknown ids.
    pub async fn dismiss(&self, task_id: TaskId) -> Result<bool> {
        self.request(|reply| ManagerCommand::Dismiss { task_id, reply }).await
    }

    /// Abort a pending or uploading task; it ends up `Failed`.
    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        self.request(|reply| ManagerCommand::Cancel { task_id, reply }).await?
    }

    /// Replace a failed task with a fresh attempt, returning the new id.
    pub async fn retry(&self, task_id: TaskId) -> Result<TaskId> {
        self.request(|reply| ManagerCommand::Retry { task_id, reply }).await?
    }

    /// Drop every succeeded or failed task, returning how many went.
    pub async fn clear_finished(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearFinished { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(ManagerCommand::Shutdown)
            .await
            .map_err(|_| UploadError::ManagerShutdown)
    }

    /// Stream of task events.
    ///
    /// Slow receivers may observe `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    /// Receiver that changes whenever the registry does.
    pub fn watch(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<UploadTask> {
        self.snapshot_rx
            .borrow()
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
    }
}
