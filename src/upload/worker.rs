use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::transport::{DocumentRecord, DocumentTransport, TransportError, UploadMetadata};
use super::file::FileRef;
use super::progress::ProgressReporter;
use super::types::{TaskId, UploadTarget};

/// Everything that reaches the manager worker from outside the command
/// channel. One channel keeps per-task ordering intact.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Progress {
        task_id: TaskId,
        loaded: u64,
        total: Option<u64>,
    },
    Finished {
        task_id: TaskId,
        result: Result<DocumentRecord, TransportError>,
    },
    /// Retention window of a succeeded task elapsed
    Expired(TaskId),
    /// Backoff of a retried task elapsed
    RetryReady(TaskId),
}

/// Runs a single upload against the transport.
pub(crate) struct UploadWorker {
    pub(crate) task_id: TaskId,
    pub(crate) transport: Arc<dyn DocumentTransport>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) message_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl UploadWorker {
    pub(crate) async fn run(self, target: UploadTarget, file: FileRef, metadata: UploadMetadata) {
        let task_id = self.task_id;
        let reporter = {
            let message_tx = self.message_tx.clone();
            ProgressReporter::new(move |loaded, total| {
                let _ = message_tx.send(WorkerMessage::Progress { task_id, loaded, total });
            })
        };

        let upload = AssertUnwindSafe(self.transport.upload(&target, &file, &metadata, reporter))
            .catch_unwind();

        let result = tokio::select! {
            result = upload => match result {
                Ok(result) => result,
                Err(_) => Err(TransportError::Internal("transport panicked during upload".to_string())),
            },
            _ = self.cancellation_token.cancelled() => {
                debug!(%task_id, "upload cancelled");
                Err(TransportError::Cancelled)
            }
        };

        let _ = self.message_tx.send(WorkerMessage::Finished { task_id, result });
    }
}
