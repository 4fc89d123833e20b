use crate::transport::DocumentRecord;
use super::errors::ValidationError;
use super::types::TaskId;

/// Terminal-outcome callbacks. Invoked from the manager's worker task, so
/// implementations must return quickly.
pub trait UploadObserver: Send + Sync {
    /// An upload reached `Succeeded`.
    fn on_complete(&self, _task_id: TaskId, _record: &DocumentRecord) {}

    /// A file was rejected by validation (`task_id` is `None`) or an upload
    /// reached `Failed`.
    fn on_error(&self, _task_id: Option<TaskId>, _message: &str) {}

    /// A file never became a task. Forwards to `on_error` unless overridden.
    fn on_rejected(&self, file_name: &str, error: &ValidationError) {
        self.on_error(None, &format!("{}: {}", file_name, error));
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl UploadObserver for NoopObserver {}
