use chrono::{DateTime, Utc};
use crate::transport::DocumentRecord;
use super::errors::{ProgressRegression, Result, UploadError};
use super::file::FileRef;
use super::types::{DocumentType, TaskId, UploadStatus, UploadTarget};

pub const DEFAULT_FAILURE_MESSAGE: &str = "Upload failed";

/// One file's journey from selection to a terminal state.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: FileRef,
    pub target: UploadTarget,
    pub document_type: DocumentType,
    pub description: Option<String>,
    pub status: UploadStatus,
    /// 0..=100, only meaningful while uploading or after success
    pub progress_percent: u8,
    pub bytes_uploaded: u64,
    /// Set only when `Failed`
    pub error: Option<String>,
    /// Set only when `Succeeded`
    pub record: Option<DocumentRecord>,
    /// 0 for the first submission, incremented by each retry
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(
        file: FileRef,
        target: UploadTarget,
        document_type: DocumentType,
        description: Option<String>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            file,
            target,
            document_type,
            description,
            status: UploadStatus::Pending,
            progress_percent: 0,
            bytes_uploaded: 0,
            error: None,
            record: None,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_valid_transition(from: UploadStatus, to: UploadStatus) -> bool {
        use UploadStatus::*;

        matches!(
            (from, to),
            (Pending, Uploading)
                | (Pending, Failed)
                | (Uploading, Uploading)
                | (Uploading, Succeeded)
                | (Uploading, Failed)
        )
    }

    fn transition(&mut self, to: UploadStatus, action: &'static str) -> Result<UploadStatus> {
        let from = self.status;
        if !Self::is_valid_transition(from, to) {
            return Err(UploadError::invalid_state(self.id, from, action));
        }
        self.status = to;
        Ok(from)
    }

    /// `Pending -> Uploading`, progress restarts at zero.
    pub fn start(&mut self) -> Result<UploadStatus> {
        let from = self.transition(UploadStatus::Uploading, "start")?;
        self.progress_percent = 0;
        self.bytes_uploaded = 0;
        self.started_at = Some(Utc::now());
        Ok(from)
    }

    /// Apply a byte-count update. Returns the new percentage when it moved.
    ///
    /// Updates for tasks that are not uploading are ignored; a byte count
    /// lower than one already seen is reported as a regression.
    pub fn record_progress(
        &mut self,
        loaded: u64,
        total: Option<u64>,
    ) -> std::result::Result<Option<u8>, ProgressRegression> {
        if self.status != UploadStatus::Uploading {
            return Ok(None);
        }
        let percent = percent_of(loaded, total);
        if loaded < self.bytes_uploaded || percent < self.progress_percent {
            return Err(ProgressRegression {
                previous: self.bytes_uploaded,
                reported: loaded,
            });
        }
        self.bytes_uploaded = loaded;

        if percent == self.progress_percent {
            return Ok(None);
        }
        self.progress_percent = percent;
        Ok(Some(percent))
    }

    pub fn succeed(&mut self, record: DocumentRecord) -> Result<UploadStatus> {
        let from = self.transition(UploadStatus::Succeeded, "complete")?;
        self.progress_percent = 100;
        self.record = Some(record);
        self.completed_at = Some(Utc::now());
        Ok(from)
    }

    /// Blank messages fall back to [`DEFAULT_FAILURE_MESSAGE`].
    pub fn fail(&mut self, message: impl Into<String>) -> Result<UploadStatus> {
        let from = self.transition(UploadStatus::Failed, "fail")?;
        let message = message.into();
        self.error = Some(if message.trim().is_empty() {
            DEFAULT_FAILURE_MESSAGE.to_string()
        } else {
            message
        });
        self.completed_at = Some(Utc::now());
        Ok(from)
    }

    /// Fresh `Pending` task for the same file, target and metadata.
    pub fn next_attempt(&self) -> Self {
        let mut task = Self::new(
            self.file.clone(),
            self.target.clone(),
            self.document_type,
            self.description.clone(),
        );
        task.attempt = self.attempt + 1;
        task
    }
}

/// `round(loaded / total * 100)` clamped to 0..=100; unknown total is 0%.
pub fn percent_of(loaded: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let percent = (loaded as u128 * 100 + total as u128 / 2) / total as u128;
            percent.min(100) as u8
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DocumentRecord;

    fn task() -> UploadTask {
        UploadTask::new(
            FileRef::from_bytes("scan.pdf", vec![0u8; 100]),
            UploadTarget::patient("p1"),
            DocumentType::LabResult,
            None,
        )
    }

    #[test]
    fn test_upload_status_transition() {
        use UploadStatus::*;

        // valid
        assert!(UploadTask::is_valid_transition(Pending, Uploading));
        assert!(UploadTask::is_valid_transition(Uploading, Uploading));
        assert!(UploadTask::is_valid_transition(Uploading, Succeeded));
        assert!(UploadTask::is_valid_transition(Uploading, Failed));
        assert!(UploadTask::is_valid_transition(Pending, Failed));

        // invalid
        assert!(!UploadTask::is_valid_transition(Pending, Succeeded));
        assert!(!UploadTask::is_valid_transition(Succeeded, Uploading));
        assert!(!UploadTask::is_valid_transition(Failed, Uploading));
        assert!(!UploadTask::is_valid_transition(Failed, Pending));
        assert!(!UploadTask::is_valid_transition(Succeeded, Failed));
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent_of(0, Some(200)), 0);
        assert_eq!(percent_of(1, Some(200)), 1);
        assert_eq!(percent_of(199, Some(200)), 100);
        assert_eq!(percent_of(50, None), 0);
        assert_eq!(percent_of(50, Some(0)), 0);
        assert_eq!(percent_of(500, Some(200)), 100);
    }

    #[test]
    fn test_progress_only_moves_forward() {
        let mut task = task();
        assert_eq!(task.record_progress(10, Some(100)), Ok(None));

        task.start().unwrap();
        assert_eq!(task.record_progress(10, Some(100)), Ok(Some(10)));
        assert_eq!(task.record_progress(10, Some(100)), Ok(None));
        assert_eq!(task.record_progress(55, Some(100)), Ok(Some(55)));

        let regression = task.record_progress(20, Some(100)).unwrap_err();
        assert_eq!(regression, ProgressRegression { previous: 55, reported: 20 });
        assert_eq!(task.progress_percent, 55);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = task();
        task.start().unwrap();
        task.succeed(DocumentRecord::test_record("doc-1", "scan.pdf")).unwrap();

        assert_eq!(task.status, UploadStatus::Succeeded);
        assert_eq!(task.progress_percent, 100);
        assert!(task.fail("late").is_err());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_fail_falls_back_to_generic_message() {
        let mut task = task();
        task.start().unwrap();
        task.fail("  ").unwrap();
        assert_eq!(task.error.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert!(task.record.is_none());
    }

    #[test]
    fn test_next_attempt_is_a_new_task() {
        let mut task = task();
        task.start().unwrap();
        task.fail("boom").unwrap();

        let retry = task.next_attempt();
        assert_ne!(retry.id, task.id);
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.status, UploadStatus::Pending);
        assert_eq!(retry.target, task.target);
        assert!(retry.error.is_none());
    }
}
