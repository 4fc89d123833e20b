use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::transport::DocumentRecord;
use super::errors::{Result, UploadError, ValidationError};
use super::file::FileRef;

/// Registry key of one upload task, minted by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The clinical record a document is attached to. Exactly one per task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum UploadTarget {
    Patient(String),
    Appointment(String),
}

impl UploadTarget {
    pub fn patient(id: impl Into<String>) -> Self {
        Self::Patient(id.into())
    }

    pub fn appointment(id: impl Into<String>) -> Self {
        Self::Appointment(id.into())
    }

    /// Build a target from the two optional references a caller may hold.
    /// Blank ids count as absent.
    pub fn from_refs(patient_id: Option<&str>, appointment_id: Option<&str>) -> Result<Self> {
        let patient_id = patient_id.map(str::trim).filter(|id| !id.is_empty());
        let appointment_id = appointment_id.map(str::trim).filter(|id| !id.is_empty());

        match (patient_id, appointment_id) {
            (Some(id), None) => Ok(Self::patient(id)),
            (None, Some(id)) => Ok(Self::appointment(id)),
            (Some(_), Some(_)) => Err(UploadError::invalid_target(
                "ambiguous: both a patient and an appointment were given",
            )),
            (None, None) => Err(UploadError::invalid_target(
                "missing: either a patient or an appointment is required",
            )),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Patient(id) | Self::Appointment(id) => id,
        }
    }

    /// Rejects targets whose id is blank.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.id().trim().is_empty() {
            return Err(UploadError::invalid_target("missing: target id is empty"));
        }
        Ok(())
    }

    /// Path segments of the upload endpoint for this target. The id is
    /// always a single segment, whatever characters it holds.
    pub fn path_segments(&self) -> [&str; 3] {
        match self {
            Self::Patient(id) => ["documents", "patient", id.as_str()],
            Self::Appointment(id) => ["documents", "appointment", id.as_str()],
        }
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient(id) => write!(f, "patient {}", id),
            Self::Appointment(id) => write!(f, "appointment {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DocumentType {
    #[serde(rename = "Medical Record")]
    MedicalRecord,
    #[serde(rename = "Lab Result")]
    LabResult,
    Prescription,
    Insurance,
    #[serde(rename = "Consent Form")]
    ConsentForm,
    Referral,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        Self::MedicalRecord,
        Self::LabResult,
        Self::Prescription,
        Self::Insurance,
        Self::ConsentForm,
        Self::Referral,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalRecord => "Medical Record",
            Self::LabResult => "Lab Result",
            Self::Prescription => "Prescription",
            Self::Insurance => "Insurance",
            Self::ConsentForm => "Consent Form",
            Self::Referral => "Referral",
            Self::Other => "Other",
        }
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        Self::MedicalRecord
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UploadError::Config(format!("unknown document type: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadStatus {
    /// Registered, waiting for a dispatch slot
    Pending,
    /// Handed to the transport
    Uploading,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Retention window elapsed after success
    Expired,
    Dismissed,
    Cleared,
    /// Replaced by a fresh task through `retry`
    Retried,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    TaskAdded {
        task_id: TaskId,
        file_name: String,
    },

    StateChanged {
        task_id: TaskId,
        old_state: UploadStatus,
        new_state: UploadStatus,
    },

    Progress {
        task_id: TaskId,
        percent: u8,
    },

    Completed {
        task_id: TaskId,
        record: DocumentRecord,
    },

    Failed {
        task_id: TaskId,
        error: String,
    },

    /// File refused by the validator, no task was created
    Rejected {
        file_name: String,
        error: ValidationError,
    },

    Removed {
        task_id: TaskId,
        reason: RemovalReason,
    },
}

pub enum ManagerCommand {
    Submit {
        files: Vec<FileRef>,
        target: UploadTarget,
        document_type: DocumentType,
        description: Option<String>,
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },

    Dismiss {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },

    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    Retry {
        task_id: TaskId,
        reply: oneshot::Sender<Result<TaskId>>,
    },

    /// Drop every task in a terminal state
    ClearFinished {
        reply: oneshot::Sender<usize>,
    },

    Shutdown,
}
