mod errors;
mod file;
mod manager;
mod manager_worker;
mod observer;
mod progress;
mod task;
mod types;
mod validator;
mod worker;

pub use errors::{ProgressRegression, Result, UploadError, ValidationError};
pub use file::{ByteStream, FileRef, FileSource};
pub use manager::{TaskSnapshot, UploadManager, UploadManagerBuilder, UploadManagerHandle};
pub use observer::{NoopObserver, UploadObserver};
pub use progress::{ProgressCallback, ProgressReporter, ProgressStream};
pub use task::{percent_of, UploadTask, DEFAULT_FAILURE_MESSAGE};
pub use types::{DocumentType, RemovalReason, TaskId, UploadEvent, UploadStatus, UploadTarget};
pub use validator::{validate, Validator, ALLOWED_EXTENSIONS, ALLOWED_MIME_TYPES, MAX_FILE_SIZE, MIB};
