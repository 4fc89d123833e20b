pub mod config;
pub mod logging;
pub mod transport;
pub mod upload;
pub mod utils;

pub use config::{ApiConfig, Config, UploadConfig};
pub use transport::{
    CredentialProvider, DocumentRecord, DocumentTransport, HttpTransport, StaticCredentials,
    TransportError,
};
pub use upload::{
    DocumentType, FileRef, Result, TaskId, UploadError, UploadEvent, UploadManager,
    UploadManagerHandle, UploadObserver, UploadStatus, UploadTarget, UploadTask,
};
