//! Synchronous pre-flight checks run before a file may become a task.

use super::errors::ValidationError;
use super::file::FileRef;

pub const MIB: u64 = 1024 * 1024;

/// Default size cap, 10 MiB.
pub const MAX_FILE_SIZE: u64 = 10 * MIB;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "text/csv",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "doc", "docx", "txt", "csv", "xls", "xlsx",
];

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_file_size: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE)
    }
}

impl Validator {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// First failing rule wins: size, then type.
    pub fn validate(&self, file: &FileRef) -> Result<(), ValidationError> {
        if file.size > self.max_file_size {
            return Err(ValidationError::TooLarge {
                max_mib: self.max_file_size.div_ceil(MIB),
            });
        }

        if mime_allowed(file.mime_type.as_deref()) || extension_allowed(file.extension().as_deref()) {
            return Ok(());
        }

        Err(ValidationError::TypeNotAllowed {
            allowed: ALLOWED_EXTENSIONS.iter().map(|ext| format!(".{}", ext)).collect(),
        })
    }
}

/// Validate against the default size cap.
pub fn validate(file: &FileRef) -> Result<(), ValidationError> {
    Validator::default().validate(file)
}

fn mime_allowed(mime_type: Option<&str>) -> bool {
    let Some(mime_type) = mime_type else {
        return false;
    };
    // drop parameters such as "; charset=utf-8"
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    ALLOWED_MIME_TYPES.iter().any(|allowed| allowed.eq_ignore_ascii_case(essence))
}

fn extension_allowed(extension: Option<&str>) -> bool {
    extension.is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext))
}
