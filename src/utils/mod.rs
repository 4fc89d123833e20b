pub mod format;
pub mod retry;
pub(crate) mod serde_millis;

pub use format::{format_bytes, format_file_size};
pub use retry::RetryStrategy;
