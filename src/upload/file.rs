use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Where the bytes of a [`FileRef`] live.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// Handle to a selected file: its name, declared size and MIME type plus a
/// cheap reference to the content. Cloning never copies the payload.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub source: FileSource,
}

impl FileRef {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: None,
            source: FileSource::Memory(data),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Not a file"));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "File name is not valid UTF-8"))?
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            mime_type: None,
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Lower-cased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// MIME type sent on the wire; falls back to `application/octet-stream`.
    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|mime| !mime.is_empty())
            .unwrap_or("application/octet-stream")
    }

    /// Stream the content in chunks.
    pub async fn open_stream(&self) -> io::Result<ByteStream> {
        match &self.source {
            FileSource::Path(path) => {
                let file = File::open(path).await?;
                Ok(Box::pin(ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)))
            }
            FileSource::Memory(data) => {
                let data = data.clone();
                let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                    .step_by(STREAM_CHUNK_SIZE)
                    .map(|start| {
                        let end = (start + STREAM_CHUNK_SIZE).min(data.len());
                        Ok(data.slice(start..end))
                    })
                    .collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
        }
    }
}
