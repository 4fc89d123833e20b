use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::sync::Arc;
use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use medupload::config::{Config, DEFAULT_CONFIG_FILE};
use medupload::upload::{DocumentType, FileRef, UploadEvent, UploadManager, UploadTarget};
use medupload::utils::format_file_size;
use medupload::{logging, HttpTransport};

const CONFIG_ENV: &str = "MEDUPLOAD_CONFIG";
const PATIENT_ENV: &str = "MEDUPLOAD_PATIENT_ID";
const APPOINTMENT_ENV: &str = "MEDUPLOAD_APPOINTMENT_ID";
const DOCUMENT_TYPE_ENV: &str = "MEDUPLOAD_DOCUMENT_TYPE";
const DESCRIPTION_ENV: &str = "MEDUPLOAD_DESCRIPTION";

fn load_config() -> anyhow::Result<Config> {
    let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    if Path::new(&path).exists() {
        Ok(Config::load(&path)?)
    } else {
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    logging::init(config.log_level.as_deref());

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: medupload <file>... (target from {PATIENT_ENV} or {APPOINTMENT_ENV})");
    }

    let patient_id = env::var(PATIENT_ENV).ok();
    let appointment_id = env::var(APPOINTMENT_ENV).ok();
    let target = UploadTarget::from_refs(patient_id.as_deref(), appointment_id.as_deref())?;
    let document_type = match env::var(DOCUMENT_TYPE_ENV) {
        Ok(value) => value.parse::<DocumentType>()?,
        Err(_) => DocumentType::default(),
    };
    let description = env::var(DESCRIPTION_ENV).ok();

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = FileRef::from_path(path)
            .await
            .with_context(|| format!("cannot open {path}"))?;
        info!(file = %file.name, size = %format_file_size(file.size), "selected");
        files.push(file);
    }

    let transport = Arc::new(HttpTransport::from_config(&config.api)?);
    let handle = UploadManager::new(transport, config.upload.clone());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe();

    let task_ids = manager.submit(files, target, document_type, description).await?;
    let mut remaining: HashSet<_> = task_ids.into_iter().collect();
    let mut failures = 0usize;

    while !remaining.is_empty() {
        match events.recv().await {
            Ok(UploadEvent::Progress { task_id, percent }) => {
                info!(%task_id, percent, "progress");
            }
            Ok(UploadEvent::Completed { task_id, record }) => {
                info!(%task_id, document_id = %record.id, file = %record.file_name, "uploaded");
                remaining.remove(&task_id);
            }
            Ok(UploadEvent::Failed { task_id, error }) => {
                error!(%task_id, %error, "upload failed");
                failures += 1;
                remaining.remove(&task_id);
            }
            Ok(UploadEvent::Rejected { file_name, error }) => {
                warn!(file = %file_name, %error, "rejected");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
                remaining.retain(|id| {
                    manager
                        .get_task(*id)
                        .is_some_and(|task| !task.status.is_terminal())
                });
            }
            Err(RecvError::Closed) => break,
        }
    }

    handle.shutdown().await?;
    if failures > 0 {
        bail!("{failures} upload(s) failed");
    }
    Ok(())
}
