use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use tracing::debug;
use url::Url;
use crate::config::ApiConfig;
use crate::upload::{FileRef, ProgressReporter, ProgressStream, UploadTarget};
use crate::utils::format_bytes;
use super::credentials::{CredentialProvider, StaticCredentials};
use super::{DocumentPage, DocumentRecord, DocumentTransport, ListFilter, Result, TransportError, UploadMetadata};

const TOTAL_COUNT_HEADER: &str = "X-Total-Count";
const TENANT_HEADER: &str = "X-Tenant-Id";

/// [`DocumentTransport`] speaking to the document API over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| TransportError::Network(format!("Invalid url {:?}: {}", base_url, err)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Network(format!("Invalid base url: {}", base_url)));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let credentials = StaticCredentials::new(config.token.clone(), config.tenant_id.clone());
        Self::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            Arc::new(credentials),
        )
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }
        if let Some(tenant_id) = self.credentials.tenant_id() {
            request = request.header(TENANT_HEADER, tenant_id);
        }
        request
    }

    async fn ensure_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::from_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl DocumentTransport for HttpTransport {
    async fn upload(
        &self,
        target: &UploadTarget,
        file: &FileRef,
        metadata: &UploadMetadata,
        progress: ProgressReporter,
    ) -> Result<DocumentRecord> {
        let url = self.endpoint(target.path_segments());
        debug!(%url, file = %file.name, size = %format_bytes(file.size), "uploading document");

        let stream = file.open_stream().await?;
        let body = Body::wrap_stream(ProgressStream::new(stream, progress, Some(file.size)));
        let part = Part::stream_with_length(body, file.size)
            .file_name(file.name.clone())
            .mime_str(file.content_type())?;

        let mut form = Form::new()
            .part("file", part)
            .text("documentType", metadata.document_type.to_string());
        if let Some(description) = &metadata.description {
            form = form.text("description", description.clone());
        }

        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            .send()
            .await?;

        let record = Self::ensure_success(response)
            .await?
            .json::<DocumentRecord>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;

        Ok(record)
    }

    async fn get(&self, document_id: &str) -> Result<DocumentRecord> {
        let url = self.endpoint(["documents", document_id]);
        let response = self.authorize(self.client.get(url)).send().await?;

        Self::ensure_success(response)
            .await?
            .json::<DocumentRecord>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))
    }

    async fn download(&self, document_id: &str) -> Result<Bytes> {
        let url = self.endpoint(["documents", document_id, "download"]);
        debug!(%url, "downloading document");
        let response = self.authorize(self.client.get(url)).send().await?;

        Ok(Self::ensure_success(response).await?.bytes().await?)
    }

    async fn list(&self, patient_id: &str, filter: &ListFilter) -> Result<DocumentPage> {
        let url = self.endpoint(["documents", "patient", patient_id]);
        let response = self
            .authorize(self.client.get(url))
            .query(&filter.query_pairs())
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let total_header = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        let records = response
            .json::<Vec<DocumentRecord>>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        let total_count = total_header.unwrap_or(records.len() as u64);

        Ok(DocumentPage { records, total_count })
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        let url = self.endpoint(["documents", document_id]);
        debug!(%url, "deleting document");
        let response = self.authorize(self.client.delete(url)).send().await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
