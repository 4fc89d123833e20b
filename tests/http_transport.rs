use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use medupload::transport::{
    DocumentTransport, HttpTransport, ListFilter, StaticCredentials, TransportError, UploadMetadata,
};
use medupload::upload::{DocumentType, FileRef, ProgressReporter, UploadTarget};

#[derive(Debug, Clone, Default)]
struct ReceivedPart {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

#[derive(Default)]
struct Captured {
    parts: Mutex<Vec<ReceivedPart>>,
    headers: Mutex<Vec<HeaderMap>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
    deleted: Mutex<Vec<String>>,
}

fn record_json(id: &str, file_name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "fileName": file_name,
        "fileSize": "1.5 KB",
        "documentType": "Lab Result",
        "description": "fasting panel",
        "uploadedBy": "dr.grey",
        "uploadedAt": "2024-05-01T10:00:00",
        "downloadUrl": format!("/api/documents/{id}/download"),
    })
}

async fn upload_to_patient(
    State(captured): State<Arc<Captured>>,
    Path(patient_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    captured.headers.lock().unwrap().push(headers);

    let mut file_name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let mut part = ReceivedPart {
            name: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            body: Vec::new(),
        };
        part.body = field.bytes().await.unwrap().to_vec();
        if let Some(name) = &part.file_name {
            file_name = name.clone();
        }
        captured.parts.lock().unwrap().push(part);
    }

    (StatusCode::CREATED, Json(record_json(&format!("{patient_id}-doc"), &file_name)))
}

async fn upload_to_appointment(Path(_appointment_id): Path<String>) -> impl IntoResponse {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "message": "File type '.exe' is not allowed" })),
    )
}

async fn list_documents(
    State(captured): State<Arc<Captured>>,
    Path(patient_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    captured.queries.lock().unwrap().push(query);
    (
        [("X-Total-Count", "42")],
        Json(json!([
            record_json(&format!("{patient_id}-1"), "a.pdf"),
            record_json(&format!("{patient_id}-2"), "b.pdf"),
        ])),
    )
}

async fn get_document(Path(id): Path<String>) -> impl IntoResponse {
    if id == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Document not found" }))).into_response();
    }
    Json(json!({
        "id": id,
        "fileName": "scan.pdf",
        "fileSize": "2 MB",
        "documentType": "Imaging",
        "uploadedBy": "dr.grey",
        "uploadedAt": "2024-05-01T10:00:00Z",
    }))
    .into_response()
}

async fn delete_document(State(captured): State<Arc<Captured>>, Path(id): Path<String>) -> impl IntoResponse {
    if id == "locked" {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "Document is locked" }))).into_response();
    }
    captured.deleted.lock().unwrap().push(id);
    StatusCode::NO_CONTENT.into_response()
}

async fn download_document(Path(id): Path<String>) -> impl IntoResponse {
    if id == "broken" {
        return (StatusCode::SERVICE_UNAVAILABLE, "storage offline").into_response();
    }
    ([(header::CONTENT_TYPE, "application/pdf")], format!("%PDF-{id}")).into_response()
}

async fn serve(captured: Arc<Captured>) -> String {
    let router = Router::new()
        .route(
            "/api/documents/patient/:patient_id",
            post(upload_to_patient).get(list_documents),
        )
        .route("/api/documents/appointment/:appointment_id", post(upload_to_appointment))
        .route("/api/documents/:id", get(get_document).delete(delete_document))
        .route("/api/documents/:id/download", get(download_document))
        .with_state(captured);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}/api")
}

fn transport(base_url: &str) -> HttpTransport {
    let credentials = StaticCredentials::new(Some("secret".to_string()), Some("clinic-7".to_string()));
    HttpTransport::new(base_url, Duration::from_secs(5), Arc::new(credentials)).unwrap()
}

#[tokio::test]
async fn test_upload_sends_multipart_form() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured.clone()).await;
    let transport = transport(&base_url);

    let content = vec![b'x'; 1536];
    let file = FileRef::from_bytes("labs.pdf", content.clone()).with_mime_type("application/pdf");
    let metadata = UploadMetadata {
        document_type: DocumentType::LabResult,
        description: Some("fasting panel".to_string()),
    };

    let loaded = Arc::new(AtomicU64::new(0));
    let progress = {
        let loaded = loaded.clone();
        ProgressReporter::new(move |bytes, total| {
            assert_eq!(total, Some(1536));
            loaded.fetch_max(bytes, Ordering::SeqCst);
        })
    };

    let record = transport
        .upload(&UploadTarget::patient("p1"), &file, &metadata, progress)
        .await
        .unwrap();

    assert_eq!(record.id, "p1-doc");
    assert_eq!(record.file_name, "labs.pdf");
    assert_eq!(record.document_type, "Lab Result");
    assert_eq!(record.description.as_deref(), Some("fasting panel"));
    assert_eq!(loaded.load(Ordering::SeqCst), 1536);

    let parts = captured.parts.lock().unwrap().clone();
    let by_name: HashMap<_, _> = parts.iter().map(|part| (part.name.as_str(), part)).collect();
    let file_part = by_name["file"];
    assert_eq!(file_part.file_name.as_deref(), Some("labs.pdf"));
    assert_eq!(file_part.content_type.as_deref(), Some("application/pdf"));
    assert_eq!(file_part.body, content);
    assert_eq!(by_name["documentType"].body, b"Lab Result");
    assert_eq!(by_name["description"].body, b"fasting panel");

    let headers = captured.headers.lock().unwrap()[0].clone();
    assert_eq!(headers[header::AUTHORIZATION], "Bearer secret");
    assert_eq!(headers["x-tenant-id"], "clinic-7");
}

#[tokio::test]
async fn test_upload_streams_file_from_disk() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured.clone()).await;
    let transport = transport(&base_url);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let content = "line\n".repeat(40_000);
    tokio::fs::write(&path, &content).await.unwrap();
    let file = FileRef::from_path(&path).await.unwrap();

    let metadata = UploadMetadata { document_type: DocumentType::Other, description: None };
    transport
        .upload(&UploadTarget::patient("p2"), &file, &metadata, ProgressReporter::noop())
        .await
        .unwrap();

    let parts = captured.parts.lock().unwrap().clone();
    assert_eq!(parts.len(), 2, "description is omitted when absent");
    let file_part = parts.iter().find(|part| part.name == "file").unwrap();
    assert_eq!(file_part.body.len(), content.len());
}

#[tokio::test]
async fn test_validation_error_carries_server_message() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured).await;
    let transport = transport(&base_url);

    let file = FileRef::from_bytes("a.pdf", vec![1u8; 10]);
    let metadata = UploadMetadata { document_type: DocumentType::Other, description: None };
    let err = transport
        .upload(&UploadTarget::appointment("ap1"), &file, &metadata, ProgressReporter::noop())
        .await
        .unwrap_err();

    assert_eq!(err, TransportError::Validation("File type '.exe' is not allowed".to_string()));
    assert_eq!(err.to_string(), "File type '.exe' is not allowed");
}

#[tokio::test]
async fn test_list_reads_total_count_header() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured.clone()).await;
    let transport = transport(&base_url);

    let filter = ListFilter {
        document_type: Some(DocumentType::Prescription),
        page: Some(2),
        page_size: Some(20),
    };
    let page = transport.list("p9", &filter).await.unwrap();

    assert_eq!(page.total_count, 42);
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].id, "p9-1");

    let query = captured.queries.lock().unwrap()[0].clone();
    assert_eq!(query["documentType"], "Prescription");
    assert_eq!(query["page"], "2");
    assert_eq!(query["pageSize"], "20");
}

#[tokio::test]
async fn test_upload_and_list_share_the_patient_url() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured).await;
    let transport = transport(&base_url);

    let patient_id = "p1/../x";
    let file = FileRef::from_bytes("a.pdf", vec![1u8; 10]);
    let metadata = UploadMetadata { document_type: DocumentType::Other, description: None };
    let record = transport
        .upload(&UploadTarget::patient(patient_id), &file, &metadata, ProgressReporter::noop())
        .await
        .unwrap();
    assert_eq!(record.id, "p1/../x-doc");

    let page = transport.list(patient_id, &ListFilter::default()).await.unwrap();
    assert_eq!(page.records[0].id, "p1/../x-1");
}

#[tokio::test]
async fn test_get_and_download() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured).await;
    let transport = transport(&base_url);

    let record = transport.get("doc-5").await.unwrap();
    assert_eq!(record.id, "doc-5");
    assert_eq!(record.document_type, "Imaging");
    assert!(record.description.is_none());

    let err = transport.get("missing").await.unwrap_err();
    assert!(matches!(err, TransportError::NotFound(_)));

    let bytes = transport.download("doc-5").await.unwrap();
    assert_eq!(&bytes[..], b"%PDF-doc-5");

    let err = transport.download("broken").await.unwrap_err();
    assert_eq!(err, TransportError::server_error(503, "storage offline"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_delete() {
    let captured = Arc::new(Captured::default());
    let base_url = serve(captured.clone()).await;
    let transport = transport(&base_url);

    transport.delete("doc-1").await.unwrap();
    assert_eq!(captured.deleted.lock().unwrap().clone(), vec!["doc-1".to_string()]);

    let err = transport.delete("locked").await.unwrap_err();
    assert_eq!(err, TransportError::Forbidden("Document is locked".to_string()));
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() {
    let transport = transport("http://127.0.0.1:9/api");
    let err = transport.get("doc-1").await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)), "{:?}", err);
}
