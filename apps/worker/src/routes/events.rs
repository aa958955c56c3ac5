use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{Event, EventPatch, Registration};
use crate::queue::CertificateRequest;
use crate::records::VersionedRecord;
use crate::state::AppState;
use crate::storage::keys::{template_key, ArtifactKind};
use crate::storage::PresignMethod;

/// Lifetime of presigned URLs handed to clients.
const PRESIGN_TTL: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub event: Event,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct EnqueueRequest {
    pub bundle: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub changed: bool,
    pub record: VersionedRecord<Event>,
}

#[derive(Deserialize)]
pub struct CertificateQuery {
    #[serde(default = "default_kind")]
    pub kind: ArtifactKind,
}

fn default_kind() -> ArtifactKind {
    ArtifactKind::Pdf
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUploadRequest {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlResponse {
    pub key: String,
    pub url: String,
    pub expires_in: u64,
}

fn new_id(requested: Option<String>) -> String {
    requested
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// An empty collection lists as `[]` rather than 404.
fn or_empty<T>(result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Err(AppError::NotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}

/// GET /api/v1/events
pub async fn handle_list_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<VersionedRecord<Event>>>> {
    Ok(Json(or_empty(state.events.query_all(true).await)?))
}

/// POST /api/v1/events
pub async fn handle_create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<VersionedRecord<Event>>)> {
    if req.event.name.trim().is_empty() {
        return Err(AppError::Validation("Event name must not be empty".to_string()));
    }
    let record = state.events.create(&new_id(req.id), req.event).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/events/:id
pub async fn handle_get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VersionedRecord<Event>>> {
    Ok(Json(state.events.query_one(&id).await?))
}

/// PATCH /api/v1/events/:id
pub async fn handle_update_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<UpdateResponse>> {
    let existing = state.events.query_one(&id).await?;
    let outcome = state.events.update(&existing, &patch).await?;
    Ok(Json(UpdateResponse {
        changed: !outcome.is_noop(),
        record: outcome.into_record(),
    }))
}

/// DELETE /api/v1/events/:id
pub async fn handle_delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let existing = state.events.query_one_any_status(&id).await?;
    state.events.soft_delete(&existing).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/events/:id/history
pub async fn handle_event_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VersionedRecord<Event>>>> {
    Ok(Json(state.events.history(&id).await?))
}

/// GET /api/v1/events/:id/registrations
pub async fn handle_list_registrations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VersionedRecord<Registration>>>> {
    state.events.query_one(&id).await?;
    Ok(Json(or_empty(state.registrations(&id).query_all(true).await)?))
}

/// POST /api/v1/events/:id/registrations
pub async fn handle_create_registration(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<VersionedRecord<Registration>>)> {
    state.events.query_one(&id).await?;
    let registration = Registration {
        event_id: id.clone(),
        first_name: req.first_name,
        last_name: req.last_name,
        email: req.email,
        certificate_img_object_key: None,
        certificate_pdf_object_key: None,
    };
    if registration.full_name().is_empty() {
        return Err(AppError::Validation("Registrant name must not be empty".to_string()));
    }
    let record = state
        .registrations(&id)
        .create(&new_id(req.id), registration)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/events/:id/registrations/:registration_id/certificate?kind=pdf|png
pub async fn handle_certificate_url(
    State(state): State<AppState>,
    Path((id, registration_id)): Path<(String, String)>,
    Query(query): Query<CertificateQuery>,
) -> Result<Json<PresignedUrlResponse>> {
    let registration = state.registrations(&id).query_one(&registration_id).await?;
    let key = match query.kind {
        ArtifactKind::Pdf => registration.fields.certificate_pdf_object_key,
        ArtifactKind::Png => registration.fields.certificate_img_object_key,
    }
    .ok_or_else(|| {
        AppError::NotFound(format!(
            "Registration with ID={registration_id} has no certificate yet"
        ))
    })?;

    if !state.objects.exists(&key).await? {
        return Err(AppError::NotFound(format!("Certificate {key} is missing from storage")));
    }
    let url = state
        .objects
        .presigned_url(&key, PresignMethod::Get, PRESIGN_TTL, None)
        .await?;
    Ok(Json(PresignedUrlResponse {
        key,
        url,
        expires_in: PRESIGN_TTL.as_secs(),
    }))
}

/// POST /api/v1/events/:id/template
///
/// Points the event at a new background image key and returns a presigned PUT URL for it.
pub async fn handle_template_upload_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TemplateUploadRequest>,
) -> Result<Json<PresignedUrlResponse>> {
    let key = template_key(&id, &req.file_name);
    if key.ends_with('/') {
        return Err(AppError::Validation("fileName must name a file".to_string()));
    }

    let existing = state.events.query_one(&id).await?;
    let url = state
        .objects
        .presigned_url(
            &key,
            PresignMethod::Put,
            PRESIGN_TTL,
            req.content_type.as_deref(),
        )
        .await?;
    let patch = EventPatch {
        certificate_template: Some(key.clone()),
        ..Default::default()
    };
    state.events.update(&existing, &patch).await?;

    Ok(Json(PresignedUrlResponse {
        key,
        url,
        expires_in: PRESIGN_TTL.as_secs(),
    }))
}

/// POST /api/v1/events/:id/certificates
pub async fn handle_enqueue_certificates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<EnqueueRequest>>,
) -> Result<(StatusCode, Json<CertificateRequest>)> {
    state.events.query_one(&id).await?;
    let request = CertificateRequest {
        event_id: id,
        bundle: body.map(|Json(b)| b.bundle).unwrap_or_default(),
    };
    state.queue.send(&serde_json::to_string(&request)?).await?;
    info!("[Event={}] Certificate generation requested", request.event_id);
    Ok((StatusCode::ACCEPTED, Json(request)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::records::memory::MemoryRecordBackend;
    use crate::models::RegistrationPatch;
    use crate::records::RecordStore;
    use crate::routes::build_router;
    use crate::state::AppState;
    use crate::testing::{FakeObjectStore, FakeQueue};

    fn app_with_objects() -> (Router, Arc<FakeQueue>, Arc<FakeObjectStore>) {
        let backend = Arc::new(MemoryRecordBackend::default());
        let queue = Arc::new(FakeQueue::default());
        let objects = Arc::new(FakeObjectStore::default());
        let state = AppState {
            events: RecordStore::new(backend, "tester"),
            queue: queue.clone(),
            objects: objects.clone(),
        };
        (build_router(state), queue, objects)
    }

    fn app() -> (Router, Arc<FakeQueue>) {
        let (router, queue, _) = app_with_objects();
        (router, queue)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (u16, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status().as_u16();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_event_lifecycle_over_http() {
        let (app, _) = app();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/events",
            Some(json!({"id": "E1", "name": "RustConf"})),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(body["sortKey"], "v0#E1");
        assert_eq!(body["latestVersion"], 0);

        let (status, body) = call(
            &app,
            Method::PATCH,
            "/api/v1/events/E1",
            Some(json!({"venue": "Hall A"})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["changed"], true);
        assert_eq!(body["record"]["latestVersion"], 1);
        assert_eq!(body["record"]["updatedBy"], "tester");

        let (_, body) = call(
            &app,
            Method::PATCH,
            "/api/v1/events/E1",
            Some(json!({"venue": "Hall A"})),
        )
        .await;
        assert_eq!(body["changed"], false);

        let (status, body) = call(&app, Method::GET, "/api/v1/events/E1/history", None).await;
        assert_eq!(status, 200);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = call(&app, Method::DELETE, "/api/v1/events/E1", None).await;
        assert_eq!(status, 204);
        let (status, body) = call(&app, Method::GET, "/api/v1/events/E1", None).await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = call(&app, Method::GET, "/api/v1/events", None).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_registrations_are_scoped_to_their_event() {
        let (app, _) = app();
        call(&app, Method::POST, "/api/v1/events", Some(json!({"id": "E1", "name": "A"}))).await;
        call(&app, Method::POST, "/api/v1/events", Some(json!({"id": "E2", "name": "B"}))).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/events/E1/registrations",
            Some(json!({"id": "R1", "firstName": "Ana", "lastName": "Cruz"})),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(body["partitionKey"], "Registration#E1");
        assert_eq!(body["eventId"], "E1");

        let (_, body) = call(&app, Method::GET, "/api/v1/events/E1/registrations", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (_, body) = call(&app, Method::GET, "/api/v1/events/E2/registrations", None).await;
        assert_eq!(body, json!([]));

        let (status, _) = call(&app, Method::GET, "/api/v1/events/E9/registrations", None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_conflict() {
        let (app, _) = app();
        let event = json!({"id": "E1", "name": "RustConf"});
        call(&app, Method::POST, "/api/v1/events", Some(event.clone())).await;
        let (status, body) = call(&app, Method::POST, "/api/v1/events", Some(event)).await;
        assert_eq!(status, 409);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_enqueue_sends_request_for_existing_event_only() {
        let (app, queue) = app();
        call(&app, Method::POST, "/api/v1/events", Some(json!({"id": "E1", "name": "A"}))).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/events/E1/certificates",
            Some(json!({"bundle": true})),
        )
        .await;
        assert_eq!(status, 202);
        assert_eq!(body, json!({"eventId": "E1", "bundle": true}));
        assert_eq!(queue.pending(), vec![r#"{"eventId":"E1","bundle":true}"#.to_string()]);

        let (status, _) = call(&app, Method::POST, "/api/v1/events/E9/certificates", None).await;
        assert_eq!(status, 404);
        assert_eq!(queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_template_upload_points_event_at_new_key() {
        let (app, _) = app();
        call(&app, Method::POST, "/api/v1/events", Some(json!({"id": "E1", "name": "A"}))).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/events/E1/template",
            Some(json!({"fileName": "bg.png", "contentType": "image/png"})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["key"], "templates/E1/bg.png");
        assert!(body["url"].as_str().unwrap().contains("method=Put"));

        let (_, event) = call(&app, Method::GET, "/api/v1/events/E1", None).await;
        assert_eq!(event["certificateTemplate"], "templates/E1/bg.png");
        assert_eq!(event["latestVersion"], 1);
    }

    #[tokio::test]
    async fn test_certificate_url_requires_generated_artifact() {
        let backend = Arc::new(MemoryRecordBackend::default());
        let objects = Arc::new(FakeObjectStore::default());
        let state = AppState {
            events: RecordStore::new(backend, "tester"),
            queue: Arc::new(FakeQueue::default()),
            objects: objects.clone(),
        };
        let app = build_router(state.clone());
        call(&app, Method::POST, "/api/v1/events", Some(json!({"id": "E1", "name": "A"}))).await;
        call(
            &app,
            Method::POST,
            "/api/v1/events/E1/registrations",
            Some(json!({"id": "R1", "firstName": "Ana", "lastName": "Cruz"})),
        )
        .await;

        let uri = "/api/v1/events/E1/registrations/R1/certificate?kind=png";
        let (status, _) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, 404);

        let key = "certificates/E1/Ana Cruz/E1_Ana Cruz.png";
        let registrations = state.registrations("E1");
        let live = registrations.query_one("R1").await.unwrap();
        let patch = RegistrationPatch {
            certificate_img_object_key: Some(key.to_string()),
            ..Default::default()
        };
        registrations.update_silent(&live, &patch).await.unwrap();

        // Attached but not uploaded.
        let (status, _) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, 404);

        objects.insert(key, b"png".to_vec());
        let (status, body) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["key"], key);
        assert!(body["url"].as_str().unwrap().contains("method=Get"));
        assert_eq!(body["expiresIn"], 300);
    }
}
