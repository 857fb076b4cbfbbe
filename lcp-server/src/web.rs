//! HTTP surface: REST endpoints, basic-auth middleware, problem-details
//! error rendering.
//!
//! Thin adapter: handlers validate parameters, call the status controller or
//! license factory, and render. Lifecycle endpoints are public (the reading
//! system calls them); everything that creates, lists, or revokes goes
//! through basic auth.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::license::factory::{EncryptionRequest, LicenseError, LicenseFactory};
use crate::license::status::{Device, StatusController, StatusError};
use crate::license::types::{
    CONTENT_TYPES, LICENSE_MIME, LicenseDocument, LicenseInfo, LicenseRequest, LicenseStatus,
    Publication, STATUS_MIME, StatusDocument, UserInfo,
};
use crate::store::{Store, StoreError};

/// Shared immutable state: repository handle, signing machinery, config.
pub struct AppState {
    pub store: Arc<Store>,
    pub factory: LicenseFactory,
    pub status: StatusController,
    pub config: Config,
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/revoke/{license_id}", put(revoke_license))
        .route("/licenses/", post(create_license))
        .route("/licenses/{license_id}", post(fresh_license))
        .route(
            "/publications",
            get(list_publications).post(create_publication),
        )
        .route(
            "/publications/{uuid}",
            get(get_publication)
                .put(update_publication)
                .delete(delete_publication),
        )
        .route(
            "/licenseinfo",
            get(list_licenseinfo).post(create_licenseinfo),
        )
        .route(
            "/licenseinfo/{uuid}",
            get(get_licenseinfo)
                .put(update_licenseinfo)
                .delete(delete_licenseinfo),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    let mut app = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/status/{license_id}", get(get_status))
        .route("/register/{license_id}", post(register_device))
        .route("/renew/{license_id}", put(renew_license))
        .route("/return/{license_id}", put(return_license))
        .merge(admin)
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    if let Some(dir) = &state.config.resources {
        app = app.nest_service("/resources", ServeDir::new(dir));
    }
    app
}

// ─── Error rendering ───────────────────────────────────────────────────

/// Problem-details body (RFC 7807 shape).
#[derive(Debug, Serialize)]
struct Problem {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Unprocessable(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn problem(&self) -> Problem {
        let (title, detail) = match self {
            ApiError::BadRequest(d) => ("Bad Request", Some(d.clone())),
            ApiError::Unauthorized => ("Unauthorized", None),
            ApiError::Forbidden(d) => ("Forbidden", Some(d.clone())),
            ApiError::NotFound(d) => ("Not Found", Some(d.clone())),
            ApiError::Unprocessable(d) => ("Unprocessable Entity", Some(d.clone())),
            ApiError::Internal(d) => ("Internal Server Error", Some(d.clone())),
        };
        Problem {
            kind: "about:blank",
            title: title.to_string(),
            status: self.status().as_u16(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(%detail, "request failed");
        }
        let status = self.status();
        let mut response = (status, Json(self.problem())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Basic realm=\"lcp-server\""),
            );
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::Conflict(detail) => ApiError::BadRequest(detail),
            StoreError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::NotFound => ApiError::NotFound("license not found".into()),
            StatusError::Forbidden(detail) => ApiError::Forbidden(detail),
            StatusError::BadEnd(detail) => ApiError::BadRequest(detail),
            StatusError::Store(e) => e.into(),
        }
    }
}

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::PublicationNotFound => {
                ApiError::NotFound("publication not found".into())
            }
            LicenseError::MissingProfile
            | LicenseError::UnsupportedProfile(_)
            | LicenseError::BadPassHash(_) => ApiError::BadRequest(err.to_string()),
            LicenseError::Crypto(e) => ApiError::Internal(e.to_string()),
            LicenseError::Signing(e) => ApiError::Internal(e.to_string()),
        }
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound("no such route".into())
}

// ─── Auth ──────────────────────────────────────────────────────────────

/// Credential check against the configured admin account.
fn basic_auth_ok(authorization: Option<&str>, username: &str, password: &str) -> bool {
    authorization
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| STANDARD.decode(b64).ok())
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|creds| {
            creds
                .split_once(':')
                .map(|(u, p)| u == username && p == password)
        })
        .unwrap_or(false)
}

async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !basic_auth_ok(authorization, &state.config.username, &state.config.password) {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

// ─── Shared helpers ────────────────────────────────────────────────────

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("malformed JSON: {e}")))
}

fn license_response(status: StatusCode, license: &LicenseDocument) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, LICENSE_MIME)],
        Json(license),
    )
        .into_response()
}

fn status_response(document: &StatusDocument) -> Response {
    ([(header::CONTENT_TYPE, STATUS_MIME)], Json(document)).into_response()
}

/// Resolve pagination parameters: both default when absent, both >= 1.
fn resolve_page(page: Option<u32>, per_page: Option<u32>) -> Result<(u32, u32), ApiError> {
    let page = page.unwrap_or(1);
    let per_page = per_page.unwrap_or(20);
    if page < 1 || per_page < 1 {
        return Err(ApiError::BadRequest(
            "page and per_page must be >= 1".into(),
        ));
    }
    Ok((page, per_page))
}

/// Parse a `min:max` device-count range.
fn parse_count(raw: &str) -> Result<(i64, i64), ApiError> {
    let malformed = || ApiError::BadRequest(format!("malformed count range: {raw}"));
    let (min, max) = raw.split_once(':').ok_or_else(malformed)?;
    let min: i64 = min.trim().parse().map_err(|_| malformed())?;
    let max: i64 = max.trim().parse().map_err(|_| malformed())?;
    if min > max {
        return Err(malformed());
    }
    Ok((min, max))
}

fn validate_date_bounds(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    max_end: Option<DateTime<Utc>>,
) -> Result<(), ApiError> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ApiError::BadRequest("start is after end".into()));
        }
    }
    if let (Some(end), Some(max_end)) = (end, max_end) {
        if max_end < end {
            return Err(ApiError::BadRequest("max_end is before end".into()));
        }
    }
    Ok(())
}

// ─── Heartbeat ─────────────────────────────────────────────────────────

async fn health() -> String {
    format!("lcp-server {}\n", env!("CARGO_PKG_VERSION"))
}

// ─── Lifecycle endpoints ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DeviceParams {
    id: Option<String>,
    name: Option<String>,
    end: Option<String>,
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
) -> Result<Response, ApiError> {
    let document = state.status.status(&license_id)?;
    Ok(status_response(&document))
}

async fn register_device(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
    Query(params): Query<DeviceParams>,
) -> Result<Response, ApiError> {
    let device = Device::validate(params.id, params.name).map_err(ApiError::BadRequest)?;
    let document = state.status.register(&license_id, &device)?;
    Ok(status_response(&document))
}

async fn renew_license(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
    Query(params): Query<DeviceParams>,
) -> Result<Response, ApiError> {
    let device = Device::validate(params.id, params.name).map_err(ApiError::BadRequest)?;
    let end = params
        .end
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| ApiError::BadRequest(format!("malformed end date: {e}")))
        })
        .transpose()?;
    let document = state.status.renew(&license_id, &device, end)?;
    Ok(status_response(&document))
}

async fn return_license(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
    Query(params): Query<DeviceParams>,
) -> Result<Response, ApiError> {
    let device = Device::validate(params.id, params.name).map_err(ApiError::BadRequest)?;
    let document = state.status.return_license(&license_id, &device)?;
    Ok(status_response(&document))
}

async fn revoke_license(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
) -> Result<Response, ApiError> {
    let document = state.status.revoke(&license_id)?;
    Ok(status_response(&document))
}

// ─── License issuance ──────────────────────────────────────────────────

fn encryption_request(request: &LicenseRequest) -> Result<EncryptionRequest, ApiError> {
    if request.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".into()));
    }
    if request.text_hint.is_empty() {
        return Err(ApiError::BadRequest("text_hint is required".into()));
    }
    if request.pass_hash.is_empty() {
        return Err(ApiError::BadRequest("pass_hash is required".into()));
    }
    Ok(EncryptionRequest {
        profile: request.profile.clone(),
        text_hint: request.text_hint.clone(),
        pass_hash: request.pass_hash.clone(),
    })
}

fn user_info(request: &LicenseRequest) -> UserInfo {
    UserInfo {
        id: request.user_id.clone(),
        name: request.user_name.clone(),
        email: request.user_email.clone(),
        encrypted: request.user_encrypted.clone(),
    }
}

/// `POST /licenses/` — create a license info and issue its signed license.
async fn create_license(
    State(state): State<Arc<AppState>>,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    let request: LicenseRequest = parse_json(&bytes)?;
    let encryption = encryption_request(&request)?;
    validate_date_bounds(request.start, request.end, request.max_end)?;

    // Generation requires a live publication; licenses issued before a soft
    // delete stay valid, new ones are refused.
    let publication = state
        .store
        .view(|s| s.publications().get(&request.publication_id))?
        .ok_or(LicenseError::PublicationNotFound)?;

    let now = Utc::now();
    let max_end = request
        .max_end
        .or_else(|| request.end.map(|end| state.status.default_max_end(end)));
    let info = LicenseInfo {
        uuid: uuid::Uuid::new_v4().to_string(),
        publication_id: publication.uuid.clone(),
        user_id: request.user_id.clone(),
        user_name: None,
        user_email: None,
        user_encrypted: vec![],
        provider: request.provider.clone(),
        created_at: now,
        updated_at: None,
        status: LicenseStatus::Ready,
        status_updated: None,
        device_count: 0,
        start: request.start,
        end: request.end,
        max_end,
        print: request.print,
        copy: request.copy,
        deleted_at: None,
    };

    let license = state
        .factory
        .build(&publication, &info, &user_info(&request), &encryption)?;

    // Persist the user fields exactly as issued: encrypted fields land in
    // the store as ciphertext, never plaintext.
    let mut stored = info;
    if let Some(user) = &license.user {
        stored.user_name = user.name.clone();
        stored.user_email = user.email.clone();
        stored.user_encrypted = user.encrypted.clone();
    }
    state.store.in_transaction(|s| s.licenses().create(&stored))?;
    tracing::info!(license = %stored.uuid, publication = %stored.publication_id, "license issued");

    Ok(license_response(StatusCode::CREATED, &license))
}

/// `POST /licenses/{id}` — re-issue a fresh license for an existing info.
/// The client supplies the user fields and passphrase hash again; the server
/// never stored them in the clear.
async fn fresh_license(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    let request: LicenseRequest = parse_json(&bytes)?;
    let encryption = encryption_request(&request)?;

    let (info, publication) = state.store.view(|s| {
        let info = s
            .licenses()
            .get(&license_id)?
            .ok_or_else(|| ApiError::NotFound("license not found".into()))?;
        // The license predates any soft delete of its publication.
        let publication = s
            .publications()
            .get_any(&info.publication_id)?
            .ok_or_else(|| ApiError::NotFound("publication not found".into()))?;
        Ok::<_, ApiError>((info, publication))
    })?;

    let license = state
        .factory
        .build(&publication, &info, &user_info(&request), &encryption)?;
    Ok(license_response(StatusCode::OK, &license))
}

// ─── Publications CRUD ─────────────────────────────────────────────────

fn validate_publication(publication: &Publication) -> Result<(), ApiError> {
    if publication.title.is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    if publication.href.is_empty() {
        return Err(ApiError::BadRequest("href is required".into()));
    }
    if !CONTENT_TYPES.contains(&publication.content_type.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "unsupported content_type {}",
            publication.content_type
        )));
    }
    if publication.checksum.is_empty() {
        return Err(ApiError::BadRequest("checksum is required".into()));
    }
    if publication.encryption_key.len() != crate::license::crypto::KEY_SIZE {
        return Err(ApiError::BadRequest(
            "encryption_key must be 32 octets".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PublicationListParams {
    page: Option<u32>,
    per_page: Option<u32>,
    alt_id: Option<String>,
    content_type: Option<String>,
}

async fn list_publications(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PublicationListParams>,
) -> Result<Response, ApiError> {
    if let Some(alt_id) = &params.alt_id {
        let publication = state
            .store
            .view(|s| s.publications().get_by_alt_id(alt_id))?
            .ok_or_else(|| ApiError::NotFound("publication not found".into()))?;
        return Ok(Json(publication).into_response());
    }
    if let Some(content_type) = &params.content_type {
        let publications = state
            .store
            .view(|s| s.publications().find_by_type(content_type))?;
        return Ok(Json(publications).into_response());
    }
    let (page, per_page) = resolve_page(params.page, params.per_page)?;
    let publications = state
        .store
        .view(|s| s.publications().list(page, per_page))?;
    Ok(Json(publications).into_response())
}

async fn create_publication(
    State(state): State<Arc<AppState>>,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    let mut publication: Publication = parse_json(&bytes)?;
    if publication.uuid.is_empty() {
        publication.uuid = uuid::Uuid::new_v4().to_string();
    }
    validate_publication(&publication)?;
    publication.created_at = Utc::now();
    publication.deleted_at = None;
    state
        .store
        .in_transaction(|s| s.publications().create(&publication))?;
    tracing::info!(publication = %publication.uuid, title = %publication.title, "publication registered");
    Ok((StatusCode::CREATED, Json(publication)).into_response())
}

async fn get_publication(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    let publication = state
        .store
        .view(|s| s.publications().get(&uuid))?
        .ok_or_else(|| ApiError::NotFound("publication not found".into()))?;
    Ok(Json(publication).into_response())
}

async fn update_publication(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    let mut publication: Publication = parse_json(&bytes)?;
    publication.uuid = uuid;
    validate_publication(&publication)?;
    state
        .store
        .in_transaction(|s| s.publications().update(&publication))?;
    Ok(Json(publication).into_response())
}

async fn delete_publication(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    state
        .store
        .in_transaction(|s| s.publications().soft_delete(&uuid))?;
    Ok(StatusCode::OK.into_response())
}

// ─── LicenseInfo CRUD ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LicenseListParams {
    page: Option<u32>,
    per_page: Option<u32>,
    user: Option<String>,
    publication: Option<String>,
    status: Option<String>,
    count: Option<String>,
    date: Option<String>,
}

async fn list_licenseinfo(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LicenseListParams>,
) -> Result<Response, ApiError> {
    if let Some(user) = &params.user {
        return Ok(Json(state.store.view(|s| s.licenses().find_by_user(user))?).into_response());
    }
    if let Some(publication) = &params.publication {
        return Ok(Json(
            state
                .store
                .view(|s| s.licenses().find_by_publication(publication))?,
        )
        .into_response());
    }
    if let Some(status) = &params.status {
        let status = LicenseStatus::parse(status)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown status {status}")))?;
        return Ok(Json(state.store.view(|s| s.licenses().find_by_status(status))?)
            .into_response());
    }
    if let Some(count) = &params.count {
        let (min, max) = parse_count(count)?;
        return Ok(Json(
            state
                .store
                .view(|s| s.licenses().find_by_device_count(min, max))?,
        )
        .into_response());
    }
    if let Some(date) = &params.date {
        return Ok(Json(state.store.view(|s| s.licenses().find_by_date(date))?).into_response());
    }
    let (page, per_page) = resolve_page(params.page, params.per_page)?;
    Ok(Json(state.store.view(|s| s.licenses().list(page, per_page))?).into_response())
}

async fn get_licenseinfo(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    let info = state
        .store
        .view(|s| s.licenses().get(&uuid))?
        .ok_or_else(|| ApiError::NotFound("license not found".into()))?;
    Ok(Json(info).into_response())
}

async fn create_licenseinfo(
    State(state): State<Arc<AppState>>,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    let mut info: LicenseInfo = parse_json(&bytes)?;
    if info.uuid.is_empty() {
        info.uuid = uuid::Uuid::new_v4().to_string();
    }
    if info.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".into()));
    }
    validate_date_bounds(info.start, info.end, info.max_end)?;
    if info.max_end.is_none() {
        info.max_end = info.end.map(|end| state.status.default_max_end(end));
    }
    info.deleted_at = None;
    // Creating a license row is license generation: it needs a live
    // publication, exactly like POST /licenses/.
    state.store.in_transaction(|s| {
        if s.publications().get(&info.publication_id)?.is_none() {
            return Err(ApiError::NotFound("publication not found".into()));
        }
        s.licenses().create(&info)?;
        Ok(())
    })?;
    Ok((StatusCode::CREATED, Json(info)).into_response())
}

async fn update_licenseinfo(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    bytes: Bytes,
) -> Result<Response, ApiError> {
    let mut info: LicenseInfo = parse_json(&bytes)?;
    info.uuid = uuid;
    validate_date_bounds(info.start, info.end, info.max_end)?;
    state.store.in_transaction(|s| s.licenses().update(&info))?;
    Ok(Json(info).into_response())
}

async fn delete_licenseinfo(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    state
        .store
        .in_transaction(|s| s.licenses().soft_delete(&uuid))?;
    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_details_shape() {
        let p = ApiError::Forbidden("cannot renew a returned license".into()).problem();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["type"], "about:blank");
        assert_eq!(v["title"], "Forbidden");
        assert_eq!(v["status"], 403);
        assert_eq!(v["detail"], "cannot renew a returned license");
    }

    #[test]
    fn unauthorized_has_no_detail() {
        let v = serde_json::to_value(ApiError::Unauthorized.problem()).unwrap();
        assert!(v.get("detail").is_none());
        assert_eq!(v["status"], 401);
    }

    #[test]
    fn every_error_kind_maps_to_its_status() {
        assert_eq!(ApiError::BadRequest(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden(String::new()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound(String::new()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Unprocessable(String::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Internal(String::new()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn basic_auth_accepts_exact_credentials() {
        let header = format!("Basic {}", STANDARD.encode("admin:secret"));
        assert!(basic_auth_ok(Some(&header), "admin", "secret"));
        assert!(!basic_auth_ok(Some(&header), "admin", "other"));
        assert!(!basic_auth_ok(None, "admin", "secret"));
        assert!(!basic_auth_ok(Some("Bearer xyz"), "admin", "secret"));
        assert!(!basic_auth_ok(Some("Basic not-base64!"), "admin", "secret"));
    }

    #[test]
    fn count_range_parsing() {
        assert_eq!(parse_count("1:5").unwrap(), (1, 5));
        assert_eq!(parse_count(" 2 : 2 ").unwrap(), (2, 2));
        assert!(parse_count("5").is_err());
        assert!(parse_count("a:b").is_err());
        assert!(parse_count("5:1").is_err());
    }

    #[test]
    fn date_bounds_validated() {
        let early: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let late: DateTime<Utc> = "2026-02-01T00:00:00Z".parse().unwrap();
        assert!(validate_date_bounds(Some(early), Some(late), None).is_ok());
        assert!(validate_date_bounds(Some(late), Some(early), None).is_err());
        assert!(validate_date_bounds(None, Some(late), Some(early)).is_err());
        assert!(validate_date_bounds(None, Some(early), Some(late)).is_ok());
    }

    #[test]
    fn page_params_validated() {
        assert_eq!(resolve_page(None, None).unwrap(), (1, 20));
        assert_eq!(resolve_page(Some(3), Some(50)).unwrap(), (3, 50));
        assert!(resolve_page(Some(0), None).is_err());
        assert!(resolve_page(None, Some(0)).is_err());
    }
}
