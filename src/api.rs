// 🌐 REST API - chip reads and visit writes over HTTP
//
// A visit POST runs a complete card session (load -> stage -> commit) while
// holding the store lock, so one chip is only ever touched by one session.

use crate::capacity::StorageUsage;
use crate::chip::CriticalBlock;
use crate::db::SqliteChipStore;
use crate::dictionary::{CodeBook, CodeEntry, CodeKind};
use crate::directory::{ChipStore, IdentityLookup};
use crate::error::ChipError;
use crate::record::VisitRecord;
use crate::session::CardSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<SqliteChipStore>>,
    pub book: Arc<CodeBook>,
}

impl AppState {
    pub fn new(store: SqliteChipStore, book: Arc<CodeBook>) -> Self {
        AppState {
            store: Arc::new(Mutex::new(store)),
            book,
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiError>,
}

#[derive(Serialize)]
struct ApiError {
    kind: &'static str,
    message: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

fn failure(status: StatusCode, kind: &'static str, message: String) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(ApiError { kind, message }),
    };
    (status, Json(body)).into_response()
}

fn chip_error(err: ChipError) -> Response {
    let status = match &err {
        ChipError::NotFound(_) => StatusCode::NOT_FOUND,
        ChipError::InvalidCode { .. }
        | ChipError::InvalidDate(_)
        | ChipError::MalformedPayload(_)
        | ChipError::IncompleteVisit(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ChipError::IllegalTransition { .. } => StatusCode::CONFLICT,
        ChipError::Lookup(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("chip store failure: {:#}", err);
    }
    failure(status, err.kind(), err.to_string())
}

fn internal(err: anyhow::Error) -> Response {
    error!("request failed: {:#}", err);
    failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        err.to_string(),
    )
}

fn lock_store(state: &AppState) -> Result<std::sync::MutexGuard<'_, SqliteChipStore>, Response> {
    state
        .store
        .lock()
        .map_err(|_| internal(anyhow::anyhow!("chip store lock poisoned")))
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Serialize)]
struct VisitView {
    date: String,
    display_date: String,
    diagnosis_code: String,
    diagnosis: String,
    medication_code: String,
    medication: String,
    encoded_size: usize,
}

impl VisitView {
    fn new(book: &CodeBook, record: &VisitRecord) -> Self {
        VisitView {
            date: record.date().to_string(),
            display_date: record.display_date(),
            diagnosis_code: record.diagnosis_code().to_string(),
            diagnosis: book.diagnosis_label(record.diagnosis_code()).to_string(),
            medication_code: record.medication_code().to_string(),
            medication: book.medication_label(record.medication_code()).to_string(),
            encoded_size: record.encoded_size(),
        }
    }
}

#[derive(Serialize)]
struct ChipResponse {
    critical: CriticalBlock,
    usage: StorageUsage,
    max_visits: usize,
    /// Newest first
    visits: Vec<VisitView>,
}

#[derive(Serialize)]
struct CommitResponse {
    visit: VisitView,
    evicted: Option<VisitView>,
    usage: StorageUsage,
}

#[derive(Debug, Deserialize)]
pub struct NewVisitRequest {
    pub diagnosis: String,
    pub medication: String,
    /// YYMMDD; today when omitted
    #[serde(default)]
    pub date: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/codes/:kind - Full vocabulary for selection lists
async fn get_codes(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    match CodeKind::parse(&kind) {
        Some(kind) => {
            let codes: Vec<CodeEntry> = state.book.dictionary(kind).all_codes().to_vec();
            (StatusCode::OK, Json(ApiResponse::ok(codes))).into_response()
        }
        None => failure(
            StatusCode::NOT_FOUND,
            "unknown_vocabulary",
            format!("no vocabulary named {:?}", kind),
        ),
    }
}

/// GET /api/patients/:identity - Critical block, usage and history
async fn get_patient(State(state): State<AppState>, Path(identity): Path<String>) -> Response {
    let store = match lock_store(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store.lookup(&identity) {
        Ok(Some(chip)) => {
            let response = ChipResponse {
                critical: chip.critical().clone(),
                usage: chip.usage(),
                max_visits: chip.layout().max_visit_count(),
                visits: chip
                    .history()
                    .reverse_chronological()
                    .map(|v| VisitView::new(&state.book, v))
                    .collect(),
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Ok(None) => chip_error(ChipError::NotFound(identity)),
        Err(e) => internal(e),
    }
}

/// POST /api/patients/:identity/visits - Write a visit to the chip
async fn post_visit(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(request): Json<NewVisitRequest>,
) -> Response {
    let mut store = match lock_store(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    let mut session = CardSession::new(state.book.clone());
    if let Err(e) = session.load(&identity, &*store) {
        return chip_error(e);
    }
    if let Err(e) = session.stage_diagnosis(&request.diagnosis) {
        return chip_error(e);
    }
    let committed = match &request.date {
        Some(date) => session.commit(&request.medication, date),
        None => session.commit_today(&request.medication),
    };
    let receipt = match committed {
        Ok(receipt) => receipt,
        Err(e) => return chip_error(e),
    };

    if let Some(chip) = session.reset() {
        if let Err(e) = store.persist(&chip) {
            return internal(e);
        }
    }

    let response = CommitResponse {
        visit: VisitView::new(&state.book, &receipt.record),
        evicted: receipt.evicted.as_ref().map(|v| VisitView::new(&state.book, v)),
        usage: receipt.usage,
    };
    (StatusCode::CREATED, Json(ApiResponse::ok(response))).into_response()
}

/// Build the API router (mounted under /api)
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/codes/:kind", get(get_codes))
        .route("/patients/:identity", get(get_patient))
        .route("/patients/:identity/visits", post(post_visit))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================
