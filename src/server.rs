//! HTTP server for browsing, uploading and reading insights.
//!
//! Pages are server-rendered HTML (see [`crate::render`]); failures are JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | Listing of all syllabi |
//! | `GET`    | `/upload` | Upload form |
//! | `POST`   | `/upload` | Multipart upload, `303` to the detail page |
//! | `GET`    | `/syllabus/{slug}` | Detail page with insight tabs |
//! | `DELETE` | `/syllabus/{slug}` | Remove a syllabus (`204`) |
//! | `GET`    | `/file/{slug}` | Original bytes with the stored content type |
//! | `GET`    | `/insight/{slug}/{kind}` | Insight panel (HTML fragment) |
//! | `POST`   | `/cache/clear/{slug}` | Drop cached insights, `303` to the detail page |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: intro-to-cs" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `invalid_slug`, `unknown_insight_kind`, `unsupported_file` | 400 |
//! | `not_found` | 404 |
//! | `already_exists` | 409 |
//! | `no_text`, `extraction_failed` | 422 |
//! | `generation_failed` | 502 |
//! | `storage`, `internal` | 500 |

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::Error;
use crate::generator::InsightGenerator;
use crate::library::Library;
use crate::models::{InsightKind, NewDocument};
use crate::render;
use crate::slug::Slug;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    library: Arc<Library>,
}

/// Starts the server with the generator selected in `[generation]`.
///
/// Opens the stores, prunes records whose bytes have gone missing, then
/// binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    serve(config, library).await
}

/// Like [`run_server`], but with an explicit generator.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use syllabus_insights::generator::PlaceholderGenerator;
/// use syllabus_insights::server::run_server_with_generator;
///
/// # async fn example(config: &syllabus_insights::config::Config) -> anyhow::Result<()> {
/// run_server_with_generator(config, Arc::new(PlaceholderGenerator)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_generator(
    config: &Config,
    generator: Arc<dyn InsightGenerator>,
) -> anyhow::Result<()> {
    let library = Library::open_with_generator(config, generator)?;
    serve(config, library).await
}

async fn serve(config: &Config, library: Library) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let report = library.prune().await?;
    if !report.removed.is_empty() || report.orphaned_entries > 0 {
        tracing::info!(
            removed = report.removed.len(),
            orphaned_entries = report.orphaned_entries,
            "pruned stale state at startup"
        );
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        library: Arc::new(library),
    };
    let body_limit = config.storage.max_upload_bytes + 64 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/upload", get(handle_upload_form).post(handle_upload))
        .route(
            "/syllabus/{slug}",
            get(handle_detail).delete(handle_remove),
        )
        .route("/file/{slug}", get(handle_file))
        .route("/insight/{slug}/{kind}", get(handle_insight))
        .route("/cache/clear/{slug}", post(handle_clear_cache))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    println!("Syllabus server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::AlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
            Error::InvalidSlug(_) => (StatusCode::BAD_REQUEST, "invalid_slug"),
            Error::UnknownInsightKind(_) => (StatusCode::BAD_REQUEST, "unknown_insight_kind"),
            Error::UnsupportedFile(_) => (StatusCode::BAD_REQUEST, "unsupported_file"),
            Error::NoText(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_text"),
            Error::Extraction(_) => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
            Error::GenerationFailed(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ Pages ============

async fn handle_index(State(state): State<AppState>) -> Html<String> {
    Html(render::index_page(&state.library.list()))
}

async fn handle_upload_form() -> Html<String> {
    Html(render::upload_page())
}

async fn handle_detail(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Html<String>, AppError> {
    let slug = Slug::parse(&slug)?;
    let record = state.library.get(&slug)?;
    let cached = state.library.cached_kinds(&slug);
    Ok(Html(render::detail_page(&record, &cached)))
}

// ============ POST /upload ============

async fn field_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| bad_request(format!("malformed form field: {}", e)))
}

/// Handler for `POST /upload`.
///
/// Expects a `file` part plus optional text parts. On success the client is
/// redirected to the new detail page. When `insights.precompute_on_upload`
/// is set, every insight kind is generated in the background.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut new = NewDocument::default();
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                new.filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("could not read file: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            "slug" => new.slug = Some(field_text(field).await?),
            "title" => new.title = field_text(field).await?,
            "course_code" => new.course_code = field_text(field).await?,
            "instructor" => new.instructor = field_text(field).await?,
            "quarter" => new.quarter = field_text(field).await?,
            "year" => {
                let raw = field_text(field).await?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let year = raw
                        .parse::<i32>()
                        .map_err(|_| bad_request(format!("year must be a number, got {:?}", raw)))?;
                    new.year = Some(year);
                }
            }
            _ => {}
        }
    }

    let bytes = match bytes {
        Some(bytes) if !new.filename.is_empty() => bytes,
        _ => return Err(bad_request("a file is required")),
    };

    let library = state.library.clone();
    let record = tokio::task::spawn_blocking(move || library.upload(new, &bytes))
        .await
        .map_err(|e| internal(format!("upload task failed: {}", e)))??;

    if state.config.insights.precompute_on_upload {
        let library = state.library.clone();
        let slug = record.slug.clone();
        tokio::spawn(async move {
            library.precompute(&slug).await;
        });
    }

    Ok(Redirect::to(&format!("/syllabus/{}", record.slug)).into_response())
}

// ============ Documents ============

async fn handle_remove(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    let slug = Slug::parse(&slug)?;
    state.library.remove(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_file(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let slug = Slug::parse(&slug)?;
    let (record, bytes) = state.library.file(&slug)?;
    let disposition = format!("inline; filename=\"{}\"", header_safe(&record.filename));
    Ok((
        [
            (header::CONTENT_TYPE, record.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Printable ASCII without quotes or backslashes.
fn header_safe(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

// ============ Insights ============

/// Handler for `GET /insight/{slug}/{kind}`.
///
/// The kind is validated before the slug is looked up, so an unknown kind
/// never reaches the stores or the generator.
async fn handle_insight(
    State(state): State<AppState>,
    Path((slug, kind)): Path<(String, String)>,
) -> Result<Html<String>, AppError> {
    let kind: InsightKind = kind.parse()?;
    let slug = Slug::parse(&slug)?;
    let outcome = state.library.insight(&slug, kind).await?;
    Ok(Html(render::insight_panel(kind, &outcome)))
}

async fn handle_clear_cache(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Redirect, AppError> {
    let slug = Slug::parse(&slug)?;
    state.library.clear_cache(&slug).await?;
    Ok(Redirect::to(&format!("/syllabus/{}", slug)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenerationError;

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::AlreadyExists {
                    slug: "a".into(),
                    suggestion: "a-2".into(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::UnknownInsightKind("essay".into()), StatusCode::BAD_REQUEST),
            (Error::NoText("scan.pdf".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                Error::GenerationFailed(GenerationError::new("boom")),
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn header_safe_strips_quotes_and_non_ascii() {
        assert_eq!(header_safe("Syl\"labus é.pdf"), "Syl_labus _.pdf");
    }
}
