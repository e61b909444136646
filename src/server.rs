//! Compliance scanning HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/tools` | Create (or fetch) one tool |
//! | `POST` | `/api/v1/tools/batch` | Create tools from a name list |
//! | `GET`  | `/api/v1/tools` | List tools |
//! | `POST` | `/api/v1/scan/start` | Start scanning known tool ids |
//! | `POST` | `/api/v1/compliance/scan` | Create tools by name and scan them |
//! | `GET`  | `/api/v1/scan/status/{tool_id}` | Latest task state for a tool |
//! | `GET`  | `/api/v1/reports/{report_id}` | Full report document |
//! | `GET`  | `/api/v1/reports/{report_id}/export` | Write the report to disk |
//! | `GET`  | `/api/v1/reports/{report_id}/kb-diff` | Knowledge diff for a report |
//! | `GET`  | `/api/v1/knowledge-base` | List knowledge entries |
//! | `GET`  | `/api/v1/knowledge-base/{tool_name}` | One knowledge entry |
//! | `PUT`  | `/api/v1/knowledge-base/{tool_name}` | Create or update an entry |
//! | `DELETE` | `/api/v1/knowledge-base/{tool_name}` | Delete an entry |
//! | `POST` | `/api/v1/knowledge-base/{tool_name}/from-report` | Store a report's analysis |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "report 7 does not exist" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Internal failures never leak backend details; the response carries a
//! generic message and the specifics go to the server log.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser frontends
//! can drive scans directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::diff::diff_analyses;
use crate::knowledge;
use crate::models::{ComplianceReport, TosAnalysis, Tool};
use crate::report::ReportService;
use crate::scan::ScanOrchestrator;
use crate::store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pool: sqlx::SqlitePool,
    orchestrator: Arc<ScanOrchestrator>,
    reports: Arc<ReportService>,
}

/// Starts the API server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config, pool: sqlx::SqlitePool) -> anyhow::Result<()> {
    let orchestrator = Arc::new(ScanOrchestrator::new(pool.clone(), config)?);
    info!(
        provider = orchestrator.provider_name(),
        bind = %config.server.bind,
        "starting API server"
    );

    let state = AppState {
        pool,
        orchestrator,
        reports: Arc::new(ReportService::new(&config.reporting.output_path)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/tools", post(handle_create_tool).get(handle_list_tools))
        .route("/api/v1/tools/batch", post(handle_batch_create_tools))
        .route("/api/v1/scan/start", post(handle_start_scan))
        .route("/api/v1/compliance/scan", post(handle_compliance_scan))
        .route("/api/v1/scan/status/{tool_id}", get(handle_scan_status))
        .route("/api/v1/reports/{report_id}", get(handle_get_report))
        .route("/api/v1/reports/{report_id}/export", get(handle_export_report))
        .route("/api/v1/reports/{report_id}/kb-diff", get(handle_report_kb_diff))
        .route("/api/v1/knowledge-base", get(handle_list_knowledge))
        .route("/api/v1/knowledge-base/{tool_name}", get(handle_get_knowledge))
        .route("/api/v1/knowledge-base/{tool_name}", put(handle_put_knowledge))
        .route("/api/v1/knowledge-base/{tool_name}", delete(handle_delete_knowledge))
        .route(
            "/api/v1/knowledge-base/{tool_name}/from-report",
            post(handle_knowledge_from_report),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Log the real error, respond with a generic one.
fn internal(context: &str, err: anyhow::Error) -> AppError {
    error!(context, error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{context} failed, check the server logs"),
    }
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

// ============ Tools ============

#[derive(Deserialize)]
struct ToolRequest {
    name: String,
    version: Option<String>,
}

#[derive(Deserialize)]
struct BatchToolRequest {
    tools: Vec<String>,
}

#[derive(Serialize)]
struct BatchToolResponse {
    total: usize,
    created: usize,
    existing: usize,
    tools: Vec<Tool>,
}

/// Split a pasted tool list on newlines and commas, trimming blanks and
/// dropping case-insensitive duplicates while preserving order.
fn parse_tool_names(raw: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut names = Vec::new();
    for piece in raw.split(['\n', ',']) {
        let name = piece.trim();
        if name.is_empty() {
            continue;
        }
        let key = name.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        names.push(name.to_string());
    }
    names
}

async fn handle_create_tool(
    State(state): State<AppState>,
    Json(req): Json<ToolRequest>,
) -> Result<(StatusCode, Json<Tool>), AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(bad_request("tool name must not be empty"));
    }
    let tool = store::find_or_create_tool(&state.pool, name, req.version.as_deref(), "user")
        .await
        .map_err(|e| internal("creating tool", e))?;
    Ok((StatusCode::CREATED, Json(tool)))
}

async fn handle_batch_create_tools(
    State(state): State<AppState>,
    Json(req): Json<BatchToolRequest>,
) -> Result<(StatusCode, Json<BatchToolResponse>), AppError> {
    let names = parse_tool_names(&req.tools.join("\n"));
    if names.is_empty() {
        return Err(bad_request("tools list must not be empty"));
    }

    let mut created = Vec::new();
    let mut existing = 0;
    for name in &names {
        let already = store::find_tool_by_name(&state.pool, name)
            .await
            .map_err(|e| internal("creating tools", e))?
            .is_some();
        let tool = store::find_or_create_tool(&state.pool, name, None, "user")
            .await
            .map_err(|e| internal("creating tools", e))?;
        if already {
            existing += 1;
        } else {
            created.push(tool);
        }
    }

    info!(total = names.len(), created = created.len(), existing, "batch tool creation");
    Ok((
        StatusCode::CREATED,
        Json(BatchToolResponse {
            total: names.len(),
            created: created.len(),
            existing,
            tools: created,
        }),
    ))
}

async fn handle_list_tools(State(state): State<AppState>) -> Result<Json<Vec<Tool>>, AppError> {
    let tools = store::list_tools(&state.pool)
        .await
        .map_err(|e| internal("listing tools", e))?;
    Ok(Json(tools))
}

// ============ Scanning ============

#[derive(Deserialize)]
struct ScanRequest {
    tool_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct ComplianceScanRequest {
    tools: Vec<String>,
}

#[derive(Serialize)]
struct ScanResponse {
    message: String,
    batch_id: String,
    task_count: usize,
    tool_ids: Vec<i64>,
    skipped_tool_ids: Vec<i64>,
}

async fn handle_start_scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    if req.tool_ids.is_empty() {
        return Err(bad_request("tool_ids must not be empty"));
    }
    let batch = state
        .orchestrator
        .create_batch(&req.tool_ids)
        .await
        .map_err(|e| internal("starting scan", e))?;
    if batch.accepted.is_empty() {
        return Err(not_found("none of the requested tool ids exist"));
    }

    let response = ScanResponse {
        message: "scan started".to_string(),
        batch_id: batch.batch_id.to_string(),
        task_count: batch.accepted.len(),
        tool_ids: batch.accepted.clone(),
        skipped_tool_ids: batch.skipped.clone(),
    };
    state.orchestrator.spawn_batch(batch);
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// One-shot scan by tool name: create any missing tools, then scan them.
async fn handle_compliance_scan(
    State(state): State<AppState>,
    Json(req): Json<ComplianceScanRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    let names = parse_tool_names(&req.tools.join("\n"));
    if names.is_empty() {
        return Err(bad_request("tools list must not be empty"));
    }

    let mut tool_ids = Vec::with_capacity(names.len());
    for name in &names {
        let tool = store::find_or_create_tool(&state.pool, name, None, "user")
            .await
            .map_err(|e| internal("starting scan", e))?;
        tool_ids.push(tool.id);
    }

    let batch = state
        .orchestrator
        .create_batch(&tool_ids)
        .await
        .map_err(|e| internal("starting scan", e))?;
    let response = ScanResponse {
        message: format!("scan started for {} tools", batch.accepted.len()),
        batch_id: batch.batch_id.to_string(),
        task_count: batch.accepted.len(),
        tool_ids: batch.accepted.clone(),
        skipped_tool_ids: batch.skipped.clone(),
    };
    state.orchestrator.spawn_batch(batch);
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Serialize)]
struct ScanStatusResponse {
    tool_id: i64,
    tool_name: String,
    status: crate::scan::task::ScanStatus,
    progress: Option<f64>,
    current_step: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

async fn handle_scan_status(
    State(state): State<AppState>,
    Path(tool_id): Path<i64>,
) -> Result<Json<ScanStatusResponse>, AppError> {
    let task = state
        .orchestrator
        .registry()
        .latest_for_tool(tool_id)
        .ok_or_else(|| not_found(format!("no scan task for tool {tool_id}")))?;
    Ok(Json(ScanStatusResponse {
        tool_id: task.tool_id,
        tool_name: task.tool_name,
        status: task.status,
        progress: task.progress,
        current_step: task.current_step,
        result: task.result,
        error: task.error_message,
    }))
}

// ============ Reports ============

async fn load_report_and_tool(
    state: &AppState,
    report_id: i64,
) -> Result<(ComplianceReport, Tool), AppError> {
    let report = store::find_report_by_id(&state.pool, report_id)
        .await
        .map_err(|e| internal("loading report", e))?
        .ok_or_else(|| not_found(format!("report {report_id} does not exist")))?;
    let tool = store::find_tool_by_id(&state.pool, report.tool_id)
        .await
        .map_err(|e| internal("loading report", e))?
        .ok_or_else(|| not_found(format!("tool {} does not exist", report.tool_id)))?;
    Ok((report, tool))
}

async fn handle_get_report(
    State(state): State<AppState>,
    Path(report_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (report, tool) = load_report_and_tool(&state, report_id).await?;
    let document = state
        .reports
        .generate_json_report(&state.pool, &tool, &report)
        .await
        .map_err(|e| internal("generating report", e))?;
    Ok(Json(document))
}

#[derive(Serialize)]
struct ExportResponse {
    path: String,
    report: serde_json::Value,
}

async fn handle_export_report(
    State(state): State<AppState>,
    Path(report_id): Path<i64>,
) -> Result<Json<ExportResponse>, AppError> {
    let (report, tool) = load_report_and_tool(&state, report_id).await?;
    let path = state
        .reports
        .save_json_report(&state.pool, &tool, &report)
        .await
        .map_err(|e| internal("exporting report", e))?;
    let document = state
        .reports
        .generate_json_report(&state.pool, &tool, &report)
        .await
        .map_err(|e| internal("exporting report", e))?;
    Ok(Json(ExportResponse {
        path: path.display().to_string(),
        report: document,
    }))
}

async fn handle_report_kb_diff(
    State(state): State<AppState>,
    Path(report_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (report, tool) = load_report_and_tool(&state, report_id).await?;
    let analysis: TosAnalysis = report
        .tos_analysis
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    if analysis.is_empty() {
        return Ok(Json(serde_json::json!({
            "available": false,
            "reason": "report carries no analysis data",
        })));
    }

    let existing = knowledge::get_entry(&state.pool, &tool.name)
        .await
        .map_err(|e| internal("comparing knowledge", e))?;
    let response = match existing {
        Some(entry) => {
            let diff = diff_analyses(&entry.analysis, &analysis);
            serde_json::json!({
                "tool_name": tool.name,
                "exists": true,
                "has_changes": diff.has_changes,
                "diff": diff,
                "new_data": analysis,
                "existing_data": entry,
            })
        }
        None => serde_json::json!({
            "tool_name": tool.name,
            "exists": false,
            "has_changes": false,
            "diff": null,
            "new_data": analysis,
            "existing_data": null,
        }),
    };
    Ok(Json(response))
}

// ============ Knowledge base ============

#[derive(Deserialize)]
struct ListKnowledgeQuery {
    #[serde(default = "default_kb_limit")]
    limit: usize,
}

fn default_kb_limit() -> usize {
    1000
}

/// Truncate to a page, keeping the pre-truncation count for the response.
fn paginate<T>(items: Vec<T>, limit: usize) -> (usize, Vec<T>) {
    let total = items.len();
    (total, items.into_iter().take(limit).collect())
}

async fn handle_list_knowledge(
    State(state): State<AppState>,
    Query(query): Query<ListKnowledgeQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries = knowledge::list_entries(&state.pool)
        .await
        .map_err(|e| internal("listing knowledge", e))?;
    let (total, entries) = paginate(entries, query.limit.max(1));
    Ok(Json(serde_json::json!({
        "total": total,
        "entries": entries,
    })))
}

async fn handle_get_knowledge(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
) -> Result<Json<knowledge::KnowledgeEntry>, AppError> {
    let entry = knowledge::get_entry(&state.pool, &tool_name)
        .await
        .map_err(|e| internal("loading knowledge", e))?
        .ok_or_else(|| not_found(format!("no knowledge entry for {tool_name}")))?;
    Ok(Json(entry))
}

async fn handle_put_knowledge(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(analysis): Json<TosAnalysis>,
) -> Result<Json<knowledge::KnowledgeEntry>, AppError> {
    if tool_name.trim().is_empty() {
        return Err(bad_request("tool name must not be empty"));
    }
    let entry = knowledge::upsert_entry(&state.pool, tool_name.trim(), &analysis, "user", Some("user"))
        .await
        .map_err(|e| internal("updating knowledge", e))?;
    Ok(Json(entry))
}

async fn handle_delete_knowledge(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = knowledge::delete_entry(&state.pool, &tool_name)
        .await
        .map_err(|e| internal("deleting knowledge", e))?;
    if !deleted {
        return Err(not_found(format!("no knowledge entry for {tool_name}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct FromReportQuery {
    report_id: i64,
}

/// Store a report's analysis snapshot as the knowledge entry for a tool,
/// after the operator reviewed the diff.
async fn handle_knowledge_from_report(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Query(query): Query<FromReportQuery>,
) -> Result<Json<knowledge::KnowledgeEntry>, AppError> {
    let (report, _tool) = load_report_and_tool(&state, query.report_id).await?;
    let analysis: TosAnalysis = report
        .tos_analysis
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    if analysis.is_empty() {
        return Err(bad_request("report carries no analysis data"));
    }
    let entry = knowledge::upsert_entry(&state.pool, tool_name.trim(), &analysis, "ai", Some("user"))
        .await
        .map_err(|e| internal("storing knowledge", e))?;
    info!(tool = %tool_name, report_id = query.report_id, "knowledge entry stored from report");
    Ok(Json(entry))
}

#[cfg(test)]
mod tests {
    use super::{paginate, parse_tool_names};

    #[test]
    fn parses_mixed_separators_and_dedups() {
        let names = parse_tool_names("Docker CE\npostman, Anaconda\n docker ce ,,\n");
        assert_eq!(names, vec!["Docker CE", "postman", "Anaconda"]);
        assert!(parse_tool_names("  \n , ").is_empty());
    }

    #[test]
    fn paginate_reports_total_before_truncation() {
        let (total, page) = paginate(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(total, 5);
        assert_eq!(page, vec![1, 2]);

        let (total, page) = paginate(Vec::<i64>::new(), 2);
        assert_eq!(total, 0);
        assert!(page.is_empty());
    }
}
