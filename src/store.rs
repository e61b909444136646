//! Tool and report persistence.
//!
//! Thin query layer over SQLite. Tool names are matched case-insensitively
//! so `docker` and `Docker` resolve to one identity record; reports are
//! upserted on tool id so each tool carries at most one live report.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{ComplianceReport, Tool};

fn row_to_tool(row: &sqlx::sqlite::SqliteRow) -> Tool {
    Tool {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        source: row.get("source"),
        tos_url: row.get("tos_url"),
        tos_info: row.get("tos_info"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const TOOL_COLUMNS: &str = "id, name, version, source, tos_url, tos_info, created_at, updated_at";

pub async fn find_tool_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Tool>> {
    let row = sqlx::query(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_tool))
}

pub async fn find_tool_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Tool>> {
    let row = sqlx::query(&format!(
        "SELECT {TOOL_COLUMNS} FROM tools WHERE LOWER(name) = LOWER(?) LIMIT 1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_tool))
}

pub async fn list_tools(pool: &SqlitePool) -> Result<Vec<Tool>> {
    let rows = sqlx::query(&format!("SELECT {TOOL_COLUMNS} FROM tools ORDER BY name ASC"))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_tool).collect())
}

/// Create a tool record, or return the existing one on a case-insensitive
/// name match. Tools are never deleted here.
pub async fn find_or_create_tool(
    pool: &SqlitePool,
    name: &str,
    version: Option<&str>,
    source: &str,
) -> Result<Tool> {
    if let Some(existing) = find_tool_by_name(pool, name).await? {
        return Ok(existing);
    }

    let now = chrono::Utc::now().timestamp();
    let id = sqlx::query(
        "INSERT INTO tools (name, version, source, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(version)
    .bind(source)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(Tool {
        id,
        name: name.to_string(),
        version: version.map(|v| v.to_string()),
        source: source.to_string(),
        tos_url: None,
        tos_info: None,
        created_at: now,
        updated_at: now,
    })
}

/// Record the detected version, falling back to the literal "unknown".
pub async fn update_tool_version(
    pool: &SqlitePool,
    tool_id: i64,
    version: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE tools SET version = ?, updated_at = ? WHERE id = ?")
        .bind(version.unwrap_or("unknown"))
        .bind(now)
        .bind(tool_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Cache the resolved TOS URL and raw analysis payload on the tool row.
pub async fn update_tool_tos(
    pool: &SqlitePool,
    tool_id: i64,
    tos_url: Option<&str>,
    tos_info: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE tools SET tos_url = COALESCE(?, tos_url), tos_info = ?, updated_at = ? WHERE id = ?")
        .bind(tos_url)
        .bind(tos_info)
        .bind(now)
        .bind(tool_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============ Reports ============

/// Writable fields of one report row. Score fields are `None` in
/// simplified mode; the serialized payloads are always present.
#[derive(Debug, Clone, Default)]
pub struct ReportFields {
    pub score_overall: Option<f64>,
    pub score_security: Option<f64>,
    pub score_license: Option<f64>,
    pub score_maintenance: Option<f64>,
    pub score_performance: Option<f64>,
    pub score_tos: Option<f64>,
    pub is_compliant: Option<bool>,
    pub reasons: String,
    pub recommendations: String,
    pub tos_analysis: String,
}

fn row_to_report(row: &sqlx::sqlite::SqliteRow) -> ComplianceReport {
    let is_compliant: Option<i64> = row.get("is_compliant");
    ComplianceReport {
        id: row.get("id"),
        tool_id: row.get("tool_id"),
        score_overall: row.get("score_overall"),
        score_security: row.get("score_security"),
        score_license: row.get("score_license"),
        score_maintenance: row.get("score_maintenance"),
        score_performance: row.get("score_performance"),
        score_tos: row.get("score_tos"),
        is_compliant: is_compliant.map(|v| v != 0),
        reasons: row.get("reasons"),
        recommendations: row.get("recommendations"),
        tos_analysis: row.get("tos_analysis"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const REPORT_COLUMNS: &str = "id, tool_id, score_overall, score_security, score_license, \
     score_maintenance, score_performance, score_tos, is_compliant, reasons, recommendations, \
     tos_analysis, created_at, updated_at";

/// Insert or replace the single live report for a tool.
pub async fn upsert_report(
    pool: &SqlitePool,
    tool_id: i64,
    fields: &ReportFields,
) -> Result<ComplianceReport> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO compliance_reports (
            tool_id, score_overall, score_security, score_license, score_maintenance,
            score_performance, score_tos, is_compliant, reasons, recommendations,
            tos_analysis, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tool_id) DO UPDATE SET
            score_overall = excluded.score_overall,
            score_security = excluded.score_security,
            score_license = excluded.score_license,
            score_maintenance = excluded.score_maintenance,
            score_performance = excluded.score_performance,
            score_tos = excluded.score_tos,
            is_compliant = excluded.is_compliant,
            reasons = excluded.reasons,
            recommendations = excluded.recommendations,
            tos_analysis = excluded.tos_analysis,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tool_id)
    .bind(fields.score_overall)
    .bind(fields.score_security)
    .bind(fields.score_license)
    .bind(fields.score_maintenance)
    .bind(fields.score_performance)
    .bind(fields.score_tos)
    .bind(fields.is_compliant.map(i64::from))
    .bind(&fields.reasons)
    .bind(&fields.recommendations)
    .bind(&fields.tos_analysis)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    find_report_by_tool(pool, tool_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("report upsert did not persist for tool {}", tool_id))
}

pub async fn find_report_by_tool(pool: &SqlitePool, tool_id: i64) -> Result<Option<ComplianceReport>> {
    let row = sqlx::query(&format!(
        "SELECT {REPORT_COLUMNS} FROM compliance_reports WHERE tool_id = ?"
    ))
    .bind(tool_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_report))
}

pub async fn find_report_by_id(pool: &SqlitePool, report_id: i64) -> Result<Option<ComplianceReport>> {
    let row = sqlx::query(&format!(
        "SELECT {REPORT_COLUMNS} FROM compliance_reports WHERE id = ?"
    ))
    .bind(report_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_report))
}
