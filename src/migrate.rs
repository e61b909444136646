//! Schema creation and forward-compatible auto-migration.
//!
//! All statements are idempotent: tables are created with
//! `CREATE TABLE IF NOT EXISTS` and columns added in later releases are
//! backfilled onto existing databases via [`ensure_column`], so `toolscan
//! init` can be re-run safely on any database version.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tools (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT,
            source TEXT NOT NULL DEFAULT 'unknown',
            tos_url TEXT,
            tos_info TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS compliance_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_id INTEGER NOT NULL UNIQUE,
            score_overall REAL,
            score_security REAL,
            score_license REAL,
            score_maintenance REAL,
            score_performance REAL,
            score_tos REAL,
            is_compliant INTEGER,
            reasons TEXT,
            recommendations TEXT,
            tos_analysis TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (tool_id) REFERENCES tools(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_base (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            license_type TEXT,
            license_version TEXT,
            license_mode TEXT,
            company_name TEXT,
            company_country TEXT,
            company_headquarters TEXT,
            local_presence INTEGER,
            commercial_license_required INTEGER,
            free_for_commercial INTEGER,
            commercial_restrictions TEXT,
            user_limit TEXT,
            feature_restrictions TEXT,
            alternative_tools TEXT,
            data_usage TEXT,
            privacy_policy TEXT,
            service_restrictions TEXT,
            risk_points TEXT,
            compliance_notes TEXT,
            source TEXT NOT NULL DEFAULT 'user',
            updated_by TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Columns added after the initial release. Databases created before
    // them get the column backfilled here.
    ensure_column(pool, "tools", "tos_url", "TEXT").await?;
    ensure_column(pool, "tools", "tos_info", "TEXT").await?;
    ensure_column(pool, "compliance_reports", "score_tos", "REAL").await?;
    ensure_column(pool, "knowledge_base", "updated_by", "TEXT").await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tools_name ON tools(name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reports_tool_id ON compliance_reports(tool_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_tool_name ON knowledge_base(tool_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Add `column` to `table` if the database predates it.
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, decl: &str) -> Result<()> {
    let columns: Vec<String> =
        sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{}')", table))
            .fetch_all(pool)
            .await?;

    if !columns.iter().any(|c| c == column) {
        tracing::info!(table, column, "adding missing column");
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column, decl
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}
