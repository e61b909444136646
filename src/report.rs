//! JSON report rendering and export.
//!
//! Builds the full report document served over the API and written to
//! disk: tool identity, the headline license and commercial facts, the
//! stored score columns, and a knowledge base update block telling the
//! operator whether the fresh analysis differs from stored knowledge.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::diff::diff_analyses;
use crate::knowledge;
use crate::models::{ComplianceReport, TosAnalysis, Tool};

/// How many diff entries the update block carries before truncation.
const MAX_DIFF_ENTRIES: usize = 10;

pub struct ReportService {
    output_path: PathBuf,
}

impl ReportService {
    pub fn new(output_path: &Path) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
        }
    }

    /// Assemble the full report document for one tool.
    pub async fn generate_json_report(
        &self,
        pool: &SqlitePool,
        tool: &Tool,
        report: &ComplianceReport,
    ) -> Result<Value> {
        let reasons = parse_json_field(report.reasons.as_deref());
        let recommendations = parse_json_field(report.recommendations.as_deref());

        let mut analysis: TosAnalysis = report
            .tos_analysis
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();

        let stored = knowledge::get_entry(pool, &tool.name).await?;
        let had_ai_analysis = !analysis.is_empty();

        // Older reports may carry an empty snapshot; fall back to stored
        // knowledge so the document is still useful.
        if analysis.is_empty() || placeholder(&analysis.license_type) {
            if let Some(entry) = &stored {
                info!(tool = %tool.name, "report backfilled from stored knowledge");
                analysis = entry.analysis.clone();
            } else if let Some(builtin) = knowledge::lookup(pool, &tool.name).await? {
                analysis = builtin;
            }
        }

        let alternatives: Vec<_> = analysis.alternative_tools.iter().take(2).collect();

        let kb_update = self.prepare_kb_update(pool, tool, &analysis).await;

        Ok(json!({
            "tool": {
                "id": tool.id,
                "name": tool.name,
                "version": tool.version,
                "source": tool.source,
                "tos_url": tool.tos_url,
            },
            "data_source": {
                "ai_analysis": had_ai_analysis,
                "knowledge_base": stored.is_some(),
            },
            "license_info": {
                "license_type": analysis.license_type.as_deref().unwrap_or("unknown"),
                "license_version": analysis.license_version,
                "license_mode": analysis.license_mode,
            },
            "company_info": {
                "company_name": analysis.company_name,
                "company_country": analysis.company_country,
                "company_headquarters": analysis.company_headquarters,
                "local_presence": analysis.local_presence,
            },
            "commercial_restrictions": {
                "commercial_license_required": analysis.commercial_license_required,
                "free_for_commercial": analysis.free_for_commercial,
                "restrictions": analysis.commercial_restrictions,
                "user_limit": analysis.user_limit,
                "feature_restrictions": analysis.feature_restrictions,
            },
            "alternative_tools": alternatives,
            "compliance_report": {
                "id": report.id,
                "score_overall": report.score_overall,
                "score_security": report.score_security,
                "score_license": report.score_license,
                "score_maintenance": report.score_maintenance,
                "score_performance": report.score_performance,
                "score_tos": report.score_tos,
                "is_compliant": report.is_compliant,
                "reasons": reasons,
                "recommendations": recommendations,
                "tos_analysis": analysis,
            },
            "metadata": {
                "generated_at": Utc
                    .timestamp_opt(report.created_at, 0)
                    .single()
                    .map(|t| t.to_rfc3339()),
                "report_version": "1.0",
            },
            "knowledge_base_update": kb_update,
        }))
    }

    /// Tell the operator what accepting this analysis into the knowledge
    /// base would change. New tools get a pending-creation prompt;
    /// known tools get a truncated change set.
    async fn prepare_kb_update(&self, pool: &SqlitePool, tool: &Tool, analysis: &TosAnalysis) -> Value {
        if analysis.is_empty() {
            return json!({
                "available": false,
                "reason": "analysis is incomplete, nothing to store",
            });
        }

        match knowledge::get_entry(pool, &tool.name).await {
            Ok(None) => json!({
                "available": true,
                "action": "pending_creation",
                "message": "new tool, confirm before adding to the knowledge base",
                "tool_name": tool.name,
                "new_data": analysis,
            }),
            Ok(Some(entry)) => {
                let diff = diff_analyses(&entry.analysis, analysis);
                let changes: Vec<_> = diff.changes.iter().take(MAX_DIFF_ENTRIES).collect();
                json!({
                    "available": true,
                    "action": "diff_available",
                    "exists": true,
                    "has_changes": diff.has_changes,
                    "change_count": diff.change_count,
                    "summary": diff.summary,
                    "changes": changes,
                })
            }
            Err(err) => {
                warn!(tool = %tool.name, error = %err, "knowledge base lookup failed");
                json!({
                    "available": false,
                    "reason": "processing failed, check the server logs",
                })
            }
        }
    }

    /// Write the report document to `report_<tool>_<id>.json` under the
    /// configured output directory.
    pub async fn save_json_report(
        &self,
        pool: &SqlitePool,
        tool: &Tool,
        report: &ComplianceReport,
    ) -> Result<PathBuf> {
        let document = self.generate_json_report(pool, tool, report).await?;
        std::fs::create_dir_all(&self.output_path).with_context(|| {
            format!("Failed to create report directory: {}", self.output_path.display())
        })?;
        let filepath = self
            .output_path
            .join(format!("report_{}_{}.json", tool.name, report.id));
        let body = serde_json::to_string_pretty(&document)?;
        std::fs::write(&filepath, body)
            .with_context(|| format!("Failed to write report: {}", filepath.display()))?;
        info!(path = %filepath.display(), "report exported");
        Ok(filepath)
    }
}

fn parse_json_field(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_else(|| json!({}))
}

fn placeholder(value: &Option<String>) -> bool {
    match value.as_deref().map(str::trim) {
        None => true,
        Some(v) => v.is_empty() || v.eq_ignore_ascii_case("unknown") || v == "未知",
    }
}
