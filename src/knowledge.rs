//! Curated knowledge base for well-known tools.
//!
//! Analysis results coming back from a model are frequently partial. This
//! module backfills the gaps from two sources, in order of preference:
//! user-maintained rows in the `knowledge_base` table, then a small
//! built-in catalog of tools whose licensing terms are widely documented.
//!
//! A field is only backfilled when the incoming value is missing or a
//! placeholder ("unknown", "null", the untranslated "未知", or blank).
//! Real model output always wins over stored knowledge.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::models::{AlternativeTool, TosAnalysis};

/// One knowledge base record: the analysis facts plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub tool_name: String,
    #[serde(flatten)]
    pub analysis: TosAnalysis,
    pub source: String,
    pub updated_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Placeholder strings that models emit for fields they could not fill.
fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("unknown") || v.eq_ignore_ascii_case("null") || v == "未知"
}

fn field_missing(value: &Option<String>) -> bool {
    match value {
        None => true,
        Some(v) => is_placeholder(v),
    }
}

fn backfill(target: &mut Option<String>, source: &Option<String>) {
    if field_missing(target) && !field_missing(source) {
        *target = source.clone();
    }
}

/// Fill gaps in `analysis` from a knowledge record. Returns the number
/// of fields that were backfilled.
///
/// An empty analysis takes the whole knowledge record. An analysis that
/// carries data only gets its license identity (type/version/mode),
/// company name, and alternative tools backfilled; risk points, data
/// usage, and the other assessment inputs stay as the model produced
/// them so stored knowledge cannot shift a scored result.
pub fn merge_with_knowledge(analysis: &mut TosAnalysis, knowledge: &TosAnalysis) -> usize {
    if analysis.is_empty() {
        *analysis = knowledge.clone();
        return count_filled(analysis);
    }

    let before = count_filled(analysis);

    backfill(&mut analysis.license_type, &knowledge.license_type);
    backfill(&mut analysis.license_version, &knowledge.license_version);
    backfill(&mut analysis.license_mode, &knowledge.license_mode);
    backfill(&mut analysis.company_name, &knowledge.company_name);

    if analysis.alternative_tools.is_empty() && !knowledge.alternative_tools.is_empty() {
        analysis.alternative_tools = knowledge.alternative_tools.clone();
    }

    count_filled(analysis).saturating_sub(before)
}

fn count_filled(a: &TosAnalysis) -> usize {
    let strings = [
        &a.license_type,
        &a.license_version,
        &a.license_mode,
        &a.company_name,
        &a.company_country,
        &a.company_headquarters,
        &a.commercial_restrictions,
        &a.user_limit,
        &a.feature_restrictions,
        &a.data_usage,
        &a.privacy_policy,
        &a.service_restrictions,
        &a.compliance_notes,
    ];
    let bools = [
        a.local_presence,
        a.commercial_license_required,
        a.free_for_commercial,
    ];
    let mut n = strings.iter().filter(|v| !field_missing(v)).count();
    n += bools.iter().filter(|v| v.is_some()).count();
    if !a.alternative_tools.is_empty() {
        n += 1;
    }
    if !a.risk_points.is_empty() {
        n += 1;
    }
    n
}

// ============ Lookup ============

/// Resolve knowledge for a tool: database rows win over the built-in
/// catalog, exact name matches win over substring matches.
pub async fn lookup(pool: &SqlitePool, tool_name: &str) -> Result<Option<TosAnalysis>> {
    if let Some(entry) = get_entry(pool, tool_name).await? {
        debug!(tool = tool_name, source = %entry.source, "knowledge hit (database)");
        return Ok(Some(entry.analysis));
    }
    if let Some(analysis) = builtin_lookup(tool_name) {
        debug!(tool = tool_name, "knowledge hit (built-in)");
        return Ok(Some(analysis));
    }
    Ok(None)
}

fn builtin_lookup(tool_name: &str) -> Option<TosAnalysis> {
    let needle = tool_name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let catalog = builtin_entries();
    if let Some((_, a)) = catalog.iter().find(|(name, _)| name.to_lowercase() == needle) {
        return Some(a.clone());
    }
    // Substring match handles inputs like "docker desktop 4.30".
    catalog
        .iter()
        .filter(|(name, _)| {
            let n = name.to_lowercase();
            needle.contains(&n) || n.contains(&needle)
        })
        // Prefer the longest matching name so "docker desktop" never
        // resolves to the Docker CE entry.
        .max_by_key(|(name, _)| name.len())
        .map(|(_, a)| a.clone())
}

fn alternative(name: &str, kind: &str, license: &str, advantages: &str, use_case: &str) -> AlternativeTool {
    AlternativeTool {
        name: Some(name.to_string()),
        kind: Some(kind.to_string()),
        license: Some(license.to_string()),
        advantages: Some(advantages.to_string()),
        use_case: Some(use_case.to_string()),
    }
}

/// Tools whose licensing terms are stable and widely documented. Used as
/// the analysis of last resort when the model produced nothing usable.
fn builtin_entries() -> Vec<(&'static str, TosAnalysis)> {
    vec![
        (
            "Docker CE",
            TosAnalysis {
                license_type: Some("Apache 2.0".to_string()),
                license_version: Some("2.0".to_string()),
                license_mode: Some("open source".to_string()),
                local_presence: Some(false),
                commercial_license_required: Some(false),
                free_for_commercial: Some(true),
                commercial_restrictions: Some(
                    "Apache 2.0 permits commercial use provided copyright notices and the \
                     license text are retained."
                        .to_string(),
                ),
                user_limit: Some("no user limit".to_string()),
                feature_restrictions: Some(
                    "Core container features only; registry and fleet-management features \
                     require the commercial Docker products."
                        .to_string(),
                ),
                alternative_tools: vec![
                    alternative(
                        "Podman",
                        "open source",
                        "Apache 2.0",
                        "Daemonless container engine compatible with Docker, runs without \
                         root privileges, no commercial restrictions.",
                        "Security-sensitive environments that want full control over the \
                         container runtime.",
                    ),
                    alternative(
                        "containerd",
                        "open source",
                        "Apache 2.0",
                        "Industry-standard container runtime used by Docker and Kubernetes, \
                         lightweight and stable.",
                        "Custom container platforms that need low-level runtime control.",
                    ),
                ],
                ..Default::default()
            },
        ),
        (
            "Docker Desktop",
            TosAnalysis {
                license_type: Some("commercial license".to_string()),
                license_mode: Some("commercial".to_string()),
                company_name: Some("Docker Inc.".to_string()),
                company_country: Some("United States".to_string()),
                company_headquarters: Some("San Francisco".to_string()),
                local_presence: Some(false),
                commercial_license_required: Some(true),
                free_for_commercial: Some(false),
                commercial_restrictions: Some(
                    "Free for personal use; commercial use requires a Docker Business or \
                     Docker Enterprise subscription."
                        .to_string(),
                ),
                user_limit: Some("free for individuals, per-seat pricing for businesses".to_string()),
                feature_restrictions: Some(
                    "The personal tier is feature-limited; paid tiers add full functionality \
                     and support."
                        .to_string(),
                ),
                alternative_tools: vec![
                    alternative(
                        "Docker CE",
                        "open source",
                        "Apache 2.0",
                        "The open source Docker engine: core container features, completely \
                         free for commercial use.",
                        "Individual developers and teams that do not need the desktop UI or \
                         enterprise support.",
                    ),
                    alternative(
                        "Podman",
                        "open source",
                        "Apache 2.0",
                        "Daemonless container engine compatible with Docker, runs without \
                         root privileges, no commercial restrictions.",
                        "Security-sensitive environments that want full control over the \
                         container runtime.",
                    ),
                ],
                ..Default::default()
            },
        ),
        (
            "Anaconda",
            TosAnalysis {
                license_type: Some("commercial license (free for individuals)".to_string()),
                license_mode: Some("mixed".to_string()),
                company_name: Some("Anaconda Inc.".to_string()),
                company_country: Some("United States".to_string()),
                company_headquarters: Some("Austin".to_string()),
                local_presence: Some(false),
                commercial_license_required: Some(true),
                free_for_commercial: Some(false),
                commercial_restrictions: Some(
                    "Free for individual use; organizations with more than 200 employees \
                     need a commercial license to use the package repository."
                        .to_string(),
                ),
                user_limit: Some("free for individuals, organization pricing by size".to_string()),
                feature_restrictions: Some(
                    "The distribution itself is complete, but commercial repository access \
                     requires a license."
                        .to_string(),
                ),
                alternative_tools: vec![
                    alternative(
                        "Miniconda",
                        "open source",
                        "BSD",
                        "Minimal conda installer with just conda and Python, free for \
                         commercial use.",
                        "Users who want conda package management without the full \
                         Anaconda distribution.",
                    ),
                    alternative(
                        "Python + pip",
                        "open source",
                        "PSF",
                        "The reference Python distribution with pip, fully free and open \
                         source, the ecosystem standard.",
                        "Projects that do not need conda environment management.",
                    ),
                ],
                ..Default::default()
            },
        ),
        (
            "Postman",
            TosAnalysis {
                license_type: Some("commercial license (limited free tier)".to_string()),
                license_mode: Some("commercial".to_string()),
                company_name: Some("Postman Inc.".to_string()),
                company_country: Some("United States".to_string()),
                company_headquarters: Some("San Francisco".to_string()),
                local_presence: Some(false),
                commercial_license_required: Some(true),
                free_for_commercial: Some(false),
                commercial_restrictions: Some(
                    "Free for personal use; commercial use requires a Postman Business or \
                     Enterprise license. The free tier caps API calls and team features."
                        .to_string(),
                ),
                user_limit: Some("free for individuals, per-seat pricing for businesses".to_string()),
                feature_restrictions: Some(
                    "The free tier is limited; paid tiers add unlimited API calls and team \
                     collaboration."
                        .to_string(),
                ),
                data_usage: Some("collections sync to the vendor cloud by default".to_string()),
                alternative_tools: vec![
                    alternative(
                        "Bruno",
                        "open source",
                        "MIT",
                        "Stores collections as local files under Git control, avoiding cloud \
                         sync and vendor lock-in. Lightweight with Postman-compatible scripting.",
                        "Teams that care about data privacy and want API collections reviewed \
                         like code.",
                    ),
                    alternative(
                        "Insomnia",
                        "free commercial",
                        "proprietary (parts open source)",
                        "Clean fast UI with native GraphQL and gRPC support and a plugin \
                         ecosystem; the free tier covers most individual use.",
                        "Developers debugging GraphQL or gRPC interfaces who prefer a \
                         minimal UI.",
                    ),
                ],
                ..Default::default()
            },
        ),
    ]
}

// ============ Database CRUD ============

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> KnowledgeEntry {
    let local_presence: Option<i64> = row.get("local_presence");
    let license_required: Option<i64> = row.get("commercial_license_required");
    let free_commercial: Option<i64> = row.get("free_for_commercial");
    let alternatives: Option<String> = row.get("alternative_tools");
    let risks: Option<String> = row.get("risk_points");
    KnowledgeEntry {
        id: row.get("id"),
        tool_name: row.get("tool_name"),
        analysis: TosAnalysis {
            license_type: row.get("license_type"),
            license_version: row.get("license_version"),
            license_mode: row.get("license_mode"),
            company_name: row.get("company_name"),
            company_country: row.get("company_country"),
            company_headquarters: row.get("company_headquarters"),
            local_presence: local_presence.map(|v| v != 0),
            commercial_license_required: license_required.map(|v| v != 0),
            free_for_commercial: free_commercial.map(|v| v != 0),
            commercial_restrictions: row.get("commercial_restrictions"),
            user_limit: row.get("user_limit"),
            feature_restrictions: row.get("feature_restrictions"),
            alternative_tools: alternatives
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            data_usage: row.get("data_usage"),
            privacy_policy: row.get("privacy_policy"),
            service_restrictions: row.get("service_restrictions"),
            risk_points: risks
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            compliance_notes: row.get("compliance_notes"),
            ..Default::default()
        },
        source: row.get("source"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const KB_COLUMNS: &str = "id, tool_name, license_type, license_version, license_mode, \
     company_name, company_country, company_headquarters, local_presence, \
     commercial_license_required, free_for_commercial, commercial_restrictions, user_limit, \
     feature_restrictions, alternative_tools, data_usage, privacy_policy, \
     service_restrictions, risk_points, compliance_notes, source, updated_by, \
     created_at, updated_at";

pub async fn get_entry(pool: &SqlitePool, tool_name: &str) -> Result<Option<KnowledgeEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {KB_COLUMNS} FROM knowledge_base WHERE LOWER(tool_name) = LOWER(?) LIMIT 1"
    ))
    .bind(tool_name)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_entry))
}

pub async fn list_entries(pool: &SqlitePool) -> Result<Vec<KnowledgeEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {KB_COLUMNS} FROM knowledge_base ORDER BY tool_name ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_entry).collect())
}

/// Insert or overwrite the knowledge record for a tool. The match is
/// case-insensitive: an existing entry keeps its stored spelling of the
/// name, so `docker` updates a row created as `Docker` rather than
/// inserting a duplicate.
pub async fn upsert_entry(
    pool: &SqlitePool,
    tool_name: &str,
    analysis: &TosAnalysis,
    source: &str,
    updated_by: Option<&str>,
) -> Result<KnowledgeEntry> {
    let canonical = get_entry(pool, tool_name).await?.map(|e| e.tool_name);
    let tool_name = canonical.as_deref().unwrap_or(tool_name);
    let now = chrono::Utc::now().timestamp();
    let alternatives = serde_json::to_string(&analysis.alternative_tools)?;
    let risks = serde_json::to_string(&analysis.risk_points)?;
    sqlx::query(
        r#"
        INSERT INTO knowledge_base (
            tool_name, license_type, license_version, license_mode, company_name,
            company_country, company_headquarters, local_presence,
            commercial_license_required, free_for_commercial, commercial_restrictions,
            user_limit, feature_restrictions, alternative_tools, data_usage,
            privacy_policy, service_restrictions, risk_points, compliance_notes,
            source, updated_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tool_name) DO UPDATE SET
            license_type = excluded.license_type,
            license_version = excluded.license_version,
            license_mode = excluded.license_mode,
            company_name = excluded.company_name,
            company_country = excluded.company_country,
            company_headquarters = excluded.company_headquarters,
            local_presence = excluded.local_presence,
            commercial_license_required = excluded.commercial_license_required,
            free_for_commercial = excluded.free_for_commercial,
            commercial_restrictions = excluded.commercial_restrictions,
            user_limit = excluded.user_limit,
            feature_restrictions = excluded.feature_restrictions,
            alternative_tools = excluded.alternative_tools,
            data_usage = excluded.data_usage,
            privacy_policy = excluded.privacy_policy,
            service_restrictions = excluded.service_restrictions,
            risk_points = excluded.risk_points,
            compliance_notes = excluded.compliance_notes,
            source = excluded.source,
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tool_name)
    .bind(&analysis.license_type)
    .bind(&analysis.license_version)
    .bind(&analysis.license_mode)
    .bind(&analysis.company_name)
    .bind(&analysis.company_country)
    .bind(&analysis.company_headquarters)
    .bind(analysis.local_presence.map(i64::from))
    .bind(analysis.commercial_license_required.map(i64::from))
    .bind(analysis.free_for_commercial.map(i64::from))
    .bind(&analysis.commercial_restrictions)
    .bind(&analysis.user_limit)
    .bind(&analysis.feature_restrictions)
    .bind(alternatives)
    .bind(&analysis.data_usage)
    .bind(&analysis.privacy_policy)
    .bind(&analysis.service_restrictions)
    .bind(risks)
    .bind(&analysis.compliance_notes)
    .bind(source)
    .bind(updated_by)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_entry(pool, tool_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("knowledge upsert did not persist for {}", tool_name))
}

pub async fn delete_entry(pool: &SqlitePool, tool_name: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM knowledge_base WHERE LOWER(tool_name) = LOWER(?)")
        .bind(tool_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_cover_untranslated_markers() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("  "));
        assert!(is_placeholder("Unknown"));
        assert!(is_placeholder("NULL"));
        assert!(is_placeholder("未知"));
        assert!(!is_placeholder("Apache 2.0"));
    }

    #[test]
    fn merge_backfills_only_placeholder_license_fields() {
        let mut analysis = TosAnalysis {
            license_type: Some("MIT".to_string()),
            license_mode: Some("unknown".to_string()),
            ..Default::default()
        };
        let knowledge = TosAnalysis {
            license_type: Some("Apache 2.0".to_string()),
            license_mode: Some("open source".to_string()),
            license_version: Some("2.0".to_string()),
            company_name: Some("Example Inc.".to_string()),
            ..Default::default()
        };
        let filled = merge_with_knowledge(&mut analysis, &knowledge);
        assert_eq!(analysis.license_type.as_deref(), Some("MIT"));
        assert_eq!(analysis.license_mode.as_deref(), Some("open source"));
        assert_eq!(analysis.license_version.as_deref(), Some("2.0"));
        assert_eq!(analysis.company_name.as_deref(), Some("Example Inc."));
        assert_eq!(filled, 3);
    }

    #[test]
    fn merge_leaves_assessment_inputs_of_real_analyses_alone() {
        let mut analysis = TosAnalysis {
            license_type: Some("MIT".to_string()),
            ..Default::default()
        };
        let knowledge = TosAnalysis {
            risk_points: vec!["stored risk".to_string()],
            data_usage: Some("restrictive".to_string()),
            privacy_policy: Some("unclear".to_string()),
            commercial_license_required: Some(true),
            alternative_tools: vec![AlternativeTool {
                name: Some("other".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        merge_with_knowledge(&mut analysis, &knowledge);
        // The stored record must not inject risk or policy facts into an
        // analysis the model actually produced.
        assert!(analysis.risk_points.is_empty());
        assert!(analysis.data_usage.is_none());
        assert!(analysis.privacy_policy.is_none());
        assert!(analysis.commercial_license_required.is_none());
        // Alternatives are display data and may be backfilled.
        assert_eq!(analysis.alternative_tools.len(), 1);
    }

    #[test]
    fn merge_into_empty_analysis_takes_whole_entry() {
        let mut analysis = TosAnalysis::default();
        let knowledge = TosAnalysis {
            license_type: Some("commercial license".to_string()),
            commercial_license_required: Some(true),
            risk_points: vec!["seat limits".to_string()],
            ..Default::default()
        };
        let filled = merge_with_knowledge(&mut analysis, &knowledge);
        assert_eq!(analysis, knowledge);
        assert_eq!(filled, 3);
    }

    #[test]
    fn builtin_catalog_prefers_longest_name_match() {
        let hit = builtin_lookup("docker desktop 4.30").unwrap();
        assert_eq!(hit.commercial_license_required, Some(true));

        let ce = builtin_lookup("Docker CE").unwrap();
        assert_eq!(ce.license_type.as_deref(), Some("Apache 2.0"));
        assert_eq!(ce.free_for_commercial, Some(true));

        assert!(builtin_lookup("some unheard of tool").is_none());
        assert!(builtin_lookup("   ").is_none());
    }

    async fn memory_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_matches_existing_entry_case_insensitively() {
        let pool = memory_pool().await;

        let first = TosAnalysis {
            license_type: Some("commercial license".to_string()),
            ..Default::default()
        };
        upsert_entry(&pool, "Docker", &first, "user", None).await.unwrap();

        let second = TosAnalysis {
            license_type: Some("Apache 2.0".to_string()),
            ..Default::default()
        };
        let entry = upsert_entry(&pool, "docker", &second, "ai", Some("reviewer"))
            .await
            .unwrap();

        // One row, keeping the original spelling of the name.
        assert_eq!(entry.tool_name, "Docker");
        assert_eq!(entry.analysis.license_type.as_deref(), Some("Apache 2.0"));
        assert_eq!(entry.source, "ai");
        assert_eq!(list_entries(&pool).await.unwrap().len(), 1);
    }
}
