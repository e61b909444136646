//! Compliance scoring engine.
//!
//! Two report modes share one code path. Full mode scores five dimensions
//! (security, license, maintenance, performance, TOS), combines them into
//! a weighted overall score and a pass/fail verdict. Simplified mode skips
//! every numeric score and persists NULL score columns. Recommendations
//! and reasons are derived from the license facts in both modes, so a
//! "must purchase a license" finding survives even without scoring.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::ai::AnalysisClient;
use crate::config::{ComplianceConfig, ScoringWeights};
use crate::models::{ComplianceReport, TosAnalysis, Tool};
use crate::store::{self, ReportFields};

pub const COMPLIANCE_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionScores {
    pub security: f64,
    pub license: f64,
    pub maintenance: f64,
    pub performance: f64,
    pub tos: f64,
}

pub struct ScoringEngine {
    config: ComplianceConfig,
    client: Arc<AnalysisClient>,
}

impl ScoringEngine {
    pub fn new(config: ComplianceConfig, client: Arc<AnalysisClient>) -> Self {
        Self { config, client }
    }

    /// AI-assisted security assessment, defaulting when the model cannot
    /// supply a usable number.
    pub async fn assess_security(&self, tool_name: &str) -> f64 {
        match self.client.dimension_score(tool_name, "security").await {
            Ok(Some(score)) => score,
            Ok(None) => 70.0,
            Err(err) => {
                warn!(tool = tool_name, error = %err, "security assessment unavailable");
                70.0
            }
        }
    }

    /// License compliance. Analysis facts take precedence over the model:
    /// a mandatory commercial license scores 60, free commercial use 90,
    /// anything in between 70.
    pub async fn assess_license(&self, tool_name: &str, facts: Option<&TosAnalysis>) -> f64 {
        if let Some(analysis) = facts {
            let required = analysis.commercial_license_required == Some(true);
            let free = analysis.free_for_commercial == Some(true);
            if required && !free {
                warn!(tool = tool_name, "commercial license purchase required");
                return 60.0;
            }
            if free {
                debug!(tool = tool_name, "free for commercial use");
                return 90.0;
            }
            return 70.0;
        }
        match self.client.dimension_score(tool_name, "license").await {
            Ok(Some(score)) => score,
            Ok(None) => 75.0,
            Err(err) => {
                warn!(tool = tool_name, error = %err, "license assessment unavailable");
                75.0
            }
        }
    }

    pub async fn assess_maintenance(&self, tool_name: &str) -> f64 {
        match self.client.dimension_score(tool_name, "maintenance").await {
            Ok(Some(score)) => score,
            Ok(None) => 65.0,
            Err(err) => {
                warn!(tool = tool_name, error = %err, "maintenance assessment unavailable");
                65.0
            }
        }
    }

    /// Performance is not yet assessed per tool; a fixed neutral score
    /// keeps its weight meaningful.
    pub fn assess_performance(&self, _tool_name: &str) -> f64 {
        80.0
    }

    /// TOS risk score: start at 100, subtract 10 per recorded risk point,
    /// and another 20 when data usage is restrictive or the privacy policy
    /// is unclear. Missing analysis earns a neutral 50.
    pub fn assess_tos(&self, facts: Option<&TosAnalysis>) -> f64 {
        let Some(analysis) = facts else {
            return 50.0;
        };
        let mut score = (100.0 - analysis.risk_points.len() as f64 * 10.0).max(0.0);
        let restrictive = analysis
            .data_usage
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("restrictive"));
        let unclear = analysis
            .privacy_policy
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("unclear"));
        if restrictive || unclear {
            score = (score - 20.0).max(0.0);
        }
        score
    }

    pub async fn assess_all(&self, tool_name: &str, facts: Option<&TosAnalysis>) -> DimensionScores {
        let scores = DimensionScores {
            security: self.assess_security(tool_name).await,
            license: self.assess_license(tool_name, facts).await,
            maintenance: self.assess_maintenance(tool_name).await,
            performance: self.assess_performance(tool_name),
            tos: self.assess_tos(facts),
        };
        info!(tool = tool_name, ?scores, "dimension assessment complete");
        scores
    }

    /// Weighted average of the dimension scores, with weights normalized
    /// so partial weight tables still land on a 0..=100 scale. Rounded to
    /// two decimal places.
    pub fn calculate_overall_score(&self, scores: &DimensionScores) -> f64 {
        calculate_overall_score(&self.config.scoring, scores)
    }

    pub fn is_compliant(&self, overall: f64) -> bool {
        overall >= COMPLIANCE_THRESHOLD
    }

    /// Score (in full mode) and persist the report row for a tool.
    pub async fn generate_report(
        &self,
        pool: &SqlitePool,
        tool: &Tool,
        analysis: &TosAnalysis,
    ) -> Result<ComplianceReport> {
        let facts = (!analysis.is_empty()).then_some(analysis);

        let fields = if self.config.enable_multi_dimension_assessment {
            let scores = self.assess_all(&tool.name, facts).await;
            let overall = self.calculate_overall_score(&scores);
            let compliant = self.is_compliant(overall);
            info!(tool = %tool.name, overall, compliant, "report scored");
            ReportFields {
                score_overall: Some(overall),
                score_security: Some(scores.security),
                score_license: Some(scores.license),
                score_maintenance: Some(scores.maintenance),
                score_performance: Some(scores.performance),
                score_tos: Some(scores.tos),
                is_compliant: Some(compliant),
                reasons: build_reasons(facts, Some(&scores), Some(compliant)).to_string(),
                recommendations: build_recommendations(facts, Some(&scores)).to_string(),
                tos_analysis: serde_json::to_string(analysis)?,
            }
        } else {
            info!(tool = %tool.name, "report in simplified mode, scoring skipped");
            ReportFields {
                reasons: build_reasons(facts, None, None).to_string(),
                recommendations: build_recommendations(facts, None).to_string(),
                tos_analysis: serde_json::to_string(analysis)?,
                ..Default::default()
            }
        };

        store::upsert_report(pool, tool.id, &fields).await
    }
}

pub fn calculate_overall_score(weights: &ScoringWeights, scores: &DimensionScores) -> f64 {
    let pairs = [
        (weights.security, scores.security),
        (weights.license, scores.license),
        (weights.maintenance, scores.maintenance),
        (weights.performance, scores.performance),
        (weights.tos, scores.tos),
    ];
    let total: f64 = pairs.iter().map(|(w, _)| w).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let overall: f64 = pairs.iter().map(|(w, s)| (w / total) * s).sum();
    (overall * 100.0).round() / 100.0
}

/// Deterministic guidance from the license facts, extended with
/// low-scoring dimensions when scoring ran.
fn build_recommendations(facts: Option<&TosAnalysis>, scores: Option<&DimensionScores>) -> Value {
    let mut recommendations = Vec::new();
    let mut alternatives = Value::Array(Vec::new());

    if let Some(analysis) = facts {
        if !analysis.alternative_tools.is_empty() {
            alternatives = serde_json::to_value(&analysis.alternative_tools)
                .unwrap_or_else(|_| Value::Array(Vec::new()));
        }
        let required = analysis.commercial_license_required == Some(true);
        let free = analysis.free_for_commercial == Some(true);
        let license_type = analysis.license_type.as_deref().unwrap_or("unknown");
        if required && !free {
            let mut suggestion =
                format!("commercial users must purchase a license (type: {license_type})");
            if let Some(restrictions) = analysis
                .commercial_restrictions
                .as_deref()
                .filter(|r| !r.trim().is_empty())
            {
                suggestion.push_str(&format!("; {restrictions}"));
            }
            recommendations.push(json!({
                "dimension": "license",
                "priority": "high",
                "suggestion": suggestion,
                "action": "evaluate license cost and budget",
                "alternatives_available": !analysis.alternative_tools.is_empty(),
            }));
        } else if free {
            recommendations.push(json!({
                "dimension": "license",
                "priority": "low",
                "suggestion": "free for commercial use, no license purchase needed",
                "action": "continue using",
            }));
        }
    }

    if let Some(scores) = scores {
        for (dimension, score) in [
            ("security", scores.security),
            ("maintenance", scores.maintenance),
            ("performance", scores.performance),
            ("tos", scores.tos),
        ] {
            if score < COMPLIANCE_THRESHOLD {
                recommendations.push(json!({
                    "dimension": dimension,
                    "score": score,
                    "priority": "medium",
                    "suggestion": format!("improve the {dimension} dimension (current score: {score})"),
                }));
            }
        }
    }

    json!({
        "recommendations": recommendations,
        "alternative_tools": alternatives,
    })
}

fn build_reasons(
    facts: Option<&TosAnalysis>,
    scores: Option<&DimensionScores>,
    compliant: Option<bool>,
) -> Value {
    let mut reasons = Vec::new();
    let mut license_required = false;

    if let Some(analysis) = facts {
        let required = analysis.commercial_license_required == Some(true);
        let free = analysis.free_for_commercial == Some(true);
        license_required = required;
        if required && !free {
            reasons.push(json!({
                "dimension": "license",
                "score": scores.map(|s| s.license),
                "reason": "commercial users must purchase a license",
                "impact": "high",
            }));
        }
    }

    if let (Some(scores), Some(false)) = (scores, compliant) {
        for (dimension, score) in [
            ("security", scores.security),
            ("maintenance", scores.maintenance),
            ("performance", scores.performance),
            ("tos", scores.tos),
        ] {
            if score < COMPLIANCE_THRESHOLD {
                reasons.push(json!({
                    "dimension": dimension,
                    "score": score,
                    "reason": format!("{dimension} scored below the threshold ({score} < 70)"),
                    "impact": "medium",
                }));
            }
        }
    }

    json!({
        "is_compliant": compliant,
        "reasons": reasons,
        "commercial_license_required": license_required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, RetryConfig};

    fn engine() -> ScoringEngine {
        let client = AnalysisClient::from_config(&AiConfig::default(), &RetryConfig::default())
            .expect("disabled provider always constructs");
        ScoringEngine::new(ComplianceConfig::default(), Arc::new(client))
    }

    fn analysis(required: bool, free: bool) -> TosAnalysis {
        TosAnalysis {
            commercial_license_required: Some(required),
            free_for_commercial: Some(free),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn license_facts_drive_the_score() {
        let e = engine();
        assert_eq!(e.assess_license("t", Some(&analysis(true, false))).await, 60.0);
        assert_eq!(e.assess_license("t", Some(&analysis(false, true))).await, 90.0);
        assert_eq!(e.assess_license("t", Some(&analysis(false, false))).await, 70.0);
        // No facts and a disabled provider fall back to the default.
        assert_eq!(e.assess_license("t", None).await, 75.0);
    }

    #[test]
    fn tos_score_subtracts_risks_and_policy_penalties() {
        let e = engine();
        assert_eq!(e.assess_tos(None), 50.0);

        let clean = TosAnalysis::default();
        assert_eq!(e.assess_tos(Some(&clean)), 100.0);

        let risky = TosAnalysis {
            risk_points: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        assert_eq!(e.assess_tos(Some(&risky)), 70.0);

        let restrictive = TosAnalysis {
            data_usage: Some("restrictive".to_string()),
            risk_points: vec!["a".into()],
            ..Default::default()
        };
        assert_eq!(e.assess_tos(Some(&restrictive)), 70.0);

        let floor = TosAnalysis {
            privacy_policy: Some("unclear".to_string()),
            risk_points: (0..12).map(|i| format!("r{i}")).collect(),
            ..Default::default()
        };
        assert_eq!(e.assess_tos(Some(&floor)), 0.0);
    }

    #[test]
    fn overall_score_is_a_normalized_weighted_average() {
        let weights = ScoringWeights {
            security: 0.4,
            license: 0.3,
            maintenance: 0.2,
            performance: 0.1,
            tos: 0.0,
        };
        let scores = DimensionScores {
            security: 100.0,
            license: 100.0,
            maintenance: 100.0,
            performance: 0.0,
            tos: 0.0,
        };
        assert_eq!(calculate_overall_score(&weights, &scores), 90.0);

        // Weights that do not sum to one are normalized first.
        let lopsided = ScoringWeights {
            security: 2.0,
            license: 1.0,
            maintenance: 1.0,
            performance: 0.0,
            tos: 0.0,
        };
        let mixed = DimensionScores {
            security: 100.0,
            license: 50.0,
            maintenance: 50.0,
            performance: 100.0,
            tos: 100.0,
        };
        assert_eq!(calculate_overall_score(&lopsided, &mixed), 75.0);
    }

    #[test]
    fn compliance_threshold_is_inclusive() {
        let e = engine();
        assert!(e.is_compliant(70.0));
        assert!(!e.is_compliant(69.99));
    }

    #[test]
    fn license_reason_survives_without_scores() {
        let facts = analysis(true, false);
        let reasons = build_reasons(Some(&facts), None, None);
        assert_eq!(reasons["is_compliant"], Value::Null);
        assert_eq!(reasons["commercial_license_required"], json!(true));
        assert_eq!(reasons["reasons"][0]["dimension"], json!("license"));
        assert_eq!(reasons["reasons"][0]["impact"], json!("high"));

        let recs = build_recommendations(Some(&facts), None);
        assert_eq!(recs["recommendations"][0]["priority"], json!("high"));
    }

    #[test]
    fn low_dimensions_are_called_out_when_not_compliant() {
        let scores = DimensionScores {
            security: 40.0,
            license: 90.0,
            maintenance: 65.0,
            performance: 80.0,
            tos: 50.0,
        };
        let reasons = build_reasons(None, Some(&scores), Some(false));
        let listed: Vec<&str> = reasons["reasons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["dimension"].as_str().unwrap())
            .collect();
        assert_eq!(listed, vec!["security", "maintenance", "tos"]);
    }
}
