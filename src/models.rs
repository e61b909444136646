//! Core data models used throughout toolscan.
//!
//! These types represent the tools, analysis fact sheets, and compliance
//! reports that flow through the scan pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered tool under compliance review.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub id: i64,
    pub name: String,
    pub version: Option<String>,
    pub source: String,
    pub tos_url: Option<String>,
    /// Cached raw TOS info and analysis (JSON text).
    pub tos_info: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One compliance report row, at most one per tool.
///
/// Score columns are `None` when the report was produced in simplified
/// mode (no multi-dimension assessment).
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub id: i64,
    pub tool_id: i64,
    pub score_overall: Option<f64>,
    pub score_security: Option<f64>,
    pub score_license: Option<f64>,
    pub score_maintenance: Option<f64>,
    pub score_performance: Option<f64>,
    pub score_tos: Option<f64>,
    pub is_compliant: Option<bool>,
    /// Non-compliance reasons (serialized JSON).
    pub reasons: Option<String>,
    /// Recommendations and alternative tools (serialized JSON).
    pub recommendations: Option<String>,
    /// The analysis snapshot this report was derived from (serialized JSON).
    pub tos_analysis: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A suggested replacement for a scanned tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlternativeTool {
    pub name: Option<String>,
    /// "open source" or "free commercial".
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub license: Option<String>,
    pub advantages: Option<String>,
    pub use_case: Option<String>,
}

/// The loosely-typed fact sheet produced by TOS analysis.
///
/// Every field is optional: AI output is noisy and frequently partial, and
/// the same shape backs durable knowledge-base entries. `analysis`/`format`
/// carry the soft-degrade payload when the AI reply was not parseable JSON
/// ("text" format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TosAnalysis {
    pub license_type: Option<String>,
    pub license_version: Option<String>,
    pub license_mode: Option<String>,
    pub company_name: Option<String>,
    pub company_country: Option<String>,
    pub company_headquarters: Option<String>,
    pub local_presence: Option<bool>,
    pub commercial_license_required: Option<bool>,
    pub free_for_commercial: Option<bool>,
    pub commercial_restrictions: Option<String>,
    pub user_limit: Option<String>,
    pub feature_restrictions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternative_tools: Vec<AlternativeTool>,
    pub data_usage: Option<String>,
    pub privacy_policy: Option<String>,
    pub service_restrictions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risk_points: Vec<String>,
    pub compliance_notes: Option<String>,
    /// Raw AI reply when structured extraction failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// "text" when this value is a soft-degraded raw reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl TosAnalysis {
    /// Lenient construction from arbitrary AI-produced JSON. Strings are
    /// taken as-is; numbers and booleans are stringified where a string
    /// field is expected; anything unusable becomes `None`.
    pub fn from_value(v: &Value) -> Self {
        Self {
            license_type: value_str(v, "license_type"),
            license_version: value_str(v, "license_version"),
            license_mode: value_str(v, "license_mode"),
            company_name: value_str(v, "company_name"),
            company_country: value_str(v, "company_country"),
            company_headquarters: value_str(v, "company_headquarters"),
            local_presence: value_bool(v, "local_presence"),
            commercial_license_required: value_bool(v, "commercial_license_required"),
            free_for_commercial: value_bool(v, "free_for_commercial"),
            commercial_restrictions: value_str(v, "commercial_restrictions"),
            user_limit: value_str(v, "user_limit"),
            feature_restrictions: value_str(v, "feature_restrictions"),
            alternative_tools: value_alternatives(v, "alternative_tools"),
            data_usage: value_str(v, "data_usage"),
            privacy_policy: value_str(v, "privacy_policy"),
            service_restrictions: value_str(v, "service_restrictions"),
            risk_points: value_str_list(v, "risk_points"),
            compliance_notes: value_str(v, "compliance_notes"),
            analysis: None,
            format: None,
        }
    }

    /// A raw-text degrade carrying the unparseable AI reply.
    pub fn from_raw_text(text: String) -> Self {
        Self {
            analysis: Some(text),
            format: Some("text".to_string()),
            data_usage: Some("unknown".to_string()),
            privacy_policy: Some("unknown".to_string()),
            ..Default::default()
        }
    }

    /// True when no field carries any information.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when this value is a soft-degraded raw reply with no
    /// structured fields.
    pub fn is_text_only(&self) -> bool {
        self.format.as_deref() == Some("text") && self.license_type.is_none()
    }
}

fn value_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_bool(v: &Value, key: &str) -> Option<bool> {
    match v.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_str_list(v: &Value, key: &str) -> Vec<String> {
    match v.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn value_alternatives(v: &Value, key: &str) -> Vec<AlternativeTool> {
    match v.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                item.as_object().map(|_| AlternativeTool {
                    name: value_str(item, "name"),
                    kind: value_str(item, "type"),
                    license: value_str(item, "license"),
                    advantages: value_str(item, "advantages"),
                    use_case: value_str(item, "use_case"),
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_reads_mixed_types() {
        let v = json!({
            "license_type": "MIT",
            "license_version": 2.0,
            "commercial_license_required": "true",
            "free_for_commercial": false,
            "risk_points": ["telemetry", "audit clause"],
            "alternative_tools": [
                {"name": "Podman", "type": "open source", "license": "Apache 2.0"}
            ],
            "unknown_extra_field": {"nested": true}
        });
        let a = TosAnalysis::from_value(&v);
        assert_eq!(a.license_type.as_deref(), Some("MIT"));
        assert_eq!(a.license_version.as_deref(), Some("2.0"));
        assert_eq!(a.commercial_license_required, Some(true));
        assert_eq!(a.free_for_commercial, Some(false));
        assert_eq!(a.risk_points.len(), 2);
        assert_eq!(a.alternative_tools.len(), 1);
        assert_eq!(a.alternative_tools[0].name.as_deref(), Some("Podman"));
    }

    #[test]
    fn empty_and_whitespace_strings_become_none() {
        let v = json!({"license_type": "  ", "company_name": ""});
        let a = TosAnalysis::from_value(&v);
        assert!(a.license_type.is_none());
        assert!(a.company_name.is_none());
        assert!(a.is_empty());
    }

    #[test]
    fn raw_text_degrade_is_tagged() {
        let a = TosAnalysis::from_raw_text("no JSON here".to_string());
        assert!(a.is_text_only());
        assert!(!a.is_empty());
        assert_eq!(a.format.as_deref(), Some("text"));
    }

    #[test]
    fn serialization_roundtrip() {
        let v = json!({
            "license_type": "Apache 2.0",
            "local_presence": false,
            "risk_points": ["r1"]
        });
        let a = TosAnalysis::from_value(&v);
        let text = serde_json::to_string(&a).unwrap();
        let back: TosAnalysis = serde_json::from_str(&text).unwrap();
        assert_eq!(a, back);
    }
}
