//! Field-level comparison between a fresh analysis and stored knowledge.
//!
//! Produces the change set shown to an operator before a knowledge base
//! record is overwritten. List fields compare as sets so reordering the
//! same risk points does not count as a change.

use serde::Serialize;
use serde_json::Value;

use crate::models::TosAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub field: String,
    /// Display name shown to the operator reviewing the change.
    pub label: String,
    pub kind: ChangeKind,
    pub old_value: Value,
    pub new_value: Value,
}

fn field_label(field: &str) -> &'static str {
    match field {
        "license_type" => "License type",
        "license_version" => "License version",
        "license_mode" => "License mode",
        "company_name" => "Company name",
        "company_country" => "Company country",
        "company_headquarters" => "Company headquarters",
        "local_presence" => "Local presence",
        "commercial_license_required" => "Commercial license required",
        "free_for_commercial" => "Free for commercial use",
        "commercial_restrictions" => "Commercial restrictions",
        "user_limit" => "User limit",
        "feature_restrictions" => "Feature restrictions",
        "alternative_tools" => "Alternative tools",
        "data_usage" => "Data usage",
        "privacy_policy" => "Privacy policy",
        "service_restrictions" => "Service restrictions",
        "risk_points" => "Risk points",
        "compliance_notes" => "Compliance notes",
        _ => "Unknown field",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub has_changes: bool,
    pub change_count: usize,
    pub changes: Vec<FieldChange>,
    pub summary: String,
}

fn opt_str(v: &Option<String>) -> Value {
    match v {
        Some(s) if !s.trim().is_empty() => Value::String(s.clone()),
        _ => Value::Null,
    }
}

fn opt_bool(v: Option<bool>) -> Value {
    match v {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

/// Canonical form for order-insensitive list comparison: serialize each
/// element and sort the strings.
fn canonical_list<T: Serialize>(items: &[T]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .filter_map(|item| serde_json::to_string(item).ok())
        .collect();
    out.sort();
    out
}

fn list_value<T: Serialize>(items: &[T]) -> Value {
    if items.is_empty() {
        Value::Null
    } else {
        serde_json::to_value(items).unwrap_or(Value::Null)
    }
}

fn classify(old: &Value, new: &Value) -> Option<ChangeKind> {
    match (old.is_null(), new.is_null()) {
        (true, true) => None,
        (true, false) => Some(ChangeKind::Added),
        (false, true) => Some(ChangeKind::Removed),
        (false, false) => {
            if old == new {
                None
            } else {
                Some(ChangeKind::Modified)
            }
        }
    }
}

fn push_change(changes: &mut Vec<FieldChange>, field: &str, old: Value, new: Value) {
    if let Some(kind) = classify(&old, &new) {
        changes.push(FieldChange {
            field: field.to_string(),
            label: field_label(field).to_string(),
            kind,
            old_value: old,
            new_value: new,
        });
    }
}

/// Compare stored knowledge (`old`) against a fresh analysis (`new`).
pub fn diff_analyses(old: &TosAnalysis, new: &TosAnalysis) -> DiffResult {
    let mut changes = Vec::new();

    let string_fields: [(&str, &Option<String>, &Option<String>); 13] = [
        ("license_type", &old.license_type, &new.license_type),
        ("license_version", &old.license_version, &new.license_version),
        ("license_mode", &old.license_mode, &new.license_mode),
        ("company_name", &old.company_name, &new.company_name),
        ("company_country", &old.company_country, &new.company_country),
        (
            "company_headquarters",
            &old.company_headquarters,
            &new.company_headquarters,
        ),
        (
            "commercial_restrictions",
            &old.commercial_restrictions,
            &new.commercial_restrictions,
        ),
        ("user_limit", &old.user_limit, &new.user_limit),
        (
            "feature_restrictions",
            &old.feature_restrictions,
            &new.feature_restrictions,
        ),
        ("data_usage", &old.data_usage, &new.data_usage),
        ("privacy_policy", &old.privacy_policy, &new.privacy_policy),
        (
            "service_restrictions",
            &old.service_restrictions,
            &new.service_restrictions,
        ),
        ("compliance_notes", &old.compliance_notes, &new.compliance_notes),
    ];
    for (name, o, n) in string_fields {
        push_change(&mut changes, name, opt_str(o), opt_str(n));
    }

    let bool_fields: [(&str, Option<bool>, Option<bool>); 3] = [
        ("local_presence", old.local_presence, new.local_presence),
        (
            "commercial_license_required",
            old.commercial_license_required,
            new.commercial_license_required,
        ),
        (
            "free_for_commercial",
            old.free_for_commercial,
            new.free_for_commercial,
        ),
    ];
    for (name, o, n) in bool_fields {
        push_change(&mut changes, name, opt_bool(o), opt_bool(n));
    }

    if canonical_list(&old.alternative_tools) != canonical_list(&new.alternative_tools) {
        push_change(
            &mut changes,
            "alternative_tools",
            list_value(&old.alternative_tools),
            list_value(&new.alternative_tools),
        );
    }
    if canonical_list(&old.risk_points) != canonical_list(&new.risk_points) {
        push_change(
            &mut changes,
            "risk_points",
            list_value(&old.risk_points),
            list_value(&new.risk_points),
        );
    }

    let added = changes.iter().filter(|c| c.kind == ChangeKind::Added).count();
    let removed = changes.iter().filter(|c| c.kind == ChangeKind::Removed).count();
    let modified = changes.iter().filter(|c| c.kind == ChangeKind::Modified).count();
    let summary = if changes.is_empty() {
        "no changes".to_string()
    } else {
        format!("{added} added, {modified} modified, {removed} removed")
    };

    DiffResult {
        has_changes: !changes.is_empty(),
        change_count: changes.len(),
        changes,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlternativeTool;

    #[test]
    fn identical_analyses_produce_no_changes() {
        let a = TosAnalysis {
            license_type: Some("MIT".to_string()),
            risk_points: vec!["telemetry".to_string()],
            ..Default::default()
        };
        let result = diff_analyses(&a, &a.clone());
        assert!(!result.has_changes);
        assert_eq!(result.change_count, 0);
        assert_eq!(result.summary, "no changes");
    }

    #[test]
    fn classifies_added_removed_and_modified() {
        let old = TosAnalysis {
            license_type: Some("MIT".to_string()),
            data_usage: Some("local only".to_string()),
            ..Default::default()
        };
        let new = TosAnalysis {
            license_type: Some("Apache-2.0".to_string()),
            privacy_policy: Some("clear".to_string()),
            ..Default::default()
        };
        let result = diff_analyses(&old, &new);
        assert_eq!(result.change_count, 3);
        let kind_of = |field: &str| {
            result
                .changes
                .iter()
                .find(|c| c.field == field)
                .map(|c| c.kind)
                .unwrap()
        };
        assert_eq!(kind_of("license_type"), ChangeKind::Modified);
        assert_eq!(kind_of("data_usage"), ChangeKind::Removed);
        assert_eq!(kind_of("privacy_policy"), ChangeKind::Added);
        assert_eq!(result.summary, "1 added, 1 modified, 1 removed");

        // Every change carries its display name.
        let license = result.changes.iter().find(|c| c.field == "license_type").unwrap();
        assert_eq!(license.label, "License type");
        let privacy = result.changes.iter().find(|c| c.field == "privacy_policy").unwrap();
        assert_eq!(privacy.label, "Privacy policy");
    }

    #[test]
    fn list_order_does_not_count_as_change() {
        let old = TosAnalysis {
            risk_points: vec!["a".to_string(), "b".to_string()],
            alternative_tools: vec![
                AlternativeTool {
                    name: Some("x".to_string()),
                    ..Default::default()
                },
                AlternativeTool {
                    name: Some("y".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut new = old.clone();
        new.risk_points.reverse();
        new.alternative_tools.reverse();
        assert!(!diff_analyses(&old, &new).has_changes);

        new.risk_points.push("c".to_string());
        let result = diff_analyses(&old, &new);
        assert!(result.has_changes);
        assert_eq!(result.changes[0].field, "risk_points");
        assert_eq!(result.changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn boolean_presence_compares_by_value() {
        let old = TosAnalysis {
            local_presence: Some(true),
            ..Default::default()
        };
        let new = TosAnalysis {
            local_presence: Some(false),
            ..Default::default()
        };
        let result = diff_analyses(&old, &new);
        assert_eq!(result.change_count, 1);
        assert_eq!(result.changes[0].field, "local_presence");
        assert_eq!(result.changes[0].kind, ChangeKind::Modified);
    }
}
