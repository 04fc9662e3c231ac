use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{FindingCounts, ReviewStep, Severity};

/// One review finding emitted by an analyzer.
///
/// `reason` is populated for warnings, `resolution_needed` for criticals.
/// The trailing optional fields are analyzer-specific annotations; each
/// analyzer fills only the ones that apply to its lens.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Finding {
    pub id: String,
    pub component: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_needed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_convention: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promise_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_cancellation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_timeout: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_validation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioning_scheme: Option<String>,
}

impl Finding {
    pub fn well_defined(id: &str, component: &str, description: &str) -> Self {
        Finding {
            id: id.to_string(),
            component: component.to_string(),
            description: description.to_string(),
            severity: Severity::WellDefined,
            reason: None,
            resolution_needed: None,
            contract_type: None,
            naming_convention: None,
            promise_type: None,
            has_cancellation: None,
            has_timeout: None,
            relationship_type: None,
            has_validation: None,
            http_method: None,
            endpoint: None,
            versioning_scheme: None,
        }
    }

    pub fn warning(id: &str, component: &str, description: &str, reason: &str) -> Self {
        let mut finding = Finding::well_defined(id, component, description);
        finding.severity = Severity::Warning;
        finding.reason = Some(reason.to_string());
        finding
    }

    pub fn critical(id: &str, component: &str, description: &str, resolution: &str) -> Self {
        let mut finding = Finding::well_defined(id, component, description);
        finding.severity = Severity::Critical;
        finding.resolution_needed = Some(resolution.to_string());
        finding
    }
}

/// Result of one analyzer applied to one requirement node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepAnalysis {
    pub step: ReviewStep,
    pub requirement_id: String,
    pub findings: Vec<Finding>,
    pub counts: FindingCounts,
    /// Step-specific metrics (extension-point counts, detected verbs, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl StepAnalysis {
    pub fn new(step: ReviewStep, requirement_id: &str, findings: Vec<Finding>) -> Self {
        let counts = count_findings(&findings);
        StepAnalysis {
            step,
            requirement_id: requirement_id.to_string(),
            findings,
            counts,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

/// Finding ids bucketed by severity, with the gating verdict.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CategorizedFindings {
    pub well_defined: Vec<String>,
    pub warnings: Vec<String>,
    pub critical: Vec<String>,
    pub counts: FindingCounts,
    pub can_proceed: bool,
}

pub fn count_findings(findings: &[Finding]) -> FindingCounts {
    let mut counts = FindingCounts::default();
    for finding in findings {
        match finding.severity {
            Severity::WellDefined => counts.well_defined += 1,
            Severity::Warning => counts.warning += 1,
            Severity::Critical => counts.critical += 1,
        }
    }
    counts
}

/// Bucket findings by severity. `can_proceed` is false iff any finding
/// is critical.
pub fn categorize(findings: &[Finding]) -> CategorizedFindings {
    let mut categorized = CategorizedFindings::default();

    for finding in findings {
        match finding.severity {
            Severity::WellDefined => categorized.well_defined.push(finding.id.clone()),
            Severity::Warning => categorized.warnings.push(finding.id.clone()),
            Severity::Critical => categorized.critical.push(finding.id.clone()),
        }
    }

    categorized.counts = count_findings(findings);
    categorized.can_proceed = categorized.counts.critical == 0;
    categorized
}

// --- Recommendations ---

/// One actionable recommendation derived from a finding.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Recommendation {
    pub finding_id: String,
    pub component: String,
    pub severity: Severity,
    pub message: String,
    pub is_mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Recommendations {
    pub items: Vec<Recommendation>,
    /// Well-defined findings carry no action and are counted here instead.
    pub skipped_count: usize,
}

/// Build prioritized recommendations from a finding set.
///
/// Well-defined findings are skipped (tallied in `skipped_count`). Every
/// other finding yields one recommendation: warnings carry their reason in
/// the message, criticals carry `resolution_needed` as the suggested fix
/// and are mandatory. Criticals sort first; input order is preserved
/// within each severity.
pub fn generate_recommendations(findings: &[Finding]) -> Recommendations {
    let mut criticals = Vec::new();
    let mut warnings = Vec::new();
    let mut skipped = 0usize;

    for finding in findings {
        match finding.severity {
            Severity::WellDefined => skipped += 1,
            Severity::Warning => {
                let reason = finding.reason.as_deref().unwrap_or("unspecified");
                warnings.push(Recommendation {
                    finding_id: finding.id.clone(),
                    component: finding.component.clone(),
                    severity: Severity::Warning,
                    message: format!(
                        "Improve {}: {} ({})",
                        finding.component, finding.description, reason
                    ),
                    is_mandatory: false,
                    suggested_fix: None,
                });
            }
            Severity::Critical => {
                let resolution = finding
                    .resolution_needed
                    .as_deref()
                    .unwrap_or("resolution required");
                criticals.push(Recommendation {
                    finding_id: finding.id.clone(),
                    component: finding.component.clone(),
                    severity: Severity::Critical,
                    message: format!(
                        "Resolve critical finding in {}: {}. Required: {}",
                        finding.component, finding.description, resolution
                    ),
                    is_mandatory: true,
                    suggested_fix: Some(resolution.to_string()),
                });
            }
        }
    }

    criticals.extend(warnings);
    Recommendations {
        items: criticals,
        skipped_count: skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_gates_on_critical() {
        let findings = vec![
            Finding::well_defined("F-1", "auth", "input and output stated"),
            Finding::critical("F-2", "auth", "no contract", "State the contract"),
        ];
        let categorized = categorize(&findings);
        assert!(!categorized.can_proceed);
        assert_eq!(categorized.counts.critical, 1);
        assert_eq!(categorized.critical, vec!["F-2".to_string()]);
    }

    #[test]
    fn warnings_do_not_gate() {
        let findings = vec![Finding::warning("F-1", "auth", "partial", "missing output")];
        assert!(categorize(&findings).can_proceed);
    }

    #[test]
    fn recommendations_put_criticals_first_and_skip_well_defined() {
        let findings = vec![
            Finding::well_defined("WD-1", "a", "fine"),
            Finding::warning("W-1", "b", "partial", "Partial spec"),
            Finding::critical("C-1", "c", "broken", "Fix contract"),
        ];

        let recs = generate_recommendations(&findings);

        assert_eq!(recs.items.len(), 2);
        assert_eq!(recs.skipped_count, 1);
        assert_eq!(recs.items[0].severity, Severity::Critical);
        assert!(recs.items[0].is_mandatory);
        assert_eq!(recs.items[0].suggested_fix.as_deref(), Some("Fix contract"));
        assert_eq!(recs.items[1].severity, Severity::Warning);
        assert!(!recs.items[1].is_mandatory);
        assert!(recs.items[1].message.contains("Partial spec"));
    }
}
