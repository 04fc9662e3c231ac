use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::findings::{Finding, StepAnalysis};
use crate::requirement::RequirementNode;
use crate::types::ReviewStep;

/// Run the analyzer for one step against one requirement node.
///
/// Analyzers are pure text heuristics over the node's description,
/// acceptance criteria, and implementation hints. Given identical inputs
/// they produce identical findings, in a stable order.
pub fn analyze(step: ReviewStep, node: &RequirementNode, phase: &str) -> StepAnalysis {
    match step {
        ReviewStep::Contracts => analyze_contracts(node, phase),
        ReviewStep::Interfaces => analyze_interfaces(node, phase),
        ReviewStep::Promises => analyze_promises(node, phase),
        ReviewStep::DataModels => analyze_data_models(node, phase),
        ReviewStep::Apis => analyze_apis(node, phase),
    }
}

/// Lowercased description + acceptance criteria, the corpus most
/// analyzers match against.
fn corpus(node: &RequirementNode) -> String {
    let mut text = node.description.to_lowercase();
    for criterion in &node.acceptance_criteria {
        text.push('\n');
        text.push_str(&criterion.to_lowercase());
    }
    text
}

fn finding_id(step: ReviewStep, requirement_id: &str, seq: usize) -> String {
    format!("{}-{}-{}", step, requirement_id, seq)
}

// --- Contracts ---

const INPUT_TOKENS: [&str; 4] = ["accepts", "input", "given", "receives"];
const OUTPUT_TOKENS: [&str; 6] = ["returns", "output", "produces", "raises", "throws", "errors"];

fn mentions_any(text: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|t| text.contains(t))
}

/// Contracts lens: every acceptance criterion should state what the
/// operation accepts and what it returns (or raises).
fn analyze_contracts(node: &RequirementNode, phase: &str) -> StepAnalysis {
    let mut findings = Vec::new();
    let mut input_mentions = 0usize;
    let mut output_mentions = 0usize;
    let mut seq = 0usize;

    let description_has_contract = {
        let desc = node.description.to_lowercase();
        mentions_any(&desc, &INPUT_TOKENS) || mentions_any(&desc, &OUTPUT_TOKENS)
    };

    let mut any_criterion_has_contract = false;

    for (idx, criterion) in node.acceptance_criteria.iter().enumerate() {
        let lowered = criterion.to_lowercase();
        let has_input = mentions_any(&lowered, &INPUT_TOKENS);
        let has_output = mentions_any(&lowered, &OUTPUT_TOKENS);

        if has_input {
            input_mentions += 1;
        }
        if has_output {
            output_mentions += 1;
        }

        match (has_input, has_output) {
            (true, true) => {
                any_criterion_has_contract = true;
                seq += 1;
                let mut f = Finding::well_defined(
                    &finding_id(ReviewStep::Contracts, &node.id, seq),
                    &node.id,
                    &format!("Criterion {} states both input and output contracts", idx + 1),
                );
                f.contract_type = Some("input_output".to_string());
                findings.push(f);
            }
            (true, false) => {
                any_criterion_has_contract = true;
                seq += 1;
                let mut f = Finding::warning(
                    &finding_id(ReviewStep::Contracts, &node.id, seq),
                    &node.id,
                    &format!("Criterion {} states an input contract only", idx + 1),
                    "Output contract is not stated",
                );
                f.contract_type = Some("input".to_string());
                findings.push(f);
            }
            (false, true) => {
                any_criterion_has_contract = true;
                seq += 1;
                let mut f = Finding::warning(
                    &finding_id(ReviewStep::Contracts, &node.id, seq),
                    &node.id,
                    &format!("Criterion {} states an output contract only", idx + 1),
                    "Input contract is not stated",
                );
                f.contract_type = Some("output".to_string());
                findings.push(f);
            }
            (false, false) => {}
        }
    }

    if !description_has_contract && !any_criterion_has_contract {
        seq += 1;
        let mut f = Finding::critical(
            &finding_id(ReviewStep::Contracts, &node.id, seq),
            &node.id,
            "No input or output contracts are stated anywhere in the requirement",
            "Define what the operation accepts and what it returns",
        );
        f.contract_type = Some("none".to_string());
        findings.push(f);
    }

    StepAnalysis::new(ReviewStep::Contracts, &node.id, findings)
        .with_metric("phase", serde_json::json!(phase))
        .with_metric("input_mentions", serde_json::json!(input_mentions))
        .with_metric("output_mentions", serde_json::json!(output_mentions))
}

// --- Interfaces ---

const EXTENSION_POINT_SUFFIXES: [&str; 3] = ["handler", "provider", "service"];

/// Detect the naming convention of one component name.
fn naming_convention(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return None;
    }

    let has_underscore = name.contains('_');
    let first_upper = name.chars().next().is_some_and(char::is_uppercase);
    let any_upper = name.chars().any(char::is_uppercase);

    if has_underscore && !any_upper {
        Some("snake_case")
    } else if !has_underscore && first_upper {
        Some("PascalCase")
    } else if !has_underscore && any_upper {
        Some("camelCase")
    } else if !any_upper {
        // single lowercase word reads as snake_case
        Some("snake_case")
    } else {
        None
    }
}

/// Interfaces lens: component names define the public surface. Mixed
/// naming conventions inside one requirement are a smell; an "interface"
/// with no named components is unreviewable.
fn analyze_interfaces(node: &RequirementNode, phase: &str) -> StepAnalysis {
    let mut findings = Vec::new();
    let mut seq = 0usize;

    let components: Vec<&str> = node
        .implementation
        .as_ref()
        .map(|hints| hints.all_components())
        .unwrap_or_default();

    let mentions_interface = corpus(node).contains("interface");

    let extension_points = components
        .iter()
        .filter(|name| {
            let lowered = name.to_lowercase();
            EXTENSION_POINT_SUFFIXES
                .iter()
                .any(|suffix| lowered.ends_with(suffix))
        })
        .count();

    let conventions: BTreeSet<&'static str> = components
        .iter()
        .filter_map(|name| naming_convention(name))
        .collect();

    if mentions_interface && components.is_empty() {
        seq += 1;
        findings.push(Finding::critical(
            &finding_id(ReviewStep::Interfaces, &node.id, seq),
            &node.id,
            "Requirement mentions an interface but names no components",
            "Name the components that make up the interface",
        ));
    } else if conventions.len() > 1 {
        seq += 1;
        let mut f = Finding::warning(
            &finding_id(ReviewStep::Interfaces, &node.id, seq),
            &node.id,
            "Component names mix naming conventions",
            &format!(
                "Found {} conventions in one requirement: {}",
                conventions.len(),
                conventions.iter().copied().collect::<Vec<_>>().join(", ")
            ),
        );
        f.naming_convention = Some("mixed".to_string());
        findings.push(f);
    } else if !components.is_empty() {
        seq += 1;
        let convention = conventions.iter().next().copied().unwrap_or("unknown");
        let mut f = Finding::well_defined(
            &finding_id(ReviewStep::Interfaces, &node.id, seq),
            &node.id,
            &format!(
                "{} public components named with a consistent convention",
                components.len()
            ),
        );
        f.naming_convention = Some(convention.to_string());
        findings.push(f);
    }

    StepAnalysis::new(ReviewStep::Interfaces, &node.id, findings)
        .with_metric("phase", serde_json::json!(phase))
        .with_metric("public_methods", serde_json::json!(components.len()))
        .with_metric("extension_points", serde_json::json!(extension_points))
}

// --- Promises ---

const CONCURRENCY_TOKENS: [&str; 4] = ["concurrent", "concurrency", "parallel", "multi-threaded"];
const SYNC_PRIMITIVE_TOKENS: [&str; 5] = ["mutex", "lock", "semaphore", "atomic", "channel"];
const CANCELLATION_TOKENS: [&str; 2] = ["cancel", "context"];

/// Promises lens: async work needs a timeout and a cancellation path;
/// declared concurrency needs a synchronization primitive.
fn analyze_promises(node: &RequirementNode, phase: &str) -> StepAnalysis {
    let text = corpus(node);
    let mut findings = Vec::new();
    let mut seq = 0usize;

    let has_async = text.contains("async");
    let has_timeout = text.contains("timeout");
    let has_cancellation = mentions_any(&text, &CANCELLATION_TOKENS);
    let has_idempotent = text.contains("idempotent");
    let declares_concurrency = mentions_any(&text, &CONCURRENCY_TOKENS);
    let has_sync_primitive = mentions_any(&text, &SYNC_PRIMITIVE_TOKENS);

    if declares_concurrency && !has_sync_primitive {
        seq += 1;
        let mut f = Finding::critical(
            &finding_id(ReviewStep::Promises, &node.id, seq),
            &node.id,
            "Requirement declares concurrency but names no synchronization primitive",
            "Specify the synchronization mechanism (mutex, channel, atomic, ...)",
        );
        f.promise_type = Some("concurrency".to_string());
        findings.push(f);
    }

    if has_async {
        seq += 1;
        if has_timeout && has_cancellation {
            let mut f = Finding::well_defined(
                &finding_id(ReviewStep::Promises, &node.id, seq),
                &node.id,
                "Async behavior is paired with both timeout and cancellation",
            );
            f.promise_type = Some("async".to_string());
            f.has_timeout = Some(true);
            f.has_cancellation = Some(true);
            findings.push(f);
        } else {
            let missing = match (has_timeout, has_cancellation) {
                (false, false) => "timeout and cancellation are",
                (false, true) => "timeout is",
                (true, false) => "cancellation is",
                (true, true) => unreachable!("covered by the well-defined arm"),
            };
            let mut f = Finding::warning(
                &finding_id(ReviewStep::Promises, &node.id, seq),
                &node.id,
                "Async behavior is declared without full lifecycle control",
                &format!("Async work is promised but {} not specified", missing),
            );
            f.promise_type = Some("async".to_string());
            f.has_timeout = Some(has_timeout);
            f.has_cancellation = Some(has_cancellation);
            findings.push(f);
        }
    }

    if has_idempotent {
        seq += 1;
        let mut f = Finding::well_defined(
            &finding_id(ReviewStep::Promises, &node.id, seq),
            &node.id,
            "Idempotence is promised explicitly",
        );
        f.promise_type = Some("idempotent".to_string());
        findings.push(f);
    }

    StepAnalysis::new(ReviewStep::Promises, &node.id, findings)
        .with_metric("phase", serde_json::json!(phase))
        .with_metric("declares_concurrency", serde_json::json!(declares_concurrency))
        .with_metric("has_sync_primitive", serde_json::json!(has_sync_primitive))
}

// --- Data models ---

const COLLECTION_SUFFIXES: [&str; 3] = ["List", "Map", "Set"];
const RELATIONSHIP_PHRASES: [&str; 5] = ["one-to-many", "many-to-many", "n:m", "required", "optional"];

/// Data-models lens: shared components are the field inventory; data
/// mentioned without fields is unimplementable, fields without validation
/// are a trap.
fn analyze_data_models(node: &RequirementNode, phase: &str) -> StepAnalysis {
    let text = corpus(node);
    let mut findings = Vec::new();
    let mut seq = 0usize;

    let shared: Vec<&String> = node
        .implementation
        .as_ref()
        .map(|hints| hints.shared.iter().collect())
        .unwrap_or_default();

    let collections = shared
        .iter()
        .filter(|name| COLLECTION_SUFFIXES.iter().any(|s| name.ends_with(s)))
        .count();

    let relationship = RELATIONSHIP_PHRASES
        .iter()
        .find(|phrase| text.contains(*phrase))
        .copied();

    let mentions_data = text.contains("data") || text.contains("model") || text.contains("entity");
    let has_validation = text.contains("validat");

    if mentions_data && shared.is_empty() {
        seq += 1;
        let mut f = Finding::critical(
            &finding_id(ReviewStep::DataModels, &node.id, seq),
            &node.id,
            "Data is mentioned but no shared fields or components are named",
            "List the fields of the data model in the shared components",
        );
        f.relationship_type = relationship.map(str::to_string);
        findings.push(f);
    } else if !shared.is_empty() {
        seq += 1;
        if has_validation {
            let mut f = Finding::well_defined(
                &finding_id(ReviewStep::DataModels, &node.id, seq),
                &node.id,
                &format!("{} data components named with validation specified", shared.len()),
            );
            f.has_validation = Some(true);
            f.relationship_type = relationship.map(str::to_string);
            findings.push(f);
        } else {
            let mut f = Finding::warning(
                &finding_id(ReviewStep::DataModels, &node.id, seq),
                &node.id,
                "Data components are named but validation is not specified",
                "No validation rules are stated for the data model",
            );
            f.has_validation = Some(false);
            f.relationship_type = relationship.map(str::to_string);
            findings.push(f);
        }
    }

    StepAnalysis::new(ReviewStep::DataModels, &node.id, findings)
        .with_metric("phase", serde_json::json!(phase))
        .with_metric("collection_components", serde_json::json!(collections))
        .with_metric("relationship", serde_json::json!(relationship))
}

// --- APIs ---

const HTTP_VERBS: [&str; 6] = ["get", "post", "put", "delete", "patch", "head"];

fn endpoint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/api/[A-Za-z0-9_\-/{}.]+").expect("valid regex"))
}

fn url_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/v\d+/").expect("valid regex"))
}

fn status_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[1-5]\d{2}\b").expect("valid regex"))
}

/// APIs lens: an endpoint needs a verb, a path, a status code, and a
/// versioning story before it can be built.
fn analyze_apis(node: &RequirementNode, phase: &str) -> StepAnalysis {
    let text = corpus(node);
    let mut findings = Vec::new();
    let mut seq = 0usize;

    let verb = HTTP_VERBS
        .iter()
        .find(|verb| {
            // match as a standalone word to avoid e.g. "widget" matching "get"
            text.split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| word == **verb)
        })
        .copied();

    let endpoint = endpoint_regex().find(&text).map(|m| m.as_str().to_string());
    let has_status = status_code_regex().is_match(&text) || text.contains("status code");

    let versioning = if url_version_regex().is_match(&text) {
        "url"
    } else if text.contains("header") {
        "header"
    } else {
        "none"
    };

    let declares_endpoint = endpoint.is_some() || text.contains("endpoint");

    if declares_endpoint && verb.is_none() {
        seq += 1;
        let mut f = Finding::critical(
            &finding_id(ReviewStep::Apis, &node.id, seq),
            &node.id,
            "An endpoint is declared without an HTTP verb",
            "State the HTTP method for the endpoint",
        );
        f.endpoint = endpoint.clone();
        f.versioning_scheme = Some(versioning.to_string());
        findings.push(f);
    } else if verb.is_some() || endpoint.is_some() {
        let mut missing = Vec::new();
        if verb.is_none() {
            missing.push("verb");
        }
        if endpoint.is_none() {
            missing.push("path");
        }
        if !has_status {
            missing.push("status code");
        }
        if versioning == "none" {
            missing.push("versioning");
        }

        seq += 1;
        if missing.is_empty() {
            let mut f = Finding::well_defined(
                &finding_id(ReviewStep::Apis, &node.id, seq),
                &node.id,
                "Endpoint fully specified: verb, path, status code, and versioning",
            );
            f.http_method = verb.map(str::to_uppercase);
            f.endpoint = endpoint.clone();
            f.versioning_scheme = Some(versioning.to_string());
            findings.push(f);
        } else {
            let mut f = Finding::warning(
                &finding_id(ReviewStep::Apis, &node.id, seq),
                &node.id,
                "Endpoint specification is incomplete",
                &format!("Missing: {}", missing.join(", ")),
            );
            f.http_method = verb.map(str::to_uppercase);
            f.endpoint = endpoint.clone();
            f.versioning_scheme = Some(versioning.to_string());
            findings.push(f);
        }
    }

    StepAnalysis::new(ReviewStep::Apis, &node.id, findings)
        .with_metric("phase", serde_json::json!(phase))
        .with_metric("http_method", serde_json::json!(verb))
        .with_metric("endpoint", serde_json::json!(endpoint))
        .with_metric("versioning_scheme", serde_json::json!(versioning))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_convention_detection() {
        assert_eq!(naming_convention("user_service"), Some("snake_case"));
        assert_eq!(naming_convention("UserService"), Some("PascalCase"));
        assert_eq!(naming_convention("userService"), Some("camelCase"));
        assert_eq!(naming_convention("service"), Some("snake_case"));
        assert_eq!(naming_convention(""), None);
    }

    #[test]
    fn analyzers_are_deterministic() {
        let mut node = RequirementNode::new(
            "REQ_001",
            "The async endpoint accepts a payload and returns 200 via GET /api/v1/users",
            crate::requirement::RequirementType::Implementation,
        );
        node.acceptance_criteria =
            vec!["Accepts a user id and returns the user record with timeout and cancel".to_string()];

        for step in ReviewStep::ALL {
            let a = analyze(step, &node, "research");
            let b = analyze(step, &node, "research");
            assert_eq!(a, b, "step {} is not deterministic", step);
        }
    }
}
