use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    Parent,
    SubProcess,
    #[default]
    Implementation,
}

impl std::fmt::Display for RequirementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequirementType::Parent => write!(f, "parent"),
            RequirementType::SubProcess => write!(f, "sub_process"),
            RequirementType::Implementation => write!(f, "implementation"),
        }
    }
}

pub fn parse_requirement_type(s: &str) -> Result<RequirementType, String> {
    match s.to_lowercase().as_str() {
        "parent" => Ok(RequirementType::Parent),
        "sub_process" | "sub-process" | "subprocess" => Ok(RequirementType::SubProcess),
        "implementation" => Ok(RequirementType::Implementation),
        _ => Err(format!(
            "Invalid requirement type '{}': expected parent, sub_process, or implementation",
            s
        )),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    Functional,
    NonFunctional,
    Security,
    Performance,
    Usability,
    Integration,
}

pub fn parse_requirement_category(s: &str) -> Result<RequirementCategory, String> {
    match s.to_lowercase().as_str() {
        "functional" => Ok(RequirementCategory::Functional),
        "non_functional" | "non-functional" => Ok(RequirementCategory::NonFunctional),
        "security" => Ok(RequirementCategory::Security),
        "performance" => Ok(RequirementCategory::Performance),
        "usability" => Ok(RequirementCategory::Usability),
        "integration" => Ok(RequirementCategory::Integration),
        _ => Err(format!(
            "Invalid requirement category '{}': expected functional, non_functional, security, performance, usability, or integration",
            s
        )),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Invariant,
    Idempotence,
    Boundary,
    RoundTrip,
    Error,
    #[default]
    Other,
}

// --- Structs ---

/// A criterion paired with the kind of test that would verify it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct TestableProperty {
    pub criterion: String,
    #[serde(default)]
    pub property_type: PropertyType,
}

/// Component names a requirement maps onto, by layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ImplementationHints {
    #[serde(default)]
    pub frontend: Vec<String>,
    #[serde(default)]
    pub backend: Vec<String>,
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub shared: Vec<String>,
}

impl ImplementationHints {
    /// All component names across layers, in layer order.
    pub fn all_components(&self) -> Vec<&str> {
        self.frontend
            .iter()
            .chain(self.backend.iter())
            .chain(self.middleware.iter())
            .chain(self.shared.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frontend.is_empty()
            && self.backend.is_empty()
            && self.middleware.is_empty()
            && self.shared.is_empty()
    }
}

/// One node of the requirement tree.
///
/// A hierarchy is a tree, not a DAG: each child is owned by its parent's
/// `children` sequence, and `parent_id` is a back-reference for lookup
/// only. Built once per review pass and immutable during it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct RequirementNode {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub requirement_type: RequirementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<RequirementCategory>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub testable_properties: Vec<TestableProperty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
    #[serde(default)]
    pub related_concepts: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<ImplementationHints>,
    #[serde(default)]
    pub children: Vec<RequirementNode>,
}

impl RequirementNode {
    pub fn new(id: &str, description: &str, requirement_type: RequirementType) -> Self {
        RequirementNode {
            id: id.to_string(),
            description: description.to_string(),
            requirement_type,
            ..Default::default()
        }
    }

    /// Total node count including this node.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(RequirementNode::count).sum::<usize>()
    }

    /// Depth-first lookup by id.
    pub fn find(&self, id: &str) -> Option<&RequirementNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

// --- Validation ---

/// Validate one node's own fields (children are not descended into).
pub fn validate_node(node: &RequirementNode) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if node.id.trim().is_empty() {
        errors.push("requirement id must not be blank".to_string());
    }

    if node.description.trim().is_empty() {
        errors.push(format!("requirement {}: description must not be blank", node.id));
    }

    for (i, criterion) in node.acceptance_criteria.iter().enumerate() {
        if criterion.trim().is_empty() {
            errors.push(format!(
                "requirement {}: acceptance_criteria[{}] is blank",
                node.id, i
            ));
        }
    }

    for (i, prop) in node.testable_properties.iter().enumerate() {
        if prop.criterion.trim().is_empty() {
            errors.push(format!(
                "requirement {}: testable_properties[{}].criterion is blank",
                node.id, i
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a whole hierarchy: every node individually, ids unique across
/// the tree, and each child's `parent_id` matching its containing node.
pub fn validate_hierarchy(root: &RequirementNode) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut seen_ids = HashSet::new();

    fn walk(
        node: &RequirementNode,
        parent_id: Option<&str>,
        seen_ids: &mut HashSet<String>,
        errors: &mut Vec<String>,
    ) {
        if let Err(mut node_errors) = validate_node(node) {
            errors.append(&mut node_errors);
        }

        if !seen_ids.insert(node.id.clone()) {
            errors.push(format!("duplicate requirement id '{}'", node.id));
        }

        if let Some(expected) = parent_id {
            match node.parent_id.as_deref() {
                Some(actual) if actual == expected => {}
                Some(actual) => errors.push(format!(
                    "requirement {}: parent_id '{}' does not match containing node '{}'",
                    node.id, actual, expected
                )),
                None => errors.push(format!(
                    "requirement {}: nested node is missing parent_id '{}'",
                    node.id, expected
                )),
            }
        }

        for child in &node.children {
            walk(child, Some(&node.id), seen_ids, errors);
        }
    }

    walk(root, None, &mut seen_ids, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// --- Id generation ---

/// Next top-level id: `REQ_###` where `###` is one past the highest
/// existing suffix, zero-padded to three digits. `REQ_000` when no ids
/// exist yet.
pub fn next_top_level_id(existing: &[String]) -> String {
    let max = existing
        .iter()
        .filter_map(|id| id.strip_prefix("REQ_"))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max();

    match max {
        Some(n) => format!("REQ_{:03}", n + 1),
        None => "REQ_000".to_string(),
    }
}

/// Next child id under `parent`: `<parent_id>.<n>` where `n` is one past
/// the highest existing `.N` suffix among its children (starting at 1).
pub fn next_child_id(parent: &RequirementNode) -> String {
    let prefix = format!("{}.", parent.id);

    let max = parent
        .children
        .iter()
        .filter_map(|child| child.id.strip_prefix(&prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);

    format!("{}.{}", parent.id, max + 1)
}

// --- Serialization ---

pub fn to_json(root: &RequirementNode) -> Result<String, String> {
    serde_json::to_string_pretty(root)
        .map_err(|e| format!("Failed to serialize requirement hierarchy: {}", e))
}

pub fn from_json(json: &str) -> Result<RequirementNode, String> {
    serde_json::from_str(json).map_err(|e| format!("Failed to parse requirement hierarchy: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_top_level_id_starts_at_zero() {
        assert_eq!(next_top_level_id(&[]), "REQ_000");
    }

    #[test]
    fn next_top_level_id_is_max_plus_one() {
        let ids = vec![
            "REQ_000".to_string(),
            "REQ_007".to_string(),
            "REQ_003".to_string(),
        ];
        assert_eq!(next_top_level_id(&ids), "REQ_008");
    }

    #[test]
    fn next_top_level_id_ignores_foreign_ids() {
        let ids = vec!["FEAT-100".to_string(), "REQ_abc".to_string()];
        assert_eq!(next_top_level_id(&ids), "REQ_000");
    }

    #[test]
    fn next_child_id_counts_existing_suffixes() {
        let mut parent = RequirementNode::new("REQ_001", "parent", RequirementType::Parent);
        assert_eq!(next_child_id(&parent), "REQ_001.1");

        let mut child = RequirementNode::new("REQ_001.3", "child", RequirementType::SubProcess);
        child.parent_id = Some("REQ_001".to_string());
        parent.children.push(child);
        assert_eq!(next_child_id(&parent), "REQ_001.4");
    }
}
