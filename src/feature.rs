use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

pub fn parse_complexity(s: &str) -> Result<Complexity, String> {
    match s.to_lowercase().as_str() {
        "low" | "l" => Ok(Complexity::Low),
        "medium" | "m" => Ok(Complexity::Medium),
        "high" | "h" => Ok(Complexity::High),
        _ => Err(format!(
            "Invalid complexity '{}': expected low, medium, or high",
            s
        )),
    }
}

/// One planned feature, as the decomposition phase emits them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct FeatureList {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureList {
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to parse feature list: {}", e))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize feature list: {}", e))
    }
}

/// Validate the whole feature list.
///
/// Rules:
/// - id and name non-blank, ids unique
/// - blocked requires a reason and a non-empty blocked_by
/// - a feature cannot both pass and be blocked
/// - no self-dependency
/// - every id referenced in blocked_by/dependencies exists in the list
pub fn validate(list: &FeatureList) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut all_ids = HashSet::new();

    for feature in &list.features {
        if feature.id.trim().is_empty() {
            errors.push("feature id must not be blank".to_string());
        }
        if feature.name.trim().is_empty() {
            errors.push(format!("feature {}: name must not be blank", feature.id));
        }
        if !feature.id.trim().is_empty() && !all_ids.insert(feature.id.clone()) {
            errors.push(format!("duplicate feature id '{}'", feature.id));
        }
    }

    for feature in &list.features {
        if feature.blocked {
            if feature
                .blocked_reason
                .as_deref()
                .is_none_or(|r| r.trim().is_empty())
            {
                errors.push(format!(
                    "feature {}: blocked without a blocked_reason",
                    feature.id
                ));
            }
            if feature.blocked_by.is_empty() {
                errors.push(format!(
                    "feature {}: blocked without any blocked_by ids",
                    feature.id
                ));
            }
        }

        if feature.passes && feature.blocked {
            errors.push(format!(
                "feature {}: cannot both pass and be blocked",
                feature.id
            ));
        }

        for dep in feature.blocked_by.iter().chain(feature.dependencies.iter()) {
            if *dep == feature.id {
                errors.push(format!("feature {}: depends on itself", feature.id));
            } else if !all_ids.contains(dep) {
                errors.push(format!(
                    "feature {}: references unknown feature '{}'",
                    feature.id, dep
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
