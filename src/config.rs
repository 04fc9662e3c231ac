use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::{parse_autonomy_mode, AutonomyMode};

// --- Agent CLI tool ---

#[derive(Default, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CliTool {
    #[default]
    Claude,
    OpenCode,
}

impl CliTool {
    pub fn binary_name(&self) -> &str {
        match self {
            CliTool::Claude => "claude",
            CliTool::OpenCode => "opencode",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            CliTool::Claude => "Claude CLI",
            CliTool::OpenCode => "OpenCode CLI",
        }
    }

    /// Arguments that run the tool non-interactively with the given prompt.
    pub fn build_args(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        match self {
            CliTool::Claude => {
                let mut args = vec!["--dangerously-skip-permissions".to_string()];
                if let Some(m) = model {
                    args.push("--model".to_string());
                    args.push(m.to_string());
                }
                args.push("-p".to_string());
                args.push(prompt.to_string());
                args
            }
            CliTool::OpenCode => {
                let mut args = vec!["run".to_string()];
                if let Some(m) = model {
                    args.push("--model".to_string());
                    args.push(m.to_string());
                }
                args.push("--quiet".to_string());
                args.push(prompt.to_string());
                args
            }
        }
    }

    pub fn version_args(&self) -> Vec<&str> {
        vec!["--version"]
    }

    pub fn install_hint(&self) -> &str {
        match self {
            CliTool::Claude => "Install: https://docs.anthropic.com/en/docs/claude-code",
            CliTool::OpenCode => "Install: https://github.com/opencode-ai/opencode",
        }
    }
}

// --- Config tables ---

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root the orchestrator and all subprocesses operate in.
    pub path: String,
    /// External ticket reference threaded into prompts. Optional.
    pub ticket_id: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: ".".to_string(),
            ticket_id: String::new(),
        }
    }
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub cli: CliTool,
    pub model: Option<String>,
}

/// External tool binary names. Overridable so tests can point at stubs.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub beads_bin: String,
    pub pytest_bin: String,
    pub make_bin: String,
    pub oracle_bin: String,
    /// Binary used for the best-effort context-clear hook.
    pub clear_context_bin: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            beads_bin: "bd".to_string(),
            pytest_bin: "pytest".to_string(),
            make_bin: "make".to_string(),
            oracle_bin: "silmari-oracle".to_string(),
            clear_context_bin: "claude".to_string(),
        }
    }
}

/// Autonomy selection. `auto_approve` is the deprecated predecessor of
/// `mode` and is only consulted when `mode` is absent.
#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AutonomyConfig {
    pub mode: Option<String>,
    pub auto_approve: Option<bool>,
}

/// Iteration ceilings, timeouts, and recursion limits.
///
/// Zero values are normalized to the defaults below so a partially
/// filled config never disables a bound.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Budgets {
    pub max_recursion_depth: usize,
    pub review_max_iterations: u32,
    pub impl_max_iterations: u32,
    pub max_retries: u32,
    pub review_timeout_secs: u64,
    pub impl_loop_sleep_secs: u64,
    pub impl_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub planning_timeout_secs: u64,
    pub annotate_timeout_secs: u64,
}

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 10;
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 600;
pub const IMPL_LOOP_SLEEP_SECS: u64 = 10;
pub const IMPL_TIMEOUT_SECS: u64 = 3600;
pub const TEST_TIMEOUT_SECS: u64 = 300;
pub const PLANNING_TIMEOUT_SECS: u64 = 1200;
pub const ANNOTATE_TIMEOUT_SECS: u64 = 120;

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            review_max_iterations: DEFAULT_MAX_ITERATIONS,
            impl_max_iterations: DEFAULT_MAX_ITERATIONS,
            max_retries: DEFAULT_MAX_RETRIES,
            review_timeout_secs: DEFAULT_REVIEW_TIMEOUT_SECS,
            impl_loop_sleep_secs: IMPL_LOOP_SLEEP_SECS,
            impl_timeout_secs: IMPL_TIMEOUT_SECS,
            test_timeout_secs: TEST_TIMEOUT_SECS,
            planning_timeout_secs: PLANNING_TIMEOUT_SECS,
            annotate_timeout_secs: ANNOTATE_TIMEOUT_SECS,
        }
    }
}

impl Budgets {
    /// Replace zero ceilings with their defaults.
    ///
    /// A zero `max_iterations` from config or CLI means "use the default",
    /// never "run zero iterations". Sleep is allowed to be zero (tests).
    pub fn normalize(&mut self) {
        if self.max_recursion_depth == 0 {
            self.max_recursion_depth = DEFAULT_MAX_RECURSION_DEPTH;
        }
        if self.review_max_iterations == 0 {
            self.review_max_iterations = DEFAULT_MAX_ITERATIONS;
        }
        if self.impl_max_iterations == 0 {
            self.impl_max_iterations = DEFAULT_MAX_ITERATIONS;
        }
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.impl_timeout_secs == 0 {
            self.impl_timeout_secs = IMPL_TIMEOUT_SECS;
        }
        if self.test_timeout_secs == 0 {
            self.test_timeout_secs = TEST_TIMEOUT_SECS;
        }
        if self.planning_timeout_secs == 0 {
            self.planning_timeout_secs = PLANNING_TIMEOUT_SECS;
        }
        if self.annotate_timeout_secs == 0 {
            self.annotate_timeout_secs = ANNOTATE_TIMEOUT_SECS;
        }
    }
}

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AutoplanConfig {
    pub project: ProjectConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub autonomy: AutonomyConfig,
    pub budgets: Budgets,
}

impl AutoplanConfig {
    pub fn project_path(&self) -> PathBuf {
        PathBuf::from(&self.project.path)
    }

    /// Resolve the effective autonomy mode.
    ///
    /// `autonomy.mode` wins when present. The deprecated `auto_approve`
    /// flag is consulted only when no mode is set: true maps to
    /// fully_autonomous, false to checkpoint.
    pub fn resolve_autonomy_mode(&self) -> Result<AutonomyMode, String> {
        if let Some(ref mode) = self.autonomy.mode {
            return parse_autonomy_mode(mode);
        }
        Ok(match self.autonomy.auto_approve {
            Some(true) => AutonomyMode::FullyAutonomous,
            _ => AutonomyMode::Checkpoint,
        })
    }
}

// --- Loading and validation ---

pub fn normalize_config(config: &mut AutoplanConfig) {
    if let Some(ref model) = config.agent.model {
        let trimmed = model.trim();
        if trimmed.is_empty() {
            config.agent.model = None;
        } else {
            config.agent.model = Some(trimmed.to_string());
        }
    }
    config.budgets.normalize();
}

pub fn validate(config: &AutoplanConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.project.path.trim().is_empty() {
        errors.push("project.path must not be empty".to_string());
    }

    if let Some(ref mode) = config.autonomy.mode {
        if let Err(e) = parse_autonomy_mode(mode) {
            errors.push(format!("autonomy.mode: {}", e));
        }
    }

    if let Some(ref model) = config.agent.model {
        let is_valid = !model.is_empty()
            && model
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'));
        if !is_valid {
            errors.push(
                "agent.model contains invalid characters (allowed: alphanumeric, '.', '_', '/', '-')"
                    .to_string(),
            );
        } else if model.starts_with('-') {
            errors.push(
                "agent.model must not start with '-' (flag-like values are rejected)".to_string(),
            );
        }
    }

    for (label, bin) in [
        ("tools.beads_bin", &config.tools.beads_bin),
        ("tools.pytest_bin", &config.tools.pytest_bin),
        ("tools.make_bin", &config.tools.make_bin),
        ("tools.oracle_bin", &config.tools.oracle_bin),
        ("tools.clear_context_bin", &config.tools.clear_context_bin),
    ] {
        if bin.trim().is_empty() {
            errors.push(format!("{} must not be empty", label));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load config from an explicit path (if provided) or fall back to
/// `{project_root}/autoplan.toml`.
///
/// When `config_path` is `Some`, the file MUST exist. When `None` and no
/// `autoplan.toml` is present, defaults are returned.
pub fn load_config_from(
    config_path: Option<&Path>,
    project_root: &Path,
) -> Result<AutoplanConfig, String> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(format!("Config file not found: {}", path.display()));
            }
            load_config_at(path)
        }
        None => load_config(project_root),
    }
}

pub fn load_config(project_root: &Path) -> Result<AutoplanConfig, String> {
    let config_path = project_root.join("autoplan.toml");

    if !config_path.exists() {
        let mut config = AutoplanConfig::default();
        normalize_config(&mut config);
        return Ok(config);
    }

    load_config_at(&config_path)
}

fn load_config_at(path: &Path) -> Result<AutoplanConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let mut config: AutoplanConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

    normalize_config(&mut config);

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}
