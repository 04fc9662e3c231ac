use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use autoplan::agent::{install_signal_handlers, kill_all_children, CliAgentRunner};
use autoplan::beads::BeadsCli;
use autoplan::checkpoint::{plan_slug, CheckpointStore};
use autoplan::config;
use autoplan::lock;
use autoplan::log::parse_log_level;
use autoplan::pipeline::{HaltReason, Orchestrator, StdinPrompt};
use autoplan::prompt::TEMPLATE_DIR;
use autoplan::requirement;
use autoplan::review::{ReviewCheckpointing, ReviewEngine};
use autoplan::test_runner::CommandTestRunner;
use autoplan::types::{parse_autonomy_mode, AutonomyMode};
use autoplan::{log_error, log_info};

/// Runtime directory (lock and PID files) under the project root.
const RUNTIME_DIR: &str = ".autoplan";

#[derive(Parser)]
#[command(name = "autoplan", about = "Autonomous planning-and-implementation orchestrator")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Path to config file (defaults to {project}/autoplan.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a research question
    Run {
        /// The research question driving the pipeline
        question: String,
        /// Additional free-form context for the research phase
        #[arg(long)]
        context: Option<String>,
        /// Autonomy mode (checkpoint, batch, fully_autonomous)
        #[arg(long)]
        mode: Option<String>,
        /// Implementation-loop iteration ceiling (0 uses the configured default)
        #[arg(long, default_value = "0")]
        max_iterations: u32,
        /// Echo agent output lines as they arrive
        #[arg(long)]
        stream: bool,
    },
    /// Resume the pipeline from a checkpoint
    Resume {
        /// Checkpoint file to resume from (defaults to the newest)
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Autonomy mode override (checkpoint, batch, fully_autonomous)
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        stream: bool,
    },
    /// Review a requirement hierarchy; exit code reports the verdict
    Review {
        /// Requirement hierarchy JSON file
        hierarchy: PathBuf,
        /// Plan document the hierarchy was derived from (enables
        /// review checkpointing and hash validation)
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Inspect or clean checkpoint files
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Show tracked-issue and checkpoint state for the project
    Status,
    /// Scaffold the runtime directory, template stubs, and config
    Init,
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List pipeline checkpoints, newest last
    List,
    /// Delete checkpoints
    Clean {
        /// Delete checkpoints at least this many days old
        #[arg(long, conflicts_with = "all")]
        older_than: Option<i64>,
        /// Delete every checkpoint
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => autoplan::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = install_signal_handlers() {
        log_error!("Error: {}", e);
        std::process::exit(1);
    }

    let mut config = match config::load_config_from(cli.config.as_deref(), &cli.project) {
        Ok(config) => config,
        Err(e) => {
            log_error!("Error: {}", e);
            std::process::exit(1);
        }
    };
    config.project.path = cli.project.to_string_lossy().to_string();

    let exit_code = match cli.command {
        Commands::Run {
            question,
            context,
            mode,
            max_iterations,
            stream,
        } => run_pipeline(&config, &question, context.as_deref(), mode, max_iterations, stream, None).await,
        Commands::Resume {
            checkpoint,
            mode,
            stream,
        } => run_pipeline(&config, "", None, mode, 0, stream, Some(checkpoint)).await,
        Commands::Review { hierarchy, plan } => run_review(&config, &hierarchy, plan.as_deref()),
        Commands::Checkpoints { command } => run_checkpoints(&config, command),
        Commands::Status => run_status(&config),
        Commands::Init => run_init(&config),
    };

    kill_all_children();
    std::process::exit(exit_code);
}

fn resolve_mode(config: &config::AutoplanConfig, cli_mode: Option<String>) -> Result<AutonomyMode, String> {
    match cli_mode {
        Some(mode) => parse_autonomy_mode(&mode),
        None => config.resolve_autonomy_mode(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    config: &config::AutoplanConfig,
    question: &str,
    context: Option<&str>,
    cli_mode: Option<String>,
    max_iterations: u32,
    stream: bool,
    resume_from: Option<Option<PathBuf>>,
) -> i32 {
    let mode = match resolve_mode(config, cli_mode) {
        Ok(mode) => mode,
        Err(e) => {
            log_error!("Error: {}", e);
            return 1;
        }
    };

    let project_path = config.project_path();
    let _lock = match lock::try_acquire(&project_path.join(RUNTIME_DIR)) {
        Ok(guard) => guard,
        Err(e) => {
            log_error!("Error: {}", e);
            return 1;
        }
    };

    let agent = CliAgentRunner::from_config(&config.agent);
    if let Err(e) = agent.verify_cli_available() {
        log_error!("Error: {}", e);
        return 1;
    }

    let tracker = BeadsCli::new(&config.tools.beads_bin, &project_path);
    let tests = CommandTestRunner::new(
        &config.tools.pytest_bin,
        &config.tools.make_bin,
        std::time::Duration::from_secs(config.budgets.test_timeout_secs),
    );

    // Fully-autonomous runs never reach a pause point, so the stdin
    // prompt is safe to wire unconditionally.
    let user = StdinPrompt;

    let orchestrator = Orchestrator::new(config, mode, &agent, &tracker, &tests, &user)
        .with_stream(stream)
        .with_max_iterations(max_iterations);

    let run = match resume_from {
        None => orchestrator.run(question, context).await,
        Some(explicit) => {
            let checkpoint_path = match explicit {
                Some(path) => path,
                None => match orchestrator.latest_checkpoint() {
                    Ok(Some(path)) => path,
                    Ok(None) => {
                        log_error!("Error: no checkpoint found to resume from");
                        return 1;
                    }
                    Err(e) => {
                        log_error!("Error: {}", e);
                        return 1;
                    }
                },
            };
            match orchestrator.resume(&checkpoint_path).await {
                Ok(run) => run,
                Err(e) => {
                    log_error!("Error: {}", e);
                    return 1;
                }
            }
        }
    };

    for error in &run.errors {
        log_error!("  - {}", error);
    }
    log_info!(
        "Pipeline: {} phases complete",
        run.completed_phases.len()
    );

    match run.halt_reason {
        HaltReason::Completed => {
            log_info!("Pipeline completed.");
            0
        }
        HaltReason::PausedByUser(phase) => {
            log_info!("Paused after {}. Resume with `autoplan resume`.", phase);
            0
        }
        HaltReason::PhaseFailed(phase) => {
            log_error!("Pipeline failed at {}.", phase);
            1
        }
        HaltReason::ShutdownRequested => {
            log_info!("Shutdown requested; state checkpointed.");
            1
        }
    }
}

fn run_review(config: &config::AutoplanConfig, hierarchy: &Path, plan: Option<&Path>) -> i32 {
    let json = match fs::read_to_string(hierarchy) {
        Ok(json) => json,
        Err(e) => {
            log_error!("Error: failed to read {}: {}", hierarchy.display(), e);
            return 1;
        }
    };

    let root = match requirement::from_json(&json) {
        Ok(root) => root,
        Err(e) => {
            log_error!("Error: {}", e);
            return 1;
        }
    };

    if let Err(errors) = requirement::validate_hierarchy(&root) {
        log_error!("Error: hierarchy is invalid:");
        for error in errors {
            log_error!("  - {}", error);
        }
        return 1;
    }

    let mut engine = ReviewEngine::new(&config.budgets);
    if let Some(plan_path) = plan {
        match autoplan::checkpoint::hash_plan_file(plan_path) {
            Ok(hash) => {
                engine = engine.with_checkpointing(ReviewCheckpointing {
                    store: CheckpointStore::review(&config.project_path()),
                    plan_path: plan_path.to_string_lossy().to_string(),
                    plan_hash: hash,
                    slug: plan_slug(plan_path),
                    autonomy_mode: config.resolve_autonomy_mode().unwrap_or_default(),
                });
            }
            Err(e) => {
                log_error!("Error: {}", e);
                return 1;
            }
        }
    }

    let report = engine.run(&root);

    log_info!(
        "Review: {} well-defined, {} warnings, {} critical ({})",
        report.total_counts.well_defined,
        report.total_counts.warning,
        report.total_counts.critical,
        report.termination_reason
    );

    for phase in &report.phases {
        for step in &phase.steps {
            for rec in &step.recommendations.items {
                let marker = if rec.is_mandatory { "!" } else { "-" };
                log_info!("  {} [{}] {}", marker, rec.severity, rec.message);
            }
        }
    }

    report.exit_code()
}

fn run_checkpoints(config: &config::AutoplanConfig, command: CheckpointCommands) -> i32 {
    let store = CheckpointStore::pipeline(&config.project_path());

    match command {
        CheckpointCommands::List => {
            let paths = match store.list() {
                Ok(paths) => paths,
                Err(e) => {
                    log_error!("Error: {}", e);
                    return 1;
                }
            };
            if paths.is_empty() {
                log_info!("No checkpoints in {}", store.dir().display());
                return 0;
            }
            for path in paths {
                match store.load(&path) {
                    Ok(checkpoint) => log_info!(
                        "{}  {}  phase={}  completed={}",
                        checkpoint.timestamp,
                        checkpoint.id,
                        checkpoint.phase,
                        checkpoint.completed_phases.len()
                    ),
                    Err(_) => log_info!("(corrupt)  {}", path.display()),
                }
            }
            0
        }
        CheckpointCommands::Clean { older_than, all } => {
            let result = if all {
                store.cleanup_all().map(|deleted| (deleted, 0))
            } else if let Some(days) = older_than {
                store.cleanup_older_than(days)
            } else {
                log_error!("Error: pass --older-than <days> or --all");
                return 1;
            };

            match result {
                Ok((deleted, failed)) => {
                    log_info!("Deleted {} checkpoint(s), {} failure(s)", deleted, failed);
                    i32::from(failed > 0)
                }
                Err(e) => {
                    log_error!("Error: {}", e);
                    1
                }
            }
        }
    }
}

fn run_status(config: &config::AutoplanConfig) -> i32 {
    let project_path = config.project_path();

    // Issue store is read-only here: classification only, no tracker calls
    match autoplan::beads::scan_issue_store(&project_path) {
        Ok(records) => {
            let open = records.iter().filter(|(_, r)| r.is_open()).count();
            log_info!(
                "Issues: {} open, {} closed",
                open,
                records.len() - open
            );
            for (id, record) in &records {
                let dep = record
                    .depends_on_id
                    .as_deref()
                    .map(|d| format!("  (depends on {})", d))
                    .unwrap_or_default();
                log_info!("  {}  {}{}", id, record.status, dep);
            }
        }
        Err(e) => {
            log_error!("Error: {}", e);
            return 1;
        }
    }

    let store = CheckpointStore::pipeline(&project_path);
    match store.latest() {
        Ok(Some((path, checkpoint))) => log_info!(
            "Latest checkpoint: {} (phase {}, {} complete) at {}",
            checkpoint.timestamp,
            checkpoint.phase,
            checkpoint.completed_phases.len(),
            path.display()
        ),
        Ok(None) => log_info!("No checkpoints."),
        Err(e) => {
            log_error!("Error: {}", e);
            return 1;
        }
    }

    0
}

fn run_init(config: &config::AutoplanConfig) -> i32 {
    let project_path = config.project_path();

    if !autoplan::git::is_git_repo(&project_path) {
        log_info!(
            "Note: {} is not a git repository; checkpoints will not record commits",
            project_path.display()
        );
    }

    let template_dir = project_path.join(TEMPLATE_DIR);
    if let Err(e) = fs::create_dir_all(&template_dir) {
        log_error!("Error: failed to create {}: {}", template_dir.display(), e);
        return 1;
    }

    let stubs: [(&str, &str); 5] = [
        (
            "research",
            "Research the following question against this codebase and write a \
             research note under thoughts/searchable/shared/research/.\n\n\
             Question: {{research_question}}\n\nContext: {{additional_context}}\n",
        ),
        (
            "decomposition",
            "Read the research note at {{research_path}} and decompose the answer \
             into a plan document under thoughts/searchable/shared/plans/.\n\n\
             Question: {{research_question}}\n",
        ),
        (
            "tdd_planning",
            "Rework the plan at {{plan_path}} into a test-first plan. \
             Requirement hierarchy (if any):\n\n{{hierarchy_json}}\n",
        ),
        (
            "multi_doc",
            "Split the plan at {{plan_path}} into numbered per-phase documents \
             (NN-*.md, 00-overview.md first) next to the plan.\n",
        ),
        (
            "implement",
            "Implement the phases below in order, closing each tracked issue as \
             its phase completes.\n\nPhases:\n{{phase_paths}}\n\nIssues: {{issue_ids}}\n",
        ),
    ];

    for (name, body) in stubs {
        let path = template_dir.join(format!("{}.md", name));
        if path.exists() {
            continue;
        }
        if let Err(e) = fs::write(&path, body) {
            log_error!("Error: failed to write {}: {}", path.display(), e);
            return 1;
        }
        log_info!("Created {}", path.display());
    }

    let config_path = project_path.join("autoplan.toml");
    if !config_path.exists() {
        let default_config = "\
[project]
path = \".\"
ticket_id = \"\"

[agent]
cli = \"claude\"

[autonomy]
mode = \"checkpoint\"

[budgets]
max_recursion_depth = 10
review_max_iterations = 100
impl_max_iterations = 100
max_retries = 3
review_timeout_secs = 600
impl_loop_sleep_secs = 10
impl_timeout_secs = 3600
test_timeout_secs = 300
planning_timeout_secs = 1200
annotate_timeout_secs = 120
";
        if let Err(e) = fs::write(&config_path, default_config) {
            log_error!("Error: failed to write {}: {}", config_path.display(), e);
            return 1;
        }
        log_info!("Created {}", config_path.display());
    }

    if let Err(e) = fs::create_dir_all(project_path.join(RUNTIME_DIR)) {
        log_error!("Error: {}", e);
        return 1;
    }

    log_info!("Initialized autoplan in {}", project_path.display());
    0
}
