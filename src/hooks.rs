use std::path::Path;
use std::process::Command;

use crate::log_debug;

/// Record a memory episode with the oracle sidecar, if installed.
///
/// Best-effort: any failure (missing binary, nonzero exit) is logged at
/// debug and swallowed. The pipeline never fails on a hook.
pub fn record_memory_episode(oracle_bin: &str, project_path: &Path) {
    run_best_effort(oracle_bin, &["memory", "episode"], project_path);
}

/// Ask the oracle sidecar to compile accumulated memory, if installed.
pub fn compile_memory(oracle_bin: &str, project_path: &Path) {
    run_best_effort(oracle_bin, &["memory", "compile"], project_path);
}

/// Clear the agent's conversational context between phases.
pub fn clear_agent_context(claude_bin: &str, project_path: &Path) {
    run_best_effort(claude_bin, &["--print", "-p", "/clear"], project_path);
}

fn run_best_effort(program: &str, args: &[&str], cwd: &Path) {
    match Command::new(program).args(args).current_dir(cwd).output() {
        Ok(output) if output.status.success() => {
            log_debug!("[hooks] {} {} ok", program, args.join(" "));
        }
        Ok(output) => {
            log_debug!(
                "[hooks] {} {} exited with {:?} (ignored)",
                program,
                args.join(" "),
                output.status.code()
            );
        }
        Err(e) => {
            log_debug!("[hooks] {} unavailable: {} (ignored)", program, e);
        }
    }
}
