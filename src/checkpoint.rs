use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::OrchError;
use crate::log_warn;
use crate::types::Checkpoint;

/// Review checkpoints kept after rotation. Pipeline checkpoints are
/// never rotated.
pub const REVIEW_CHECKPOINTS_KEPT: usize = 5;

/// Directory for pipeline checkpoints, under the project root.
pub const PIPELINE_CHECKPOINT_DIR: &str = ".rlm-act-checkpoints";

/// Directory for review checkpoints, under the project root.
pub const REVIEW_CHECKPOINT_DIR: &str = ".context-engine/checkpoints";

const REVIEW_PREFIX: &str = "review-";

/// SHA-256 hex digest of the plan file's contents.
pub fn hash_plan_file(plan_path: &Path) -> Result<String, String> {
    let contents = fs::read(plan_path)
        .map_err(|e| format!("Failed to read plan {}: {}", plan_path.display(), e))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute the plan hash and compare to the checkpoint's stored hash.
///
/// A mismatch is a hard failure: the plan the checkpoint describes is not
/// the plan on disk, so resuming would act on stale state.
pub fn validate_plan(checkpoint: &Checkpoint) -> Result<(), String> {
    let current = hash_plan_file(Path::new(&checkpoint.plan_path))?;
    if current != checkpoint.plan_hash {
        return Err(OrchError::PlanHashMismatch {
            message: format!(
                "{} was {} at checkpoint time, is {} now; refusing to resume",
                checkpoint.plan_path, checkpoint.plan_hash, current
            ),
        }
        .into());
    }
    Ok(())
}

/// One checkpoint directory. Pipeline and review stores are the same
/// mechanism pointed at different directories; review files carry the
/// `review-` prefix and participate in rotation.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn pipeline(project_path: &Path) -> Self {
        Self::new(&project_path.join(PIPELINE_CHECKPOINT_DIR))
    }

    pub fn review(project_path: &Path) -> Self {
        Self::new(&project_path.join(REVIEW_CHECKPOINT_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a pipeline checkpoint as `<id>.json`. No rotation.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf, String> {
        let path = self.dir.join(format!("{}.json", checkpoint.id));
        self.write_atomic(&path, checkpoint)?;
        Ok(path)
    }

    /// Write a review checkpoint as `review-<slug>-<YYYYMMDD>-<HHMMSS>.json`,
    /// then rotate old review checkpoints down to the keep limit.
    ///
    /// Rotation runs only after the rename succeeds, so a failed write can
    /// never delete good history.
    pub fn save_review(&self, checkpoint: &Checkpoint, slug: &str) -> Result<PathBuf, String> {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = self
            .dir
            .join(format!("{}{}-{}.json", REVIEW_PREFIX, slug, stamp));
        self.write_atomic(&path, checkpoint)?;
        self.rotate_review()?;
        Ok(path)
    }

    fn write_atomic(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), String> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| format!("Failed to create {}: {}", self.dir.display(), e))?;

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| format!("Failed to serialize checkpoint: {}", e))?;

        let temp_file = NamedTempFile::new_in(&self.dir)
            .map_err(|e| format!("Failed to create temp file in {}: {}", self.dir.display(), e))?;

        fs::write(temp_file.path(), &json)
            .map_err(|e| format!("Failed to write temp file: {}", e))?;

        // sync to disk before rename
        let file = fs::File::open(temp_file.path())
            .map_err(|e| format!("Failed to open temp file for sync: {}", e))?;
        file.sync_all()
            .map_err(|e| format!("Failed to sync temp file: {}", e))?;

        temp_file
            .persist(path)
            .map_err(|e| format!("Failed to rename temp file to {}: {}", path.display(), e))?;

        Ok(())
    }

    /// Load and structurally validate one checkpoint file.
    pub fn load(&self, path: &Path) -> Result<Checkpoint, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse checkpoint {}: {}", path.display(), e))?;

        for (field, value) in [
            ("id", &checkpoint.id),
            ("phase", &checkpoint.phase),
            ("timestamp", &checkpoint.timestamp),
        ] {
            if value.trim().is_empty() {
                return Err(format!(
                    "Checkpoint {} is missing required field '{}'",
                    path.display(),
                    field
                ));
            }
        }

        Ok(checkpoint)
    }

    /// All checkpoint JSON files in the store, sorted by file name.
    pub fn list(&self) -> Result<Vec<PathBuf>, String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(format!("Failed to read {}: {}", self.dir.display(), e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// The checkpoint with the lexicographically greatest `timestamp`.
    ///
    /// RFC3339 UTC timestamps sort correctly as strings. Corrupt files
    /// are skipped during enumeration.
    pub fn latest(&self) -> Result<Option<(PathBuf, Checkpoint)>, String> {
        let mut best: Option<(PathBuf, Checkpoint)> = None;

        for path in self.list()? {
            let checkpoint = match self.load(&path) {
                Ok(c) => c,
                Err(e) => {
                    log_warn!("Skipping unreadable checkpoint: {}", e);
                    continue;
                }
            };

            let newer = match &best {
                Some((_, current)) => checkpoint.timestamp > current.timestamp,
                None => true,
            };
            if newer {
                best = Some((path, checkpoint));
            }
        }

        Ok(best)
    }

    /// Delete checkpoints whose age in whole days is at or beyond the
    /// threshold. Negative thresholds clamp to zero (delete everything
    /// with a parseable timestamp). Missing or unparseable timestamps are
    /// skipped, not errors.
    ///
    /// Returns `(deleted_count, failed_count)`.
    pub fn cleanup_older_than(&self, days: i64) -> Result<(usize, usize), String> {
        let threshold = days.max(0);
        let now = chrono::Utc::now();
        let mut deleted = 0usize;
        let mut failed = 0usize;

        for path in self.list()? {
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };

            let timestamp = serde_json::from_str::<serde_json::Value>(&contents)
                .ok()
                .and_then(|v| v.get("timestamp").and_then(|t| t.as_str().map(str::to_string)));

            let Some(timestamp) = timestamp else {
                continue; // no timestamp recorded, leave the file alone
            };

            let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(&timestamp) else {
                continue; // unparseable, leave the file alone
            };

            let age_days = (now - parsed.with_timezone(&chrono::Utc)).num_days();
            if age_days >= threshold {
                match fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(_) => failed += 1,
                }
            }
        }

        Ok((deleted, failed))
    }

    /// Delete every checkpoint JSON file, leaving the directory intact.
    pub fn cleanup_all(&self) -> Result<usize, String> {
        let mut deleted = 0usize;
        for path in self.list()? {
            fs::remove_file(&path)
                .map_err(|e| format!("Failed to delete {}: {}", path.display(), e))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Delete review checkpoints beyond the newest `REVIEW_CHECKPOINTS_KEPT`,
    /// by modification time descending.
    fn rotate_review(&self) -> Result<(), String> {
        let mut review_files: Vec<(PathBuf, std::time::SystemTime)> = self
            .list()?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(REVIEW_PREFIX))
            })
            .filter_map(|path| {
                let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, mtime))
            })
            .collect();

        review_files.sort_by(|a, b| b.1.cmp(&a.1));

        for (path, _) in review_files.iter().skip(REVIEW_CHECKPOINTS_KEPT) {
            if let Err(e) = fs::remove_file(path) {
                log_warn!("Failed to rotate checkpoint {}: {}", path.display(), e);
            }
        }

        Ok(())
    }
}

/// Derive a filename slug from a plan path (stem, lowercased,
/// non-alphanumerics collapsed to dashes).
pub fn plan_slug(plan_path: &Path) -> String {
    let stem = plan_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "plan".to_string());

    let slug: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<&str>>()
        .join("-");

    if slug.is_empty() {
        "plan".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_slug_collapses_punctuation() {
        assert_eq!(
            plan_slug(Path::new("plans/2026-01-05-API Rework!.md")),
            "2026-01-05-api-rework"
        );
        assert_eq!(plan_slug(Path::new("x/___.md")), "plan");
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let dir = tempfile::TempDir::new().unwrap();
        let plan = dir.path().join("plan.md");
        fs::write(&plan, "one").unwrap();
        let h1 = hash_plan_file(&plan).unwrap();
        let h2 = hash_plan_file(&plan).unwrap();
        assert_eq!(h1, h2);

        fs::write(&plan, "two").unwrap();
        let h3 = hash_plan_file(&plan).unwrap();
        assert_ne!(h1, h3);
    }
}
