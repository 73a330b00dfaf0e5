use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessOutput, ProcessRequest, ProcessRunner};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub detached: bool,
    pub bare: bool,
    /// git flagged the entry as prunable (its directory is gone).
    pub prunable: bool,
}

pub struct WorktreeClient<'a> {
    runner: &'a dyn ProcessRunner,
    cwd: PathBuf,
}

impl<'a> WorktreeClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, cwd: impl AsRef<Path>) -> Self {
        Self {
            runner,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    /// Registered worktrees in git's order; the first entry is the primary one.
    pub fn list(&self) -> Result<Vec<WorktreeEntry>, DuxError> {
        let out = self.run(["list", "--porcelain"])?;
        if out.exit_code != 0 {
            return Err(self.failed("list", &out, json!({})));
        }
        let entries = parse_porcelain(&out.stdout);
        append_run_log(
            "debug",
            "worktree.listed",
            json!({ "cwd": self.cwd.display().to_string(), "count": entries.len() }),
        );
        Ok(entries)
    }

    /// Materializes `path` bound to the existing `branch`.
    pub fn add(&self, path: &Path, branch: &str) -> Result<(), DuxError> {
        let dir = path.display().to_string();
        let out = self.run(["add", dir.as_str(), branch])?;
        if out.exit_code != 0 {
            return Err(self.failed("add", &out, json!({ "path": dir, "branch": branch })));
        }
        append_run_log(
            "info",
            "worktree.added",
            json!({ "path": dir, "branch": branch }),
        );
        Ok(())
    }

    /// Removes the directory and its registration even when it has local changes.
    pub fn remove(&self, path: &Path) -> Result<(), DuxError> {
        let dir = path.display().to_string();
        let out = self.run(["remove", "--force", dir.as_str()])?;
        if out.exit_code != 0 {
            return Err(self.failed("remove", &out, json!({ "path": dir })));
        }
        append_run_log("info", "worktree.removed", json!({ "path": dir }));
        Ok(())
    }

    /// Drops registrations whose directories no longer exist.
    pub fn prune(&self) -> Result<(), DuxError> {
        let out = self.run(["prune"])?;
        if out.exit_code != 0 {
            return Err(self.failed("prune", &out, json!({})));
        }
        append_run_log(
            "debug",
            "worktree.pruned",
            json!({ "cwd": self.cwd.display().to_string() }),
        );
        Ok(())
    }

    fn run<const N: usize>(&self, args: [&str; N]) -> Result<ProcessOutput, DuxError> {
        self.runner.run(ProcessRequest::new(
            "git",
            std::iter::once("worktree").chain(args),
            Some(self.cwd.as_path()),
        ))
    }

    fn failed(&self, action: &str, out: &ProcessOutput, mut context: Value) -> DuxError {
        if let Value::Object(fields) = &mut context {
            fields.insert("cwd".to_string(), json!(self.cwd.display().to_string()));
            fields.insert("exit_code".to_string(), json!(out.exit_code));
            fields.insert("stderr".to_string(), json!(out.stderr));
        }
        append_run_log("error", &format!("worktree.{action}.failed"), context);
        DuxError::Process(format!(
            "git worktree {action} failed: {}",
            out.stderr.trim()
        ))
    }
}

pub fn paths_match(left: &Path, right: &Path) -> bool {
    normalize_path(left) == normalize_path(right)
}

fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn parse_porcelain(text: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(rest),
                ..WorktreeEntry::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(rest) = line.strip_prefix("branch refs/heads/") {
            entry.branch = Some(rest.to_string());
        } else if line == "detached" {
            entry.detached = true;
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "prunable" || line.starts_with("prunable ") {
            entry.prunable = true;
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }

    entries
}
