use crate::errors::DuxError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 5 * 1024 * 1024;
pub const RUN_LOG_FILE: &str = "run.jsonl";

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts_ms: u128,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), DuxError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DuxError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            ts_ms: event.ts_ms,
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| DuxError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DuxError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| DuxError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| DuxError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes)?;
        }

        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Installs the process-wide run logger. Until this is called `append_run_log` is a no-op.
pub fn init_run_logger(logger: JsonlLogger) {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = Some(logger);
    }
}

pub fn clear_run_logger() {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = None;
    }
}

/// Log directory for a repository: inside the main `.git` directory so it never
/// shows up as an untracked file. `None` when `.git` is not a directory.
pub fn run_log_dir(repo_root: &Path) -> Option<PathBuf> {
    let git_dir = repo_root.join(".git");
    if git_dir.is_dir() {
        Some(git_dir.join("dux"))
    } else {
        None
    }
}

pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = match logger_slot().lock() {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };
    let Some(logger) = logger else {
        return;
    };
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    // A logging failure must never fail the command being logged.
    let _ = logger.append(&LogEvent {
        ts_ms,
        level,
        event_type,
        payload,
    });
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{run_log_dir, JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                ts_ms: 1,
                level: "info",
                event_type: "worktree.created",
                payload: json!({"path": "/repo/.wt/issue/12-abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"worktree.created\""));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn log_dir_requires_a_git_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(run_log_dir(dir.path()).is_none());
        std::fs::create_dir(dir.path().join(".git")).expect("git dir");
        assert_eq!(
            run_log_dir(dir.path()),
            Some(dir.path().join(".git").join("dux"))
        );
    }
}
