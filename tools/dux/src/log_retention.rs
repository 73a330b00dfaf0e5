use crate::errors::DuxError;
use std::fs;
use std::path::{Path, PathBuf};

/// Deletes the oldest `*.jsonl` files in `dir` until the total size fits in
/// `budget_bytes`. The newest file is the active log and is never deleted;
/// once it alone exceeds the budget it is rotated to `<stem>.<n>.jsonl`.
pub fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, DuxError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| DuxError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb).then_with(|| a.cmp(b))
    });

    let Some(active) = files.pop() else {
        return Ok(Vec::new());
    };

    let mut total = files
        .iter()
        .chain(std::iter::once(&active))
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| DuxError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| DuxError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    let active_len = fs::metadata(&active).map(|m| m.len()).unwrap_or(0);
    if active_len > budget_bytes {
        fs::rename(&active, rotated_name(&active)).map_err(|e| DuxError::Io(e.to_string()))?;
    }

    Ok(deleted)
}

fn rotated_name(active: &Path) -> PathBuf {
    let stem = active
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "run".to_string());
    let mut n = 1u32;
    loop {
        let candidate = active.with_file_name(format!("{stem}.{n}.jsonl"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
