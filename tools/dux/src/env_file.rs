use crate::errors::DuxError;
use crate::runtime::FileSystem;
use std::path::{Path, PathBuf};

const PORT_KEY: &str = "PORT=";

/// Location of the configured env file inside `worktree`. Only the file name
/// is kept, so `config/.env.local` lands at `<worktree>/.env.local`.
pub fn worktree_env_path(worktree: &Path, env_file: &str) -> Option<PathBuf> {
    Path::new(env_file)
        .file_name()
        .map(|name| worktree.join(name))
}

pub fn read_port(contents: &str) -> Option<u16> {
    contents.lines().find_map(|line| {
        let value = line.trim_start().strip_prefix(PORT_KEY)?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        value.parse::<u16>().ok().filter(|port| *port > 0)
    })
}

/// Replaces every `PORT=` line with `port`, appending one when absent. All
/// other lines are kept as they were.
pub fn with_port(contents: &str, port: u16) -> String {
    let mut found = false;
    let mut lines = contents
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(PORT_KEY) {
                found = true;
                format!("{PORT_KEY}{port}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>();
    if !found {
        lines.push(format!("{PORT_KEY}{port}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn read_port_file(fs: &dyn FileSystem, path: &Path) -> Option<u16> {
    if !fs.exists(path) {
        return None;
    }
    fs.read_to_string(path).ok().as_deref().and_then(read_port)
}

/// Writes `port` into the env file at `path`, creating the file when missing.
pub fn inject_port(fs: &dyn FileSystem, path: &Path, port: u16) -> Result<(), DuxError> {
    let current = if fs.exists(path) {
        fs.read_to_string(path)?
    } else {
        String::new()
    };
    fs.write_string(path, &with_port(&current, port))
}
