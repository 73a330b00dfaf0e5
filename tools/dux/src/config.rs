use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::{FileSystem, ProcessRunner};
use crate::types::{RepoScope, WORKTREE_DIR};
use crate::worktree::WorktreeClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = ".dux.toml";

const CONFIG_TEMPLATE: &str = r#"# .dux.toml
# Repo-local bootstrap configuration for dux worktrees.
# All fields are optional. Uncomment and configure as needed.

[bootstrap]
# Environment file copied into every new worktree (relative to the repo root).
# env_file = ".env.local"

# Command run inside a new worktree to install dependencies.
# install = "pnpm install"

# Command that starts the dev server (`dux create --run`).
# run = "pnpm dev"

[ports]
# Base port for automatic port allocation. No port is assigned when unset.
# base = 3000

# Width of the window a branch name hashes into.
# span = 1000

# Maximum number of candidate ports probed before giving up.
# max_probes = 2000
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub bootstrap: BootstrapConfig,
    pub ports: PortsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BootstrapConfig {
    pub env_file: Option<String>,
    pub install: Option<String>,
    pub run: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortsConfig {
    pub base: Option<u16>,
    pub span: u16,
    pub max_probes: u32,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            base: None,
            span: 1000,
            max_probes: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_payload_bytes: 4096,
            budget_bytes: crate::logging::DEFAULT_DISK_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    bootstrap: Option<PartialBootstrapConfig>,
    ports: Option<PartialPortsConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialBootstrapConfig {
    env_file: Option<String>,
    install: Option<String>,
    run: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPortsConfig {
    base: Option<u16>,
    span: Option<u16>,
    max_probes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    enabled: Option<bool>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn config_path(scope: &RepoScope) -> PathBuf {
    scope.repo_root.join(CONFIG_FILENAME)
}

/// Loads `.dux.toml` over the defaults. An explicit `override_path` must exist;
/// the repository default may be absent, in which case defaults apply.
pub fn load_config(
    scope: &RepoScope,
    override_path: Option<&Path>,
    fs: &dyn FileSystem,
) -> Result<AppConfig, DuxError> {
    let mut cfg = AppConfig::default();
    let path = match override_path {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => scope.process_cwd.join(path),
        None => config_path(scope),
    };

    if override_path.is_some() || fs.exists(&path) {
        let contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&contents)
            .map_err(|e| DuxError::ConfigParse(format!("{}: {e}", path.display())))?;
        merge_partial_config(&mut cfg, partial);
        append_run_log(
            "debug",
            "config.loaded",
            json!({ "path": path.display().to_string() }),
        );
    } else {
        append_run_log(
            "debug",
            "config.defaulted",
            json!({ "missing_path": path.display().to_string() }),
        );
    }

    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(bootstrap) = partial.bootstrap {
        if let Some(value) = non_blank(bootstrap.env_file) {
            cfg.bootstrap.env_file = Some(value);
        }
        if let Some(value) = non_blank(bootstrap.install) {
            cfg.bootstrap.install = Some(value);
        }
        if let Some(value) = non_blank(bootstrap.run) {
            cfg.bootstrap.run = Some(value);
        }
    }

    if let Some(ports) = partial.ports {
        if let Some(value) = ports.base {
            cfg.ports.base = Some(value);
        }
        if let Some(value) = ports.span {
            cfg.ports.span = value;
        }
        if let Some(value) = ports.max_probes {
            cfg.ports.max_probes = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.enabled {
            cfg.logging.enabled = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_config(cfg: &AppConfig) -> Result<(), DuxError> {
    if cfg.ports.base == Some(0) {
        return Err(DuxError::InvalidConfig(
            "ports.base must be between 1 and 65535".to_string(),
        ));
    }
    if cfg.ports.span == 0 {
        return Err(DuxError::InvalidConfig(
            "ports.span must be greater than zero".to_string(),
        ));
    }
    if cfg.ports.max_probes == 0 {
        return Err(DuxError::InvalidConfig(
            "ports.max_probes must be greater than zero".to_string(),
        ));
    }
    if let Some(env_file) = &cfg.bootstrap.env_file {
        if Path::new(env_file).file_name().is_none() {
            return Err(DuxError::InvalidConfig(format!(
                "bootstrap.env_file must name a file: {env_file}"
            )));
        }
    }
    Ok(())
}

/// Writes the commented template. Refuses to overwrite unless `force`.
pub fn write_config_template(
    fs: &dyn FileSystem,
    path: &Path,
    force: bool,
) -> Result<PathBuf, DuxError> {
    if fs.exists(path) && !force {
        return Err(DuxError::Cli(format!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        )));
    }
    fs.write_string(path, CONFIG_TEMPLATE)?;
    append_run_log(
        "info",
        "config.template_written",
        json!({ "path": path.display().to_string(), "force": force }),
    );
    Ok(path.to_path_buf())
}

/// Appends the worktree directory to an existing `.gitignore`. Returns the
/// path when the file changed; a missing `.gitignore` is left alone.
pub fn update_gitignore(
    fs: &dyn FileSystem,
    repo_root: &Path,
) -> Result<Option<PathBuf>, DuxError> {
    let path = repo_root.join(".gitignore");
    if !fs.exists(&path) {
        return Ok(None);
    }
    let mut content = fs.read_to_string(&path)?;
    let rooted = format!("/{WORKTREE_DIR}");
    let already = content.lines().any(|line| {
        let line = line.trim().trim_end_matches('/');
        line == WORKTREE_DIR || line == rooted
    });
    if already {
        return Ok(None);
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(WORKTREE_DIR);
    content.push('\n');
    fs.write_string(&path, &content)?;
    Ok(Some(path))
}

/// Resolves the main worktree root once per command. Invoked from a linked
/// worktree this still yields the primary checkout.
pub fn resolve_scope(
    process_cwd: &Path,
    process_runner: &dyn ProcessRunner,
) -> Result<RepoScope, DuxError> {
    let entries = WorktreeClient::new(process_runner, process_cwd)
        .list()
        .map_err(|e| match e {
            DuxError::Process(detail) => DuxError::RepositoryUnavailable(format!(
                "{} is not inside a git repository ({})",
                process_cwd.display(),
                detail.trim()
            )),
            other => other,
        })?;
    let primary = entries.first().ok_or_else(|| {
        DuxError::RepositoryUnavailable("git reported no worktrees".to_string())
    })?;
    if primary.bare {
        return Err(DuxError::RepositoryUnavailable(
            "bare repositories have no primary worktree".to_string(),
        ));
    }
    Ok(RepoScope {
        process_cwd: process_cwd.to_path_buf(),
        repo_root: primary.path.clone(),
    })
}
