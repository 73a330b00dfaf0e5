//! Create-or-reuse state machine for one identifier.
//!
//! `Lookup -> (Reuse | Create -> Bootstrap -> Link)`. Lookup and Create
//! failures abort; once the branch and worktree exist, bootstrap install and
//! link problems only add warnings. Every error carries the phase it came from.

use crate::config::AppConfig;
use crate::env_file::{inject_port, worktree_env_path};
use crate::errors::{DuxError, Phase};
use crate::gh::{GhClient, NewPullRequest};
use crate::git::GitClient;
use crate::identifier::Identifier;
use crate::inventory::Lister;
use crate::logging::append_run_log;
use crate::ports::PortAllocator;
use crate::runtime::{ProcessRequest, ProductionRuntime};
use crate::types::{
    Environment, Presence, PullRequest, RepoScope, PORT_CONFIG_KEY, SOURCE_CONFIG_KEY,
};
use crate::worktree::{paths_match, WorktreeClient};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Upper bound on `-N` suffixes tried for a context slug.
pub const MAX_CONTEXT_SUFFIX: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    Skip,
    /// Only on creation.
    Normal,
    /// Also on a reused environment.
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub title: String,
    pub body: String,
    /// Referenced from the empty start commit.
    pub issue: Option<u64>,
    pub draft: bool,
}

impl LinkRequest {
    pub fn start_message(&self, branch: &str) -> String {
        match self.issue {
            Some(number) => format!("chore: start {branch} (#{number})"),
            None => format!("chore: start {branch}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub identifier: Identifier,
    /// Older branch name to reuse when the current one is absent.
    pub legacy: Option<Identifier>,
    pub base: Option<String>,
    pub bootstrap: BootstrapMode,
    /// `None` skips the link phase.
    pub link: Option<LinkRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Created,
    Reused,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Reused => "reused",
        }
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub disposition: Disposition,
    pub branch: String,
    pub path: PathBuf,
    pub port: Option<u16>,
    pub pr: Option<PullRequest>,
    pub bootstrapped: bool,
    /// Non-fatal failures, each wrapped with its phase.
    pub warnings: Vec<DuxError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Reuse(Environment),
    Create(Identifier),
}

enum Slot {
    Consistent(Environment),
    Absent,
}

pub struct Reconciler<'a> {
    runtime: &'a ProductionRuntime,
    scope: &'a RepoScope,
    cfg: &'a AppConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(runtime: &'a ProductionRuntime, scope: &'a RepoScope, cfg: &'a AppConfig) -> Self {
        Self {
            runtime,
            scope,
            cfg,
        }
    }

    fn git(&self) -> GitClient<'a> {
        GitClient::new(self.runtime.process_runner.as_ref(), &self.scope.repo_root)
    }

    fn lister(&self) -> Lister<'a> {
        Lister::new(
            self.runtime.process_runner.as_ref(),
            self.runtime.file_system.as_ref(),
            self.scope,
            self.cfg.bootstrap.env_file.as_deref(),
        )
    }

    pub fn reconcile(&self, request: &CreateRequest) -> Result<Outcome, DuxError> {
        let environments = self
            .lister()
            .list_environments()
            .map_err(|e| e.in_phase(Phase::Lookup))?;
        let resolution = self
            .resolve(&environments, &request.identifier, request.legacy.as_ref())
            .map_err(|e| e.in_phase(Phase::Lookup))?;

        match resolution {
            Resolution::Reuse(env) => self.reuse(request, env, &environments),
            Resolution::Create(identifier) => self.create(request, &identifier, &environments),
        }
    }

    /// Picks the environment `identifier` maps to. Inconsistent state for the
    /// chosen branch is an error; it is never repaired here.
    pub fn resolve(
        &self,
        environments: &[Environment],
        identifier: &Identifier,
        legacy: Option<&Identifier>,
    ) -> Result<Resolution, DuxError> {
        if identifier.issue.is_some() {
            if let Slot::Consistent(env) = self.classify(environments, &identifier.branch)? {
                return Ok(Resolution::Reuse(env));
            }
            if let Some(legacy) = legacy {
                match self.classify(environments, &legacy.branch) {
                    Ok(Slot::Consistent(env)) => return Ok(Resolution::Reuse(env)),
                    Ok(Slot::Absent) => {}
                    Err(err) => append_run_log(
                        "warn",
                        "reconcile.legacy_inconsistent",
                        json!({ "branch": legacy.branch, "error": err.to_string() }),
                    ),
                }
            }
            return Ok(Resolution::Create(identifier.clone()));
        }

        for n in 1..=MAX_CONTEXT_SUFFIX {
            let candidate = identifier.with_suffix(n);
            match self.classify(environments, &candidate.branch)? {
                Slot::Absent => return Ok(Resolution::Create(candidate)),
                Slot::Consistent(env) => {
                    let same_source = env
                        .source
                        .as_deref()
                        .map_or(true, |source| source == candidate.source_key);
                    if same_source {
                        return Ok(Resolution::Reuse(env));
                    }
                    append_run_log(
                        "debug",
                        "reconcile.slug_taken",
                        json!({
                            "branch": candidate.branch,
                            "recorded_source": env.source,
                            "source": candidate.source_key
                        }),
                    );
                }
            }
        }
        Err(DuxError::InvalidIdentifier(format!(
            "{} through {}-{MAX_CONTEXT_SUFFIX} all belong to other contexts",
            identifier.branch, identifier.branch
        )))
    }

    fn classify(&self, environments: &[Environment], branch: &str) -> Result<Slot, DuxError> {
        let expected = self.scope.worktree_path(branch);
        if let Some(env) = environments
            .iter()
            .find(|env| env.branch.as_deref() == Some(branch))
        {
            return match env.presence {
                Presence::Complete => Ok(Slot::Consistent(env.clone())),
                _ => Err(DuxError::inconsistent(
                    branch,
                    format!(
                        "branch exists but its worktree directory {} is missing; \
                         run `git worktree prune` and delete or re-attach the branch",
                        env.path.display()
                    ),
                )),
            };
        }
        if environments
            .iter()
            .any(|env| env.branch.is_none() && paths_match(&env.path, &expected))
        {
            return Err(DuxError::inconsistent(
                branch,
                format!("a detached worktree occupies {}", expected.display()),
            ));
        }
        if self.runtime.file_system.exists(&expected) {
            return Err(DuxError::inconsistent(
                branch,
                format!(
                    "directory {} exists but the branch does not",
                    expected.display()
                ),
            ));
        }
        Ok(Slot::Absent)
    }

    fn reuse(
        &self,
        request: &CreateRequest,
        env: Environment,
        environments: &[Environment],
    ) -> Result<Outcome, DuxError> {
        let branch = env.branch.clone().unwrap_or_default();
        append_run_log(
            "info",
            "reconcile.reused",
            json!({ "branch": branch, "path": env.path.display().to_string() }),
        );
        let mut outcome = Outcome {
            disposition: Disposition::Reused,
            branch,
            path: env.path.clone(),
            port: env.port,
            pr: None,
            bootstrapped: false,
            warnings: Vec::new(),
        };
        if request.bootstrap == BootstrapMode::Force {
            self.bootstrap(&mut outcome, environments)
                .map_err(|e| e.in_phase(Phase::Bootstrap))?;
        }
        Ok(outcome)
    }

    fn create(
        &self,
        request: &CreateRequest,
        identifier: &Identifier,
        environments: &[Environment],
    ) -> Result<Outcome, DuxError> {
        let git = self.git();
        let path = self.scope.worktree_path(&identifier.branch);
        let mut warnings = Vec::new();

        let base = match &request.base {
            Some(base) => base.clone(),
            None => git
                .detect_default_branch()
                .map_err(|e| e.in_phase(Phase::Create))?,
        };
        if let Err(err) = git.fetch("origin", &base) {
            warnings.push(err.in_phase(Phase::Create));
        }
        let base_ref = git
            .resolve_base_ref(&base)
            .map_err(|e| e.in_phase(Phase::Create))?;
        git.enable_worktree_config()
            .map_err(|e| e.in_phase(Phase::Create))?;

        self.materialize(&git, &identifier.branch, &base_ref, &path)
            .map_err(|e| e.in_phase(Phase::Create))?;
        append_run_log(
            "info",
            "reconcile.created",
            json!({
                "branch": identifier.branch,
                "path": path.display().to_string(),
                "base_ref": base_ref
            }),
        );

        if let Err(err) = git.set_worktree_config(&path, SOURCE_CONFIG_KEY, &identifier.source_key)
        {
            warnings.push(err.in_phase(Phase::Create));
        }

        let mut outcome = Outcome {
            disposition: Disposition::Created,
            branch: identifier.branch.clone(),
            path,
            port: None,
            pr: None,
            bootstrapped: false,
            warnings,
        };

        if request.bootstrap != BootstrapMode::Skip {
            self.bootstrap(&mut outcome, environments)
                .map_err(|e| e.in_phase(Phase::Bootstrap))?;
        }

        if let Some(link) = &request.link {
            match self.link(&outcome, &base, link) {
                Ok(pr) => outcome.pr = Some(pr),
                Err(err) => outcome.warnings.push(err.in_phase(Phase::Link)),
            }
        }

        Ok(outcome)
    }

    /// `git branch` then `git worktree add`; a failed add deletes the branch
    /// again so the two are never left half-created.
    fn materialize(
        &self,
        git: &GitClient<'_>,
        branch: &str,
        base_ref: &str,
        path: &Path,
    ) -> Result<(), DuxError> {
        git.create_branch(branch, base_ref)?;
        let worktrees =
            WorktreeClient::new(self.runtime.process_runner.as_ref(), &self.scope.repo_root);
        let Err(add_err) = worktrees.add(path, branch) else {
            return Ok(());
        };
        match git.delete_branch(branch) {
            Ok(()) => {
                append_run_log(
                    "warn",
                    "reconcile.rolled_back",
                    json!({ "branch": branch, "error": add_err.to_string() }),
                );
                Err(add_err)
            }
            Err(rollback_err) => Err(DuxError::inconsistent(
                branch,
                format!("{add_err}; rollback of the branch also failed: {rollback_err}"),
            )),
        }
    }

    fn bootstrap(
        &self,
        outcome: &mut Outcome,
        environments: &[Environment],
    ) -> Result<(), DuxError> {
        let fs = self.runtime.file_system.as_ref();
        let git = self.git();
        let env_target = self
            .cfg
            .bootstrap
            .env_file
            .as_deref()
            .and_then(|name| worktree_env_path(&outcome.path, name));

        // Read before the env file is replaced by a fresh copy.
        let recorded = git
            .get_worktree_config(&outcome.path, PORT_CONFIG_KEY)?
            .and_then(|value| value.parse::<u16>().ok())
            .filter(|port| *port > 0);

        if let (Some(name), Some(target)) = (self.cfg.bootstrap.env_file.as_deref(), &env_target) {
            let source = self.scope.repo_root.join(name);
            if fs.exists(&source) {
                let contents = fs.read_to_string(&source)?;
                fs.write_string(target, &contents)?;
                append_run_log(
                    "info",
                    "bootstrap.env_copied",
                    json!({
                        "from": source.display().to_string(),
                        "to": target.display().to_string()
                    }),
                );
            } else {
                outcome.warnings.push(
                    DuxError::BootstrapFailure(format!(
                        "env file not found at {}",
                        source.display()
                    ))
                    .in_phase(Phase::Bootstrap),
                );
            }
        }

        if let Some(base) = self.cfg.ports.base {
            let port = match recorded {
                Some(port) => port,
                None => {
                    let others = environments
                        .iter()
                        .filter(|env| env.branch.as_deref() != Some(outcome.branch.as_str()))
                        .cloned()
                        .collect::<Vec<_>>();
                    PortAllocator::new(self.runtime.port_probe.as_ref(), &self.cfg.ports)
                        .allocate(base, &outcome.branch, &others)?
                }
            };
            if let Some(target) = &env_target {
                inject_port(fs, target, port)?;
            }
            git.set_worktree_config(&outcome.path, PORT_CONFIG_KEY, &port.to_string())?;
            outcome.port = Some(port);
        }

        if let Some(install) = self.cfg.bootstrap.install.as_deref() {
            self.runtime
                .terminal
                .write_line(&format!("install: {install}"))?;
            let request = ProcessRequest::new("sh", ["-c", install], Some(outcome.path.as_path()));
            let failure = match self.runtime.process_runner.run_attached(request) {
                Ok(0) => None,
                Ok(code) => Some(format!("`{install}` exited with status {code}")),
                Err(err) => Some(format!("`{install}` could not start: {err}")),
            };
            if let Some(detail) = failure {
                append_run_log(
                    "warn",
                    "bootstrap.install_failed",
                    json!({ "branch": outcome.branch, "detail": detail }),
                );
                outcome
                    .warnings
                    .push(DuxError::BootstrapFailure(detail).in_phase(Phase::Bootstrap));
            }
        }

        outcome.bootstrapped = true;
        append_run_log(
            "info",
            "bootstrap.completed",
            json!({ "branch": outcome.branch, "port": outcome.port }),
        );
        Ok(())
    }

    fn link(
        &self,
        outcome: &Outcome,
        base: &str,
        link: &LinkRequest,
    ) -> Result<PullRequest, DuxError> {
        let git = self.git();
        git.push_set_upstream(&outcome.path, &outcome.branch)?;
        git.ensure_start_commit(&outcome.path, &link.start_message(&outcome.branch))?;
        GhClient::new(self.runtime.process_runner.as_ref(), &outcome.path).create_or_reuse_pr(
            &NewPullRequest {
                base,
                head: &outcome.branch,
                title: &link.title,
                body: &link.body,
                draft: link.draft,
            },
        )
    }
}
