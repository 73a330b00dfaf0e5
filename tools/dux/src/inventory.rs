//! Environment lister: everything is recomputed from git metadata and the
//! filesystem on every call. Nothing here mutates repository state.

use crate::env_file::{read_port_file, worktree_env_path};
use crate::errors::DuxError;
use crate::git::GitClient;
use crate::logging::append_run_log;
use crate::runtime::{FileSystem, ProcessRunner};
use crate::types::{
    Cleanliness, Environment, Presence, RepoScope, CONTEXT_BRANCH_PREFIX, ISSUE_BRANCH_PREFIX,
    PORT_CONFIG_KEY, SOURCE_CONFIG_KEY,
};
use crate::worktree::{WorktreeClient, WorktreeEntry};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;

pub const MANAGED_PREFIXES: [&str; 2] = [ISSUE_BRANCH_PREFIX, CONTEXT_BRANCH_PREFIX];

pub fn is_managed_branch(branch: &str) -> bool {
    MANAGED_PREFIXES
        .iter()
        .any(|prefix| branch.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/')))
}

pub struct Lister<'a> {
    runner: &'a dyn ProcessRunner,
    fs: &'a dyn FileSystem,
    scope: &'a RepoScope,
    env_file: Option<&'a str>,
}

impl<'a> Lister<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        fs: &'a dyn FileSystem,
        scope: &'a RepoScope,
        env_file: Option<&'a str>,
    ) -> Self {
        Self {
            runner,
            fs,
            scope,
            env_file,
        }
    }

    /// Registered worktrees in git's order followed by managed branches that
    /// have no worktree.
    pub fn list_environments(&self) -> Result<Vec<Environment>, DuxError> {
        let entries = WorktreeClient::new(self.runner, &self.scope.repo_root)
            .list()
            .map_err(unavailable)?;
        let git = GitClient::new(self.runner, &self.scope.repo_root);

        let mut environments = Vec::with_capacity(entries.len());
        let mut seen = BTreeSet::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.bare {
                continue;
            }
            if let Some(branch) = &entry.branch {
                seen.insert(branch.clone());
            }
            environments.push(self.describe_worktree(&git, entry, index == 0)?);
        }

        let orphans = git
            .local_branches(&MANAGED_PREFIXES)
            .map_err(unavailable)?
            .into_iter()
            .filter(|branch| !seen.contains(branch))
            .collect::<Vec<_>>();
        for branch in orphans {
            environments.push(Environment {
                path: self.scope.worktree_path(&branch),
                branch: Some(branch),
                port: None,
                source: None,
                cleanliness: Cleanliness::Missing,
                presence: Presence::MissingDirectory,
                primary: false,
            });
        }

        append_run_log(
            "debug",
            "inventory.listed",
            json!({
                "repo_root": self.scope.repo_root.display().to_string(),
                "count": environments.len(),
                "inconsistent": environments.iter().filter(|env| !env.is_consistent()).count()
            }),
        );
        Ok(environments)
    }

    fn describe_worktree(
        &self,
        git: &GitClient<'_>,
        entry: &WorktreeEntry,
        primary: bool,
    ) -> Result<Environment, DuxError> {
        let on_disk = !entry.prunable && self.fs.exists(&entry.path);
        let presence = if !on_disk {
            Presence::MissingDirectory
        } else if entry.branch.is_none() {
            Presence::MissingBranch
        } else {
            Presence::Complete
        };

        let (cleanliness, port, source) = if on_disk {
            (
                git.status(&entry.path)?,
                self.read_port(git, &entry.path)?,
                git.get_worktree_config(&entry.path, SOURCE_CONFIG_KEY)?,
            )
        } else {
            (Cleanliness::Missing, None, None)
        };

        Ok(Environment {
            branch: entry.branch.clone(),
            path: entry.path.clone(),
            port,
            source,
            cleanliness,
            presence,
            primary,
        })
    }

    /// `dux.port` first, then the env file's `PORT=` line.
    pub fn read_port(&self, git: &GitClient<'_>, worktree: &Path) -> Result<Option<u16>, DuxError> {
        let recorded = git
            .get_worktree_config(worktree, PORT_CONFIG_KEY)?
            .and_then(|value| value.parse::<u16>().ok())
            .filter(|port| *port > 0);
        if recorded.is_some() {
            return Ok(recorded);
        }
        Ok(self
            .env_file
            .and_then(|name| worktree_env_path(worktree, name))
            .and_then(|path| read_port_file(self.fs, &path)))
    }
}

fn unavailable(err: DuxError) -> DuxError {
    match err {
        DuxError::Process(detail) => DuxError::RepositoryUnavailable(detail),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{is_managed_branch, Lister};
    use crate::errors::DuxError;
    use crate::runtime::{FakeFileSystem, FakeProcessRunner, FileSystem, ProcessOutput};
    use crate::types::{Cleanliness, Presence, RepoScope};
    use std::path::{Path, PathBuf};

    fn scope() -> RepoScope {
        RepoScope {
            process_cwd: PathBuf::from("/repo"),
            repo_root: PathBuf::from("/repo"),
        }
    }

    const PORCELAIN: &str = "worktree /repo\nHEAD 1\nbranch refs/heads/main\n\n\
worktree /repo/.wt/issue/1-test-issue\nHEAD 2\nbranch refs/heads/issue/1-test-issue\n\n\
worktree /repo/.wt/work/gone\nHEAD 3\nbranch refs/heads/work/gone\n\
prunable gitdir file points to non-existent location\n";

    #[test]
    fn managed_prefixes_need_a_slash() {
        assert!(is_managed_branch("issue/1-a"));
        assert!(is_managed_branch("work/spike"));
        assert!(!is_managed_branch("issues/1"));
        assert!(!is_managed_branch("main"));
    }

    #[test]
    fn lists_worktrees_ports_and_orphan_branches() {
        let runner = FakeProcessRunner::default();
        runner.respond_to("worktree list", ProcessOutput::ok(PORCELAIN));
        runner.respond_to("status --porcelain", ProcessOutput::ok(""));
        runner.respond_to(
            "-C /repo/.wt/issue/1-test-issue status",
            ProcessOutput::ok(" M README.md\n"),
        );
        runner.respond_to("config --worktree --get", ProcessOutput::failed(1, ""));
        runner.respond_to(
            "-C /repo/.wt/issue/1-test-issue config --worktree --get dux.port",
            ProcessOutput::ok("3149\n"),
        );
        runner.respond_to(
            "for-each-ref",
            ProcessOutput::ok("issue/1-test-issue\nwork/gone\nwork/orphan\n"),
        );

        let fs = FakeFileSystem::default();
        fs.create_dir_all(Path::new("/repo")).expect("dir");
        fs.create_dir_all(Path::new("/repo/.wt/issue/1-test-issue"))
            .expect("dir");

        let scope = scope();
        let envs = Lister::new(&runner, &fs, &scope, None)
            .list_environments()
            .expect("listed");
        assert_eq!(envs.len(), 4);

        assert!(envs[0].primary);
        assert_eq!(envs[0].branch.as_deref(), Some("main"));
        assert_eq!(envs[0].cleanliness, Cleanliness::Clean);

        assert_eq!(envs[1].port, Some(3149));
        assert_eq!(envs[1].cleanliness, Cleanliness::Dirty);
        assert!(envs[1].is_consistent());

        assert_eq!(envs[2].presence, Presence::MissingDirectory);
        assert_eq!(envs[2].cleanliness, Cleanliness::Missing);

        assert_eq!(envs[3].branch.as_deref(), Some("work/orphan"));
        assert_eq!(envs[3].path, PathBuf::from("/repo/.wt/work/orphan"));
        assert_eq!(envs[3].presence, Presence::MissingDirectory);
    }

    #[test]
    fn port_falls_back_to_env_file() {
        let runner = FakeProcessRunner::default();
        runner.respond_to(
            "worktree list",
            ProcessOutput::ok(
                "worktree /repo\nbranch refs/heads/main\n\n\
                 worktree /repo/.wt/work/a\nbranch refs/heads/work/a\n",
            ),
        );
        runner.respond_to("status --porcelain", ProcessOutput::ok(""));
        runner.respond_to("config --worktree --get", ProcessOutput::failed(1, ""));
        runner.respond_to("for-each-ref", ProcessOutput::ok("work/a\n"));

        let fs = FakeFileSystem::with_file("/repo/.wt/work/a/.env.local", "PORT=3633\n");
        fs.create_dir_all(Path::new("/repo")).expect("dir");
        fs.create_dir_all(Path::new("/repo/.wt/work/a")).expect("dir");

        let scope = scope();
        let envs = Lister::new(&runner, &fs, &scope, Some("config/.env.local"))
            .list_environments()
            .expect("listed");
        assert_eq!(envs[1].port, Some(3633));
    }

    #[test]
    fn outside_repository_is_unavailable() {
        let runner = FakeProcessRunner::default();
        runner.respond_to(
            "worktree list",
            ProcessOutput::failed(128, "fatal: not a git repository"),
        );
        let fs = FakeFileSystem::default();
        let scope = scope();
        let err = Lister::new(&runner, &fs, &scope, None)
            .list_environments()
            .expect_err("unavailable");
        assert!(matches!(err, DuxError::RepositoryUnavailable(_)));
    }
}
