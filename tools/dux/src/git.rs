use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessOutput, ProcessRequest, ProcessRunner};
use crate::types::Cleanliness;
use serde_json::json;
use std::path::{Path, PathBuf};

const DEFAULT_BRANCH_CANDIDATES: [&str; 4] = ["dev", "develop", "main", "master"];

pub struct GitClient<'a> {
    runner: &'a dyn ProcessRunner,
    cwd: PathBuf,
}

impl<'a> GitClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, cwd: impl AsRef<Path>) -> Self {
        Self {
            runner,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn ref_exists(&self, reference: &str) -> Result<bool, DuxError> {
        let out = self.run(["show-ref", "--verify", "--quiet", reference])?;
        Ok(out.exit_code == 0)
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool, DuxError> {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    /// Local branches under `refs/heads/<prefix>/` for each prefix, sorted.
    pub fn local_branches(&self, prefixes: &[&str]) -> Result<Vec<String>, DuxError> {
        let mut args = vec![
            "for-each-ref".to_string(),
            "--format=%(refname:short)".to_string(),
        ];
        args.extend(prefixes.iter().map(|p| format!("refs/heads/{p}/")));
        let out = self.run(args)?;
        if out.exit_code != 0 {
            return Err(DuxError::Process(format!(
                "git for-each-ref failed: {}",
                out.stderr.trim()
            )));
        }
        let mut branches = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        branches.sort();
        Ok(branches)
    }

    pub fn create_branch(&self, name: &str, base_ref: &str) -> Result<(), DuxError> {
        let out = self.run(["branch", name, base_ref])?;
        if out.exit_code != 0 {
            append_run_log(
                "error",
                "git.branch.create_failed",
                json!({
                    "cwd": self.cwd.display().to_string(),
                    "branch": name,
                    "base_ref": base_ref,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr
                }),
            );
            return Err(DuxError::Process(format!(
                "git branch {name} {base_ref} failed: {}",
                out.stderr.trim()
            )));
        }
        append_run_log(
            "info",
            "git.branch.created",
            json!({
                "cwd": self.cwd.display().to_string(),
                "branch": name,
                "base_ref": base_ref
            }),
        );
        Ok(())
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), DuxError> {
        let out = self.run(["branch", "-D", name])?;
        if out.exit_code != 0 {
            append_run_log(
                "error",
                "git.branch.delete_failed",
                json!({
                    "cwd": self.cwd.display().to_string(),
                    "branch": name,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr
                }),
            );
            return Err(DuxError::Process(format!(
                "git branch -D {name} failed: {}",
                out.stderr.trim()
            )));
        }
        append_run_log(
            "info",
            "git.branch.deleted",
            json!({ "cwd": self.cwd.display().to_string(), "branch": name }),
        );
        Ok(())
    }

    pub fn delete_remote_branch(&self, name: &str) -> Result<(), DuxError> {
        let out = self.run(["push", "origin", "--delete", name])?;
        if out.exit_code != 0 {
            return Err(DuxError::external("git push --delete", out.stderr.trim()));
        }
        Ok(())
    }

    /// Per-worktree config lookups need `extensions.worktreeConfig`; enabling it
    /// is idempotent.
    pub fn enable_worktree_config(&self) -> Result<(), DuxError> {
        let out = self.run(["config", "extensions.worktreeConfig", "true"])?;
        if out.exit_code != 0 {
            return Err(DuxError::Process(format!(
                "enabling extensions.worktreeConfig failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    /// `None` when unset or when per-worktree config is unavailable.
    pub fn get_worktree_config(
        &self,
        worktree: &Path,
        key: &str,
    ) -> Result<Option<String>, DuxError> {
        let path = worktree.display().to_string();
        let out = self.run(["-C", path.as_str(), "config", "--worktree", "--get", key])?;
        if out.exit_code != 0 {
            return Ok(None);
        }
        let value = out.stdout.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    pub fn set_worktree_config(
        &self,
        worktree: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), DuxError> {
        let path = worktree.display().to_string();
        let out = self.run(["-C", path.as_str(), "config", "--worktree", key, value])?;
        if out.exit_code != 0 {
            append_run_log(
                "error",
                "git.worktree_config.set_failed",
                json!({
                    "worktree": path,
                    "key": key,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr
                }),
            );
            return Err(DuxError::Process(format!(
                "git config --worktree {key} failed: {}",
                out.stderr.trim()
            )));
        }
        append_run_log(
            "debug",
            "git.worktree_config.set",
            json!({ "worktree": path, "key": key, "value": value }),
        );
        Ok(())
    }

    pub fn status(&self, worktree: &Path) -> Result<Cleanliness, DuxError> {
        let path = worktree.display().to_string();
        let out = self.run(["-C", path.as_str(), "status", "--porcelain"])?;
        if out.exit_code != 0 {
            return Ok(Cleanliness::Missing);
        }
        if out.stdout.trim().is_empty() {
            Ok(Cleanliness::Clean)
        } else {
            Ok(Cleanliness::Dirty)
        }
    }

    pub fn current_branch(&self) -> Result<Option<String>, DuxError> {
        let out = self.run(["branch", "--show-current"])?;
        if out.exit_code != 0 {
            return Err(DuxError::RepositoryUnavailable(
                out.stderr.trim().to_string(),
            ));
        }
        let branch = out.stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    /// `origin/HEAD`, then the current branch, then a well-known remote branch,
    /// then `main`.
    pub fn detect_default_branch(&self) -> Result<String, DuxError> {
        let head = self.run(["symbolic-ref", "refs/remotes/origin/HEAD"])?;
        if head.exit_code == 0 {
            if let Some(name) = head.stdout.trim().rsplit('/').next() {
                if !name.is_empty() {
                    return Ok(name.to_string());
                }
            }
        }

        if let Ok(Some(current)) = self.current_branch() {
            return Ok(current);
        }

        let remotes = self.run(["branch", "-r"])?;
        if remotes.exit_code == 0 {
            let names = remotes
                .stdout
                .lines()
                .map(str::trim)
                .collect::<Vec<_>>();
            for candidate in DEFAULT_BRANCH_CANDIDATES {
                let remote = format!("origin/{candidate}");
                if names.iter().any(|name| *name == remote) {
                    return Ok(candidate.to_string());
                }
            }
        }

        Ok("main".to_string())
    }

    /// Prefers the remote-tracking ref so new branches start from upstream.
    pub fn resolve_base_ref(&self, base_branch: &str) -> Result<String, DuxError> {
        if self.ref_exists(&format!("refs/remotes/origin/{base_branch}"))? {
            return Ok(format!("origin/{base_branch}"));
        }
        Ok(base_branch.to_string())
    }

    pub fn fetch(&self, remote: &str, branch: &str) -> Result<(), DuxError> {
        let out = self.run(["fetch", remote, branch])?;
        if out.exit_code != 0 {
            append_run_log(
                "warn",
                "git.fetch.failed",
                json!({
                    "cwd": self.cwd.display().to_string(),
                    "remote": remote,
                    "branch": branch,
                    "stderr": out.stderr
                }),
            );
            return Err(DuxError::external("git fetch", out.stderr.trim()));
        }
        Ok(())
    }

    pub fn push_set_upstream(&self, worktree: &Path, branch: &str) -> Result<(), DuxError> {
        let path = worktree.display().to_string();
        let out = self.run(["-C", path.as_str(), "push", "-u", "origin", branch])?;
        if out.exit_code != 0 {
            append_run_log(
                "warn",
                "git.push.failed",
                json!({ "worktree": path, "branch": branch, "stderr": out.stderr }),
            );
            return Err(DuxError::external("git push", out.stderr.trim()));
        }
        append_run_log(
            "info",
            "git.push.succeeded",
            json!({ "worktree": path, "branch": branch }),
        );
        Ok(())
    }

    /// A pull request needs at least one commit ahead of the base; adds an
    /// empty one when the branch has none ahead of its upstream.
    pub fn ensure_start_commit(&self, worktree: &Path, message: &str) -> Result<bool, DuxError> {
        let path = worktree.display().to_string();
        let upstream = self.run(["-C", path.as_str(), "rev-parse", "@{upstream}"])?;
        if upstream.exit_code != 0 {
            return Err(DuxError::external("git rev-parse", upstream.stderr.trim()));
        }
        let range = format!("{}..HEAD", upstream.stdout.trim());
        let ahead = self.run(["-C", path.as_str(), "rev-list", "--count", range.as_str()])?;
        if ahead.exit_code != 0 || ahead.stdout.trim() != "0" {
            return Ok(false);
        }
        let commit = self.run([
            "-C",
            path.as_str(),
            "commit",
            "--allow-empty",
            "-m",
            message,
        ])?;
        if commit.exit_code != 0 {
            return Err(DuxError::external("git commit", commit.stderr.trim()));
        }
        let push = self.run(["-C", path.as_str(), "push"])?;
        if push.exit_code != 0 {
            return Err(DuxError::external("git push", push.stderr.trim()));
        }
        Ok(true)
    }

    fn run<I, S>(&self, args: I) -> Result<ProcessOutput, DuxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runner
            .run(ProcessRequest::new("git", args, Some(self.cwd.as_path())))
    }
}

#[cfg(test)]
mod tests {
    use super::GitClient;
    use crate::runtime::{FakeProcessRunner, ProcessOutput};
    use crate::types::Cleanliness;
    use std::path::Path;

    #[test]
    fn default_branch_prefers_origin_head() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok("refs/remotes/origin/develop\n")));
        let branch = GitClient::new(&runner, "/repo")
            .detect_default_branch()
            .expect("detected");
        assert_eq!(branch, "develop");
    }

    #[test]
    fn default_branch_falls_back_to_known_remote_names() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::failed(1, "not a symbolic ref")));
        runner.push_response(Ok(ProcessOutput::ok("\n")));
        runner.push_response(Ok(ProcessOutput::ok(
            "  origin/feature/x\n  origin/master\n",
        )));
        let branch = GitClient::new(&runner, "/repo")
            .detect_default_branch()
            .expect("detected");
        assert_eq!(branch, "master");
    }

    #[test]
    fn default_branch_last_resort_is_main() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::failed(1, "")));
        runner.push_response(Ok(ProcessOutput::failed(128, "fatal")));
        runner.push_response(Ok(ProcessOutput::ok("")));
        let branch = GitClient::new(&runner, "/repo")
            .detect_default_branch()
            .expect("detected");
        assert_eq!(branch, "main");
    }

    #[test]
    fn worktree_config_absent_reads_as_none() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::failed(1, "")));
        runner.push_response(Ok(ProcessOutput::ok("3417\n")));
        let git = GitClient::new(&runner, "/repo");
        let wt = Path::new("/repo/.wt/issue/1-a");
        assert_eq!(git.get_worktree_config(wt, "dux.port").expect("get"), None);
        assert_eq!(
            git.get_worktree_config(wt, "dux.port").expect("get"),
            Some("3417".to_string())
        );
        assert_eq!(
            runner.command_lines()[0],
            "git -C /repo/.wt/issue/1-a config --worktree --get dux.port"
        );
    }

    #[test]
    fn status_classifies_porcelain_output() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok("")));
        runner.push_response(Ok(ProcessOutput::ok(" M src/lib.rs\n")));
        runner.push_response(Ok(ProcessOutput::failed(128, "fatal: cannot change to")));
        let git = GitClient::new(&runner, "/repo");
        let wt = Path::new("/repo/.wt/work/a");
        assert_eq!(git.status(wt).expect("clean"), Cleanliness::Clean);
        assert_eq!(git.status(wt).expect("dirty"), Cleanliness::Dirty);
        assert_eq!(git.status(wt).expect("missing"), Cleanliness::Missing);
    }

    #[test]
    fn base_ref_prefers_remote_tracking_branch() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok("")));
        runner.push_response(Ok(ProcessOutput::failed(1, "")));
        let git = GitClient::new(&runner, "/repo");
        assert_eq!(git.resolve_base_ref("main").expect("ref"), "origin/main");
        assert_eq!(git.resolve_base_ref("main").expect("ref"), "main");
    }

    #[test]
    fn start_commit_only_when_nothing_ahead() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok("abc123\n")));
        runner.push_response(Ok(ProcessOutput::ok("0\n")));
        runner.push_response(Ok(ProcessOutput::ok("")));
        runner.push_response(Ok(ProcessOutput::ok("")));
        let git = GitClient::new(&runner, "/repo");
        let committed = git
            .ensure_start_commit(Path::new("/repo/.wt/issue/1-a"), "chore: start issue/1-a (#1)")
            .expect("committed");
        assert!(committed);
        let lines = runner.command_lines();
        assert!(lines[2].contains("commit --allow-empty -m chore: start issue/1-a (#1)"));
        assert!(lines[3].ends_with("push"));
    }
}
