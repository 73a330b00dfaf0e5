use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessOutput, ProcessRequest, ProcessRunner};
use crate::types::{PrState, PullRequest};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PrView {
    url: String,
    state: String,
    #[serde(rename = "isDraft", default)]
    is_draft: bool,
}

pub struct NewPullRequest<'b> {
    pub base: &'b str,
    pub head: &'b str,
    pub title: &'b str,
    pub body: &'b str,
    pub draft: bool,
}

pub struct GhClient<'a> {
    runner: &'a dyn ProcessRunner,
    cwd: PathBuf,
}

impl<'a> GhClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, cwd: impl AsRef<Path>) -> Self {
        Self {
            runner,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn create_issue(&self, title: &str, body: &str) -> Result<Issue, DuxError> {
        append_run_log("info", "gh.issue.create.started", json!({ "title": title }));
        let out = self.run(["issue", "create", "--title", title, "--body", body])?;
        if out.exit_code != 0 {
            return Err(self.failure("gh issue create", &out));
        }
        let url = last_url(&out.stdout).ok_or_else(|| {
            DuxError::external("gh issue create", "no issue URL in output")
        })?;
        let number = number_from_url(&url).ok_or_else(|| {
            DuxError::external("gh issue create", format!("unrecognized issue URL {url}"))
        })?;
        append_run_log(
            "info",
            "gh.issue.created",
            json!({ "number": number, "url": url }),
        );
        Ok(Issue {
            number,
            title: title.to_string(),
            url,
            body: body.to_string(),
        })
    }

    pub fn get_issue(&self, number: u64) -> Result<Issue, DuxError> {
        let number_arg = number.to_string();
        let out = self.run([
            "issue",
            "view",
            number_arg.as_str(),
            "--json",
            "number,title,url,body",
        ])?;
        if out.exit_code != 0 {
            return Err(self.failure("gh issue view", &out));
        }
        let issue: Issue = serde_json::from_str(&out.stdout)
            .map_err(|e| DuxError::external("gh issue view", format!("invalid json: {e}")))?;
        append_run_log(
            "debug",
            "gh.issue.fetched",
            json!({ "number": issue.number, "title": issue.title }),
        );
        Ok(issue)
    }

    /// `Ok(None)` when the branch has no pull request; `Err` when gh itself failed.
    pub fn pr_for_branch(&self, branch: &str) -> Result<Option<PullRequest>, DuxError> {
        let out = self.run(["pr", "view", branch, "--json", "url,state,isDraft"])?;
        if out.exit_code != 0 {
            if out.stderr.to_lowercase().contains("no pull requests found") {
                return Ok(None);
            }
            return Err(self.failure("gh pr view", &out));
        }
        let view: PrView = serde_json::from_str(&out.stdout)
            .map_err(|e| DuxError::external("gh pr view", format!("invalid json: {e}")))?;
        let state = PrState::parse(&view.state, view.is_draft).ok_or_else(|| {
            DuxError::external("gh pr view", format!("unknown PR state {}", view.state))
        })?;
        Ok(Some(PullRequest {
            url: view.url,
            state,
        }))
    }

    pub fn create_or_reuse_pr(
        &self,
        request: &NewPullRequest<'_>,
    ) -> Result<PullRequest, DuxError> {
        if let Some(existing) = self.pr_for_branch(request.head)? {
            append_run_log(
                "info",
                "gh.pr.reused",
                json!({ "branch": request.head, "url": existing.url }),
            );
            return Ok(existing);
        }

        let mut args = vec![
            "pr", "create", "--base", request.base, "--head", request.head, "--title",
            request.title, "--body", request.body,
        ];
        if request.draft {
            args.push("--draft");
        }
        let out = self.run(args)?;
        if out.exit_code != 0 {
            // Another invocation may have opened it in the meantime.
            if let Ok(Some(existing)) = self.pr_for_branch(request.head) {
                return Ok(existing);
            }
            return Err(self.failure("gh pr create", &out));
        }
        let url = last_url(&out.stdout)
            .ok_or_else(|| DuxError::external("gh pr create", "no PR URL in output"))?;
        append_run_log(
            "info",
            "gh.pr.created",
            json!({ "branch": request.head, "url": url, "draft": request.draft }),
        );
        Ok(PullRequest {
            url,
            state: if request.draft {
                PrState::Draft
            } else {
                PrState::Open
            },
        })
    }

    pub fn open_pr_in_browser(&self, branch: &str) -> Result<(), DuxError> {
        let out = self.run(["pr", "view", branch, "--web"])?;
        if out.exit_code != 0 {
            return Err(self.failure("gh pr view --web", &out));
        }
        Ok(())
    }

    fn failure(&self, tool: &str, out: &ProcessOutput) -> DuxError {
        append_run_log(
            "error",
            "gh.command.failed",
            json!({
                "cwd": self.cwd.display().to_string(),
                "tool": tool,
                "exit_code": out.exit_code,
                "stderr": out.stderr
            }),
        );
        DuxError::external(tool, out.stderr.trim())
    }

    fn run<I, S>(&self, args: I) -> Result<ProcessOutput, DuxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runner
            .run(ProcessRequest::new("gh", args, Some(self.cwd.as_path())))
            .map_err(|e| DuxError::external("gh", e.to_string()))
    }
}

fn last_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| line.starts_with("https://") || line.starts_with("http://"))
        .map(str::to_string)
}

fn number_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{GhClient, NewPullRequest};
    use crate::errors::DuxError;
    use crate::runtime::{FakeProcessRunner, ProcessOutput};
    use crate::types::PrState;

    #[test]
    fn issue_create_parses_number_from_url() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok(
            "Creating issue in acme/app\n\nhttps://github.com/acme/app/issues/42\n",
        )));
        let issue = GhClient::new(&runner, "/repo")
            .create_issue("Fix login redirect", "Auto-created for worktree.")
            .expect("created");
        assert_eq!(issue.number, 42);
        assert_eq!(issue.url, "https://github.com/acme/app/issues/42");
    }

    #[test]
    fn missing_pr_is_none_but_gh_failure_is_error() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::failed(
            1,
            "no pull requests found for branch \"issue/1-a\"",
        )));
        runner.push_response(Ok(ProcessOutput::failed(1, "HTTP 502: Bad Gateway")));
        let gh = GhClient::new(&runner, "/repo");
        assert_eq!(gh.pr_for_branch("issue/1-a").expect("none"), None);
        let err = gh.pr_for_branch("issue/1-a").expect_err("gh failed");
        assert!(matches!(err, DuxError::ExternalToolFailure { .. }));
    }

    #[test]
    fn draft_flag_maps_to_draft_state() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok(
            r#"{"url":"https://github.com/acme/app/pull/7","state":"OPEN","isDraft":true}"#,
        )));
        let pr = GhClient::new(&runner, "/repo")
            .pr_for_branch("issue/1-a")
            .expect("view")
            .expect("some");
        assert_eq!(pr.state, PrState::Draft);
    }

    #[test]
    fn existing_pr_is_reused_instead_of_created() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok(
            r#"{"url":"https://github.com/acme/app/pull/7","state":"OPEN","isDraft":false}"#,
        )));
        let pr = GhClient::new(&runner, "/repo")
            .create_or_reuse_pr(&NewPullRequest {
                base: "main",
                head: "issue/1-a",
                title: "[#1] A",
                body: "Closes #1",
                draft: true,
            })
            .expect("reused");
        assert_eq!(pr.state, PrState::Open);
        assert_eq!(runner.spawned().len(), 1);
    }

    #[test]
    fn new_pr_is_created_as_draft() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::failed(1, "no pull requests found")));
        runner.push_response(Ok(ProcessOutput::ok(
            "https://github.com/acme/app/pull/8\n",
        )));
        let pr = GhClient::new(&runner, "/repo")
            .create_or_reuse_pr(&NewPullRequest {
                base: "main",
                head: "issue/2-b",
                title: "[#2] B",
                body: "Closes #2",
                draft: true,
            })
            .expect("created");
        assert_eq!(pr.url, "https://github.com/acme/app/pull/8");
        assert_eq!(pr.state, PrState::Draft);
        let create = &runner.spawned()[1];
        assert_eq!(create.args.last().map(String::as_str), Some("--draft"));
    }
}
