use crate::assistant::{
    context_prompt, issue_prompt, open_assistant_session, Assistant, AssistantLaunch,
    SessionStart,
};
use crate::config::{config_path, update_gitignore, write_config_template, AppConfig};
use crate::editor::open_in_editor;
use crate::errors::DuxError;
use crate::gh::{GhClient, Issue};
use crate::git::GitClient;
use crate::identifier::{legacy_issue_identifier, normalize};
use crate::inventory::{is_managed_branch, Lister};
use crate::logging::append_run_log;
use crate::reconcile::{
    BootstrapMode, CreateRequest, Disposition, LinkRequest, Outcome, Reconciler,
};
use crate::runtime::{ProcessRequest, ProductionRuntime};
use crate::session::{session_name, AttachMode, TmuxClient};
use crate::status::{render_rows, report};
use crate::types::{PrState, RepoScope};
use crate::worktree::WorktreeClient;
use serde_json::json;

pub struct CommandContext<'a> {
    pub runtime: &'a ProductionRuntime,
    pub scope: RepoScope,
    pub cfg: AppConfig,
    /// `$TMUX` is set: attach by switching the current client.
    pub inside_tmux: bool,
}

impl<'a> CommandContext<'a> {
    fn say(&self, line: &str) -> Result<(), DuxError> {
        self.runtime.terminal.write_line(line)
    }

    fn lister(&self) -> Lister<'_> {
        Lister::new(
            self.runtime.process_runner.as_ref(),
            self.runtime.file_system.as_ref(),
            &self.scope,
            self.cfg.bootstrap.env_file.as_deref(),
        )
    }

    fn gh(&self) -> GhClient<'_> {
        GhClient::new(self.runtime.process_runner.as_ref(), &self.scope.repo_root)
    }

    fn git(&self) -> GitClient<'_> {
        GitClient::new(self.runtime.process_runner.as_ref(), &self.scope.repo_root)
    }
}

pub fn run_init(ctx: &CommandContext<'_>, force: bool) -> Result<i32, DuxError> {
    let fs = ctx.runtime.file_system.as_ref();
    let path = write_config_template(fs, &config_path(&ctx.scope), force)?;
    ctx.say(&format!("Wrote {}", path.display()))?;
    if let Some(gitignore) = update_gitignore(fs, &ctx.scope.repo_root)? {
        ctx.say(&format!("Added .wt to {}", gitignore.display()))?;
    }
    Ok(0)
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub context: Vec<String>,
    pub issues: Vec<u64>,
    pub new_issue: Option<String>,
    pub base: Option<String>,
    pub ready: bool,
    pub no_bootstrap: bool,
    pub force_bootstrap: bool,
    pub no_pr: bool,
    pub run: bool,
    pub code: bool,
    pub tmux: bool,
    pub assistant: Option<Assistant>,
    pub start: bool,
}

impl CreateOptions {
    fn bootstrap_mode(&self) -> BootstrapMode {
        if self.no_bootstrap {
            BootstrapMode::Skip
        } else if self.force_bootstrap {
            BootstrapMode::Force
        } else {
            BootstrapMode::Normal
        }
    }
}

/// One environment to reconcile, with the prompt an assistant would receive.
struct WorkItem {
    label: String,
    request: CreateRequest,
    task: String,
    issue_url: Option<String>,
}

struct Ready {
    label: String,
    outcome: Outcome,
    task: String,
    issue_url: Option<String>,
}

pub fn run_create(ctx: &CommandContext<'_>, opts: &CreateOptions) -> Result<i32, DuxError> {
    let context = opts.context.join(" ").trim().to_string();
    if opts.new_issue.is_some() && !opts.issues.is_empty() {
        return Err(DuxError::Cli(
            "--new cannot be used together with --issue".to_string(),
        ));
    }
    if context.is_empty() && opts.new_issue.is_none() && opts.issues.is_empty() {
        return Err(DuxError::Cli(
            "context is required for `create` when no issue is specified".to_string(),
        ));
    }

    if let Some(title) = &opts.new_issue {
        let body = if context.is_empty() {
            "Auto-created for worktree."
        } else {
            context.as_str()
        };
        let issue = ctx.gh().create_issue(title.trim(), body)?;
        ctx.say(&format!("Created issue #{}: {}", issue.number, issue.url))?;
        let item = issue_item(opts, &issue, "")?;
        return create_single(ctx, opts, item);
    }

    match opts.issues.as_slice() {
        [] => {
            let item = context_item(opts, &context)?;
            create_single(ctx, opts, item)
        }
        [number] => {
            let issue = ctx.gh().get_issue(*number)?;
            let item = issue_item(opts, &issue, &context)?;
            create_single(ctx, opts, item)
        }
        numbers => create_many(ctx, opts, numbers, &context),
    }
}

fn issue_item(opts: &CreateOptions, issue: &Issue, context: &str) -> Result<WorkItem, DuxError> {
    let identifier = normalize(Some(issue.number), &issue.title)?;
    let link = (!opts.no_pr).then(|| LinkRequest {
        title: format!("[#{}] {}", issue.number, issue.title),
        body: format!("Tracking {}\n\nCloses #{}", issue.url, issue.number),
        issue: Some(issue.number),
        draft: !opts.ready,
    });
    Ok(WorkItem {
        label: format!("Issue #{}", issue.number),
        request: CreateRequest {
            legacy: legacy_issue_identifier(issue.number, &issue.title),
            identifier,
            base: opts.base.clone(),
            bootstrap: opts.bootstrap_mode(),
            link,
        },
        task: issue_prompt(issue.number, &issue.title, &issue.body, &issue.url, context),
        issue_url: Some(issue.url.clone()),
    })
}

fn context_item(opts: &CreateOptions, context: &str) -> Result<WorkItem, DuxError> {
    let identifier = normalize(None, context)?;
    let title = context.lines().next().unwrap_or(context).trim().to_string();
    let link = (!opts.no_pr).then(|| LinkRequest {
        title,
        body: format!("Task context:\n\n{context}"),
        issue: None,
        draft: !opts.ready,
    });
    Ok(WorkItem {
        label: identifier.branch.clone(),
        request: CreateRequest {
            identifier,
            legacy: None,
            base: opts.base.clone(),
            bootstrap: opts.bootstrap_mode(),
            link,
        },
        task: context_prompt(context),
        issue_url: None,
    })
}

fn reconcile_item(ctx: &CommandContext<'_>, item: WorkItem) -> Result<Ready, DuxError> {
    let outcome = Reconciler::new(ctx.runtime, &ctx.scope, &ctx.cfg).reconcile(&item.request)?;
    append_run_log(
        "info",
        "create.reconciled",
        json!({
            "label": item.label,
            "branch": outcome.branch,
            "disposition": outcome.disposition.as_str(),
            "port": outcome.port,
            "warnings": outcome.warnings.len()
        }),
    );
    Ok(Ready {
        label: item.label,
        outcome,
        task: item.task,
        issue_url: item.issue_url,
    })
}

fn create_single(
    ctx: &CommandContext<'_>,
    opts: &CreateOptions,
    item: WorkItem,
) -> Result<i32, DuxError> {
    let ready = reconcile_item(ctx, item)?;
    let outcome = &ready.outcome;
    match outcome.disposition {
        Disposition::Created => ctx.say(&format!("Worktree: {}", outcome.path.display()))?,
        Disposition::Reused => ctx.say(&format!(
            "Worktree already exists at: {}",
            outcome.path.display()
        ))?,
    }
    ctx.say(&format!("Branch:   {}", outcome.branch))?;
    if let Some(url) = &ready.issue_url {
        ctx.say(&format!("Issue:    {url}"))?;
    }
    if let Some(pr) = &outcome.pr {
        ctx.say(&format!("PR:       {} ({})", pr.url, pr.state.as_str()))?;
    }
    if let Some(port) = outcome.port {
        ctx.say(&format!("Port:     {port}"))?;
    }
    report_warnings(ctx, &ready)?;

    open_tools(ctx, opts, std::slice::from_ref(&ready))?;
    start_dev_server(ctx, opts, &ready)?;
    Ok(0)
}

fn create_many(
    ctx: &CommandContext<'_>,
    opts: &CreateOptions,
    numbers: &[u64],
    context: &str,
) -> Result<i32, DuxError> {
    ctx.say(&format!("Processing {} issues...", numbers.len()))?;
    let mut ready = Vec::new();
    let mut failed = Vec::new();
    for number in numbers {
        let label = format!("Issue #{number}");
        let result = ctx
            .gh()
            .get_issue(*number)
            .and_then(|issue| issue_item(opts, &issue, context))
            .and_then(|item| reconcile_item(ctx, item));
        match result {
            Ok(item) => {
                let verb = match item.outcome.disposition {
                    Disposition::Created => "Created worktree at",
                    Disposition::Reused => "Worktree already exists at",
                };
                ctx.say(&format!(
                    "✓ {label}: {verb} {}",
                    item.outcome.path.display()
                ))?;
                ready.push(item);
            }
            Err(err) => {
                append_run_log(
                    "error",
                    "create.item_failed",
                    json!({ "issue": number, "error": err.to_string() }),
                );
                ctx.say(&format!("✗ {label}: {err}"))?;
                failed.push((label, err));
            }
        }
    }

    ctx.say("")?;
    ctx.say("SUMMARY")?;
    let created = ready
        .iter()
        .filter(|r| r.outcome.disposition == Disposition::Created)
        .collect::<Vec<_>>();
    let reused = ready
        .iter()
        .filter(|r| r.outcome.disposition == Disposition::Reused)
        .collect::<Vec<_>>();
    if !created.is_empty() {
        ctx.say(&format!("Created {} worktree(s):", created.len()))?;
        for item in &created {
            ctx.say(&format!("  {}: {}", item.label, item.outcome.path.display()))?;
            ctx.say(&format!("    Branch: {}", item.outcome.branch))?;
            if let Some(pr) = &item.outcome.pr {
                ctx.say(&format!("    PR:     {}", pr.url))?;
            }
            if let Some(port) = item.outcome.port {
                ctx.say(&format!("    Port:   {port}"))?;
            }
        }
    }
    if !reused.is_empty() {
        ctx.say(&format!("Already exists ({}):", reused.len()))?;
        for item in &reused {
            ctx.say(&format!("  {}: {}", item.label, item.outcome.path.display()))?;
        }
    }
    for item in &ready {
        report_warnings(ctx, item)?;
    }
    if !failed.is_empty() {
        ctx.say(&format!("Errors ({}):", failed.len()))?;
        for (label, err) in &failed {
            ctx.say(&format!("  {label}: {err}"))?;
        }
    }

    open_tools(ctx, opts, &ready)?;
    if let Some(run) = ctx.cfg.bootstrap.run.as_deref() {
        ctx.say(&format!("To start a dev server, run `{run}` inside a worktree."))?;
    }

    Ok(if failed.is_empty() { 0 } else { 1 })
}

fn report_warnings(ctx: &CommandContext<'_>, ready: &Ready) -> Result<(), DuxError> {
    for warning in &ready.outcome.warnings {
        ctx.say(&format!("warning ({}): {warning}", ready.outcome.branch))?;
    }
    Ok(())
}

/// Editor, plain tmux and assistant sessions. All of them are conveniences:
/// failures are printed, never returned.
fn open_tools(
    ctx: &CommandContext<'_>,
    opts: &CreateOptions,
    ready: &[Ready],
) -> Result<(), DuxError> {
    let runner = ctx.runtime.process_runner.as_ref();
    if opts.code {
        for item in ready {
            if let Err(err) = open_in_editor(runner, &item.outcome.path) {
                ctx.say(&format!("warning: could not open editor: {err}"))?;
            }
        }
    }

    let tmux = TmuxClient::new(runner);
    // With several environments the sessions are created but not attached.
    let attach = if ready.len() == 1 {
        AttachMode::for_terminal(ctx.inside_tmux)
    } else {
        AttachMode::Detached
    };

    if let Some(assistant) = opts.assistant {
        for item in ready {
            let launch = AssistantLaunch {
                assistant,
                worktree: &item.outcome.path,
                branch: &item.outcome.branch,
                task: &item.task,
                auto_start: opts.start,
            };
            let name = session_name(&item.outcome.branch);
            match open_assistant_session(&tmux, &launch, attach) {
                Ok(SessionStart::Started) => ctx.say(&format!(
                    "Opened {} in tmux session {name}",
                    assistant.as_str()
                ))?,
                Ok(SessionStart::AlreadyRunning) => {
                    ctx.say(&format!("tmux session '{name}' already exists"))?;
                    ctx.say(&format!("To attach: tmux attach -t {name}"))?;
                }
                Err(err) => ctx.say(&format!(
                    "warning: could not start {}: {err}",
                    assistant.as_str()
                ))?,
            }
        }
        return Ok(());
    }

    if opts.tmux {
        for item in ready {
            let name = session_name(&item.outcome.branch);
            let result = tmux.session_exists(&name).and_then(|exists| {
                if !exists {
                    tmux.create_session(&name, &item.outcome.path, None)?;
                }
                tmux.attach(&name, attach)
            });
            if let Err(err) = result {
                ctx.say(&format!("warning: tmux session {name}: {err}"))?;
            }
        }
    }
    Ok(())
}

fn start_dev_server(
    ctx: &CommandContext<'_>,
    opts: &CreateOptions,
    ready: &Ready,
) -> Result<(), DuxError> {
    let Some(run) = ctx.cfg.bootstrap.run.as_deref() else {
        return Ok(());
    };
    if !opts.run {
        ctx.say(&format!("To start the dev server, run: {run}"))?;
        return Ok(());
    }
    ctx.say(&format!("Starting dev server: {run}"))?;
    if let Some(port) = ready.outcome.port {
        ctx.say(&format!("Running on port: {port}"))?;
    }
    let request = ProcessRequest::new("sh", ["-c", run], Some(ready.outcome.path.as_path()));
    match ctx.runtime.process_runner.run_attached(request) {
        Ok(0) => {}
        Ok(code) => ctx.say(&format!("warning: `{run}` exited with status {code}"))?,
        Err(err) => ctx.say(&format!("warning: `{run}` could not start: {err}"))?,
    }
    Ok(())
}

pub fn run_status(ctx: &CommandContext<'_>, as_json: bool) -> Result<i32, DuxError> {
    let gh = ctx.gh();
    let rows = report(&ctx.lister(), &gh, ctx.runtime.process_runner.as_ref())?;
    if as_json {
        let text = serde_json::to_string_pretty(&rows)
            .map_err(|e| DuxError::Io(format!("status json: {e}")))?;
        ctx.say(&text)?;
        return Ok(0);
    }
    if rows.is_empty() {
        ctx.say("No worktrees.")?;
        return Ok(0);
    }
    for line in render_rows(&rows) {
        ctx.say(&line)?;
    }
    Ok(0)
}

/// Removes merged (or, with `all`, every) managed environment. The primary
/// worktree, the default branch and inconsistent environments are skipped.
pub fn run_clean(ctx: &CommandContext<'_>, all: bool) -> Result<i32, DuxError> {
    let environments = ctx.lister().list_environments()?;
    let git = ctx.git();
    let gh = ctx.gh();
    let worktrees = WorktreeClient::new(ctx.runtime.process_runner.as_ref(), &ctx.scope.repo_root);
    let default_branch = git.detect_default_branch()?;

    let mut removed = 0usize;
    let mut problems = 0usize;
    for env in environments {
        if env.primary {
            continue;
        }
        let Some(branch) = env.branch.clone() else {
            ctx.say(&format!("Skip {}: detached worktree", env.path.display()))?;
            continue;
        };
        if branch == default_branch || !is_managed_branch(&branch) {
            ctx.say(&format!("Skip {branch}: not a dux environment"))?;
            continue;
        }
        if !env.is_consistent() {
            ctx.say(&format!(
                "Skip {branch}: inconsistent environment at {}",
                env.path.display()
            ))?;
            continue;
        }

        if all {
            ctx.say(&format!("Removing {branch}"))?;
        } else {
            match gh.pr_for_branch(&branch) {
                Ok(Some(pr)) if pr.state == PrState::Merged => {
                    ctx.say(&format!("Pruning {branch} (merged)"))?;
                }
                Ok(_) => continue,
                Err(err) => {
                    ctx.say(&format!("Skip {branch}: {err}"))?;
                    continue;
                }
            }
        }

        if let Err(err) = worktrees.remove(&env.path) {
            ctx.say(&format!("Error removing {branch}: {err}"))?;
            problems += 1;
            continue;
        }
        if let Err(err) = git.delete_branch(&branch) {
            let partial = DuxError::inconsistent(
                &branch,
                format!("worktree removed but the branch remains: {err}"),
            );
            ctx.say(&format!("Error: {partial}"))?;
            problems += 1;
            continue;
        }
        if let Err(err) = git.delete_remote_branch(&branch) {
            append_run_log(
                "debug",
                "clean.remote_delete_skipped",
                json!({ "branch": branch, "error": err.to_string() }),
            );
        }
        removed += 1;
        append_run_log("info", "clean.removed", json!({ "branch": branch }));
    }

    if let Err(err) = worktrees.prune() {
        ctx.say(&format!("warning: {err}"))?;
    }
    ctx.say(&format!("Removed {removed} environment(s)."))?;
    Ok(if problems == 0 { 0 } else { 1 })
}

pub fn run_view(ctx: &CommandContext<'_>) -> Result<i32, DuxError> {
    let git = GitClient::new(ctx.runtime.process_runner.as_ref(), &ctx.scope.process_cwd);
    let branch = git
        .current_branch()?
        .ok_or_else(|| DuxError::Cli("unable to determine the current branch".to_string()))?;
    let gh = GhClient::new(ctx.runtime.process_runner.as_ref(), &ctx.scope.process_cwd);
    let pr = gh.pr_for_branch(&branch)?.ok_or_else(|| {
        DuxError::Cli(format!(
            "no pull request found for branch '{branch}'; \
             create one with `dux create` or `gh pr create`"
        ))
    })?;
    ctx.say(&format!("Opening PR for branch '{branch}' -> {}", pr.url))?;
    gh.open_pr_in_browser(&branch)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::{
        run_clean, run_create, run_init, run_status, run_view, CommandContext, CreateOptions,
    };
    use crate::config::AppConfig;
    use crate::errors::DuxError;
    use crate::runtime::{
        FakeFileSystem, FakePortProbe, FakeProcessRunner, FakeTerminal, FileSystem,
        ProcessOutput, ProductionRuntime,
    };
    use crate::types::RepoScope;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    struct Harness {
        runner: FakeProcessRunner,
        fs: FakeFileSystem,
        terminal: FakeTerminal,
        runtime: ProductionRuntime,
    }

    fn harness() -> Harness {
        let runner = FakeProcessRunner::default();
        let fs = FakeFileSystem::default();
        let terminal = FakeTerminal::default();
        let runtime = ProductionRuntime {
            file_system: Arc::new(fs.clone()),
            process_runner: Arc::new(runner.clone()),
            terminal: Arc::new(terminal.clone()),
            port_probe: Arc::new(FakePortProbe::default()),
        };
        fs.create_dir_all(Path::new("/repo")).expect("dir");
        Harness {
            runner,
            fs,
            terminal,
            runtime,
        }
    }

    fn ctx(runtime: &ProductionRuntime) -> CommandContext<'_> {
        CommandContext {
            runtime,
            scope: RepoScope {
                process_cwd: PathBuf::from("/repo"),
                repo_root: PathBuf::from("/repo"),
            },
            cfg: AppConfig::default(),
            inside_tmux: false,
        }
    }

    fn pr_json(number: u32, state: &str, draft: bool) -> ProcessOutput {
        ProcessOutput::ok(format!(
            r#"{{"url":"https://github.com/acme/app/pull/{number}","state":"{state}","isDraft":{draft}}}"#
        ))
    }

    const TWO_WORKTREES: &str = "worktree /repo\nbranch refs/heads/main\n\n\
worktree /repo/.wt/issue/1-a\nbranch refs/heads/issue/1-a\n\n\
worktree /repo/.wt/work/b\nbranch refs/heads/work/b\n";

    fn script_listing(h: &Harness) {
        h.runner.respond_to("worktree list", ProcessOutput::ok(TWO_WORKTREES));
        h.runner
            .respond_to("for-each-ref", ProcessOutput::ok("issue/1-a\nwork/b\n"));
        h.runner.respond_to("status --porcelain", ProcessOutput::ok(""));
        h.runner
            .respond_to("config --worktree --get", ProcessOutput::failed(1, ""));
        h.fs.create_dir_all(Path::new("/repo/.wt/issue/1-a")).expect("dir");
        h.fs.create_dir_all(Path::new("/repo/.wt/work/b")).expect("dir");
    }

    #[test]
    fn init_writes_template_and_refuses_overwrite() {
        let h = harness();
        h.fs
            .write_string(Path::new("/repo/.gitignore"), "target/\n")
            .expect("gitignore");
        let context = ctx(&h.runtime);
        assert_eq!(run_init(&context, false).expect("init"), 0);
        assert!(h.fs.file(Path::new("/repo/.dux.toml")).is_some());
        assert_eq!(
            h.fs.file(Path::new("/repo/.gitignore")),
            Some("target/\n.wt\n".to_string())
        );
        assert!(matches!(run_init(&context, false), Err(DuxError::Cli(_))));
    }

    #[test]
    fn create_requires_context_or_issue() {
        let h = harness();
        let err = run_create(&ctx(&h.runtime), &CreateOptions::default()).expect_err("usage");
        assert!(err.to_string().contains("context is required"));
    }

    #[test]
    fn punctuation_only_context_is_invalid_identifier() {
        let h = harness();
        let opts = CreateOptions {
            context: vec!["?!".to_string(), "...".to_string()],
            ..CreateOptions::default()
        };
        let err = run_create(&ctx(&h.runtime), &opts).expect_err("invalid");
        assert!(matches!(err, DuxError::InvalidIdentifier(_)));
        assert!(h.runner.spawned().is_empty());
    }

    #[test]
    fn multi_issue_failure_does_not_abort_others() {
        let h = harness();
        script_listing(&h);
        h.runner.respond_to(
            "issue view 1",
            ProcessOutput::ok(
                r#"{"number":1,"title":"A","url":"https://github.com/acme/app/issues/1","body":""}"#,
            ),
        );
        h.runner.respond_to(
            "issue view 2",
            ProcessOutput::failed(1, "Could not resolve to an issue"),
        );
        h.runner.respond_to("has-session", ProcessOutput::failed(1, ""));
        let opts = CreateOptions {
            issues: vec![1, 2],
            no_pr: true,
            ..CreateOptions::default()
        };
        let code = run_create(&ctx(&h.runtime), &opts).expect("summary");
        assert_eq!(code, 1);
        let lines = h.terminal.written_lines();
        let reused = "✓ Issue #1: Worktree already exists at /repo/.wt/issue/1-a";
        assert!(lines.iter().any(|l| l.starts_with(reused)));
        assert!(lines.iter().any(|l| l.starts_with("✗ Issue #2:")));
        assert!(lines.iter().any(|l| l == "Errors (1):"));
    }

    #[test]
    fn status_reports_unknown_pr_for_failed_lookup() {
        let h = harness();
        script_listing(&h);
        h.runner.respond_to(
            "-C /repo/.wt/issue/1-a config --worktree --get dux.port",
            ProcessOutput::ok("3001\n"),
        );
        h.runner
            .respond_to("gh pr view", ProcessOutput::failed(1, "no pull requests found"));
        h.runner.respond_to(
            "gh pr view issue/1-a",
            pr_json(5, "OPEN", true),
        );
        h.runner
            .respond_to("gh pr view work/b", ProcessOutput::failed(1, "HTTP 502"));
        h.runner
            .respond_to("list-sessions", ProcessOutput::failed(1, "no server running"));

        assert_eq!(run_status(&ctx(&h.runtime), false).expect("status"), 0);
        let lines = h.terminal.written_lines();
        let issue = lines.iter().find(|l| l.starts_with("issue/1-a")).expect("issue row");
        assert!(issue.contains("DRAFT"));
        assert!(issue.contains("3001"));
        let work = lines.iter().find(|l| l.starts_with("work/b")).expect("work row");
        assert!(work.contains("unknown"));
    }

    #[test]
    fn clean_removes_only_merged_managed_environments() {
        let h = harness();
        script_listing(&h);
        h.runner.respond_to(
            "symbolic-ref refs/remotes/origin/HEAD",
            ProcessOutput::ok("refs/remotes/origin/main\n"),
        );
        h.runner.respond_to(
            "gh pr view issue/1-a",
            pr_json(5, "MERGED", false),
        );
        h.runner.respond_to(
            "gh pr view work/b",
            pr_json(6, "OPEN", false),
        );
        h.runner.respond_to("worktree remove", ProcessOutput::ok(""));
        h.runner.respond_to("branch -D", ProcessOutput::ok(""));
        h.runner
            .respond_to("push origin --delete", ProcessOutput::failed(1, "no remote"));
        h.runner.respond_to("worktree prune", ProcessOutput::ok(""));

        assert_eq!(run_clean(&ctx(&h.runtime), false).expect("clean"), 0);
        let lines = h.runner.command_lines();
        assert!(lines.contains(&"git worktree remove --force /repo/.wt/issue/1-a".to_string()));
        assert!(lines.contains(&"git branch -D issue/1-a".to_string()));
        assert!(!lines.iter().any(|l| l.contains("remove --force /repo/.wt/work/b")));
        assert!(lines.contains(&"git worktree prune".to_string()));
        assert!(h
            .terminal
            .written_lines()
            .contains(&"Removed 1 environment(s).".to_string()));
    }

    #[test]
    fn clean_reports_partial_removal() {
        let h = harness();
        script_listing(&h);
        h.runner.respond_to(
            "symbolic-ref refs/remotes/origin/HEAD",
            ProcessOutput::ok("refs/remotes/origin/main\n"),
        );
        h.runner.respond_to("worktree remove", ProcessOutput::ok(""));
        h.runner.respond_to("branch -D", ProcessOutput::ok(""));
        h.runner
            .respond_to("branch -D work/b", ProcessOutput::failed(1, "error: branch locked"));
        h.runner.respond_to("push origin --delete", ProcessOutput::ok(""));
        h.runner.respond_to("worktree prune", ProcessOutput::ok(""));

        assert_eq!(run_clean(&ctx(&h.runtime), true).expect("clean"), 1);
        let lines = h.terminal.written_lines();
        assert!(lines
            .iter()
            .any(|l| l.starts_with("Error: inconsistent environment for work/b")));
        assert!(lines.contains(&"Removed 1 environment(s).".to_string()));
    }

    #[test]
    fn view_without_pr_is_an_error() {
        let h = harness();
        h.runner
            .respond_to("branch --show-current", ProcessOutput::ok("work/b\n"));
        h.runner.respond_to("gh pr view", ProcessOutput::failed(1, "no pull requests found"));
        let err = run_view(&ctx(&h.runtime)).expect_err("no pr");
        assert!(err.to_string().contains("no pull request found for branch 'work/b'"));
    }

    #[test]
    fn view_opens_browser_for_current_branch() {
        let h = harness();
        h.runner
            .respond_to("branch --show-current", ProcessOutput::ok("issue/1-a\n"));
        h.runner.respond_to(
            "gh pr view issue/1-a --json",
            pr_json(5, "OPEN", false),
        );
        h.runner.respond_to("--web", ProcessOutput::ok(""));
        assert_eq!(run_view(&ctx(&h.runtime)).expect("view"), 0);
        assert!(h
            .runner
            .command_lines()
            .contains(&"gh pr view issue/1-a --web".to_string()));
    }
}
