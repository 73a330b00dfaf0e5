//! Coding-assistant sessions: the prompt handed to the assistant and the
//! shell line that starts it inside a tmux session.

use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::session::{session_name, shell_quote, AttachMode, TmuxClient};
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assistant {
    Claude,
    Codex,
    Droid,
}

impl Assistant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Droid => "droid",
        }
    }

    /// Program and flags placed before the quoted prompt.
    fn launcher(self) -> &'static str {
        match self {
            Self::Claude => "claude --dangerously-skip-permissions",
            Self::Codex => "codex --dangerously-bypass-approvals-and-sandbox",
            Self::Droid => "droid exec --skip-permissions-unsafe",
        }
    }
}

pub fn issue_prompt(number: u64, title: &str, body: &str, url: &str, context: &str) -> String {
    let mut prompt = format!("Issue #{number}: {title}\n\n{body}\n\nIssue URL: {url}");
    if !context.trim().is_empty() {
        prompt.push_str("\n\nAdditional context from request:\n");
        prompt.push_str(context.trim());
    }
    prompt
}

pub fn context_prompt(context: &str) -> String {
    format!("Task context:\n{context}\n\nThere is no linked GitHub issue for this worktree.")
}

/// Pins the assistant to `worktree`; without `auto_start` it is asked to wait.
pub fn compose_prompt(worktree: &Path, branch: &str, task: &str, auto_start: bool) -> String {
    let dir = worktree.display();
    let mut prompt = format!(
        "IMPORTANT: You are working in a git worktree at: {dir}\n\n\
         This is an isolated working directory for branch: {branch}\n\n\
         DO NOT navigate to parent directories or try to find the \"repo root\".\n\
         ALL your work should be done in the current directory: {dir}\n\n\
         ---\n\n{task}"
    );
    if !auto_start {
        prompt.push_str("\n\nPlease review the context above and wait for explicit instructions");
        prompt.push_str(" before making changes.");
    }
    prompt
}

pub fn command_line(assistant: Assistant, prompt: &str) -> String {
    format!("{} {}", assistant.launcher(), shell_quote(prompt))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    Started,
    /// A session with the same name was already running and was left alone.
    AlreadyRunning,
}

pub struct AssistantLaunch<'a> {
    pub assistant: Assistant,
    pub worktree: &'a Path,
    pub branch: &'a str,
    pub task: &'a str,
    pub auto_start: bool,
}

/// Starts the assistant in a tmux session named after the branch. An existing
/// session with that name is never replaced.
pub fn open_assistant_session(
    tmux: &TmuxClient<'_>,
    launch: &AssistantLaunch<'_>,
    attach: AttachMode,
) -> Result<SessionStart, DuxError> {
    let name = session_name(launch.branch);
    let assistant = launch.assistant.as_str();
    if tmux.session_exists(&name)? {
        append_run_log(
            "info",
            "assistant.session.exists",
            json!({ "session": name, "assistant": assistant }),
        );
        return Ok(SessionStart::AlreadyRunning);
    }
    let prompt = compose_prompt(launch.worktree, launch.branch, launch.task, launch.auto_start);
    tmux.create_session(
        &name,
        launch.worktree,
        Some(&command_line(launch.assistant, &prompt)),
    )?;
    append_run_log(
        "info",
        "assistant.session.started",
        json!({
            "session": name,
            "assistant": assistant,
            "auto_start": launch.auto_start
        }),
    );
    tmux.attach(&name, attach)?;
    Ok(SessionStart::Started)
}
