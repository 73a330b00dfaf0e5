use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessOutput, ProcessRequest, ProcessRunner};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;

/// tmux treats `.` and `:` in targets as window/pane separators.
pub fn session_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if c == '.' || c == ':' { '-' } else { c })
        .collect()
}

/// Quotes `value` for a POSIX shell line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    Detached,
    Attach,
    /// Already inside tmux: move the current client instead of nesting.
    SwitchClient,
}

impl AttachMode {
    pub fn for_terminal(inside_tmux: bool) -> Self {
        if inside_tmux {
            Self::SwitchClient
        } else {
            Self::Attach
        }
    }
}

pub struct TmuxClient<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> TmuxClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Names of running sessions. No server running reads as no sessions.
    pub fn list_sessions(&self) -> Result<BTreeSet<String>, DuxError> {
        let out = self.run(["list-sessions", "-F", "#{session_name}"])?;
        if out.exit_code != 0 {
            return Ok(BTreeSet::new());
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn session_exists(&self, name: &str) -> Result<bool, DuxError> {
        let target = format!("={name}");
        Ok(self.run(["has-session", "-t", target.as_str()])?.exit_code == 0)
    }

    /// Starts a detached session in `cwd` and types `initial_command` into it.
    pub fn create_session(
        &self,
        name: &str,
        cwd: &Path,
        initial_command: Option<&str>,
    ) -> Result<(), DuxError> {
        let dir = cwd.display().to_string();
        let out = self.run(["new-session", "-d", "-s", name, "-c", dir.as_str()])?;
        if out.exit_code != 0 {
            return Err(DuxError::external("tmux new-session", out.stderr.trim()));
        }
        if let Some(command) = initial_command {
            let out = self.run(["send-keys", "-t", name, command, "C-m"])?;
            if out.exit_code != 0 {
                return Err(DuxError::external("tmux send-keys", out.stderr.trim()));
            }
        }
        append_run_log(
            "info",
            "tmux.session.created",
            json!({ "session": name, "cwd": dir, "has_command": initial_command.is_some() }),
        );
        Ok(())
    }

    pub fn attach(&self, name: &str, mode: AttachMode) -> Result<(), DuxError> {
        let args = match mode {
            AttachMode::Detached => return Ok(()),
            AttachMode::Attach => ["attach-session", "-t", name],
            AttachMode::SwitchClient => ["switch-client", "-t", name],
        };
        let code = self
            .runner
            .run_attached(ProcessRequest::new("tmux", args, None))
            .map_err(|e| DuxError::external("tmux", e.to_string()))?;
        if code != 0 {
            return Err(DuxError::external(
                "tmux",
                format!("{} exited with status {code}", args[0]),
            ));
        }
        Ok(())
    }

    fn run<I, S>(&self, args: I) -> Result<ProcessOutput, DuxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runner
            .run(ProcessRequest::new("tmux", args, None))
            .map_err(|e| DuxError::external("tmux", e.to_string()))
    }
}
