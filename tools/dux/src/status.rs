use crate::errors::DuxError;
use crate::gh::GhClient;
use crate::inventory::Lister;
use crate::logging::append_run_log;
use crate::runtime::ProcessRunner;
use crate::session::{session_name, TmuxClient};
use crate::types::{
    derive_lifecycle, Environment, LifecycleState, PrState, Presence, PullRequest,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum PrCell {
    None,
    Known(PrState),
    /// The tracker lookup failed for this row.
    Unknown,
}

impl PrCell {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Known(state) => state.as_str(),
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub environment: Environment,
    pub pr: PrCell,
    pub pr_url: Option<String>,
    pub tmux: bool,
    pub lifecycle: LifecycleState,
}

/// Looks up the pull request for one branch.
pub trait PrSource {
    fn pr_for_branch(&self, branch: &str) -> Result<Option<PullRequest>, DuxError>;
}

impl PrSource for GhClient<'_> {
    fn pr_for_branch(&self, branch: &str) -> Result<Option<PullRequest>, DuxError> {
        GhClient::pr_for_branch(self, branch)
    }
}

/// One row per environment, ordered by branch name. A tracker failure only
/// degrades its own row.
pub fn build_report(
    environments: Vec<Environment>,
    prs: &dyn PrSource,
    sessions: &BTreeSet<String>,
) -> Vec<StatusRow> {
    let mut rows = environments
        .into_iter()
        .map(|environment| {
            let (pr, pr_url) = match environment.branch.as_deref() {
                None => (PrCell::None, None),
                Some(branch) => match prs.pr_for_branch(branch) {
                    Ok(Some(found)) => (PrCell::Known(found.state), Some(found.url)),
                    Ok(None) => (PrCell::None, None),
                    Err(err) => {
                        append_run_log(
                            "warn",
                            "status.pr_lookup_failed",
                            json!({ "branch": branch, "error": err.to_string() }),
                        );
                        (PrCell::Unknown, None)
                    }
                },
            };
            let pr_state = match &pr {
                PrCell::Known(state) => Some(*state),
                _ => None,
            };
            let tmux = environment
                .branch
                .as_deref()
                .is_some_and(|branch| sessions.contains(&session_name(branch)));
            StatusRow {
                lifecycle: derive_lifecycle(Some(&environment), pr_state),
                environment,
                pr,
                pr_url,
                tmux,
            }
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| {
        a.environment
            .branch_label()
            .as_bytes()
            .cmp(b.environment.branch_label().as_bytes())
    });
    rows
}

pub fn report(
    lister: &Lister<'_>,
    prs: &dyn PrSource,
    runner: &dyn ProcessRunner,
) -> Result<Vec<StatusRow>, DuxError> {
    let environments = lister.list_environments()?;
    let sessions = TmuxClient::new(runner).list_sessions().unwrap_or_else(|err| {
        append_run_log(
            "debug",
            "status.tmux_unavailable",
            json!({ "error": err.to_string() }),
        );
        BTreeSet::new()
    });
    Ok(build_report(environments, prs, &sessions))
}

pub fn render_rows(rows: &[StatusRow]) -> Vec<String> {
    let mut lines = Vec::with_capacity(rows.len() * 2);
    for row in rows {
        let env = &row.environment;
        let port = env
            .port
            .map(|port| port.to_string())
            .unwrap_or_else(|| "-".to_string());
        let tmux = if row.tmux { "tmux" } else { "-" };
        lines.push(format!(
            "{:40} {:7} {:8} {:>5} {:4} {:14} {}",
            env.branch_label(),
            env.cleanliness.as_str(),
            row.pr.label(),
            port,
            tmux,
            row.lifecycle.as_str(),
            row.pr_url.as_deref().unwrap_or("-")
        ));
        let marker = if env.primary { " (primary)" } else { "" };
        lines.push(format!("  {}{marker}", env.path.display()));
        if !env.is_consistent() {
            lines.push(format!(
                "  ! inconsistent: {}",
                match env.presence {
                    Presence::MissingDirectory => "worktree directory missing",
                    Presence::MissingBranch => "worktree not on a branch",
                    Presence::Complete => "",
                }
            ));
        }
    }
    lines
}
