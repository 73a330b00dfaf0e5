use serde::Serialize;
use std::path::PathBuf;

/// Directory under the repository root that holds every managed worktree.
pub const WORKTREE_DIR: &str = ".wt";
pub const ISSUE_BRANCH_PREFIX: &str = "issue";
pub const CONTEXT_BRANCH_PREFIX: &str = "work";
/// Per-worktree git config key holding the assigned port.
pub const PORT_CONFIG_KEY: &str = "dux.port";
/// Per-worktree git config key holding the identifier's source key.
pub const SOURCE_CONFIG_KEY: &str = "dux.source";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoScope {
    pub process_cwd: PathBuf,
    /// Root of the main (primary) worktree, even when invoked from a linked one.
    pub repo_root: PathBuf,
}

impl RepoScope {
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.repo_root.join(WORKTREE_DIR).join(branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cleanliness {
    Clean,
    Dirty,
    /// Directory is gone or could not be inspected.
    Missing,
}

impl Cleanliness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Missing => "missing",
        }
    }
}

/// Whether both halves of an environment are on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Complete,
    /// Worktree registered (or branch present) but the directory is gone.
    MissingDirectory,
    /// Worktree directory present but not on a branch.
    MissingBranch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub branch: Option<String>,
    pub path: PathBuf,
    pub port: Option<u16>,
    pub source: Option<String>,
    pub cleanliness: Cleanliness,
    pub presence: Presence,
    pub primary: bool,
}

impl Environment {
    pub fn is_consistent(&self) -> bool {
        self.presence == Presence::Complete
    }

    pub fn branch_label(&self) -> &str {
        self.branch.as_deref().unwrap_or("(detached)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Draft,
    Open,
    Merged,
    Closed,
}

impl PrState {
    pub fn parse(state: &str, is_draft: bool) -> Option<Self> {
        match state.to_ascii_uppercase().as_str() {
            "OPEN" if is_draft => Some(Self::Draft),
            "OPEN" => Some(Self::Open),
            "MERGED" => Some(Self::Merged),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
            Self::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub url: String,
    pub state: PrState,
}

/// Lifecycle derived on demand; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Absent,
    Created,
    Dirty,
    #[serde(rename = "clean-unmerged")]
    CleanUnmerged,
    Merged,
    Removed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Created => "created",
            Self::Dirty => "dirty",
            Self::CleanUnmerged => "clean-unmerged",
            Self::Merged => "merged",
            Self::Removed => "removed",
        }
    }
}

/// `Created` is a clean environment that has no pull request yet.
pub fn derive_lifecycle(env: Option<&Environment>, pr: Option<PrState>) -> LifecycleState {
    let Some(env) = env else {
        return LifecycleState::Absent;
    };
    if pr == Some(PrState::Merged) {
        return LifecycleState::Merged;
    }
    match env.cleanliness {
        Cleanliness::Dirty => LifecycleState::Dirty,
        Cleanliness::Missing => LifecycleState::Removed,
        Cleanliness::Clean if pr.is_none() => LifecycleState::Created,
        Cleanliness::Clean => LifecycleState::CleanUnmerged,
    }
}
