use std::fmt;
use thiserror::Error;

/// Reconciler phase an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lookup,
    Create,
    Bootstrap,
    Link,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Create => "create",
            Self::Bootstrap => "bootstrap",
            Self::Link => "link",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DuxError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),
    #[error("inconsistent environment for {branch}: {detail}")]
    InconsistentEnvironment { branch: String, detail: String },
    #[error("no free port after {probes} probes starting at {start}")]
    PortExhausted { start: u32, probes: u32 },
    #[error("{tool} failed: {detail}")]
    ExternalToolFailure { tool: String, detail: String },
    #[error("bootstrap failed: {0}")]
    BootstrapFailure(String),
    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<DuxError>,
    },
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
}

impl DuxError {
    pub fn external(tool: &str, detail: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.to_string(),
            detail: detail.into(),
        }
    }

    pub fn inconsistent(branch: &str, detail: impl Into<String>) -> Self {
        Self::InconsistentEnvironment {
            branch: branch.to_string(),
            detail: detail.into(),
        }
    }

    /// Attributes the error to `phase`. Errors already carrying a phase keep it.
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            Self::Phase { .. } => self,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any phase wrapper removed.
    pub fn root(&self) -> &DuxError {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
