pub mod assistant;
pub mod commands;
pub mod config;
pub mod editor;
pub mod env_file;
pub mod errors;
pub mod gh;
pub mod git;
pub mod identifier;
pub mod inventory;
pub mod log_retention;
pub mod logging;
pub mod ports;
pub mod reconcile;
pub mod runtime;
pub mod session;
pub mod status;
pub mod types;
pub mod worktree;

use assistant::Assistant;
use clap::{error::ErrorKind, Parser, Subcommand, ValueEnum};
use commands::{
    run_clean, run_create, run_init, run_status, run_view, CommandContext, CreateOptions,
};
use config::{load_config, resolve_scope, AppConfig};
use errors::DuxError;
use logging::{append_run_log, init_run_logger, run_log_dir, JsonlLogger, RUN_LOG_FILE};
use runtime::ProductionRuntime;
use serde_json::json;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "dux")]
#[command(version)]
#[command(about = "Isolated git worktree environments per issue or task")]
pub struct Cli {
    /// Config file to use instead of `<repo>/.dux.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Write a `.dux.toml` template and ignore `.wt` in git.
    Init {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Create or reuse the environment for an issue or a free-form task.
    Create(CreateArgs),
    /// List every environment with its cleanliness, PR state and port.
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Remove environments whose pull request has been merged.
    Clean {
        /// Remove every managed environment, merged or not.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Open the current branch's pull request in the browser.
    View,
}

#[derive(Debug, Clone, clap::Args)]
pub struct CreateArgs {
    /// Task description; required unless an issue is given.
    pub context: Vec<String>,
    /// Issue number(s), comma separated.
    #[arg(long, value_delimiter = ',', conflicts_with = "new")]
    pub issue: Vec<u64>,
    /// Open a new issue with this title first.
    #[arg(long)]
    pub new: Option<String>,
    #[arg(long)]
    pub base: Option<String>,
    /// Open the pull request ready for review instead of as a draft.
    #[arg(long, default_value_t = false)]
    pub ready: bool,
    #[arg(long, default_value_t = false, conflicts_with = "force_bootstrap")]
    pub no_bootstrap: bool,
    #[arg(long, default_value_t = false)]
    pub force_bootstrap: bool,
    #[arg(long, default_value_t = false)]
    pub no_pr: bool,
    #[arg(long, default_value_t = false)]
    pub run: bool,
    #[arg(long, default_value_t = false)]
    pub code: bool,
    #[arg(long, default_value_t = false)]
    pub tmux: bool,
    #[arg(long, value_enum)]
    pub assistant: Option<CliAssistant>,
    /// Let the assistant start working without waiting for instructions.
    #[arg(long, default_value_t = false, requires = "assistant")]
    pub start: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliAssistant {
    Claude,
    Codex,
    Droid,
}

impl From<CliAssistant> for Assistant {
    fn from(value: CliAssistant) -> Self {
        match value {
            CliAssistant::Claude => Assistant::Claude,
            CliAssistant::Codex => Assistant::Codex,
            CliAssistant::Droid => Assistant::Droid,
        }
    }
}

impl From<CreateArgs> for CreateOptions {
    fn from(args: CreateArgs) -> Self {
        Self {
            context: args.context,
            issues: args.issue,
            new_issue: args.new,
            base: args.base,
            ready: args.ready,
            no_bootstrap: args.no_bootstrap,
            force_bootstrap: args.force_bootstrap,
            no_pr: args.no_pr,
            run: args.run,
            code: args.code,
            tmux: args.tmux,
            assistant: args.assistant.map(Assistant::from),
            start: args.start,
        }
    }
}

pub fn run() -> Result<i32, DuxError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| DuxError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[OsString],
    env: &[(OsString, OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, DuxError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(DuxError::Cli(error.to_string())),
        },
    };

    let scope = resolve_scope(cwd, runtime.process_runner.as_ref())?;
    // `init --force` must be able to replace a config that no longer parses.
    let cfg = match cli.command {
        Command::Init { .. } => AppConfig::default(),
        _ => load_config(&scope, cli.config.as_deref(), runtime.file_system.as_ref())?,
    };
    if cfg.logging.enabled {
        if let Some(dir) = run_log_dir(&scope.repo_root) {
            let mut logger = JsonlLogger::new(dir.join(RUN_LOG_FILE));
            logger.max_payload_bytes = cfg.logging.max_payload_bytes;
            logger.budget_bytes = cfg.logging.budget_bytes;
            init_run_logger(logger);
        }
    }
    append_run_log(
        "info",
        "run.started",
        json!({
            "command": command_name(&cli.command),
            "repo_root": scope.repo_root.display().to_string(),
            "cwd": cwd.display().to_string()
        }),
    );

    let ctx = CommandContext {
        runtime,
        scope,
        cfg,
        inside_tmux: inside_tmux(env),
    };
    let result = match cli.command {
        Command::Init { force } => run_init(&ctx, force),
        Command::Create(args) => run_create(&ctx, &CreateOptions::from(args)),
        Command::Status { json } => run_status(&ctx, json),
        Command::Clean { all } => run_clean(&ctx, all),
        Command::View => run_view(&ctx),
    };
    match &result {
        Ok(code) => append_run_log("info", "run.finished", json!({ "exit_code": code })),
        Err(err) => append_run_log(
            "error",
            "run.failed",
            json!({ "error": err.to_string(), "phase": err.phase().map(|p| p.as_str()) }),
        ),
    }
    result
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init { .. } => "init",
        Command::Create(_) => "create",
        Command::Status { .. } => "status",
        Command::Clean { .. } => "clean",
        Command::View => "view",
    }
}

fn inside_tmux(env: &[(OsString, OsString)]) -> bool {
    env.iter()
        .any(|(key, value)| key == "TMUX" && !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{inside_tmux, run_with_runtime, Cli, Command};
    use crate::errors::DuxError;
    use crate::runtime::{
        FakeFileSystem, FakePortProbe, FakeProcessRunner, FakeTerminal, ProcessOutput,
        ProductionRuntime,
    };
    use clap::Parser;
    use std::ffi::OsString;
    use std::path::Path;
    use std::sync::Arc;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    fn runtime(runner: &FakeProcessRunner) -> ProductionRuntime {
        ProductionRuntime {
            file_system: Arc::new(FakeFileSystem::default()),
            process_runner: Arc::new(runner.clone()),
            terminal: Arc::new(FakeTerminal::default()),
            port_probe: Arc::new(FakePortProbe::default()),
        }
    }

    #[test]
    fn issue_list_is_comma_separated() {
        let cli = Cli::try_parse_from(args(&["dux", "create", "--issue", "4,7", "--no-pr"]))
            .expect("parse");
        let Command::Create(create) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(create.issue, vec![4, 7]);
        assert!(create.no_pr);
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert!(
            Cli::try_parse_from(args(&["dux", "create", "--issue", "1", "--new", "x"])).is_err()
        );
        assert!(Cli::try_parse_from(args(&[
            "dux",
            "create",
            "task",
            "--no-bootstrap",
            "--force-bootstrap"
        ]))
        .is_err());
        assert!(Cli::try_parse_from(args(&["dux", "create", "task", "--start"])).is_err());
    }

    #[test]
    fn help_exits_zero_and_bad_flags_are_cli_errors() {
        let runner = FakeProcessRunner::default();
        let rt = runtime(&runner);
        let code = run_with_runtime(&args(&["dux", "--help"]), &[], Path::new("/tmp"), &rt)
            .expect("help");
        assert_eq!(code, 0);
        let err = run_with_runtime(&args(&["dux", "--bogus"]), &[], Path::new("/tmp"), &rt)
            .expect_err("bad flag");
        assert!(matches!(err, DuxError::Cli(_)));
        assert!(runner.spawned().is_empty());
    }

    #[test]
    fn outside_a_repository_is_reported() {
        let runner = FakeProcessRunner::default();
        runner.respond_to(
            "worktree list",
            ProcessOutput::failed(128, "fatal: not a git repository"),
        );
        let err = run_with_runtime(
            &args(&["dux", "status"]),
            &[],
            Path::new("/tmp/elsewhere"),
            &runtime(&runner),
        )
        .expect_err("no repo");
        assert!(matches!(err, DuxError::RepositoryUnavailable(_)));
    }

    #[test]
    fn tmux_detection_ignores_empty_value() {
        assert!(inside_tmux(&[(
            OsString::from("TMUX"),
            OsString::from("/tmp/tmux-1000/default,1,0")
        )]));
        assert!(!inside_tmux(&[(OsString::from("TMUX"), OsString::new())]));
        assert!(!inside_tmux(&[]));
    }
}
