use crate::errors::DuxError;
use std::collections::{BTreeSet, HashMap};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessRequest {
    pub fn new<I, S>(program: &str, args: I, cwd: Option<&Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(|s| s.as_ref().to_string()).collect(),
            cwd: cwd.map(Path::to_path_buf),
        }
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait ProcessRunner: Send + Sync {
    /// Runs to completion with stdout/stderr captured.
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DuxError>;

    /// Runs in the foreground with the caller's stdio and returns the exit code.
    /// No timeout is applied; interruption is left to the terminal.
    fn run_attached(&self, request: ProcessRequest) -> Result<i32, DuxError> {
        self.run(request).map(|out| out.exit_code)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, DuxError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), DuxError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), DuxError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), DuxError>;
}

/// Live check that nothing is listening on a local TCP port.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DuxError> {
        std::fs::read_to_string(path)
            .map_err(|e| DuxError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), DuxError> {
        std::fs::write(path, contents).map_err(|e| DuxError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), DuxError> {
        std::fs::create_dir_all(path)
            .map_err(|e| DuxError::Io(format!("{}: {e}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DuxError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::null());
        let output = cmd
            .output()
            .map_err(|e| DuxError::Process(format!("{}: {e}", request.program)))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn run_attached(&self, request: ProcessRequest) -> Result<i32, DuxError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        let status = cmd
            .status()
            .map_err(|e| DuxError::Process(format!("{}: {e}", request.program)))?;
        Ok(status.code().unwrap_or(-1))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), DuxError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| DuxError::Io(e.to_string()))
    }
}

pub struct ProductionPortProbe;

impl PortProbe for ProductionPortProbe {
    fn is_free(&self, port: u16) -> bool {
        // The listener is dropped immediately; the port is not held.
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
    pub port_probe: Arc<dyn PortProbe>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner),
            terminal: Arc::new(ProductionTerminal),
            port_probe: Arc::new(ProductionPortProbe),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    read_only: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    /// Writes to `path` fail with a permission error from now on.
    pub fn deny_writes_to(&self, path: impl Into<PathBuf>) {
        self.read_only
            .lock()
            .expect("read_only lock")
            .insert(path.into());
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DuxError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| DuxError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), DuxError> {
        if self.read_only.lock().expect("read_only lock").contains(path) {
            return Err(DuxError::Io(format!("{}: permission denied", path.display())));
        }
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), DuxError> {
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
            || self
                .dirs
                .lock()
                .expect("dirs lock")
                .iter()
                .any(|dir| dir.starts_with(path))
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), DuxError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

type ScriptedResponse = (String, Result<ProcessOutput, String>);

/// Answers from the most recent scripted pattern contained in the command
/// line, then from the FIFO queue.
#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, DuxError>>>>,
    scripted: Arc<Mutex<Vec<ScriptedResponse>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    attached: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, DuxError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    pub fn respond_to(&self, pattern: impl Into<String>, output: ProcessOutput) {
        self.scripted
            .lock()
            .expect("scripted lock")
            .push((pattern.into(), Ok(output)));
    }

    pub fn fail_to_spawn(&self, pattern: impl Into<String>, message: impl Into<String>) {
        self.scripted
            .lock()
            .expect("scripted lock")
            .push((pattern.into(), Err(message.into())));
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn attached(&self) -> Vec<ProcessRequest> {
        self.attached.lock().expect("attached lock").clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.spawned()
            .iter()
            .map(ProcessRequest::command_line)
            .collect()
    }

    fn respond(&self, request: &ProcessRequest) -> Result<ProcessOutput, DuxError> {
        let line = request.command_line();
        let scripted = self
            .scripted
            .lock()
            .expect("scripted lock")
            .iter()
            .rev()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());
        if let Some(response) = scripted {
            return response.map_err(DuxError::Process);
        }
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(DuxError::Process(format!(
                "no fake response queued for `{line}`"
            )));
        }
        responses.remove(0)
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DuxError> {
        self.spawned
            .lock()
            .expect("spawned lock")
            .push(request.clone());
        self.respond(&request)
    }

    fn run_attached(&self, request: ProcessRequest) -> Result<i32, DuxError> {
        self.attached
            .lock()
            .expect("attached lock")
            .push(request.clone());
        self.run(request).map(|out| out.exit_code)
    }
}

/// Ports listed in `bound` report as taken; every other port is free.
#[derive(Default, Clone)]
pub struct FakePortProbe {
    bound: Arc<Mutex<BTreeSet<u16>>>,
    probed: Arc<Mutex<Vec<u16>>>,
}

impl FakePortProbe {
    pub fn with_bound(ports: impl IntoIterator<Item = u16>) -> Self {
        let probe = Self::default();
        probe
            .bound
            .lock()
            .expect("bound lock")
            .extend(ports);
        probe
    }

    pub fn bind(&self, port: u16) {
        self.bound.lock().expect("bound lock").insert(port);
    }

    pub fn probed(&self) -> Vec<u16> {
        self.probed.lock().expect("probed lock").clone()
    }
}

impl PortProbe for FakePortProbe {
    fn is_free(&self, port: u16) -> bool {
        self.probed.lock().expect("probed lock").push(port);
        !self.bound.lock().expect("bound lock").contains(&port)
    }
}
