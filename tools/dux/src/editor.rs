use crate::errors::DuxError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::Path;

/// Opens `dir` in a new VS Code window. Callers treat failure as a warning.
pub fn open_in_editor(runner: &dyn ProcessRunner, dir: &Path) -> Result<(), DuxError> {
    let path = dir.display().to_string();
    let out = runner
        .run(ProcessRequest::new("code", ["-n", path.as_str()], None))
        .map_err(|e| DuxError::external("code", e.to_string()))?;
    if out.exit_code != 0 {
        return Err(DuxError::external("code", out.stderr.trim()));
    }
    append_run_log("debug", "editor.opened", json!({ "path": path }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::open_in_editor;
    use crate::errors::DuxError;
    use crate::runtime::{FakeProcessRunner, ProcessOutput};
    use std::path::Path;

    #[test]
    fn opens_new_window_and_maps_missing_binary() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok("")));
        open_in_editor(&runner, Path::new("/repo/.wt/work/a")).expect("opened");
        assert_eq!(runner.command_lines(), vec!["code -n /repo/.wt/work/a".to_string()]);

        runner.fail_to_spawn("code", "No such file or directory");
        let err = open_in_editor(&runner, Path::new("/repo")).expect_err("missing");
        assert!(matches!(err, DuxError::ExternalToolFailure { .. }));
    }
}
