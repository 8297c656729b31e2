//! Compile-only check through `vector vrl`.
//!
//! The CLI has no compile-only mode, so the program runs once against an
//! empty event. Runtime failures on that event still mean it compiled.

use crate::error::{ForgeError, ForgeResult};
use crate::util::{run_command_with_timeout, truncate};
use std::fs;
use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

const RUNTIME_ERROR_CODE: &str = "error[E000]";
const RUNTIME_ERROR_MARKER: &str = "function call error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub ok: bool,
    pub error_text: Option<String>,
    pub timed_out: bool,
}

impl CheckResult {
    pub fn passed() -> Self {
        Self {
            ok: true,
            error_text: None,
            timed_out: false,
        }
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_text: Some(error_text.into()),
            timed_out: false,
        }
    }
}

/// Compiles a program without running it against real events.
///
/// `Err` is reserved for infrastructure trouble (missing binary, unwritable
/// temp dir); a program that does not compile is an `Ok` failed result.
pub trait Checker: Send + Sync {
    fn compile(&self, code: &str) -> ForgeResult<CheckResult>;
}

pub struct VectorChecker {
    binary: String,
    timeout: Duration,
}

impl VectorChecker {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Checker for VectorChecker {
    fn compile(&self, code: &str) -> ForgeResult<CheckResult> {
        let dir = tempfile::Builder::new()
            .prefix("vrl-forge-check-")
            .tempdir()
            .map_err(ForgeError::infrastructure)?;
        let program = dir.path().join("program.vrl");
        let input = dir.path().join("input.json");
        fs::write(&program, code).map_err(ForgeError::infrastructure)?;
        fs::write(&input, "{}\n").map_err(ForgeError::infrastructure)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("vrl")
            .arg("--input")
            .arg(&input)
            .arg("--program")
            .arg(&program)
            .arg("--print-object");

        let result = run_command_with_timeout(&mut cmd, self.timeout).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ForgeError::Infrastructure(format!("'{}' binary not found on PATH", self.binary))
            } else {
                ForgeError::Infrastructure(format!("failed to run '{}': {}", self.binary, e))
            }
        })?;

        if result.timed_out {
            return Ok(CheckResult {
                ok: false,
                error_text: Some(format!(
                    "compile check exceeded {}s",
                    self.timeout.as_secs()
                )),
                timed_out: true,
            });
        }

        let output = result.combined_output();
        if compiled(result.success(), &output) {
            if !result.success() {
                debug!(diagnostic = %first_error_line(&output), "runtime error on empty event; program compiled");
            }
            return Ok(CheckResult::passed());
        }
        let text = if output.trim().is_empty() {
            format!(
                "compile check failed with status {}",
                result
                    .status
                    .and_then(|s| s.code())
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            )
        } else {
            truncate(&output, 4000)
        };
        Ok(CheckResult::failed(text))
    }
}

fn is_runtime_diagnostic(line: &str) -> bool {
    line.contains(RUNTIME_ERROR_CODE) || line.contains(RUNTIME_ERROR_MARKER)
}

/// True unless the output carries a compile diagnostic.
fn compiled(success: bool, output: &str) -> bool {
    let mut coded = output.lines().filter(|l| l.contains("error[E")).peekable();
    if coded.peek().is_none() {
        return success || output.contains(RUNTIME_ERROR_MARKER);
    }
    coded.all(is_runtime_diagnostic)
}

/// First line naming a compiler error code, else the first non-empty line.
pub fn first_error_line(text: &str) -> String {
    text.lines()
        .find(|l| l.contains("error[E"))
        .or_else(|| text.lines().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_line_prefers_coded_line() {
        let text = "\n  warning: something\nerror[E103]: unhandled fallible assignment\n  ┌─ :1:1";
        assert_eq!(first_error_line(text), "error[E103]: unhandled fallible assignment");
        assert_eq!(first_error_line("\n\nboom\nmore"), "boom");
        assert_eq!(first_error_line(""), "");
    }

    #[test]
    fn runtime_diagnostics_do_not_fail_compilation() {
        let runtime = "error[E000]: function call error for \"parse_syslog\" at (0:25): unable to parse input as valid syslog message";
        assert!(compiled(false, runtime));
        assert!(compiled(false, "function call error for \"parse_json\" at (5:22): unable to parse json"));
        assert!(!compiled(false, "error[E103]: unhandled fallible assignment"));
        assert!(!compiled(false, &format!("{runtime}\nerror[E110]: invalid argument type")));
        assert!(!compiled(false, "Error: could not read program"));
        assert!(compiled(true, "{}"));
    }

    #[test]
    fn missing_binary_is_infrastructure() {
        let checker = VectorChecker::new("definitely-not-vector-vrl-forge", Duration::from_secs(1));
        let err = checker.compile(".a = 1").unwrap_err();
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_failed_check() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-vector");
        fs::write(
            &fake,
            "#!/bin/sh\necho 'error[E203]: syntax error' 1>&2\nexit 1\n",
        )
        .unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let checker = VectorChecker::new(fake.to_string_lossy(), Duration::from_secs(5));
        let result = checker.compile("if {").unwrap();
        assert!(!result.ok);
        assert!(!result.timed_out);
        assert!(result.error_text.unwrap().contains("error[E203]"));
    }

    #[cfg(unix)]
    #[test]
    fn runtime_error_on_empty_event_passes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-vector");
        fs::write(
            &fake,
            "#!/bin/sh\necho 'error[E000]: function call error for \"parse_syslog\" at (0:25): unable to parse input as valid syslog message' 1>&2\nexit 1\n",
        )
        .unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let checker = VectorChecker::new(fake.to_string_lossy(), Duration::from_secs(5));
        let result = checker.compile(". = parse_syslog!(.message)").unwrap();
        assert!(result.ok);
        assert!(result.error_text.is_none());
    }
}
