use std::ffi::OsStr;
use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;

use super::interrupt;

/// A host binary could not be started at all.
#[derive(Debug, Error)]
#[error("sh: {program}: {reason}")]
pub struct SpawnError {
    pub program: String,
    pub reason: io::Error,
}

impl SpawnError {
    fn new(program: &OsStr, reason: io::Error) -> Self {
        Self {
            program: program.to_string_lossy().to_string(),
            reason,
        }
    }
}

/// Captured result of an external invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed stdout, the way every caller wants to read it.
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// Stdout followed by stderr, both trimmed, skipping empty parts.
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn run_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> Result<CommandOutput, SpawnError> {
    log::debug!("run {:?} {:?}", program, display_args(args));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| SpawnError::new(program, err))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

/// Runs a child on the controlling terminal. Interrupts reach the child only;
/// the shell keeps running once the child is gone.
pub fn run_attached<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> Result<Option<i32>, SpawnError> {
    log::debug!("attach {:?} {:?}", program, display_args(args));

    let _guard = interrupt::Passthrough::enter();
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|err| SpawnError::new(program, err))?;

    if status.code().is_none() {
        // killed by the interrupt, leave the prompt on a fresh line
        println!();
    }
    Ok(status.code())
}

fn display_args<S: AsRef<OsStr>>(args: &[S]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.as_ref().to_string_lossy().to_string())
        .collect()
}

/// Quotes a value for a POSIX shell on the device.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Writes an executable `sh` script standing in for a host tool.
#[cfg(all(test, unix))]
pub(crate) fn fake_binary(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_skips_empty_streams() {
        let output = CommandOutput {
            stdout: "hello\n".to_string(),
            stderr: "  ".to_string(),
            exit_code: Some(0),
        };
        assert!(output.success());
        assert_eq!(output.combined(), "hello");

        let output = CommandOutput {
            stdout: String::new(),
            stderr: "boom\n".to_string(),
            exit_code: Some(1),
        };
        assert!(!output.success());
        assert_eq!(output.combined(), "boom");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/sdcard"), "'/sdcard'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_captures_both_streams() {
        let output = run_command(
            OsStr::new("sh"),
            &["-c", "echo out; echo err 1>&2; exit 3"],
        )
        .expect("sh should be available");
        assert_eq!(output.text(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = run_command(OsStr::new("/nonexistent/frida"), &["--version"]).unwrap_err();
        assert_eq!(err.program, "/nonexistent/frida");
        assert_eq!(err.reason.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().starts_with("sh: /nonexistent/frida: "));

        let err = run_attached(OsStr::new("/nonexistent/pip"), &["list"]).unwrap_err();
        assert_eq!(err.program, "/nonexistent/pip");
    }
}
