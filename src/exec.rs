//! External command execution and small /proc and /sys reads.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};

use crate::error::GrowError;

/// Runs external tools on behalf of the resizers.
///
/// Read-only commands always run. Exactly two call sites mutate the disk
/// through [`Executor::run_gated`] — the filesystem grow command and the
/// sfdisk table write — and those print what they would have done instead
/// when `dry_run` is set.
pub struct Executor {
    pub dry_run: bool,
    pub verbose: bool,
}

impl Executor {
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self { dry_run, verbose }
    }

    pub fn vlog(&self, message: &str) {
        if self.verbose {
            println!("{}", message);
        }
    }

    /// Spawn a command and collect its output. Errors only when the
    /// program could not be started; callers inspect the exit status.
    pub fn output(&self, program: &str, args: &[&str]) -> Result<Output> {
        Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {}", program))
    }

    /// Run a read-only command and return its stdout, failing with the
    /// captured stderr when the tool exits non-zero.
    pub fn capture(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.output(program, args)?;
        if !output.status.success() {
            return Err(tool_failure(program, args, &output).into());
        }
        String::from_utf8(output.stdout)
            .with_context(|| format!("{} produced non-UTF-8 output", program))
    }

    /// Run a command that mutates on-disk state, honouring dry-run mode.
    pub fn run_gated(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<()> {
        let rendered = format!("{} {}", program, args.join(" "));
        if self.dry_run {
            println!("[DRY RUN] {}", rendered);
            if let Some(input) = stdin {
                for line in input.trim_end().lines() {
                    println!("[DRY RUN]   | {}", line);
                }
            }
            return Ok(());
        }
        self.vlog(&format!("Running {} ...", rendered));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to run {}", program))?;
        if let Some(input) = stdin {
            let mut pipe = child.stdin.take().context("child stdin not captured")?;
            pipe.write_all(input.as_bytes())
                .with_context(|| format!("writing stdin of {}", program))?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(tool_failure(program, args, &output).into());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            self.vlog(stdout.trim_end());
        }
        Ok(())
    }
}

/// Build the typed failure for a finished command with a non-zero exit.
pub fn tool_failure(program: &str, args: &[&str], output: &Output) -> GrowError {
    GrowError::ExternalToolFailed {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
    }
}

/// Read a small text file, e.g. from /proc or /sys.
pub fn read_small_file(path: &str) -> Result<String, GrowError> {
    std::fs::read_to_string(path).map_err(|source| GrowError::IoFailed {
        path: path.to_string(),
        source,
    })
}

/// Read a whitespace-trimmed decimal integer from a /sys attribute file.
pub fn read_u64_file(path: &str) -> Result<u64, GrowError> {
    let text = read_small_file(path)?;
    text.trim().parse().map_err(|_| GrowError::ParseFailed {
        what: "integer file contents",
        input: text.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_read_u64_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10485760").unwrap();

        let n = read_u64_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(n, 10485760);
    }

    #[test]
    fn test_read_u64_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a number").unwrap();

        let err = read_u64_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, GrowError::ParseFailed { .. }));
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let err = read_small_file("/nonexistent/growdisk-test").unwrap_err();
        assert!(matches!(err, GrowError::IoFailed { .. }));
    }
}
