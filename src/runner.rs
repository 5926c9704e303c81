#![forbid(unsafe_code)]

//! Thin seam around the external command-line tools (yt-dlp, ffmpeg).
//!
//! Everything that shells out goes through [`ToolRunner`] so tests can feed
//! canned outputs instead of spawning real binaries.

use anyhow::{Context, Result, bail};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Captured result of one external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best diagnostic text for a failed run: stderr, or stdout when the tool
    /// printed its complaint there.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// `run(args) -> (exit_code, stdout, stderr)`.
pub trait ToolRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput>;
}

impl<F> ToolRunner for F
where
    F: Fn(&str, &[String]) -> Result<ToolOutput>,
{
    fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        self(program, args)
    }
}

/// Spawns the real binary and blocks until it exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        tracing::debug!("running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning {program}"))?;
        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

const AUTH_MARKERS: [&str; 2] = ["login", "private"];
const BLOCK_MARKER: &str = "unable to extract";

/// Classified failure of an extractor invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("could not run {program}: {cause:#}")]
    Spawn {
        program: String,
        cause: anyhow::Error,
    },
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("extraction blocked: {0}")]
    Blocked(String),
    #[error("{program} failed (status {status}): {message}")]
    Failed {
        program: String,
        status: String,
        message: String,
    },
}

impl ToolError {
    /// Classifies a non-successful run by the text the tool printed.
    pub fn from_output(program: &str, output: &ToolOutput) -> Self {
        let message = output.diagnostic();
        let lowered = message.to_ascii_lowercase();
        if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return ToolError::Authentication(message);
        }
        if lowered.contains(BLOCK_MARKER) {
            return ToolError::Blocked(message);
        }
        ToolError::Failed {
            program: program.to_string(),
            status: output
                .status
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            message,
        }
    }

    pub fn spawn(program: &str, cause: anyhow::Error) -> Self {
        ToolError::Spawn {
            program: program.to_string(),
            cause,
        }
    }

    /// Only plain failures are worth another attempt; login walls, private
    /// posts and extractor blocks will not change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Failed { .. })
    }

    /// First line of the diagnostic, short enough for a progress line.
    pub fn headline(&self) -> String {
        let text = self.to_string();
        text.lines().next().unwrap_or_default().to_string()
    }
}

/// Runs `program` and converts a non-zero exit into a classified [`ToolError`].
pub fn run_checked(
    runner: &dyn ToolRunner,
    program: &str,
    args: &[String],
) -> std::result::Result<ToolOutput, ToolError> {
    let output = runner
        .run(program, args)
        .map_err(|err| ToolError::spawn(program, err))?;
    if output.success() {
        Ok(output)
    } else {
        Err(ToolError::from_output(program, &output))
    }
}

/// Runs `<name> --version` to fail loudly when dependencies such as yt-dlp or
/// ffmpeg are missing.
pub fn ensure_program_available(runner: &dyn ToolRunner, name: &str) -> Result<()> {
    // ffmpeg only understands the single-dash spelling.
    let flag = if name.ends_with("ffmpeg") {
        "-version"
    } else {
        "--version"
    };
    match runner.run(name, &[flag.to_string()]) {
        Ok(output) if output.success() => Ok(()),
        Ok(_) => bail!("{name} is installed but returned a failure status"),
        Err(err) => bail!("{name} is not installed or not in PATH: {err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classifies_login_and_private_as_authentication() {
        let login = ToolOutput::failed(1, "ERROR: [instagram] abc: Requested content requires LOGIN");
        assert!(matches!(
            ToolError::from_output("yt-dlp", &login),
            ToolError::Authentication(_)
        ));

        let private = ToolOutput::failed(1, "ERROR: This video is Private");
        let err = ToolError::from_output("yt-dlp", &private);
        assert!(matches!(err, ToolError::Authentication(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn classifies_unable_to_extract_as_blocked() {
        let output = ToolOutput::failed(1, "ERROR: [TikTok] 123: Unable to extract universal data");
        let err = ToolError::from_output("yt-dlp", &output);
        assert!(matches!(err, ToolError::Blocked(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_failures_are_retryable_and_keep_status() {
        let output = ToolOutput::failed(2, "HTTP Error 503: Service Unavailable\nmore");
        let err = ToolError::from_output("yt-dlp", &output);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("status 2"));
        assert_eq!(
            err.headline(),
            "yt-dlp failed (status 2): HTTP Error 503: Service Unavailable"
        );
    }

    #[test]
    fn diagnostic_falls_back_to_stdout() {
        let output = ToolOutput {
            status: Some(1),
            stdout: "  only stdout  ".into(),
            stderr: "   ".into(),
        };
        assert_eq!(output.diagnostic(), "only stdout");
    }

    #[test]
    fn run_checked_wraps_spawn_errors() {
        let runner = |_: &str, _: &[String]| -> Result<ToolOutput> { Err(anyhow!("no such file")) };
        let err = run_checked(&runner, "yt-dlp", &[]).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn ensure_program_available_uses_single_dash_for_ffmpeg() {
        let runner = |program: &str, args: &[String]| -> Result<ToolOutput> {
            if program == "ffmpeg" && args == ["-version"] {
                Ok(ToolOutput::ok("ffmpeg version 7"))
            } else {
                Ok(ToolOutput::failed(1, "bad flag"))
            }
        };
        assert!(ensure_program_available(&runner, "ffmpeg").is_ok());
        assert!(ensure_program_available(&runner, "yt-dlp").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_streams() -> Result<()> {
        let output = SystemRunner.run(
            "sh",
            &["-c".into(), "echo out; echo err >&2; exit 3".into()],
        )?;
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        Ok(())
    }
}
