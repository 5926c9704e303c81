//! Operator-facing inputs: the link list, the interactive URL prompt and
//! the files a run needs before it starts.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::warn;

/// One URL per line; blank lines and `#` comments are skipped.
pub fn read_link_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        bail!(
            "link list {} is missing; create it with one URL per line",
            path.display()
        );
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_link_list(&content))
}

pub fn parse_link_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn prompt_line(prompt: &str) -> Result<String> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    prompt_from(&mut stdin.lock(), &mut stdout, prompt)
}

/// Prints `prompt`, reads one line and trims it. Empty input is an error.
pub fn prompt_from<R: BufRead, W: Write>(reader: &mut R, writer: &mut W, prompt: &str) -> Result<String> {
    write!(writer, "{prompt}").context("writing prompt")?;
    writer.flush().context("flushing prompt")?;
    let mut line = String::new();
    reader.read_line(&mut line).context("reading answer")?;
    let answer = line.trim();
    if answer.is_empty() {
        bail!("no input given");
    }
    Ok(answer.to_string())
}

/// Uses the positional argument when given, otherwise asks on stdin.
pub fn url_or_prompt(arg: Option<String>, prompt: &str) -> Result<String> {
    match arg.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => prompt_line(prompt),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieRequirement {
    /// The run stops when the cookie file is missing.
    Required,
    /// A missing cookie file is only warned about.
    Optional,
}

/// Returns whether the cookie file is present.
pub fn check_cookie_file(path: &Path, requirement: CookieRequirement) -> Result<bool> {
    if path.is_file() {
        return Ok(true);
    }
    match requirement {
        CookieRequirement::Required => bail!(
            "{} is missing; export your browser cookies (Netscape format) to this path",
            path.display()
        ),
        CookieRequirement::Optional => {
            warn!(
                "{} not found; continuing without cookies, some posts may be blocked",
                path.display()
            );
            Ok(false)
        }
    }
}

pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))
}
