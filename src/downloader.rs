//! Downloads selected videos through yt-dlp, one at a time.

use crate::metadata::{ExtractorOptions, VideoRecord};
use crate::runner::{ToolError, ToolRunner, run_checked};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// Exponential backoff for extractor calls: the delay before retry `n`
/// (1-based) is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is reached. `sleep` receives each backoff delay.
    pub fn run<T>(
        &self,
        mut sleep: impl FnMut(Duration),
        mut attempt: impl FnMut(u32) -> std::result::Result<T, ToolError>,
    ) -> std::result::Result<T, ToolError> {
        let max_attempts = self.max_attempts.max(1);
        let mut current = 1;
        loop {
            match attempt(current) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || current >= max_attempts => return Err(err),
                Err(err) => {
                    let delay = self.delay_before_retry(current);
                    warn!(
                        "attempt {current}/{max_attempts} failed, retrying in {}s: {}",
                        delay.as_secs(),
                        err.headline()
                    );
                    sleep(delay);
                    current += 1;
                }
            }
        }
    }
}

/// Format selection and container policy handed to yt-dlp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProfile {
    pub format: String,
    pub format_sort: Option<String>,
    pub merge_output_format: Option<String>,
    pub recode_video: Option<String>,
    pub write_description: bool,
    pub no_playlist: bool,
}

impl Default for DownloadProfile {
    /// Best video plus best audio, falling back to the best combined stream,
    /// ranked by resolution, bitrate, then frame rate.
    fn default() -> Self {
        Self {
            format: "bv*+ba/b".to_string(),
            format_sort: Some("res,br,fps".to_string()),
            merge_output_format: Some("mp4".to_string()),
            recode_video: None,
            write_description: false,
            no_playlist: true,
        }
    }
}

impl DownloadProfile {
    /// Prefers streams that are already mp4/m4a so no merge re-mux is needed.
    pub fn mp4_preferred() -> Self {
        Self {
            format: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
            format_sort: None,
            ..Self::default()
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-f".to_string(), self.format.clone()];
        if let Some(sort) = &self.format_sort {
            args.push("--format-sort".to_string());
            args.push(sort.clone());
        }
        if let Some(container) = &self.merge_output_format {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
        }
        if let Some(container) = &self.recode_video {
            args.push("--recode-video".to_string());
            args.push(container.clone());
        }
        if self.write_description {
            args.push("--write-description".to_string());
        }
        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }
        args
    }
}

/// File name pattern for downloads. `{index}` and `{index:02}` are replaced
/// with the run-local position; yt-dlp fields such as `%(id)s` pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate(String);

impl OutputTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, index: usize) -> String {
        self.0
            .replace("{index:02}", &format!("{index:02}"))
            .replace("{index}", &index.to_string())
    }

    pub fn path_in(&self, dir: &Path, index: usize) -> PathBuf {
        dir.join(self.render(index))
    }
}

/// Renders counts as `25,000`.
pub fn format_views(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, digit) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

/// Writes `<prefix>_<NN>_caption.txt` next to the downloads.
pub fn write_caption(dir: &Path, prefix: &str, index: usize, record: &VideoRecord) -> Result<PathBuf> {
    let path = dir.join(format!("{prefix}_{index:02}_caption.txt"));
    let contents = format!(
        "VIDEO TITLE: {}\nSOURCE URL: {}\nVIEWS: {}\n{}\nCAPTION:\n{}",
        record.title,
        record.url,
        format_views(record.view_count),
        "-".repeat(30),
        record.description
    );
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Result of one download attempt, kept only for the final summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub index: usize,
    pub url: String,
    /// Final file reported by yt-dlp, when it told us.
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl DownloadOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub outcomes: Vec<DownloadOutcome>,
}

impl DownloadSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn downloaded_files(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.succeeded())
            .filter_map(|outcome| outcome.path.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub template: OutputTemplate,
    pub profile: DownloadProfile,
    /// Caption files are written with this prefix when set.
    pub caption_prefix: Option<String>,
    pub item_delay: Duration,
    pub retry: RetryPolicy,
    /// Stop once this many downloads succeeded.
    pub limit: Option<usize>,
}

pub struct Downloader<'a> {
    runner: &'a dyn ToolRunner,
    options: ExtractorOptions,
    settings: DownloadSettings,
}

impl<'a> Downloader<'a> {
    pub fn new(runner: &'a dyn ToolRunner, options: ExtractorOptions, settings: DownloadSettings) -> Self {
        Self {
            runner,
            options,
            settings,
        }
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    fn download_args(&self, index: usize, url: &str) -> Vec<String> {
        let mut args = self.options.base_args();
        args.extend(self.settings.profile.args());
        args.push("-o".to_string());
        args.push(
            self.settings
                .template
                .path_in(&self.settings.output_dir, index)
                .to_string_lossy()
                .into_owned(),
        );
        // Printing the final path turns on simulation unless told otherwise.
        args.push("--no-simulate".to_string());
        args.push("--print".to_string());
        args.push("after_move:filepath".to_string());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    /// Downloads one URL under the retry policy and returns the file path
    /// yt-dlp reported.
    pub fn download(&self, index: usize, url: &str) -> std::result::Result<Option<PathBuf>, ToolError> {
        let args = self.download_args(index, url);
        let output = self.settings.retry.run(thread::sleep, |_| {
            run_checked(self.runner, &self.options.program, &args)
        })?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from))
    }

    /// Downloads each selected record, writing caption files when configured.
    pub fn download_records(&self, records: &[VideoRecord]) -> DownloadSummary {
        let jobs: Vec<(&str, Option<&VideoRecord>)> = records
            .iter()
            .map(|record| (record.url.as_str(), Some(record)))
            .collect();
        self.run_batch(&jobs)
    }

    pub fn download_urls<S: AsRef<str>>(&self, urls: &[S]) -> DownloadSummary {
        let jobs: Vec<(&str, Option<&VideoRecord>)> =
            urls.iter().map(|url| (url.as_ref(), None)).collect();
        self.run_batch(&jobs)
    }

    fn run_batch(&self, jobs: &[(&str, Option<&VideoRecord>)]) -> DownloadSummary {
        let total = jobs.len();
        let mut summary = DownloadSummary::default();

        for (position, (url, record)) in jobs.iter().enumerate() {
            if let Some(limit) = self.settings.limit
                && summary.succeeded() >= limit
            {
                info!("download limit of {limit} reached");
                break;
            }
            if position > 0 && !self.settings.item_delay.is_zero() {
                thread::sleep(self.settings.item_delay);
            }

            let index = position + 1;
            match record {
                Some(record) => println!(
                    "\n[{index:02}/{total}] Processing: {}",
                    record.title.chars().take(40).collect::<String>()
                ),
                None => println!("\n[{index}/{total}] Target: {url}"),
            }

            if let (Some(prefix), Some(record)) = (&self.settings.caption_prefix, record) {
                match write_caption(&self.settings.output_dir, prefix, index, record) {
                    Ok(path) => println!("    -> Caption saved: {}", path.display()),
                    Err(err) => warn!("could not save caption for {url}: {err:#}"),
                }
            }

            let outcome = match self.download(index, url) {
                Ok(path) => {
                    println!("    -> Success!");
                    DownloadOutcome {
                        index,
                        url: url.to_string(),
                        path,
                        error: None,
                    }
                }
                Err(err) => {
                    match &err {
                        ToolError::Blocked(_) => {
                            warn!("extraction blocked for {url}, skipping")
                        }
                        ToolError::Authentication(_) => {
                            warn!("{url} needs a login or is private, skipping")
                        }
                        _ => warn!("failed to download {url}: {}", err.headline()),
                    }
                    DownloadOutcome {
                        index,
                        url: url.to_string(),
                        path: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            summary.outcomes.push(outcome);
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DEFAULT_DESCRIPTION;
    use crate::runner::ToolOutput;
    use std::cell::{Cell, RefCell};
    use tempfile::tempdir;

    fn settings(dir: &Path) -> DownloadSettings {
        DownloadSettings {
            output_dir: dir.to_path_buf(),
            template: OutputTemplate::new("viral_{index:02}_%(id)s.%(ext)s"),
            profile: DownloadProfile::default(),
            caption_prefix: None,
            item_delay: Duration::ZERO,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
            },
            limit: None,
        }
    }

    fn options() -> ExtractorOptions {
        ExtractorOptions {
            program: "yt-dlp".into(),
            ..ExtractorOptions::default()
        }
    }

    fn record(url: &str, views: u64) -> VideoRecord {
        VideoRecord {
            url: url.into(),
            id: Some("id1".into()),
            title: "A clip".into(),
            view_count: views,
            upload_date: None,
            description: DEFAULT_DESCRIPTION.into(),
        }
    }

    #[test]
    fn retry_stops_immediately_on_authentication_failure() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        };
        let mut attempts = 0;
        let mut delays = Vec::new();
        let result: std::result::Result<(), ToolError> = policy.run(
            |delay| delays.push(delay),
            |_| {
                attempts += 1;
                Err(ToolError::from_output(
                    "yt-dlp",
                    &ToolOutput::failed(1, "ERROR: login required"),
                ))
            },
        );
        assert!(matches!(result, Err(ToolError::Authentication(_))));
        assert_eq!(attempts, 1);
        assert!(delays.is_empty());
    }

    #[test]
    fn retry_backs_off_until_attempts_run_out() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
        };
        let mut attempts = Vec::new();
        let mut delays = Vec::new();
        let result: std::result::Result<(), ToolError> = policy.run(
            |delay| delays.push(delay),
            |attempt| {
                attempts.push(attempt);
                Err(ToolError::from_output(
                    "yt-dlp",
                    &ToolOutput::failed(1, format!("HTTP Error 503 on attempt {attempt}")),
                ))
            },
        );
        assert_eq!(attempts, [1, 2, 3, 4]);
        assert_eq!(
            delays,
            [
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("attempt 4"));
    }

    #[test]
    fn retry_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let mut delays = Vec::new();
        let value = policy
            .run(
                |delay| delays.push(delay),
                |attempt| {
                    if attempt < 2 {
                        Err(ToolError::from_output("yt-dlp", &ToolOutput::failed(1, "timeout")))
                    } else {
                        Ok(attempt)
                    }
                },
            )
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(delays.len(), 1);
    }

    #[test]
    fn profile_args_cover_policy() {
        let args = DownloadProfile::default().args();
        assert_eq!(
            args,
            [
                "-f",
                "bv*+ba/b",
                "--format-sort",
                "res,br,fps",
                "--merge-output-format",
                "mp4",
                "--no-playlist"
            ]
        );

        let recode = DownloadProfile {
            recode_video: Some("mp4".into()),
            write_description: true,
            ..DownloadProfile::mp4_preferred()
        };
        let args = recode.args();
        assert!(args.windows(2).any(|pair| pair == ["--recode-video", "mp4"]));
        assert!(args.contains(&"--write-description".to_string()));
        assert!(!args.contains(&"--format-sort".to_string()));
    }

    #[test]
    fn output_template_expands_index() {
        let template = OutputTemplate::new("viral_{index:02}_%(id)s.%(ext)s");
        assert_eq!(template.render(3), "viral_03_%(id)s.%(ext)s");
        let plain = OutputTemplate::new("video_{index}_%(id)s.%(ext)s");
        assert_eq!(plain.render(12), "video_12_%(id)s.%(ext)s");
        assert_eq!(
            plain.path_in(Path::new("out"), 1),
            PathBuf::from("out/video_1_%(id)s.%(ext)s")
        );
    }

    #[test]
    fn format_views_groups_thousands() {
        assert_eq!(format_views(0), "0");
        assert_eq!(format_views(999), "999");
        assert_eq!(format_views(25_000), "25,000");
        assert_eq!(format_views(1_234_567), "1,234,567");
    }

    #[test]
    fn caption_file_contains_record_details() -> Result<()> {
        let dir = tempdir()?;
        let path = write_caption(dir.path(), "viral", 4, &record("https://x.test/v/1", 30_000))?;
        assert_eq!(path.file_name().unwrap(), "viral_04_caption.txt");
        let text = fs::read_to_string(path)?;
        assert!(text.starts_with("VIDEO TITLE: A clip\nSOURCE URL: https://x.test/v/1\nVIEWS: 30,000\n"));
        assert!(text.contains(&"-".repeat(30)));
        assert!(text.ends_with(&format!("CAPTION:\n{DEFAULT_DESCRIPTION}")));
        Ok(())
    }

    #[test]
    fn download_builds_arguments_and_reads_final_path() -> Result<()> {
        let dir = tempdir()?;
        let seen = RefCell::new(Vec::new());
        let runner = |_: &str, args: &[String]| -> Result<ToolOutput> {
            seen.borrow_mut().push(args.to_vec());
            Ok(ToolOutput::ok("[download] 100%\n/out/viral_01_abc.mp4\n"))
        };
        let downloader = Downloader::new(&runner, options(), settings(dir.path()));
        let path = downloader.download(1, "https://x.test/reel/abc").unwrap();
        assert_eq!(path, Some(PathBuf::from("/out/viral_01_abc.mp4")));

        let seen = seen.borrow();
        let args = &seen[0];
        let output = args.iter().position(|arg| arg == "-o").unwrap();
        assert!(args[output + 1].ends_with("viral_01_%(id)s.%(ext)s"));
        assert!(args.windows(2).any(|pair| pair == ["--print", "after_move:filepath"]));
        assert_eq!(args.last().unwrap(), "https://x.test/reel/abc");
        Ok(())
    }

    #[test]
    fn transient_failures_use_every_attempt() -> Result<()> {
        let dir = tempdir()?;
        let calls = Cell::new(0);
        let runner = |_: &str, _: &[String]| -> Result<ToolOutput> {
            calls.set(calls.get() + 1);
            Ok(ToolOutput::failed(1, "ERROR: Read timed out"))
        };
        let downloader = Downloader::new(&runner, options(), settings(dir.path()));
        let err = downloader.download(1, "https://x.test/reel/abc").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.get(), 3);
        Ok(())
    }

    #[test]
    fn private_posts_are_not_retried() -> Result<()> {
        let dir = tempdir()?;
        let calls = Cell::new(0);
        let runner = |_: &str, _: &[String]| -> Result<ToolOutput> {
            calls.set(calls.get() + 1);
            Ok(ToolOutput::failed(1, "ERROR: This account is private"))
        };
        let downloader = Downloader::new(&runner, options(), settings(dir.path()));
        let err = downloader.download(1, "https://x.test/reel/abc").unwrap_err();
        assert!(matches!(err, ToolError::Authentication(_)));
        assert_eq!(calls.get(), 1);
        Ok(())
    }

    #[test]
    fn batch_continues_past_failures_and_writes_captions() -> Result<()> {
        let dir = tempdir()?;
        let runner = |_: &str, args: &[String]| -> Result<ToolOutput> {
            let url = args.last().unwrap();
            if url.ends_with("/2") {
                Ok(ToolOutput::failed(1, "ERROR: Unable to extract video data"))
            } else {
                Ok(ToolOutput::ok(format!("{url}.mp4\n")))
            }
        };
        let mut batch = settings(dir.path());
        batch.caption_prefix = Some("viral".into());
        let downloader = Downloader::new(&runner, options(), batch);
        let records = vec![
            record("https://x.test/v/1", 3),
            record("https://x.test/v/2", 2),
            record("https://x.test/v/3", 1),
        ];
        let summary = downloader.download_records(&records);

        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.outcomes[1].succeeded());
        assert!(summary.outcomes[1].error.as_deref().unwrap().contains("blocked"));
        assert_eq!(summary.downloaded_files().count(), 2);
        for index in 1..=3 {
            assert!(dir.path().join(format!("viral_{index:02}_caption.txt")).exists());
        }
        Ok(())
    }

    #[test]
    fn batch_stops_after_success_limit() -> Result<()> {
        let dir = tempdir()?;
        let runner = |_: &str, args: &[String]| -> Result<ToolOutput> {
            let url = args.last().unwrap();
            if url.ends_with("/1") {
                Ok(ToolOutput::failed(1, "ERROR: private"))
            } else {
                Ok(ToolOutput::ok(""))
            }
        };
        let mut capped = settings(dir.path());
        capped.limit = Some(2);
        let downloader = Downloader::new(&runner, options(), capped);
        let urls = [
            "https://x.test/p/1",
            "https://x.test/p/2",
            "https://x.test/p/3",
            "https://x.test/p/4",
        ];
        let summary = downloader.download_urls(&urls);
        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.outcomes[2].index, 3);
        assert!(summary.outcomes[2].path.is_none());
        Ok(())
    }
}
