//! Video metadata as reported by yt-dlp's `--dump-json`, plus the fetcher
//! that asks for it.
//!
//! Only the handful of fields the selector and caption writer need are kept;
//! everything is optional on the wire because extractors disagree on what
//! they fill in.

use crate::downloader::RetryPolicy;
use crate::runner::{ToolError, ToolRunner, run_checked};
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use tracing::{debug, info, warn};

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_DESCRIPTION: &str = "No caption provided.";

/// Calendar date in yt-dlp's `YYYYMMDD` form. Ordering matches the
/// lexicographic order of the 8-digit string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UploadDate(NaiveDate);

impl UploadDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl FromStr for UploadDate {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.len() != 8 || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            bail!("expected an 8-digit YYYYMMDD date, got {value:?}");
        }
        let year = trimmed[0..4].parse()?;
        let month = trimmed[4..6].parse()?;
        let day = trimmed[6..8].parse()?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| anyhow!("{value:?} is not a calendar date"))
    }
}

impl fmt::Display for UploadDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl Serialize for UploadDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One video as seen by the selector and downloader. Built once from the
/// extractor output and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoRecord {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub view_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<UploadDate>,
    pub description: String,
}

/// Subset of yt-dlp's info JSON.
#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    title: Option<String>,
    view_count: Option<i64>,
    upload_date: Option<String>,
    description: Option<String>,
}

impl VideoRecord {
    /// Parses a single info JSON document. Records without any URL are
    /// useless downstream and rejected.
    pub fn from_json(raw: &str) -> Result<Self> {
        let info: RawInfo = serde_json::from_str(raw).context("deserializing metadata JSON")?;
        let url = info
            .webpage_url
            .or(info.url)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("metadata has neither webpage_url nor url"))?;

        let upload_date = info.upload_date.as_deref().and_then(|value| {
            value
                .parse::<UploadDate>()
                .inspect_err(|err| debug!("dropping upload date for {url}: {err}"))
                .ok()
        });

        Ok(Self {
            url,
            id: info.id,
            title: info
                .title
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            view_count: info
                .view_count
                .and_then(|count| u64::try_from(count).ok())
                .unwrap_or(0),
            upload_date,
            description: info
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        })
    }
}

/// Parses `--dump-json` output of a playlist: one JSON object per line.
/// Lines that do not parse are skipped.
pub fn parse_json_lines(stdout: &str) -> Vec<VideoRecord> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match VideoRecord::from_json(line) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!("skipping metadata line: {err:#}");
                None
            }
        })
        .collect()
}

/// yt-dlp flags common to metadata and download invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub program: String,
    /// Passed only when the file exists, so optional-cookie workflows still run.
    pub cookies: Option<PathBuf>,
    pub impersonate: Option<String>,
    /// Forces a specific extractor (`--ies`) instead of letting yt-dlp fall
    /// back to the generic one.
    pub extractor: Option<String>,
    pub extractor_args: Vec<String>,
}

impl ExtractorOptions {
    pub fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(target) = &self.impersonate {
            args.push("--impersonate".to_string());
            args.push(target.clone());
        }
        if let Some(cookies) = &self.cookies
            && cookies.exists()
        {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        if let Some(extractor) = &self.extractor {
            args.push("--ies".to_string());
            args.push(extractor.clone());
        }
        for extractor_arg in &self.extractor_args {
            args.push("--extractor-args".to_string());
            args.push(extractor_arg.clone());
        }
        args
    }
}

/// Asks the extractor for metadata only.
pub struct MetadataFetcher<'a> {
    runner: &'a dyn ToolRunner,
    options: ExtractorOptions,
    retry: RetryPolicy,
}

impl<'a> MetadataFetcher<'a> {
    pub fn new(runner: &'a dyn ToolRunner, options: ExtractorOptions, retry: RetryPolicy) -> Self {
        Self {
            runner,
            options,
            retry,
        }
    }

    fn dump_args(&self, url: &str, flat_playlist: bool) -> Vec<String> {
        let mut args = self.options.base_args();
        args.push("--dump-json".to_string());
        if flat_playlist {
            args.push("--flat-playlist".to_string());
        }
        args.push("--no-warnings".to_string());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn dump(&self, url: &str, flat_playlist: bool) -> std::result::Result<String, ToolError> {
        let args = self.dump_args(url, flat_playlist);
        self.retry
            .run(thread::sleep, |_| {
                run_checked(self.runner, &self.options.program, &args)
            })
            .map(|output| output.stdout)
    }

    /// Metadata for every entry of a profile/playlist in one call.
    pub fn fetch_bulk(&self, profile_url: &str) -> std::result::Result<Vec<VideoRecord>, ToolError> {
        let stdout = self.dump(profile_url, true)?;
        let records = parse_json_lines(&stdout);
        info!("found {} entries for {profile_url}", records.len());
        Ok(records)
    }

    /// Metadata for a single post/video URL.
    pub fn fetch_one(&self, url: &str) -> Result<VideoRecord> {
        let stdout = self.dump(url, false)?;
        // Some extractors still print one object per line; take the first.
        let document = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        VideoRecord::from_json(document).with_context(|| format!("metadata for {url}"))
    }

    /// Fetches each URL in turn; failures are logged and skipped.
    pub fn fetch_many<I, S>(&self, urls: I) -> Vec<VideoRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<S> = urls.into_iter().collect();
        let total = urls.len();
        let mut records = Vec::with_capacity(total);
        for (index, url) in urls.iter().enumerate() {
            let url = url.as_ref();
            println!("   -> Fetching metadata {}/{}", index + 1, total);
            match self.fetch_one(url) {
                Ok(record) => records.push(record),
                Err(err) => warn!("skipping {url}: {err:#}"),
            }
        }
        info!("extracted metadata for {}/{} videos", records.len(), total);
        records
    }
}
