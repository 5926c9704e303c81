#![forbid(unsafe_code)]

use crate::collector::{Platform, ScrollSettings};
use crate::downloader::RetryPolicy;
use crate::metadata::{ExtractorOptions, UploadDate};
use crate::selector::SelectionCriteria;
use crate::transcoder::{EncodeProfile, TranscodeMode};
use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://127.0.0.1:9515";
pub const DEFAULT_ITEM_DELAY_SECS: u64 = 5;

/// Names (or paths) of the external binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub yt_dlp: String,
    pub ffmpeg: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            yt_dlp: DEFAULT_YT_DLP.to_string(),
            ffmpeg: DEFAULT_FFMPEG.to_string(),
        }
    }
}

/// Everything a run needs to know, resolved once and handed to each stage.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub output_dir: PathBuf,
    pub cookies: PathBuf,
    pub tools: ToolPaths,
    pub selection: SelectionCriteria,
    pub scroll: ScrollSettings,
    /// Pause between two downloads so the platform does not flag the session.
    pub item_delay: Duration,
    pub retry: RetryPolicy,
    pub impersonate: Option<String>,
    pub webdriver_url: String,
}

impl HarvestConfig {
    /// yt-dlp flags shared by metadata and download calls for `platform`.
    pub fn extractor_options(&self, platform: Platform) -> ExtractorOptions {
        ExtractorOptions {
            program: self.tools.yt_dlp.clone(),
            cookies: Some(self.cookies.clone()),
            impersonate: self
                .impersonate
                .clone()
                .or_else(|| platform.default_impersonate().map(str::to_string)),
            extractor: platform.forced_extractor().map(str::to_string),
            extractor_args: platform.extractor_args(),
        }
    }
}

pub fn load_config() -> Result<HarvestConfig> {
    resolve_config(ConfigOverrides::default())
}

/// Per-run overrides, usually coming from the command line. They win over
/// the process environment, which wins over the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_dir: Option<PathBuf>,
    pub cookies: Option<PathBuf>,
    pub min_views: Option<u64>,
    pub min_upload_date: Option<UploadDate>,
    pub limit: Option<usize>,
    pub scroll_count: Option<u32>,
    pub item_delay_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub impersonate: Option<String>,
    pub webdriver_url: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<HarvestConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<HarvestConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<HarvestConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let output_dir = overrides
        .output_dir
        .or_else(|| lookup("HARVEST_OUTPUT_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let cookies = overrides
        .cookies
        .or_else(|| lookup("HARVEST_COOKIES").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIES_FILE));

    let tools = ToolPaths {
        yt_dlp: lookup("HARVEST_YT_DLP").unwrap_or_else(|| DEFAULT_YT_DLP.to_string()),
        ffmpeg: lookup("HARVEST_FFMPEG").unwrap_or_else(|| DEFAULT_FFMPEG.to_string()),
    };

    let min_upload_date = match overrides.min_upload_date {
        Some(date) => Some(date),
        None => lookup("HARVEST_START_DATE")
            .map(|value| UploadDate::from_str(&value))
            .transpose()
            .context("HARVEST_START_DATE")?,
    };
    let defaults = SelectionCriteria::default();
    let selection = SelectionCriteria {
        min_views: overrides
            .min_views
            .or_else(|| parse_value("HARVEST_VIEW_THRESHOLD", file_vars, &env_lookup))
            .unwrap_or(defaults.min_views),
        min_upload_date,
        limit: overrides
            .limit
            .or_else(|| parse_value("HARVEST_DOWNLOAD_LIMIT", file_vars, &env_lookup))
            .unwrap_or(defaults.limit),
    };

    let scroll_defaults = ScrollSettings::default();
    let scroll = ScrollSettings {
        scroll_count: overrides
            .scroll_count
            .or_else(|| parse_value("HARVEST_SCROLL_COUNT", file_vars, &env_lookup))
            .unwrap_or(scroll_defaults.scroll_count),
        initial_wait: parse_value("HARVEST_INITIAL_WAIT_SECS", file_vars, &env_lookup)
            .map(Duration::from_secs)
            .unwrap_or(scroll_defaults.initial_wait),
        scroll_wait: parse_value("HARVEST_SCROLL_WAIT_SECS", file_vars, &env_lookup)
            .map(Duration::from_secs)
            .unwrap_or(scroll_defaults.scroll_wait),
    };

    let item_delay = Duration::from_secs(
        overrides
            .item_delay_secs
            .or_else(|| parse_value("HARVEST_ITEM_DELAY_SECS", file_vars, &env_lookup))
            .unwrap_or(DEFAULT_ITEM_DELAY_SECS),
    );

    let retry_defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_attempts: overrides
            .retry_attempts
            .or_else(|| parse_value("HARVEST_RETRY_ATTEMPTS", file_vars, &env_lookup))
            .unwrap_or(retry_defaults.max_attempts)
            .max(1),
        base_delay: parse_value("HARVEST_RETRY_BASE_DELAY_SECS", file_vars, &env_lookup)
            .map(Duration::from_secs)
            .unwrap_or(retry_defaults.base_delay),
    };

    let impersonate = non_blank(overrides.impersonate).or_else(|| lookup("HARVEST_IMPERSONATE"));
    let webdriver_url = non_blank(overrides.webdriver_url)
        .or_else(|| lookup("HARVEST_WEBDRIVER_URL"))
        .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());

    Ok(HarvestConfig {
        output_dir,
        cookies,
        tools,
        selection,
        scroll,
        item_delay,
        retry,
        impersonate,
        webdriver_url,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

/// Numeric settings quietly fall back to their default when unparsable.
fn parse_value<T: FromStr>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    let raw = lookup_value(key, file_vars, env_lookup)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring invalid value for {key}: {raw:?}");
            None
        }
    }
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Flags shared by every binary.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CommonArgs {
    /// Alternate `.env` file with HARVEST_* settings.
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
    /// Directory that receives downloads and caption files.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Netscape-format cookie file passed to yt-dlp and the browser.
    #[arg(long, value_name = "PATH")]
    pub cookies: Option<PathBuf>,
    /// Browser fingerprint yt-dlp should impersonate (e.g. `chrome`).
    #[arg(long)]
    pub impersonate: Option<String>,
    /// Attempts per extractor call; 1 disables retries.
    #[arg(long)]
    pub retries: Option<u32>,
    /// Seconds to wait between two downloads.
    #[arg(long, value_name = "SECS")]
    pub item_delay: Option<u64>,
}

impl CommonArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            output_dir: self.output_dir.clone(),
            cookies: self.cookies.clone(),
            item_delay_secs: self.item_delay,
            retry_attempts: self.retries,
            impersonate: self.impersonate.clone(),
            env_path: self.env_file.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// View/date/limit filters for the harvesting binaries.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SelectionArgs {
    /// Minimum view count (inclusive).
    #[arg(long)]
    pub min_views: Option<u64>,
    /// Earliest upload date, YYYYMMDD (inclusive).
    #[arg(long, value_name = "YYYYMMDD")]
    pub since: Option<UploadDate>,
    /// Maximum number of videos to download.
    #[arg(long)]
    pub limit: Option<usize>,
}

impl SelectionArgs {
    pub fn apply(&self, overrides: &mut ConfigOverrides) {
        overrides.min_views = self.min_views.or(overrides.min_views);
        overrides.min_upload_date = self.since.or(overrides.min_upload_date);
        overrides.limit = self.limit.or(overrides.limit);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConvertKind {
    /// Re-containerize without touching the streams.
    Copy,
    /// Full H.264/AAC re-encode for picky players.
    Reencode,
}

/// Optional post-download conversion.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConvertArgs {
    #[arg(long, value_enum)]
    pub convert: Option<ConvertKind>,
    /// Target container extension.
    #[arg(long, default_value = "mov")]
    pub container: String,
}

impl ConvertArgs {
    pub fn mode(&self) -> Option<TranscodeMode> {
        let container = self.container.trim_start_matches('.').to_string();
        self.convert.map(|kind| match kind {
            ConvertKind::Copy => TranscodeMode::StreamCopy { container },
            ConvertKind::Reencode => TranscodeMode::Reencode(EncodeProfile {
                container,
                ..EncodeProfile::default()
            }),
        })
    }
}
