//! End-to-end workflows: collect, fetch metadata, select, download and
//! optionally convert. Each stage finishes before the next one starts.

use crate::browser::BrowserDriver;
use crate::collector::{LinkCollector, Platform};
use crate::config::HarvestConfig;
use crate::cookies::load_cookie_file;
use crate::downloader::{DownloadProfile, DownloadSettings, DownloadSummary, Downloader, OutputTemplate};
use crate::input::prepare_output_dir;
use crate::metadata::{MetadataFetcher, UploadDate, VideoRecord};
use crate::runner::ToolRunner;
use crate::selector::{Selection, select};
use crate::transcoder::{TranscodeMode, Transcoder};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const PROFILE_TEMPLATE: &str = "viral_{index:02}_%(id)s.%(ext)s";
pub const FEED_TEMPLATE: &str = "viral_{index:02}_%(view_count)s_%(upload_date)s_%(id)s.%(ext)s";
pub const LINK_TEMPLATE: &str = "video_{index}_%(id)s.%(ext)s";
pub const SINGLE_TEMPLATE: &str = "%(title)s_%(id)s.%(ext)s";
pub const CAPTION_PREFIX: &str = "viral";
pub const MANIFEST_FILE: &str = "selection.json";

/// Stage counters printed at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub collected: usize,
    pub fetched: usize,
    pub selected: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub transcoded: usize,
}

impl RunReport {
    fn record_downloads(&mut self, summary: &DownloadSummary) {
        self.downloaded = summary.succeeded();
        self.failed = summary.failed();
    }

    pub fn print_summary(&self, output_dir: &Path) {
        println!("\n{}", "=".repeat(60));
        println!("RUN COMPLETE");
        if self.collected > 0 {
            println!("Links collected:   {}", self.collected);
        }
        if self.fetched > 0 {
            println!("Metadata fetched:  {}", self.fetched);
        }
        if self.selected > 0 {
            println!("Selected:          {}", self.selected);
        }
        println!("Downloaded:        {}", self.downloaded);
        println!("Failed:            {}", self.failed);
        if self.transcoded > 0 {
            println!("Converted:         {}", self.transcoded);
        }
        println!("Saved to:          {}", output_dir.display());
        println!("{}", "=".repeat(60));
    }
}

fn banner(step: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{step}");
    println!("{}", "=".repeat(60));
}

#[derive(Serialize)]
struct SelectionManifest<'a> {
    generated_at: DateTime<Utc>,
    source: &'a str,
    min_views: u64,
    min_upload_date: Option<UploadDate>,
    limit: usize,
    #[serde(flatten)]
    selection: &'a Selection,
}

/// Writes `selection.json` next to the downloads so a run can be audited.
pub fn write_selection_manifest(
    config: &HarvestConfig,
    source: &str,
    selection: &Selection,
) -> Result<PathBuf> {
    let manifest = SelectionManifest {
        generated_at: Utc::now(),
        source,
        min_views: config.selection.min_views,
        min_upload_date: config.selection.min_upload_date,
        limit: config.selection.limit,
        selection,
    };
    let path = config.output_dir.join(MANIFEST_FILE);
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing selection")?;
    fs::write(&tmp_path, bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)
        .with_context(|| format!("moving {} into place", tmp_path.display()))?;
    Ok(path)
}

fn download_settings(
    config: &HarvestConfig,
    template: &str,
    profile: DownloadProfile,
) -> DownloadSettings {
    DownloadSettings {
        output_dir: config.output_dir.clone(),
        template: OutputTemplate::new(template),
        profile,
        caption_prefix: None,
        item_delay: config.item_delay,
        retry: config.retry,
        limit: None,
    }
}

/// Converts every file the downloader reported; failures leave the
/// download untouched.
fn transcode_downloads(
    runner: &dyn ToolRunner,
    config: &HarvestConfig,
    mode: Option<&TranscodeMode>,
    summary: &DownloadSummary,
) -> usize {
    let Some(mode) = mode else {
        return 0;
    };
    let files: Vec<&Path> = summary.downloaded_files().collect();
    if files.is_empty() {
        if summary.succeeded() > 0 {
            warn!("yt-dlp did not report file paths; skipping conversion");
        }
        return 0;
    }
    banner(&format!("Converting {} videos to .{}", files.len(), mode.container()));
    let transcoder = Transcoder::new(runner, config.tools.ffmpeg.clone(), mode.clone());
    transcoder.transcode_all(files).converted.len()
}

fn select_and_record(
    config: &HarvestConfig,
    source: &str,
    records: &[VideoRecord],
    report: &mut RunReport,
) -> Result<Option<Selection>> {
    let criteria = &config.selection;
    match criteria.min_upload_date {
        Some(date) => println!(
            "\nFiltering (views >= {} AND date >= {date})...",
            criteria.min_views
        ),
        None => println!("\nFiltering (views >= {})...", criteria.min_views),
    }
    let selection = select(records, criteria);
    println!("   -> {} videos met the criteria.", selection.matched);
    println!("   -> Selecting the top {} for download.", selection.len());
    report.selected = selection.len();
    if selection.is_empty() {
        println!("No videos found matching those criteria.");
        return Ok(None);
    }
    let manifest = write_selection_manifest(config, source, &selection)?;
    info!(path = %manifest.display(), "selection manifest written");
    Ok(Some(selection))
}

/// Browser workflow: scroll a profile page, then fetch, select and download.
pub struct ProfileHarvest {
    pub profile_url: String,
    pub platform: Platform,
    pub transcode: Option<TranscodeMode>,
}

pub fn run_profile_harvest(
    driver: &mut dyn BrowserDriver,
    runner: &dyn ToolRunner,
    config: &HarvestConfig,
    job: &ProfileHarvest,
) -> Result<RunReport> {
    prepare_output_dir(&config.output_dir)?;
    let mut report = RunReport::default();

    banner("STEP 1: Scraping video links");
    let cookies = if config.cookies.is_file() {
        load_cookie_file(&config.cookies)?
    } else {
        Vec::new()
    };
    let collector =
        LinkCollector::new(job.platform.link_patterns(), config.scroll).with_cookies(cookies);
    let links = collector.collect_or_empty(driver, &job.profile_url);
    report.collected = links.len();
    if links.is_empty() {
        bail!(
            "no video links found on {}; check whether the page shows a login wall",
            job.profile_url
        );
    }
    println!("Found {} unique links.", links.len());

    banner("STEP 2: Fetching metadata and captions");
    let fetcher = MetadataFetcher::new(runner, config.extractor_options(job.platform), config.retry);
    let records = fetcher.fetch_many(&links);
    report.fetched = records.len();
    if records.is_empty() {
        bail!("metadata extraction failed for every link");
    }

    let Some(selection) = select_and_record(config, &job.profile_url, &records, &mut report)? else {
        return Ok(report);
    };

    banner(&format!("STEP 3: Downloading {} videos", selection.len()));
    let mut settings = download_settings(config, PROFILE_TEMPLATE, DownloadProfile::default());
    settings.caption_prefix = Some(CAPTION_PREFIX.to_string());
    let downloader = Downloader::new(runner, config.extractor_options(job.platform), settings);
    let summary = downloader.download_records(&selection.records);
    report.record_downloads(&summary);
    report.transcoded = transcode_downloads(runner, config, job.transcode.as_ref(), &summary);
    Ok(report)
}

/// Feed workflow: one bulk metadata call for the whole profile, no browser.
pub fn run_feed_harvest(
    runner: &dyn ToolRunner,
    config: &HarvestConfig,
    profile_url: &str,
    platform: Platform,
    transcode: Option<&TranscodeMode>,
) -> Result<RunReport> {
    prepare_output_dir(&config.output_dir)?;
    let mut report = RunReport::default();

    banner(&format!("STEP 1: Extracting metadata for {profile_url}"));
    let options = config.extractor_options(platform);
    let fetcher = MetadataFetcher::new(runner, options.clone(), config.retry);
    let records = fetcher
        .fetch_bulk(profile_url)
        .with_context(|| format!("extracting metadata for {profile_url}"))?;
    report.fetched = records.len();
    if records.is_empty() {
        bail!("no metadata found for {profile_url}");
    }
    println!("Successfully found {} total videos.", records.len());

    let Some(selection) = select_and_record(config, profile_url, &records, &mut report)? else {
        return Ok(report);
    };

    banner(&format!("STEP 3: Downloading {} videos", selection.len()));
    let settings = download_settings(config, FEED_TEMPLATE, DownloadProfile::mp4_preferred());
    let downloader = Downloader::new(runner, options, settings);
    let summary = downloader.download_records(&selection.records);
    report.record_downloads(&summary);
    report.transcoded = transcode_downloads(runner, config, transcode, &summary);
    Ok(report)
}

/// Link-list workflow: download URLs in order, without metadata or filters.
#[derive(Debug, Clone)]
pub struct LinkBatch {
    pub links: Vec<String>,
    pub platform: Platform,
    /// Stop after this many successful downloads.
    pub limit: Option<usize>,
    pub write_description: bool,
    /// Ask yt-dlp itself to re-encode into this container.
    pub recode: Option<String>,
    pub transcode: Option<TranscodeMode>,
}

pub fn run_link_batch(
    runner: &dyn ToolRunner,
    config: &HarvestConfig,
    batch: &LinkBatch,
) -> Result<RunReport> {
    prepare_output_dir(&config.output_dir)?;
    let mut report = RunReport {
        collected: batch.links.len(),
        ..RunReport::default()
    };
    if batch.links.is_empty() {
        bail!("the link list is empty");
    }

    banner(&format!("Processing {} links", batch.links.len()));
    let profile = DownloadProfile {
        write_description: batch.write_description,
        recode_video: batch.recode.clone(),
        ..DownloadProfile::default()
    };
    let mut settings = download_settings(config, LINK_TEMPLATE, profile);
    settings.limit = batch.limit;
    let downloader = Downloader::new(runner, config.extractor_options(batch.platform), settings);
    let summary = downloader.download_urls(&batch.links);
    report.record_downloads(&summary);
    report.transcoded = transcode_downloads(runner, config, batch.transcode.as_ref(), &summary);
    Ok(report)
}

/// Downloads one URL with the best mp4 streams available.
pub fn run_single(
    runner: &dyn ToolRunner,
    config: &HarvestConfig,
    url: &str,
    transcode: Option<&TranscodeMode>,
) -> Result<RunReport> {
    prepare_output_dir(&config.output_dir)?;
    let platform = Platform::detect(url);
    let settings = download_settings(config, SINGLE_TEMPLATE, DownloadProfile::mp4_preferred());
    let downloader = Downloader::new(runner, config.extractor_options(platform), settings);

    println!("Starting download for: {url}");
    let summary = downloader.download_urls(&[url]);
    let mut report = RunReport {
        collected: 1,
        ..RunReport::default()
    };
    report.record_downloads(&summary);
    report.transcoded = transcode_downloads(runner, config, transcode, &summary);
    Ok(report)
}
