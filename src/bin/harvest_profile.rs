#![forbid(unsafe_code)]

//! Scrolls a profile page in Chrome, collects post/video links, keeps the
//! most viewed ones and downloads them with caption files.

use anyhow::{Context, Result};
use clap::Parser;
use harvest_tools::browser::{BrowserOptions, WebDriverSession};
use harvest_tools::collector::{Platform, canonical_profile_url};
use harvest_tools::config::{CommonArgs, ConvertArgs, SelectionArgs, resolve_config};
use harvest_tools::input::{CookieRequirement, check_cookie_file, url_or_prompt};
use harvest_tools::logging::init_logging;
use harvest_tools::pipeline::{ProfileHarvest, run_profile_harvest};
use harvest_tools::runner::{SystemRunner, ensure_program_available};

#[derive(Debug, Parser)]
#[command(about = "Harvest the most viewed videos from a profile page")]
struct Args {
    /// Profile or page URL; prompted for when omitted.
    url: Option<String>,
    /// Site preset; detected from the URL by default.
    #[arg(long)]
    platform: Option<Platform>,
    /// Maximum number of scroll passes.
    #[arg(long)]
    scrolls: Option<u32>,
    /// chromedriver endpoint.
    #[arg(long, value_name = "URL")]
    webdriver_url: Option<String>,
    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    selection: SelectionArgs,
    #[command(flatten)]
    convert: ConvertArgs,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut overrides = args.common.overrides();
    args.selection.apply(&mut overrides);
    overrides.scroll_count = args.scrolls;
    overrides.webdriver_url = args.webdriver_url.clone();
    let config = resolve_config(overrides)?;

    let raw_url = url_or_prompt(args.url.clone(), "Enter profile URL: ")?;
    let profile_url = canonical_profile_url(&raw_url)?;
    let platform = args
        .platform
        .unwrap_or_else(|| Platform::detect(profile_url.as_str()));

    let requirement = if platform.requires_cookies() {
        CookieRequirement::Required
    } else {
        CookieRequirement::Optional
    };
    check_cookie_file(&config.cookies, requirement)?;

    let runner = SystemRunner;
    ensure_program_available(&runner, &config.tools.yt_dlp)?;
    let transcode = args.convert.mode();
    if transcode.is_some() {
        ensure_program_available(&runner, &config.tools.ffmpeg)?;
    }

    println!("===================================");
    println!("Profile Harvester ({platform})");
    println!("===================================");
    println!("Profile: {profile_url}");
    println!("Output directory: {}", config.output_dir.display());
    println!();

    let options = BrowserOptions {
        headless: args.headless,
        ..BrowserOptions::default()
    };
    let mut session = WebDriverSession::start(&config.webdriver_url, &options)
        .context("is chromedriver running? start it or pass --webdriver-url")?;

    let job = ProfileHarvest {
        profile_url: profile_url.to_string(),
        platform,
        transcode,
    };
    let report = run_profile_harvest(&mut session, &runner, &config, &job)?;
    report.print_summary(&config.output_dir);
    Ok(())
}
