#![forbid(unsafe_code)]

//! Pulls a whole profile's metadata through yt-dlp in one call, filters by
//! views and upload date, and downloads the top entries.

use anyhow::Result;
use clap::Parser;
use harvest_tools::collector::{Platform, canonical_profile_url};
use harvest_tools::config::{CommonArgs, ConvertArgs, SelectionArgs, resolve_config};
use harvest_tools::input::{CookieRequirement, check_cookie_file, url_or_prompt};
use harvest_tools::logging::init_logging;
use harvest_tools::pipeline::run_feed_harvest;
use harvest_tools::runner::{SystemRunner, ensure_program_available};

#[derive(Debug, Parser)]
#[command(about = "Download the most viewed recent videos of a profile feed")]
struct Args {
    /// Profile URL; prompted for when omitted.
    url: Option<String>,
    /// Site preset; detected from the URL by default.
    #[arg(long)]
    platform: Option<Platform>,
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
    let config = resolve_config(overrides)?;

    let raw_url = url_or_prompt(args.url.clone(), "Enter profile URL: ")?;
    let profile_url = canonical_profile_url(&raw_url)?;
    let platform = args
        .platform
        .unwrap_or_else(|| Platform::detect(profile_url.as_str()));
    check_cookie_file(&config.cookies, CookieRequirement::Optional)?;

    let runner = SystemRunner;
    ensure_program_available(&runner, &config.tools.yt_dlp)?;
    let transcode = args.convert.mode();
    if transcode.is_some() {
        ensure_program_available(&runner, &config.tools.ffmpeg)?;
    }

    println!("===================================");
    println!("Feed Harvester ({platform})");
    println!("===================================");
    println!("Profile: {profile_url}");
    println!("Output directory: {}", config.output_dir.display());

    let report = run_feed_harvest(
        &runner,
        &config,
        profile_url.as_str(),
        platform,
        transcode.as_ref(),
    )?;
    report.print_summary(&config.output_dir);
    Ok(())
}
