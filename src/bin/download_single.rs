#![forbid(unsafe_code)]

//! Downloads one video in the best mp4 quality available.

use anyhow::{Result, bail};
use clap::Parser;
use harvest_tools::config::{CommonArgs, ConvertArgs, resolve_config};
use harvest_tools::input::{CookieRequirement, check_cookie_file, url_or_prompt};
use harvest_tools::logging::init_logging;
use harvest_tools::pipeline::run_single;
use harvest_tools::runner::{SystemRunner, ensure_program_available};

#[derive(Debug, Parser)]
#[command(about = "Download a single video")]
struct Args {
    /// Video URL; prompted for when omitted.
    url: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    convert: ConvertArgs,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = resolve_config(args.common.overrides())?;

    let url = url_or_prompt(args.url.clone(), "Paste the video URL: ")?;
    check_cookie_file(&config.cookies, CookieRequirement::Optional)?;

    let runner = SystemRunner;
    ensure_program_available(&runner, &config.tools.yt_dlp)?;
    let transcode = args.convert.mode();
    if transcode.is_some() {
        ensure_program_available(&runner, &config.tools.ffmpeg)?;
    }

    let report = run_single(&runner, &config, &url, transcode.as_ref())?;
    report.print_summary(&config.output_dir);
    if report.downloaded == 0 {
        bail!("download failed for {url}");
    }
    Ok(())
}
