#![forbid(unsafe_code)]

//! Downloads every URL listed in a text file, in order.

use anyhow::Result;
use clap::Parser;
use harvest_tools::collector::Platform;
use harvest_tools::config::{CommonArgs, ConvertArgs, resolve_config};
use harvest_tools::input::{CookieRequirement, check_cookie_file, read_link_list};
use harvest_tools::logging::init_logging;
use harvest_tools::pipeline::{LinkBatch, run_link_batch};
use harvest_tools::runner::{SystemRunner, ensure_program_available};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Download the URLs listed in a file")]
struct Args {
    /// File with one URL per line.
    #[arg(long, value_name = "PATH", default_value = "links.txt")]
    links: PathBuf,
    /// Site preset; detected from the first link by default.
    #[arg(long)]
    platform: Option<Platform>,
    /// Stop after this many successful downloads.
    #[arg(long)]
    limit: Option<usize>,
    /// Save the post description next to each video.
    #[arg(long)]
    write_description: bool,
    /// Have yt-dlp re-encode downloads into this container.
    #[arg(long, value_name = "EXT")]
    recode: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    convert: ConvertArgs,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = resolve_config(args.common.overrides())?;

    let links = read_link_list(&args.links)?;
    check_cookie_file(&config.cookies, CookieRequirement::Optional)?;
    let platform = args.platform.unwrap_or_else(|| {
        links
            .first()
            .map(|url| Platform::detect(url))
            .unwrap_or(Platform::Generic)
    });

    let runner = SystemRunner;
    ensure_program_available(&runner, &config.tools.yt_dlp)?;
    let transcode = args.convert.mode();
    if transcode.is_some() {
        ensure_program_available(&runner, &config.tools.ffmpeg)?;
    }

    println!("===================================");
    println!("Link Downloader ({platform})");
    println!("===================================");
    println!("Links file: {}", args.links.display());
    println!("Output directory: {}", config.output_dir.display());

    let batch = LinkBatch {
        links,
        platform,
        limit: args.limit,
        write_description: args.write_description,
        recode: args.recode.clone(),
        transcode,
    };
    let report = run_link_batch(&runner, &config, &batch)?;
    report.print_summary(&config.output_dir);
    Ok(())
}
