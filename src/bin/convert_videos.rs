#![forbid(unsafe_code)]

//! Batch converts a folder of downloads with ffmpeg, by default into
//! QuickTime-friendly H.264/AAC `.mov` files.

use anyhow::Result;
use clap::Parser;
use harvest_tools::config::{ConfigOverrides, ConvertKind, resolve_config};
use harvest_tools::input::prepare_output_dir;
use harvest_tools::logging::init_logging;
use harvest_tools::runner::{SystemRunner, ensure_program_available};
use harvest_tools::transcoder::{EncodeProfile, TranscodeMode, Transcoder};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Convert every video in a folder with ffmpeg")]
struct Args {
    /// Folder holding the videos to convert.
    #[arg(long, value_name = "DIR", default_value = "videos_to_convert")]
    input_dir: PathBuf,
    /// Where converted files go; defaults to next to the source.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Source extension to pick up.
    #[arg(long, default_value = "mp4")]
    extension: String,
    #[arg(long, value_enum, default_value = "reencode")]
    mode: ConvertKind,
    /// Target container extension.
    #[arg(long, default_value = "mov")]
    container: String,
    /// Keep the original after a successful conversion.
    #[arg(long)]
    keep_source: bool,
    /// Alternate `.env` file with HARVEST_* settings.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = resolve_config(ConfigOverrides {
        env_path: args.env_file.clone(),
        ..ConfigOverrides::default()
    })?;

    if !args.input_dir.is_dir() {
        prepare_output_dir(&args.input_dir)?;
        println!(
            "Created '{}'. Put your videos there and run again.",
            args.input_dir.display()
        );
        return Ok(());
    }

    let runner = SystemRunner;
    ensure_program_available(&runner, &config.tools.ffmpeg)?;

    let container = args.container.trim_start_matches('.').to_string();
    let mode = match args.mode {
        ConvertKind::Copy => TranscodeMode::StreamCopy { container },
        ConvertKind::Reencode => TranscodeMode::Reencode(EncodeProfile {
            container,
            ..EncodeProfile::default()
        }),
    };
    let mut transcoder =
        Transcoder::new(&runner, config.tools.ffmpeg.clone(), mode).keep_source(args.keep_source);
    if let Some(output_dir) = &args.output_dir {
        prepare_output_dir(output_dir)?;
        transcoder = transcoder.with_output_dir(output_dir);
    }

    let summary = transcoder.convert_directory(&args.input_dir, &args.extension)?;
    println!();
    println!("Converted: {}", summary.converted.len());
    println!("Failed:    {}", summary.failed.len());
    Ok(())
}
