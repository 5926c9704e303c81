//! ffmpeg conversions applied to finished downloads.

use crate::runner::{ToolRunner, run_checked};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Full re-encode settings. The defaults produce files QuickTime and iOS
/// play without complaint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub pixel_format: String,
    pub container: String,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "slow".to_string(),
            crf: 22,
            audio_codec: "aac".to_string(),
            pixel_format: "yuv420p".to_string(),
            container: "mov".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeMode {
    /// Remux without touching the streams.
    StreamCopy { container: String },
    Reencode(EncodeProfile),
}

impl TranscodeMode {
    pub fn container(&self) -> &str {
        match self {
            Self::StreamCopy { container } => container,
            Self::Reencode(profile) => &profile.container,
        }
    }

    /// ffmpeg arguments converting `input` into `output`.
    pub fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input.display().to_string()];
        match self {
            Self::StreamCopy { container } => {
                args.extend([
                    "-c".to_string(),
                    "copy".to_string(),
                    "-f".to_string(),
                    muxer_name(container).to_string(),
                ]);
            }
            Self::Reencode(profile) => {
                args.extend([
                    "-c:v".to_string(),
                    profile.video_codec.clone(),
                    "-preset".to_string(),
                    profile.preset.clone(),
                    "-crf".to_string(),
                    profile.crf.to_string(),
                    "-c:a".to_string(),
                    profile.audio_codec.clone(),
                    "-pix_fmt".to_string(),
                    profile.pixel_format.clone(),
                ]);
            }
        }
        args.push(output.display().to_string());
        args.push("-y".to_string());
        args
    }
}

/// ffmpeg muxer for a file extension, where the two differ.
fn muxer_name(container: &str) -> &str {
    match container {
        "mkv" => "matroska",
        "m4v" => "mp4",
        other => other,
    }
}

/// `clip.mov` -> `clip.partial.mov`; the extension stays last so ffmpeg
/// still infers the muxer from it.
fn partial_path(output: &Path, container: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{stem}.partial.{container}"))
}

fn remove_partial(partial: &Path) {
    if partial.exists()
        && let Err(err) = fs::remove_file(partial)
    {
        warn!("could not remove partial {}: {err}", partial.display());
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TranscodeSummary {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub struct Transcoder<'a> {
    runner: &'a dyn ToolRunner,
    program: String,
    mode: TranscodeMode,
    output_dir: Option<PathBuf>,
    keep_source: bool,
}

impl<'a> Transcoder<'a> {
    pub fn new(runner: &'a dyn ToolRunner, program: impl Into<String>, mode: TranscodeMode) -> Self {
        Self {
            runner,
            program: program.into(),
            mode,
            output_dir: None,
            keep_source: false,
        }
    }

    /// Writes converted files into `dir` instead of next to their source.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn keep_source(mut self, keep: bool) -> Self {
        self.keep_source = keep;
        self
    }

    pub fn mode(&self) -> &TranscodeMode {
        &self.mode
    }

    pub fn output_path_for(&self, source: &Path) -> Result<PathBuf> {
        let stem = source
            .file_stem()
            .with_context(|| format!("{} has no file name", source.display()))?;
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => source.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(self.mode.container());
        let output = dir.join(file_name);
        if output == source {
            bail!(
                "{} is already a .{} file",
                source.display(),
                self.mode.container()
            );
        }
        Ok(output)
    }

    /// Converts one file. ffmpeg writes to a `.partial` sibling that is
    /// renamed over the output only on success, so a failed run leaves any
    /// earlier output untouched. The source is deleted after success unless
    /// it is kept.
    pub fn transcode(&self, source: &Path) -> Result<PathBuf> {
        let output = self.output_path_for(source)?;
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let partial = partial_path(&output, self.mode.container());
        let args = self.mode.args(source, &partial);
        if let Err(err) = run_checked(self.runner, &self.program, &args) {
            warn!("converting {} failed: {err}", source.display());
            remove_partial(&partial);
            return Err(err).with_context(|| format!("converting {}", source.display()));
        }
        if !partial.exists() {
            bail!("{} did not produce {}", self.program, partial.display());
        }
        if let Err(err) = fs::rename(&partial, &output) {
            remove_partial(&partial);
            return Err(err).with_context(|| format!("moving {} into place", output.display()));
        }
        if !self.keep_source {
            fs::remove_file(source)
                .with_context(|| format!("removing original {}", source.display()))?;
        }
        info!(source = %source.display(), output = %output.display(), "converted");
        Ok(output)
    }

    pub fn transcode_all<'p, I>(&self, sources: I) -> TranscodeSummary
    where
        I: IntoIterator<Item = &'p Path>,
    {
        let mut summary = TranscodeSummary::default();
        for source in sources {
            println!("Converting: {}", source.display());
            match self.transcode(source) {
                Ok(output) => {
                    println!("   [OK] {}", output.display());
                    summary.converted.push(output);
                }
                Err(err) => {
                    println!("   [FAILED] {err:#}");
                    summary.failed.push(source.to_path_buf());
                }
            }
        }
        summary
    }

    /// Converts every `*.{extension}` file directly inside `input_dir`.
    pub fn convert_directory(&self, input_dir: &Path, extension: &str) -> Result<TranscodeSummary> {
        let extension = extension.trim_start_matches('.');
        let mut sources = Vec::new();
        for entry in WalkDir::new(input_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("reading {}", input_dir.display()))?;
            if entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
            {
                sources.push(entry.into_path());
            }
        }
        if sources.is_empty() {
            println!("No .{extension} files found in {}", input_dir.display());
            return Ok(TranscodeSummary::default());
        }
        println!("Found {} videos. Starting conversion...", sources.len());
        Ok(self.transcode_all(sources.iter().map(PathBuf::as_path)))
    }
}
