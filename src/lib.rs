#![forbid(unsafe_code)]

//! Shared building blocks for the harvest binaries: profile scraping through a
//! WebDriver browser, yt-dlp metadata and downloads, selection, and ffmpeg
//! conversions.

pub mod browser;
pub mod collector;
pub mod config;
pub mod cookies;
pub mod downloader;
pub mod input;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod runner;
pub mod selector;
pub mod transcoder;
