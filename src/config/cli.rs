use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::{ParseInputs, ParseMode};

/// Command-line arguments for the calamo binary.
#[derive(Debug, Parser)]
#[command(
    name = "calamo",
    version,
    about = "Render the math in a text file through a cached pipeline"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CALAMO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Parse a file, render every equation and report the outcome.
    Render(Box<RenderArgs>),
    /// Parse a file and print its block structure without rendering.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SourceArgs {
    /// Input file containing text with embedded TeX.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Treat the whole file as one display equation.
    #[arg(long = "all-text", action = clap::ArgAction::SetTrue)]
    pub all_text: bool,

    /// Decode HTML entities (`&lt;`, `&#x3C;`, ...) before parsing.
    #[arg(long = "unescape-entities", action = clap::ArgAction::SetTrue)]
    pub unescape_entities: bool,
}

impl SourceArgs {
    pub fn parse_inputs(&self, raw_text: String) -> ParseInputs {
        let mode = if self.all_text {
            ParseMode::AllText
        } else {
            ParseMode::Spans
        };
        ParseInputs::new(raw_text, mode).with_unescape_entities(self.unescape_entities)
    }
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Write each rendered equation as a PNG into this directory.
    #[arg(long = "out-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub out_dir: Option<PathBuf>,

    /// Render the file this many times against the same cache.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the conversion CLI executable.
    #[arg(long = "engine-cli-path", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub engine_cli_path: Option<PathBuf>,

    /// Override the x-height of the surrounding font, in points.
    #[arg(long = "x-height", value_name = "POINTS")]
    pub x_height: Option<f64>,

    /// Override the display scale (pixels per point).
    #[arg(long = "display-scale", value_name = "FACTOR")]
    pub display_scale: Option<f64>,

    /// Re-attempt failed equations once after a cache purge.
    #[arg(
        long = "retry-after-purge",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub retry_after_purge: Option<bool>,

    /// Override the vector tier entry limit.
    #[arg(long = "cache-vector-limit", value_name = "COUNT")]
    pub cache_vector_limit: Option<u64>,

    /// Override the bitmap tier entry limit.
    #[arg(long = "cache-bitmap-limit", value_name = "COUNT")]
    pub cache_bitmap_limit: Option<u64>,

    /// Override the number of consecutive failing batches that purge the cache.
    #[arg(long = "cache-failure-threshold", value_name = "COUNT")]
    pub cache_failure_threshold: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
