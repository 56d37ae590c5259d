//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::{RenderParams, RetryPolicy};
use crate::cache::{DEFAULT_BITMAP_LIMIT, DEFAULT_FAILURE_THRESHOLD, DEFAULT_VECTOR_LIMIT};
use crate::domain::types::{EngineOptions, FontCache};

mod cli;

pub use cli::{CliArgs, Command, InspectArgs, RenderArgs, RenderOverrides, SourceArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "calamo";
pub(crate) const DEFAULT_ENGINE_CLI_PATH: &str = "tex2svg";
const DEFAULT_X_HEIGHT: f64 = 8.0;
const DEFAULT_DISPLAY_SCALE: f64 = 2.0;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub engine_cli_path: PathBuf,
    pub x_height: f64,
    pub display_scale: f64,
    pub retry_after_purge: bool,
    pub engine: EngineOptions,
}

impl RenderSettings {
    pub fn params(&self) -> RenderParams {
        RenderParams::new(self.x_height, self.display_scale).with_engine_options(self.engine.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_after_purge {
            RetryPolicy::OncePostPurge
        } else {
            RetryPolicy::Never
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub vector_limit: NonZeroUsize,
    pub bitmap_limit: NonZeroUsize,
    pub failure_threshold: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CALAMO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Render(args) => raw.apply_render_overrides(&args.overrides),
        Command::Inspect(args) => {
            if let Some(level) = args.log_level.as_ref() {
                raw.logging.level = Some(level.clone());
            }
        }
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.engine_cli_path.as_ref() {
            self.render.engine_cli_path = Some(path.clone());
        }
        if let Some(x_height) = overrides.x_height {
            self.render.x_height = Some(x_height);
        }
        if let Some(scale) = overrides.display_scale {
            self.render.display_scale = Some(scale);
        }
        if let Some(retry) = overrides.retry_after_purge {
            self.render.retry_after_purge = Some(retry);
        }
        if let Some(limit) = overrides.cache_vector_limit {
            self.cache.vector_limit = Some(limit);
        }
        if let Some(limit) = overrides.cache_bitmap_limit {
            self.cache.bitmap_limit = Some(limit);
        }
        if let Some(threshold) = overrides.cache_failure_threshold {
            self.cache.failure_threshold = Some(threshold);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let engine_cli_path = render
        .engine_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_CLI_PATH));
    if engine_cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.engine_cli_path",
            "path must not be empty",
        ));
    }

    let x_height = positive_f64(render.x_height.unwrap_or(DEFAULT_X_HEIGHT), "render.x_height")?;
    let display_scale = positive_f64(
        render.display_scale.unwrap_or(DEFAULT_DISPLAY_SCALE),
        "render.display_scale",
    )?;

    let font_cache = match render.font_cache.as_deref().map(str::trim) {
        None | Some("") => FontCache::default(),
        Some("none") => FontCache::None,
        Some("local") => FontCache::Local,
        Some("global") => FontCache::Global,
        Some(other) => {
            return Err(LoadError::invalid(
                "render.font_cache",
                format!("expected none, local or global, got `{other}`"),
            ));
        }
    };

    let packages: Vec<String> = render
        .packages
        .into_iter()
        .map(|package| package.trim().to_string())
        .filter(|package| !package.is_empty())
        .collect();
    if let Some(name) = render.macros.keys().find(|name| name.trim().is_empty()) {
        return Err(LoadError::invalid(
            "render.macros",
            format!("macro name `{name}` must not be blank"),
        ));
    }

    Ok(RenderSettings {
        engine_cli_path,
        x_height,
        display_scale,
        retry_after_purge: render.retry_after_purge.unwrap_or(false),
        engine: EngineOptions {
            packages,
            macros: render.macros,
            font_cache,
        },
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        vector_limit: non_zero_usize(
            cache.vector_limit.unwrap_or(DEFAULT_VECTOR_LIMIT as u64),
            "cache.vector_limit",
        )?,
        bitmap_limit: non_zero_usize(
            cache.bitmap_limit.unwrap_or(DEFAULT_BITMAP_LIMIT as u64),
            "cache.bitmap_limit",
        )?,
        failure_threshold: non_zero_u32(
            cache
                .failure_threshold
                .unwrap_or(u64::from(DEFAULT_FAILURE_THRESHOLD)),
            "cache.failure_threshold",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    engine_cli_path: Option<PathBuf>,
    x_height: Option<f64>,
    display_scale: Option<f64>,
    retry_after_purge: Option<bool>,
    font_cache: Option<String>,
    packages: Vec<String>,
    macros: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    vector_limit: Option<u64>,
    bitmap_limit: Option<u64>,
    failure_threshold: Option<u64>,
}

fn positive_f64(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(LoadError::invalid(
            key,
            format!("must be a finite number greater than zero, got {value}"),
        ))
    }
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
