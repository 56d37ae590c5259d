//! Conversion engine backed by an external TeX-to-SVG command.
//!
//! The command receives the equation as its last argument and prints SVG on
//! stdout. Invocation:
//!
//! ```text
//! <cli> [--inline] [--packages a,b] --font-cache <mode> [--macro name=body]... -- <tex>
//! ```

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use tracing::{debug, warn};

use crate::application::render::{ConversionEngine, EngineError, EngineOutput};
use crate::domain::types::{ConversionOptions, EngineOptions};

/// Attribute the engine puts on the node describing a TeX error.
const ERROR_ATTRIBUTE: &str = "data-mjx-error";

#[derive(Debug, Clone)]
pub struct CommandEngine {
    cli_path: PathBuf,
}

impl CommandEngine {
    pub fn new(cli_path: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    pub fn cli_path(&self) -> &Path {
        &self.cli_path
    }

    fn command(
        &self,
        text: &str,
        conversion: &ConversionOptions,
        engine: &EngineOptions,
    ) -> Command {
        let mut command = Command::new(&self.cli_path);
        if !conversion.display {
            command.arg("--inline");
        }
        if !engine.packages.is_empty() {
            command.arg("--packages").arg(engine.packages.join(","));
        }
        command.arg("--font-cache").arg(engine.font_cache.as_str());
        for (name, body) in &engine.macros {
            command.arg("--macro").arg(format!("{name}={body}"));
        }
        command
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl ConversionEngine for CommandEngine {
    fn convert(
        &self,
        text: &str,
        conversion: &ConversionOptions,
        engine: &EngineOptions,
    ) -> Result<EngineOutput, EngineError> {
        let started_at = Instant::now();
        let output = self
            .command(text, conversion, engine)
            .output()
            .map_err(|err| {
                warn!(
                    target = "infra::engine",
                    op = "engine::convert",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    cli_path = %self.cli_path.display(),
                    error = %err,
                    "Failed to spawn conversion CLI"
                );
                match err.kind() {
                    ErrorKind::NotFound | ErrorKind::PermissionDenied => EngineError::Unavailable(
                        format!("{}: {err}", self.cli_path.display()),
                    ),
                    _ => EngineError::Unavailable(err.to_string()),
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "infra::engine",
                op = "engine::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code,
                error_code = "engine_cli",
                stderr = %stderr,
                "Conversion CLI rejected input"
            );
            let message = if stderr.is_empty() {
                format!("exit status {exit_code}")
            } else {
                stderr
            };
            return Err(EngineError::Rejected(message));
        }

        let markup = String::from_utf8(output.stdout)
            .map_err(|err| EngineError::Rejected(format!("output is not UTF-8: {err}")))?;
        let diagnostic = embedded_error(&markup);

        debug!(
            target = "infra::engine",
            op = "engine::convert",
            result = if diagnostic.is_some() { "diagnostic" } else { "ok" },
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            svg_bytes = markup.len(),
            "Conversion CLI finished"
        );

        Ok(EngineOutput { markup, diagnostic })
    }
}

/// The error message embedded in successful output, if any. Unparseable
/// markup yields `None`; the gateway rejects it on its own.
fn embedded_error(markup: &str) -> Option<String> {
    let document = roxmltree::Document::parse(markup).ok()?;
    document
        .descendants()
        .find_map(|node| node.attribute(ERROR_ATTRIBUTE))
        .map(str::to_string)
}
