use std::{
    path::Path,
    process,
    sync::Arc,
    time::Instant,
};

use calamo::{
    application::{
        error::AppError,
        parse::ParsedSourceMemo,
        render::RenderPipeline,
        report::RenderReport,
    },
    cache::{CacheConfig, CacheStore, FailureTracker},
    config,
    domain::{error::DomainError, markup::DelimiterParser, types::Block},
    infra::{
        engine::CommandEngine, error::InfraError, export::write_png, raster::ResvgRasterizer,
        telemetry,
    },
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Render(args) => run_render(settings, *args).await,
        config::Command::Inspect(args) => run_inspect(args).await,
    }
}

async fn run_inspect(args: config::InspectArgs) -> Result<(), AppError> {
    let raw_text = read_source(&args.source.file).await?;
    let memo = ParsedSourceMemo::new(Arc::new(DelimiterParser));
    let blocks = memo.parse_or_reuse(&args.source.parse_inputs(raw_text));

    print_json(&RenderReport::from_blocks(&blocks, 0.0))
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let raw_text = read_source(&args.source.file).await?;
    if let Some(dir) = args.out_dir.as_ref() {
        prepare_out_dir(dir).await?;
    }

    let cache_config = CacheConfig::from(&settings.cache);
    let store = Arc::new(CacheStore::new(&cache_config));
    let tracker = Arc::new(FailureTracker::new(
        Arc::clone(&store),
        cache_config.failure_threshold_clamped(),
    ));
    let pipeline = Arc::new(
        RenderPipeline::new(
            store,
            tracker,
            Arc::new(CommandEngine::new(settings.render.engine_cli_path.clone())),
            Arc::new(ResvgRasterizer::new()),
        )
        .with_retry_policy(settings.render.retry_policy()),
    );
    let params = settings.render.params();
    let memo = ParsedSourceMemo::new(Arc::new(DelimiterParser));
    let inputs = args.source.parse_inputs(raw_text);

    let mut rendered: Vec<Block> = Vec::new();
    for pass in 1..=args.repeat {
        let blocks = memo.parse_or_reuse(&inputs);
        let cached = pipeline.blocks_exist_in_cache(&blocks, &params);
        let started_at = Instant::now();
        rendered = Arc::clone(&pipeline)
            .render_in_background(blocks.to_vec(), params.clone())
            .await;

        let report = RenderReport::from_blocks(&rendered, params.x_height);
        info!(
            target = "calamo",
            op = "render",
            pass,
            cached,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            equations = report.equations,
            rendered = report.rendered,
            failed = report.failed,
            purges = pipeline.tracker().purge_count(),
            "Render pass finished"
        );
    }

    if let Some(dir) = args.out_dir.as_ref() {
        export_bitmaps(dir, &rendered)?;
    }
    print_json(&RenderReport::from_blocks(&rendered, params.x_height))
}

async fn read_source(path: &Path) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(InfraError::from)?;
    String::from_utf8(bytes).map_err(|err| {
        AppError::from(DomainError::validation(format!(
            "`{}` is not valid UTF-8: {err}",
            path.display()
        )))
    })
}

async fn prepare_out_dir(dir: &Path) -> Result<(), AppError> {
    match tokio::fs::metadata(dir).await {
        Ok(metadata) if !metadata.is_dir() => Err(AppError::from(InfraError::configuration(
            format!("output path `{}` exists and is not a directory", dir.display()),
        ))),
        Ok(_) => Ok(()),
        Err(_) => {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(InfraError::from)?;
            Ok(())
        }
    }
}

fn export_bitmaps(dir: &Path, blocks: &[Block]) -> Result<(), AppError> {
    let equations = blocks.iter().flat_map(|block| block.equations());
    for (index, component) in equations.enumerate() {
        let Some(image) = component.image.as_ref() else {
            warn!(
                target = "calamo",
                op = "export",
                index,
                "Skipping unrendered equation"
            );
            continue;
        };
        let path = dir.join(format!("equation-{index:03}.png"));
        write_png(&path, image)?;
        info!(
            target = "calamo",
            op = "export",
            index,
            path = %path.display(),
            "Equation bitmap written"
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
