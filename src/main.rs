use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

mod cli;
mod error;
mod extract;
mod framing;
mod listing;
mod manifest;
mod pool;
mod progress;
mod source;

use cli::Cli;
use error::{CoreError, FramingError};
use framing::PayloadFraming;
use progress::{IndicatifReporter, NullReporter, ProgressReporter};
use source::BoxSource;

fn init_logging(cli: &Cli) {
    let level: LevelFilter = cli.log_filter().parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();
}

fn open_input(cli: &Cli, reporter: &dyn ProgressReporter) -> Result<BoxSource> {
    if cli.is_url() {
        let http = source::http::HttpRangeFile::open(&cli.payloadfile, cli.resolve_user_agent().as_deref())
            .with_context(|| format!("failed to open {}", cli.payloadfile))?
            .with_progress(reporter.download_sink());
        Ok(Box::new(http))
    } else {
        let file = source::local::open(std::path::Path::new(&cli.payloadfile))?;
        Ok(Box::new(file))
    }
}

/// Opens `cli`'s input and parses the payload framing, falling back to
/// the ZIP archive opener (C2) when the raw bytes aren't a valid payload
/// header.
fn open_and_parse_payload(
    cli: &Cli,
    reporter: &dyn ProgressReporter,
) -> Result<(BoxSource, PayloadFraming)> {
    let mut raw = open_input(cli, reporter)?;
    match framing::parse(&mut raw) {
        Ok(framing) => Ok((raw, framing)),
        Err(FramingError::BadMagic) => {
            let entry = source::zip::open_payload_entry(raw)
                .context("not a valid payload, and not a zip containing payload.bin")?;
            let mut entry: BoxSource = Box::new(entry);
            let framing = framing::parse(&mut entry).context("failed to parse payload.bin inside zip")?;
            Ok((entry, framing))
        }
        Err(other) => Err(other).context("failed to parse payload framing"),
    }
}

/// Prints the required message and returns `true` when `preloaded` selects
/// no partitions at all, matching the original tool's
/// `"Not operating on any partitions"` short-circuit.
fn announce_if_nothing_to_do(preloaded: &[pool::PreloadedPartition]) -> bool {
    if preloaded.is_empty() {
        println!("Not operating on any partitions");
        true
    } else {
        false
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    let reporter: Arc<dyn ProgressReporter> =
        if cli.quiet { Arc::new(NullReporter) } else { Arc::new(IndicatifReporter::new()) };

    if cli.metadata {
        let raw = open_input(&cli, reporter.as_ref())?;
        listing::extract_metadata(raw, &cli.out)?;
        return Ok(ExitCode::SUCCESS);
    }

    let (mut source, framing) = open_and_parse_payload(&cli, reporter.as_ref())?;

    if cli.list {
        listing::write_partition_listing(&framing.manifest, &cli.out)?;
        return Ok(ExitCode::SUCCESS);
    }

    let selected = cli.partition_filter();
    let preloaded = pool::preload(
        &mut source,
        &framing.manifest,
        framing.data_offset,
        selected.as_deref(),
        reporter.as_ref(),
    )
    .context("failed to pre-load operation data from the payload")?;
    drop(source);

    if announce_if_nothing_to_do(&preloaded) {
        return Ok(ExitCode::SUCCESS);
    }

    let config = pool::ExtractConfig {
        out_dir: cli.out.clone(),
        diff_mode: cli.diff,
        old_dir: cli.old.clone(),
        workers: cli.resolve_workers(),
    };

    let failures = pool::run(&framing.manifest, &config, preloaded, reporter.as_ref())?;

    let mut fatal_code: Option<u8> = None;
    for failure in &failures {
        log::error!("partition {} failed: {:#}", failure.partition_name, failure.error);
        if let Some(core_err) = failure.error.downcast_ref::<CoreError>() {
            if let Some(code) = core_err.exit_code() {
                fatal_code.get_or_insert(code);
            }
        }
    }

    if let Some(code) = fatal_code {
        return Ok(ExitCode::from(code));
    }
    if !failures.is_empty() {
        return Ok(ExitCode::FAILURE);
    }

    log::info!("extraction complete");
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            if let Some(core_err) = err.downcast_ref::<CoreError>() {
                if let Some(code) = core_err.exit_code() {
                    eprintln!("error: {err:#}");
                    return ExitCode::from(code);
                }
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
