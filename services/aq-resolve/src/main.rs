//! Air-quality resolver.
//!
//! Runs one request through the pipeline against the configured provider
//! and prints the outcome as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use pipeline::{AqiCategory, PipelineConfig, PipelineOrchestrator, Resolution, ResolveRequest};

#[derive(Parser, Debug)]
#[command(name = "aq-resolve")]
#[command(about = "Compute air-quality indices from satellite observations")]
struct Args {
    /// Configuration file (YAML); AQ_* variables override it
    #[arg(short, long, env = "AQ_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve indices over a region and time window
    Resolve {
        /// min_x,min_y,max_x,max_y
        #[arg(long, allow_hyphen_values = true)]
        bbox: String,

        /// CRS of the bounding box
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,

        /// ISO-8601 interval, start/end
        #[arg(long)]
        window: String,

        /// Comma-separated index names
        #[arg(long, default_value = "AQI")]
        indices: String,

        /// Accept an expired cached result
        #[arg(long)]
        stale: bool,

        /// Build a result even when some sub-queries failed
        #[arg(long)]
        accept_partial: bool,

        /// Give up after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print every cell instead of a summary
        #[arg(long)]
        full: bool,
    },

    /// List the indices a request may name
    Indices,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_env()?;
    info!(
        endpoint = %config.provider.endpoint,
        authenticated = config.provider.token.is_some(),
        "Loaded configuration"
    );

    let orchestrator = PipelineOrchestrator::from_config(config)?;

    match args.command {
        Command::Indices => {
            let indices = orchestrator.list_available_indices();
            println!("{}", serde_json::to_string_pretty(&indices)?);
        }
        Command::Resolve {
            bbox,
            crs,
            window,
            indices,
            stale,
            accept_partial,
            deadline_secs,
            full,
        } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, cancelling request");
                    on_interrupt.cancel();
                }
            });

            let mut request = match ResolveRequest::parse(&bbox, &crs, &window, &indices) {
                Ok(request) => request.cancel_with(cancel).stale_allowed(stale),
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&failure(&e))?);
                    std::process::exit(2);
                }
            };
            if accept_partial {
                request = request.accept_partial_fetch(true);
            }
            if let Some(secs) = deadline_secs {
                request = request.deadline(Duration::from_secs(secs));
            }

            match orchestrator.resolve(request).await {
                Ok(resolution) => {
                    let output = if full {
                        serde_json::to_value(&resolution)?
                    } else {
                        summarize(&resolution)
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                Err(e) => {
                    error!(kind = %e.kind, error = %e.message, "Request failed");
                    println!("{}", serde_json::to_string_pretty(&failure(&e))?);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn failure(e: &pipeline::RequestError) -> Value {
    json!({
        "error": e.kind,
        "status": e.http_status(),
        "retryable": e.kind.is_retryable(),
        "message": e.message,
    })
}

/// Per-index cell counts and maxima, plus the category of the worst AQI.
fn summarize(resolution: &Resolution) -> Value {
    let result = &resolution.result;
    let lattice = &result.lattice;

    let indices: serde_json::Map<String, Value> = result
        .indices
        .iter()
        .map(|(name, grid)| {
            let summary = json!({
                "valid_cells": grid.valid_count(),
                "max": grid.max(),
                "version": result.metadata.formula_versions.get(name),
            });
            (name.clone(), summary)
        })
        .collect();

    let worst = result
        .index("AQI")
        .and_then(|grid| grid.max())
        .and_then(AqiCategory::from_aqi)
        .map(|category| {
            json!({
                "category": category.number(),
                "label": category.label(),
                "health_recommendation": category.health_recommendation(),
            })
        });

    json!({
        "cache_key": resolution.cache_key,
        "cache_status": resolution.cache_status,
        "stale": resolution.stale,
        "partial_coverage": resolution.partial_coverage,
        "partial_fetch": result.metadata.partial_fetch,
        "lattice": {
            "crs": lattice.crs(),
            "bounds": lattice.bounds(),
            "nx": lattice.nx(),
            "ny": lattice.ny(),
            "nt": lattice.nt(),
        },
        "granules": result.metadata.provenance.len(),
        "channel_coverage": result.metadata.channel_coverage,
        "indices": indices,
        "worst_aqi": worst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_args() {
        let args = Args::try_parse_from([
            "aq-resolve",
            "resolve",
            "--bbox",
            "-105,30,-95,40",
            "--window",
            "2024-01-01T00:00:00Z/2024-01-02T00:00:00Z",
            "--indices",
            "AQI,NO2_AQI",
            "--deadline-secs",
            "30",
        ])
        .unwrap();
        match args.command {
            Command::Resolve {
                bbox,
                crs,
                indices,
                deadline_secs,
                stale,
                ..
            } => {
                assert_eq!(bbox, "-105,30,-95,40");
                assert_eq!(crs, "EPSG:4326");
                assert_eq!(indices, "AQI,NO2_AQI");
                assert_eq!(deadline_secs, Some(30));
                assert!(!stale);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_failure_json() {
        let e = pipeline::RequestError::invalid_input("unknown index \"PM25\"");
        let value = failure(&e);
        assert_eq!(value["status"], 400);
        assert_eq!(value["retryable"], false);
    }
}
