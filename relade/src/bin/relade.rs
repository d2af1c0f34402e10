use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use futures::future::join_all;
use relade::{artifact, config, copier, document, rebase};
use relade_elastic::{Client, Credentials};
use tokio::runtime::Builder;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Artifact error: {0}")]
    Artifact(#[from] artifact::Error),
    #[error("Cluster error: {0}")]
    Elastic(#[from] relade_elastic::client::Error),
}

fn default_index_pattern() -> String {
    document::ARTILLERY_INDEX_PATTERN.to_string()
}

/// Republish an Artillery result into Elasticsearch on a rebased clock.
///
/// Every per-request record is shifted by a constant offset so the run's
/// first request lands on the given time of day, making runs from different
/// calendar days chart side by side. Copy sources configured through
/// RELADE_SOURCE_* environment variables are replicated into the target over
/// the same window with the same shift.
#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Artillery result file (json)
    artifact: PathBuf,
    /// Target cluster base url
    server_url: String,
    /// Target cluster username
    username: String,
    /// Target cluster password
    password: String,
    /// Time of day (HH:mm:ss) the run's start is rebased onto
    rebase_time: rebase::RebaseTime,
    /// Extra field added to every document, format `-f name value`,
    /// repeatable. Collides with computed fields deliberately: the extra
    /// field wins.
    #[clap(short = 'f', value_names = ["NAME", "VALUE"], num_args = 2, action = clap::ArgAction::Append)]
    field: Vec<String>,
    /// Index the artillery records route to, optionally date-patterned
    #[clap(long, default_value_t = default_index_pattern())]
    index: String,
}

async fn inner_main(cli: Cli) -> Result<(), Error> {
    let extra_fields: Vec<(String, String)> = cli
        .field
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    for (name, value) in &extra_fields {
        info!("Got extra field: '{name}' '{value}'");
    }

    let raw = tokio::fs::read(&cli.artifact).await?;
    let report = artifact::parse(&raw)?;

    let observed = report.earliest_start_ms.rem_euclid(rebase::DAY_MS);
    let offset_ms = cli.rebase_time.offset_from(observed);
    info!(
        "EarliestStartTime: {earliest}, LastEndTime: {last}, offset_ms: {offset_ms}",
        earliest = document::format_timestamp_ms(report.earliest_start_ms),
        last = document::format_timestamp_ms(report.last_end_ms),
    );

    let target = Client::new(
        &cli.server_url,
        Credentials {
            username: cli.username.clone(),
            password: cli.password.clone(),
        },
    )?;

    let documents: Vec<_> = report
        .requests
        .iter()
        .map(|request| {
            document::from_request(request, &report.run_id, offset_ms, &extra_fields, &cli.index)
        })
        .collect();
    info!("Request count: {count}", count = documents.len());
    target.bulk(&documents).await?;

    copy_sources(&report, offset_ms, &extra_fields, &target).await;

    Ok(())
}

/// Replicate every configured copy source around the run's window. Sources
/// are independent: each failure is logged and the rest proceed, and none
/// affects the exit code. The primary upload has already landed.
async fn copy_sources(
    report: &artifact::RunReport,
    offset_ms: i64,
    extra_fields: &[(String, String)],
    target: &Client,
) {
    let sources = config::copy_sources_from_env();
    if sources.is_empty() {
        return;
    }
    let dump_dir = config::debug_dump_dir();

    let interval_start_ms = report.earliest_start_ms - copier::INTERVAL_PADDING_MS;
    let interval_end_ms = report.last_end_ms + copier::INTERVAL_PADDING_MS;

    let passes = sources.iter().map(|source| {
        let dump_dir = dump_dir.clone();
        async move {
            let client = match Client::new(
                &source.server_url,
                Credentials {
                    username: source.username.clone(),
                    password: source.password.clone(),
                },
            ) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Skipping copy source {name}: {e}", name = source.name);
                    return;
                }
            };

            let copy = copier::Copier::new(
                source,
                offset_ms,
                extra_fields,
                interval_start_ms,
                interval_end_ms,
                dump_dir,
            );
            if let Err(e) = copy.run(&client, target).await {
                error!("Copy source {name} failed: {e}", name = source.name);
            }
        }
    });
    join_all(passes).await;
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting relade {version} run.");

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage and validation errors exit 1, matching every other
            // failure of the primary path.
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Builder::new_multi_thread().enable_io().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(inner_main(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
