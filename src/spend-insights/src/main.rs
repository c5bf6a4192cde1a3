//! Spend Insights: ad-spend analytics from a published sheet, a CSV file
//! or a row endpoint.
//!
//! Loads the records, applies the filters carried by a shareable query
//! string and prints the resulting dashboard snapshot as JSON.

use anyhow::Context;
use clap::Parser;
use insights_cache::{FileStore, IntegrityCache, MemoryStore, TieredStore};
use insights_core::config::AppConfig;
use insights_core::{DashboardQuery, GroupBy, LoadError, RecoveryAction};
use insights_loader::{
    abort_pair, sheet_candidates, AbortHandle, BatchLoader, HttpTransport, LoadOutcome, RestRowSource, SourceCandidate,
};
use insights_reporting::{DashboardSession, RecordStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

type Store = TieredStore<MemoryStore, FileStore>;

#[derive(Parser, Debug)]
#[command(name = "spend-insights")]
#[command(about = "Ad-spend analytics: load, filter and aggregate ad performance records")]
#[command(version)]
struct Cli {
    /// Local CSV file (manual upload)
    #[arg(long, conflicts_with_all = ["sheet_id", "url", "rest_url"])]
    file: Option<PathBuf>,

    /// Published spreadsheet document id (overrides config)
    #[arg(long, env = "SPEND_INSIGHTS__SOURCE__DOCUMENT_ID")]
    sheet_id: Option<String>,

    /// Sheet (tab) id within the document (overrides config)
    #[arg(long, env = "SPEND_INSIGHTS__SOURCE__SHEET_GID")]
    gid: Option<String>,

    /// Direct CSV URL; repeat to add fallbacks
    #[arg(long)]
    url: Vec<String>,

    /// Row endpoint for database-backed loading (overrides config)
    #[arg(long, env = "SPEND_INSIGHTS__SOURCE__REST_URL")]
    rest_url: Option<String>,

    /// Shareable filter query, e.g. "startDate=2024-01-01&endDate=2024-01-07&country=US"
    #[arg(long, default_value = "")]
    query: String,

    /// Grouping dimension (overrides the query): shoot | adName
    #[arg(long)]
    group_by: Option<GroupBy>,

    /// Configuration file
    #[arg(long)]
    config: Option<String>,

    /// Cache directory (overrides config)
    #[arg(long, env = "SPEND_INSIGHTS__CACHE__DIR")]
    cache_dir: Option<PathBuf>,

    /// Disable the payload cache
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

/// Printed to stdout on success.
#[derive(Serialize)]
struct Report {
    stale: bool,
    share_query: String,
    snapshot: insights_reporting::DashboardSnapshot,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "spend_insights=info,insights_loader=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Spend Insights starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(id) = &cli.sheet_id {
        config.source.document_id = Some(id.clone());
    }
    if let Some(gid) = &cli.gid {
        config.source.sheet_gid = gid.clone();
    }
    if let Some(rest_url) = &cli.rest_url {
        config.source.rest_url = Some(rest_url.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache.dir = dir.clone();
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }

    info!(
        dataset = %config.source.dataset,
        batch_size = config.loader.batch_size,
        max_attempts = config.loader.max_attempts,
        cache = config.cache.enabled,
        cache_dir = %config.cache.dir.display(),
        "Configuration loaded"
    );

    let mut query = DashboardQuery::decode(&cli.query).context("invalid --query")?;
    if let Some(group_by) = cli.group_by {
        query.group_by = group_by;
    }

    let (abort, signal) = abort_pair();
    spawn_ctrl_c(abort);

    let mut loader = BatchLoader::<Store>::from_config(&config).with_abort(signal);
    if config.cache.enabled {
        let tiers = TieredStore::new(
            MemoryStore::new(config.cache.memory_quota_bytes),
            FileStore::new(config.cache.dir.clone()),
        )
        .with_write_through(true);
        let cache = IntegrityCache::new(tiers, Duration::from_secs(config.cache.ttl_secs));
        loader = loader.with_cache(Arc::new(cache));
        if let Some(cached) = loader.cached_snapshot().await {
            info!(records = cached.len(), "Cached records available");
        }
    }

    let records = RecordStore::new();
    let mut writer = records.writer();

    let result = if let Some(path) = &cli.file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        loader.load_text(&text, &path.display().to_string(), &mut writer).await
    } else if let Some(rest_url) = &config.source.rest_url {
        let source = RestRowSource::new(
            rest_url,
            config.source.rest_api_key.clone(),
            Duration::from_millis(config.loader.fetch_timeout_ms),
        )?;
        loader.load_paged(&source, &mut writer).await
    } else {
        let candidates = candidates(&cli, &config)?;
        let transport = HttpTransport::new(Duration::from_secs(10))?;
        loader.load(&transport, &candidates, &mut writer).await
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            report_failure(&e);
            return Err(e.into());
        }
    };
    if let LoadOutcome::Stale { cached_at, error, .. } = &outcome {
        warn!(%cached_at, %error, "Source unreachable, showing cached data");
    }

    let mut session = DashboardSession::new(records);
    session.apply_query(query);
    let snapshot = session.refresh();

    let report = Report {
        stale: outcome.is_stale(),
        share_query: format!("?{}", session.query().encode()),
        snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!(records = report.snapshot.total_records, "Done");
    Ok(())
}

fn candidates(cli: &Cli, config: &AppConfig) -> anyhow::Result<Vec<SourceCandidate>> {
    let mut extra = cli.url.clone();
    extra.extend(config.source.fallback_urls.iter().cloned());

    match &config.source.document_id {
        Some(id) => Ok(sheet_candidates(id, &config.source.sheet_gid, &extra)?),
        None if !extra.is_empty() => Ok(extra
            .iter()
            .enumerate()
            .map(|(i, url)| SourceCandidate::new(format!("url-{}", i + 1), url.clone()))
            .collect()),
        None => anyhow::bail!("no source given: use --file, --sheet-id, --url or --rest-url"),
    }
}

fn spawn_ctrl_c(abort: AbortHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling load");
            abort.abort();
        }
    });
}

fn report_failure(e: &LoadError) {
    match e.user_action() {
        RecoveryAction::ManualUpload => {
            error!(error = %e, "Could not reach the source; export the sheet as CSV and pass it with --file")
        }
        RecoveryAction::Retry => error!(error = %e, "Load failed; try again"),
        RecoveryAction::CheckSource => error!(error = %e, "The source data looks broken; check the sheet"),
        RecoveryAction::None => info!("Load cancelled"),
    }
}
