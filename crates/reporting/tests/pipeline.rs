use async_trait::async_trait;
use insights_cache::{FileStore, IntegrityCache, MemoryStore, TieredStore};
use insights_core::{DashboardQuery, FilterDimension, LoadError, LoadResult};
use insights_loader::{
    BatchLoader, ChunkedParser, DownloadProgress, LoadOutcome, LoaderSettings, RetryPolicy, SourceCandidate,
    SourceTransport,
};
use insights_reporting::{DashboardSession, RecordStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

type DiskCache = IntegrityCache<TieredStore<MemoryStore, FileStore>>;

const SOURCE: &str = "\
Day,Ad Name,Amount Spent (USD),Country,Shoot,Objective,Season,Is First Instance
2024-01-01,Hero A,50,US,Beach,Prospecting,Summer,1
2024-01-02,Hero B,50,US,Studio,Remarketing,Summer,0
2024-01-03,Hero A,60,US,Beach,Prospecting,Summer,0
2024-01-04,Hero C,40,UK,Studio,Brand,Winter,1
2024-01-04,,999,UK,Studio,Brand,Winter,1
";

fn cache_in(dir: &Path) -> Arc<DiskCache> {
    let tiers = TieredStore::new(MemoryStore::new(1 << 20), FileStore::new(dir)).with_write_through(true);
    Arc::new(IntegrityCache::new(tiers, Duration::from_secs(600)))
}

fn loader(cache: Arc<DiskCache>) -> BatchLoader<TieredStore<MemoryStore, FileStore>> {
    let settings = LoaderSettings {
        batch_size: 2,
        inter_batch_delay: Duration::ZERO,
        fetch_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        jitter: false,
        ..Default::default()
    };
    BatchLoader::new(settings, retry, Box::new(ChunkedParser::new(2))).with_cache(cache)
}

struct Offline;

#[async_trait]
impl SourceTransport for Offline {
    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        _progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> LoadResult<String> {
        Err(LoadError::Network {
            attempts: 1,
            message: format!("{} offline", candidate.label),
        })
    }
}

#[tokio::test]
async fn test_upload_filter_and_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::new();
    let mut writer = store.writer();

    let outcome = loader(cache_in(dir.path()))
        .load_text(SOURCE, "upload.csv", &mut writer)
        .await
        .unwrap();
    assert!(matches!(outcome, LoadOutcome::Fresh { records: 4, .. }));
    assert!(writer.is_complete());
    assert_eq!(writer.batches(), 2);
    assert_eq!(store.len(), 4);

    let mut session = DashboardSession::new(store);
    session.apply_query(DashboardQuery::decode("?startDate=2024-01-03&endDate=2024-01-04&groupBy=shoot").unwrap());
    let snapshot = session.refresh();

    assert_eq!(snapshot.summary.total_spend, 100.0);
    assert_eq!(snapshot.aggregates.len(), 2);
    assert_eq!(snapshot.aggregates[0].group_key, "Beach");
    assert!((snapshot.aggregates[0].current_share - 60.0).abs() < 1e-9);
    assert!((snapshot.aggregates[0].change_percent.unwrap() - 20.0).abs() < 1e-9);
    assert!((snapshot.aggregates[1].change_percent.unwrap() + 20.0).abs() < 1e-9);
    assert_eq!(snapshot.options[&FilterDimension::Season].len(), 2);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    loader(cache_in(dir.path()))
        .load_text(SOURCE, "upload.csv", &mut RecordStore::new().writer())
        .await
        .unwrap();

    // Fresh memory tier, same directory
    let store = RecordStore::new();
    let outcome = loader(cache_in(dir.path()))
        .load_text(SOURCE, "upload.csv", &mut store.writer())
        .await
        .unwrap();
    assert!(matches!(outcome, LoadOutcome::Fresh { reused_parse: true, .. }));
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn test_offline_serves_stale_data() {
    let dir = tempfile::tempdir().unwrap();
    loader(cache_in(dir.path()))
        .load_text(SOURCE, "upload.csv", &mut RecordStore::new().writer())
        .await
        .unwrap();

    let store = RecordStore::new();
    let candidates = vec![SourceCandidate::new("export", "https://example.com/export.csv")];
    let outcome = loader(cache_in(dir.path()))
        .load(&Offline, &candidates, &mut store.writer())
        .await
        .unwrap();

    match outcome {
        LoadOutcome::Stale { records, source, .. } => {
            assert_eq!(records, 4);
            assert_eq!(source, "upload.csv");
        }
        other => panic!("expected stale data, got {other:?}"),
    }
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn test_offline_without_cache_asks_for_upload() {
    let dir = tempfile::tempdir().unwrap();
    let candidates = vec![SourceCandidate::new("export", "https://example.com/export.csv")];
    let err = loader(cache_in(dir.path()))
        .load(&Offline, &candidates, &mut RecordStore::new().writer())
        .await
        .unwrap_err();
    assert_eq!(err.user_action(), insights_core::RecoveryAction::ManualUpload);
}
