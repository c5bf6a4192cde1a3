//! Batch loader: fetch with retry and candidate rotation, parse, validate,
//! cache, then hand records to an observer in bounded batches.
//!
//! Delivery contract, for every transport:
//! - `on_first_batch` fires exactly once, before any `on_batch`;
//! - `on_batch(.., true)` fires exactly once, on the last call;
//! - batches arrive in source order, and nothing fires after an abort.
//!
//! When the whole payload fits in the first batch, the completion flag
//! arrives on an empty trailing batch.

use crate::abort::AbortSignal;
use crate::parser::ParseProgress;
use crate::phase::LoadPhase;
use crate::rest::{PagedSource, RowPage};
use crate::retry::RetryPolicy;
use crate::strategy::{select_parser, RecordParser};
use crate::transport::{DownloadProgress, SourceCandidate, SourceTransport};
use chrono::{DateTime, Utc};
use insights_cache::{checksum, CacheStore, IntegrityCache};
use insights_core::config::AppConfig;
use insights_core::{LoadError, LoadResult, Record};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Receives records as they become available.
pub trait BatchObserver: Send {
    fn on_first_batch(&mut self, batch: Vec<Record>);

    fn on_batch(&mut self, batch: Vec<Record>, is_complete: bool);

    fn on_progress(&mut self, _progress: DownloadProgress) {}

    fn on_parse_progress(&mut self, _progress: ParseProgress) {}

    fn on_phase(&mut self, _phase: &LoadPhase) {}
}

/// How a load finished.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Data from the source. `reused_parse` is set when the payload
    /// checksum matched the cache and parsing was skipped.
    Fresh {
        records: usize,
        source: String,
        checksum: String,
        reused_parse: bool,
    },
    /// Every attempt failed; cached data was served instead.
    Stale {
        records: usize,
        source: String,
        cached_at: DateTime<Utc>,
        error: String,
    },
    /// Another load was in flight; nothing happened.
    AlreadyLoading,
}

impl LoadOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, LoadOutcome::Stale { .. })
    }
}

/// Tunables not covered by the retry policy.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub batch_size: usize,
    pub page_size: usize,
    pub fetch_timeout: Duration,
    pub inter_batch_delay: Duration,
    pub max_error_rate: f64,
    pub health_check: bool,
    pub cache_key: String,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl LoaderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.loader.batch_size.max(1),
            page_size: config.loader.page_size.max(1),
            fetch_timeout: Duration::from_millis(config.loader.fetch_timeout_ms),
            inter_batch_delay: Duration::from_millis(config.loader.inter_batch_delay_ms),
            max_error_rate: config.parser.max_error_rate,
            health_check: config.source.health_check,
            cache_key: config.cache_key(),
        }
    }
}

/// Clears the in-flight flag however the load ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BatchLoader<S> {
    settings: LoaderSettings,
    retry: RetryPolicy,
    parser: Box<dyn RecordParser>,
    cache: Option<Arc<IntegrityCache<S>>>,
    abort: AbortSignal,
    in_flight: AtomicBool,
    phase: watch::Sender<LoadPhase>,
}

impl<S: CacheStore> BatchLoader<S> {
    pub fn new(settings: LoaderSettings, retry: RetryPolicy, parser: Box<dyn RecordParser>) -> Self {
        let (phase, _) = watch::channel(LoadPhase::Idle);
        Self {
            settings,
            retry,
            parser,
            cache: None,
            abort: AbortSignal::never(),
            in_flight: AtomicBool::new(false),
            phase,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            LoaderSettings::from_config(config),
            RetryPolicy::from_config(&config.loader),
            select_parser(&config.parser),
        )
    }

    pub fn with_cache(mut self, cache: Arc<IntegrityCache<S>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    /// Subscribe to lifecycle changes.
    pub fn phase(&self) -> watch::Receiver<LoadPhase> {
        self.phase.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Fetch from the first candidate that answers, then parse and deliver.
    pub async fn load(
        &self,
        transport: &dyn SourceTransport,
        candidates: &[SourceCandidate],
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<LoadOutcome> {
        let Some(_guard) = self.begin() else {
            debug!("Load already in flight, ignoring request");
            return Ok(LoadOutcome::AlreadyLoading);
        };
        let span = info_span!("load", load_id = %Uuid::new_v4(), candidates = candidates.len());
        let result = self.load_inner(transport, candidates, observer).instrument(span).await;
        self.finish(result, observer)
    }

    /// Manual upload: the text is already here.
    pub async fn load_text(
        &self,
        text: &str,
        source_identifier: &str,
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<LoadOutcome> {
        let Some(_guard) = self.begin() else {
            return Ok(LoadOutcome::AlreadyLoading);
        };
        let span = info_span!("load_text", load_id = %Uuid::new_v4(), source = source_identifier);
        let result = self
            .process_text(text.to_string(), source_identifier, observer)
            .instrument(span)
            .await;
        self.finish(result, observer)
    }

    /// Database-backed load: pages are delivered as batches.
    pub async fn load_paged(
        &self,
        source: &dyn PagedSource,
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<LoadOutcome> {
        let Some(_guard) = self.begin() else {
            return Ok(LoadOutcome::AlreadyLoading);
        };
        let span = info_span!("load_paged", load_id = %Uuid::new_v4(), source = %source.identifier());
        let result = self.load_paged_inner(source, observer).instrument(span).await;
        self.finish(result, observer)
    }

    /// Cached records for an immediate first paint, if any are fresh.
    pub async fn cached_snapshot(&self) -> Option<Vec<Record>> {
        let cache = self.cache.as_ref()?;
        cache
            .latest::<Record>(&self.settings.cache_key)
            .await
            .map(|entry| entry.payload)
    }

    fn begin(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.in_flight))
    }

    fn set_phase(&self, phase: LoadPhase, observer: &mut dyn BatchObserver) {
        debug!(phase = phase.name(), "Load phase");
        observer.on_phase(&phase);
        self.phase.send_replace(phase);
    }

    fn finish(&self, result: LoadResult<LoadOutcome>, observer: &mut dyn BatchObserver) -> LoadResult<LoadOutcome> {
        match &result {
            Ok(outcome) => info!(?outcome, "Load finished"),
            Err(LoadError::Cancelled) => {
                // No observer callbacks after an abort
                self.phase.send_replace(LoadPhase::Idle);
                info!("Load cancelled");
            }
            Err(e) => {
                metrics::counter!("loader.failures").increment(1);
                error!(error = %e, "Load failed");
                self.set_phase(LoadPhase::Failed { reason: e.to_string() }, observer);
            }
        }
        result
    }

    async fn load_inner(
        &self,
        transport: &dyn SourceTransport,
        candidates: &[SourceCandidate],
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<LoadOutcome> {
        if candidates.is_empty() {
            return Err(LoadError::Transport("no source candidates configured".to_string()));
        }

        if self.settings.health_check {
            self.set_phase(LoadPhase::HealthCheck, observer);
            if let Err(e) = transport.health_check(&candidates[0]).await {
                warn!(source = %candidates[0].label, error = %e, "Health check failed, fetching anyway");
            }
        }

        match self.fetch_with_retry(transport, candidates, observer).await {
            Ok((text, candidate)) => self.process_text(text, &candidate.url, observer).await,
            Err(LoadError::Cancelled) => Err(LoadError::Cancelled),
            Err(e) => self.fall_back_to_cache(e, observer).await,
        }
    }

    async fn fetch_with_retry<'c>(
        &self,
        transport: &dyn SourceTransport,
        candidates: &'c [SourceCandidate],
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<(String, &'c SourceCandidate)> {
        let mut candidate_index = 0usize;
        let mut last_error = None;
        // Every candidate gets at least one attempt, whatever the retry budget
        let max_attempts = self.retry.max_attempts.max(candidates.len() as u32);

        for attempt in 0..max_attempts {
            let candidate = &candidates[candidate_index % candidates.len()];
            self.set_phase(
                LoadPhase::Fetching {
                    attempt: attempt + 1,
                    source: candidate.label.clone(),
                },
                observer,
            );

            match self.fetch_once(transport, candidate, observer).await {
                Ok(text) => return Ok((text, candidate)),
                Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
                Err(e) => {
                    warn!(attempt = attempt + 1, source = %candidate.label, error = %e, "Fetch attempt failed");
                    // Slow sources get another try; broken ones are rotated out
                    if !matches!(e, LoadError::Timeout(_)) {
                        candidate_index += 1;
                    }
                    last_error = Some(e);
                }
            }

            if attempt + 1 < max_attempts {
                let delay = self.retry.backoff_for_attempt(attempt);
                metrics::counter!("loader.retries").increment(1);
                self.set_phase(
                    LoadPhase::Retrying {
                        attempt: attempt + 1,
                        delay_ms: delay.as_millis() as u64,
                    },
                    observer,
                );
                self.sleep(delay).await?;
            }
        }

        let message = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(LoadError::Network {
            attempts: max_attempts,
            message,
        })
    }

    async fn fetch_once(
        &self,
        transport: &dyn SourceTransport,
        candidate: &SourceCandidate,
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = move |p: DownloadProgress| {
            let _ = tx.send(p);
        };
        let fetch = transport.fetch(candidate, &report);
        tokio::pin!(fetch);
        let deadline = tokio::time::sleep(self.settings.fetch_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = self.abort.aborted() => return Err(LoadError::Cancelled),
                _ = &mut deadline => {
                    return Err(LoadError::Timeout(self.settings.fetch_timeout.as_millis() as u64));
                }
                Some(progress) = rx.recv() => observer.on_progress(progress),
                result = &mut fetch => {
                    while let Ok(progress) = rx.try_recv() {
                        observer.on_progress(progress);
                    }
                    return result;
                }
            }
        }
    }

    async fn process_text(
        &self,
        text: String,
        source: &str,
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<LoadOutcome> {
        let sum = checksum(&text);

        if let Some(cache) = &self.cache {
            if let Some(records) = cache.retrieve::<Record>(&self.settings.cache_key, &sum).await {
                info!(records = records.len(), checksum = %sum, "Payload unchanged, reusing cached parse");
                let count = self.deliver(records, observer).await?;
                self.set_phase(LoadPhase::Complete { records: count, stale: false }, observer);
                return Ok(LoadOutcome::Fresh {
                    records: count,
                    source: source.to_string(),
                    checksum: sum,
                    reused_parse: true,
                });
            }
        }

        self.set_phase(LoadPhase::Parsing, observer);
        let text: Arc<str> = text.into();
        let report = self.parse_with_progress(text.clone(), observer).await?;
        report.check_error_rate(self.settings.max_error_rate)?;
        info!(
            parser = self.parser.name(),
            rows = report.total_rows,
            records = report.records.len(),
            skipped = report.skipped,
            malformed = report.malformed,
            "Payload parsed"
        );

        if let Some(cache) = &self.cache {
            cache
                .store(&self.settings.cache_key, &text, &report.records, source)
                .await;
        }

        let count = self.deliver(report.records, observer).await?;
        self.set_phase(LoadPhase::Complete { records: count, stale: false }, observer);
        Ok(LoadOutcome::Fresh {
            records: count,
            source: source.to_string(),
            checksum: sum,
            reused_parse: false,
        })
    }

    async fn parse_with_progress(
        &self,
        text: Arc<str>,
        observer: &mut dyn BatchObserver,
    ) -> LoadResult<crate::parser::ParseReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parse = self.parser.parse(text, Some(tx), &self.abort);
        tokio::pin!(parse);

        loop {
            tokio::select! {
                biased;
                _ = self.abort.aborted() => return Err(LoadError::Cancelled),
                Some(progress) = rx.recv() => observer.on_parse_progress(progress),
                result = &mut parse => return result,
            }
        }
    }

    async fn fall_back_to_cache(&self, error: LoadError, observer: &mut dyn BatchObserver) -> LoadResult<LoadOutcome> {
        if !self.retry.cache_fallback {
            return Err(error);
        }
        let Some(cache) = &self.cache else {
            return Err(error);
        };
        let Some(entry) = cache.latest::<Record>(&self.settings.cache_key).await else {
            return Err(error);
        };

        warn!(
            error = %error,
            cached_at = %entry.timestamp,
            records = entry.record_count,
            "All fetch attempts failed, serving cached data"
        );
        metrics::counter!("loader.stale_served").increment(1);
        let cached_at = entry.timestamp;
        let source = entry.source_identifier.clone();
        let count = self.deliver(entry.payload, observer).await?;
        self.set_phase(LoadPhase::Complete { records: count, stale: true }, observer);
        Ok(LoadOutcome::Stale {
            records: count,
            source,
            cached_at,
            error: error.to_string(),
        })
    }

    /// Split into batches and hand them over in order, yielding in between.
    async fn deliver(&self, records: Vec<Record>, observer: &mut dyn BatchObserver) -> LoadResult<usize> {
        let total = records.len();
        let batch_size = self.settings.batch_size;
        let mut remaining = records.into_iter();

        self.ensure_live()?;
        let first: Vec<Record> = remaining.by_ref().take(batch_size).collect();
        let mut delivered = first.len();
        self.set_phase(LoadPhase::FirstBatchReady { records: delivered }, observer);
        observer.on_first_batch(first);
        metrics::counter!("loader.batches").increment(1);

        if delivered == total {
            observer.on_batch(Vec::new(), true);
            return Ok(total);
        }

        while delivered < total {
            self.pause_between_batches().await?;
            let batch: Vec<Record> = remaining.by_ref().take(batch_size).collect();
            delivered += batch.len();
            self.set_phase(LoadPhase::LoadingMore { delivered, total }, observer);
            observer.on_batch(batch, delivered == total);
            metrics::counter!("loader.batches").increment(1);
        }

        Ok(total)
    }

    async fn load_paged_inner(&self, source: &dyn PagedSource, observer: &mut dyn BatchObserver) -> LoadResult<LoadOutcome> {
        let limit = self.settings.page_size;
        let identifier = source.identifier();

        self.set_phase(
            LoadPhase::Fetching {
                attempt: 1,
                source: identifier.clone(),
            },
            observer,
        );
        let mut current = match self.fetch_page_with_retry(source, 0, limit).await {
            Ok(page) => page,
            Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
            Err(e) => return self.fall_back_to_cache(e, observer).await,
        };

        self.ensure_live()?;
        let mut all: Vec<Record> = current.records.clone();
        let mut more = !current.is_last(limit);
        self.set_phase(LoadPhase::FirstBatchReady { records: all.len() }, observer);
        observer.on_first_batch(std::mem::take(&mut current.records));
        metrics::counter!("loader.batches").increment(1);
        if !more {
            observer.on_batch(Vec::new(), true);
        }

        // A full page may be followed by an empty one; that empty page then
        // carries the completion flag.
        let mut offset = 0usize;
        while more {
            offset += limit;
            self.pause_between_batches().await?;
            let page = self.fetch_page_with_retry(source, offset, limit).await?;
            self.ensure_live()?;
            more = !page.is_last(limit);
            all.extend(page.records.iter().cloned());
            self.set_phase(
                LoadPhase::LoadingMore {
                    delivered: all.len(),
                    total: all.len(),
                },
                observer,
            );
            observer.on_batch(page.records, !more);
            metrics::counter!("loader.batches").increment(1);
        }

        let snapshot = serde_json::to_string(&all)?;
        if let Some(cache) = &self.cache {
            cache.store(&self.settings.cache_key, &snapshot, &all, &identifier).await;
        }
        self.set_phase(
            LoadPhase::Complete {
                records: all.len(),
                stale: false,
            },
            observer,
        );
        Ok(LoadOutcome::Fresh {
            records: all.len(),
            source: identifier,
            checksum: checksum(&snapshot),
            reused_parse: false,
        })
    }

    async fn fetch_page_with_retry(&self, source: &dyn PagedSource, offset: usize, limit: usize) -> LoadResult<RowPage> {
        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            match self.with_deadline(source.fetch_page(offset, limit)).await {
                Ok(page) => return Ok(page),
                Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
                Err(e) => {
                    warn!(attempt = attempt + 1, offset, error = %e, "Page fetch failed");
                    last_error = Some(e);
                }
            }
            if attempt + 1 < self.retry.max_attempts {
                metrics::counter!("loader.retries").increment(1);
                self.sleep(self.retry.backoff_for_attempt(attempt)).await?;
            }
        }
        Err(LoadError::Network {
            attempts: self.retry.max_attempts,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn with_deadline<T>(&self, fut: impl Future<Output = LoadResult<T>>) -> LoadResult<T> {
        tokio::select! {
            biased;
            _ = self.abort.aborted() => Err(LoadError::Cancelled),
            result = tokio::time::timeout(self.settings.fetch_timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(LoadError::Timeout(self.settings.fetch_timeout.as_millis() as u64)),
            },
        }
    }

    async fn pause_between_batches(&self) -> LoadResult<()> {
        tokio::task::yield_now().await;
        if !self.settings.inter_batch_delay.is_zero() {
            self.sleep(self.settings.inter_batch_delay).await?;
        }
        self.ensure_live()
    }

    async fn sleep(&self, duration: Duration) -> LoadResult<()> {
        tokio::select! {
            biased;
            _ = self.abort.aborted() => Err(LoadError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn ensure_live(&self) -> LoadResult<()> {
        if self.abort.is_aborted() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }
}
