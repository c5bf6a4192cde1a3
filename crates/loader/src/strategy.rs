//! Parser strategies: a blocking worker thread, or in-task chunks that
//! yield to the runtime. Both produce the same [`ParseReport`].

use crate::abort::AbortSignal;
use crate::parser::{prepare, ParseProgress, ParseReport};
use async_trait::async_trait;
use insights_core::config::ParserConfig;
use insights_core::{LoadError, LoadResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type ProgressSender = mpsc::UnboundedSender<ParseProgress>;

/// Rows between abort checks and progress events on the worker.
const WORKER_REPORT_EVERY: usize = 1000;

#[async_trait]
pub trait RecordParser: Send + Sync {
    async fn parse(
        &self,
        text: Arc<str>,
        progress: Option<ProgressSender>,
        abort: &AbortSignal,
    ) -> LoadResult<ParseReport>;

    fn name(&self) -> &'static str;
}

/// Row loop shared by both strategies. `between_chunks` runs every
/// `chunk_rows` rows and may stop the parse.
fn parse_rows(
    text: &str,
    chunk_rows: usize,
    progress: Option<&ProgressSender>,
    mut between_chunks: impl FnMut() -> LoadResult<()>,
) -> LoadResult<ParseReport> {
    let prepared = prepare(text)?;
    let total_rows = prepared.rows.len();
    let mut report = ParseReport {
        total_rows,
        records: Vec::with_capacity(total_rows),
        ..Default::default()
    };

    for (i, row) in prepared.rows.iter().enumerate() {
        report.push(prepared.header.parse_row(row));
        let rows_parsed = i + 1;
        if rows_parsed % chunk_rows == 0 || rows_parsed == total_rows {
            if let Some(tx) = progress {
                let _ = tx.send(ParseProgress { rows_parsed, total_rows });
            }
            if rows_parsed < total_rows {
                between_chunks()?;
            }
        }
    }
    Ok(report)
}

/// Parses on a blocking thread so the async task stays responsive.
#[derive(Debug, Default)]
pub struct ThreadedParser;

#[async_trait]
impl RecordParser for ThreadedParser {
    async fn parse(
        &self,
        text: Arc<str>,
        progress: Option<ProgressSender>,
        abort: &AbortSignal,
    ) -> LoadResult<ParseReport> {
        let signal = abort.clone();
        let worker = tokio::task::spawn_blocking(move || {
            parse_rows(&text, WORKER_REPORT_EVERY, progress.as_ref(), || {
                if signal.is_aborted() {
                    Err(LoadError::Cancelled)
                } else {
                    Ok(())
                }
            })
        });

        match worker.await {
            Ok(result) => result,
            Err(e) => Err(LoadError::Internal(anyhow::anyhow!("parser worker failed: {e}"))),
        }
    }

    fn name(&self) -> &'static str {
        "threaded"
    }
}

/// Parses in the calling task, yielding every `yield_every_rows` rows.
#[derive(Debug)]
pub struct ChunkedParser {
    yield_every_rows: usize,
}

impl ChunkedParser {
    pub fn new(yield_every_rows: usize) -> Self {
        Self {
            yield_every_rows: yield_every_rows.max(1),
        }
    }
}

#[async_trait]
impl RecordParser for ChunkedParser {
    async fn parse(
        &self,
        text: Arc<str>,
        progress: Option<ProgressSender>,
        abort: &AbortSignal,
    ) -> LoadResult<ParseReport> {
        let prepared = prepare(&text)?;
        let total_rows = prepared.rows.len();
        let mut report = ParseReport {
            total_rows,
            records: Vec::with_capacity(total_rows),
            ..Default::default()
        };

        for (chunk_index, chunk) in prepared.rows.chunks(self.yield_every_rows).enumerate() {
            if abort.is_aborted() {
                return Err(LoadError::Cancelled);
            }
            for row in chunk {
                report.push(prepared.header.parse_row(row));
            }
            let rows_parsed = (chunk_index * self.yield_every_rows + chunk.len()).min(total_rows);
            if let Some(tx) = &progress {
                let _ = tx.send(ParseProgress { rows_parsed, total_rows });
            }
            tokio::task::yield_now().await;
        }
        Ok(report)
    }

    fn name(&self) -> &'static str {
        "chunked"
    }
}

/// Worker first; if the worker itself dies, parse again in-task.
pub struct FallbackParser {
    primary: Box<dyn RecordParser>,
    fallback: ChunkedParser,
}

impl FallbackParser {
    pub fn new(yield_every_rows: usize) -> Self {
        Self::with_primary(Box::new(ThreadedParser), yield_every_rows)
    }

    /// Wrap any primary strategy; only `LoadError::Internal` from it
    /// triggers the in-task reparse.
    pub fn with_primary(primary: Box<dyn RecordParser>, yield_every_rows: usize) -> Self {
        Self {
            primary,
            fallback: ChunkedParser::new(yield_every_rows),
        }
    }
}

#[async_trait]
impl RecordParser for FallbackParser {
    async fn parse(
        &self,
        text: Arc<str>,
        progress: Option<ProgressSender>,
        abort: &AbortSignal,
    ) -> LoadResult<ParseReport> {
        match self.primary.parse(text.clone(), progress.clone(), abort).await {
            Err(LoadError::Internal(e)) => {
                warn!(error = %e, "Worker parse failed, falling back to in-task parsing");
                metrics::counter!("parser.worker_fallbacks").increment(1);
                self.fallback.parse(text, progress, abort).await
            }
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "worker-with-fallback"
    }
}

/// Pick the parser for this configuration.
pub fn select_parser(config: &ParserConfig) -> Box<dyn RecordParser> {
    let parser: Box<dyn RecordParser> = if config.use_worker {
        Box::new(FallbackParser::new(config.yield_every_rows))
    } else {
        Box::new(ChunkedParser::new(config.yield_every_rows))
    };
    debug!(strategy = parser.name(), "Parser selected");
    parser
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::abort_pair;
    use crate::parser::parse_records;

    fn sample(rows: usize) -> String {
        let mut text = String::from("day,ad_name,spend,shoot\n");
        for i in 0..rows {
            text.push_str(&format!("2024-01-{:02},Ad {i},{},Shoot {}\n", i % 28 + 1, i, i % 3));
        }
        text
    }

    #[tokio::test]
    async fn test_strategies_agree() {
        let text: Arc<str> = sample(2_345).into();
        let expected = parse_records(&text).unwrap();
        let never = AbortSignal::never();

        let threaded = ThreadedParser.parse(text.clone(), None, &never).await.unwrap();
        let chunked = ChunkedParser::new(200).parse(text.clone(), None, &never).await.unwrap();
        let fallback = FallbackParser::new(500).parse(text, None, &never).await.unwrap();

        assert_eq!(threaded, expected);
        assert_eq!(chunked, expected);
        assert_eq!(fallback, expected);
    }

    #[tokio::test]
    async fn test_chunked_progress_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = ChunkedParser::new(100)
            .parse(sample(250).into(), Some(tx), &AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(report.records.len(), 250);

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p.rows_parsed);
        }
        assert_eq!(seen, vec![100, 200, 250]);
    }

    #[tokio::test]
    async fn test_aborted_parse_stops() {
        let (handle, signal) = abort_pair();
        handle.abort();
        let result = ChunkedParser::new(10).parse(sample(100).into(), None, &signal).await;
        assert!(matches!(result, Err(LoadError::Cancelled)));

        let result = ThreadedParser.parse(sample(5_000).into(), None, &signal).await;
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried_in_task() {
        let result = FallbackParser::new(10)
            .parse("header only".into(), None, &AbortSignal::never())
            .await;
        assert!(matches!(result, Err(LoadError::Parse(_))));
    }

    /// Stands in for a worker that dies before producing a result.
    struct CrashingParser;

    #[async_trait]
    impl RecordParser for CrashingParser {
        async fn parse(&self, _text: Arc<str>, _progress: Option<ProgressSender>, _abort: &AbortSignal) -> LoadResult<ParseReport> {
            Err(LoadError::Internal(anyhow::anyhow!("worker thread panicked")))
        }

        fn name(&self) -> &'static str {
            "crashing"
        }
    }

    #[tokio::test]
    async fn test_crashed_worker_falls_back_to_chunked() {
        let text: Arc<str> = sample(321).into();
        let expected = parse_records(&text).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = FallbackParser::with_primary(Box::new(CrashingParser), 100)
            .parse(text, Some(tx), &AbortSignal::never())
            .await
            .unwrap();

        assert_eq!(report, expected);
        let mut last = None;
        while let Ok(p) = rx.try_recv() {
            last = Some(p.rows_parsed);
        }
        assert_eq!(last, Some(321));
    }

    #[test]
    fn test_select_parser() {
        assert_eq!(select_parser(&ParserConfig::default()).name(), "worker-with-fallback");
        let config = ParserConfig {
            use_worker: false,
            ..Default::default()
        };
        assert_eq!(select_parser(&config).name(), "chunked");
    }
}
