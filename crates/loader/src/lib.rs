#![warn(clippy::unwrap_used)]

//! Source loading: transports, parsing strategies, retry and batched
//! delivery to the dashboard.

pub mod abort;
pub mod loader;
pub mod parser;
pub mod phase;
pub mod rest;
pub mod retry;
pub mod strategy;
pub mod transport;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use loader::{BatchLoader, BatchObserver, LoadOutcome, LoaderSettings};
pub use parser::{parse_records, ParseProgress, ParseReport};
pub use phase::LoadPhase;
pub use rest::{PagedSource, RestRowSource, RowPage};
pub use retry::RetryPolicy;
pub use strategy::{select_parser, ChunkedParser, FallbackParser, RecordParser, ThreadedParser};
pub use transport::{sheet_candidates, DownloadProgress, HttpTransport, SourceCandidate, SourceTransport};
