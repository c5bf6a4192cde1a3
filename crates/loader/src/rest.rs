//! Database-backed source: pages of JSON row objects from a REST range
//! endpoint (PostgREST style), newest days first.

use async_trait::async_trait;
use insights_core::fields::{RecordBuilder, RecordField};
use insights_core::{LoadError, LoadResult, Record};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One page of rows. `fetched` counts raw rows, including those dropped
/// for lacking an ad name, so a filtered page is not mistaken for the last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPage {
    pub records: Vec<Record>,
    pub fetched: usize,
}

impl RowPage {
    pub fn is_last(&self, limit: usize) -> bool {
        self.fetched < limit
    }
}

#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Rows `offset..offset + limit`, ordered by day descending. A page
    /// shorter than `limit` is the last one.
    async fn fetch_page(&self, offset: usize, limit: usize) -> LoadResult<RowPage>;

    /// Identifier stored alongside cached payloads.
    fn identifier(&self) -> String;
}

/// Map a row object onto the record schema with the same header aliases
/// and coercions as the CSV path. Rows without an ad name are dropped.
pub fn row_to_record(row: &Map<String, Value>) -> Option<Record> {
    let mut builder = RecordBuilder::new();
    for (key, value) in row {
        let Some(field) = RecordField::from_header(key) else {
            continue;
        };
        let text = match value {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        builder.set(field, &text);
    }
    builder.build()
}

pub struct RestRowSource {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl RestRowSource {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> LoadResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| LoadError::Transport(format!("invalid rest url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn page_url(&self, offset: usize, limit: usize) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "day.desc")
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        url
    }
}

#[async_trait]
impl PagedSource for RestRowSource {
    async fn fetch_page(&self, offset: usize, limit: usize) -> LoadResult<RowPage> {
        let url = self.page_url(offset, limit);
        let mut request = self.client.get(url.as_str());
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| LoadError::Network {
            attempts: 1,
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(LoadError::Network {
                attempts: 1,
                message: format!("row query returned HTTP {}", response.status()),
            });
        }

        let rows: Vec<Map<String, Value>> = response
            .json()
            .await
            .map_err(|e| LoadError::Transport(format!("row query returned invalid JSON: {e}")))?;
        let fetched = rows.len();
        let records: Vec<Record> = rows.iter().filter_map(row_to_record).collect();
        debug!(offset, fetched, kept = records.len(), "Fetched row page");
        Ok(RowPage { records, fetched })
    }

    fn identifier(&self) -> String {
        self.endpoint.to_string()
    }
}
