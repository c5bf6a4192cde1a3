//! Shareable query-string form of the dashboard state.
//!
//! `startDate`/`endDate` are plain calendar dates (`YYYY-MM-DD`) with no
//! timezone attached, so they never shift by a day. Category filters are
//! comma-joined lists; each value is percent-encoded first, which keeps
//! embedded commas intact.

use crate::error::QueryError;
use crate::filters::{FilterState, Selection};
use crate::types::{FilterDimension, GroupBy};
use chrono::NaiveDate;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Filter state plus grouping, as carried in a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardQuery {
    pub filters: FilterState,
    pub group_by: GroupBy,
}

impl DashboardQuery {
    pub fn new(filters: FilterState, group_by: GroupBy) -> Self {
        Self { filters, group_by }
    }

    /// Encode as `key=value&...` without a leading `?`. Unset filters are omitted.
    pub fn encode(&self) -> String {
        let mut pairs: Vec<String> = Vec::new();
        if let Some(start) = self.filters.start_date {
            pairs.push(format!("startDate={}", start.format(DATE_FORMAT)));
        }
        if let Some(end) = self.filters.end_date {
            pairs.push(format!("endDate={}", end.format(DATE_FORMAT)));
        }
        for dimension in FilterDimension::ALL {
            let selection = self.filters.selection(dimension);
            if selection.is_unset() {
                continue;
            }
            let joined = selection
                .iter()
                .map(|v| urlencoding::encode(v).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(format!("{}={}", dimension.param(), joined));
        }
        pairs.push(format!("groupBy={}", self.group_by));
        pairs.join("&")
    }

    /// Decode a query string (leading `?` optional). Unknown parameters and
    /// unparseable dates or groupings are ignored.
    pub fn decode(query: &str) -> Result<Self, QueryError> {
        let mut decoded = DashboardQuery::default();
        let query = query.trim().trim_start_matches('?');

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "startDate" => decoded.filters.start_date = parse_date(value),
                "endDate" => decoded.filters.end_date = parse_date(value),
                "groupBy" => {
                    if let Ok(group_by) = value.parse() {
                        decoded.group_by = group_by;
                    }
                }
                other => {
                    let Some(dimension) = FilterDimension::ALL.into_iter().find(|d| d.param() == other) else {
                        debug!(param = other, "Ignoring unknown query parameter");
                        continue;
                    };
                    *decoded.filters.selection_mut(dimension) = decode_list(key, value)?;
                }
            }
        }

        Ok(decoded)
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

fn decode_list(key: &str, value: &str) -> Result<Selection, QueryError> {
    // `+` is how some encoders write spaces
    let value = value.replace('+', "%20");
    value
        .split(',')
        .map(|part| {
            urlencoding::decode(part)
                .map(|s| s.into_owned())
                .map_err(|_| QueryError::Encoding(key.to_string()))
        })
        .collect()
}
