use chrono::NaiveDate;
use insights_core::Record;
use serde::Serialize;
use std::collections::HashSet;

/// Headline figures for a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSummary {
    pub total_spend: f64,
    pub record_count: usize,
    pub unique_ads: usize,
    /// Distinct ads with at least one row flagged as a first instance.
    pub first_instance_ads: usize,
    pub average_spend_per_ad: f64,
    /// Earliest and latest parseable day.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

pub fn summarize<'a>(records: impl IntoIterator<Item = &'a Record>) -> KpiSummary {
    let mut summary = KpiSummary::default();
    let mut ads = HashSet::new();
    let mut first_instances = HashSet::new();

    for record in records {
        summary.record_count += 1;
        summary.total_spend += record.spend;
        ads.insert(record.ad_name.as_str());
        if record.is_first_instance {
            first_instances.insert(record.ad_name.as_str());
        }
        if let Some(day) = record.date() {
            summary.date_range = Some(match summary.date_range {
                Some((start, end)) => (start.min(day), end.max(day)),
                None => (day, day),
            });
        }
    }

    summary.unique_ads = ads.len();
    summary.first_instance_ads = first_instances.len();
    if summary.unique_ads > 0 {
        summary.average_spend_per_ad = summary.total_spend / summary.unique_ads as f64;
    }
    summary
}
