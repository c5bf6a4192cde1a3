//! Spend aggregation: per-group shares and period-over-period change.

use chrono::NaiveDate;
use insights_core::{GroupBy, Objective, Record};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Spend of one group in the current and previous period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendAggregate {
    pub group_key: String,
    pub current_spend: f64,
    pub previous_spend: f64,
    /// Percent of the period's total spend, 0..=100.
    pub current_share: f64,
    pub previous_share: f64,
    /// `None` when there is no comparison period.
    pub change_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveSpend {
    pub objective: Objective,
    pub spend: f64,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySpend {
    pub day: NaiveDate,
    pub spend: f64,
}

/// Group totals in first-seen order.
struct GroupTotals<'a> {
    order: Vec<&'a str>,
    spend: HashMap<&'a str, f64>,
    total: f64,
}

impl<'a> GroupTotals<'a> {
    fn collect(records: impl IntoIterator<Item = &'a Record>, group_by: GroupBy) -> Self {
        let mut totals = GroupTotals {
            order: Vec::new(),
            spend: HashMap::new(),
            total: 0.0,
        };
        for record in records {
            let key = record.group_key(group_by);
            let entry = totals.spend.entry(key).or_insert_with(|| {
                totals.order.push(key);
                0.0
            });
            *entry += record.spend;
            totals.total += record.spend;
        }
        totals
    }

    fn spend_of(&self, key: &str) -> f64 {
        self.spend.get(key).copied().unwrap_or(0.0)
    }

    fn share_of(&self, key: &str) -> f64 {
        share(self.spend_of(key), self.total)
    }
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Relative change of a share. A group absent from the previous period is
/// a new entrant at +100.
pub fn change_percent(current_share: f64, previous_share: f64) -> f64 {
    if previous_share > 0.0 {
        (current_share - previous_share) / previous_share * 100.0
    } else {
        100.0
    }
}

fn build<'a>(current: &GroupTotals<'a>, previous: Option<&GroupTotals<'_>>) -> Vec<SpendAggregate> {
    let mut rows: Vec<SpendAggregate> = current
        .order
        .iter()
        .filter(|key| current.spend_of(key) > 0.0)
        .map(|key| {
            let current_share = current.share_of(key);
            let (previous_spend, previous_share) = previous
                .map(|p| (p.spend_of(key), p.share_of(key)))
                .unwrap_or((0.0, 0.0));
            SpendAggregate {
                group_key: key.to_string(),
                current_spend: current.spend_of(key),
                previous_spend,
                current_share,
                previous_share,
                change_percent: previous.map(|_| change_percent(current_share, previous_share)),
            }
        })
        .collect();
    // Stable: equal shares keep first-seen order
    rows.sort_by(|a, b| b.current_share.total_cmp(&a.current_share));
    rows
}

/// Spend per group with shares for both periods. Only groups with positive
/// current spend are returned, largest share first.
pub fn aggregate<'a, 'b>(
    current: impl IntoIterator<Item = &'a Record>,
    previous: impl IntoIterator<Item = &'b Record>,
    group_by: GroupBy,
) -> Vec<SpendAggregate> {
    let current = GroupTotals::collect(current, group_by);
    let previous = GroupTotals::collect(previous, group_by);
    build(&current, Some(&previous))
}

/// Like [`aggregate`] with no comparison period.
pub fn aggregate_current<'a>(current: impl IntoIterator<Item = &'a Record>, group_by: GroupBy) -> Vec<SpendAggregate> {
    build(&GroupTotals::collect(current, group_by), None)
}

/// Spend split by campaign objective. Records whose objective is not one
/// of the known values are left out.
pub fn spend_by_objective<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<ObjectiveSpend> {
    let mut totals: BTreeMap<Objective, f64> = BTreeMap::new();
    for record in records {
        if let Some(objective) = record.objective_kind() {
            *totals.entry(objective).or_insert(0.0) += record.spend;
        }
    }
    let total: f64 = totals.values().sum();

    let mut rows: Vec<ObjectiveSpend> = Objective::ALL
        .iter()
        .filter_map(|objective| {
            let spend = totals.get(objective).copied()?;
            Some(ObjectiveSpend {
                objective: *objective,
                spend,
                share: share(spend, total),
            })
        })
        .collect();
    rows.sort_by(|a, b| b.spend.total_cmp(&a.spend));
    rows
}

/// Spend per calendar day, oldest first. Undated records are left out.
pub fn daily_spend<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<DailySpend> {
    let mut days: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        if let Some(day) = record.date() {
            *days.entry(day).or_insert(0.0) += record.spend;
        }
    }
    days.into_iter().map(|(day, spend)| DailySpend { day, spend }).collect()
}
