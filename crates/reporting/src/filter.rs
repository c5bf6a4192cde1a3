//! Record filtering, filter-option availability and selection
//! reconciliation.

use insights_core::{FilterDimension, FilterState, Record};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A selectable value of one dimension and the spend behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOption {
    pub value: String,
    pub spend: f64,
}

/// Reconciled state plus the values that were deselected.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub state: FilterState,
    pub removed: Vec<(FilterDimension, String)>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Whether one record passes every constraint in `state`. Bounds are
/// inclusive; a record with an unparseable day never passes a bound.
pub fn matches(record: &Record, state: &FilterState) -> bool {
    if state.has_date_bounds() {
        let Some(day) = record.date() else {
            return false;
        };
        if state.start_date.is_some_and(|start| day < start) {
            return false;
        }
        if state.end_date.is_some_and(|end| day > end) {
            return false;
        }
    }
    FilterDimension::ALL
        .iter()
        .all(|dim| state.selection(*dim).admits(record.dimension_value(*dim)))
}

pub fn apply_filters<'a>(records: &'a [Record], state: &FilterState) -> Vec<&'a Record> {
    records.iter().filter(|r| matches(r, state)).collect()
}

/// Values of `dimension` still reachable under every other active filter,
/// highest spend first, ties by value.
pub fn compute_available_options(records: &[Record], state: &FilterState, dimension: FilterDimension) -> Vec<FilterOption> {
    let others = state.without(dimension);
    let mut spend_by_value: HashMap<&str, f64> = HashMap::new();
    for record in records.iter().filter(|r| matches(r, &others)) {
        let value = record.dimension_value(dimension);
        if value.trim().is_empty() {
            continue;
        }
        *spend_by_value.entry(value).or_insert(0.0) += record.spend;
    }

    let mut options: Vec<FilterOption> = spend_by_value
        .into_iter()
        .map(|(value, spend)| FilterOption {
            value: value.to_string(),
            spend,
        })
        .collect();
    options.sort_by(|a, b| b.spend.total_cmp(&a.spend).then_with(|| a.value.cmp(&b.value)));
    options
}

/// Drop selected values that no longer appear among their dimension's
/// options. Selections only ever shrink, so repeating until nothing is
/// removed terminates; the returned state is a fixed point.
pub fn reconcile_selections(records: &[Record], state: &FilterState) -> Reconciliation {
    let mut reconciled = state.clone();
    let mut removed = Vec::new();

    loop {
        let pass = unavailable_selections(records, &reconciled);
        if pass.is_empty() {
            break;
        }
        for (dimension, value) in pass {
            reconciled.selection_mut(dimension).remove(&value);
            removed.push((dimension, value));
        }
    }

    if !removed.is_empty() {
        debug!(removed = removed.len(), "Deselected unavailable filter values");
    }
    Reconciliation {
        state: reconciled,
        removed,
    }
}

fn unavailable_selections(records: &[Record], state: &FilterState) -> Vec<(FilterDimension, String)> {
    let mut missing = Vec::new();
    for dimension in FilterDimension::ALL {
        let selection = state.selection(dimension);
        if selection.is_unset() {
            continue;
        }
        let available = compute_available_options(records, state, dimension);
        for value in selection.iter() {
            if !available.iter().any(|o| &o.value == value) {
                missing.push((dimension, value.clone()));
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use insights_core::Selection;

    fn record(day: &str, ad: &str, country: &str, shoot: &str, spend: f64) -> Record {
        Record {
            day: day.to_string(),
            ad_name: ad.to_string(),
            country: country.to_string(),
            shoot: shoot.to_string(),
            spend,
            ..Default::default()
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample() -> Vec<Record> {
        vec![
            record("2024-01-01", "A", "US", "Beach", 100.0),
            record("2024-01-02", "B", "US", "Studio", 50.0),
            record("2024-01-03", "C", "UK", "Beach", 30.0),
            record("2024-01-03", "D", "UK", "Street", 30.0),
            record("2024-01-04", "E", "", "Studio", 5.0),
        ]
    }

    #[test]
    fn test_date_bounds_are_inclusive() {
        let records = vec![
            record("2024-01-01", "A", "US", "", 1.0),
            record("2024-01-02", "B", "US", "", 1.0),
            record("2024-01-03", "C", "US", "", 1.0),
        ];
        let state = FilterState::default().with_date_range(date("2024-01-02"), date("2024-01-02"));
        let filtered = apply_filters(&records, &state);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].ad_name, "B");
    }

    #[test]
    fn test_open_ended_bound_and_bad_days() {
        let mut records = sample();
        records.push(record("sometime", "X", "US", "Beach", 1.0));
        let state = FilterState {
            start_date: Some(date("2024-01-03")),
            ..Default::default()
        };
        let names: Vec<&str> = apply_filters(&records, &state).iter().map(|r| r.ad_name.as_str()).collect();
        assert_eq!(names, vec!["C", "D", "E"]);
        assert_eq!(apply_filters(&records, &FilterState::default()).len(), 6);
    }

    #[test]
    fn test_multi_select() {
        let state = FilterState::default()
            .with_selection(FilterDimension::Shoot, ["Beach", "Street"].into_iter().collect());
        let records = sample();
        let names: Vec<&str> = apply_filters(&records, &state).iter().map(|r| r.ad_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "D"]);
    }

    #[test]
    fn test_options_ignore_own_dimension() {
        let state = FilterState::default().with_selection(FilterDimension::Country, Selection::single("UK"));

        let countries = compute_available_options(&sample(), &state, FilterDimension::Country);
        let values: Vec<&str> = countries.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["US", "UK"]);
        assert_eq!(countries[0].spend, 150.0);

        let shoots = compute_available_options(&sample(), &state, FilterDimension::Shoot);
        assert_eq!(
            shoots,
            vec![
                FilterOption { value: "Beach".into(), spend: 30.0 },
                FilterOption { value: "Street".into(), spend: 30.0 },
            ]
        );
    }

    #[test]
    fn test_options_are_pure() {
        let state = FilterState::default().with_selection(FilterDimension::Shoot, Selection::single("Studio"));
        let first = compute_available_options(&sample(), &state, FilterDimension::Country);
        let second = compute_available_options(&sample(), &state, FilterDimension::Country);
        assert_eq!(first, second);
        // Empty country values are not offered
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_reconcile_drops_unreachable_values() {
        let state = FilterState::default()
            .with_selection(FilterDimension::Country, Selection::single("UK"))
            .with_selection(FilterDimension::Shoot, ["Studio", "Beach"].into_iter().collect());

        let result = reconcile_selections(&sample(), &state);
        assert!(result.changed());
        assert_eq!(result.removed, vec![(FilterDimension::Shoot, "Studio".to_string())]);
        assert_eq!(result.state.shoot, Selection::single("Beach"));
        assert_eq!(result.state.country, Selection::single("UK"));

        let again = reconcile_selections(&sample(), &result.state);
        assert!(!again.changed());
        assert_eq!(again.state, result.state);
    }

    #[test]
    fn test_reconcile_respects_dates() {
        let state = FilterState::default()
            .with_date_range(date("2024-01-01"), date("2024-01-02"))
            .with_selection(FilterDimension::Country, Selection::single("UK"));
        let result = reconcile_selections(&sample(), &state);
        assert!(result.state.country.is_unset());
        assert_eq!(result.state.start_date, state.start_date);
    }
}
