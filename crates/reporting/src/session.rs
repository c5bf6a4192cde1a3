//! Dashboard orchestration: the shared record store, the active filter
//! state and the snapshot recomputed on every change.

use crate::aggregate::{aggregate, aggregate_current, daily_spend, spend_by_objective, DailySpend, ObjectiveSpend, SpendAggregate};
use crate::filter::{apply_filters, compute_available_options, reconcile_selections, FilterOption};
use crate::period::previous_filters;
use crate::summary::{summarize, KpiSummary};
use chrono::{DateTime, NaiveDate, Utc};
use insights_core::{DashboardQuery, FilterDimension, FilterState, GroupBy, Record};
use insights_loader::{BatchObserver, DownloadProgress, LoadPhase};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Append-only record store shared between the loader and the dashboard.
/// Readers only ever see whole batches.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    inner: Arc<RwLock<Contents>>,
}

#[derive(Debug, Default)]
struct Contents {
    records: Vec<Record>,
    /// Set once the final batch of the current load has arrived.
    complete: bool,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        self.inner.write().records.extend(batch);
    }

    /// Start over for a fresh load.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.records.clear();
        inner.complete = false;
    }

    pub fn mark_complete(&self) {
        self.inner.write().complete = true;
    }

    /// Whether the last load delivered every batch.
    pub fn is_complete(&self) -> bool {
        self.inner.read().complete
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Borrow the records for the duration of `f`.
    pub fn read<R>(&self, f: impl FnOnce(&[Record]) -> R) -> R {
        f(&self.inner.read().records)
    }

    fn read_with_state<R>(&self, f: impl FnOnce(&[Record], bool) -> R) -> R {
        let inner = self.inner.read();
        f(&inner.records, inner.complete)
    }

    /// Observer that fills this store from a load.
    pub fn writer(&self) -> StoreWriter {
        StoreWriter {
            store: self.clone(),
            batches: 0,
            complete: false,
        }
    }
}

/// Feeds loader batches into a [`RecordStore`]. The first batch replaces
/// whatever the store held before.
#[derive(Debug)]
pub struct StoreWriter {
    store: RecordStore,
    batches: usize,
    complete: bool,
}

impl StoreWriter {
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

impl BatchObserver for StoreWriter {
    fn on_first_batch(&mut self, batch: Vec<Record>) {
        info!(records = batch.len(), "First batch ready");
        self.store.reset();
        self.store.append(batch);
        self.batches = 1;
    }

    fn on_batch(&mut self, batch: Vec<Record>, is_complete: bool) {
        if !batch.is_empty() {
            self.batches += 1;
        }
        self.store.append(batch);
        if is_complete {
            self.store.mark_complete();
        }
        self.complete = is_complete;
        debug!(total = self.store.len(), is_complete, "Batch appended");
    }

    fn on_progress(&mut self, progress: DownloadProgress) {
        debug!(
            downloaded = progress.downloaded_bytes,
            total = ?progress.total_bytes,
            "Download progress"
        );
    }

    fn on_phase(&mut self, phase: &LoadPhase) {
        debug!(phase = phase.name(), "Loader phase");
    }
}

/// Everything the presentation layer renders for one filter state.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub query: String,
    pub filters: FilterState,
    pub group_by: GroupBy,
    pub total_records: usize,
    pub summary: KpiSummary,
    /// Comparison window, when the filters carry a full date range.
    pub previous_period: Option<(NaiveDate, NaiveDate)>,
    pub aggregates: Vec<SpendAggregate>,
    pub objectives: Vec<ObjectiveSpend>,
    pub daily: Vec<DailySpend>,
    pub options: BTreeMap<FilterDimension, Vec<FilterOption>>,
    /// Selections dropped because the data no longer offers them.
    pub deselected: Vec<(FilterDimension, String)>,
}

/// Owns the dashboard state; the record store is only read from here.
#[derive(Debug, Default)]
pub struct DashboardSession {
    store: RecordStore,
    filters: FilterState,
    group_by: GroupBy,
}

impl DashboardSession {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            filters: FilterState::default(),
            group_by: GroupBy::default(),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
    }

    pub fn set_filters(&mut self, filters: FilterState) {
        self.filters = filters;
    }

    pub fn set_group_by(&mut self, group_by: GroupBy) {
        self.group_by = group_by;
    }

    pub fn apply_query(&mut self, query: DashboardQuery) {
        self.filters = query.filters;
        self.group_by = query.group_by;
    }

    /// Current state as a shareable query.
    pub fn query(&self) -> DashboardQuery {
        DashboardQuery::new(self.filters.clone(), self.group_by)
    }

    /// Recompute every view. Selections are reconciled against the data
    /// only once the load is complete; until then rows for a selected value
    /// may still be on their way.
    pub fn refresh(&mut self) -> DashboardSnapshot {
        let store = self.store.clone();
        store.read_with_state(|records, complete| self.snapshot_of(records, complete))
    }

    fn snapshot_of(&mut self, records: &[Record], complete: bool) -> DashboardSnapshot {
        let mut deselected = Vec::new();
        if complete {
            let reconciliation = reconcile_selections(records, &self.filters);
            if reconciliation.changed() {
                info!(removed = ?reconciliation.removed, "Filter selections no longer available, deselected");
                self.filters = reconciliation.state;
                deselected = reconciliation.removed;
            }
        }

        let current = apply_filters(records, &self.filters);
        let previous_state = previous_filters(&self.filters);
        let aggregates = match &previous_state {
            Some(state) => {
                let previous = apply_filters(records, state);
                aggregate(current.iter().copied(), previous.iter().copied(), self.group_by)
            }
            None => aggregate_current(current.iter().copied(), self.group_by),
        };

        let options = FilterDimension::ALL
            .iter()
            .map(|dim| (*dim, compute_available_options(records, &self.filters, *dim)))
            .collect();

        debug!(
            total = records.len(),
            filtered = current.len(),
            groups = aggregates.len(),
            "Dashboard recomputed"
        );

        DashboardSnapshot {
            generated_at: Utc::now(),
            query: self.query().encode(),
            filters: self.filters.clone(),
            group_by: self.group_by,
            total_records: records.len(),
            summary: summarize(current.iter().copied()),
            previous_period: previous_state.as_ref().and_then(FilterState::date_range),
            aggregates,
            objectives: spend_by_objective(current.iter().copied()),
            daily: daily_spend(current.iter().copied()),
            options,
            deselected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::Selection;

    fn record(day: &str, shoot: &str, country: &str, spend: f64) -> Record {
        Record {
            day: day.to_string(),
            ad_name: format!("{shoot}-{country}"),
            shoot: shoot.to_string(),
            country: country.to_string(),
            objective: "Prospecting".to_string(),
            spend,
            ..Default::default()
        }
    }

    fn loaded_store() -> RecordStore {
        let store = RecordStore::new();
        let mut writer = store.writer();
        writer.on_first_batch(vec![
            record("2024-01-01", "X", "US", 50.0),
            record("2024-01-02", "Y", "US", 50.0),
        ]);
        writer.on_batch(
            vec![
                record("2024-01-03", "X", "US", 60.0),
                record("2024-01-04", "Y", "UK", 40.0),
            ],
            true,
        );
        assert!(writer.is_complete());
        assert_eq!(writer.batches(), 2);
        store
    }

    #[test]
    fn test_writer_replaces_previous_load() {
        let store = loaded_store();
        assert_eq!(store.len(), 4);

        let mut writer = store.writer();
        writer.on_first_batch(vec![record("2024-02-01", "Z", "US", 1.0)]);
        writer.on_batch(Vec::new(), true);
        assert_eq!(store.len(), 1);
        assert_eq!(writer.batches(), 1);
    }

    #[test]
    fn test_refresh_compares_periods() {
        let mut session = DashboardSession::new(loaded_store());
        let start = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        session.set_filters(FilterState::default().with_date_range(start, end));

        let snapshot = session.refresh();
        assert_eq!(snapshot.total_records, 4);
        assert_eq!(snapshot.summary.total_spend, 100.0);
        assert_eq!(
            snapshot.previous_period,
            Some((
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
            ))
        );
        assert_eq!(snapshot.aggregates[0].group_key, "X");
        assert!((snapshot.aggregates[0].change_percent.unwrap() - 20.0).abs() < 1e-9);
        assert!((snapshot.aggregates[1].change_percent.unwrap() + 20.0).abs() < 1e-9);
        assert_eq!(snapshot.objectives.len(), 1);
        assert_eq!(snapshot.daily.len(), 2);
        assert_eq!(snapshot.query, "startDate=2024-01-03&endDate=2024-01-04&groupBy=shoot");
    }

    #[test]
    fn test_refresh_without_dates_has_no_comparison() {
        let mut session = DashboardSession::new(loaded_store());
        session.set_group_by(GroupBy::AdName);
        let snapshot = session.refresh();
        assert!(snapshot.previous_period.is_none());
        assert!(snapshot.aggregates.iter().all(|a| a.change_percent.is_none()));
        assert_eq!(snapshot.aggregates[0].group_key, "X-US");
        assert_eq!(snapshot.options[&FilterDimension::Country].len(), 2);
    }

    #[test]
    fn test_refresh_self_corrects_filters() {
        let mut session = DashboardSession::new(loaded_store());
        session.set_filters(
            FilterState::default()
                .with_selection(FilterDimension::Country, Selection::single("UK"))
                .with_selection(FilterDimension::Shoot, ["X", "Y"].into_iter().collect()),
        );

        let snapshot = session.refresh();
        assert_eq!(snapshot.deselected, vec![(FilterDimension::Shoot, "X".to_string())]);
        assert_eq!(session.filters().shoot, Selection::single("Y"));
        assert_eq!(snapshot.summary.total_spend, 40.0);
        assert!(snapshot.query.contains("shoot=Y"));

        let again = session.refresh();
        assert!(again.deselected.is_empty());
    }

    #[test]
    fn test_mid_load_refresh_keeps_restored_selections() {
        let store = RecordStore::new();
        let mut session = DashboardSession::new(store.clone());
        session.apply_query(DashboardQuery::decode("country=US&shoot=Beach").unwrap());

        let mut writer = store.writer();
        writer.on_first_batch(vec![record("2024-01-01", "Studio", "UK", 10.0)]);
        let partial = session.refresh();
        assert!(!store.is_complete());
        assert!(partial.deselected.is_empty());
        assert_eq!(partial.summary.record_count, 0);
        assert_eq!(session.filters().country, Selection::single("US"));

        writer.on_batch(vec![record("2024-01-02", "Beach", "US", 25.0)], true);
        let done = session.refresh();
        assert!(store.is_complete());
        assert!(done.deselected.is_empty());
        assert_eq!(done.summary.total_spend, 25.0);
        assert_eq!(done.query, "country=US&shoot=Beach&groupBy=shoot");
    }

    #[test]
    fn test_reset_clears_completion() {
        let store = loaded_store();
        assert!(store.is_complete());
        store.writer().on_first_batch(vec![record("2024-02-01", "Z", "US", 1.0)]);
        assert!(!store.is_complete());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_query_round_trip_through_session() {
        let mut session = DashboardSession::new(RecordStore::new());
        let query = DashboardQuery::decode("?country=US,UK&groupBy=adName").unwrap();
        session.apply_query(query.clone());
        assert_eq!(session.query(), query);
        assert_eq!(session.group_by(), GroupBy::AdName);
    }
}
