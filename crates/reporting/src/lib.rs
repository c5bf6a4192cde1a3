//! Filtering and spend aggregation over loaded records, and the dashboard
//! session that ties them to a filter state.

pub mod aggregate;
pub mod filter;
pub mod period;
pub mod session;
pub mod summary;

pub use aggregate::{aggregate, aggregate_current, daily_spend, spend_by_objective, DailySpend, ObjectiveSpend, SpendAggregate};
pub use filter::{apply_filters, compute_available_options, reconcile_selections, FilterOption, Reconciliation};
pub use period::{previous_filters, previous_period};
pub use session::{DashboardSession, DashboardSnapshot, RecordStore, StoreWriter};
pub use summary::{summarize, KpiSummary};
