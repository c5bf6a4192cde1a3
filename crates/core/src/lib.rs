pub mod config;
pub mod error;
pub mod fields;
pub mod filters;
pub mod query;
pub mod types;

pub use config::AppConfig;
pub use error::{LoadError, LoadResult, QueryError, RecoveryAction};
pub use filters::{FilterState, Selection};
pub use query::DashboardQuery;
pub use types::{FilterDimension, GroupBy, Objective, Record};
