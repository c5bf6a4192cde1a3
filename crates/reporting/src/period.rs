use chrono::{Duration, NaiveDate};
use insights_core::FilterState;

/// Number of days in `[start, end]`, counting both ends.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// The equal-length window immediately before `[start, end]`. `None` for
/// an inverted range.
pub fn previous_period(start: NaiveDate, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    if end < start {
        return None;
    }
    let days = inclusive_days(start, end);
    let prev_end = start.checked_sub_signed(Duration::days(1))?;
    let prev_start = start.checked_sub_signed(Duration::days(days))?;
    Some((prev_start, prev_end))
}

/// Same filters shifted onto the previous period. `None` without a full
/// date range.
pub fn previous_filters(state: &FilterState) -> Option<FilterState> {
    let (start, end) = state.date_range()?;
    let (prev_start, prev_end) = previous_period(start, end)?;
    Some(state.clone().with_date_range(prev_start, prev_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::{FilterDimension, Selection};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_week_compares_to_prior_week() {
        assert_eq!(
            previous_period(date("2024-01-08"), date("2024-01-14")),
            Some((date("2024-01-01"), date("2024-01-07")))
        );
    }

    #[test]
    fn test_single_day_and_month_boundary() {
        assert_eq!(
            previous_period(date("2024-03-01"), date("2024-03-01")),
            Some((date("2024-02-29"), date("2024-02-29")))
        );
        assert_eq!(
            previous_period(date("2024-03-01"), date("2024-03-31")),
            Some((date("2024-01-30"), date("2024-02-29")))
        );
        assert_eq!(previous_period(date("2024-03-02"), date("2024-03-01")), None);
    }

    #[test]
    fn test_previous_filters_keep_selections() {
        let state = FilterState::default()
            .with_date_range(date("2024-01-08"), date("2024-01-14"))
            .with_selection(FilterDimension::Country, Selection::single("US"));
        let previous = previous_filters(&state).unwrap();
        assert_eq!(previous.start_date, Some(date("2024-01-01")));
        assert_eq!(previous.end_date, Some(date("2024-01-07")));
        assert_eq!(previous.country, state.country);

        assert!(previous_filters(&FilterState::default()).is_none());
    }
}
