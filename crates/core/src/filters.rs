use crate::types::FilterDimension;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Selected values of one categorical filter. Empty means unset: no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeSet<String>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(value: impl Into<String>) -> Self {
        let mut set = BTreeSet::new();
        set.insert(value.into());
        Self(set)
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unset selections admit everything.
    pub fn admits(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.contains(value)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.contains(value)
    }

    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.trim().is_empty() {
            return false;
        }
        self.0.insert(value)
    }

    pub fn remove(&mut self, value: &str) -> bool {
        self.0.remove(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut selection = Selection::new();
        for value in iter {
            selection.insert(value);
        }
        selection
    }
}

/// Active date and category constraints. Transient UI state, mirrored to
/// shareable query strings by [`crate::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub country: Selection,
    #[serde(default)]
    pub objective: Selection,
    #[serde(default)]
    pub shoot: Selection,
    #[serde(default)]
    pub season: Selection,
}

impl FilterState {
    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_selection(mut self, dimension: FilterDimension, selection: Selection) -> Self {
        *self.selection_mut(dimension) = selection;
        self
    }

    pub fn selection(&self, dimension: FilterDimension) -> &Selection {
        match dimension {
            FilterDimension::Country => &self.country,
            FilterDimension::Objective => &self.objective,
            FilterDimension::Shoot => &self.shoot,
            FilterDimension::Season => &self.season,
        }
    }

    pub fn selection_mut(&mut self, dimension: FilterDimension) -> &mut Selection {
        match dimension {
            FilterDimension::Country => &mut self.country,
            FilterDimension::Objective => &mut self.objective,
            FilterDimension::Shoot => &mut self.shoot,
            FilterDimension::Season => &mut self.season,
        }
    }

    /// Both bounds present.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.start_date?, self.end_date?))
    }

    pub fn has_date_bounds(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    /// Copy of this state without the given dimension's selection.
    pub fn without(&self, dimension: FilterDimension) -> FilterState {
        let mut state = self.clone();
        *state.selection_mut(dimension) = Selection::new();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_semantics() {
        let unset = Selection::new();
        assert!(unset.admits("US"));

        let mut selection: Selection = ["US", "DE", ""].into_iter().collect();
        assert_eq!(selection.len(), 2);
        assert!(selection.admits("DE"));
        assert!(!selection.admits("FR"));
        assert!(selection.remove("DE"));
        assert!(!selection.admits("DE"));
    }

    #[test]
    fn test_without_clears_one_dimension() {
        let state = FilterState::default()
            .with_selection(FilterDimension::Country, Selection::single("US"))
            .with_selection(FilterDimension::Shoot, Selection::single("Beach"));
        let stripped = state.without(FilterDimension::Country);
        assert!(stripped.country.is_unset());
        assert!(stripped.shoot.contains("Beach"));
    }
}
