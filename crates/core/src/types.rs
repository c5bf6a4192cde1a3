use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket name for records whose group field is empty.
pub const UNKNOWN_GROUP: &str = "Unknown";

/// One row of ad-performance data. Immutable once ingested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// ISO `YYYY-MM-DD` when the source date was recognised, verbatim otherwise.
    pub day: String,
    pub account_name: String,
    pub campaign_name: String,
    pub country: String,
    pub adset_name: String,
    pub ad_name: String,
    pub file_link: Option<String>,
    pub spend: f64,
    pub season: String,
    pub production_type: String,
    pub shoot: String,
    pub copy_hook: String,
    pub visual_hook: String,
    /// Raw objective text; see [`Record::objective_kind`] for the validated form.
    pub objective: String,
    pub is_first_instance: bool,
}

impl Record {
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.day, "%Y-%m-%d").ok()
    }

    pub fn objective_kind(&self) -> Option<Objective> {
        self.objective.parse().ok()
    }

    /// Value of a categorical filter dimension.
    pub fn dimension_value(&self, dimension: FilterDimension) -> &str {
        match dimension {
            FilterDimension::Country => &self.country,
            FilterDimension::Objective => &self.objective,
            FilterDimension::Shoot => &self.shoot,
            FilterDimension::Season => &self.season,
        }
    }

    /// Aggregation bucket; empty values fall into [`UNKNOWN_GROUP`].
    pub fn group_key(&self, group_by: GroupBy) -> &str {
        let value = match group_by {
            GroupBy::Shoot => self.shoot.trim(),
            GroupBy::AdName => self.ad_name.trim(),
        };
        if value.is_empty() {
            UNKNOWN_GROUP
        } else {
            value
        }
    }
}

/// Campaign objective. Anything else in the source is kept on the record but
/// excluded from objective breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Objective {
    Prospecting,
    Remarketing,
    Testing,
    Brand,
}

impl Objective {
    pub const ALL: [Objective; 4] = [
        Objective::Prospecting,
        Objective::Remarketing,
        Objective::Testing,
        Objective::Brand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Prospecting => "Prospecting",
            Objective::Remarketing => "Remarketing",
            Objective::Testing => "Testing",
            Objective::Brand => "Brand",
        }
    }
}

impl FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Objective::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown objective: {trimmed}"))
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dimension spend is grouped by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupBy {
    #[default]
    #[serde(rename = "shoot")]
    Shoot,
    #[serde(rename = "adName")]
    AdName,
}

impl GroupBy {
    /// Literal used in query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Shoot => "shoot",
            GroupBy::AdName => "adName",
        }
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shoot" => Ok(GroupBy::Shoot),
            "adName" => Ok(GroupBy::AdName),
            other => Err(format!("unknown groupBy: {other}")),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-select categorical filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDimension {
    Country,
    Objective,
    Shoot,
    Season,
}

impl FilterDimension {
    pub const ALL: [FilterDimension; 4] = [
        FilterDimension::Country,
        FilterDimension::Objective,
        FilterDimension::Shoot,
        FilterDimension::Season,
    ];

    /// Query parameter name.
    pub fn param(&self) -> &'static str {
        match self {
            FilterDimension::Country => "country",
            FilterDimension::Objective => "objective",
            FilterDimension::Shoot => "shoot",
            FilterDimension::Season => "season",
        }
    }
}
