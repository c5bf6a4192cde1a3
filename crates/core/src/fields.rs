//! Fixed record schema: header normalisation, value coercion and the
//! builder every ingestion path (CSV rows, REST row objects) goes through.

use crate::types::Record;
use chrono::NaiveDate;

/// Columns of the record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    Day,
    AccountName,
    CampaignName,
    Country,
    AdsetName,
    AdName,
    FileLink,
    Spend,
    Season,
    ProductionType,
    Shoot,
    CopyHook,
    VisualHook,
    Objective,
    IsFirstInstance,
}

impl RecordField {
    /// Resolve a source header (any casing/spacing) to a schema column.
    /// Unrecognised headers resolve to `None` and are ignored.
    pub fn from_header(header: &str) -> Option<Self> {
        let key = normalize_header(header);
        let field = match key.as_str() {
            "day" | "date" | "reporting_starts" => RecordField::Day,
            "account_name" | "account" => RecordField::AccountName,
            "campaign_name" | "campaign" => RecordField::CampaignName,
            "country" => RecordField::Country,
            "adset_name" | "ad_set_name" | "adset" | "ad_set" => RecordField::AdsetName,
            "ad_name" | "ad" | "adname" => RecordField::AdName,
            "file_link" | "filelink" | "creative_link" | "link" => RecordField::FileLink,
            "spend" | "amount_spent" | "amount_spent_usd" | "cost" => RecordField::Spend,
            "season" => RecordField::Season,
            "production_type" | "productiontype" => RecordField::ProductionType,
            "shoot" => RecordField::Shoot,
            "copy_hook" | "copyhook" => RecordField::CopyHook,
            "visual_hook" | "visualhook" => RecordField::VisualHook,
            "objective" => RecordField::Objective,
            "is_first_instance" | "first_instance" | "isfirstinstance" => RecordField::IsFirstInstance,
            _ => return None,
        };
        Some(field)
    }
}

/// `"Ad Name"`, `"adName"`, `"ad-name"` all become `ad_name`.
pub fn normalize_header(header: &str) -> String {
    let trimmed = header.trim().trim_matches('"').trim();
    let mut out = String::with_capacity(trimmed.len() + 4);
    let mut prev_lower = false;
    for c in trimmed.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Lenient numeric coercion: drop every character that is not a digit,
/// `.` or `-`, then read the longest numeric prefix (optional leading `-`,
/// digits, at most one `.`). Anything unparseable is 0. Never fails.
pub fn coerce_number(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in cleaned.char_indices() {
        match c {
            '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            c if c.is_ascii_digit() => {}
            _ => break,
        }
        end = i + 1;
    }

    match cleaned[..end].parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Spend is never negative.
pub fn coerce_spend(raw: &str) -> f64 {
    coerce_number(raw).max(0.0)
}

pub fn coerce_flag(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("yes") {
        return true;
    }
    coerce_number(trimmed).trunc() != 0.0
}

const DAY_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Normalise a source date to `YYYY-MM-DD`. Unrecognised input is returned
/// trimmed but otherwise untouched.
pub fn normalize_day(raw: &str) -> String {
    let trimmed = raw.trim();
    parse_day(trimmed)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DAY_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            // Timestamps such as 2024-01-05T00:00:00Z or "2024-01-05 00:00:00"
            trimmed
                .get(..10)
                .filter(|_| trimmed.len() > 10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

/// Accumulates column values for one row.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: RecordField, raw: &str) -> &mut Self {
        let value = raw.trim();
        let r = &mut self.record;
        match field {
            RecordField::Day => r.day = normalize_day(value),
            RecordField::AccountName => r.account_name = value.to_string(),
            RecordField::CampaignName => r.campaign_name = value.to_string(),
            RecordField::Country => r.country = value.to_string(),
            RecordField::AdsetName => r.adset_name = value.to_string(),
            RecordField::AdName => r.ad_name = value.to_string(),
            RecordField::FileLink => {
                r.file_link = (!value.is_empty()).then(|| value.to_string());
            }
            RecordField::Spend => r.spend = coerce_spend(value),
            RecordField::Season => r.season = value.to_string(),
            RecordField::ProductionType => r.production_type = value.to_string(),
            RecordField::Shoot => r.shoot = value.to_string(),
            RecordField::CopyHook => r.copy_hook = value.to_string(),
            RecordField::VisualHook => r.visual_hook = value.to_string(),
            RecordField::Objective => r.objective = value.to_string(),
            RecordField::IsFirstInstance => r.is_first_instance = coerce_flag(value),
        }
        self
    }

    /// `None` when the row has no ad name.
    pub fn build(self) -> Option<Record> {
        if self.record.ad_name.is_empty() {
            None
        } else {
            Some(self.record)
        }
    }
}
