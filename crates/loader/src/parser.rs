//! Delimited-text parsing into typed records.
//!
//! The format is deliberately narrow: one record per line, commas delimit,
//! double quotes protect commas (but not line breaks), `""` inside a quoted
//! field is a literal quote. Header names map onto the fixed schema through
//! [`RecordField::from_header`]; unknown columns are ignored.

use insights_core::fields::{RecordBuilder, RecordField};
use insights_core::{LoadError, LoadResult, Record};
use serde::Serialize;

/// Result of parsing one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub records: Vec<Record>,
    /// Non-blank data rows seen (header excluded).
    pub total_rows: usize,
    /// Rows dropped for lacking an ad name.
    pub skipped: usize,
    /// Rows dropped because their quoting never closed.
    pub malformed: usize,
}

impl ParseReport {
    pub fn error_rate(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.malformed as f64 / self.total_rows as f64
        }
    }

    /// Reject the payload when too many rows were malformed.
    pub fn check_error_rate(&self, max_error_rate: f64) -> LoadResult<()> {
        if self.error_rate() > max_error_rate {
            return Err(LoadError::CorruptData {
                malformed: self.malformed,
                total: self.total_rows,
                max_rate: max_error_rate * 100.0,
            });
        }
        Ok(())
    }
}

/// Outcome of a single data row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Record(Record),
    Skipped,
    Malformed,
}

/// Progress reported while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseProgress {
    pub rows_parsed: usize,
    pub total_rows: usize,
}

/// Column layout resolved from the header line.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    columns: Vec<Option<RecordField>>,
}

impl HeaderMap {
    /// Header lines are split on every comma; quotes only wrap names.
    pub fn parse(line: &str) -> Self {
        let columns = line
            .split(',')
            .map(|name| {
                let name = name.trim();
                let name = name
                    .strip_prefix('"')
                    .and_then(|n| n.strip_suffix('"'))
                    .unwrap_or(name);
                RecordField::from_header(name)
            })
            .collect();
        Self { columns }
    }

    pub fn has(&self, field: RecordField) -> bool {
        self.columns.iter().any(|c| *c == Some(field))
    }

    pub fn parse_row(&self, line: &str) -> RowOutcome {
        let Some(values) = split_row(line) else {
            return RowOutcome::Malformed;
        };
        let mut builder = RecordBuilder::new();
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(field) = column {
                builder.set(*field, values.get(i).map(String::as_str).unwrap_or(""));
            }
        }
        match builder.build() {
            Some(record) => RowOutcome::Record(record),
            None => RowOutcome::Skipped,
        }
    }
}

/// Split one line into fields. `None` when a quoted field is still open at
/// the end of the line.
pub fn split_row(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return None;
    }
    fields.push(current.trim().to_string());
    Some(fields)
}

/// Header plus the data lines of a payload, ready to be parsed row by row.
#[derive(Debug)]
pub struct PreparedText<'a> {
    pub header: HeaderMap,
    pub rows: Vec<&'a str>,
}

/// Locate the header and data lines. Fails when there is no data row.
pub fn prepare(text: &str) -> LoadResult<PreparedText<'_>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next();
    let rows: Vec<&str> = lines.collect();
    match header {
        Some(header) if !rows.is_empty() => Ok(PreparedText {
            header: HeaderMap::parse(header),
            rows,
        }),
        _ => Err(LoadError::Parse("expected a header row and at least one data row".to_string())),
    }
}

/// Parse a whole payload in one go. Pure: the same text always yields the
/// same report.
pub fn parse_records(text: &str) -> LoadResult<ParseReport> {
    let prepared = prepare(text)?;
    let mut report = ParseReport {
        total_rows: prepared.rows.len(),
        records: Vec::with_capacity(prepared.rows.len()),
        ..Default::default()
    };
    for row in &prepared.rows {
        report.push(prepared.header.parse_row(row));
    }
    Ok(report)
}

impl ParseReport {
    pub(crate) fn push(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Record(record) => self.records.push(record),
            RowOutcome::Skipped => self.skipped += 1,
            RowOutcome::Malformed => self.malformed += 1,
        }
    }
}
