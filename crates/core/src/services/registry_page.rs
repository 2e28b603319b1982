//! Persisted registry page format.
//!
//! The registry is a Markdown table on the main-list community:
//!
//! ```text
//! | account | status | source_community | first_seen_at | last_reconciled_at | evidence_ref |
//! |---------|--------|------------------|---------------|--------------------|--------------|
//! | spambot1 | active | pics | 2024-01-01T00:00:00Z | 2024-01-01T00:05:00Z | 01hq3... |
//! ```
//!
//! Lines outside the table are kept verbatim, and so is every row that was
//! not changed, so a parse/render cycle leaves hand-edited text alone.

use std::collections::HashMap;

use ada_common::AppError;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use super::model::{Account, BanRecord, BanStatus, CommunityName};

/// Column names, in order.
pub const COLUMNS: [&str; 6] = [
    "account",
    "status",
    "source_community",
    "first_seen_at",
    "last_reconciled_at",
    "evidence_ref",
];

/// Why a page could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("line {line}: page has content but no registry table header")]
    MissingHeader { line: usize },
    #[error("line {line}: expected the header separator row")]
    MissingSeparator { line: usize },
    #[error("line {line}: unexpected header {found:?}")]
    BadHeader { line: usize, found: String },
    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: {message}")]
    BadCell { line: usize, message: String },
    #[error("line {line}: duplicate account {account}")]
    DuplicateAccount { line: usize, account: String },
}

impl From<PageError> for AppError {
    fn from(err: PageError) -> Self {
        Self::RegistryCorruption(err.to_string())
    }
}

#[derive(Debug, Clone)]
enum Line {
    Verbatim(String),
    Row {
        raw: Option<String>,
        /// Leading whitespace of the row, so an indented table stays a
        /// code block when rows are rewritten.
        indent: String,
        record: BanRecord,
    },
}

impl Line {
    fn indent(&self) -> &str {
        match self {
            Self::Verbatim(raw) => leading_whitespace(raw),
            Self::Row { indent, .. } => indent,
        }
    }
}

/// A parsed registry page.
#[derive(Debug, Clone)]
pub struct RegistryPage {
    lines: Vec<Line>,
    index: HashMap<String, usize>,
}

impl Default for RegistryPage {
    fn default() -> Self {
        Self::empty()
    }
}

impl RegistryPage {
    /// A page holding only the table header.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            lines: vec![
                Line::Verbatim(header_line()),
                Line::Verbatim(separator_line()),
                Line::Verbatim(String::new()),
            ],
            index: HashMap::new(),
        }
    }

    /// Parse page text. Blank text yields an empty registry.
    pub fn parse(text: &str) -> Result<Self, PageError> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut lines = Vec::new();
        let mut index = HashMap::new();
        let mut header_seen = false;
        let mut separator_seen = false;

        for (i, raw) in text.split('\n').enumerate() {
            let line_no = i + 1;
            let content = raw.trim();

            if !content.starts_with('|') {
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }

            let cells = split_cells(content);
            if !header_seen {
                let found: Vec<String> = cells.iter().map(|c| c.to_ascii_lowercase()).collect();
                if found != COLUMNS {
                    return Err(PageError::BadHeader {
                        line: line_no,
                        found: content.to_string(),
                    });
                }
                header_seen = true;
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }
            if !separator_seen {
                if !cells.iter().all(|c| is_separator_cell(c)) {
                    return Err(PageError::MissingSeparator { line: line_no });
                }
                separator_seen = true;
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }

            let record = parse_row(line_no, &cells)?;
            let key = record.account.as_str().to_string();
            if index.contains_key(&key) {
                return Err(PageError::DuplicateAccount {
                    line: line_no,
                    account: key,
                });
            }
            index.insert(key, lines.len());
            lines.push(Line::Row {
                raw: Some(raw.to_string()),
                indent: leading_whitespace(raw).to_string(),
                record,
            });
        }

        if !header_seen {
            let line = text
                .split('\n')
                .position(|l| !l.trim().is_empty())
                .map_or(1, |p| p + 1);
            return Err(PageError::MissingHeader { line });
        }
        if !separator_seen {
            return Err(PageError::MissingSeparator {
                line: text.split('\n').count(),
            });
        }

        Ok(Self { lines, index })
    }

    /// Look up the row of an account.
    #[must_use]
    pub fn get(&self, account: &Account) -> Option<&BanRecord> {
        self.index
            .get(account.as_str())
            .and_then(|&i| match &self.lines[i] {
                Line::Row { record, .. } => Some(record),
                Line::Verbatim(_) => None,
            })
    }

    /// Rows in page order.
    pub fn records(&self) -> impl Iterator<Item = &BanRecord> {
        self.lines.iter().filter_map(|line| match line {
            Line::Row { record, .. } => Some(record),
            Line::Verbatim(_) => None,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the page has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Replace the row of an account, or append a new one after the last row.
    /// Rewritten and appended rows take the indentation of the table.
    ///
    /// Returns `false` when the stored row is already identical.
    pub fn upsert(&mut self, record: BanRecord) -> bool {
        let key = record.account.as_str().to_string();
        if let Some(&i) = self.index.get(&key) {
            if let Line::Row { record: current, .. } = &self.lines[i]
                && *current == record
            {
                return false;
            }
            let indent = self.lines[i].indent().to_string();
            self.lines[i] = Line::Row {
                raw: None,
                indent,
                record,
            };
            return true;
        }

        let position = self.insertion_point();
        let indent = position
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(|line| line.indent().to_string())
            .unwrap_or_default();
        self.lines.insert(
            position,
            Line::Row {
                raw: None,
                indent,
                record,
            },
        );
        for slot in self.index.values_mut() {
            if *slot >= position {
                *slot += 1;
            }
        }
        self.index.insert(key, position);
        true
    }

    /// Render the page. Untouched lines are emitted exactly as parsed.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line {
                Line::Verbatim(raw) | Line::Row { raw: Some(raw), .. } => raw.clone(),
                Line::Row {
                    raw: None,
                    indent,
                    record,
                } => format!("{indent}{}", render_row(record)),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Index just after the last table line.
    fn insertion_point(&self) -> usize {
        let last_table_line = self.lines.iter().rposition(|line| match line {
            Line::Row { .. } => true,
            Line::Verbatim(raw) => raw.trim().starts_with('|'),
        });
        last_table_line.map_or(self.lines.len(), |i| i + 1)
    }
}

fn header_line() -> String {
    format!("| {} |", COLUMNS.join(" | "))
}

fn separator_line() -> String {
    let dashes: Vec<String> = COLUMNS.iter().map(|c| "-".repeat(c.len())).collect();
    format!("|{}|", dashes.join("|"))
}

fn leading_whitespace(raw: &str) -> &str {
    &raw[..raw.len() - raw.trim_start().len()]
}

fn split_cells(content: &str) -> Vec<String> {
    let inner = content.trim().trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_cell(cell: &str) -> bool {
    !cell.is_empty() && cell.chars().all(|c| c == '-' || c == ':')
}

fn parse_time(line: usize, column: &str, value: &str) -> Result<DateTime<Utc>, PageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PageError::BadCell {
            line,
            message: format!("{column}: {value:?} is not a timestamp ({e})"),
        })
}

fn parse_row(line: usize, cells: &[String]) -> Result<BanRecord, PageError> {
    if cells.len() != COLUMNS.len() {
        return Err(PageError::ColumnCount {
            line,
            expected: COLUMNS.len(),
            found: cells.len(),
        });
    }
    let bad = |message: String| PageError::BadCell { line, message };

    let account = Account::parse(&cells[0]).map_err(|e| bad(format!("account: {e}")))?;
    let status: BanStatus = cells[1].parse().map_err(|e| bad(format!("status: {e}")))?;
    let source_community =
        CommunityName::parse(&cells[2]).map_err(|e| bad(format!("source_community: {e}")))?;
    let first_seen_at = parse_time(line, "first_seen_at", &cells[3])?;
    let last_reconciled_at = if cells[4].is_empty() {
        None
    } else {
        Some(parse_time(line, "last_reconciled_at", &cells[4])?)
    };
    let evidence_ref = (!cells[5].is_empty()).then(|| cells[5].clone());

    Ok(BanRecord {
        account,
        status,
        source_community,
        first_seen_at,
        last_reconciled_at,
        evidence_ref,
    })
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn render_row(record: &BanRecord) -> String {
    format!(
        "| {} | {} | {} | {} | {} | {} |",
        record.account.display_name(),
        record.status,
        record.source_community.display_name(),
        format_time(record.first_seen_at),
        record.last_reconciled_at.map(format_time).unwrap_or_default(),
        record.evidence_ref.as_deref().unwrap_or_default(),
    )
}
