use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use tracing::debug;

use super::extract::ExtractedRecord;
use super::tables::{data_cells, header_cells, locate, CandidateTable};
use crate::config::HeaderRules;

pub const TODAY_SOURCE: &str = "admin-save";

const DEFAULT_ENTITY_COL: usize = 0;
const DEFAULT_TODAY_COL: usize = 2;

static NOT_RESULT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9*\-]+").unwrap());

/// Pull today's numbers out of the home page results table.
///
/// The table is the first one whose text carries a `marker` synonym. Column
/// positions come from the first row naming an entity or today column,
/// otherwise entity is column 0 and today's value column 2.
pub fn extract_today(doc: &Html, rules: &HeaderRules, date: &str) -> Vec<ExtractedRecord> {
    let tables = locate(doc);
    let Some(table) = tables.iter().find(|t| rules.is_marker(&t.text())) else {
        debug!("no today table found");
        return Vec::new();
    };
    let (entity_col, today_col) = header_columns(table, rules);

    let mut items = Vec::new();
    for row in table.rows() {
        let cells = data_cells(&row);
        if cells.is_empty() {
            continue;
        }
        let last = cells.len() - 1;
        let raw_entity = &cells[entity_col.min(last)];
        let Some(first_line) = raw_entity.lines().map(str::trim).find(|l| !l.is_empty()) else {
            continue;
        };
        let value = NOT_RESULT_RE.replace_all(&cells[today_col.min(last)], "").trim().to_string();
        if !value.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        items.push(ExtractedRecord {
            entity: first_line.to_uppercase(),
            value,
            time_of_day: String::new(),
            date: date.to_string(),
            source_id: TODAY_SOURCE.to_string(),
            positional: false,
        });
    }
    items
}

fn header_columns(table: &CandidateTable<'_>, rules: &HeaderRules) -> (usize, usize) {
    for row in table.rows() {
        let cells = header_cells(&row);
        if cells.is_empty() {
            continue;
        }
        let entity = cells.iter().position(|c| rules.is_entity(c));
        let today = cells.iter().position(|c| rules.is_today(c));
        if entity.is_some() || today.is_some() {
            return (
                entity.unwrap_or(DEFAULT_ENTITY_COL),
                today.unwrap_or(DEFAULT_TODAY_COL),
            );
        }
    }
    (DEFAULT_ENTITY_COL, DEFAULT_TODAY_COL)
}

// ── Tests ──
