use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

use super::classify::HeaderMap;
use super::split::split;
use super::tables::{cell_text, collapse_ws, data_cells, CandidateTable};
use crate::config::Mappings;

/// One (entity, value) observation pulled out of a page. Empty `time_of_day`
/// or `date` mean "not known".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRecord {
    pub entity: String,
    pub value: String,
    pub time_of_day: String,
    pub date: String,
    pub source_id: String,
    /// Entity name was synthesized from the column position.
    pub positional: bool,
}

impl ExtractedRecord {
    /// Only records with both an entity and a value may reach the store.
    pub fn is_persistable(&self) -> bool {
        !self.entity.trim().is_empty() && !self.value.trim().is_empty()
    }
}

/// Emit one record per (row, data column) according to `map`.
pub fn extract(table: &CandidateTable<'_>, map: &HeaderMap, source_id: &str) -> Vec<ExtractedRecord> {
    if map.is_pivot {
        extract_pivot(table, map, source_id)
    } else {
        extract_listing(table, map, source_id)
    }
}

fn body_rows(table: &CandidateTable<'_>, map: &HeaderMap) -> Vec<Vec<String>> {
    table
        .rows()
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != map.header_row)
        .map(|(_, row)| data_cells(row))
        .collect()
}

fn extract_listing(table: &CandidateTable<'_>, map: &HeaderMap, source_id: &str) -> Vec<ExtractedRecord> {
    let entity_col = map.entity_column.unwrap_or(0);
    let value_col = map.value_column.unwrap_or(1);
    let mut items = Vec::new();

    for cells in body_rows(table, map) {
        if cells.len() < 2 || cells.len() <= entity_col.max(value_col) {
            continue;
        }
        let first = collapse_ws(&cells[entity_col]);
        if first.is_empty() {
            continue;
        }
        let field = split(&first);
        if field.label.is_empty() {
            continue;
        }
        items.push(ExtractedRecord {
            entity: field.label,
            value: cells[value_col].clone(),
            time_of_day: field.time_of_day,
            date: String::new(),
            source_id: source_id.to_string(),
            positional: false,
        });
    }

    items
}

fn extract_pivot(table: &CandidateTable<'_>, map: &HeaderMap, source_id: &str) -> Vec<ExtractedRecord> {
    let mut items = Vec::new();

    for cells in body_rows(table, map) {
        if cells.len() < 2 {
            continue;
        }
        // Raw day text; the store decides whether it is a real date.
        let date = &cells[0];
        for (i, value) in cells.iter().enumerate().skip(1) {
            let Some(label) = map.pivot_labels.get(i - 1) else {
                break;
            };
            if label.is_empty() {
                continue;
            }
            items.push(ExtractedRecord {
                entity: label.clone(),
                value: value.clone(),
                time_of_day: String::new(),
                date: date.clone(),
                source_id: source_id.to_string(),
                positional: map.positional,
            });
        }
    }

    items
}

// ── Explicit selectors ──

/// Caller-supplied row selector plus per-field sub-selectors.
pub struct SelectorPlan {
    rows: Selector,
    game: Option<Selector>,
    result: Option<Selector>,
    time: Option<Selector>,
    date: Option<Selector>,
}

impl SelectorPlan {
    pub fn compile(list_selector: &str, mappings: Option<&Mappings>) -> Result<Self> {
        let sub = |s: Option<&String>| -> Result<Option<Selector>> {
            s.filter(|s| !s.trim().is_empty()).map(|s| parse_selector(s)).transpose()
        };
        Ok(Self {
            rows: parse_selector(list_selector)?,
            game: sub(mappings.and_then(|m| m.game.as_ref()))?,
            result: sub(mappings.and_then(|m| m.result.as_ref()))?,
            time: sub(mappings.and_then(|m| m.time.as_ref()))?,
            date: sub(mappings.and_then(|m| m.date.as_ref()))?,
        })
    }

    /// Records for every matched row carrying both a game and a result.
    /// Without a sub-selector, game and result fall back to the row's first
    /// and second child elements.
    pub fn extract(&self, doc: &Html, source_id: &str) -> Vec<ExtractedRecord> {
        doc.select(&self.rows)
            .filter_map(|row| {
                let children: Vec<ElementRef<'_>> = row.children().filter_map(ElementRef::wrap).collect();
                let positional = |i: usize| children.get(i).map(cell_text).unwrap_or_default();

                let entity = match &self.game {
                    Some(sel) => select_text(&row, sel),
                    None => positional(0),
                };
                let value = match &self.result {
                    Some(sel) => select_text(&row, sel),
                    None => positional(1),
                };
                if entity.is_empty() || value.is_empty() {
                    return None;
                }
                Some(ExtractedRecord {
                    entity,
                    value,
                    time_of_day: self.time.as_ref().map(|s| select_text(&row, s)).unwrap_or_default(),
                    date: self.date.as_ref().map(|s| select_text(&row, s)).unwrap_or_default(),
                    source_id: source_id.to_string(),
                    positional: false,
                })
            })
            .collect()
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("invalid selector {:?}: {:?}", s, e))
}

fn select_text(row: &ElementRef<'_>, sel: &Selector) -> String {
    row.select(sel)
        .map(|e| e.text().collect::<String>())
        .collect::<String>()
        .trim()
        .to_string()
}

// ── Tests ──
