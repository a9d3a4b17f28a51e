use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::db::ChartRow;

/// One calendar day of the chart with every entity's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartDay {
    pub date: String,
    pub values: BTreeMap<String, String>,
}

/// Group chart rows by date for display. Dates keep first-seen order and the
/// first value seen for an entity on a day wins, so feed rows newest first.
pub fn pivot_by_date(rows: &[ChartRow]) -> Vec<ChartDay> {
    let mut days: Vec<ChartDay> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let idx = *index.entry(row.date.as_str()).or_insert_with(|| {
            days.push(ChartDay {
                date: row.date.clone(),
                values: BTreeMap::new(),
            });
            days.len() - 1
        });
        let key = row.entity.trim();
        if !key.is_empty() {
            days[idx]
                .values
                .entry(key.to_string())
                .or_insert_with(|| row.value.clone());
        }
    }
    days
}

/// Entity names across all days, sorted, for table headers.
pub fn entities(days: &[ChartDay]) -> Vec<String> {
    let mut names: Vec<String> = days.iter().flat_map(|d| d.values.keys().cloned()).collect();
    names.sort();
    names.dedup();
    names
}

// ── Tests ──
