use tracing::debug;

use super::tables::{data_cells, header_cells, is_th_row, CandidateTable};
use crate::config::HeaderRules;

/// Column semantics of one table, decided once and never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    pub entity_column: Option<usize>,
    pub value_column: Option<usize>,
    pub is_pivot: bool,
    /// Entity names of pivot columns 1.., the date column excluded.
    pub pivot_labels: Vec<String>,
    /// Row (index into `CandidateTable::rows`) consumed as header.
    pub header_row: Option<usize>,
    /// Labels were synthesized (`COL1`, `COL2`...) because the table had no header.
    pub positional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success(HeaderMap),
    Miss,
}

type Strategy = fn(&CandidateTable<'_>, &HeaderRules) -> Classification;

/// Ordered strategies; the first `Success` wins.
pub struct Classifier {
    strategies: Vec<(&'static str, Strategy)>,
    rules: HeaderRules,
}

impl Classifier {
    /// Two-column result tables: entity(+time) then value.
    pub fn listing() -> Self {
        Self {
            strategies: vec![("listing", listing_strategy as Strategy)],
            rules: HeaderRules::default(),
        }
    }

    /// Calendar tables: explicit header first, positional columns as last resort.
    /// `rules.date` decides whether a first row of `<td>` cells is a header.
    pub fn chart(rules: &HeaderRules) -> Self {
        Self {
            strategies: vec![
                ("header_pivot", header_pivot_strategy as Strategy),
                ("positional_pivot", positional_pivot_strategy as Strategy),
            ],
            rules: rules.clone(),
        }
    }

    pub fn classify(&self, table: &CandidateTable<'_>) -> Classification {
        for (name, strategy) in &self.strategies {
            if let Classification::Success(map) = strategy(table, &self.rules) {
                debug!(table = table.index, strategy = *name, "classified");
                return Classification::Success(map);
            }
        }
        debug!(table = table.index, "no strategy matched");
        Classification::Miss
    }
}

/// Rows with at least one `<td>`; header-only rows are not examined.
fn data_rows(table: &CandidateTable<'_>) -> Vec<Vec<String>> {
    table
        .rows()
        .iter()
        .map(data_cells)
        .filter(|cells| !cells.is_empty())
        .collect()
}

fn listing_strategy(table: &CandidateTable<'_>, _rules: &HeaderRules) -> Classification {
    if !data_rows(table).iter().any(|cells| cells.len() >= 2) {
        return Classification::Miss;
    }
    Classification::Success(HeaderMap {
        entity_column: Some(0),
        value_column: Some(1),
        ..HeaderMap::default()
    })
}

fn header_pivot_strategy(table: &CandidateTable<'_>, rules: &HeaderRules) -> Classification {
    let mut labels = table.thead_labels();
    let mut header_row = None;
    if labels.len() < 2 {
        let Some(first) = table.rows().first().copied() else {
            return Classification::Miss;
        };
        labels = header_cells(&first);
        // A plain data row must not be mistaken for entity names.
        let names_date = labels.first().is_some_and(|l| rules.is_date(l));
        if !is_th_row(&first) && !names_date {
            return Classification::Miss;
        }
        header_row = Some(0);
    }
    if labels.len() < 2 {
        return Classification::Miss;
    }

    // Once the header is accepted, its first label is the date column whatever it says.
    Classification::Success(HeaderMap {
        is_pivot: true,
        pivot_labels: labels.split_off(1),
        header_row,
        ..HeaderMap::default()
    })
}

fn positional_pivot_strategy(table: &CandidateTable<'_>, _rules: &HeaderRules) -> Classification {
    let width = data_rows(table)
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    if width < 2 {
        return Classification::Miss;
    }
    Classification::Success(HeaderMap {
        is_pivot: true,
        pivot_labels: (1..width).map(|i| format!("COL{}", i)).collect(),
        positional: true,
        ..HeaderMap::default()
    })
}

// ── Tests ──
