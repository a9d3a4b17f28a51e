use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static THEAD_TH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("thead th").unwrap());

/// One `<table>` of a parsed page, in document order.
#[derive(Debug, Clone, Copy)]
pub struct CandidateTable<'a> {
    pub index: usize,
    pub element: ElementRef<'a>,
}

/// Every table of the document. Nothing is filtered here; a table that later
/// fails classification just contributes no records.
pub fn locate(doc: &Html) -> Vec<CandidateTable<'_>> {
    doc.select(&TABLE_SEL)
        .enumerate()
        .map(|(index, element)| CandidateTable { index, element })
        .collect()
}

impl<'a> CandidateTable<'a> {
    pub fn rows(&self) -> Vec<ElementRef<'a>> {
        self.element.select(&ROW_SEL).collect()
    }

    /// Labels of `<th>` cells inside a `<thead>`.
    pub fn thead_labels(&self) -> Vec<String> {
        self.element.select(&THEAD_TH_SEL).map(|c| cell_text(&c)).collect()
    }

    /// All text of the table, whitespace collapsed.
    pub fn text(&self) -> String {
        collapse_ws(&self.element.text().collect::<String>())
    }
}

/// Trimmed texts of the `<td>` cells of a row. Header-only rows yield nothing.
pub fn data_cells(row: &ElementRef<'_>) -> Vec<String> {
    row.select(&TD_SEL).map(|c| cell_text(&c)).collect()
}

/// Trimmed texts of the direct `<th>`/`<td>` children of a row.
pub fn header_cells(row: &ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "th" | "td"))
        .map(|c| cell_text(&c))
        .collect()
}

/// True when every direct cell of the row is a `<th>`.
pub fn is_th_row(row: &ElementRef<'_>) -> bool {
    let mut cells = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "th" | "td"))
        .peekable();
    cells.peek().is_some() && cells.all(|c| c.value().name() == "th")
}

pub fn cell_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Squash every whitespace run to a single space.
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_every_table_in_order() {
        let doc = Html::parse_document(
            "<div><table id=a><tr><td>x</td></tr></table>
             <p>text</p>
             <table id=b></table><table id=c><tr><td>1</td><td>2</td></tr></table></div>",
        );
        let tables = locate(&doc);
        assert_eq!(tables.len(), 3);
        let ids: Vec<_> = tables.iter().map(|t| t.element.value().attr("id")).collect();
        assert_eq!(ids, vec![Some("a"), Some("b"), Some("c")]);
        assert_eq!(tables[2].index, 2);
    }

    #[test]
    fn th_rows_are_told_apart_from_data_rows() {
        let doc = Html::parse_document(
            "<table><tr><th>Date</th><th>GALI</th></tr>
             <tr><th>01</th><td>5</td></tr>
             <tr><td>02</td><td>6</td></tr></table>",
        );
        let rows = locate(&doc)[0].rows();
        let flags: Vec<_> = rows.iter().map(is_th_row).collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn no_tables_is_empty() {
        let doc = Html::parse_document("<p>nothing here</p>");
        assert!(locate(&doc).is_empty());
    }

    #[test]
    fn cell_helpers() {
        let doc = Html::parse_document(
            "<table><thead><tr><th> Date </th><th>GALI</th></tr></thead>
             <tbody><tr><td>01-08</td><td>
                 <b>12</b>
             </td></tr></tbody></table>",
        );
        let table = locate(&doc)[0];
        let rows = table.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(table.thead_labels(), vec!["Date", "GALI"]);
        assert!(data_cells(&rows[0]).is_empty());
        assert_eq!(header_cells(&rows[0]), vec!["Date", "GALI"]);
        assert_eq!(data_cells(&rows[1]), vec!["01-08", "12"]);
    }

    #[test]
    fn collapse_ws_squashes_newlines() {
        assert_eq!(collapse_ws("  DELHI\n   BAZAR \t 01:40 PM "), "DELHI BAZAR 01:40 PM");
    }
}
