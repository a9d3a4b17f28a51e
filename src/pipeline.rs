use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use scraper::Html;
use tracing::{info, warn};

use crate::config::{HeaderRules, ImportConfig};
use crate::db::Store;
use crate::fetch::Fetch;
use crate::parser::classify::{Classification, Classifier};
use crate::parser::extract::{extract, ExtractedRecord, SelectorPlan};
use crate::parser::tables::locate;

/// Counts reported after an import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Records collected from every source, before the empty-field filter.
    pub attempted: usize,
    /// History rows actually written.
    pub inserted: usize,
    pub chart_rows: usize,
    pub failed_sources: usize,
}

/// Fetch → locate → classify → extract → reconcile, one source at a time.
pub struct Importer<F, S> {
    fetcher: F,
    store: S,
}

impl<F: Fetch, S: Store> Importer<F, S> {
    pub fn new(fetcher: F, store: S) -> Self {
        Self { fetcher, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self, cfg: &ImportConfig) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut found: Vec<ExtractedRecord> = Vec::new();

        if let Some(source) = &cfg.source {
            // Without the primary page there is nothing to fall back on.
            let html = self
                .fetcher
                .fetch(source)
                .await
                .with_context(|| format!("Failed to fetch primary source {}", source))?;
            found.extend(primary_records(&html, cfg, source));
        }

        for chart_url in &cfg.charts {
            match self.import_chart(chart_url, cfg).await {
                Ok((records, upserted)) => {
                    summary.chart_rows += upserted;
                    found.extend(records);
                }
                Err(e) => {
                    warn!("Chart fetch/parse error {}: {:#}", chart_url, e);
                    summary.failed_sources += 1;
                }
            }
        }

        summary.attempted = found.len();
        if !cfg.positional_history {
            found.retain(|r| !r.positional);
        }
        info!("Total items to insert: {} of {}", found.len(), summary.attempted);
        summary.inserted = self.write_history(&found)?;
        info!("Inserted: {}", summary.inserted);
        Ok(summary)
    }

    /// Clear, fetch and upsert one chart page. Returns every record of the
    /// page and the number of chart rows written.
    async fn import_chart(&self, url: &str, cfg: &ImportConfig) -> Result<(Vec<ExtractedRecord>, usize)> {
        // Readers can see this source with rows missing until the upserts below finish.
        if let Err(e) = self.store.clear_by_source(url) {
            warn!("Failed to clear chart rows of {}: {}", url, e);
        }

        let html = self.fetcher.fetch(url).await?;
        let records = chart_records(&html, url, &cfg.header_rules);
        info!("Chart parsing produced {} entries from {}", records.len(), url);

        let mut upserted = 0;
        for rec in records.iter().filter(|r| r.is_persistable()) {
            match self.store.upsert_chart(rec) {
                Ok(_) => upserted += 1,
                Err(e) => warn!("chart upsert error {} {}: {}", rec.entity, rec.date, e),
            }
        }

        Ok((records, upserted))
    }

    fn write_history(&self, records: &[ExtractedRecord]) -> Result<usize> {
        let pb = ProgressBar::new(records.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} history rows")?
                .progress_chars("=> "),
        );

        let mut inserted = 0;
        for rec in records {
            pb.inc(1);
            if !rec.is_persistable() {
                continue;
            }
            match self.store.append_history(rec) {
                Ok(_) => inserted += 1,
                Err(e) => warn!("db insert error {}: {}", rec.entity, e),
            }
        }
        pb.finish_and_clear();
        Ok(inserted)
    }
}

/// Records of the primary listing page: explicit selectors when configured
/// and productive, generic two-column tables otherwise.
pub fn primary_records(html: &str, cfg: &ImportConfig, source: &str) -> Vec<ExtractedRecord> {
    let doc = Html::parse_document(html);

    if let Some(list_selector) = &cfg.list_selector {
        match SelectorPlan::compile(list_selector, cfg.mappings.as_ref()) {
            Ok(plan) => {
                let records = plan.extract(&doc, source);
                if !records.is_empty() {
                    info!("Found {} rows with configured selector", records.len());
                    return records;
                }
            }
            Err(e) => warn!("Ignoring configured selector: {:#}", e),
        }
    }

    info!("No rows from selector, trying table-based parsing...");
    let records = classify_and_extract(&doc, &Classifier::listing(), source);
    info!("Table parsing produced {} entries", records.len());
    records
}

/// Records of a calendar page, every table read as a pivot.
pub fn chart_records(html: &str, source: &str, rules: &HeaderRules) -> Vec<ExtractedRecord> {
    let doc = Html::parse_document(html);
    classify_and_extract(&doc, &Classifier::chart(rules), source)
}

fn classify_and_extract(doc: &Html, classifier: &Classifier, source: &str) -> Vec<ExtractedRecord> {
    let mut records = Vec::new();
    for table in locate(doc) {
        let Classification::Success(map) = classifier.classify(&table) else {
            continue;
        };
        if map.positional {
            warn!(
                "{} table {} has no usable header; entities named by column position",
                source, table.index
            );
        }
        records.extend(extract(&table, &map, source));
    }
    records
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;

    use super::*;
    use crate::db::{HistoryRow, SqliteStore, StoreResult};
    use crate::error::{FetchError, PersistenceError};

    const PRIMARY: &str = "https://results.test/";
    const CHART: &str = "https://results.test/chart-10-2024.html";
    const BARE_CHART: &str = "https://results.test/chart-x.html";

    struct MapFetcher {
        pages: HashMap<String, String>,
    }

    impl MapFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            let pages = pages
                .iter()
                .map(|(url, fixture)| {
                    let html = std::fs::read_to_string(format!("tests/fixtures/{}.html", fixture)).unwrap();
                    (url.to_string(), html)
                })
                .collect();
            Self { pages }
        }

        fn with_html(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    impl Fetch for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    /// SQLite store that refuses history rows for one entity, can fail source
    /// clears, and counts writes that arrive with an empty entity or value.
    struct FlakyStore {
        inner: SqliteStore,
        reject_entity: Option<&'static str>,
        fail_clear: bool,
        clears: Cell<usize>,
        blank_writes: Cell<usize>,
    }

    impl FlakyStore {
        fn new(reject_entity: Option<&'static str>, fail_clear: bool) -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                reject_entity,
                fail_clear,
                clears: Cell::new(0),
                blank_writes: Cell::new(0),
            }
        }

        fn note_blank(&self, rec: &ExtractedRecord) {
            if rec.entity.trim().is_empty() || rec.value.trim().is_empty() {
                self.blank_writes.set(self.blank_writes.get() + 1);
            }
        }
    }

    fn refused() -> PersistenceError {
        PersistenceError::Sqlite(rusqlite::Error::InvalidQuery)
    }

    impl Store for FlakyStore {
        fn append_history(&self, rec: &ExtractedRecord) -> StoreResult<i64> {
            self.note_blank(rec);
            if self.reject_entity == Some(rec.entity.as_str()) {
                return Err(refused());
            }
            self.inner.append_history(rec)
        }

        fn upsert_chart(&self, rec: &ExtractedRecord) -> StoreResult<i64> {
            self.note_blank(rec);
            self.inner.upsert_chart(rec)
        }

        fn clear_by_source(&self, source: &str) -> StoreResult<usize> {
            self.clears.set(self.clears.get() + 1);
            if self.fail_clear {
                return Err(refused());
            }
            self.inner.clear_by_source(source)
        }

        fn latest_per_entity(&self) -> StoreResult<Vec<HistoryRow>> {
            self.inner.latest_per_entity()
        }
    }

    fn config(source: Option<&str>, charts: &[&str]) -> ImportConfig {
        ImportConfig {
            source: source.map(str::to_string),
            charts: charts.iter().map(|c| c.to_string()).collect(),
            ..ImportConfig::default()
        }
    }

    fn sqlite() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn full_run_listing_and_charts() {
        let fetcher = MapFetcher::new(&[
            (PRIMARY, "listing"),
            (CHART, "chart"),
            (BARE_CHART, "chart_headerless"),
        ]);
        let importer = Importer::new(fetcher, sqlite());
        let summary = importer
            .run(&config(Some(PRIMARY), &[CHART, BARE_CHART]))
            .await
            .unwrap();

        // listing: 4 rows (one without value); chart: 4 cells (one empty); bare chart: 2 cells
        assert_eq!(summary.attempted, 10);
        assert_eq!(summary.inserted, 8);
        assert_eq!(summary.chart_rows, 5);
        assert_eq!(summary.failed_sources, 0);

        let history = importer.store().list_history(100).unwrap();
        assert!(history.iter().all(|r| !r.entity.is_empty() && !r.value.is_empty()));
        let delhi = history.iter().find(|r| r.entity == "DELHI BAZAR").unwrap();
        assert_eq!((delhi.value.as_str(), delhi.time_of_day.as_str()), ("47", "01:40 PM"));
        let ganesh = history.iter().find(|r| r.entity == "SHRI GANESH").unwrap();
        assert_eq!(ganesh.time_of_day, "04:30 PM");

        let charts = importer.store().list_charts(100).unwrap();
        assert!(charts.iter().all(|r| !r.value.is_empty()));
        assert!(charts.iter().any(|r| r.entity == "COL2" && r.value == "34"));
        assert!(charts
            .iter()
            .any(|r| r.entity == "SADAR BAZAR" && r.date == "01-08" && r.source == CHART));
    }

    #[tokio::test]
    async fn empty_records_never_reach_the_store() {
        let fetcher = MapFetcher::new(&[
            (PRIMARY, "listing"),
            (CHART, "chart"),
            (BARE_CHART, "chart_headerless"),
        ]);
        let importer = Importer::new(fetcher, FlakyStore::new(None, false));
        let summary = importer
            .run(&config(Some(PRIMARY), &[CHART, BARE_CHART]))
            .await
            .unwrap();

        assert_eq!(summary.attempted, 10);
        assert_eq!(summary.inserted, 8);
        assert_eq!(summary.chart_rows, 5);
        // FARIDABAD has no value on the listing, GWALIOR none on 02-08.
        assert_eq!(importer.store().blank_writes.get(), 0);
    }

    #[tokio::test]
    async fn headerless_data_chart_keeps_every_row() {
        let fetcher = MapFetcher::new(&[]).with_html(
            BARE_CHART,
            "<table><tr><td>01-08</td><td>12</td><td>34</td></tr>
             <tr><td>02-08</td><td>56</td><td>78</td></tr></table>",
        );
        let importer = Importer::new(fetcher, sqlite());
        let summary = importer.run(&config(None, &[BARE_CHART])).await.unwrap();
        assert_eq!(summary.chart_rows, 4);
        let charts = importer.store().list_charts(10).unwrap();
        assert!(charts.iter().all(|r| r.entity == "COL1" || r.entity == "COL2"));
        assert!(charts.iter().any(|r| r.date == "01-08" && r.entity == "COL1" && r.value == "12"));
    }

    #[tokio::test]
    async fn reimporting_a_chart_does_not_duplicate_chart_rows() {
        let importer = Importer::new(MapFetcher::new(&[(CHART, "chart")]), sqlite());
        let cfg = config(None, &[CHART]);
        importer.run(&cfg).await.unwrap();
        importer.run(&cfg).await.unwrap();

        assert_eq!(importer.store().list_charts(100).unwrap().len(), 3);
        // History keeps every observation.
        assert_eq!(importer.store().list_history(100).unwrap().len(), 6);
        let latest = importer.store().latest_per_entity().unwrap();
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn configured_selector_wins_when_it_matches() {
        let fetcher = MapFetcher::new(&[]).with_html(
            PRIMARY,
            r#"<div class="r"><b class="g">KAROL BAGH</b><b class="v">66</b></div>
               <table><tr><td>IGNORED</td><td>1</td></tr></table>"#,
        );
        let mut cfg = config(Some(PRIMARY), &[]);
        cfg.list_selector = Some("div.r".into());
        cfg.mappings = Some(crate::config::Mappings {
            game: Some(".g".into()),
            result: Some(".v".into()),
            ..Default::default()
        });
        let importer = Importer::new(fetcher, sqlite());
        let summary = importer.run(&cfg).await.unwrap();
        assert_eq!(summary.inserted, 1);
        let rows = importer.store().list_history(10).unwrap();
        assert_eq!(rows[0].entity, "KAROL BAGH");
        assert_eq!(rows[0].source, PRIMARY);
    }

    #[tokio::test]
    async fn selector_without_matches_falls_back_to_tables() {
        let mut cfg = config(Some(PRIMARY), &[]);
        cfg.list_selector = Some("div.nothing-here".into());
        let importer = Importer::new(MapFetcher::new(&[(PRIMARY, "listing")]), sqlite());
        let summary = importer.run(&cfg).await.unwrap();
        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.inserted, 3);
    }

    #[tokio::test]
    async fn primary_fetch_failure_aborts_run() {
        let importer = Importer::new(MapFetcher::new(&[(CHART, "chart")]), sqlite());
        let err = importer.run(&config(Some(PRIMARY), &[CHART])).await;
        assert!(err.is_err());
        assert!(importer.store().list_charts(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn chart_fetch_failure_skips_only_that_chart() {
        let missing = "https://results.test/missing.html";
        let importer = Importer::new(MapFetcher::new(&[(CHART, "chart")]), sqlite());
        let summary = importer.run(&config(None, &[missing, CHART])).await.unwrap();
        assert_eq!(summary.failed_sources, 1);
        assert_eq!(summary.chart_rows, 3);
        assert_eq!(summary.inserted, 3);
    }

    #[tokio::test]
    async fn record_write_failures_do_not_abort_batch() {
        let store = FlakyStore::new(Some("GALI"), true);
        let importer = Importer::new(
            MapFetcher::new(&[(PRIMARY, "listing"), (CHART, "chart")]),
            store,
        );
        let summary = importer.run(&config(Some(PRIMARY), &[CHART])).await.unwrap();
        // GALI refused; the failed clear is logged and the chart still imported.
        assert_eq!(summary.inserted, 2 + 3);
        assert_eq!(summary.chart_rows, 3);
        assert_eq!(importer.store().clears.get(), 1);
        let latest = importer.store().latest_per_entity().unwrap();
        assert!(latest.iter().all(|r| r.entity != "GALI"));
    }

    #[tokio::test]
    async fn positional_records_can_be_kept_out_of_history() {
        let mut cfg = config(None, &[BARE_CHART]);
        cfg.positional_history = false;
        let importer = Importer::new(MapFetcher::new(&[(BARE_CHART, "chart_headerless")]), sqlite());
        let summary = importer.run(&cfg).await.unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.chart_rows, 2);
        assert_eq!(summary.inserted, 0);
        assert!(importer.store().list_history(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_configured_is_a_noop() {
        let importer = Importer::new(MapFetcher::new(&[]), sqlite());
        let summary = importer.run(&ImportConfig::default()).await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn chart_records_from_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/chart.html").unwrap();
        let recs = chart_records(&html, CHART, &HeaderRules::default());
        let got: Vec<_> = recs
            .iter()
            .map(|r| (r.date.as_str(), r.entity.as_str(), r.value.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("01-08", "SADAR BAZAR", "93"),
                ("01-08", "GWALIOR", "41"),
                ("02-08", "SADAR BAZAR", "17"),
                ("02-08", "GWALIOR", ""),
            ]
        );
    }
}
