use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_DB_PATH: &str = "data/results.sqlite";
const DEFAULT_USER_AGENT: &str = "results-importer/0.1";
const DEFAULT_CHART_DIR: &str = "static";

/// One import run: a listing page plus any number of chart pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportConfig {
    pub source: Option<String>,
    pub list_selector: Option<String>,
    pub mappings: Option<Mappings>,
    pub charts: Vec<String>,
    pub header_rules: HeaderRules,
    /// Write `COL1`, `COL2`... records from headerless charts into history too.
    pub positional_history: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source: None,
            list_selector: None,
            mappings: None,
            charts: Vec::new(),
            header_rules: HeaderRules::default(),
            positional_history: true,
        }
    }
}

/// Sub-selectors resolved against each row matched by `listSelector`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Mappings {
    pub game: Option<String>,
    pub result: Option<String>,
    pub time: Option<String>,
    pub date: Option<String>,
}

/// Case-insensitive substrings recognised per semantic column: `marker`,
/// `entity` and `today` for the "today's result" table, `date` for the first
/// label of a chart header written in `<td>` cells.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderRules {
    pub marker: Vec<String>,
    pub entity: Vec<String>,
    pub today: Vec<String>,
    pub date: Vec<String>,
}

impl Default for HeaderRules {
    fn default() -> Self {
        let words = |w: &[&str]| -> Vec<String> { w.iter().map(|s| s.to_string()).collect() };
        Self {
            marker: words(&["आज का रिज़ल्ट", "आज का रिजल्ट", "today result", "today's result"]),
            entity: words(&["game", "नाम", "सट्टा", "गैम", "घाट"]),
            today: words(&["आज", "today"]),
            date: words(&["date", "तारीख", "दिनांक", "तिथि"]),
        }
    }
}

impl HeaderRules {
    pub fn is_marker(&self, text: &str) -> bool {
        matches_any(&self.marker, text)
    }

    pub fn is_entity(&self, text: &str) -> bool {
        matches_any(&self.entity, text)
    }

    pub fn is_today(&self, text: &str) -> bool {
        matches_any(&self.today, text)
    }

    pub fn is_date(&self, text: &str) -> bool {
        matches_any(&self.date, text)
    }
}

fn matches_any(words: &[String], text: &str) -> bool {
    let text = text.to_lowercase();
    words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .any(|w| text.contains(&w.to_lowercase()))
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_json(&raw).with_context(|| format!("Failed to parse config {:?}", path))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut cfg: ImportConfig = serde_json::from_str(raw)?;
        // Blank strings in hand-edited configs mean "not set".
        cfg.source = cfg.source.filter(|s| !s.trim().is_empty());
        cfg.list_selector = cfg.list_selector.filter(|s| !s.trim().is_empty());
        cfg.charts.retain(|c| !c.trim().is_empty());
        Ok(cfg)
    }
}

/// Process-level settings read from `RESULTS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub user_agent: String,
    /// Root of the per-game yearly chart files.
    pub chart_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        let cfg = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix("RESULTS"))
            .build()
            .unwrap_or_default();
        Self {
            db_path: cfg
                .get_string("db_path")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH)),
            user_agent: cfg
                .get_string("user_agent")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            chart_dir: cfg
                .get_string("chart_dir")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CHART_DIR)),
        }
    }
}

// ── Tests ──
