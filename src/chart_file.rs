use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim, Writer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());
static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// One day of a per-game yearly chart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartItem {
    pub date: String,
    pub result: String,
    pub game: String,
}

/// JSON form of a yearly chart, also what `load` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartFile {
    pub game: String,
    pub year: String,
    pub items: Vec<ChartItem>,
}

/// Yearly chart files kept under one root: `uploads/<stem>.csv` is the
/// primary copy, `data/<stem>.json` the fallback.
pub struct ChartFiles {
    root: PathBuf,
}

impl ChartFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn csv_path(&self, stem: &str) -> PathBuf {
        self.root.join("uploads").join(format!("{}.csv", stem))
    }

    fn json_path(&self, stem: &str) -> PathBuf {
        self.root.join("data").join(format!("{}.json", stem))
    }

    /// Items of one game and year, or `None` when neither file exists.
    pub fn load(&self, game: &str, year: &str) -> Result<Option<ChartFile>> {
        let stem = file_stem(game, year)?;
        let game = game.trim();

        let csv_path = self.csv_path(&stem);
        if csv_path.exists() {
            match read_csv(&csv_path, game) {
                Ok(Some(items)) => {
                    debug!("Read {} chart items from {:?}", items.len(), csv_path);
                    return Ok(Some(ChartFile {
                        game: game.to_string(),
                        year: year.to_string(),
                        items,
                    }));
                }
                Ok(None) => warn!("{:?} has no date/result columns", csv_path),
                Err(e) => warn!("Failed to read {:?}: {:#}", csv_path, e),
            }
        }

        let json_path = self.json_path(&stem);
        if !json_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&json_path)
            .with_context(|| format!("Failed to read {:?}", json_path))?;
        let file: ChartFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {:?}", json_path))?;
        Ok(Some(ChartFile {
            game: game.to_string(),
            year: year.to_string(),
            items: file.items,
        }))
    }

    /// Normalize, keep dated rows with a result, sort by date and write both
    /// files. Returns what was written.
    pub fn save(&self, game: &str, year: &str, items: Vec<ChartItem>) -> Result<ChartFile> {
        let stem = file_stem(game, year)?;
        let game = game.trim();
        let mut items = keep_valid(items, game);
        items.sort_by(|a, b| a.date.cmp(&b.date));

        let csv_path = self.csv_path(&stem);
        let json_path = self.json_path(&stem);
        for path in [&csv_path, &json_path] {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {:?}", dir))?;
            }
        }

        let mut wtr = Writer::from_path(&csv_path)
            .with_context(|| format!("Failed to create {:?}", csv_path))?;
        wtr.write_record(["date", "result", "game"])?;
        for it in &items {
            wtr.write_record([&it.date, &it.result, &it.game])?;
        }
        wtr.flush()?;

        let file = ChartFile {
            game: game.to_string(),
            year: year.to_string(),
            items,
        };
        std::fs::write(&json_path, serde_json::to_string(&file)?)
            .with_context(|| format!("Failed to write {:?}", json_path))?;
        info!("Saved {} chart items to {:?}", file.items.len(), csv_path);
        Ok(file)
    }
}

/// `<game>-<year>` with the game lowercased and every run of other
/// characters turned into a single dash.
pub fn file_stem(game: &str, year: &str) -> Result<String> {
    if !YEAR.is_match(year) {
        bail!("Year must be four digits, got {:?}", year);
    }
    let lower = game.trim().to_lowercase();
    let safe = NON_ALNUM.replace_all(&lower, "-");
    let safe = safe.trim_matches('-');
    if safe.is_empty() {
        bail!("Game name {:?} has no letters or digits usable in a file name", game);
    }
    Ok(format!("{}-{}", safe, year))
}

/// Items from a JSON list, or from a `{ "items": [...] }` object such as
/// `chart-file --json` prints.
pub fn parse_items(raw: &str) -> Result<Vec<ChartItem>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Input {
        List(Vec<ChartItem>),
        File { items: Vec<ChartItem> },
    }
    let items = match serde_json::from_str::<Input>(raw).context("Expected a list of chart items")? {
        Input::List(items) => items,
        Input::File { items } => items,
    };
    Ok(items)
}

/// `None` when the header lacks a date or result column.
fn read_csv(path: &Path, game: &str) -> Result<Option<Vec<ChartItem>>> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_lowercase).collect();
    let col = |name: &str| headers.iter().position(|h| h == name);
    let (Some(date_col), Some(result_col)) = (col("date"), col("result")) else {
        return Ok(None);
    };
    let game_col = col("game");

    let mut items = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").to_string();
        items.push(ChartItem {
            date: field(date_col),
            result: field(result_col),
            game: game_col.map(field).unwrap_or_default(),
        });
    }
    Ok(Some(keep_valid(items, game)))
}

fn keep_valid(items: Vec<ChartItem>, game: &str) -> Vec<ChartItem> {
    items
        .into_iter()
        .map(|it| {
            let item_game = match it.game.trim() {
                "" => game,
                g => g,
            };
            ChartItem {
                date: it.date.trim().to_string(),
                result: it.result.trim().to_string(),
                game: item_game.to_string(),
            }
        })
        .filter(|it| ISO_DATE.is_match(&it.date) && !it.result.is_empty())
        .collect()
}

// ── Tests ──
