mod chart_file;
mod charts;
mod config;
mod db;
mod error;
mod fetch;
mod parser;
mod pipeline;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use scraper::Html;
use serde::Serialize;
use tracing::warn;

use crate::chart_file::ChartFiles;
use crate::config::{HeaderRules, ImportConfig, Settings};
use crate::db::{SqliteStore, Store};
use crate::fetch::HttpFetcher;
use crate::parser::extract::ExtractedRecord;
use crate::pipeline::Importer;

#[derive(Parser)]
#[command(name = "results_ingest", about = "Result listing and chart page importer")]
struct Cli {
    /// Print rows as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the configured listing and chart pages and store their results
    Import {
        /// Import config (JSON)
        #[arg(default_value = "sample-config.json")]
        config: PathBuf,
    },
    /// Most recent history rows
    Recent {
        #[arg(short = 'n', long, default_value = "200")]
        limit: usize,
    },
    /// Latest value of every game
    Latest,
    /// Chart rows grouped by date
    Charts {
        #[arg(short = 'n', long, default_value = "5000")]
        limit: usize,
    },
    /// Read today's results out of a saved home page and upsert them as chart rows
    Today {
        html: PathBuf,
        /// Chart date to file them under (default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Import config whose headerRules should be used
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the yearly chart file of one game
    ChartFile { game: String, year: String },
    /// Replace the yearly chart file of one game with items from a JSON file
    ChartSave {
        game: String,
        year: String,
        /// JSON list of {date, result, game}, or the object `chart-file --json` prints
        items: PathBuf,
    },
    /// Append a history row by hand
    Add {
        #[arg(long)]
        game: String,
        #[arg(long)]
        result: String,
        #[arg(long, default_value = "")]
        time: String,
        #[arg(long, default_value = "")]
        date: String,
        #[arg(long, default_value = "admin")]
        source: String,
    },
    /// Change fields of a history row
    Edit {
        id: i64,
        #[arg(long)]
        game: Option<String>,
        #[arg(long)]
        result: Option<String>,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Delete a history row
    Delete { id: i64 },
    /// Delete chart rows of one source, or all of them
    ClearCharts {
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Row counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::from_env();
    let store = SqliteStore::open(&settings.db_path)
        .with_context(|| format!("Failed to open {:?}", settings.db_path))?;

    let result = match cli.command {
        Commands::Import { config } => {
            let cfg = ImportConfig::load(&config)?;
            let fetcher = HttpFetcher::new(&settings.user_agent)?;
            let importer = Importer::new(fetcher, store);
            let summary = importer.run(&cfg).await?;
            println!(
                "Attempted {} | inserted {} history rows | {} chart rows | {} chart sources failed",
                summary.attempted, summary.inserted, summary.chart_rows, summary.failed_sources
            );
            let s = importer.store().stats()?;
            println!("History now holds {} rows for {} games", s.history, s.entities);
            Ok(())
        }
        Commands::Recent { limit } => {
            let rows = store.list_history(limit)?;
            print_history(&rows, cli.json)
        }
        Commands::Latest => {
            let rows = store.latest_per_entity()?;
            print_history(&rows, cli.json)
        }
        Commands::Charts { limit } => {
            let rows = store.list_charts(limit)?;
            let days = charts::pivot_by_date(&rows);
            if cli.json {
                return print_json(&days);
            }
            if days.is_empty() {
                println!("No chart rows.");
                return Ok(());
            }
            let names = charts::entities(&days);
            print!("{:<12}", "Date");
            for n in &names {
                print!(" | {:<12}", truncate(n, 12));
            }
            println!();
            println!("{}", "-".repeat(12 + names.len() * 15));
            for day in &days {
                print!("{:<12}", truncate(&day.date, 12));
                for n in &names {
                    let v = day.values.get(n).map(String::as_str).unwrap_or("-");
                    print!(" | {:<12}", v);
                }
                println!();
            }
            Ok(())
        }
        Commands::Today { html, date, config } => {
            let rules = match config {
                Some(p) => ImportConfig::load(&p)?.header_rules,
                None => HeaderRules::default(),
            };
            let date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
            let raw = std::fs::read_to_string(&html)
                .with_context(|| format!("Failed to read {:?}", html))?;
            let records = parser::today::extract_today(&Html::parse_document(&raw), &rules, &date);
            let mut updated = 0;
            for rec in &records {
                match store.upsert_chart(rec) {
                    Ok(_) => updated += 1,
                    Err(e) => warn!("upsertChart error {}: {}", rec.entity, e),
                }
            }
            println!("Updated {} chart rows for {}", updated, date);
            Ok(())
        }
        Commands::ChartFile { game, year } => {
            let Some(file) = ChartFiles::new(&settings.chart_dir).load(&game, &year)? else {
                bail!("No chart file for {} {}", game, year);
            };
            if cli.json {
                return print_json(&file);
            }
            println!("{:<12} | {:<8} | {:<20}", "Date", "Result", "Game");
            println!("{}", "-".repeat(46));
            for it in &file.items {
                println!(
                    "{:<12} | {:<8} | {:<20}",
                    it.date,
                    truncate(&it.result, 8),
                    truncate(&it.game, 20)
                );
            }
            println!("\n{} rows", file.items.len());
            Ok(())
        }
        Commands::ChartSave { game, year, items } => {
            let raw = std::fs::read_to_string(&items)
                .with_context(|| format!("Failed to read {:?}", items))?;
            let items = chart_file::parse_items(&raw)?;
            let saved = ChartFiles::new(&settings.chart_dir).save(&game, &year, items)?;
            println!("Saved {} chart rows for {} {}", saved.items.len(), saved.game, saved.year);
            Ok(())
        }
        Commands::Add { game, result, time, date, source } => {
            let rec = ExtractedRecord {
                entity: game,
                value: result,
                time_of_day: time,
                date,
                source_id: source,
                positional: false,
            };
            let id = store.append_history(&rec)?;
            println!("Added row {}", id);
            Ok(())
        }
        Commands::Edit { id, game, result, time, date, source } => {
            let Some(row) = store.get_history(id)? else {
                bail!("No history row {}", id);
            };
            let rec = ExtractedRecord {
                entity: game.unwrap_or(row.entity),
                value: result.unwrap_or(row.value),
                time_of_day: time.unwrap_or(row.time_of_day),
                date: date.unwrap_or(row.date),
                source_id: source.unwrap_or(row.source),
                positional: false,
            };
            store.update_history(id, &rec)?;
            println!("Updated row {}", id);
            Ok(())
        }
        Commands::Delete { id } => {
            if !store.delete_history(id)? {
                bail!("No history row {}", id);
            }
            println!("Deleted row {}", id);
            Ok(())
        }
        Commands::ClearCharts { source } => {
            let n = match source {
                Some(s) => store.clear_by_source(&s)?,
                None => store.clear_all_charts()?,
            };
            println!("Removed {} chart rows", n);
            Ok(())
        }
        Commands::Stats => {
            let s = store.stats()?;
            println!("History rows:  {}", s.history);
            println!("Games:         {}", s.entities);
            println!("Chart rows:    {}", s.charts);
            println!("Chart sources: {}", s.chart_sources);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_history(rows: &[db::HistoryRow], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(rows);
    }
    if rows.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!(
        "{:>6} | {:<20} | {:<8} | {:<9} | {:<10} | {:<30}",
        "ID", "Game", "Result", "Time", "Date", "Source"
    );
    println!("{}", "-".repeat(98));
    for r in rows {
        println!(
            "{:>6} | {:<20} | {:<8} | {:<9} | {:<10} | {:<30}",
            r.id,
            truncate(&r.entity, 20),
            truncate(&r.value, 8),
            r.time_of_day,
            r.date,
            truncate(&r.source, 30)
        );
    }
    println!("\n{} rows", rows.len());
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
