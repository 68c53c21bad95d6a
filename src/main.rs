use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rankshelf::config::Configuration;
use rankshelf::http::HttpClient;
use rankshelf::metadata::JikanClient;
use rankshelf::{AddRequest, Category, Item, ItemKey, MediaType, RecordKey, Status, Tracker};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// File a title into a status list, or move it there
    Add {
        media_type: MediaType,
        media_id: i64,
        status: Status,
        /// Start date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        start: Option<DateTime<Utc>>,
        /// End date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        end: Option<DateTime<Utc>>,
        /// File as a rewatch of an already completed title
        #[arg(long)]
        rewatch: bool,
        /// Explicit rewatch number
        #[arg(long)]
        rewatch_count: Option<u32>,
    },
    /// Remove a title, or one of its rewatches
    Remove {
        media_type: MediaType,
        media_id: i64,
        #[arg(long)]
        rewatch: Option<u32>,
    },
    /// Set episodes or chapters consumed
    Progress {
        media_type: MediaType,
        media_id: i64,
        progress: u32,
        #[arg(long)]
        rewatch: Option<u32>,
    },
    /// Set the user score
    Rate {
        media_type: MediaType,
        media_id: i64,
        score: u32,
        #[arg(long)]
        rewatch: Option<u32>,
    },
    /// Show one status list in order
    List { media_type: MediaType, status: Status },
    /// Show a title with its rewatch history
    Detail { media_type: MediaType, media_id: i64 },
    /// Start or finish a rewatch
    Rewatch {
        #[command(subcommand)]
        action: RewatchAction,
    },
    /// Move an entry within a list (1-based positions)
    Move {
        media_type: MediaType,
        status: Status,
        from: usize,
        to: usize,
    },
    /// Rank a list through pairwise choices
    Rank { media_type: MediaType, status: Status },
    /// Continue a saved ranking session
    Resume,
}

#[derive(Subcommand)]
enum RewatchAction {
    Start {
        media_type: MediaType,
        media_id: i64,
    },
    Complete {
        media_type: MediaType,
        media_id: i64,
        #[arg(long, value_parser = parse_date)]
        end: Option<DateTime<Utc>>,
    },
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))
        .and_then(|d| d.and_hms_opt(0, 0, 0).ok_or_else(|| "invalid date".to_string()))
        .map(|d| d.and_utc())
}

fn record_key(media_type: MediaType, media_id: i64, rewatch: Option<u32>) -> RecordKey {
    let key = ItemKey::new(media_id, media_type);
    match rewatch {
        Some(count) => RecordKey::rewatch(key, count),
        None => RecordKey::primary(key),
    }
}

fn print_item(position: usize, item: &Item) {
    let rewatch = if item.is_rewatch {
        format!(" (rewatch #{})", item.rewatch_count)
    } else {
        String::new()
    };
    let total = item
        .total_units
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string());
    let rank = if item.rank == 0 {
        "-".to_string()
    } else {
        item.rank.to_string()
    };

    println!(
        "{:>3}. [{}] {} #{}{} {}/{} score {}",
        position, rank, item.title, item.media_id, rewatch, item.progress, total, item.score
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting rankshelf v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Configuration::from_file(&cli.config)?;
    let http_client = HttpClient::new(config.metadata_timeout())?;
    let metadata = Arc::new(JikanClient::new(http_client, &config.metadata())?);

    let (mut tracker, report) = Tracker::open(&config, metadata).await?;
    for filter in &report.recovered {
        warn!("Recovered {} from the backup store", filter);
    }

    run(&mut tracker, cli.command).await?;

    for divergence in tracker.divergences() {
        warn!(
            "Store divergence: {} {} {} failed: {}",
            divergence.backend, divergence.op, divergence.target, divergence.message
        );
    }

    Ok(())
}

async fn run(tracker: &mut Tracker, command: Command) -> Result<()> {
    match command {
        Command::Add {
            media_type,
            media_id,
            status,
            start,
            end,
            rewatch,
            rewatch_count,
        } => {
            let request = AddRequest {
                media_id,
                media_type,
                status,
                start_date: start,
                end_date: end,
                rewatch: rewatch || rewatch_count.is_some(),
                rewatch_count,
            };
            let item = tracker.add_item(request).await?;
            print_item(1, &item);
        }
        Command::Remove {
            media_type,
            media_id,
            rewatch,
        } => {
            let removed = tracker.remove_item(&record_key(media_type, media_id, rewatch)).await?;
            println!("Removed {}", removed.title);
        }
        Command::Progress {
            media_type,
            media_id,
            progress,
            rewatch,
        } => {
            let item = tracker
                .update_progress(
                    media_id,
                    media_type,
                    rewatch.is_some(),
                    rewatch.unwrap_or(0),
                    progress,
                )
                .await?;
            print_item(1, &item);
        }
        Command::Rate {
            media_type,
            media_id,
            score,
            rewatch,
        } => {
            let item = tracker
                .update_rating(media_id, media_type, rewatch.is_some(), rewatch.unwrap_or(0), score)
                .await?;
            print_item(1, &item);
        }
        Command::List { media_type, status } => {
            let items = tracker.items(Category::new(media_type, status));
            if items.is_empty() {
                println!("{} {} list is empty", media_type, status);
            }
            for (index, item) in items.iter().enumerate() {
                print_item(index + 1, item);
            }
        }
        Command::Detail { media_type, media_id } => {
            let detail = tracker.open_detail(ItemKey::new(media_id, media_type)).await;
            match detail.status {
                Some(status) => println!("Status: {}", status),
                None => println!("Not in the library"),
            }
            if let Some(primary) = &detail.primary {
                print_item(1, primary);
            }
            if let Some(active) = &detail.active_rewatch {
                println!("Running:");
                print_item(1, active);
            }
            if !detail.completed_rewatches.is_empty() {
                println!("Completed rewatches:");
                for (index, rewatch) in detail.completed_rewatches.iter().enumerate() {
                    print_item(index + 1, rewatch);
                }
            }
        }
        Command::Rewatch { action } => {
            let item = match action {
                RewatchAction::Start {
                    media_type,
                    media_id,
                } => {
                    tracker
                        .start_rewatch(ItemKey::new(media_id, media_type), None)
                        .await?
                }
                RewatchAction::Complete {
                    media_type,
                    media_id,
                    end,
                } => {
                    tracker
                        .complete_rewatch(ItemKey::new(media_id, media_type), end)
                        .await?
                }
            };
            print_item(1, &item);
        }
        Command::Move {
            media_type,
            status,
            from,
            to,
        } => {
            if from == 0 || to == 0 {
                anyhow::bail!("positions start at 1");
            }
            let category = Category::new(media_type, status);
            tracker.move_item(category, from - 1, to - 1).await?;
            for (index, item) in tracker.items(category).iter().enumerate() {
                print_item(index + 1, item);
            }
        }
        Command::Rank { media_type, status } => {
            let category = Category::new(media_type, status);
            let total = tracker.start_tournament(category)?.schedule().len();
            println!("{} comparisons. 1/2 to choose, s to skip, q to save for later.", total);
            play(tracker, category).await?;
        }
        Command::Resume => {
            let category = tracker.resume().await?.category();
            play(tracker, category).await?;
        }
    }

    Ok(())
}

/// Interactive tournament loop on stdin.
async fn play(tracker: &mut Tracker, category: Category) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(pair) = tracker.current_pair().cloned() {
        let (done, total) = tracker
            .active_tournament()
            .map(|run| (run.cursor() + 1, run.schedule().len()))
            .unwrap_or((0, 0));
        println!("[{}/{}] 1) {}   2) {}", done, total, pair.left.title, pair.right.title);

        let Some(line) = lines.next_line().await? else {
            tracker.save_for_later().await?;
            println!("Input closed, session saved");
            return Ok(());
        };

        let outcome = match line.trim() {
            "1" => tracker.record_choice(pair.left.media_id).await,
            "2" => tracker.record_choice(pair.right.media_id).await,
            "s" => tracker.skip_current_pair().await,
            "q" => {
                tracker.save_for_later().await?;
                println!("Session saved, continue with `resume`");
                return Ok(());
            }
            other => {
                println!("Unknown choice '{}'", other);
                continue;
            }
        };

        if outcome?.is_some() {
            println!("Ranking saved:");
            for (index, item) in tracker.items(category).iter().enumerate() {
                print_item(index + 1, item);
            }
        }
    }

    Ok(())
}
