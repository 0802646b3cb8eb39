mod app;
mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use nous_incremental_lib::host::FlashcardSource;
use nous_incremental_lib::incremental::RescheduleOrigin;
use nous_incremental_lib::QueueMode;

#[derive(Parser)]
#[command(name = "nous-inc", about = "Incremental reading for Nous notebooks", version)]
struct Cli {
    /// Data directory (default: local data dir/nous/incremental)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Engine config file (default: incremental.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ModeArg {
    Srs,
    PracticeAll,
    InOrder,
}

impl From<ModeArg> for QueueMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Srs => QueueMode::Srs,
            ModeArg::PracticeAll => QueueMode::PracticeAll,
            ModeArg::InOrder => QueueMode::InOrder,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a node
    Add {
        /// Node title
        title: String,
        /// Parent node (id or title prefix)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Add a flashcard to a node
    AddCard {
        /// Node (id or title prefix)
        node: String,
        /// Days until the card is due (negative for overdue)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        due_in_days: i64,
    },

    /// Show the node tree with priorities
    Tree,

    /// Make a node an incremental item
    Tag {
        node: String,
    },

    /// Stop scheduling a node and drop its history
    Untag {
        node: String,
    },

    /// Set the priority of an incremental item (0 is most urgent)
    Priority {
        node: String,
        #[arg(allow_hyphen_values = true)]
        value: i64,
    },

    /// Set a manual card priority on a node and its subtree
    CardPriority {
        node: String,
        #[arg(allow_hyphen_values = true)]
        value: i64,
    },

    /// Record a repetition outside the queue
    Review {
        node: String,
        /// Never move the next date earlier
        #[arg(long)]
        lookback: bool,
    },

    /// Push the next repetition out by a number of days
    Reschedule {
        node: String,
        days: u32,
    },

    /// Stop scheduling a node and archive its history
    Dismiss {
        node: String,
    },

    /// Show an incremental item
    Show {
        node: String,
    },

    /// List due incremental items, most urgent first
    Due {
        /// Restrict to a node's scope
        #[arg(long)]
        scope: Option<String>,
    },

    /// Simulate a queue session interleaving items with flashcards
    Queue {
        /// Node to open the queue on
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, value_enum, default_value = "srs")]
        mode: ModeArg,
        /// Number of queue steps
        #[arg(long, default_value = "20")]
        steps: usize,
        /// Flashcards in the simulated queue (default: due cards in scope)
        #[arg(long)]
        flashcards: Option<usize>,
        /// Save the reviews made during the session
        #[arg(long)]
        record: bool,
    },

    /// Recompute the card priority cache
    RebuildCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let mut app = app::App::new(cli.data_dir.as_deref(), cli.config.as_deref())?;

    match cli.command {
        Command::Add { title, parent } => {
            commands::nodes::run_add(&mut app, &title, parent.as_deref(), &cli.format)?;
        }
        Command::AddCard { node, due_in_days } => {
            commands::nodes::run_add_card(&mut app, &node, due_in_days, &cli.format)?;
        }
        Command::Tree => {
            commands::nodes::run_tree(&app, use_color).await?;
        }
        Command::Tag { node } => {
            commands::tag::run_tag(&mut app, &node, &cli.format).await?;
        }
        Command::Untag { node } => {
            commands::tag::run_untag(&mut app, &node, &cli.format).await?;
        }
        Command::Priority { node, value } => {
            commands::priority::run_priority(&mut app, &node, value, &cli.format).await?;
        }
        Command::CardPriority { node, value } => {
            commands::priority::run_card_priority(&mut app, &node, value, &cli.format).await?;
        }
        Command::Review { node, lookback } => {
            commands::review::run_review(&mut app, &node, lookback, &cli.format).await?;
        }
        Command::Reschedule { node, days } => {
            commands::review::run_reschedule(
                &mut app,
                &node,
                days,
                RescheduleOrigin::Editor,
                &cli.format,
            )
            .await?;
        }
        Command::Dismiss { node } => {
            commands::tag::run_dismiss(&mut app, &node, &cli.format).await?;
        }
        Command::Show { node } => {
            commands::show::run(&app, &node, &cli.format, use_color).await?;
        }
        Command::Due { scope } => {
            commands::due::run(&app, scope.as_deref(), &cli.format, use_color).await?;
        }
        Command::Queue { scope, mode, steps, flashcards, record } => {
            let remaining = match flashcards {
                Some(count) => count,
                None => due_card_count(&app).await?,
            };
            commands::queue::run(
                &mut app,
                commands::queue::QueueOptions {
                    scope,
                    mode: mode.into(),
                    steps,
                    flashcards: remaining,
                    record,
                },
                &cli.format,
                use_color,
            )
            .await?;
        }
        Command::RebuildCache => {
            commands::priority::run_rebuild_cache(&mut app, &cli.format).await?;
        }
    }

    app.close().await?;
    Ok(())
}

/// Due flashcards across the whole base
async fn due_card_count(app: &app::App) -> anyhow::Result<usize> {
    let now = chrono::Utc::now();
    let mut count = 0;
    for id in app.host.nodes_with_cards().await? {
        count += app
            .host
            .cards_of(id)
            .await?
            .iter()
            .filter(|c| c.is_due(now))
            .count();
    }
    Ok(count)
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
