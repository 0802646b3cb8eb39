use anyhow::{Context, Result};

use crate::app::App;
use crate::render::{paint, Color};
use crate::OutputFormat;
use nous_incremental_lib::incremental::format_interval;
use nous_incremental_lib::{QueueDecision, QueueMode, ShieldKind};

pub struct QueueOptions {
    pub scope: Option<String>,
    pub mode: QueueMode,
    pub steps: usize,
    pub flashcards: usize,
    /// Persist the reviews made during the run
    pub record: bool,
}

pub async fn run(app: &mut App, options: QueueOptions, format: &OutputFormat, use_color: bool) -> Result<()> {
    let scope = match options.scope.as_deref() {
        Some(query) => Some(app.find_node(query)?.id),
        None => None,
    };

    app.engine
        .enter_queue(scope, options.mode)
        .await
        .context("Failed to open queue")?;

    let mut remaining = options.flashcards;
    let mut steps = Vec::with_capacity(options.steps);
    for step in 0..options.steps {
        let decision = app.engine.get_next_item(remaining).await;
        let mut entry = serde_json::json!({ "step": step, "decision": decision });

        match decision {
            QueueDecision::ShowFlashcard => {
                remaining = remaining.saturating_sub(1);
                if let OutputFormat::Plain = format {
                    println!("{:>3}  flashcard ({} left)", step, remaining);
                }
            }
            QueueDecision::ShowIncrementalItem(id) => {
                let review = app.engine.remove_current_item_from_queue().await?;
                if let Some(review) = &review {
                    entry["interval"] = serde_json::json!(review.interval);
                }
                if let OutputFormat::Plain = format {
                    let next = review
                        .map(|r| format!(" -> next in {}", format_interval(r.interval)))
                        .unwrap_or_default();
                    println!(
                        "{:>3}  {}{}",
                        step,
                        paint(&app.node_title(id), Color::CYAN, use_color),
                        next
                    );
                }
            }
            QueueDecision::NoItemAvailable => {
                if let OutputFormat::Plain = format {
                    println!("{:>3}  no item available", step);
                }
            }
        }
        steps.push(entry);

        if remaining == 0 && decision == QueueDecision::NoItemAvailable {
            break;
        }
    }

    let shield = app.engine.shield(ShieldKind::IncrementalItems).await?;
    app.engine.exit_queue().await.context("Failed to close queue")?;
    if options.record {
        app.save().await?;
    }

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "steps": steps,
                    "shield": shield,
                    "recorded": options.record,
                }))?
            );
        }
        OutputFormat::Plain => {
            if let Some(missed) = shield.in_scope {
                println!(
                    "\nMost urgent item not reached: {} (priority {})",
                    app.node_title(missed.id),
                    missed.priority
                );
            }
            if !options.record {
                println!("\nDry run, reviews not saved (use --record to keep them)");
            }
        }
    }
    Ok(())
}
