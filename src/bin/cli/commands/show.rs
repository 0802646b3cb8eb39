use anyhow::Result;
use chrono::Utc;

use crate::app::App;
use crate::render::{due_label, history_line, paint, priority_label, Color};
use crate::OutputFormat;

pub async fn run(app: &App, node: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let node = app.find_node(node)?;
    let item = app.engine.item(node.id).await?;
    let card_priority = if node.cards.is_empty() {
        None
    } else {
        Some(app.engine.card_priority(node.id).await?)
    };

    let Some(item) = item else {
        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "id": node.id,
                        "title": node.title,
                        "incremental": false,
                        "cardPriority": card_priority,
                    }))?
                );
            }
            OutputFormat::Plain => {
                println!("{} is not an incremental item", node.title);
                if let Some(info) = card_priority {
                    println!("Card priority: {} ({:?})", info.priority, info.source);
                }
            }
        }
        return Ok(());
    };

    let percentile = app.engine.percentile(node.id).await?;
    let fine = app.engine.fine_percentile(node.id).await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": node.id,
                    "title": node.title,
                    "incremental": true,
                    "item": item,
                    "percentile": percentile,
                    "finePercentile": fine,
                    "cardPriority": card_priority,
                }))?
            );
        }
        OutputFormat::Plain => {
            println!("{}", paint(&node.title, Color::BOLD, use_color));
            println!("  Priority:   {}", priority_label(item.priority, use_color));
            if let Some(fine) = fine {
                println!("  Percentile: {:.1}", fine);
            }
            println!(
                "  Next:       {} ({})",
                item.next_rep_date.format("%Y-%m-%d %H:%M"),
                due_label(item.next_rep_date, Utc::now(), use_color)
            );
            if let Some(info) = card_priority {
                println!("  Cards:      {} ({} due), priority {}", info.card_count, info.due_cards, info.priority);
            }
            if item.history.is_empty() {
                println!("  No history yet");
            } else {
                println!("  History:");
                for entry in &item.history {
                    println!("    {}", history_line(entry));
                }
            }
        }
    }
    Ok(())
}
