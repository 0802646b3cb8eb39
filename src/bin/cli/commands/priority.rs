use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub async fn run_priority(app: &mut App, node: &str, value: i64, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let item = app
        .engine
        .set_priority(node.id, value)
        .await
        .with_context(|| format!("Failed to set priority of '{}'", node.title))?;
    let percentile = app.engine.percentile(node.id).await?;
    app.save().await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": item.id,
                    "priority": item.priority,
                    "percentile": percentile,
                }))?
            );
        }
        OutputFormat::Plain => {
            print!("{}: priority {}", node.title, item.priority);
            match percentile {
                Some(p) => println!(" ({}th percentile)", p),
                None => println!(),
            }
        }
    }
    Ok(())
}

pub async fn run_card_priority(app: &mut App, node: &str, value: i64, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let info = app
        .engine
        .set_card_priority(node.id, value)
        .await
        .with_context(|| format!("Failed to set card priority of '{}'", node.title))?;
    app.save().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Plain => println!(
            "{}: card priority {} ({} card(s), {} due)",
            node.title, info.priority, info.card_count, info.due_cards
        ),
    }
    Ok(())
}

pub async fn run_rebuild_cache(app: &mut App, format: &OutputFormat) -> Result<()> {
    let infos = app
        .engine
        .rebuild_priority_cache()
        .await
        .context("Failed to rebuild priority cache")?;
    app.save().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&infos)?),
        OutputFormat::Plain => {
            if infos.is_empty() {
                println!("No nodes with flashcards.");
                return Ok(());
            }
            println!("{:<40} {:>8} {:>10} {:>6} {:>4}", "Node", "Priority", "Source", "Cards", "Due");
            for info in &infos {
                println!(
                    "{:<40} {:>8} {:>10} {:>6} {:>4}",
                    truncate(&app.node_title(info.id), 40),
                    info.priority,
                    format!("{:?}", info.source).to_lowercase(),
                    info.card_count,
                    info.due_cards
                );
            }
            println!("\n{} node(s) cached", infos.len());
        }
    }
    Ok(())
}

pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}\u{2026}", cut)
    }
}
