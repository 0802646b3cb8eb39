use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;
use nous_incremental_lib::incremental::{format_interval, RescheduleOrigin};

pub async fn run_review(app: &mut App, node: &str, lookback: bool, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let result = app
        .engine
        .record_review(node.id, lookback)
        .await
        .with_context(|| format!("Failed to review '{}'", node.title))?;
    app.save().await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": node.id,
                    "interval": result.interval,
                    "nextRepDate": result.next_rep_date.timestamp_millis(),
                    "history": result.history,
                }))?
            );
        }
        OutputFormat::Plain => println!(
            "Reviewed {}: next in {} ({})",
            node.title,
            format_interval(result.interval),
            result.next_rep_date.format("%Y-%m-%d")
        ),
    }
    Ok(())
}

pub async fn run_reschedule(
    app: &mut App,
    node: &str,
    days: u32,
    origin: RescheduleOrigin,
    format: &OutputFormat,
) -> Result<()> {
    let node = app.find_node(node)?;
    let item = app
        .engine
        .reschedule(node.id, days, origin)
        .await
        .with_context(|| format!("Failed to reschedule '{}'", node.title))?;
    app.save().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
        OutputFormat::Plain => println!(
            "Rescheduled {} to {}",
            node.title,
            item.next_rep_date.format("%Y-%m-%d")
        ),
    }
    Ok(())
}
