use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub async fn run_tag(app: &mut App, node: &str, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let item = app
        .engine
        .tag(node.id)
        .await
        .with_context(|| format!("Failed to tag '{}'", node.title))?;
    app.save().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
        OutputFormat::Plain => println!(
            "{} is now incremental (priority {}, {} history entries)",
            node.title,
            item.priority,
            item.history.len()
        ),
    }
    Ok(())
}

pub async fn run_untag(app: &mut App, node: &str, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let removed = app
        .engine
        .untag(node.id)
        .await
        .with_context(|| format!("Failed to untag '{}'", node.title))?;
    app.save().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "id": node.id, "removed": removed }));
        }
        OutputFormat::Plain if removed => println!("{} is no longer incremental", node.title),
        OutputFormat::Plain => println!("{} was not incremental", node.title),
    }
    Ok(())
}

pub async fn run_dismiss(app: &mut App, node: &str, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let record = app
        .engine
        .dismiss(node.id)
        .await
        .with_context(|| format!("Failed to dismiss '{}'", node.title))?;
    app.save().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Plain => println!(
            "Dismissed {} ({} history entries archived)",
            node.title,
            record.history.len()
        ),
    }
    Ok(())
}
