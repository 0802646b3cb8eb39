use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::app::App;
use crate::render::{paint, priority_label, Color};
use crate::OutputFormat;
use nous_incremental_lib::host::Node;

pub fn run_add(app: &mut App, title: &str, parent: Option<&str>, format: &OutputFormat) -> Result<()> {
    let parent_id = match parent {
        Some(query) => Some(app.find_node(query)?.id),
        None => None,
    };
    let id = app
        .host
        .add_node(title, parent_id)
        .context("Failed to create node")?;
    app.storage.save(&app.host).context("Failed to save knowledge base")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "id": id, "title": title }))?);
        }
        OutputFormat::Plain => println!("Created {} ({})", title, id),
    }
    Ok(())
}

pub fn run_add_card(app: &mut App, node: &str, due_in_days: i64, format: &OutputFormat) -> Result<()> {
    let node = app.find_node(node)?;
    let due = Utc::now() + Duration::days(due_in_days);
    let card_id = app.host.add_card(node.id, due).context("Failed to add card")?;
    app.storage.save(&app.host).context("Failed to save knowledge base")?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "cardId": card_id,
                    "node": node.id,
                    "due": due.timestamp_millis(),
                }))?
            );
        }
        OutputFormat::Plain => println!("Added card to {} (due {})", node.title, due.format("%Y-%m-%d")),
    }
    Ok(())
}

pub async fn run_tree(app: &App, use_color: bool) -> Result<()> {
    let nodes = app.host.nodes();
    if nodes.is_empty() {
        println!("No nodes yet. Create one with `nous-inc add <title>`.");
        return Ok(());
    }

    let roots: Vec<&Node> = nodes.iter().filter(|n| n.parent_id.is_none()).collect();
    let total = roots.len();
    for (idx, root) in roots.iter().enumerate() {
        print_node(app, root, &nodes, "", idx + 1 == total, use_color).await?;
    }
    Ok(())
}

async fn print_node(
    app: &App,
    node: &Node,
    all_nodes: &[Node],
    prefix: &str,
    is_last: bool,
    use_color: bool,
) -> Result<()> {
    let connector = if is_last { "\u{2514}\u{2500}\u{2500} " } else { "\u{251c}\u{2500}\u{2500} " };
    let mut line = format!("{}{}{}", prefix, connector, node.title);

    if let Some(item) = app.engine.item(node.id).await? {
        line.push_str(&format!(
            " {} {}",
            paint("[inc]", Color::CYAN, use_color),
            priority_label(item.priority, use_color)
        ));
    }
    if !node.cards.is_empty() {
        line.push_str(&format!(" ({} card(s))", node.cards.len()));
    }
    println!("{}", line);

    let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "\u{2502}   " });
    let children: Vec<&Node> = node
        .children
        .iter()
        .filter_map(|id: &Uuid| all_nodes.iter().find(|n| n.id == *id))
        .collect();
    let total = children.len();
    for (idx, child) in children.into_iter().enumerate() {
        Box::pin(print_node(app, child, all_nodes, &child_prefix, idx + 1 == total, use_color)).await?;
    }
    Ok(())
}
