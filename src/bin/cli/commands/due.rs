use anyhow::Result;
use chrono::Utc;

use crate::app::App;
use crate::commands::priority::truncate;
use crate::render::{due_label, priority_label};
use crate::OutputFormat;

pub async fn run(app: &App, scope: Option<&str>, format: &OutputFormat, use_color: bool) -> Result<()> {
    let scope = match scope {
        Some(query) => Some(app.find_node(query)?.id),
        None => None,
    };
    let due = app.engine.due_items(scope).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&due)?),
        OutputFormat::Plain => {
            if due.is_empty() {
                println!("Nothing due.");
                return Ok(());
            }
            let now = Utc::now();
            for item in &due {
                println!(
                    "{}  {:<40} {}",
                    priority_label(item.priority, use_color),
                    truncate(&app.node_title(item.id), 40),
                    due_label(item.next_rep_date, now, use_color)
                );
            }
            println!("\n{} item(s) due", due.len());
        }
    }
    Ok(())
}
