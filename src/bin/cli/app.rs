use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use nous_incremental_lib::config::CONFIG_FILE_NAME;
use nous_incremental_lib::host::{FileStorage, MemoryHost, Node};
use nous_incremental_lib::{EngineConfig, IncrementalEngine, SystemClock};

/// Shared application state for CLI commands
pub struct App {
    pub storage: FileStorage,
    pub host: Arc<MemoryHost>,
    pub engine: IncrementalEngine,
}

impl App {
    /// Load the knowledge base and engine config
    pub fn new(data_dir: Option<&Path>, config_path: Option<&Path>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => FileStorage::default_data_dir().context("Failed to get data directory")?,
        };
        let storage = FileStorage::new(data_dir);
        storage.init().context("Failed to initialize data directory")?;

        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| storage.base_path().join(CONFIG_FILE_NAME));
        let config = EngineConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        let host = Arc::new(storage.load().context("Failed to load knowledge base")?);
        let engine = IncrementalEngine::new(
            host.clone(),
            host.clone(),
            Arc::new(SystemClock),
            config,
        );

        Ok(Self {
            storage,
            host,
            engine,
        })
    }

    /// Find a node by id, exact title or title prefix (case-insensitive)
    pub fn find_node(&self, query: &str) -> Result<Node> {
        if let Ok(id) = Uuid::parse_str(query) {
            return self
                .host
                .node(id)
                .context(format!("No node with id {}", id));
        }

        let nodes = self.host.nodes();
        let query_lower = query.to_lowercase();

        // Exact match first
        if let Some(node) = nodes.iter().find(|n| n.title.to_lowercase() == query_lower) {
            return Ok(node.clone());
        }

        // Prefix match
        let matches: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.title.to_lowercase().starts_with(&query_lower))
            .collect();

        match matches.len() {
            0 => bail!("No node matching '{}'", query),
            1 => Ok(matches[0].clone()),
            _ => bail!(
                "Ambiguous node title '{}'. Matches:\n{}",
                query,
                matches
                    .iter()
                    .map(|n| format!("  - {} ({})", n.title, n.id))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        }
    }

    pub fn node_title(&self, id: Uuid) -> String {
        self.host
            .node(id)
            .map(|n| n.title)
            .unwrap_or_else(|| id.to_string())
    }

    /// Flush pending priority writes and persist the knowledge base
    pub async fn save(&self) -> Result<()> {
        self.engine
            .flush_priority_cache()
            .await
            .context("Failed to flush priority cache")?;
        self.storage
            .save(&self.host)
            .context("Failed to save knowledge base")
    }

    pub async fn close(&mut self) -> Result<()> {
        self.engine.close().await.context("Failed to close engine")
    }
}
