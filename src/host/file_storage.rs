//! JSON file persistence for [`MemoryHost`]
//!
//! Directory layout:
//! ```text
//! {data-dir}/
//! ├── nodes.json          # Nodes in document order, with properties and cards
//! ├── store.json          # Durable key-value store
//! └── incremental.toml    # Engine configuration
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::memory::{HostSnapshot, MemoryHost, Node};
use super::{HostError, HostResult};

pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> HostResult<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("nous").join("incremental"))
            .ok_or(HostError::DataDirNotFound)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn nodes_path(&self) -> PathBuf {
        self.base_path.join("nodes.json")
    }

    fn store_path(&self) -> PathBuf {
        self.base_path.join("store.json")
    }

    /// Initialize storage directories
    pub fn init(&self) -> HostResult<()> {
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    /// Load the host. Missing files yield an empty knowledge base.
    pub fn load(&self) -> HostResult<MemoryHost> {
        let nodes: Vec<Node> = read_json_or_default(&self.nodes_path())?;
        let durable: BTreeMap<String, Value> = read_json_or_default(&self.store_path())?;
        log::debug!(
            "Loaded {} node(s) and {} stored value(s) from {}",
            nodes.len(),
            durable.len(),
            self.base_path.display()
        );
        Ok(MemoryHost::from_snapshot(HostSnapshot { nodes, durable }))
    }

    pub fn save(&self, host: &MemoryHost) -> HostResult<()> {
        self.init()?;
        let snapshot = host.snapshot();
        write_json(&self.nodes_path(), &snapshot.nodes)?;
        write_json(&self.store_path(), &snapshot.durable)?;
        Ok(())
    }
}

fn read_json_or_default<T>(path: &Path) -> HostResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write through a temp file so a crash never leaves half a file behind
fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> HostResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
