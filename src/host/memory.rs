//! In-process host
//!
//! Keeps the whole node tree, the flashcards and both key-value stores in
//! memory. Backs the CLI (through [`super::FileStorage`] snapshots) and every
//! test in the crate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{CardDue, FlashcardSource, HostError, HostResult, KnowledgeBase, StoreKind};

/// A notebook node with everything the engine may ask about it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub children: Vec<Uuid>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub portal_members: Vec<Uuid>,
    #[serde(default)]
    pub folder_queue: Vec<Uuid>,
    #[serde(default)]
    pub sources: Vec<Uuid>,
    /// Nodes this node links to
    #[serde(default)]
    pub references: Vec<Uuid>,
    #[serde(default)]
    pub cards: Vec<CardDue>,
}

impl Node {
    pub fn new(title: String, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            parent_id,
            children: Vec::new(),
            tags: BTreeSet::new(),
            properties: BTreeMap::new(),
            portal_members: Vec::new(),
            folder_queue: Vec::new(),
            sources: Vec::new(),
            references: Vec::new(),
            cards: Vec::new(),
        }
    }
}

/// Serializable image of a [`MemoryHost`]. The session store is not part
/// of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    /// Nodes in document order
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub durable: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct HostState {
    nodes: HashMap<Uuid, Node>,
    /// Creation order of root nodes
    roots: Vec<Uuid>,
    session: HashMap<String, Value>,
    durable: BTreeMap<String, Value>,
    durable_writes: usize,
}

impl HostState {
    fn node(&self, id: Uuid) -> HostResult<&Node> {
        self.nodes.get(&id).ok_or(HostError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: Uuid) -> HostResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(HostError::NodeNotFound(id))
    }

    /// Pre-order walk below `id`, excluding `id` itself
    fn descendants(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut stack: Vec<Uuid> = match self.nodes.get(&id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Every node in document order
    fn document_order(&self) -> Vec<Uuid> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            if self.nodes.contains_key(root) {
                out.push(*root);
                out.extend(self.descendants(*root));
            }
        }
        out
    }
}

/// Thread-safe in-memory implementation of both host traits
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: HostSnapshot) -> Self {
        let mut state = HostState::default();
        for node in snapshot.nodes {
            let parent_known = node
                .parent_id
                .map_or(false, |p| state.nodes.contains_key(&p));
            if !parent_known {
                state.roots.push(node.id);
            }
            state.nodes.insert(node.id, node);
        }
        state.durable = snapshot.durable;
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let state = self.state.lock().unwrap();
        let nodes = state
            .document_order()
            .into_iter()
            .filter_map(|id| state.nodes.get(&id).cloned())
            .collect();
        HostSnapshot {
            nodes,
            durable: state.durable.clone(),
        }
    }

    // ===== Tree building =====

    /// Append a node as the last child of `parent` (or as a new root)
    pub fn add_node(&self, title: &str, parent: Option<Uuid>) -> HostResult<Uuid> {
        let mut state = self.state.lock().unwrap();
        let node = Node::new(title.to_string(), parent);
        let id = node.id;
        match parent {
            Some(parent_id) => state.node_mut(parent_id)?.children.push(id),
            None => state.roots.push(id),
        }
        state.nodes.insert(id, node);
        Ok(id)
    }

    /// Remove a node and its whole subtree
    pub fn remove_node(&self, id: Uuid) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        let parent = state.node(id)?.parent_id;
        let mut doomed = state.descendants(id);
        doomed.push(id);
        for gone in &doomed {
            state.nodes.remove(gone);
        }
        match parent {
            Some(parent_id) => {
                if let Ok(parent) = state.node_mut(parent_id) {
                    parent.children.retain(|c| *c != id);
                }
            }
            None => state.roots.retain(|r| *r != id),
        }
        Ok(())
    }

    pub fn node(&self, id: Uuid) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(&id).cloned()
    }

    /// All nodes in document order
    pub fn nodes(&self) -> Vec<Node> {
        let state = self.state.lock().unwrap();
        state
            .document_order()
            .into_iter()
            .filter_map(|id| state.nodes.get(&id).cloned())
            .collect()
    }

    pub fn add_card(&self, node: Uuid, due: DateTime<Utc>) -> HostResult<Uuid> {
        let mut state = self.state.lock().unwrap();
        let card_id = Uuid::new_v4();
        state.node_mut(node)?.cards.push(CardDue { card_id, due });
        Ok(card_id)
    }

    pub fn add_portal_member(&self, document: Uuid, member: Uuid) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.node(member)?;
        state.node_mut(document)?.portal_members.push(member);
        Ok(())
    }

    pub fn add_to_folder_queue(&self, folder: Uuid, member: Uuid) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.node(member)?;
        state.node_mut(folder)?.folder_queue.push(member);
        Ok(())
    }

    pub fn add_source(&self, node: Uuid, source: Uuid) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.node(source)?;
        state.node_mut(node)?.sources.push(source);
        Ok(())
    }

    /// Record that `from` links to `to`
    pub fn add_reference(&self, from: Uuid, to: Uuid) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.node(to)?;
        state.node_mut(from)?.references.push(to);
        Ok(())
    }

    /// Number of writes made to the durable store so far
    pub fn durable_write_count(&self) -> usize {
        self.state.lock().unwrap().durable_writes
    }
}

#[async_trait]
impl KnowledgeBase for MemoryHost {
    async fn exists(&self, id: Uuid) -> HostResult<bool> {
        Ok(self.state.lock().unwrap().nodes.contains_key(&id))
    }

    async fn get_property(&self, id: Uuid, key: &str) -> HostResult<Option<Value>> {
        let state = self.state.lock().unwrap();
        Ok(state.node(id)?.properties.get(key).cloned())
    }

    async fn set_property(&self, id: Uuid, key: &str, value: Option<Value>) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        let node = state.node_mut(id)?;
        match value {
            Some(v) => {
                node.properties.insert(key.to_string(), v);
            }
            None => {
                node.properties.remove(key);
            }
        }
        Ok(())
    }

    async fn parent_of(&self, id: Uuid) -> HostResult<Option<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.node(id)?.parent_id)
    }

    async fn descendants_of(&self, id: Uuid) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        state.node(id)?;
        Ok(state.descendants(id))
    }

    async fn portal_members_of(&self, id: Uuid) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.node(id)?.portal_members.clone())
    }

    async fn folder_queue_of(&self, id: Uuid) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.node(id)?.folder_queue.clone())
    }

    async fn sources_of(&self, id: Uuid) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.node(id)?.sources.clone())
    }

    async fn referencing_of(&self, id: Uuid) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        state.node(id)?;
        Ok(state
            .document_order()
            .into_iter()
            .filter(|other| {
                state
                    .nodes
                    .get(other)
                    .map_or(false, |n| n.references.contains(&id))
            })
            .collect())
    }

    async fn add_tag(&self, id: Uuid, marker: &str) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.node_mut(id)?.tags.insert(marker.to_string());
        Ok(())
    }

    async fn remove_tag(&self, id: Uuid, marker: &str) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.node_mut(id)?.tags.remove(marker);
        Ok(())
    }

    async fn tagged_with(&self, marker: &str) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .document_order()
            .into_iter()
            .filter(|id| state.nodes.get(id).map_or(false, |n| n.tags.contains(marker)))
            .collect())
    }

    async fn get_value(&self, store: StoreKind, key: &str) -> HostResult<Option<Value>> {
        let state = self.state.lock().unwrap();
        Ok(match store {
            StoreKind::Session => state.session.get(key).cloned(),
            StoreKind::Durable => state.durable.get(key).cloned(),
        })
    }

    async fn set_value(&self, store: StoreKind, key: &str, value: Option<Value>) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        match (store, value) {
            (StoreKind::Session, Some(v)) => {
                state.session.insert(key.to_string(), v);
            }
            (StoreKind::Session, None) => {
                state.session.remove(key);
            }
            (StoreKind::Durable, Some(v)) => {
                state.durable.insert(key.to_string(), v);
                state.durable_writes += 1;
            }
            (StoreKind::Durable, None) => {
                state.durable.remove(key);
                state.durable_writes += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FlashcardSource for MemoryHost {
    async fn cards_of(&self, id: Uuid) -> HostResult<Vec<CardDue>> {
        let state = self.state.lock().unwrap();
        Ok(state.node(id)?.cards.clone())
    }

    async fn nodes_with_cards(&self) -> HostResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .document_order()
            .into_iter()
            .filter(|id| state.nodes.get(id).map_or(false, |n| !n.cards.is_empty()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tree() -> (MemoryHost, Uuid, Uuid, Uuid, Uuid) {
        let host = MemoryHost::new();
        let root = host.add_node("Root", None).unwrap();
        let a = host.add_node("A", Some(root)).unwrap();
        let a1 = host.add_node("A1", Some(a)).unwrap();
        let b = host.add_node("B", Some(root)).unwrap();
        (host, root, a, a1, b)
    }

    #[tokio::test]
    async fn test_descendants_are_in_document_order() {
        let (host, root, a, a1, b) = sample_tree();
        assert_eq!(host.descendants_of(root).await.unwrap(), vec![a, a1, b]);
        assert_eq!(host.parent_of(a1).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_missing_node_is_an_error() {
        let host = MemoryHost::new();
        let result = host.parent_of(Uuid::new_v4()).await;
        assert!(matches!(result, Err(HostError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_referencing_and_tags() {
        let (host, root, a, a1, b) = sample_tree();
        host.add_reference(b, a1).unwrap();
        host.add_tag(a, "incremental").await.unwrap();
        host.add_tag(root, "incremental").await.unwrap();

        assert_eq!(host.referencing_of(a1).await.unwrap(), vec![b]);
        assert_eq!(host.tagged_with("incremental").await.unwrap(), vec![root, a]);
    }

    #[tokio::test]
    async fn test_remove_node_drops_subtree() {
        let (host, root, a, a1, b) = sample_tree();
        host.remove_node(a).unwrap();
        assert!(!host.exists(a1).await.unwrap());
        assert_eq!(host.descendants_of(root).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_snapshot_preserves_tree_and_durable_store() {
        let (host, root, a, a1, b) = sample_tree();
        host.set_property(a1, "k", Some(json!(1))).await.unwrap();
        host.set_value(StoreKind::Durable, "cache", Some(json!([1, 2])))
            .await
            .unwrap();
        host.set_value(StoreKind::Session, "temp", Some(json!(true)))
            .await
            .unwrap();

        let restored = MemoryHost::from_snapshot(host.snapshot());
        assert_eq!(restored.descendants_of(root).await.unwrap(), vec![a, a1, b]);
        assert_eq!(restored.get_property(a1, "k").await.unwrap(), Some(json!(1)));
        assert_eq!(
            restored.get_value(StoreKind::Durable, "cache").await.unwrap(),
            Some(json!([1, 2]))
        );
        assert_eq!(restored.get_value(StoreKind::Session, "temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_durable_writes_are_counted() {
        let host = MemoryHost::new();
        host.set_value(StoreKind::Durable, "a", Some(json!(1))).await.unwrap();
        host.set_value(StoreKind::Session, "b", Some(json!(1))).await.unwrap();
        assert_eq!(host.durable_write_count(), 1);
    }
}
