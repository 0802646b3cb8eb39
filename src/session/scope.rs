//! Scopes: the set of nodes a queue session selects from and ranks within

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::host::{HostError, KnowledgeBase, PROP_REVIEW_DOCUMENT};

/// An ordered, deduplicated set of node ids, or the whole knowledge base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    anchor: Option<Uuid>,
    ids: Vec<Uuid>,
    positions: HashMap<Uuid, usize>,
}

impl Scope {
    /// The unrestricted scope
    pub fn knowledge_base() -> Self {
        Self {
            anchor: None,
            ids: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build a scope from ids in order, dropping repeats
    pub fn from_ids(anchor: Uuid, ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut scope = Self {
            anchor: Some(anchor),
            ids: Vec::new(),
            positions: HashMap::new(),
        };
        scope.push(anchor);
        for id in ids {
            scope.push(id);
        }
        scope
    }

    fn push(&mut self, id: Uuid) {
        if !self.positions.contains_key(&id) {
            self.positions.insert(id, self.ids.len());
            self.ids.push(id);
        }
    }

    pub fn anchor(&self) -> Option<Uuid> {
        self.anchor
    }

    pub fn is_knowledge_base(&self) -> bool {
        self.anchor.is_none()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.is_knowledge_base() || self.positions.contains_key(&id)
    }

    /// Position in scope order. Always `None` for the knowledge base.
    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Skip relations of a node that vanished while expanding
async fn related(
    id: Uuid,
    relation: &str,
    lookup: impl std::future::Future<Output = std::result::Result<Vec<Uuid>, HostError>>,
) -> Result<Vec<Uuid>> {
    match lookup.await {
        Ok(ids) => Ok(ids),
        Err(HostError::NodeNotFound(_)) => {
            log::debug!("Scope: {} of {} unavailable", relation, id);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Full scope of a node: itself, its descendants, portal members, folder
/// queue members, sources and referencing nodes, in that order
pub async fn expand_scope(kb: &dyn KnowledgeBase, anchor: Uuid) -> Result<Scope> {
    let descendants = kb.descendants_of(anchor).await?;
    let portal = related(anchor, "portal members", kb.portal_members_of(anchor)).await?;
    let folder = related(anchor, "folder queue", kb.folder_queue_of(anchor)).await?;
    let sources = related(anchor, "sources", kb.sources_of(anchor)).await?;
    let referencing = related(anchor, "backlinks", kb.referencing_of(anchor)).await?;

    let scope = Scope::from_ids(
        anchor,
        descendants
            .into_iter()
            .chain(portal)
            .chain(folder)
            .chain(sources)
            .chain(referencing),
    );
    log::debug!("Scope: {} expands to {} node(s)", anchor, scope.len());
    Ok(scope)
}

/// Cheap scope of a node: itself and its descendants
pub async fn descendants_scope(kb: &dyn KnowledgeBase, anchor: Uuid) -> Result<Scope> {
    let descendants = kb.descendants_of(anchor).await?;
    Ok(Scope::from_ids(anchor, descendants))
}

/// Marker stored on generated review documents
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewDocument {
    original_scope: Option<Uuid>,
}

/// Selection and priority scopes for a queue session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScopes {
    /// Nodes the queue picks from
    pub selection: Scope,
    /// Nodes percentiles are computed against
    pub priority: Scope,
}

/// Resolve both scopes for the node being browsed
///
/// Items are selected from the browsed node. When that node is a generated
/// review document, priorities are ranked within the scope it was generated
/// from instead.
pub async fn resolve_scopes(kb: &dyn KnowledgeBase, browsing: Option<Uuid>) -> Result<ResolvedScopes> {
    let Some(anchor) = browsing else {
        return Ok(ResolvedScopes {
            selection: Scope::knowledge_base(),
            priority: Scope::knowledge_base(),
        });
    };

    let selection = expand_scope(kb, anchor).await?;

    let original = match kb.get_property(anchor, PROP_REVIEW_DOCUMENT).await? {
        Some(value) => match serde_json::from_value::<ReviewDocument>(value) {
            Ok(doc) => doc.original_scope,
            Err(e) => {
                log::warn!("Scope: unreadable review document marker on {}: {}", anchor, e);
                None
            }
        },
        None => None,
    };

    let priority = match original {
        Some(original) if original != anchor => match expand_scope(kb, original).await {
            Ok(scope) => scope,
            Err(crate::error::EngineError::MissingEntity(_)) => {
                log::info!("Scope: original scope {} is gone, ranking within {}", original, anchor);
                selection.clone()
            }
            Err(e) => return Err(e),
        },
        _ => selection.clone(),
    };

    Ok(ResolvedScopes { selection, priority })
}
