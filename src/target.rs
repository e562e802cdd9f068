use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Opaque handle to a scene target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetHandle(pub u32);

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque handle to a scene entity (root or descendant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

/// A target-marker component found on an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMarker {
    /// Stable identifier authored on the marker
    pub id: String,
    pub handle: TargetHandle,
    /// Name of the owning entity, for diagnostics
    pub owner: String,
}

/// Scene scan surface needed to build the target registry
pub trait Scene {
    fn root_entities(&self) -> Vec<EntityId>;

    /// All markers on `entity` and its descendants, including inactive ones
    fn find_target_markers(&self, entity: EntityId) -> Vec<TargetMarker>;
}

/// Two markers claimed the same identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTarget {
    pub id: String,
    pub kept_owner: String,
    pub dropped_owner: String,
}

#[derive(Debug, Clone)]
struct Entry {
    handle: TargetHandle,
    owner: String,
}

/// Identifier to target handle map, rebuilt on every compile
#[derive(Debug, Default, Clone)]
pub struct TargetRegistry {
    entries: HashMap<String, Entry>,
    ids_by_handle: HashMap<TargetHandle, String>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry by scanning every scene root.
    ///
    /// The first marker seen for an identifier wins; later ones are reported.
    pub fn compile(&mut self, scene: &dyn Scene) -> Vec<DuplicateTarget> {
        self.entries.clear();
        self.ids_by_handle.clear();

        let mut duplicates = Vec::new();
        for root in scene.root_entities() {
            for marker in scene.find_target_markers(root) {
                if let Some(existing) = self.entries.get(&marker.id) {
                    warn!(target: "compile",
                        "Duplicate target id '{}' on '{}' (already registered by '{}')",
                        marker.id, marker.owner, existing.owner
                    );
                    duplicates.push(DuplicateTarget {
                        id: marker.id,
                        kept_owner: existing.owner.clone(),
                        dropped_owner: marker.owner,
                    });
                    continue;
                }

                self.ids_by_handle.insert(marker.handle, marker.id.clone());
                self.entries.insert(
                    marker.id,
                    Entry {
                        handle: marker.handle,
                        owner: marker.owner,
                    },
                );
            }
        }

        debug!(target: "compile", "Target registry holds {} target(s)", self.entries.len());
        duplicates
    }

    pub fn resolve(&self, id: &str) -> Option<TargetHandle> {
        self.entries.get(id).map(|entry| entry.handle)
    }

    pub fn id_of(&self, handle: TargetHandle) -> Option<&str> {
        self.ids_by_handle.get(&handle).map(String::as_str)
    }

    pub fn owner_of(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|entry| entry.owner.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
