use super::metadata::{BranchMetaMap, BranchState, CachedMeta};
use super::store::MetadataStore;
use crate::errors::{GraftError, Result};
use crate::git::RevisionSource;
use crate::utils::atomic_file;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Snapshot {
    trunk: String,
    fingerprint: String,
    branches: BranchMetaMap,
}

/// Builds the branch map at command start and writes it back at command end
pub struct CacheLoader {
    snapshot_path: Option<PathBuf>,
    loaded_hash: Option<String>,
}

impl CacheLoader {
    /// `snapshot_path` of `None` disables the on-disk snapshot
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        Self {
            snapshot_path,
            loaded_hash: None,
        }
    }

    /// Load the map, reusing the snapshot when nothing it was built from changed
    pub fn load(
        &mut self,
        trunk: &str,
        repo: &dyn RevisionSource,
        store: &dyn MetadataStore,
    ) -> Result<BranchMetaMap> {
        if let Some(branches) = self.read_snapshot(trunk, store)? {
            debug!("Reusing cached branch map ({} branches)", branches.len());
            self.loaded_hash = Some(structural_hash(&branches)?);
            return Ok(branches);
        }
        self.rebuild(trunk, repo, store)
    }

    /// Derive the map from the store and live revision queries
    pub fn rebuild(
        &mut self,
        trunk: &str,
        repo: &dyn RevisionSource,
        store: &dyn MetadataStore,
    ) -> Result<BranchMetaMap> {
        let branch_names = repo.branch_names()?;
        if !branch_names.iter().any(|name| name == trunk) {
            return Err(GraftError::no_branch(trunk));
        }
        let existing: BTreeSet<&str> = branch_names.iter().map(String::as_str).collect();

        let mut records = store.list_all()?;
        let stale: Vec<String> = records
            .keys()
            .filter(|name| !existing.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            debug!("Dropping metadata for deleted branch {}", name);
            store.delete(&name)?;
            records.remove(&name);
        }

        let mut branches = BranchMetaMap::new();
        for name in &branch_names {
            let revision = repo.sha(name)?;
            let record = records.remove(name).unwrap_or_default();

            let state = if name == trunk {
                BranchState::Trunk
            } else {
                match record.parent_link() {
                    Some(parent)
                        if existing.contains(parent.parent_branch_name.as_str())
                            && parent.parent_branch_name != *name =>
                    {
                        BranchState::InvalidParent { parent }
                    }
                    _ => BranchState::BadParentName,
                }
            };

            let mut meta = CachedMeta::new(state, revision);
            if name != trunk {
                meta.pr_info = record.pr_info;
            }
            branches.insert(name.clone(), meta);
        }

        let edges: Vec<(String, String)> = branches
            .iter()
            .filter_map(|(name, meta)| {
                meta.state
                    .parent_name()
                    .map(|parent| (parent.to_string(), name.clone()))
            })
            .collect();
        for (parent, child) in edges {
            if let Some(parent_meta) = branches.get_mut(&parent) {
                parent_meta.add_child(&child);
            }
        }

        // Parent-first from trunk; anything unreachable stays INVALID_PARENT
        let mut queue = VecDeque::from([trunk.to_string()]);
        while let Some(parent) = queue.pop_front() {
            let Some(parent_meta) = branches.get(&parent) else {
                continue;
            };
            let parent_revision = parent_meta.branch_revision.clone();
            for child in parent_meta.children.clone() {
                let Some(child_meta) = branches.get_mut(&child) else {
                    continue;
                };
                validate_or_fix_parent_revision(repo, store, &child, child_meta, &parent_revision)?;
                if child_meta.state.is_valid() {
                    queue.push_back(child);
                }
            }
        }

        debug!("Rebuilt branch map ({} branches)", branches.len());
        self.loaded_hash = None;
        Ok(branches)
    }

    /// Write the snapshot unless the map is structurally unchanged since load.
    /// Returns whether anything was written.
    pub fn persist(
        &mut self,
        trunk: &str,
        branches: &BranchMetaMap,
        store: &dyn MetadataStore,
    ) -> Result<bool> {
        let hash = structural_hash(branches)?;
        if self.loaded_hash.as_deref() == Some(hash.as_str()) {
            debug!("Branch map unchanged, skipping persist");
            return Ok(false);
        }

        if let (Some(path), Some(fingerprint)) = (&self.snapshot_path, store.fingerprint()?) {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let snapshot = Snapshot {
                trunk: trunk.to_string(),
                fingerprint,
                branches: branches.clone(),
            };
            atomic_file::write_json(path, &snapshot)?;
            debug!("Persisted branch map to {:?}", path);
        }

        self.loaded_hash = Some(hash);
        Ok(true)
    }

    /// Forget the snapshot so the next load rebuilds from scratch
    pub fn invalidate(&mut self) -> Result<()> {
        self.loaded_hash = None;
        if let Some(path) = &self.snapshot_path {
            if path.exists() {
                std::fs::remove_file(path)?;
                debug!("Removed cached branch map");
            }
        }
        Ok(())
    }

    /// Wipe all persisted metadata
    pub fn clear(&mut self, store: &dyn MetadataStore) -> Result<()> {
        store.clear()?;
        self.invalidate()
    }

    fn read_snapshot(&self, trunk: &str, store: &dyn MetadataStore) -> Result<Option<BranchMetaMap>> {
        let Some(path) = &self.snapshot_path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let Some(fingerprint) = store.fingerprint()? else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring unreadable branch cache: {}", e);
                return Ok(None);
            }
        };

        if snapshot.trunk != trunk || snapshot.fingerprint != fingerprint {
            return Ok(None);
        }
        Ok(Some(snapshot.branches))
    }
}

/// SHA-256 over the canonical JSON of the map
pub fn structural_hash(branches: &BranchMetaMap) -> Result<String> {
    let json = serde_json::to_vec(branches)?;
    Ok(format!("{:x}", Sha256::digest(&json)))
}

/// Decide whether `meta`'s parent edge still holds against the parent's
/// current revision, repairing the stake when that changes nothing semantically.
/// Writes the store record whenever the stake moves.
pub(crate) fn validate_or_fix_parent_revision(
    repo: &dyn RevisionSource,
    store: &dyn MetadataStore,
    name: &str,
    meta: &mut CachedMeta,
    parent_revision: &str,
) -> Result<()> {
    let Some(mut parent) = meta.state.parent().cloned() else {
        return Ok(());
    };
    let branch_revision = meta.branch_revision.as_str();

    if repo.is_ancestor(&parent.parent_branch_revision, branch_revision)? {
        let advance = parent.parent_branch_revision != parent_revision
            && repo.is_ancestor(parent_revision, branch_revision)?;
        if advance {
            debug!("Advancing stake of {} to {}", name, parent_revision);
            parent.parent_branch_revision = parent_revision.to_string();
        }
        meta.state = BranchState::Valid { parent };
        if advance {
            store.write(name, &meta.to_record())?;
        }
        return Ok(());
    }

    if repo.is_ancestor(parent_revision, branch_revision)? {
        parent.parent_branch_revision = repo.merge_base(branch_revision, parent_revision)?;
        debug!("Re-staked {} at {}", name, parent.parent_branch_revision);
        meta.state = BranchState::Valid { parent };
        store.write(name, &meta.to_record())?;
        return Ok(());
    }

    debug!("{} no longer sits on its parent", name);
    meta.state = BranchState::InvalidParent { parent };
    Ok(())
}
