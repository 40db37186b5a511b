use super::metadata::MetaRecord;
use crate::errors::{GraftError, Result};
use git2::{ObjectType, Repository};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

pub const METADATA_REF_PREFIX: &str = "refs/branch-metadata/";

/// Durable per-branch metadata, keyed by branch name
pub trait MetadataStore {
    fn write(&self, branch: &str, record: &MetaRecord) -> Result<()>;
    fn delete(&self, branch: &str) -> Result<()>;
    fn list_all(&self) -> Result<BTreeMap<String, MetaRecord>>;

    /// Digest of everything a cached branch map was derived from.
    /// `None` means the store cannot tell, and cached maps are never reused.
    fn fingerprint(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn clear(&self) -> Result<()> {
        for branch in self.list_all()?.keys() {
            self.delete(branch)?;
        }
        Ok(())
    }
}

/// Stores each record as a JSON blob behind `refs/branch-metadata/<branch>`
pub struct RefMetadataStore {
    repo: Repository,
}

impl RefMetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|e| GraftError::config(format!("Not a git repository: {e}")))?;
        Ok(Self { repo })
    }

    fn ref_name(branch: &str) -> String {
        format!("{METADATA_REF_PREFIX}{branch}")
    }
}

impl MetadataStore for RefMetadataStore {
    fn write(&self, branch: &str, record: &MetaRecord) -> Result<()> {
        let json = serde_json::to_vec(record)?;
        let blob = self.repo.blob(&json)?;
        self.repo.reference(
            &Self::ref_name(branch),
            blob,
            true,
            &format!("graft: metadata for {branch}"),
        )?;
        debug!("Wrote metadata for {}", branch);
        Ok(())
    }

    fn delete(&self, branch: &str) -> Result<()> {
        match self.repo.find_reference(&Self::ref_name(branch)) {
            Ok(mut reference) => {
                reference.delete()?;
                debug!("Deleted metadata for {}", branch);
                Ok(())
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_all(&self) -> Result<BTreeMap<String, MetaRecord>> {
        let mut records = BTreeMap::new();
        for reference in self.repo.references_glob(&format!("{METADATA_REF_PREFIX}*"))? {
            let reference = reference?;
            let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
                continue;
            };
            let Some(branch) = name.strip_prefix(METADATA_REF_PREFIX) else {
                continue;
            };

            let object = self.repo.find_object(target, Some(ObjectType::Blob));
            let parsed = object
                .ok()
                .and_then(|object| object.into_blob().ok())
                .map(|blob| serde_json::from_slice::<MetaRecord>(blob.content()));

            match parsed {
                Some(Ok(record)) => {
                    records.insert(branch.to_string(), record);
                }
                Some(Err(e)) => warn!("Skipping unreadable metadata for {}: {}", branch, e),
                None => warn!("Skipping metadata for {}: not a blob", branch),
            }
        }
        Ok(records)
    }

    fn fingerprint(&self) -> Result<Option<String>> {
        let mut targets = Vec::new();
        for glob in ["refs/heads/*".to_string(), format!("{METADATA_REF_PREFIX}*")] {
            for reference in self.repo.references_glob(&glob)? {
                let reference = reference?;
                if let (Some(name), Some(target)) = (reference.name(), reference.target()) {
                    targets.push(format!("{name} {target}"));
                }
            }
        }
        targets.sort();

        let mut hasher = Sha256::new();
        for line in &targets {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        Ok(Some(format!("{:x}", hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::metadata::PrInfo;
    use std::process::Command;
    use tempfile::TempDir;

    fn create_test_repo() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-q"],
            vec!["checkout", "-q", "-b", "main"],
            vec!["config", "user.name", "Test"],
            vec!["config", "user.email", "test@test.com"],
            vec!["commit", "-q", "--allow-empty", "-m", "Initial commit"],
        ] {
            let status = Command::new("git")
                .args(&args)
                .current_dir(temp_dir.path())
                .status()
                .unwrap();
            assert!(status.success());
        }
        temp_dir
    }

    fn record(parent: &str) -> MetaRecord {
        MetaRecord {
            parent_branch_name: Some(parent.to_string()),
            parent_branch_revision: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
            pr_info: None,
        }
    }

    #[test]
    fn test_write_list_delete() {
        let temp_dir = create_test_repo();
        let store = RefMetadataStore::open(temp_dir.path()).unwrap();

        store.write("feature/a", &record("main")).unwrap();
        let mut with_pr = record("feature/a");
        with_pr.pr_info = Some(PrInfo {
            number: Some(12),
            ..Default::default()
        });
        store.write("b", &with_pr).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["feature/a"], record("main"));
        assert_eq!(all["b"], with_pr);

        store.delete("feature/a").unwrap();
        store.delete("never-written").unwrap();
        assert_eq!(store.list_all().unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_records_are_skipped() {
        let temp_dir = create_test_repo();
        let store = RefMetadataStore::open(temp_dir.path()).unwrap();
        store.write("good", &record("main")).unwrap();

        let blob = store.repo.blob(b"not json").unwrap();
        store
            .repo
            .reference("refs/branch-metadata/bad", blob, true, "test")
            .unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn test_fingerprint_tracks_metadata_changes() {
        let temp_dir = create_test_repo();
        let store = RefMetadataStore::open(temp_dir.path()).unwrap();

        let before = store.fingerprint().unwrap();
        assert_eq!(before, store.fingerprint().unwrap());

        store.write("feature", &record("main")).unwrap();
        assert_ne!(before, store.fingerprint().unwrap());
    }
}
