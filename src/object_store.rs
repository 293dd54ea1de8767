//! Content-addressed object store.
//!
//! Objects are immutable byte blobs whose id is the lowercase hex SHA-256
//! of their content. They are written to `objects/<id[0:2]>/<id>`, sharded
//! by the first hash byte to bound directory fan-out.
//!
//! | Operation | Behaviour |
//! |-----------|-----------|
//! | [`ObjectStore::put`] | Hash, then write temp-and-rename; an existing id is a dedup hit |
//! | [`ObjectStore::get`] | Read bytes back; missing ids are `NotFound` |
//! | [`ObjectStore::verify`] | Recompute the hash over stored bytes |
//! | [`ObjectStore::scan`] | Resumable batch verification that itemizes failures |
//!
//! There is no update or delete API. Corruption is reported, never repaired.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::{Result, VaultError};

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `id` is 64 lowercase hex characters.
pub fn is_object_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Outcome of a batch integrity scan.
///
/// Failures never abort the scan: every object in range is checked and
/// each problem is itemized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub verified: usize,
    /// Ids whose stored bytes no longer hash to the id.
    pub failed: Vec<String>,
    /// Objects that could not be checked, and other problems found.
    pub errors: Vec<String>,
    /// Resume point when the scan stopped at `limit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty()
    }

    fn merge(&mut self, other: IntegrityReport) {
        self.verified += other.verified;
        self.failed.extend(other.failed);
        self.errors.extend(other.errors);
        self.next_cursor = other.next_cursor;
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(&id[..2]).join(id)
    }

    fn checked_path(&self, id: &str) -> Result<PathBuf> {
        if !is_object_id(id) {
            return Err(VaultError::Validation(format!(
                "object id must be 64 lowercase hex characters: {}",
                id
            )));
        }
        Ok(self.path_for(id))
    }

    /// Store `bytes`, returning their object id. Idempotent.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let id = content_hash(bytes);
        let path = self.path_for(&id);
        if path.exists() {
            debug!(object = %id, "object dedup hit");
            return Ok(id);
        }
        write_atomic(&path, bytes)?;
        debug!(object = %id, bytes = bytes.len(), "object written");
        Ok(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        is_object_id(id) && self.path_for(id).is_file()
    }

    /// Read an object's bytes without verifying them.
    pub fn get(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.checked_path(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(VaultError::not_found("object", id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Read an object and fail with `HashMismatch` if it is corrupt.
    pub fn get_verified(&self, id: &str) -> Result<Vec<u8>> {
        let bytes = self.get(id)?;
        let actual = content_hash(&bytes);
        if actual != id {
            return Err(VaultError::HashMismatch {
                id: id.to_string(),
                actual,
            });
        }
        Ok(bytes)
    }

    /// Recompute the hash of a stored object. `Ok(false)` means corrupt.
    pub fn verify(&self, id: &str) -> Result<bool> {
        match self.get_verified(id) {
            Ok(_) => Ok(true),
            Err(VaultError::HashMismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All object ids, sorted.
    ///
    /// Files that are not named by a valid id, or sit in the wrong shard,
    /// are reported through `stray` rather than returned.
    fn list(&self, stray: &mut Vec<String>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut shards: Vec<_> = fs::read_dir(&self.root)?.collect::<io::Result<_>>()?;
        shards.sort_by_key(|e| e.file_name());
        for shard in shards {
            if !shard.file_type()?.is_dir() {
                stray.push(format!("unexpected file in object root: {}", shard.path().display()));
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().to_string();
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                if is_object_id(&name) && name.starts_with(&prefix) && prefix.len() == 2 {
                    ids.push(name);
                } else {
                    stray.push(format!("unexpected object file: {}", entry.path().display()));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        self.list(&mut Vec::new())
    }

    /// Object count and total stored bytes.
    pub fn usage(&self) -> Result<(usize, u64)> {
        let ids = self.ids()?;
        let mut bytes = 0;
        for id in &ids {
            bytes += fs::metadata(self.path_for(id))?.len();
        }
        Ok((ids.len(), bytes))
    }

    /// Verify up to `limit` objects with ids greater than `start_after`.
    ///
    /// When objects remain, `next_cursor` holds the last id checked; pass
    /// it back as `start_after` to resume.
    pub fn scan(&self, start_after: Option<&str>, limit: Option<usize>) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let ids = match self.list(&mut report.errors) {
            Ok(ids) => ids,
            Err(e) => {
                report.errors.push(format!("cannot list objects: {}", e));
                return report;
            }
        };

        let mut pending = ids
            .into_iter()
            .filter(|id| match start_after {
                Some(after) => id.as_str() > after,
                None => true,
            })
            .peekable();

        let mut checked = 0;
        while let Some(id) = pending.next() {
            match self.verify(&id) {
                Ok(true) => report.verified += 1,
                Ok(false) => {
                    warn!(object = %id, "object failed hash verification");
                    report.failed.push(id.clone());
                }
                Err(e) => report.errors.push(format!("{}: {}", id, e)),
            }
            checked += 1;
            if limit.is_some_and(|l| checked >= l) && pending.peek().is_some() {
                report.next_cursor = Some(id);
                break;
            }
        }
        report
    }

    /// Verify every object, in batches of `batch`.
    pub fn scan_all(&self, batch: usize) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut cursor: Option<String> = None;
        loop {
            let step = self.scan(cursor.as_deref(), Some(batch.max(1)));
            let next = step.next_cursor.clone();
            report.merge(step);
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path().join("objects")).unwrap();
        (dir, store)
    }

    fn file_count(root: &Path) -> usize {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_put_get_roundtrip_and_layout() {
        let (_dir, store) = store();
        let id = store.put(b"hello").unwrap();
        assert_eq!(
            id,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(store.root().join("2c").join(&id).is_file());
        assert_eq!(store.get(&id).unwrap(), b"hello");
    }

    #[test]
    fn test_put_twice_dedups() {
        let (_dir, store) = store();
        let a = store.put(b"same bytes").unwrap();
        let b = store.put(b"same bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(file_count(store.root()), 1);
    }

    #[test]
    fn test_empty_object() {
        let (_dir, store) = store();
        let id = store.put(b"").unwrap();
        assert_eq!(store.get(&id).unwrap(), b"");
        assert!(store.verify(&id).unwrap());
    }

    #[test]
    fn test_missing_and_malformed_ids() {
        let (_dir, store) = store();
        let missing = content_hash(b"never stored");
        assert!(matches!(store.get(&missing), Err(VaultError::NotFound { .. })));
        assert!(matches!(store.verify(&missing), Err(VaultError::NotFound { .. })));
        assert!(matches!(store.get("../etc/passwd"), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_corruption_is_detected_not_repaired() {
        let (_dir, store) = store();
        let id = store.put(b"original").unwrap();
        let path = store.root().join(&id[..2]).join(&id);
        fs::write(&path, b"tampered").unwrap();
        assert!(!store.verify(&id).unwrap());
        assert!(matches!(
            store.get_verified(&id),
            Err(VaultError::HashMismatch { .. })
        ));
        assert_eq!(fs::read(&path).unwrap(), b"tampered");
    }

    #[test]
    fn test_scan_itemizes_and_resumes() {
        let (_dir, store) = store();
        let mut ids: Vec<String> = (0..5)
            .map(|i| store.put(format!("object {}", i).as_bytes()).unwrap())
            .collect();
        ids.sort();
        fs::write(store.root().join(&ids[1][..2]).join(&ids[1]), b"rot").unwrap();
        fs::write(store.root().join(&ids[3][..2]).join(&ids[3]), b"").unwrap();

        let first = store.scan(None, Some(2));
        assert_eq!(first.verified + first.failed.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some(ids[1].as_str()));

        let rest = store.scan(first.next_cursor.as_deref(), None);
        assert!(rest.next_cursor.is_none());
        assert_eq!(rest.verified + rest.failed.len(), 3);

        let all = store.scan_all(2);
        assert_eq!(all.verified, 3);
        assert_eq!(all.failed, vec![ids[1].clone(), ids[3].clone()]);
        assert!(all.errors.is_empty());
    }

    #[test]
    fn test_scan_reports_stray_files() {
        let (_dir, store) = store();
        store.put(b"fine").unwrap();
        fs::create_dir_all(store.root().join("zz")).unwrap();
        fs::write(store.root().join("zz").join("notes.txt"), b"?").unwrap();
        let report = store.scan(None, None);
        assert_eq!(report.verified, 1);
        assert_eq!(report.errors.len(), 1);
    }
}
