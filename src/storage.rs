//!
//! authorizer storage module
//! -------------------------
//! This module defines the store contract the ACL engine runs against and the
//! default file-backed implementation. The contract covers atomic partial
//! upserts, whole-record replacement, field unsets, and three find shapes
//! (one, all, distinct projection). Selectors are structured values, not
//! stringly-typed field paths.
//!
//! The default `Store` keeps the collection in memory, keyed by the composite
//! (service, object, key, user) tuple, and snapshots it to `acls.json` under
//! a configured root folder on every mutation. The composite key makes the
//! uniqueness invariant structural. Mutations run under a single write guard
//! covering both the map update and the snapshot; concurrent writers
//! serialize here and the last write wins per field.
//!
//! The public API centers around the `Store` type, which is usually wrapped
//! in the clone-able `SharedStore` handle elsewhere in the codebase.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::acl::{Acl, Verdict};

/// Failure surfaced by store operations. A "no matching record" outcome is
/// never an error; find operations express it as `None` or an empty result.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Full coordinates of one privilege record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tuple {
    pub service: String,
    pub object: String,
    pub key: String,
    pub user: String,
}

impl Tuple {
    pub fn new(service: &str, object: &str, key: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            object: object.to_string(),
            key: key.to_string(),
            user: user.to_string(),
        }
    }
}

/// Record field a distinct projection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctField {
    Service,
    Object,
    Key,
}

/// Conjunctive record filter: equality on any subset of the tuple coordinates
/// plus required (privilege-name, verdict) entries. Every populated condition
/// must hold for a record to match; an empty selector matches everything.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub service: Option<String>,
    pub object: Option<String>,
    pub key: Option<String>,
    pub user: Option<String>,
    pub privileges: Vec<(String, Verdict)>,
}

impl Selector {
    /// Selector pinning all four coordinates of a tuple.
    pub fn tuple(t: &Tuple) -> Self {
        Self {
            service: Some(t.service.clone()),
            object: Some(t.object.clone()),
            key: Some(t.key.clone()),
            user: Some(t.user.clone()),
            privileges: Vec::new(),
        }
    }

    fn matches(&self, acl: &Acl) -> bool {
        if self.service.as_deref().is_some_and(|s| s != acl.service) { return false; }
        if self.object.as_deref().is_some_and(|o| o != acl.object) { return false; }
        if self.key.as_deref().is_some_and(|k| k != acl.key) { return false; }
        if self.user.as_deref().is_some_and(|u| u != acl.user) { return false; }
        self.privileges.iter().all(|(name, verdict)| acl.privileges.get(name) == Some(verdict))
    }
}

/// Store contract required by the ACL engine.
///
/// Mutations are atomic per call: `upsert_partial` and `upsert_replace`
/// create the record when no tuple matches; `unset_fields` must NOT create a
/// record on no-match.
pub trait PrivilegeStore: Send + Sync {
    /// Create-or-update, touching only the named privilege entries.
    fn upsert_partial(&self, tuple: &Tuple, entries: &[(String, Verdict)]) -> StoreResult<()>;
    /// Create-or-replace the record's whole privilege mapping.
    fn upsert_replace(&self, tuple: &Tuple, privileges: BTreeMap<String, Verdict>) -> StoreResult<()>;
    /// Remove the named privilege entries from the matching record, if any.
    fn unset_fields(&self, tuple: &Tuple, names: &[String]) -> StoreResult<()>;
    fn find_one(&self, selector: &Selector) -> StoreResult<Option<Acl>>;
    fn find_all(&self, selector: &Selector) -> StoreResult<Vec<Acl>>;
    /// Distinct values of `field` across records matching the selector.
    fn find_distinct(&self, selector: &Selector, field: DistinctField) -> StoreResult<Vec<String>>;
}

fn to_acl(tuple: &Tuple, privileges: &BTreeMap<String, Verdict>) -> Acl {
    Acl {
        service: tuple.service.clone(),
        object: tuple.object.clone(),
        key: tuple.key.clone(),
        user: tuple.user.clone(),
        privileges: privileges.clone(),
    }
}

/// File-backed privilege store rooted at a configured folder.
///
/// The collection lives in memory and is persisted as a JSON array of records
/// in `<root>/acls.json`. Loading tolerates a missing file (empty store);
/// records sharing a tuple collapse to one entry on load, preserving the
/// composite-key uniqueness invariant even against a hand-edited file.
pub struct Store {
    root: PathBuf,
    records: RwLock<BTreeMap<Tuple, BTreeMap<String, Verdict>>>,
}

impl Store {
    /// Create a new Store rooted at the given filesystem path.
    /// The directory is created if it does not already exist, and any
    /// existing `acls.json` snapshot is loaded.
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let records = Self::load(&root.join("acls.json"))?;
        debug!(target: "authorizer::storage", "store opened: root='{}' records={}", root.display(), records.len());
        Ok(Self { root, records: RwLock::new(records) })
    }

    /// Return the configured root folder for this Store.
    pub fn root_path(&self) -> &PathBuf { &self.root }

    fn data_path(&self) -> PathBuf { self.root.join("acls.json") }

    fn load(path: &Path) -> StoreResult<BTreeMap<Tuple, BTreeMap<String, Verdict>>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(path)?;
        let acls: Vec<Acl> = serde_json::from_slice(&bytes)?;
        let mut records = BTreeMap::new();
        for acl in acls {
            let Acl { service, object, key, user, privileges } = acl;
            records.insert(Tuple { service, object, key, user }, privileges);
        }
        Ok(records)
    }

    // Caller holds the write guard; the snapshot is part of the mutation.
    fn persist(&self, records: &BTreeMap<Tuple, BTreeMap<String, Verdict>>) -> StoreResult<()> {
        let acls: Vec<Acl> = records.iter().map(|(k, p)| to_acl(k, p)).collect();
        let bytes = serde_json::to_vec_pretty(&acls)?;
        fs::write(self.data_path(), bytes)?;
        Ok(())
    }
}

impl PrivilegeStore for Store {
    fn upsert_partial(&self, tuple: &Tuple, entries: &[(String, Verdict)]) -> StoreResult<()> {
        let mut records = self.records.write();
        let privileges = records.entry(tuple.clone()).or_default();
        for (name, verdict) in entries {
            privileges.insert(name.clone(), *verdict);
        }
        self.persist(&records)
    }

    fn upsert_replace(&self, tuple: &Tuple, privileges: BTreeMap<String, Verdict>) -> StoreResult<()> {
        let mut records = self.records.write();
        records.insert(tuple.clone(), privileges);
        self.persist(&records)
    }

    fn unset_fields(&self, tuple: &Tuple, names: &[String]) -> StoreResult<()> {
        let mut records = self.records.write();
        // No matching record: leave none behind.
        let Some(privileges) = records.get_mut(tuple) else {
            return Ok(());
        };
        for name in names {
            privileges.remove(name);
        }
        self.persist(&records)
    }

    fn find_one(&self, selector: &Selector) -> StoreResult<Option<Acl>> {
        let records = self.records.read();
        Ok(records
            .iter()
            .map(|(k, p)| to_acl(k, p))
            .find(|acl| selector.matches(acl)))
    }

    fn find_all(&self, selector: &Selector) -> StoreResult<Vec<Acl>> {
        let records = self.records.read();
        Ok(records
            .iter()
            .map(|(k, p)| to_acl(k, p))
            .filter(|acl| selector.matches(acl))
            .collect())
    }

    fn find_distinct(&self, selector: &Selector, field: DistinctField) -> StoreResult<Vec<String>> {
        let records = self.records.read();
        let values: BTreeSet<String> = records
            .iter()
            .map(|(k, p)| to_acl(k, p))
            .filter(|acl| selector.matches(acl))
            .map(|acl| match field {
                DistinctField::Service => acl.service,
                DistinctField::Object => acl.object,
                DistinctField::Key => acl.key,
            })
            .collect();
        Ok(values.into_iter().collect())
    }
}

/// Clone-able thread-safe handle to the privilege store.
#[derive(Clone)]
pub struct SharedStore(pub Arc<dyn PrivilegeStore>);

impl SharedStore {
    /// Open the default file-backed store under the given root folder.
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        Ok(Self(Arc::new(Store::new(root)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(pairs: &[(&str, Verdict)]) -> Vec<(String, Verdict)> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn upsert_partial_creates_then_merges() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let tuple = Tuple::new("svc", "doc", "42", "alice");

        store.upsert_partial(&tuple, &entries(&[("read", Verdict::Allow)])).unwrap();
        store.upsert_partial(&tuple, &entries(&[("write", Verdict::Deny)])).unwrap();

        let acl = store.find_one(&Selector::tuple(&tuple)).unwrap().unwrap();
        assert_eq!(acl.privileges.len(), 2);
        assert_eq!(acl.privileges.get("read"), Some(&Verdict::Allow));
        assert_eq!(acl.privileges.get("write"), Some(&Verdict::Deny));
    }

    #[test]
    fn composite_key_is_unique() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let tuple = Tuple::new("svc", "doc", "42", "alice");

        store.upsert_partial(&tuple, &entries(&[("read", Verdict::Allow)])).unwrap();
        store.upsert_replace(&tuple, BTreeMap::from([("write".to_string(), Verdict::Allow)])).unwrap();

        let all = store.find_all(&Selector::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].privileges.contains_key("read"));
    }

    #[test]
    fn unset_on_missing_tuple_creates_nothing() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let tuple = Tuple::new("svc", "doc", "42", "alice");

        store.unset_fields(&tuple, &["read".to_string()]).unwrap();
        assert!(store.find_one(&Selector::tuple(&tuple)).unwrap().is_none());
        assert!(store.find_all(&Selector::default()).unwrap().is_empty());
    }

    #[test]
    fn unset_leaves_empty_record_findable() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let tuple = Tuple::new("svc", "doc", "42", "alice");

        store.upsert_partial(&tuple, &entries(&[("read", Verdict::Allow)])).unwrap();
        store.unset_fields(&tuple, &["read".to_string()]).unwrap();

        let acl = store.find_one(&Selector::tuple(&tuple)).unwrap().unwrap();
        assert!(acl.privileges.is_empty());
    }

    #[test]
    fn selector_privilege_conditions_are_conjunctive() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let tuple = Tuple::new("svc", "doc", "42", "alice");
        store
            .upsert_partial(&tuple, &entries(&[("read", Verdict::Allow), ("write", Verdict::Deny)]))
            .unwrap();

        let mut sel = Selector::tuple(&tuple);
        sel.privileges = entries(&[("read", Verdict::Allow)]);
        assert!(store.find_one(&sel).unwrap().is_some());

        sel.privileges = entries(&[("read", Verdict::Allow), ("write", Verdict::Allow)]);
        assert!(store.find_one(&sel).unwrap().is_none());

        sel.privileges = entries(&[("read", Verdict::Allow), ("missing", Verdict::Allow)]);
        assert!(store.find_one(&sel).unwrap().is_none());
    }

    #[test]
    fn snapshot_survives_reopen() {
        let tmp = tempdir().unwrap();
        let tuple = Tuple::new("svc", "doc", "42", "alice");
        {
            let store = Store::new(tmp.path()).unwrap();
            store.upsert_partial(&tuple, &entries(&[("read", Verdict::Allow)])).unwrap();
        }
        let reopened = Store::new(tmp.path()).unwrap();
        let acl = reopened.find_one(&Selector::tuple(&tuple)).unwrap().unwrap();
        assert_eq!(acl.privileges.get("read"), Some(&Verdict::Allow));
    }

    #[test]
    fn distinct_projection_dedupes() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        for user in ["alice", "bob"] {
            let tuple = Tuple::new("svc", "doc", "42", user);
            store.upsert_partial(&tuple, &entries(&[("read", Verdict::Allow)])).unwrap();
        }

        let keys = store
            .find_distinct(
                &Selector { service: Some("svc".into()), ..Default::default() },
                DistinctField::Key,
            )
            .unwrap();
        assert_eq!(keys, vec!["42".to_string()]);
    }
}
