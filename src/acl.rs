//!
//! authorizer ACL engine
//! ---------------------
//! Data model and operations for privilege records. A record is identified by
//! the (service, object, key, user) tuple and carries a mapping from
//! privilege name to an allow/deny verdict.
//!
//! The engine is stateless: every operation is a free function taking the
//! store handle and explicit coordinates, and maps to a single atomic store
//! primitive. There is no engine-level read-modify-write; concurrent
//! mutations on the same tuple serialize at the store and the last write
//! wins per privilege name. "No matching record" is an expected outcome
//! expressed in the return types (`Ok(false)`, `Ok(None)`, empty vectors),
//! never an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{DistinctField, PrivilegeStore, Selector, StoreResult, Tuple};

/// Verdict attached to one named privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// One privilege record: the verdicts a user holds on a specific resource
/// instance (`key`) of an `object` type within a `service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub service: String,
    pub object: String,
    pub key: String,
    pub user: String,
    pub privileges: BTreeMap<String, Verdict>,
}

fn with_verdict(names: &[String], verdict: Verdict) -> Vec<(String, Verdict)> {
    names.iter().map(|name| (name.clone(), verdict)).collect()
}

/// Set every named privilege to Allow on the tuple's record, creating the
/// record if absent. Names not listed are left untouched.
pub fn grant<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: &str,
    user: &str,
    privileges: &[String],
) -> StoreResult<()> {
    let tuple = Tuple::new(service, object, key, user);
    debug!(target: "authorizer::acl", "grant: tuple={:?} privileges={:?}", tuple, privileges);
    store.upsert_partial(&tuple, &with_verdict(privileges, Verdict::Allow))
}

/// Set every named privilege to Deny on the tuple's record, creating the
/// record if absent. Grant and Deny on the same name overwrite each other;
/// whichever was applied last wins.
pub fn deny<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: &str,
    user: &str,
    privileges: &[String],
) -> StoreResult<()> {
    let tuple = Tuple::new(service, object, key, user);
    debug!(target: "authorizer::acl", "deny: tuple={:?} privileges={:?}", tuple, privileges);
    store.upsert_partial(&tuple, &with_verdict(privileges, Verdict::Deny))
}

/// Remove the named privileges from the tuple's record. Revoking a name that
/// is not present is a no-op, and revoking against a tuple with no record
/// leaves no record behind.
pub fn revoke<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: &str,
    user: &str,
    privileges: &[String],
) -> StoreResult<()> {
    let tuple = Tuple::new(service, object, key, user);
    debug!(target: "authorizer::acl", "revoke: tuple={:?} privileges={:?}", tuple, privileges);
    store.unset_fields(&tuple, privileges)
}

/// Replace the record's entire privilege mapping, creating the record if
/// absent. Unlike grant/deny this is not a merge: names missing from the new
/// mapping are dropped.
pub fn set<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: &str,
    user: &str,
    privileges: BTreeMap<String, Verdict>,
) -> StoreResult<()> {
    let tuple = Tuple::new(service, object, key, user);
    debug!(target: "authorizer::acl", "set: tuple={:?} privileges={:?}", tuple, privileges);
    store.upsert_replace(&tuple, privileges)
}

/// True iff a record exists for the tuple and every named privilege is Allow.
/// A missing record, a missing name, or a Deny verdict all answer false.
pub fn has<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: &str,
    user: &str,
    privileges: &[String],
) -> StoreResult<bool> {
    let tuple = Tuple::new(service, object, key, user);
    let mut selector = Selector::tuple(&tuple);
    selector.privileges = with_verdict(privileges, Verdict::Allow);
    debug!(target: "authorizer::acl", "has: selector={:?}", selector);
    Ok(store.find_one(&selector)?.is_some())
}

/// Full record for the tuple, unfiltered, or `None` when no record exists.
pub fn get<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: &str,
    user: &str,
) -> StoreResult<Option<Acl>> {
    let tuple = Tuple::new(service, object, key, user);
    store.find_one(&Selector::tuple(&tuple))
}

/// All records for (service, object), optionally narrowed by key and/or user.
/// An absent or empty filter means "match any"; supplied filters AND
/// together. Result order is store-determined.
pub fn list<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    key: Option<&str>,
    user: Option<&str>,
) -> StoreResult<Vec<Acl>> {
    let selector = Selector {
        service: Some(service.to_string()),
        object: Some(object.to_string()),
        key: key.filter(|k| !k.is_empty()).map(str::to_string),
        user: user.filter(|u| !u.is_empty()).map(str::to_string),
        privileges: Vec::new(),
    };
    debug!(target: "authorizer::acl", "list: selector={:?}", selector);
    store.find_all(&selector)
}

/// Distinct keys within (service, object, user) whose records hold Allow for
/// every named privilege: "which resources can this user access with all of
/// these privileges simultaneously".
pub fn match_keys<S: PrivilegeStore + ?Sized>(
    store: &S,
    service: &str,
    object: &str,
    user: &str,
    privileges: &[String],
) -> StoreResult<Vec<String>> {
    let selector = Selector {
        service: Some(service.to_string()),
        object: Some(object.to_string()),
        key: None,
        user: Some(user.to_string()),
        privileges: with_verdict(privileges, Verdict::Allow),
    };
    debug!(target: "authorizer::acl", "match_keys: selector={:?}", selector);
    store.find_distinct(&selector, DistinctField::Key)
}

/// Distinct service values across all records.
pub fn list_services<S: PrivilegeStore + ?Sized>(store: &S) -> StoreResult<Vec<String>> {
    store.find_distinct(&Selector::default(), DistinctField::Service)
}

/// Distinct object values within one service.
pub fn list_objects<S: PrivilegeStore + ?Sized>(store: &S, service: &str) -> StoreResult<Vec<String>> {
    let selector = Selector { service: Some(service.to_string()), ..Default::default() };
    store.find_distinct(&selector, DistinctField::Object)
}
