//! Content-ID, `dependsOn` and atomicity-group resolution.
//!
//! The resolver is fed one operation at a time, in document order, so an
//! operation can only ever see ids declared before it. For each operation it
//! validates the declared (JSON) or inferred (multipart) dependencies and
//! returns the resolved list.
//!
//! # Rules
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | Content-ID already used in scope | [`BatchError::DuplicateContentId`] |
//! | Content-ID equal to a group id | [`BatchError::GroupIdConflict`] |
//! | `dependsOn` names the op's own group | [`BatchError::DependsOnOwnAtomicityGroup`] |
//! | `dependsOn` names another group | expands to that group's members, in order |
//! | `dependsOn` names a request inside another group | [`BatchError::DependsOnInAtomicityGroup`] |
//! | `dependsOn` names an unseen id | [`BatchError::DependsOnIdNotFound`] |
//! | Group reopened after it closed | [`BatchError::NonContiguousAtomicityGroup`] |
//!
//! # Examples
//!
//! ```
//! use odata_batch::{ContentIdScope, DependencyResolver};
//!
//! let mut resolver = DependencyResolver::new(ContentIdScope::Batch);
//! resolver.begin_group("g1").unwrap();
//! resolver.resolve(Some("g1r1"), Some("g1"), &[]).unwrap();
//! resolver.resolve(Some("g1r2"), Some("g1"), &[]).unwrap();
//! resolver.end_group();
//!
//! let deps = resolver.resolve(Some("r3"), None, &["g1".to_string()]).unwrap();
//! assert_eq!(deps.to_vec(), vec!["g1r1", "g1r2"]);
//! ```

use crate::batch::error::{BatchError, Result};
use crate::batch::types::{DependsOnIds, OperationUrl};
use std::collections::{HashMap, HashSet};

/// Where Content-IDs must be unique and where they can be referenced from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentIdScope {
    /// One namespace for the whole batch.
    Batch,
    /// Ids inside a changeset are private to it and forgotten when it ends.
    Changeset,
}

/// Incremental validator for cross-operation references of one batch.
#[derive(Debug)]
pub struct DependencyResolver {
    scope: ContentIdScope,
    /// Batch-visible ids and the group each belongs to.
    ids: HashMap<String, Option<String>>,
    /// Ids of the open changeset, when they are changeset-scoped.
    changeset_ids: Vec<String>,
    group_members: HashMap<String, Vec<String>>,
    current_group: Option<String>,
    closed_groups: HashSet<String>,
    locations: HashMap<String, String>,
}

impl DependencyResolver {
    pub fn new(scope: ContentIdScope) -> Self {
        Self {
            scope,
            ids: HashMap::new(),
            changeset_ids: Vec::new(),
            group_members: HashMap::new(),
            current_group: None,
            closed_groups: HashSet::new(),
            locations: HashMap::new(),
        }
    }

    #[inline]
    pub fn scope(&self) -> ContentIdScope {
        self.scope
    }

    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Members recorded so far for `group_id`, in document order.
    pub fn group_members(&self, group_id: &str) -> Option<&[String]> {
        self.group_members.get(group_id).map(Vec::as_slice)
    }

    /// Opens an atomicity group.
    pub fn begin_group(&mut self, group_id: &str) -> Result<()> {
        if self.closed_groups.contains(group_id) || self.group_members.contains_key(group_id) {
            return Err(BatchError::NonContiguousAtomicityGroup(group_id.to_string()));
        }
        if self.ids.contains_key(group_id) {
            return Err(BatchError::GroupIdConflict(group_id.to_string()));
        }
        tracing::debug!(group_id, "atomicity group started");
        self.group_members.insert(group_id.to_string(), Vec::new());
        self.current_group = Some(group_id.to_string());
        Ok(())
    }

    /// Closes the open atomicity group.
    pub fn end_group(&mut self) {
        if let Some(group_id) = self.current_group.take() {
            tracing::debug!(group_id = %group_id, "atomicity group ended");
            if self.scope == ContentIdScope::Changeset {
                self.changeset_ids.clear();
            }
            self.closed_groups.insert(group_id);
        }
    }

    /// Resolves the declared `dependsOn` tokens of an operation and records its id.
    pub fn resolve(
        &mut self,
        content_id: Option<&str>,
        group_id: Option<&str>,
        depends_on: &[String],
    ) -> Result<DependsOnIds> {
        self.check_new_id(content_id, group_id)?;
        let requester = content_id.unwrap_or_default();

        let mut resolved: Vec<String> = Vec::new();
        for token in depends_on {
            if let Some(members) = self.group_members.get(token) {
                if group_id == Some(token.as_str()) {
                    return Err(BatchError::DependsOnOwnAtomicityGroup {
                        content_id: requester.to_string(),
                        group_id: token.clone(),
                    });
                }
                resolved.extend(members.iter().cloned());
                continue;
            }

            match self.lookup(token, group_id) {
                Some(Some(owner)) if group_id != Some(owner) => {
                    return Err(BatchError::DependsOnInAtomicityGroup {
                        depends_on: token.clone(),
                        group_id: owner.to_string(),
                    });
                }
                Some(_) => resolved.push(token.clone()),
                None => {
                    return Err(BatchError::DependsOnIdNotFound {
                        depends_on: token.clone(),
                        content_id: requester.to_string(),
                    });
                }
            }
        }

        self.record(content_id, group_id);
        let resolved = DependsOnIds::new(resolved);
        tracing::trace!(content_id = requester, depends_on = ?&*resolved, "resolved dependencies");
        Ok(resolved)
    }

    /// Infers the dependencies of a multipart operation from its URL and records its id.
    ///
    /// A URL rooted at `$<id>` depends on `<id>`. With changeset scoping the
    /// id must belong to the open changeset; with batch scoping it must have
    /// been declared earlier anywhere in the batch.
    pub fn resolve_reference(
        &mut self,
        content_id: Option<&str>,
        group_id: Option<&str>,
        url: &OperationUrl,
    ) -> Result<DependsOnIds> {
        self.check_new_id(content_id, group_id)?;

        let resolved = match url.reference_id() {
            None => DependsOnIds::empty(),
            Some(reference) => {
                let known = match self.scope {
                    ContentIdScope::Changeset => {
                        group_id.is_some() && self.changeset_ids.iter().any(|id| id == reference)
                    }
                    ContentIdScope::Batch => self.ids.contains_key(reference),
                };
                if !known {
                    return Err(match self.scope {
                        ContentIdScope::Changeset => BatchError::ContentIdNotInChangeset {
                            content_id: reference.to_string(),
                            url: url.to_string(),
                        },
                        ContentIdScope::Batch => BatchError::ForwardReference {
                            content_id: reference.to_string(),
                            url: url.to_string(),
                        },
                    });
                }
                DependsOnIds::new([reference])
            }
        };

        self.record(content_id, group_id);
        Ok(resolved)
    }

    /// Rejects a URL that references the operation's own Content-ID.
    pub fn check_self_reference(content_id: Option<&str>, url: &OperationUrl) -> Result<()> {
        match content_id {
            Some(id) if url.mentions_content_id(id) => Err(BatchError::SelfReference {
                content_id: id.to_string(),
                url: url.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Records the resource an operation produced, for later `$<id>` substitution.
    pub fn register_location(&mut self, content_id: &str, location: impl Into<String>) {
        self.locations.insert(content_id.to_string(), location.into());
    }

    /// Rewrites `$<id>/rest` to `<location>/rest` once `<id>` has a location.
    pub fn substitute(&self, url: &OperationUrl) -> Option<OperationUrl> {
        let OperationUrl::Reference { content_id, rest } = url else {
            return None;
        };
        let location = self.locations.get(content_id)?;
        let location = location.strip_suffix('/').unwrap_or(location);
        OperationUrl::parse(&format!("{}{}", location, rest)).ok()
    }

    fn check_new_id(&self, content_id: Option<&str>, group_id: Option<&str>) -> Result<()> {
        let Some(id) = content_id else {
            return Ok(());
        };
        let duplicate = if self.scope == ContentIdScope::Changeset && group_id.is_some() {
            self.changeset_ids.iter().any(|seen| seen == id)
        } else {
            self.ids.contains_key(id)
        };
        if duplicate {
            return Err(BatchError::DuplicateContentId(id.to_string()));
        }
        if self.group_members.contains_key(id) {
            return Err(BatchError::GroupIdConflict(id.to_string()));
        }
        Ok(())
    }

    /// `Some(group)` for a visible id, where `group` is its atomicity group if any.
    fn lookup<'a>(&'a self, id: &str, group_id: Option<&'a str>) -> Option<Option<&'a str>> {
        if self.scope == ContentIdScope::Changeset
            && group_id.is_some()
            && self.changeset_ids.iter().any(|seen| seen == id)
        {
            return Some(group_id);
        }
        self.ids.get(id).map(Option::as_deref)
    }

    fn record(&mut self, content_id: Option<&str>, group_id: Option<&str>) {
        let Some(id) = content_id else {
            return;
        };
        if let Some(group) = group_id {
            if let Some(members) = self.group_members.get_mut(group) {
                members.push(id.to_string());
            }
        }
        if self.scope == ContentIdScope::Changeset && group_id.is_some() {
            self.changeset_ids.push(id.to_string());
        } else {
            self.ids
                .insert(id.to_string(), group_id.map(str::to_string));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn url(raw: &str) -> OperationUrl {
        OperationUrl::parse(raw).unwrap()
    }

    #[test]
    fn test_duplicate_content_id() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.resolve(Some("1"), None, &[]).unwrap();
        let err = r.resolve(Some("1"), None, &[]).unwrap_err();
        assert!(matches!(err, BatchError::DuplicateContentId(ref id) if id == "1"));
    }

    #[test]
    fn test_forward_reference_in_depends_on() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        let err = r.resolve(Some("1"), None, &ids(&["2"])).unwrap_err();
        match err {
            BatchError::DependsOnIdNotFound {
                depends_on,
                content_id,
            } => {
                assert_eq!(depends_on, "2");
                assert_eq!(content_id, "1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_top_level_dependencies_pass_through() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.resolve(Some("2A"), None, &[]).unwrap();
        r.resolve(Some("2B"), None, &[]).unwrap();
        let deps = r.resolve(Some("2C"), None, &ids(&["2A", "2B"])).unwrap();
        assert_eq!(deps.to_vec(), vec!["2A", "2B"]);
    }

    #[test]
    fn test_group_expansion_in_insertion_order() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.begin_group("g1").unwrap();
        r.resolve(Some("g1r1"), Some("g1"), &[]).unwrap();
        r.resolve(Some("g1r2"), Some("g1"), &[]).unwrap();
        r.end_group();
        r.resolve(Some("r0"), None, &[]).unwrap();
        let deps = r
            .resolve(Some("r3"), None, &ids(&["r0", "g1", "r0"]))
            .unwrap();
        assert_eq!(deps.to_vec(), vec!["r0", "g1r1", "g1r2"]);
    }

    #[test]
    fn test_depends_on_own_group_rejected() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.begin_group("g1").unwrap();
        r.resolve(Some("g1r1"), Some("g1"), &[]).unwrap();
        let err = r
            .resolve(Some("g1r2"), Some("g1"), &ids(&["g1"]))
            .unwrap_err();
        assert!(err.to_string().contains("atomicity group 'g1'"));
    }

    #[test]
    fn test_depends_on_request_in_other_group_rejected() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.begin_group("g1").unwrap();
        r.resolve(Some("g1r1"), Some("g1"), &[]).unwrap();
        r.end_group();
        let err = r.resolve(Some("r2"), None, &ids(&["g1r1"])).unwrap_err();
        assert!(err.to_string().contains("is part of atomicity group 'g1'"));
    }

    #[test]
    fn test_depends_on_sibling_in_same_group_allowed() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.begin_group("cs").unwrap();
        r.resolve(Some("1"), Some("cs"), &[]).unwrap();
        let deps = r.resolve(Some("2"), Some("cs"), &ids(&["1"])).unwrap();
        assert_eq!(deps.to_vec(), vec!["1"]);
    }

    #[test]
    fn test_non_contiguous_group() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.begin_group("g1").unwrap();
        r.end_group();
        let err = r.begin_group("g1").unwrap_err();
        assert!(matches!(err, BatchError::NonContiguousAtomicityGroup(_)));
    }

    #[test]
    fn test_group_id_conflicts_with_request_id() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.resolve(Some("x"), None, &[]).unwrap();
        assert!(matches!(
            r.begin_group("x"),
            Err(BatchError::GroupIdConflict(_))
        ));

        r.begin_group("g").unwrap();
        assert!(matches!(
            r.resolve(Some("g"), Some("g"), &[]),
            Err(BatchError::GroupIdConflict(_))
        ));
    }

    #[test]
    fn test_changeset_scope_reference_inside_changeset() {
        let mut r = DependencyResolver::new(ContentIdScope::Changeset);
        r.begin_group("cs1").unwrap();
        r.resolve_reference(Some("1"), Some("cs1"), &url("Customers"))
            .unwrap();
        let deps = r
            .resolve_reference(Some("2"), Some("cs1"), &url("$1/Orders"))
            .unwrap();
        assert_eq!(deps.to_vec(), vec!["1"]);
        r.end_group();

        // Ids are private to their changeset.
        r.begin_group("cs2").unwrap();
        r.resolve_reference(Some("1"), Some("cs2"), &url("Customers"))
            .unwrap();
        r.end_group();

        let err = r
            .resolve_reference(None, None, &url("$1"))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("does not exist in the current changeset"));
    }

    #[test]
    fn test_batch_scope_reference_must_be_declared_earlier() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        let err = r
            .resolve_reference(Some("1"), None, &url("$2/Orders"))
            .unwrap_err();
        assert!(matches!(err, BatchError::ForwardReference { ref content_id, .. } if content_id == "2"));

        r.resolve_reference(Some("2"), None, &url("Customers"))
            .unwrap();
        let deps = r
            .resolve_reference(Some("3"), None, &url("$2/Orders"))
            .unwrap();
        assert_eq!(deps.to_vec(), vec!["2"]);
    }

    #[test]
    fn test_self_reference() {
        let err =
            DependencyResolver::check_self_reference(Some("1"), &url("$1/Orders")).unwrap_err();
        assert!(err
            .to_string()
            .contains("contains self-reference of Content-ID value '1'"));
        DependencyResolver::check_self_reference(Some("1"), &url("$10/Orders")).unwrap();
        DependencyResolver::check_self_reference(None, &url("$1")).unwrap();
    }

    #[test]
    fn test_substitute_location() {
        let mut r = DependencyResolver::new(ContentIdScope::Batch);
        r.register_location("1", "http://host/service/Customers('NEW')");
        let out = r.substitute(&url("$1/Orders")).unwrap();
        assert_eq!(
            out.to_string(),
            "http://host/service/Customers('NEW')/Orders"
        );
        assert!(r.substitute(&url("$2")).is_none());
        assert!(r.substitute(&url("Customers")).is_none());
    }
}
