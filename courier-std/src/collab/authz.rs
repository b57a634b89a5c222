//! Authorization port over relationship tuples.
//!
//! A tuple reads `resource:resource_id#relation@subject:subject_id`, with an
//! optional `#subject_relation` suffix. Any part but the resource type may be
//! empty, which lookups use as "find these".

use async_trait::async_trait;
use courier_core::{DateTime, Error, Map, Result};
use regex::Regex;
use std::{
    collections::BTreeSet,
    fmt,
    sync::{LazyLock, Mutex, PoisonError},
};

static TUPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<resource>.+?):(?P<resource_id>.*?)#(?P<relation>.*?)@(?P<subject>.*?):(?P<subject_id>.*)$",
    )
    .expect("static pattern is valid")
});

/// A parsed relationship tuple.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationTuple {
    pub resource: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
}

fn non_empty(part: &str) -> Option<String> {
    (!part.is_empty()).then(|| part.to_owned())
}

impl RelationTuple {
    /// Parse `raw`, `None` if it is not a tuple.
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = TUPLE.captures(raw)?;
        let (subject_id, subject_relation) = match captures["subject_id"].split_once('#') {
            Some((id, relation)) => (id, Some(relation.to_owned())),
            None => (&captures["subject_id"], None),
        };
        Some(Self {
            resource: captures["resource"].to_owned(),
            resource_id: non_empty(&captures["resource_id"]),
            relation: non_empty(&captures["relation"]),
            subject: non_empty(&captures["subject"]),
            subject_id: non_empty(subject_id),
            subject_relation,
        })
    }

    /// Parse `raw`, failing `bad_request` if it is not a tuple.
    pub fn try_parse(raw: &str) -> Result<Self> {
        Self::parse(raw).ok_or_else(|| {
            Error::bad_request()
                .with_detail("invalid relationship tuple")
                .with_debug("tuple", raw)
        })
    }

    /// Whether every part set in `filter` equals the same part of `self`.
    fn fits(&self, filter: &Self) -> bool {
        fn part(value: &Option<String>, wanted: &Option<String>) -> bool {
            wanted.is_none() || value == wanted
        }
        self.resource == filter.resource
            && part(&self.resource_id, &filter.resource_id)
            && part(&self.relation, &filter.relation)
            && part(&self.subject, &filter.subject)
            && part(&self.subject_id, &filter.subject_id)
            && part(&self.subject_relation, &filter.subject_relation)
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = |part: &Option<String>| part.clone().unwrap_or_default();
        write!(
            f,
            "{}:{}#{}@{}:{}",
            self.resource,
            text(&self.resource_id),
            text(&self.relation),
            text(&self.subject),
            text(&self.subject_id),
        )?;
        if let Some(relation) = &self.subject_relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

/// Kind of relationship change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    /// Create or refresh the relationship.
    Set,
    /// Remove the relationship.
    Delete,
}

/// One relationship change.
#[derive(Debug, Clone)]
pub struct AuthzWrite {
    /// Set or delete.
    pub operation: WriteOperation,
    /// Tuple to change.
    pub tuple: String,
    /// Caveat name and its context.
    pub caveat: Option<(String, Map)>,
    /// When the relationship lapses.
    pub expires_at: Option<DateTime>,
}

impl AuthzWrite {
    /// Set `tuple`.
    pub fn set(tuple: impl Into<String>) -> Self {
        Self {
            operation: WriteOperation::Set,
            tuple: tuple.into(),
            caveat: None,
            expires_at: None,
        }
    }

    /// Delete `tuple`.
    pub fn delete(tuple: impl Into<String>) -> Self {
        Self {
            operation: WriteOperation::Delete,
            ..Self::set(tuple)
        }
    }
}

/// Condition of a precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionOp {
    /// The filter must match at least one relationship.
    MustMatch,
    /// The filter must match no relationship.
    MustNotMatch,
}

/// A filter that must (or must not) match before a write applies.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Precondition {
    pub operation: PreconditionOp,
    pub filter: String,
}

/// Ids found by [`Authz::lookup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct LookupResult {
    pub ids: Vec<String>,
    pub cursor: Option<String>,
}

/// Relationship based authorization.
#[async_trait]
pub trait Authz: Send + Sync {
    /// Succeed if `tuple` holds, fail `forbidden` otherwise.
    async fn check(&self, tuple: &str, context: Option<&Map>) -> Result<()>;

    /// Apply `changes` atomically once every precondition holds. Returns a
    /// consistency token.
    async fn write(&self, changes: &[AuthzWrite], preconditions: &[Precondition]) -> Result<String>;

    /// Resource ids when the filter names a subject id, subject ids
    /// otherwise.
    async fn lookup(
        &self,
        filter: &str,
        context: Option<&Map>,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<LookupResult>;
}

/// Relationships kept in memory; caveats and expirations are ignored.
#[derive(Debug, Default)]
pub struct MemoryAuthz {
    tuples: Mutex<BTreeSet<RelationTuple>>,
    revision: Mutex<u64>,
}

impl MemoryAuthz {
    /// No relationship.
    pub fn new() -> Self {
        Self::default()
    }

    fn tuples(&self) -> std::sync::MutexGuard<'_, BTreeSet<RelationTuple>> {
        self.tuples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Authz for MemoryAuthz {
    async fn check(&self, tuple: &str, context: Option<&Map>) -> Result<()> {
        let wanted = RelationTuple::try_parse(tuple)?;
        if self.tuples().contains(&wanted) {
            return Ok(());
        }
        let mut err = Error::forbidden().with_debug("tuple", tuple);
        if let Some(context) = context {
            err = err.with_debug("context", context.as_json().clone());
        }
        Err(err)
    }

    async fn write(&self, changes: &[AuthzWrite], preconditions: &[Precondition]) -> Result<String> {
        let parsed = changes
            .iter()
            .map(|change| {
                RelationTuple::try_parse(&change.tuple).map(|tuple| (change.operation, tuple))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut tuples = self.tuples();
        for precondition in preconditions {
            let filter = RelationTuple::try_parse(&precondition.filter)?;
            let matched = tuples.iter().any(|tuple| tuple.fits(&filter));
            let holds = match precondition.operation {
                PreconditionOp::MustMatch => matched,
                PreconditionOp::MustNotMatch => !matched,
            };
            if !holds {
                return Err(Error::conflict().with_debug("precondition", precondition.filter.as_str()));
            }
        }
        for (operation, tuple) in parsed {
            match operation {
                WriteOperation::Set => tuples.insert(tuple),
                WriteOperation::Delete => tuples.remove(&tuple),
            };
        }
        drop(tuples);

        let mut revision = self.revision.lock().unwrap_or_else(PoisonError::into_inner);
        *revision += 1;
        Ok(revision.to_string())
    }

    async fn lookup(
        &self,
        filter: &str,
        _context: Option<&Map>,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<LookupResult> {
        let filter = RelationTuple::try_parse(filter)?;
        let resources = filter.subject_id.is_some();
        let ids: BTreeSet<String> = self
            .tuples()
            .iter()
            .filter(|tuple| tuple.fits(&filter))
            .filter_map(|tuple| {
                if resources {
                    tuple.resource_id.clone()
                } else {
                    tuple.subject_id.clone()
                }
            })
            .filter(|id| cursor.is_none_or(|cursor| id.as_str() > cursor))
            .collect();

        let limit = limit.unwrap_or(usize::MAX);
        let mut ids: Vec<String> = ids.into_iter().collect();
        let cursor = if ids.len() > limit {
            ids.truncate(limit);
            ids.last().cloned()
        } else {
            None
        };
        Ok(LookupResult { ids, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ErrorKind;

    #[test]
    fn tuples_parse_and_print() {
        let tuple = RelationTuple::parse("document:readme#viewer@user:ada#member").unwrap();
        assert_eq!(tuple.resource, "document");
        assert_eq!(tuple.resource_id.as_deref(), Some("readme"));
        assert_eq!(tuple.relation.as_deref(), Some("viewer"));
        assert_eq!(tuple.subject.as_deref(), Some("user"));
        assert_eq!(tuple.subject_id.as_deref(), Some("ada"));
        assert_eq!(tuple.subject_relation.as_deref(), Some("member"));
        assert_eq!(tuple.to_string(), "document:readme#viewer@user:ada#member");

        let filter = RelationTuple::parse("document:#viewer@user:").unwrap();
        assert_eq!(filter.resource_id, None);
        assert_eq!(filter.subject_id, None);
        assert!(RelationTuple::parse("not a tuple").is_none());
    }

    #[tokio::test]
    async fn memory_authz_checks_writes_and_lookups() {
        let authz = MemoryAuthz::new();
        authz
            .write(
                &[
                    AuthzWrite::set("document:a#viewer@user:ada"),
                    AuthzWrite::set("document:b#viewer@user:ada"),
                    AuthzWrite::set("document:b#viewer@user:bob"),
                ],
                &[],
            )
            .await
            .unwrap();

        authz.check("document:a#viewer@user:ada", None).await.unwrap();
        let err = authz.check("document:a#viewer@user:bob", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let docs = authz.lookup("document:#viewer@user:ada", None, Some(1), None).await.unwrap();
        assert_eq!(docs.ids, vec!["a"]);
        let rest = authz
            .lookup("document:#viewer@user:ada", None, Some(1), docs.cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(rest.ids, vec!["b"]);

        let viewers = authz.lookup("document:b#viewer@user:", None, None, None).await.unwrap();
        assert_eq!(viewers.ids, vec!["ada", "bob"]);

        let precondition = Precondition {
            operation: PreconditionOp::MustNotMatch,
            filter: String::from("document:a#viewer@user:"),
        };
        let err = authz
            .write(&[AuthzWrite::delete("document:a#viewer@user:ada")], &[precondition])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
