//! Persistence port.

use async_trait::async_trait;
use courier_core::{Error, Id, PositiveInt, Result};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

/// A parameterized SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCriteria {
    /// Statement with `$n` placeholders.
    pub query: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

/// A selection of entities.
pub trait Criteria: Send + Sync {
    /// The single entity selected, if the criteria selects by id.
    fn id(&self) -> Option<&Id> {
        None
    }

    /// SQL form of the selection.
    fn as_sql(&self) -> SqlCriteria;
}

/// Pagination of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCriteria {
    /// Resume after this cursor.
    pub cursor: Option<String>,
    /// Maximum number of items.
    pub limit: usize,
}

impl Default for ListCriteria {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 100,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<T> {
    /// Items of the page.
    pub items: Vec<T>,
    /// Cursor of the next page, `None` on the last page.
    pub cursor: Option<String>,
}

/// A versioned aggregate.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identity.
    fn id(&self) -> &Id;

    /// Number of saved changes; `0` for an entity never saved.
    fn version(&self) -> PositiveInt;
}

/// Storage of entities of type `T`.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// The entity selected by `criteria`, if any.
    async fn get(&self, criteria: &dyn Criteria) -> Result<Option<T>>;

    /// Entities selected by `criteria`, one page at a time.
    async fn list(&self, criteria: &dyn Criteria, page: &ListCriteria) -> Result<ListPage<T>>;

    /// Whether `criteria` selects anything.
    async fn exist(&self, criteria: &dyn Criteria) -> Result<bool>;

    /// Delete what `criteria` selects.
    async fn delete(&self, criteria: &dyn Criteria) -> Result<()>;

    /// Insert an entity at version 0, update it otherwise.
    ///
    /// Fails `conflict` when the stored version is not the one the update
    /// started from.
    async fn save(&self, state: &T) -> Result<()>;
}

/// Selects the entity with a given id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ById {
    table: &'static str,
    id: Id,
}

impl ById {
    /// Select `id` from `table`.
    pub fn new(table: &'static str, id: Id) -> Self {
        Self { table, id }
    }
}

impl Criteria for ById {
    fn id(&self) -> Option<&Id> {
        Some(&self.id)
    }

    fn as_sql(&self) -> SqlCriteria {
        SqlCriteria {
            query: format!("SELECT * FROM {} WHERE id = $1", self.table),
            params: vec![Value::String(self.id.to_string())],
        }
    }
}

/// Entities kept in memory, ordered by id.
///
/// Criteria selecting an id match that entity only; any other criteria
/// selects every entity.
#[derive(Debug)]
pub struct MemoryRepository<T> {
    entities: Arc<RwLock<BTreeMap<Id, T>>>,
}

impl<T> Clone for MemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            entities: self.entities.clone(),
        }
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            entities: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<T: Entity> MemoryRepository<T> {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<Id, T>> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Id, T>> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryRepository<T> {
    async fn get(&self, criteria: &dyn Criteria) -> Result<Option<T>> {
        let entities = self.read();
        Ok(match criteria.id() {
            Some(id) => entities.get(id).cloned(),
            None => entities.values().next().cloned(),
        })
    }

    async fn list(&self, criteria: &dyn Criteria, page: &ListCriteria) -> Result<ListPage<T>> {
        let entities = self.read();
        let selected = entities
            .iter()
            .filter(|(id, _)| criteria.id().is_none_or(|wanted| wanted == *id))
            .filter(|(id, _)| {
                page.cursor
                    .as_deref()
                    .is_none_or(|cursor| id.as_str() > cursor)
            });
        let mut items: Vec<T> = selected
            .take(page.limit.saturating_add(1))
            .map(|(_, entity)| entity.clone())
            .collect();
        let cursor = if items.len() > page.limit {
            items.truncate(page.limit);
            items.last().map(|entity| entity.id().to_string())
        } else {
            None
        };
        Ok(ListPage { items, cursor })
    }

    async fn exist(&self, criteria: &dyn Criteria) -> Result<bool> {
        let entities = self.read();
        Ok(match criteria.id() {
            Some(id) => entities.contains_key(id),
            None => !entities.is_empty(),
        })
    }

    async fn delete(&self, criteria: &dyn Criteria) -> Result<()> {
        let mut entities = self.write();
        match criteria.id() {
            Some(id) => {
                entities.remove(id);
            }
            None => entities.clear(),
        }
        Ok(())
    }

    async fn save(&self, state: &T) -> Result<()> {
        let mut entities = self.write();
        let stored = entities.get(state.id()).map(Entity::version);
        let version = state.version().get();
        let accepted = match stored {
            None => version == 0,
            Some(stored) => version > 0 && stored.get() == version - 1,
        };
        if !accepted {
            return Err(Error::conflict()
                .with_debug("id", state.id().as_str())
                .with_debug("version", version));
        }
        entities.insert(state.id().clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ErrorKind;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: Id,
        version: PositiveInt,
    }

    impl Entity for Note {
        fn id(&self) -> &Id {
            &self.id
        }

        fn version(&self) -> PositiveInt {
            self.version
        }
    }

    struct All;

    impl Criteria for All {
        fn as_sql(&self) -> SqlCriteria {
            SqlCriteria {
                query: String::from("SELECT * FROM notes"),
                params: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn saves_follow_versions() {
        let repo = MemoryRepository::new();
        let note = Note {
            id: Id::new(),
            version: PositiveInt::zero(),
        };
        repo.save(&note).await.unwrap();
        let err = repo.save(&note).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let updated = Note {
            version: note.version.increment(),
            ..note.clone()
        };
        repo.save(&updated).await.unwrap();

        let by_id = ById::new("notes", note.id.clone());
        assert_eq!(repo.get(&by_id).await.unwrap(), Some(updated));
        assert_eq!(by_id.as_sql().params.len(), 1);

        repo.delete(&by_id).await.unwrap();
        assert!(!repo.exist(&by_id).await.unwrap());
    }

    #[tokio::test]
    async fn listing_pages_with_cursors() {
        let repo = MemoryRepository::new();
        for _ in 0..5 {
            let note = Note {
                id: Id::new(),
                version: PositiveInt::zero(),
            };
            repo.save(&note).await.unwrap();
        }

        let page = ListCriteria {
            cursor: None,
            limit: 3,
        };
        let first = repo.list(&All, &page).await.unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.cursor.is_some());

        let page = ListCriteria {
            cursor: first.cursor,
            limit: 3,
        };
        let second = repo.list(&All, &page).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.cursor, None);
        assert_eq!(ListCriteria::default().limit, 100);
    }
}
