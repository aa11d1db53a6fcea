use super::{AutoGetCollectionForRead, Catalog, CollectionCatalogEntry};
use crate::error::{Error, Result};
use crate::namespace::NamespaceString;
use bson::{Document, doc};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub const ID_INDEX_NAME: &str = "_id_";

/// Storage-engine fault hook: while armed, catalog reads fail with
/// `WriteConflict`, one armed conflict per read step.
#[derive(Debug, Default)]
pub struct WriteConflictInjector {
    armed: AtomicU64,
    fired: AtomicU64,
}

impl WriteConflictInjector {
    pub fn arm(&self, n: u64) {
        self.armed.fetch_add(n, Ordering::SeqCst);
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        let took = self
            .armed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            self.fired.fetch_add(1, Ordering::SeqCst);
            return Err(Error::WriteConflict);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct IndexEntry {
    name: String,
    spec: Document,
}

#[derive(Debug)]
struct CollectionState {
    uuid: Uuid,
    indexes: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    collections: BTreeMap<String, Arc<RwLock<CollectionState>>>,
}

/// Metadata-only catalog kept in memory. Index order is creation order.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    databases: RwLock<BTreeMap<String, Arc<RwLock<DatabaseState>>>>,
    write_conflicts: Arc<WriteConflictInjector>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_conflicts(&self) -> &WriteConflictInjector {
        &self.write_conflicts
    }

    fn database(&self, db: &str) -> Option<Arc<RwLock<DatabaseState>>> {
        self.databases.read().get(db).cloned()
    }

    fn database_or_create(&self, db: &str) -> Arc<RwLock<DatabaseState>> {
        self.databases
            .write()
            .entry(db.to_string())
            .or_default()
            .clone()
    }

    /// Create `ns` with its implicit `_id_` index. Fails if it already exists.
    pub fn create_collection(&self, ns: &NamespaceString) -> Result<Uuid> {
        if !ns.is_valid() {
            return Err(Error::InvalidNamespace(format!("Invalid namespace specified '{}'", ns)));
        }
        let db = self.database_or_create(ns.db());
        let mut db = db.write();
        if db.collections.contains_key(ns.coll()) {
            return Err(Error::NamespaceExists(format!("Collection already exists. NS: {}", ns)));
        }
        let uuid = Uuid::new_v4();
        let id_index = IndexEntry {
            name: ID_INDEX_NAME.to_string(),
            spec: doc! { "v": 2i32, "key": { "_id": 1i32 }, "name": ID_INDEX_NAME, "ns": ns.ns() },
        };
        db.collections.insert(
            ns.coll().to_string(),
            Arc::new(RwLock::new(CollectionState { uuid, indexes: vec![id_index] })),
        );
        tracing::debug!(ns = %ns, %uuid, "created collection");
        Ok(uuid)
    }

    /// Record an index spec. The collection is created implicitly. Returns
    /// false when an index of the same name already exists.
    pub fn create_index(&self, ns: &NamespaceString, spec: Document) -> Result<bool> {
        let name = spec
            .get_str("name")
            .map_err(|_| Error::BadValue("index specification must contain a string 'name' field".into()))?
            .to_string();
        if spec.get_document("key").is_err() {
            return Err(Error::BadValue(format!("index '{}' must contain a 'key' document", name)));
        }
        if self.collection_uuid(ns).is_none() {
            match self.create_collection(ns) {
                Ok(_) | Err(Error::NamespaceExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let db = self
            .database(ns.db())
            .ok_or_else(|| Error::NamespaceNotFound("no database".into()))?;
        let db = db.read();
        let coll = db
            .collections
            .get(ns.coll())
            .ok_or_else(|| Error::NamespaceNotFound("no collection".into()))?;
        let mut coll = coll.write();
        if coll.indexes.iter().any(|i| i.name == name) {
            return Ok(false);
        }
        coll.indexes.push(IndexEntry { name, spec });
        Ok(true)
    }

    pub fn num_indexes(&self, ns: &NamespaceString) -> Option<usize> {
        let db = self.database(ns.db())?;
        let db = db.read();
        let count = db.collections.get(ns.coll()).map(|c| c.read().indexes.len());
        count
    }

    pub fn collection_uuid(&self, ns: &NamespaceString) -> Option<Uuid> {
        let db = self.database(ns.db())?;
        let db = db.read();
        let uuid = db.collections.get(ns.coll()).map(|c| c.read().uuid);
        uuid
    }
}

impl Catalog for MemoryCatalog {
    fn lookup_nss_by_uuid(&self, uuid: &Uuid) -> Option<NamespaceString> {
        let dbs = self.databases.read();
        for (db_name, db) in dbs.iter() {
            let db = db.read();
            for (coll_name, coll) in db.collections.iter() {
                if coll.read().uuid == *uuid {
                    return Some(NamespaceString::new(db_name.clone(), coll_name.clone()));
                }
            }
        }
        None
    }

    fn acquire_collection_for_read(&self, ns: &NamespaceString) -> AutoGetCollectionForRead {
        let Some(db) = self.database(ns.db()) else {
            return AutoGetCollectionForRead::NoDatabase;
        };
        let db = db.read_arc();
        let Some(coll) = db.collections.get(ns.coll()).cloned() else {
            return AutoGetCollectionForRead::NoCollection;
        };
        let coll = coll.read_arc();
        AutoGetCollectionForRead::Found(Box::new(MemoryCollectionEntry {
            ns: ns.clone(),
            coll,
            _db: db,
            write_conflicts: self.write_conflicts.clone(),
        }))
    }
}

/// Read acquisition on one collection; the guards keep DDL out until drop.
struct MemoryCollectionEntry {
    ns: NamespaceString,
    coll: ArcRwLockReadGuard<RawRwLock, CollectionState>,
    _db: ArcRwLockReadGuard<RawRwLock, DatabaseState>,
    write_conflicts: Arc<WriteConflictInjector>,
}

impl CollectionCatalogEntry for MemoryCollectionEntry {
    fn ns(&self) -> &NamespaceString {
        &self.ns
    }

    fn get_all_indexes(&self, names: &mut Vec<String>) -> Result<()> {
        for index in &self.coll.indexes {
            names.push(index.name.clone());
            self.write_conflicts.check()?;
        }
        Ok(())
    }

    fn get_index_spec(&self, index_name: &str) -> Result<Document> {
        self.write_conflicts.check()?;
        self.coll
            .indexes
            .iter()
            .find(|i| i.name == index_name)
            .map(|i| i.spec.clone())
            .ok_or_else(|| Error::Msg(format!("index {} not found on {}", index_name, self.ns)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> NamespaceString {
        NamespaceString::new("db1", "coll")
    }

    #[test]
    fn create_collection_adds_id_index() {
        let cat = MemoryCatalog::new();
        let uuid = cat.create_collection(&ns()).unwrap();
        assert_eq!(cat.lookup_nss_by_uuid(&uuid), Some(ns()));
        let AutoGetCollectionForRead::Found(entry) = cat.acquire_collection_for_read(&ns()) else {
            panic!("collection should exist");
        };
        let mut names = Vec::new();
        entry.get_all_indexes(&mut names).unwrap();
        assert_eq!(names, vec!["_id_".to_string()]);
        assert_eq!(entry.get_index_spec("_id_").unwrap().get_i32("v").unwrap(), 2);
    }

    #[test]
    fn duplicate_collection_is_rejected() {
        let cat = MemoryCatalog::new();
        cat.create_collection(&ns()).unwrap();
        assert!(matches!(cat.create_collection(&ns()), Err(Error::NamespaceExists(_))));
    }

    #[test]
    fn indexes_keep_creation_order() {
        let cat = MemoryCatalog::new();
        for name in ["z_1", "a_1", "m_1"] {
            assert!(cat.create_index(&ns(), doc! { "v": 2, "key": { name: 1 }, "name": name }).unwrap());
        }
        assert!(!cat.create_index(&ns(), doc! { "v": 2, "key": { "a": 1 }, "name": "a_1" }).unwrap());
        let AutoGetCollectionForRead::Found(entry) = cat.acquire_collection_for_read(&ns()) else {
            panic!("collection should exist");
        };
        let mut names = Vec::new();
        entry.get_all_indexes(&mut names).unwrap();
        assert_eq!(names, vec!["_id_", "z_1", "a_1", "m_1"]);
    }

    #[test]
    fn acquisition_reports_missing_db_and_collection() {
        let cat = MemoryCatalog::new();
        assert!(matches!(cat.acquire_collection_for_read(&ns()), AutoGetCollectionForRead::NoDatabase));
        cat.create_collection(&NamespaceString::new("db1", "other")).unwrap();
        assert!(matches!(cat.acquire_collection_for_read(&ns()), AutoGetCollectionForRead::NoCollection));
    }

    #[test]
    fn armed_conflicts_interrupt_enumeration_mid_way() {
        let cat = MemoryCatalog::new();
        cat.create_index(&ns(), doc! { "key": { "a": 1 }, "name": "a_1" }).unwrap();
        cat.write_conflicts().arm(1);
        let AutoGetCollectionForRead::Found(entry) = cat.acquire_collection_for_read(&ns()) else {
            panic!("collection should exist");
        };
        let mut names = Vec::new();
        assert!(matches!(entry.get_all_indexes(&mut names), Err(Error::WriteConflict)));
        assert_eq!(names.len(), 1);
        assert_eq!(cat.write_conflicts().fired(), 1);
    }

    #[test]
    fn index_spec_requires_name_and_key() {
        let cat = MemoryCatalog::new();
        assert!(matches!(cat.create_index(&ns(), doc! { "key": { "a": 1 } }), Err(Error::BadValue(_))));
        assert!(matches!(cat.create_index(&ns(), doc! { "name": "a_1" }), Err(Error::BadValue(_))));
    }
}
