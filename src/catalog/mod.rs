//! Catalog seam: what command handlers may ask of the metadata store.
//!
//! A read acquisition holds read intent on the database and the collection
//! for as long as it lives, so every read made through one
//! [`CollectionCatalogEntry`] observes the same set of indexes. Reads may
//! still fail with [`Error::WriteConflict`](crate::error::Error::WriteConflict);
//! callers wrap them in [`write_conflict_retry`](crate::concurrency::write_conflict_retry).

pub mod memory;

pub use memory::{MemoryCatalog, WriteConflictInjector};

use crate::error::Result;
use crate::namespace::NamespaceString;
use bson::Document;
use uuid::Uuid;

pub trait CollectionCatalogEntry {
    fn ns(&self) -> &NamespaceString;

    /// Append every index name, in catalog order, to `names`. On error the
    /// vector may hold a partial listing.
    fn get_all_indexes(&self, names: &mut Vec<String>) -> Result<()>;

    fn get_index_spec(&self, index_name: &str) -> Result<Document>;
}

/// Outcome of acquiring a collection for reading.
pub enum AutoGetCollectionForRead {
    NoDatabase,
    NoCollection,
    Found(Box<dyn CollectionCatalogEntry>),
}

pub trait Catalog: Send + Sync {
    fn lookup_nss_by_uuid(&self, uuid: &Uuid) -> Option<NamespaceString>;

    /// Blocks until read intent on `ns`'s database and collection is held.
    fn acquire_collection_for_read(&self, ns: &NamespaceString) -> AutoGetCollectionForRead;
}
