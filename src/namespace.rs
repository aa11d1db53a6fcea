// Namespace handling: "db.coll" strings, the synthetic listIndexes cursor
// namespace, and the legacy system.indexes namespace used by authorization.

use std::fmt;

const LIST_INDEXES_CURSOR_PREFIX: &str = "$cmd.listIndexes.";
const SYSTEM_INDEXES: &str = "system.indexes";

/// The feature-compatibility-version document lives here.
pub const FCV_DB: &str = "admin";
pub const FCV_COLLECTION: &str = "system.version";
/// Index on the FCV collection that 3.2 binaries must never see with an integer `v`.
pub const FCV_32_INCOMPATIBLE_INDEX: &str = "incompatible_with_version_32";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceString {
    db: String,
    coll: String,
}

impl NamespaceString {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Split a fully-qualified "db.coll" string at the first dot.
    pub fn parse(ns: &str) -> Option<Self> {
        ns.split_once('.').map(|(db, coll)| Self::new(db, coll))
    }

    /// `<db>.$cmd.listIndexes.<coll>`
    pub fn make_list_indexes_nss(db: &str, coll: &str) -> Self {
        Self::new(db, format!("{}{}", LIST_INDEXES_CURSOR_PREFIX, coll))
    }

    /// `<db>.system.indexes`, the namespace pre-3.0 grants were written against.
    pub fn system_indexes(db: &str) -> Self {
        Self::new(db, SYSTEM_INDEXES)
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    pub fn ns(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }

    pub fn is_valid(&self) -> bool {
        valid_db_name(&self.db) && valid_collection_name(&self.coll)
    }

    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }

    pub fn is_list_indexes_cursor_ns(&self) -> bool {
        self.coll.len() > LIST_INDEXES_CURSOR_PREFIX.len()
            && self.coll.starts_with(LIST_INDEXES_CURSOR_PREFIX)
    }

    /// Inverse of [`NamespaceString::make_list_indexes_nss`].
    pub fn target_ns_for_list_indexes(&self) -> Option<NamespaceString> {
        if !self.is_list_indexes_cursor_ns() {
            return None;
        }
        let coll = &self.coll[LIST_INDEXES_CURSOR_PREFIX.len()..];
        Some(NamespaceString::new(self.db.clone(), coll))
    }
}

impl fmt::Display for NamespaceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

fn valid_db_name(db: &str) -> bool {
    !db.is_empty()
        && db.len() < 64
        && !db.chars().any(|c| matches!(c, '.' | '/' | '\\' | ' ' | '"' | '$' | '\0'))
}

fn valid_collection_name(coll: &str) -> bool {
    !coll.is_empty() && !coll.starts_with('.') && !coll.contains('\0')
}
