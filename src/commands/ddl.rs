//! `create` and `createIndexes`. Both only record metadata; no data is
//! stored and no index is ever built.

use crate::auth::{ActionType, ResourcePattern};
use crate::catalog::MemoryCatalog;
use crate::error::{Error, Result};
use crate::namespace::NamespaceString;
use crate::operation::OperationContext;
use bson::{Bson, Document, doc};

const DEFAULT_INDEX_VERSION: i32 = 2;

fn target_ns(cmd_name: &str, dbname: &str, cmd: &Document) -> Result<NamespaceString> {
    let coll = cmd
        .get_str(cmd_name)
        .map_err(|_| Error::TypeMismatch(format!("collection name for {} must be a string", cmd_name)))?;
    let nss = NamespaceString::new(dbname, coll);
    if !nss.is_valid() {
        return Err(Error::InvalidNamespace(format!("Invalid namespace specified '{}'", nss)));
    }
    Ok(nss)
}

fn require(op_ctx: &OperationContext<'_>, nss: &NamespaceString, action: ActionType) -> Result<()> {
    if op_ctx
        .authz()
        .is_authorized_for_actions_on_resource(&ResourcePattern::for_exact_namespace(nss), action)
    {
        return Ok(());
    }
    Err(Error::Unauthorized(format!("not authorized on {} to execute command", nss.db())))
}

pub fn create(op_ctx: &OperationContext<'_>, catalog: &MemoryCatalog, dbname: &str, cmd: &Document) -> Result<Document> {
    let nss = target_ns("create", dbname, cmd)?;
    require(op_ctx, &nss, ActionType::CreateCollection)?;
    catalog.create_collection(&nss)?;
    Ok(doc! { "ok": 1.0 })
}

pub fn create_indexes(
    op_ctx: &OperationContext<'_>,
    catalog: &MemoryCatalog,
    dbname: &str,
    cmd: &Document,
) -> Result<Document> {
    let nss = target_ns("createIndexes", dbname, cmd)?;
    require(op_ctx, &nss, ActionType::CreateIndex)?;
    let specs = match cmd.get("indexes") {
        Some(Bson::Array(specs)) if !specs.is_empty() => specs,
        Some(Bson::Array(_)) => return Err(Error::BadValue("Must specify at least one index to create".into())),
        _ => return Err(Error::TypeMismatch("indexes field must be an array of index specifications".into())),
    };
    let specs = specs
        .iter()
        .map(|s| match s {
            Bson::Document(spec) => normalize_spec(&nss, spec),
            _ => Err(Error::TypeMismatch("each index specification must be an object".into())),
        })
        .collect::<Result<Vec<_>>>()?;

    let before = catalog.num_indexes(&nss);
    for spec in specs {
        catalog.create_index(&nss, spec)?;
    }
    let after = catalog.num_indexes(&nss).unwrap_or(0);
    tracing::debug!(ns = %nss, before = ?before, after, "createIndexes");

    let num_before = before.unwrap_or(0) as i32;
    let num_after = after as i32;
    let mut reply = doc! {
        "createdCollectionAutomatically": before.is_none(),
        "numIndexesBefore": num_before,
        "numIndexesAfter": num_after,
    };
    if before == Some(after) {
        reply.insert("note", "all indexes already exist");
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

/// Stored form: `v`, `key`, `name`, `ns`, then any remaining options in
/// the order given.
fn normalize_spec(nss: &NamespaceString, spec: &Document) -> Result<Document> {
    let key = spec
        .get_document("key")
        .map_err(|_| Error::BadValue("index specification must contain a 'key' object".into()))?;
    if key.is_empty() {
        return Err(Error::BadValue("index key pattern must not be empty".into()));
    }
    let name = spec
        .get_str("name")
        .map_err(|_| Error::BadValue("index specification must contain a string 'name' field".into()))?;
    if let Ok(ns) = spec.get_str("ns") {
        if ns != nss.ns() {
            return Err(Error::BadValue(format!(
                "namespace '{}' in index spec does not match target namespace '{}'",
                ns, nss
            )));
        }
    }
    let version = spec.get("v").cloned().unwrap_or(Bson::Int32(DEFAULT_INDEX_VERSION));

    let mut out = doc! { "v": version, "key": key.clone(), "name": name, "ns": nss.ns() };
    for (k, v) in spec {
        if !matches!(k.as_str(), "v" | "key" | "name" | "ns") {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationSession, Privilege, UserName};

    #[test]
    fn create_then_duplicate() {
        let cat = MemoryCatalog::new();
        let authz = AuthorizationSession::unrestricted();
        let op_ctx = OperationContext::new(&authz);
        assert_eq!(create(&op_ctx, &cat, "db1", &doc! { "create": "coll" }).unwrap().get_f64("ok").unwrap(), 1.0);
        assert_eq!(create(&op_ctx, &cat, "db1", &doc! { "create": "coll" }).unwrap_err().code(), 48);
        assert_eq!(cat.num_indexes(&NamespaceString::new("db1", "coll")), Some(1));
    }

    #[test]
    fn create_indexes_reports_counts() {
        let cat = MemoryCatalog::new();
        let authz = AuthorizationSession::unrestricted();
        let op_ctx = OperationContext::new(&authz);
        let cmd = doc! {
            "createIndexes": "coll",
            "indexes": [
                { "key": { "a": 1i32 }, "name": "a_1", "unique": true },
                { "key": { "b": -1i32 }, "name": "b_-1" }
            ]
        };
        let reply = create_indexes(&op_ctx, &cat, "db1", &cmd).unwrap();
        assert!(reply.get_bool("createdCollectionAutomatically").unwrap());
        assert_eq!(reply.get_i32("numIndexesBefore").unwrap(), 0);
        assert_eq!(reply.get_i32("numIndexesAfter").unwrap(), 3);

        let again = create_indexes(&op_ctx, &cat, "db1", &cmd).unwrap();
        assert!(!again.get_bool("createdCollectionAutomatically").unwrap());
        assert_eq!(again.get_i32("numIndexesBefore").unwrap(), 3);
        assert_eq!(again.get_str("note").unwrap(), "all indexes already exist");
    }

    #[test]
    fn spec_is_normalized() {
        let nss = NamespaceString::new("db1", "coll");
        let spec = normalize_spec(&nss, &doc! { "unique": true, "name": "a_1", "key": { "a": 1i32 } }).unwrap();
        assert_eq!(spec.keys().collect::<Vec<_>>(), vec!["v", "key", "name", "ns", "unique"]);
        assert_eq!(spec.get_i32("v").unwrap(), 2);
        assert_eq!(spec.get_str("ns").unwrap(), "db1.coll");
        assert!(normalize_spec(&nss, &doc! { "name": "a_1", "key": {} }).is_err());
        assert!(normalize_spec(&nss, &doc! { "name": "a_1", "key": { "a": 1i32 }, "ns": "db2.coll" }).is_err());
    }

    #[test]
    fn requires_privilege() {
        let cat = MemoryCatalog::new();
        let mut authz = AuthorizationSession::enforced();
        authz.add_authenticated_user(
            UserName::new("u", "admin"),
            vec![Privilege::new(ResourcePattern::Database("db1".into()), [ActionType::CreateCollection])],
        );
        let op_ctx = OperationContext::new(&authz);
        assert!(create(&op_ctx, &cat, "db1", &doc! { "create": "coll" }).is_ok());
        let cmd = doc! { "createIndexes": "coll", "indexes": [{ "key": { "a": 1i32 }, "name": "a_1" }] };
        assert_eq!(create_indexes(&op_ctx, &cat, "db1", &cmd).unwrap_err().code(), 13);
    }
}
