//! `killCursors`: destroy cursors by id.

use crate::auth::{ActionType, ResourcePattern};
use crate::cursor::{CursorId, CursorManager};
use crate::error::{Error, Result};
use crate::namespace::NamespaceString;
use crate::operation::OperationContext;
use bson::{Bson, Document, doc};

pub fn run(op_ctx: &OperationContext<'_>, cursors: &CursorManager, dbname: &str, cmd: &Document) -> Result<Document> {
    let coll = match cmd.get("killCursors") {
        Some(Bson::String(c)) => c.as_str(),
        _ => return Err(Error::TypeMismatch("Field 'killCursors' must be of type string".into())),
    };
    let nss = NamespaceString::new(dbname, coll);
    let ids = match cmd.get("cursors") {
        Some(Bson::Array(ids)) => ids
            .iter()
            .map(|b| match b {
                Bson::Int64(id) => Ok(*id),
                _ => Err(Error::TypeMismatch("Field 'cursors' must contain only longs".into())),
            })
            .collect::<Result<Vec<CursorId>>>()?,
        _ => return Err(Error::TypeMismatch("Field 'cursors' must be of type array".into())),
    };
    if ids.is_empty() {
        return Err(Error::BadValue("Must specify at least one cursor id in: cursors".into()));
    }

    // killCursors on the target namespace lets a user kill cursors they do not own.
    let resource = match nss.target_ns_for_list_indexes() {
        Some(target) => ResourcePattern::for_exact_namespace(&target),
        None => ResourcePattern::for_exact_namespace(&nss),
    };
    let authz = op_ctx.authz();
    let may_kill_any = authz.is_enforced() && authz.is_authorized_for_actions_on_resource(&resource, ActionType::KillCursors);

    let mut killed = Vec::new();
    let mut not_found = Vec::new();
    for id in ids {
        let killable = match cursors.describe(id) {
            Some((owner_nss, owners)) => owner_nss == nss && (may_kill_any || authz.is_coauthorized_with(&owners)),
            None => false,
        };
        if killable && cursors.erase(id) {
            killed.push(id);
        } else {
            not_found.push(id);
        }
    }
    tracing::debug!(ns = %nss, killed = killed.len(), not_found = not_found.len(), "killCursors");

    Ok(doc! {
        "cursorsKilled": killed,
        "cursorsNotFound": not_found,
        "cursorsAlive": Vec::<Bson>::new(),
        "cursorsUnknown": Vec::<Bson>::new(),
        "ok": 1.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationSession, Privilege, UserName};
    use crate::catalog::MemoryCatalog;
    use crate::commands::list_indexes;
    use crate::find_common::ReplyBudget;

    fn open_cursor(authz: &AuthorizationSession, cat: &MemoryCatalog, cursors: &CursorManager) -> CursorId {
        let cmd = doc! { "listIndexes": "coll", "cursor": { "batchSize": 0i32 } };
        let reply = list_indexes::run(&OperationContext::new(authz), cat, cursors, ReplyBudget::new(1 << 20), "db1", &cmd).unwrap();
        reply.get_document("cursor").unwrap().get_i64("id").unwrap()
    }

    fn catalog() -> MemoryCatalog {
        let cat = MemoryCatalog::new();
        cat.create_collection(&NamespaceString::new("db1", "coll")).unwrap();
        cat
    }

    fn ids(reply: &Document, field: &str) -> Vec<i64> {
        reply.get_array(field).unwrap().iter().map(|b| b.as_i64().unwrap()).collect()
    }

    #[test]
    fn kills_known_and_reports_unknown() {
        let cat = catalog();
        let cursors = CursorManager::new();
        let authz = AuthorizationSession::unrestricted();
        let id = open_cursor(&authz, &cat, &cursors);
        let cmd = doc! { "killCursors": "$cmd.listIndexes.coll", "cursors": [id, 12345i64] };
        let reply = run(&OperationContext::new(&authz), &cursors, "db1", &cmd).unwrap();
        assert_eq!(ids(&reply, "cursorsKilled"), vec![id]);
        assert_eq!(ids(&reply, "cursorsNotFound"), vec![12345]);
        assert!(cursors.is_empty());
    }

    #[test]
    fn wrong_namespace_is_not_found() {
        let cat = catalog();
        let cursors = CursorManager::new();
        let authz = AuthorizationSession::unrestricted();
        let id = open_cursor(&authz, &cat, &cursors);
        let cmd = doc! { "killCursors": "coll", "cursors": [id] };
        let reply = run(&OperationContext::new(&authz), &cursors, "db1", &cmd).unwrap();
        assert_eq!(ids(&reply, "cursorsNotFound"), vec![id]);
        assert_eq!(cursors.len(), 1);
    }

    #[test]
    fn only_owner_or_privileged_user_may_kill() {
        let cat = catalog();
        let cursors = CursorManager::new();
        let coll = NamespaceString::new("db1", "coll");
        let mut alice = AuthorizationSession::enforced();
        alice.add_authenticated_user(
            UserName::new("alice", "admin"),
            vec![Privilege::new(ResourcePattern::for_exact_namespace(&coll), [ActionType::ListIndexes])],
        );
        let mut bob = AuthorizationSession::enforced();
        bob.add_authenticated_user(UserName::new("bob", "admin"), vec![]);
        let mut admin = AuthorizationSession::enforced();
        admin.add_authenticated_user(
            UserName::new("root", "admin"),
            vec![Privilege::new(ResourcePattern::for_exact_namespace(&coll), [ActionType::KillCursors])],
        );

        let id = open_cursor(&alice, &cat, &cursors);
        let cmd = doc! { "killCursors": "$cmd.listIndexes.coll", "cursors": [id] };
        let reply = run(&OperationContext::new(&bob), &cursors, "db1", &cmd).unwrap();
        assert_eq!(ids(&reply, "cursorsNotFound"), vec![id]);
        let reply = run(&OperationContext::new(&admin), &cursors, "db1", &cmd).unwrap();
        assert_eq!(ids(&reply, "cursorsKilled"), vec![id]);
    }

    #[test]
    fn rejects_malformed_requests() {
        let cursors = CursorManager::new();
        let authz = AuthorizationSession::unrestricted();
        let op_ctx = OperationContext::new(&authz);
        assert_eq!(run(&op_ctx, &cursors, "db1", &doc! { "killCursors": 1i32, "cursors": [1i64] }).unwrap_err().code(), 14);
        assert_eq!(run(&op_ctx, &cursors, "db1", &doc! { "killCursors": "c", "cursors": [1i32] }).unwrap_err().code(), 14);
        assert_eq!(run(&op_ctx, &cursors, "db1", &doc! { "killCursors": "c", "cursors": [] }).unwrap_err().code(), 2);
    }
}
