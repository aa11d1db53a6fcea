//! `getMore`: resume a registered cursor.

use super::{cursor_response, list_indexes, number_as_i64};
use crate::auth::{ActionType, AuthorizationSession, ResourcePattern, UserName};
use crate::cursor::{CursorId, CursorManager};
use crate::error::{Error, Result};
use crate::exec::ExecState;
use crate::find_common::{BatchBuilder, ReplyBudget};
use crate::namespace::NamespaceString;
use crate::operation::OperationContext;
use bson::{Bson, Document};

struct GetMoreRequest {
    cursor_id: CursorId,
    nss: NamespaceString,
    batch_size: i64,
}

fn parse(dbname: &str, cmd: &Document) -> Result<GetMoreRequest> {
    let cursor_id = match cmd.get("getMore") {
        Some(Bson::Int64(id)) => *id,
        _ => return Err(Error::TypeMismatch("Field 'getMore' must be of type long".into())),
    };
    let coll = match cmd.get("collection") {
        Some(Bson::String(c)) => c.as_str(),
        _ => return Err(Error::TypeMismatch("Field 'collection' must be of type string".into())),
    };
    let nss = NamespaceString::new(dbname, coll);
    if !nss.is_valid() {
        return Err(Error::InvalidNamespace(format!("Invalid namespace for getMore: {}", nss)));
    }
    let batch_size = match cmd.get("batchSize") {
        None => i64::MAX,
        Some(b) => {
            let n = number_as_i64(b)
                .ok_or_else(|| Error::TypeMismatch("Field 'batchSize' must be a number".into()))?;
            if n <= 0 {
                return Err(Error::BadValue(format!(
                    "Batch size for getMore must be positive, but received: {}",
                    n
                )));
            }
            n
        }
    };
    Ok(GetMoreRequest { cursor_id, nss, batch_size })
}

/// Ownership and privilege checks, made before the cursor is touched.
fn check_auth(
    authz: &AuthorizationSession,
    req: &GetMoreRequest,
    cursor_nss: &NamespaceString,
    owners: &[UserName],
) -> Result<()> {
    if &req.nss != cursor_nss {
        return Err(Error::Unauthorized(format!(
            "Requested getMore on namespace '{}', but cursor belongs to a different namespace {}",
            req.nss, cursor_nss
        )));
    }
    if !authz.is_coauthorized_with(owners) {
        return Err(Error::Unauthorized(format!(
            "cursor id {} was not created by the authenticated user",
            req.cursor_id
        )));
    }
    if let Some(target) = cursor_nss.target_ns_for_list_indexes() {
        return list_indexes::check_auth_for_list_indexes(authz, &target);
    }
    if authz.is_authorized_for_actions_on_resource(&ResourcePattern::for_exact_namespace(cursor_nss), ActionType::Find) {
        return Ok(());
    }
    Err(Error::Unauthorized(format!("not authorized for getMore on {}", cursor_nss)))
}

pub fn run(
    op_ctx: &OperationContext<'_>,
    cursors: &CursorManager,
    budget: ReplyBudget,
    dbname: &str,
    cmd: &Document,
) -> Result<Document> {
    let req = parse(dbname, cmd)?;
    let (cursor_nss, owners) = cursors
        .describe(req.cursor_id)
        .ok_or_else(|| Error::CursorNotFound(format!("cursor id {} not found", req.cursor_id)))?;
    check_auth(op_ctx.authz(), &req, &cursor_nss, &owners)?;

    let mut cursor = cursors.pin_cursor(req.cursor_id)?;
    let exec = cursor.exec_mut();
    exec.reattach_to_operation_context(op_ctx);
    exec.restore_state();

    let mut next_batch = BatchBuilder::new();
    let mut obj_count: i64 = 0;
    while obj_count < req.batch_size {
        let next = match exec.get_next() {
            ExecState::Advanced(doc) => doc,
            ExecState::Eof => break,
        };
        if !budget.have_space_for_next(&next, &next_batch) {
            exec.enqueue(next);
            break;
        }
        next_batch.append(next);
        obj_count += 1;
    }

    let mut cursor_id = req.cursor_id;
    if exec.is_eof() {
        cursors.erase(cursor_id);
        cursor_id = 0;
    } else {
        exec.save_state();
        exec.detach_from_operation_context();
        if !cursors.return_cursor(cursor) {
            cursor_id = 0;
        }
    }
    tracing::debug!(ns = %cursor_nss, returned = next_batch.len(), cursor_id, "getMore");

    Ok(cursor_response(cursor_id, &cursor_nss.ns(), "nextBatch", next_batch.into_array()))
}
