//! `listIndexes`: every index spec of one collection, returned through a
//! cursor so large index sets are paged under the reply size limit.
//!
//! ```text
//! { listIndexes: <coll name | UUID>, cursor: { batchSize: <n> } }
//! => { cursor: { id, ns: "<db>.$cmd.listIndexes.<coll>", firstBatch: [...] }, ok: 1 }
//! ```

use super::{cursor_response, parse_command_cursor_options};
use crate::auth::{ActionType, AuthorizationSession, ResourcePattern};
use crate::catalog::{AutoGetCollectionForRead, Catalog};
use crate::concurrency::{write_conflict_retry, write_conflict_retry_into};
use crate::cursor::{ClientCursorParams, CursorId, CursorManager};
use crate::decimal;
use crate::error::{Error, Result};
use crate::exec::{ExecState, PlanExecutor, QueuedDataStage};
use crate::find_common::{BatchBuilder, ReplyBudget};
use crate::namespace::{FCV_32_INCOMPATIBLE_INDEX, FCV_COLLECTION, FCV_DB, NamespaceString};
use crate::operation::OperationContext;
use bson::spec::BinarySubtype;
use bson::{Bson, Document};
use uuid::Uuid;

const COMMAND_NAME: &str = "listIndexes";

/// Rewrites applied to one stored spec on its way out, keyed by
/// `(db, collection, index name)`. Stored bytes are never touched.
type SpecFilter = fn(Document) -> Document;

const SPEC_FILTERS: &[(&str, &str, &str, SpecFilter)] = &[
    // 3.2 secondaries crash during initial sync on an integer `v` here but
    // reject a decimal one cleanly.
    (FCV_DB, FCV_COLLECTION, FCV_32_INCOMPATIBLE_INDEX, index_version_as_decimal),
];

pub fn run<C: Catalog + ?Sized>(
    op_ctx: &OperationContext<'_>,
    catalog: &C,
    cursors: &CursorManager,
    budget: ReplyBudget,
    dbname: &str,
    cmd: &Document,
) -> Result<Document> {
    let nss = parse_ns_or_uuid(catalog, dbname, cmd)?;
    let batch_size = parse_command_cursor_options(cmd, i64::MAX)?;
    check_auth_for_list_indexes(op_ctx.authz(), &nss)?;

    let specs = read_index_specs(catalog, &nss)?;

    let cursor_nss = NamespaceString::make_list_indexes_nss(dbname, nss.coll());
    debug_assert_eq!(cursor_nss.target_ns_for_list_indexes().as_ref(), Some(&nss));

    let mut root = QueuedDataStage::new();
    for spec in specs {
        root.push_back(spec);
    }
    let mut exec = PlanExecutor::new(op_ctx, root, cursor_nss.clone());

    let mut first_batch = BatchBuilder::new();
    let mut obj_count: i64 = 0;
    while obj_count < batch_size {
        let next = match exec.get_next() {
            ExecState::Advanced(doc) => doc,
            ExecState::Eof => break,
        };
        if !budget.have_space_for_next(&next, &first_batch) {
            exec.enqueue(next);
            break;
        }
        first_batch.append(next);
        obj_count += 1;
    }

    let mut cursor_id: CursorId = 0;
    if !exec.is_eof() {
        exec.save_state();
        exec.detach_from_operation_context();
        cursor_id = cursors.register_cursor(ClientCursorParams {
            exec,
            nss: cursor_nss.clone(),
            authenticated_users: op_ctx.authz().authenticated_user_names(),
            is_read_committed: op_ctx.is_reading_from_majority_committed_snapshot(),
            originating_command: cmd.clone(),
        });
    }
    tracing::debug!(ns = %nss, returned = first_batch.len(), cursor_id, "listIndexes");

    Ok(cursor_response(cursor_id, &cursor_nss.ns(), "firstBatch", first_batch.into_array()))
}

/// The target collection, named directly or by UUID. A UUID must resolve to
/// a collection in `dbname`.
fn parse_ns_or_uuid<C: Catalog + ?Sized>(catalog: &C, dbname: &str, cmd: &Document) -> Result<NamespaceString> {
    match cmd.get(COMMAND_NAME) {
        Some(Bson::String(coll)) => {
            let nss = NamespaceString::new(dbname, coll.as_str());
            if !nss.is_valid() {
                return Err(Error::InvalidNamespace(format!("Invalid namespace specified '{}'", nss)));
            }
            Ok(nss)
        }
        Some(Bson::Binary(bin)) if bin.subtype == BinarySubtype::Uuid => {
            let uuid = Uuid::from_slice(&bin.bytes)
                .map_err(|e| Error::BadValue(format!("invalid UUID in {} command: {}", COMMAND_NAME, e)))?;
            match catalog.lookup_nss_by_uuid(&uuid) {
                Some(nss) if nss.is_valid() && nss.db() == dbname => Ok(nss),
                _ => Err(Error::NamespaceNotFound(format!(
                    "UUID {} specified in {} command not found in {}",
                    uuid, COMMAND_NAME, dbname
                ))),
            }
        }
        Some(other) => Err(Error::InvalidNamespace(format!(
            "collection name has invalid type {}",
            type_name(other)
        ))),
        None => Err(Error::InvalidNamespace("collection name has invalid type missing".into())),
    }
}

/// `listIndexes` on the collection, or `find` on `<db>.system.indexes` for
/// grants written before the dedicated action existed.
pub fn check_auth_for_list_indexes(authz: &AuthorizationSession, nss: &NamespaceString) -> Result<()> {
    let on_collection = ResourcePattern::for_exact_namespace(nss);
    let on_system_indexes = ResourcePattern::for_exact_namespace(&NamespaceString::system_indexes(nss.db()));
    if authz.is_authorized_for_actions_on_resource(&on_collection, ActionType::ListIndexes)
        || authz.is_authorized_for_actions_on_resource(&on_system_indexes, ActionType::Find)
    {
        return Ok(());
    }
    Err(Error::Unauthorized(format!(
        "Not authorized to list indexes on collection: {}",
        nss.coll()
    )))
}

/// Names then specs, all under one read acquisition, each read retried on
/// write conflict. Specs come back filtered and in catalog order.
fn read_index_specs<C: Catalog + ?Sized>(catalog: &C, nss: &NamespaceString) -> Result<Vec<Document>> {
    let entry = match catalog.acquire_collection_for_read(nss) {
        AutoGetCollectionForRead::NoDatabase => return Err(Error::NamespaceNotFound("no database".into())),
        AutoGetCollectionForRead::NoCollection => return Err(Error::NamespaceNotFound("no collection".into())),
        AutoGetCollectionForRead::Found(entry) => entry,
    };
    let ns = nss.ns();

    let mut index_names: Vec<String> = Vec::new();
    write_conflict_retry_into(COMMAND_NAME, &ns, &mut index_names, |names| entry.get_all_indexes(names))?;

    let mut specs = Vec::with_capacity(index_names.len());
    for name in &index_names {
        let spec = write_conflict_retry(COMMAND_NAME, &ns, || entry.get_index_spec(name))?;
        specs.push(apply_spec_filter(nss, name, spec));
    }
    Ok(specs)
}

fn apply_spec_filter(nss: &NamespaceString, index_name: &str, spec: Document) -> Document {
    let filter = SPEC_FILTERS
        .iter()
        .find(|(db, coll, index, _)| nss.db() == *db && nss.coll() == *coll && index_name == *index);
    match filter {
        Some((_, _, _, f)) => f(spec),
        None => spec,
    }
}

/// Same fields in the same order, with `v` re-encoded as Decimal128.
fn index_version_as_decimal(spec: Document) -> Document {
    spec.into_iter()
        .map(|(key, value)| {
            if key == "v" {
                let v = match value {
                    Bson::Int32(n) => decimal::from_i64(n as i64),
                    Bson::Int64(n) => decimal::from_i64(n),
                    Bson::Double(f) => decimal::from_f64(f),
                    Bson::Decimal128(d) => d,
                    _ => decimal::from_i64(0),
                };
                (key, Bson::Decimal128(v))
            } else {
                (key, value)
            }
        })
        .collect()
}

fn type_name(b: &Bson) -> &'static str {
    match b {
        Bson::Double(_) => "double",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        _ => "unknown",
    }
}
