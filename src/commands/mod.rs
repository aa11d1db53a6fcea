//! Command dispatch. Every handler returns `Result<Document>`; errors are
//! folded into the standard `{ok: 0, code, errmsg}` envelope here and never
//! escape to the connection loop.

pub mod ddl;
pub mod get_more;
pub mod kill_cursors;
pub mod list_indexes;
pub mod sasl;

use crate::auth::scram::ScramConversation;
use crate::auth::{AuthorizationSession, UserRegistry};
use crate::catalog::MemoryCatalog;
use crate::cursor::{CursorId, CursorManager};
use crate::error::{Error, Result};
use crate::find_common::ReplyBudget;
use crate::operation::OperationContext;
use bson::{Bson, Document, doc};
use std::sync::Arc;
use std::time::Instant;

/// Server-wide state shared by every connection.
pub struct ServiceContext {
    pub catalog: Arc<MemoryCatalog>,
    pub cursors: CursorManager,
    pub budget: ReplyBudget,
    pub users: UserRegistry,
    pub auth_enabled: bool,
    pub started_at: Instant,
}

impl ServiceContext {
    pub fn new(catalog: Arc<MemoryCatalog>, budget: ReplyBudget, users: UserRegistry, auth_enabled: bool) -> Self {
        Self {
            catalog,
            cursors: CursorManager::new(),
            budget,
            users,
            auth_enabled,
            started_at: Instant::now(),
        }
    }

    /// A fresh per-connection session honoring the server's auth mode.
    pub fn new_client(&self) -> ClientSession {
        let authz = if self.auth_enabled {
            AuthorizationSession::enforced()
        } else {
            AuthorizationSession::unrestricted()
        };
        ClientSession { authz, sasl: None }
    }
}

/// Per-connection state.
pub struct ClientSession {
    pub authz: AuthorizationSession,
    pub sasl: Option<ScramConversation>,
}

/// Commands a client may run before logging in.
const UNAUTHENTICATED_COMMANDS: &[&str] = &[
    "hello",
    "isMaster",
    "ismaster",
    "ping",
    "buildInfo",
    "buildinfo",
    "saslStart",
    "saslContinue",
];

pub fn run_command(svc: &ServiceContext, client: &mut ClientSession, db: Option<&str>, cmd: &Document) -> Document {
    // command name is the first key in the doc
    let cmd_name = cmd.keys().next().map(|k| k.as_str()).unwrap_or("");
    match dispatch(svc, client, db, cmd_name, cmd) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::debug!(command = cmd_name, code = e.code(), error = %e, "command failed");
            error_doc(&e)
        }
    }
}

fn dispatch(
    svc: &ServiceContext,
    client: &mut ClientSession,
    db: Option<&str>,
    cmd_name: &str,
    cmd: &Document,
) -> Result<Document> {
    if client.authz.is_enforced() && !client.authz.is_authenticated() && !UNAUTHENTICATED_COMMANDS.contains(&cmd_name) {
        return Err(Error::Unauthorized(format!("command {} requires authentication", cmd_name)));
    }
    match cmd_name {
        "hello" | "ismaster" | "isMaster" => Ok(hello_reply(svc)),
        "ping" => Ok(doc! { "ok": 1.0 }),
        "buildInfo" | "buildinfo" => Ok(build_info_reply(svc)),
        "saslStart" => sasl::sasl_start(svc, client, require_db(db)?, cmd),
        "saslContinue" => sasl::sasl_continue(svc, client, cmd),
        _ => {
            let dbname = require_db(db)?;
            let op_ctx = OperationContext::for_command(&client.authz, cmd);
            match cmd_name {
                "create" => ddl::create(&op_ctx, &svc.catalog, dbname, cmd),
                "createIndexes" => ddl::create_indexes(&op_ctx, &svc.catalog, dbname, cmd),
                "listIndexes" => list_indexes::run(&op_ctx, svc.catalog.as_ref(), &svc.cursors, svc.budget, dbname, cmd),
                "getMore" => get_more::run(&op_ctx, &svc.cursors, svc.budget, dbname, cmd),
                "killCursors" => kill_cursors::run(&op_ctx, &svc.cursors, dbname, cmd),
                _ => Err(Error::CommandNotFound(format!("no such command: '{}'", cmd_name))),
            }
        }
    }
}

fn require_db(db: Option<&str>) -> Result<&str> {
    db.ok_or_else(|| Error::BadValue("Missing $db".into()))
}

pub fn error_doc(e: &Error) -> Document {
    doc! { "ok": 0.0, "errmsg": e.to_string(), "code": e.code(), "codeName": e.code_name() }
}

/// Standard cursor reply; `batch_field` is `firstBatch` or `nextBatch`.
pub fn cursor_response(cursor_id: CursorId, ns: &str, batch_field: &str, batch: Vec<Bson>) -> Document {
    doc! {
        "cursor": { "id": cursor_id, "ns": ns, batch_field: batch },
        "ok": 1.0
    }
}

/// Read `cursor.batchSize` from a command, enforcing the shape of the
/// `cursor` sub-document.
pub fn parse_command_cursor_options(cmd: &Document, default_batch_size: i64) -> Result<i64> {
    let cursor = match cmd.get("cursor") {
        None => return Ok(default_batch_size),
        Some(Bson::Document(c)) => c,
        Some(_) => return Err(Error::TypeMismatch("cursor field must be missing or an object".into())),
    };
    let batch_size = cursor.get("batchSize");
    let expected_fields = usize::from(batch_size.is_some());
    if cursor.len() != expected_fields {
        return Err(Error::BadValue("cursor object can't contain fields other than batchSize".into()));
    }
    let Some(elem) = batch_size else {
        return Ok(default_batch_size);
    };
    let n = number_as_i64(elem).ok_or_else(|| Error::TypeMismatch("cursor.batchSize must be a number".into()))?;
    if n < 0 {
        return Err(Error::BadValue("cursor.batchSize must not be negative".into()));
    }
    Ok(n)
}

/// Numeric BSON truncated toward zero, saturating at the `i64` range.
pub fn number_as_i64(b: &Bson) -> Option<i64> {
    match b {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.is_nan() => Some(0),
        Bson::Double(f) => Some(*f as i64),
        Bson::Decimal128(d) => Some(crate::decimal::to_f64(d) as i64),
        _ => None,
    }
}

fn hello_reply(svc: &ServiceContext) -> Document {
    let mechs: Vec<Bson> = if svc.auth_enabled {
        vec![Bson::from(crate::auth::scram::SCRAM_MECHANISM)]
    } else {
        Vec::new()
    };
    doc! {
        "ismaster": true,
        "isWritablePrimary": true,
        "helloOk": true,
        "minWireVersion": 0i32,
        "maxWireVersion": 7i32,
        "maxBsonObjectSize": 16_777_216i32, // 16MB
        "maxMessageSizeBytes": 48_000_000i32,
        "maxWriteBatchSize": 100_000i32,
        "logicalSessionTimeoutMinutes": 30i32,
        "saslSupportedMechs": mechs,
        "ok": 1.0
    }
}

fn build_info_reply(svc: &ServiceContext) -> Document {
    doc! {
        "version": env!("CARGO_PKG_VERSION"),
        "gitVersion": "",
        "sysInfo": "idxlist",
        "allocator": "system",
        "javascriptEngine": "none",
        "bits": 64i32,
        "debug": false,
        "maxBsonObjectSize": 16_777_216i32,
        "uptimeSecs": svc.started_at.elapsed().as_secs_f64(),
        "ok": 1.0
    }
}
