//! Server-side cursor registry.
//!
//! A registered cursor owns its executor. `getMore` pins a cursor (takes the
//! executor out), drains a batch and hands it back; a cursor killed while
//! pinned is destroyed when it is returned.

use crate::auth::UserName;
use crate::error::{Error, Result};
use crate::exec::PlanExecutor;
use crate::namespace::NamespaceString;
use bson::Document;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type CursorId = i64;

pub struct ClientCursorParams {
    pub exec: PlanExecutor,
    pub nss: NamespaceString,
    pub authenticated_users: Vec<UserName>,
    pub is_read_committed: bool,
    pub originating_command: Document,
}

#[derive(Debug)]
pub struct ClientCursor {
    id: CursorId,
    exec: PlanExecutor,
    nss: NamespaceString,
    authenticated_users: Vec<UserName>,
    is_read_committed: bool,
    originating_command: Document,
}

impl ClientCursor {
    pub fn cursor_id(&self) -> CursorId {
        self.id
    }

    pub fn nss(&self) -> &NamespaceString {
        &self.nss
    }

    pub fn authenticated_users(&self) -> &[UserName] {
        &self.authenticated_users
    }

    pub fn is_read_committed(&self) -> bool {
        self.is_read_committed
    }

    pub fn originating_command(&self) -> &Document {
        &self.originating_command
    }

    pub fn exec_mut(&mut self) -> &mut PlanExecutor {
        &mut self.exec
    }
}

struct CursorSlot {
    nss: NamespaceString,
    users: Vec<UserName>,
    /// `None` while pinned by an operation.
    cursor: Option<ClientCursor>,
    last_access: Instant,
}

#[derive(Default)]
pub struct CursorManager {
    cursors: Mutex<HashMap<CursorId, CursorSlot>>,
}

impl CursorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a suspended executor and return a fresh non-zero id.
    pub fn register_cursor(&self, params: ClientCursorParams) -> CursorId {
        let mut map = self.cursors.lock();
        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate: CursorId = rng.gen_range(1..=i64::MAX);
            if !map.contains_key(&candidate) {
                break candidate;
            }
        };
        debug_assert!(params.exec.is_detached(), "registered executors must be detached");
        let slot = CursorSlot {
            nss: params.nss.clone(),
            users: params.authenticated_users.clone(),
            cursor: Some(ClientCursor {
                id,
                exec: params.exec,
                nss: params.nss,
                authenticated_users: params.authenticated_users,
                is_read_committed: params.is_read_committed,
                originating_command: params.originating_command,
            }),
            last_access: Instant::now(),
        };
        tracing::debug!(cursor_id = id, ns = %slot.nss, "registered cursor");
        map.insert(id, slot);
        id
    }

    /// Owner namespace and users of a cursor, pinned or not.
    pub fn describe(&self, id: CursorId) -> Option<(NamespaceString, Vec<UserName>)> {
        let map = self.cursors.lock();
        map.get(&id).map(|s| (s.nss.clone(), s.users.clone()))
    }

    pub fn pin_cursor(&self, id: CursorId) -> Result<ClientCursor> {
        let mut map = self.cursors.lock();
        let slot = map
            .get_mut(&id)
            .ok_or_else(|| Error::CursorNotFound(format!("cursor id {} not found", id)))?;
        let cursor = slot
            .cursor
            .take()
            .ok_or_else(|| Error::CursorInUse(format!("cursor id {} is already in use", id)))?;
        slot.last_access = Instant::now();
        Ok(cursor)
    }

    /// Hand a pinned cursor back. Returns false if it was killed meanwhile,
    /// in which case it is dropped here.
    pub fn return_cursor(&self, cursor: ClientCursor) -> bool {
        let mut map = self.cursors.lock();
        match map.get_mut(&cursor.id) {
            Some(slot) => {
                slot.last_access = Instant::now();
                slot.cursor = Some(cursor);
                true
            }
            None => {
                tracing::debug!(cursor_id = cursor.id, "cursor killed while pinned");
                false
            }
        }
    }

    /// Remove a cursor for good, pinned or not.
    pub fn erase(&self, id: CursorId) -> bool {
        self.cursors.lock().remove(&id).is_some()
    }

    /// Drop idle cursors untouched for longer than `ttl`. Pinned cursors are
    /// never timed out.
    pub fn timeout_cursors(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut map = self.cursors.lock();
        let before = map.len();
        map.retain(|_, s| s.cursor.is_none() || now.duration_since(s.last_access) <= ttl);
        let removed = before - map.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = map.len(), "pruned idle cursors");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.cursors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.lock().is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, id: CursorId, by: Duration) {
        if let Some(slot) = self.cursors.lock().get_mut(&id) {
            slot.last_access -= by;
        }
    }
}
