use crate::auth::AuthorizationSession;
use bson::Document;
use std::sync::atomic::{AtomicU64, Ordering};

static OP_SEQ: AtomicU64 = AtomicU64::new(1);

/// Per-command context: who is asking and under what read concern.
pub struct OperationContext<'a> {
    op_id: u64,
    authz: &'a AuthorizationSession,
    majority_read: bool,
}

impl<'a> OperationContext<'a> {
    pub fn new(authz: &'a AuthorizationSession) -> Self {
        Self {
            op_id: OP_SEQ.fetch_add(1, Ordering::Relaxed),
            authz,
            majority_read: false,
        }
    }

    /// Build a context for `cmd`, picking up `readConcern.level`.
    pub fn for_command(authz: &'a AuthorizationSession, cmd: &Document) -> Self {
        let mut op_ctx = Self::new(authz);
        op_ctx.majority_read = cmd
            .get_document("readConcern")
            .ok()
            .and_then(|rc| rc.get_str("level").ok())
            == Some("majority");
        op_ctx
    }

    pub fn op_id(&self) -> u64 {
        self.op_id
    }

    pub fn authz(&self) -> &AuthorizationSession {
        self.authz
    }

    pub fn is_reading_from_majority_committed_snapshot(&self) -> bool {
        self.majority_read
    }
}
