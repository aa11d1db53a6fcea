//! In-memory query execution: a queue of pre-materialized documents wrapped
//! in an executor that can outlive the operation that created it.

use crate::namespace::NamespaceString;
use crate::operation::OperationContext;
use bson::Document;
use std::collections::VecDeque;

#[derive(Debug)]
pub enum ExecState {
    Advanced(Document),
    Eof,
}

/// Leaf stage returning queued documents in insertion order.
#[derive(Debug, Default)]
pub struct QueuedDataStage {
    results: VecDeque<Document>,
}

impl QueuedDataStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, doc: Document) {
        self.results.push_back(doc);
    }

    fn push_front(&mut self, doc: Document) {
        self.results.push_front(doc);
    }

    fn next(&mut self) -> Option<Document> {
        self.results.pop_front()
    }

    pub fn is_eof(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorState {
    Usable,
    Saved,
}

#[derive(Debug)]
pub struct PlanExecutor {
    nss: NamespaceString,
    root: QueuedDataStage,
    op_id: Option<u64>,
    state: ExecutorState,
}

impl PlanExecutor {
    pub fn new(op_ctx: &OperationContext<'_>, root: QueuedDataStage, nss: NamespaceString) -> Self {
        Self {
            nss,
            root,
            op_id: Some(op_ctx.op_id()),
            state: ExecutorState::Usable,
        }
    }

    pub fn nss(&self) -> &NamespaceString {
        &self.nss
    }

    pub fn get_next(&mut self) -> ExecState {
        debug_assert!(self.op_id.is_some(), "executor used while detached");
        debug_assert_eq!(self.state, ExecutorState::Usable, "executor used while saved");
        match self.root.next() {
            Some(doc) => ExecState::Advanced(doc),
            None => ExecState::Eof,
        }
    }

    /// Stash `doc` so the next `get_next` returns it again.
    pub fn enqueue(&mut self, doc: Document) {
        self.root.push_front(doc);
    }

    pub fn is_eof(&self) -> bool {
        self.root.is_eof()
    }

    pub fn remaining(&self) -> usize {
        self.root.len()
    }

    pub fn save_state(&mut self) {
        self.state = ExecutorState::Saved;
    }

    pub fn restore_state(&mut self) {
        self.state = ExecutorState::Usable;
    }

    pub fn detach_from_operation_context(&mut self) {
        debug_assert_eq!(self.state, ExecutorState::Saved, "detach requires a saved executor");
        self.op_id = None;
    }

    pub fn reattach_to_operation_context(&mut self, op_ctx: &OperationContext<'_>) {
        debug_assert!(self.op_id.is_none(), "executor is already attached");
        self.op_id = Some(op_ctx.op_id());
    }

    pub fn is_detached(&self) -> bool {
        self.op_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthorizationSession;
    use bson::doc;

    fn exec_with(n: i32) -> PlanExecutor {
        let authz = AuthorizationSession::unrestricted();
        let op_ctx = OperationContext::new(&authz);
        let mut root = QueuedDataStage::new();
        for i in 0..n {
            root.push_back(doc! { "i": i });
        }
        PlanExecutor::new(&op_ctx, root, NamespaceString::new("db", "coll"))
    }

    #[test]
    fn yields_in_order_then_eof() {
        let mut exec = exec_with(2);
        assert!(matches!(exec.get_next(), ExecState::Advanced(d) if d.get_i32("i").unwrap() == 0));
        assert!(matches!(exec.get_next(), ExecState::Advanced(d) if d.get_i32("i").unwrap() == 1));
        assert!(matches!(exec.get_next(), ExecState::Eof));
        assert!(exec.is_eof());
    }

    #[test]
    fn enqueue_reemits_stashed_document_first() {
        let mut exec = exec_with(3);
        let ExecState::Advanced(first) = exec.get_next() else { panic!("expected a document") };
        exec.enqueue(first.clone());
        assert!(!exec.is_eof());
        assert_eq!(exec.remaining(), 3);
        assert!(matches!(exec.get_next(), ExecState::Advanced(d) if d == first));
    }

    #[test]
    fn detach_and_reattach() {
        let mut exec = exec_with(1);
        exec.save_state();
        exec.detach_from_operation_context();
        assert!(exec.is_detached());

        let authz = AuthorizationSession::unrestricted();
        let later = OperationContext::new(&authz);
        exec.reattach_to_operation_context(&later);
        exec.restore_state();
        assert!(!exec.is_detached());
        assert!(matches!(exec.get_next(), ExecState::Advanced(_)));
    }
}
