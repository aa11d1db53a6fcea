//! Reply batch sizing shared by commands that return cursors.

use bson::{Bson, Document};

/// Length prefix plus trailing NUL of an empty BSON array.
const ARRAY_FRAME_BYTES: usize = 5;

/// Decides whether one more document still fits in a reply batch.
#[derive(Debug, Clone, Copy)]
pub struct ReplyBudget {
    max_bytes: usize,
}

impl ReplyBudget {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Whether `batch` would still fit after appending `next`, counting the
    /// array framing. The first document of a batch is always admitted so a
    /// cursor can make progress even when one document alone is over budget.
    pub fn have_space_for_next(&self, next: &Document, batch: &BatchBuilder) -> bool {
        if batch.is_empty() {
            return true;
        }
        batch.bytes() + element_size(batch.len(), doc_size(next)) <= self.max_bytes
    }
}

pub fn doc_size(doc: &Document) -> usize {
    bson::to_vec(doc).map(|b| b.len()).unwrap_or(0)
}

/// Bytes an embedded document takes as element `index` of a BSON array:
/// type byte, decimal key and its NUL, then the document.
fn element_size(index: usize, doc_bytes: usize) -> usize {
    1 + index.to_string().len() + 1 + doc_bytes
}

/// Accumulates documents while tracking the serialized size of the array
/// they will be sent in.
#[derive(Debug)]
pub struct BatchBuilder {
    docs: Vec<Document>,
    bytes: usize,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self { docs: Vec::new(), bytes: ARRAY_FRAME_BYTES }
    }
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Serialized size of the batch as a BSON array.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn append(&mut self, doc: Document) {
        self.bytes += element_size(self.docs.len(), doc_size(&doc));
        self.docs.push(doc);
    }

    pub fn into_array(self) -> Vec<Bson> {
        self.docs.into_iter().map(Bson::Document).collect()
    }
}
