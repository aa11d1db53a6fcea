//! MongoDB wire protocol framing.
//! - Message header parsing
//! - OP_MSG encode/decode (body section only, optional checksum skipped)
//! - Legacy OP_QUERY/OP_REPLY for handshakes from older drivers

use crate::error::{Error, Result};
use bson::Document;

pub const HEADER_LEN: usize = 16;
/// Largest message accepted from a client.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

pub const OP_REPLY: i32 = 1;
pub const OP_QUERY: i32 = 2004;
pub const OP_MSG: i32 = 2013;

const CHECKSUM_PRESENT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl MessageHeader {
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            message_length: read_i32(buf, 0),
            request_id: read_i32(buf, 4),
            response_to: read_i32(buf, 8),
            op_code: read_i32(buf, 12),
        }
    }

    /// Body length implied by the header, if it is within bounds.
    pub fn body_len(&self) -> Option<usize> {
        let total = usize::try_from(self.message_length).ok()?;
        if !(HEADER_LEN..=MAX_MESSAGE_SIZE).contains(&total) {
            return None;
        }
        Some(total - HEADER_LEN)
    }
}

fn write_header(out: &mut Vec<u8>, body_len: usize, request_id: i32, response_to: i32, op_code: i32) {
    let message_length = (HEADER_LEN + body_len) as i32;
    out.extend_from_slice(&message_length.to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&response_to.to_le_bytes());
    out.extend_from_slice(&op_code.to_le_bytes());
}

fn read_document(bytes: &[u8]) -> Result<Document> {
    Document::from_reader(&mut std::io::Cursor::new(bytes))
        .map_err(|e| Error::BadValue(format!("invalid BSON document: {}", e)))
}

/// Decode an OP_MSG body into its flags and body-section command document.
pub fn decode_op_msg(body: &[u8]) -> Result<(u32, Document)> {
    if body.len() < 5 {
        return Err(Error::BadValue("OP_MSG body too short".into()));
    }
    let flags = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let mut sections = &body[4..];
    if flags & CHECKSUM_PRESENT != 0 {
        if sections.len() < 4 {
            return Err(Error::BadValue("OP_MSG checksum missing".into()));
        }
        sections = &sections[..sections.len() - 4];
    }
    let Some((&kind, doc)) = sections.split_first() else {
        return Err(Error::BadValue("OP_MSG has no sections".into()));
    };
    if kind != 0 {
        return Err(Error::BadValue(format!("unsupported OP_MSG section kind {}", kind)));
    }
    Ok((flags, read_document(doc)?))
}

/// A full OP_MSG message carrying `doc` as its body section.
pub fn encode_op_msg(doc: &Document, response_to: i32, request_id: i32) -> Result<Vec<u8>> {
    let doc_bytes = bson::to_vec(doc).map_err(|e| Error::Msg(format!("bson encode: {}", e)))?;
    let body_len = 4 /*flags*/ + 1 /*kind*/ + doc_bytes.len();
    let mut out = Vec::with_capacity(HEADER_LEN + body_len);
    write_header(&mut out, body_len, request_id, response_to, OP_MSG);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(0u8);
    out.extend_from_slice(&doc_bytes);
    Ok(out)
}

#[derive(Debug)]
pub struct OpQuery {
    pub flags: u32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
}

impl OpQuery {
    /// Database part of `<db>.$cmd`.
    pub fn db(&self) -> Option<&str> {
        self.full_collection_name.split_once('.').map(|(db, _)| db)
    }
}

pub fn decode_op_query(body: &[u8]) -> Result<OpQuery> {
    let malformed = || Error::BadValue("malformed OP_QUERY".into());
    if body.len() < 4 {
        return Err(malformed());
    }
    let flags = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let name_end = body[4..].iter().position(|b| *b == 0).map(|p| p + 4).ok_or_else(malformed)?;
    let full_collection_name = std::str::from_utf8(&body[4..name_end]).map_err(|_| malformed())?.to_string();
    let i = name_end + 1;
    if i + 8 >= body.len() {
        return Err(malformed());
    }
    Ok(OpQuery {
        flags,
        full_collection_name,
        number_to_skip: read_i32(body, i),
        number_to_return: read_i32(body, i + 4),
        query: read_document(&body[i + 8..])?,
    })
}

/// OP_REPLY carrying command replies; there is never a legacy cursor.
pub fn encode_op_reply(docs: &[Document], response_to: i32, request_id: i32) -> Result<Vec<u8>> {
    let mut docs_buf = Vec::new();
    for d in docs {
        let b = bson::to_vec(d).map_err(|e| Error::Msg(format!("bson encode: {}", e)))?;
        docs_buf.extend_from_slice(&b);
    }
    let body_len = 4 + 8 + 4 + 4 + docs_buf.len();
    let mut out = Vec::with_capacity(HEADER_LEN + body_len);
    write_header(&mut out, body_len, request_id, response_to, OP_REPLY);
    out.extend_from_slice(&0u32.to_le_bytes()); // responseFlags
    out.extend_from_slice(&0i64.to_le_bytes()); // cursorID
    out.extend_from_slice(&0i32.to_le_bytes()); // startingFrom
    out.extend_from_slice(&(docs.len() as i32).to_le_bytes());
    out.extend_from_slice(&docs_buf);
    Ok(out)
}
