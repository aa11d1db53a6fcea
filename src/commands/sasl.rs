//! `saslStart` / `saslContinue` for SCRAM-SHA-256.

use super::{ClientSession, ServiceContext};
use crate::auth::scram::{SCRAM_MECHANISM, ScramConversation};
use crate::error::{Error, Result};
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, doc};

const CONVERSATION_ID: i32 = 1;

fn payload_str(cmd: &Document) -> Result<String> {
    match cmd.get("payload") {
        Some(Bson::Binary(bin)) => String::from_utf8(bin.bytes.clone())
            .map_err(|_| Error::BadValue("SASL payload is not valid UTF-8".into())),
        Some(Bson::String(s)) => Ok(s.clone()),
        _ => Err(Error::BadValue("Missing required field 'payload'".into())),
    }
}

fn sasl_reply(done: bool, payload: &str) -> Document {
    doc! {
        "conversationId": CONVERSATION_ID,
        "done": done,
        "payload": Binary { subtype: BinarySubtype::Generic, bytes: payload.as_bytes().to_vec() },
        "ok": 1.0
    }
}

pub fn sasl_start(svc: &ServiceContext, client: &mut ClientSession, dbname: &str, cmd: &Document) -> Result<Document> {
    let mechanism = cmd
        .get_str("mechanism")
        .map_err(|_| Error::BadValue("Missing required field 'mechanism'".into()))?;
    if mechanism != SCRAM_MECHANISM {
        return Err(Error::BadValue(format!(
            "Received authentication for mechanism {} which is not enabled",
            mechanism
        )));
    }
    let payload = payload_str(cmd)?;
    client.sasl = None;
    let (conversation, server_first) = ScramConversation::start(dbname, &payload, |name| {
        svc.users.get(name).map(|u| u.credentials.clone())
    })?;
    client.sasl = Some(conversation);
    Ok(sasl_reply(false, &server_first))
}

pub fn sasl_continue(svc: &ServiceContext, client: &mut ClientSession, cmd: &Document) -> Result<Document> {
    let payload = payload_str(cmd)?;
    let Some(conversation) = client.sasl.take() else {
        // Drivers may send one empty round after the server-final message.
        if payload.is_empty() && client.authz.is_authenticated() {
            return Ok(sasl_reply(true, ""));
        }
        return Err(Error::BadValue("No SASL session state found".into()));
    };
    let (user, server_final) = conversation.finish(&payload)?;
    let privileges = svc
        .users
        .get(&user)
        .map(|u| u.privileges.clone())
        .ok_or_else(|| Error::AuthenticationFailed("Authentication failed.".into()))?;
    tracing::info!(user = %user, "authenticated");
    client.authz.add_authenticated_user(user, privileges);
    Ok(sasl_reply(true, &server_final))
}
