// SCRAM-SHA-256 server side of the saslStart/saslContinue exchange
// Implements RFC 5802 (SCRAM) with SHA-256

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::UserName;
use crate::error::{Error, Result};

pub const SCRAM_MECHANISM: &str = "SCRAM-SHA-256";
const SERVER_NONCE_LEN: usize = 24;
const SALT_LEN: usize = 16;

/// Stored verifier for one user; the password itself is never kept.
#[derive(Debug, Clone)]
pub struct ScramCredentials {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: Vec<u8>,
    pub server_key: Vec<u8>,
}

impl ScramCredentials {
    pub fn derive(password: &str, iterations: u32) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(password, salt, iterations)
    }

    pub fn with_salt(password: &str, salt: Vec<u8>, iterations: u32) -> Result<Self> {
        let salted_password = pbkdf2_hmac_sha256(password, &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        Ok(Self {
            salt,
            iterations,
            stored_key,
            server_key,
        })
    }
}

/// State between saslStart and saslContinue.
#[derive(Debug)]
pub struct ScramConversation {
    user: UserName,
    combined_nonce: String,
    client_first_bare: String,
    server_first: String,
    credentials: ScramCredentials,
}

impl ScramConversation {
    /// Handle client-first-message. `lookup` maps a username to its stored
    /// credentials. Returns the conversation and the server-first-message.
    pub fn start(
        auth_db: &str,
        client_first: &str,
        lookup: impl FnOnce(&UserName) -> Option<ScramCredentials>,
    ) -> Result<(Self, String)> {
        // gs2 header is optional; some clients send only the bare message
        let bare = client_first
            .strip_prefix("n,,")
            .or_else(|| client_first.strip_prefix("y,,"))
            .unwrap_or(client_first);

        let mut username = None;
        let mut client_nonce = None;
        for part in bare.split(',') {
            if let Some(v) = part.strip_prefix("n=") {
                username = Some(v.replace("=2C", ",").replace("=3D", "="));
            } else if let Some(v) = part.strip_prefix("r=") {
                client_nonce = Some(v.to_string());
            }
        }
        let (username, client_nonce) = match (username, client_nonce) {
            (Some(u), Some(n)) if !u.is_empty() && !n.is_empty() => (u, n),
            _ => return Err(Error::BadValue("malformed SCRAM client-first-message".into())),
        };

        let user = UserName::new(username, auth_db);
        let credentials = lookup(&user).ok_or_else(auth_failed)?;

        let combined_nonce = format!("{}{}", client_nonce, generate_nonce());
        let server_first = format!(
            "r={},s={},i={}",
            combined_nonce,
            BASE64.encode(&credentials.salt),
            credentials.iterations
        );

        Ok((
            Self {
                user,
                combined_nonce,
                client_first_bare: bare.to_string(),
                server_first: server_first.clone(),
                credentials,
            },
            server_first,
        ))
    }

    /// Verify client-final-message. On success returns the authenticated
    /// user and the server-final-message carrying the server signature.
    pub fn finish(self, client_final: &str) -> Result<(UserName, String)> {
        let (without_proof, proof_b64) = client_final
            .rsplit_once(",p=")
            .ok_or_else(|| Error::BadValue("malformed SCRAM client-final-message".into()))?;

        let nonce = without_proof
            .split(',')
            .find_map(|p| p.strip_prefix("r="))
            .ok_or_else(|| Error::BadValue("missing nonce in SCRAM client-final-message".into()))?;
        if nonce != self.combined_nonce {
            return Err(auth_failed());
        }

        let proof = BASE64.decode(proof_b64).map_err(|_| auth_failed())?;
        let auth_message = format!("{},{},{}", self.client_first_bare, self.server_first, without_proof);

        let client_signature = hmac_sha256(&self.credentials.stored_key, auth_message.as_bytes())?;
        if proof.len() != client_signature.len() {
            return Err(auth_failed());
        }
        let client_key: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        if sha256(&client_key) != self.credentials.stored_key {
            return Err(auth_failed());
        }

        let server_signature = hmac_sha256(&self.credentials.server_key, auth_message.as_bytes())?;
        Ok((self.user, format!("v={}", BASE64.encode(&server_signature))))
    }
}

fn auth_failed() -> Error {
    Error::AuthenticationFailed("Authentication failed.".into())
}

/// Generate a random nonce
fn generate_nonce() -> String {
    let mut bytes = vec![0u8; SERVER_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(&bytes)
}

/// PBKDF2 with HMAC-SHA-256
pub fn pbkdf2_hmac_sha256(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut result = vec![0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut result);
    result
}

/// HMAC-SHA-256
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| Error::Msg(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SHA-256 hash
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
