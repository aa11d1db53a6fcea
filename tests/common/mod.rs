#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bson::spec::BinarySubtype;
use bson::{Binary, Document, doc};
use idxlist::auth::scram::{hmac_sha256, pbkdf2_hmac_sha256, sha256};
use idxlist::commands::ServiceContext;
use idxlist::config::Config;
use idxlist::protocol::{HEADER_LEN, MessageHeader, OP_MSG, decode_op_msg, encode_op_msg};
use idxlist::server::spawn_with_shutdown;
use rand::{Rng, distributions::Alphanumeric};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn rand_suffix(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

pub struct TestServer {
    pub state: Arc<ServiceContext>,
    pub addr: std::net::SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<idxlist::error::Result<()>>,
}

impl TestServer {
    pub async fn start(mut cfg: Config) -> Self {
        cfg.listen_addr = "127.0.0.1:0".into();
        let (state, addr, shutdown, handle) = spawn_with_shutdown(cfg).await.unwrap();
        Self { state, addr, shutdown, handle }
    }

    pub async fn connect(&self) -> Client {
        Client {
            stream: TcpStream::connect(self.addr).await.unwrap(),
            next_request_id: 1,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await.unwrap();
    }
}

pub struct Client {
    stream: TcpStream,
    next_request_id: i32,
}

impl Client {
    /// Send one command as OP_MSG and wait for its reply.
    pub async fn run(&mut self, db: &str, mut cmd: Document) -> Document {
        cmd.insert("$db", db);
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let msg = encode_op_msg(&cmd, 0, request_id).unwrap();
        self.stream.write_all(&msg).await.unwrap();
        self.read_reply(request_id).await
    }

    async fn read_reply(&mut self, request_id: i32) -> Document {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await.unwrap();
        let hdr = MessageHeader::parse(&header);
        assert_eq!(hdr.op_code, OP_MSG);
        assert_eq!(hdr.response_to, request_id);
        let mut body = vec![0u8; hdr.body_len().unwrap()];
        self.stream.read_exact(&mut body).await.unwrap();
        let (_flags, doc) = decode_op_msg(&body).unwrap();
        doc
    }

    /// SCRAM-SHA-256 login; returns the final server reply.
    pub async fn login(&mut self, user: &str, password: &str) -> Document {
        let client_first_bare = format!("n={},r={}", user, rand_suffix(24));
        let start = doc! {
            "saslStart": 1i32,
            "mechanism": "SCRAM-SHA-256",
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: format!("n,,{}", client_first_bare).into_bytes() },
        };
        let reply = self.run("admin", start).await;
        if reply.get_f64("ok").unwrap_or(0.0) != 1.0 {
            return reply;
        }
        let server_first = String::from_utf8(reply.get_binary_generic("payload").unwrap().clone()).unwrap();
        let mut nonce = String::new();
        let mut salt = Vec::new();
        let mut iterations = 0u32;
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                nonce = v.to_string();
            } else if let Some(v) = part.strip_prefix("s=") {
                salt = BASE64.decode(v).unwrap();
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = v.parse().unwrap();
            }
        }
        let without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);
        let salted = pbkdf2_hmac_sha256(password, &salt, iterations);
        let client_key = hmac_sha256(&salted, b"Client Key").unwrap();
        let signature = hmac_sha256(&sha256(&client_key), auth_message.as_bytes()).unwrap();
        let proof: Vec<u8> = client_key.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
        let cont = doc! {
            "saslContinue": 1i32,
            "conversationId": 1i32,
            "payload": Binary {
                subtype: BinarySubtype::Generic,
                bytes: format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes(),
            },
        };
        self.run("admin", cont).await
    }
}

pub fn index_names(batch: &[bson::Bson]) -> Vec<String> {
    batch
        .iter()
        .map(|b| b.as_document().unwrap().get_str("name").unwrap().to_string())
        .collect()
}
