use crate::auth::UserRegistry;
use crate::catalog::MemoryCatalog;
use crate::commands::{ClientSession, ServiceContext, error_doc, run_command};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::find_common::ReplyBudget;
use crate::protocol::{
    HEADER_LEN, MessageHeader, OP_MSG, OP_QUERY, decode_op_msg, decode_op_query, encode_op_msg, encode_op_reply,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

static REQ_ID: AtomicI32 = AtomicI32::new(1);

const DEFAULT_CURSOR_TIMEOUT_SECS: u64 = 600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

fn build_state(cfg: &Config) -> Result<Arc<ServiceContext>> {
    let users = UserRegistry::from_config(&cfg.auth)?;
    Ok(Arc::new(ServiceContext::new(
        Arc::new(MemoryCatalog::new()),
        ReplyBudget::new(cfg.max_reply_bytes),
        users,
        cfg.auth.enabled,
    )))
}

fn cursor_ttl(cfg: &Config) -> Duration {
    Duration::from_secs(cfg.cursor_timeout_secs.unwrap_or(DEFAULT_CURSOR_TIMEOUT_SECS))
}

fn sweep_interval(cfg: &Config) -> Duration {
    Duration::from_secs(cfg.cursor_sweep_interval_secs.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS))
}

pub async fn run(cfg: Config) -> Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!(listen_addr = %cfg.listen_addr, auth = cfg.auth.enabled, "idxlist listening");
    let state = build_state(&cfg)?;

    // Spawn cursor sweeper (no shutdown in run())
    let ttl = cursor_ttl(&cfg);
    let interval = sweep_interval(&cfg);
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            sweeper_state.cursors.timeout_cursors(ttl);
        }
    });

    loop {
        let (socket, addr) = listener.accept().await?;
        tracing::debug!(%addr, "accepted connection");
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, socket).await {
                tracing::debug!(error = %format!("{e:?}"), "connection closed with error");
            }
        });
    }
}

/// Spawn the server on the configured listen address and run until `shutdown` is signaled.
/// Returns the shared service state, the bound local address, a shutdown sender, and the task handle.
pub async fn spawn_with_shutdown(
    cfg: Config,
) -> Result<(
    Arc<ServiceContext>,
    std::net::SocketAddr,
    watch::Sender<bool>,
    tokio::task::JoinHandle<Result<()>>,
)> {
    // Allow ephemeral port usage in tests (e.g., 127.0.0.1:0)
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    let state = build_state(&cfg)?;

    let ttl = cursor_ttl(&cfg);
    let interval = sweep_interval(&cfg);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let sweeper_state = state.clone();
    let mut sweeper_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    sweeper_state.cursors.timeout_cursors(ttl);
                }
                _ = sweeper_shutdown.changed() => {
                    if *sweeper_shutdown.borrow() { break; }
                }
            }
        }
    });

    let state_accept = state.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                res = listener.accept() => {
                    let (socket, addr) = res?;
                    tracing::debug!(%addr, "accepted connection");
                    let state = state_accept.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, socket).await {
                            tracing::debug!(error = %format!("{e:?}"), "connection closed with error");
                        }
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
        tracing::info!("idxlist shut down");
        Ok::<(), Error>(())
    });

    Ok((state, local_addr, shutdown_tx, handle))
}

async fn handle_connection(state: Arc<ServiceContext>, mut socket: TcpStream) -> Result<()> {
    let mut client = state.new_client();
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = socket.read_exact(&mut header_buf).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                break;
            }
            return Err(e.into());
        }
        let hdr = MessageHeader::parse(&header_buf);
        let Some(body_len) = hdr.body_len() else {
            tracing::warn!(?hdr, "invalid message length");
            break;
        };
        let mut body = vec![0u8; body_len];
        socket.read_exact(&mut body).await?;

        let request_id = REQ_ID.fetch_add(1, Ordering::Relaxed);
        let resp = match hdr.op_code {
            OP_MSG => {
                let reply = match decode_op_msg(&body) {
                    Ok((_flags, cmd)) => {
                        let db = cmd.get_str("$db").ok().map(|s| s.to_string());
                        run_command(&state, &mut client, db.as_deref(), &cmd)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed OP_MSG body; sending ok:0");
                        error_doc(&e)
                    }
                };
                encode_op_msg(&reply, hdr.request_id, request_id)?
            }
            OP_QUERY => match decode_op_query(&body) {
                Ok(q) => {
                    let reply = handle_legacy_query(&state, &mut client, q.db(), &q.query);
                    encode_op_reply(&[reply], hdr.request_id, request_id)?
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed OP_QUERY body; ignoring");
                    continue;
                }
            },
            other => {
                tracing::warn!(op_code = other, "unsupported op code");
                continue;
            }
        };
        socket.write_all(&resp).await?;
        socket.flush().await?;
    }
    Ok(())
}

/// Legacy drivers wrap the command in `$query` when sending read preferences.
fn handle_legacy_query(
    state: &ServiceContext,
    client: &mut ClientSession,
    db: Option<&str>,
    query: &bson::Document,
) -> bson::Document {
    match query.get_document("$query") {
        Ok(inner) => run_command(state, client, db, inner),
        Err(bson::document::ValueAccessError::NotPresent) => run_command(state, client, db, query),
        Err(_) => error_doc(&Error::TypeMismatch("$query must be an object".into())),
    }
}
