//! The local IPC control socket server: accepts connections, frames
//! requests/replies, rate-limits, and hands mutating requests through the
//! single mutator lock via [`DaemonState`] (spec.md §5).

use std::sync::Arc;

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, ToNsName};
use portcullis_shared::errors::{PortcullisError, PortcullisResult};
use portcullis_shared::wire::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::dispatcher::dispatch;
use super::rate_limit::RateLimiter;
use crate::lifecycle::DaemonState;

/// Run the control socket server until `shutdown` resolves.
pub async fn serve(
    state: Arc<DaemonState>,
    socket_name: &str,
    shutdown: impl std::future::Future<Output = ()>,
) -> PortcullisResult<()> {
    let name = socket_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|e| PortcullisError::IoError(format!("invalid socket name: {e}")))?;

    let listener = ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(|e| PortcullisError::IoError(format!("bind control socket: {e}")))?;

    let limiter = Arc::new(RateLimiter::new(
        state.config.rate_limit_per_sec,
        state.config.rate_limit_burst,
    ));

    tracing::info!("control socket listening on {socket_name}");

    let mut shutdown = std::pin::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("control socket shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(conn) => {
                        let state = state.clone();
                        let limiter = limiter.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_conn(conn, state, limiter).await {
                                tracing::warn!("ipc connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("accept error: {e}");
                    }
                }
            }
        }
    }
}

async fn handle_conn(
    mut conn: Stream,
    state: Arc<DaemonState>,
    limiter: Arc<RateLimiter>,
) -> PortcullisResult<()> {
    // Local-socket peer identity: no real credential plumbing is available
    // in the reference adapter, so every connection shares one bucket.
    let caller_id: u32 = 0;

    loop {
        let req = match read_request(&mut conn, state.config.max_frame_bytes).await {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };

        if !limiter.try_acquire(caller_id) {
            let resp = Response::err(&PortcullisError::InUse("rate limit exceeded".into()));
            write_response(&mut conn, &resp, state.config.max_frame_bytes).await?;
            continue;
        }

        let resp = dispatch(&state, req).await;
        write_response(&mut conn, &resp, state.config.max_frame_bytes).await?;
    }
}

async fn read_request(conn: &mut Stream, max_frame: u32) -> PortcullisResult<Option<Request>> {
    let mut len_buf = [0u8; 4];
    match conn.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(PortcullisError::from(e)),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > max_frame {
        return Err(PortcullisError::InvalidArgument(format!(
            "frame of {len} bytes exceeds max {max_frame}, rejecting before allocation"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    conn.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

async fn write_response(
    conn: &mut Stream,
    resp: &Response,
    max_frame: u32,
) -> PortcullisResult<()> {
    let bytes = serde_json::to_vec(resp)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| PortcullisError::Internal("response too large to encode".into()))?;
    if len > max_frame {
        return Err(PortcullisError::Internal(format!(
            "response of {len} bytes exceeds max frame {max_frame}"
        )));
    }
    conn.write_all(&len.to_le_bytes()).await?;
    conn.write_all(&bytes).await?;
    conn.flush().await?;
    Ok(())
}
