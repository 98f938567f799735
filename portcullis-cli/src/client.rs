//! Local socket client speaking the portcullis wire protocol.

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ToNsName};
use portcullis_shared::wire::{Request, Response, DEFAULT_MAX_FRAME_BYTES};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub async fn send(socket_name: &str, req: Request) -> anyhow::Result<Response> {
    let name = socket_name.to_ns_name::<GenericNamespaced>()?;
    let mut conn = interprocess::local_socket::tokio::Stream::connect(name).await?;

    let bytes = serde_json::to_vec(&req)?;
    let len = u32::try_from(bytes.len())?;
    conn.write_all(&len.to_le_bytes()).await?;
    conn.write_all(&bytes).await?;
    conn.flush().await?;

    let mut len_buf = [0u8; 4];
    conn.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > DEFAULT_MAX_FRAME_BYTES {
        anyhow::bail!("reply of {len} bytes exceeds max frame {DEFAULT_MAX_FRAME_BYTES}");
    }
    let mut buf = vec![0u8; len as usize];
    conn.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}
