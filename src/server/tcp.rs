// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP front of the test PLC: accept loop and per-connection frame pump.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    models::eip::{EIP_HEADER_LEN, EipFrame, EipHeader},
    server::{
        eip::{ConnCtx, Disposition, dispatch_frame},
        plc::ServerPlc,
    },
};

/// A running test-PLC server. Dropping the handle does not stop it; call
/// [`AbServer::shutdown`].
pub struct AbServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl AbServer {
    /// Bind and start serving. `addr` may use port 0 for tests.
    pub async fn bind(plc: Arc<ServerPlc>, addr: &str) -> Result<AbServer> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr().context("no local addr")?;
        info!("ab_server listening on {local_addr}");

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    a = listener.accept() => a,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        info!("client connected from {peer}");
                        let plc = Arc::clone(&plc);
                        let conn_cancel = accept_cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_conn(plc, stream, conn_cancel).await {
                                debug!("connection from {peer} ended: {e}");
                            }
                        });
                    },
                    Err(e) => {
                        warn!("accept failed: {e}");
                        break;
                    },
                }
            }
        });

        Ok(AbServer { local_addr, cancel })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serve until the token fires (the binary wires Ctrl-C to this).
    pub async fn run_until_cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

async fn serve_conn(
    plc: Arc<ServerPlc>,
    mut stream: TcpStream,
    cancel: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut ctx = ConnCtx::default();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            f = read_frame(&mut stream) => f?,
        };

        match dispatch_frame(&plc, &mut ctx, &frame) {
            Disposition::Reply(reply) => stream.write_all(&reply).await?,
            Disposition::Close => break,
        }
    }
    let _ = stream.shutdown().await;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<EipFrame> {
    let mut header_buf = [0u8; EIP_HEADER_LEN];
    stream.read_exact(&mut header_buf).await.context("reading EIP header")?;
    let header = EipHeader::parse(&header_buf)
        .map_err(|e| anyhow::anyhow!("bad EIP header: {e}"))?
        .clone();

    let mut payload = vec![0u8; header.payload_len()];
    if !payload.is_empty() {
        stream.read_exact(&mut payload).await.context("reading EIP payload")?;
    }
    Ok(EipFrame { header, payload: Bytes::from(payload) })
}
