// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use enip_client_rs::{
    cfg::enums::PlcKind,
    server::{plc::ServerPlc, tcp::AbServer},
};

/// An in-process test PLC on an ephemeral loopback port.
pub struct TestServer {
    pub plc: Arc<ServerPlc>,
    pub server: AbServer,
}

impl TestServer {
    pub async fn start(kind: PlcKind, route: &[u8], tags: &[&str]) -> Result<TestServer> {
        let plc = Arc::new(ServerPlc::new(kind, route));
        for t in tags {
            plc.add_tag(t)?;
        }
        let server = AbServer::bind(Arc::clone(&plc), "127.0.0.1:0").await?;
        Ok(TestServer { plc, server })
    }

    /// Attribute string pointing a tag at this server.
    pub fn attrs(&self, rest: &str) -> String {
        format!(
            "protocol=ab_eip&gateway=127.0.0.1:{}&{rest}",
            self.server.local_addr().port()
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
