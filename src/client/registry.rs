// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session sharing.
//!
//! Two tags whose attribute strings resolve to the same
//! `(gateway, route, plc, connection_group_id)` share one session and one
//! CIP connection; a different group id forces a distinct session. Sessions
//! are refcounted by their hosted tags and torn down a grace period after
//! the last tag goes away, so short create/destroy churn reuses the link.

use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::sleep;
use tracing::debug;

use crate::client::session::{Session, SessionCfg, SessionKey};

/// How long an unreferenced session lingers before Forward Close /
/// Unregister Session run.
pub const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Look up or create the session for `cfg`, and count the caller as a
    /// hosted tag. A faulted session is replaced on checkout; that is the
    /// whole lazy-reconnect policy.
    pub fn checkout(&self, cfg: &SessionCfg) -> Arc<Session> {
        let entry = self.sessions.entry(cfg.key.clone());
        let session = match entry {
            Entry::Occupied(mut e) => {
                if e.get().is_faulted() && e.get().tag_refs() == 0 {
                    debug!("replacing faulted session for {:?}", cfg.key);
                    e.get().shutdown();
                    let fresh = Session::open(cfg.clone());
                    e.insert(fresh.clone());
                    fresh
                } else {
                    e.get().clone()
                }
            },
            Entry::Vacant(e) => {
                let fresh = Session::open(cfg.clone());
                e.insert(fresh.clone());
                fresh
            },
        };
        session.acquire();
        session
    }

    /// Drop one tag reference. When the last one goes, schedule the grace
    /// teardown.
    pub fn release(self: &Arc<Self>, session: &Arc<Session>) {
        if session.release() > 0 {
            return;
        }
        let registry = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            sleep(TEARDOWN_GRACE).await;
            if session.tag_refs() > 0 {
                return; // re-acquired during the grace period
            }
            registry
                .sessions
                .remove_if(session.key(), |_, s| Arc::ptr_eq(s, &session));
            session.shutdown();
        });
    }

    /// Force-close everything. Used by library shutdown; the caller
    /// guarantees no other calls are in flight.
    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().shutdown();
        }
        self.sessions.clear();
    }
}
