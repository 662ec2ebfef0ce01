// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one state step in a multi-exchange operation.
pub enum Transition<S> {
    /// Move to the next state and keep driving.
    Next(S),
    /// The operation finished.
    Done,
}

/// Shared knobs for every operation: which tag it belongs to, how it can be
/// cancelled, and when it expires.
#[derive(Debug, Clone)]
pub struct OpParams {
    pub tag_id: i32,
    pub allow_packing: bool,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl OpParams {
    pub fn check_live(&self) -> Result<(), crate::status::Status> {
        if self.cancel.is_cancelled() {
            return Err(crate::status::Status::Abort);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(crate::status::Status::Timeout);
        }
        Ok(())
    }
}
