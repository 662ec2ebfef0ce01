// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logging plumbing.
//!
//! The library logs through `tracing`. Two extra layers adapt that to the
//! classic control-plane surface:
//!
//! * a runtime debug level 0-5 (`set_debug_level`) that filters events
//!   without rebuilding the subscriber, and
//! * a single-slot logger callback (`register_logger`) that receives the
//!   formatted message of every event passing the filter.

use std::{
    fmt::Debug,
    sync::{
        Mutex,
        atomic::{AtomicI32, Ordering},
    },
};

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt,
    layer::{Context, Layer, SubscriberExt},
};

use crate::status::{DebugLevel, Status};

pub type LoggerFn = Box<dyn Fn(i32, &str) + Send + Sync>;

static DEBUG_LEVEL: AtomicI32 = AtomicI32::new(DebugLevel::Warn as i32);
static LOG_SINK: Lazy<Mutex<Option<LoggerFn>>> = Lazy::new(|| Mutex::new(None));

/// Set the process-global debug level (0 = silent ... 5 = spew).
pub fn set_debug_level(level: i32) {
    DEBUG_LEVEL.store(DebugLevel::from_int(level) as i32, Ordering::SeqCst);
}

pub fn debug_level() -> DebugLevel {
    DebugLevel::from_int(DEBUG_LEVEL.load(Ordering::SeqCst))
}

/// Install the process-wide logger callback. Single slot: a second
/// registration returns `Duplicate` until `unregister_logger` is called.
pub fn register_logger(f: LoggerFn) -> Status {
    let mut slot = match LOG_SINK.lock() {
        Ok(s) => s,
        Err(p) => p.into_inner(),
    };
    if slot.is_some() {
        return Status::Duplicate;
    }
    *slot = Some(f);
    Status::Ok
}

pub fn unregister_logger() -> Status {
    let mut slot = match LOG_SINK.lock() {
        Ok(s) => s,
        Err(p) => p.into_inner(),
    };
    match slot.take() {
        Some(_) => Status::Ok,
        None => Status::NotFound,
    }
}

fn level_to_debug(level: &Level) -> DebugLevel {
    if *level == Level::ERROR {
        DebugLevel::Error
    } else if *level == Level::WARN {
        DebugLevel::Warn
    } else if *level == Level::INFO {
        DebugLevel::Info
    } else if *level == Level::DEBUG {
        DebugLevel::Detail
    } else {
        DebugLevel::Spew
    }
}

/// Filters events against the runtime debug level and forwards formatted
/// messages to the registered callback.
struct CallbackLayer;

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

impl<S> Layer<S> for CallbackLayer
where S: Subscriber
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        level_to_debug(metadata.level()) <= debug_level()
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let slot = match LOG_SINK.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        if let Some(sink) = slot.as_ref() {
            let mut vis = MessageVisitor::default();
            event.record(&mut vis);
            sink(level_to_debug(event.metadata().level()) as i32, &vis.message);
        }
    }
}

/// Initialize the global subscriber: non-blocking stderr output plus the
/// callback layer. Safe to call more than once; later calls keep the first
/// subscriber and only hand back a fresh writer guard.
pub fn init_logger() -> Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trace"));

    let fmt_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(CallbackLayer)
        .with(fmt_layer);

    // A second init (another test in the same process) is not an error.
    let _ = tracing::subscriber::set_global_default(subscriber);

    Ok(guard)
}
