// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Test PLC server.
//!
//! ```text
//! ab_server --plc=<ControlLogix|Micro800|Omron|PLC5|SLC|MicroLogix>
//!           [--path=<n,m>] --tag=<name>:<TYPE>[<d1[,d2[,d3]]>]
//!           [--reject_fo=<n>] [--debug]
//! ```

use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use enip_client_rs::{
    cfg::{enums::PlcKind, logger::init_logger, logger::set_debug_level},
    server::{plc::ServerPlc, tcp::AbServer},
};
use tracing::info;

const LISTEN_ADDR: &str = "0.0.0.0:44818";

struct Args {
    plc: PlcKind,
    route: Vec<u8>,
    tags: Vec<String>,
    reject_fo: i32,
    debug: bool,
}

fn usage() -> ExitCode {
    eprintln!(
        "Usage: ab_server --plc=<plc_type> [--path=<path>] --tag=<tag> \
         [--reject_fo=<n>] [--debug]\n\
         \n\
         <plc_type> = ControlLogix, Micro800, Omron, PLC5, SLC or MicroLogix.\n\
         <path>     = backplane path to the CPU, e.g. \"1,0\" (required for \
         ControlLogix).\n\
         \n\
         Tags are <name>:<TYPE>[<sizes>] where TYPE is one of SINT, INT, DINT,\n\
         LINT, REAL, LREAL and <sizes> is up to three comma-separated array\n\
         dimensions. PCCC types use data-file names, e.g. N7:INT[10].\n\
         \n\
         Example: ab_server --plc=ControlLogix --path=1,0 --tag=MyTag:DINT[10]"
    );
    ExitCode::from(1)
}

fn parse_args() -> Result<Args, ExitCode> {
    let mut plc = None;
    let mut route = Vec::new();
    let mut tags = Vec::new();
    let mut reject_fo = 0;
    let mut debug = false;

    for arg in std::env::args().skip(1) {
        if let Some(v) = arg.strip_prefix("--plc=") {
            if plc.is_some() {
                eprintln!("PLC type can only be given once");
                return Err(usage());
            }
            plc = Some(v.parse::<PlcKind>().map_err(|_| {
                eprintln!("unsupported PLC type {v}");
                usage()
            })?);
        } else if let Some(v) = arg.strip_prefix("--path=") {
            for seg in v.split(',') {
                match seg.trim().parse::<u8>() {
                    Ok(b) => route.push(b),
                    Err(_) => {
                        eprintln!("bad path segment {seg}");
                        return Err(usage());
                    },
                }
            }
        } else if let Some(v) = arg.strip_prefix("--tag=") {
            tags.push(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--reject_fo=") {
            reject_fo = v.parse().map_err(|_| {
                eprintln!("bad --reject_fo value {v}");
                usage()
            })?;
        } else if arg == "--debug" {
            debug = true;
        } else {
            eprintln!("unknown argument {arg}");
            return Err(usage());
        }
    }

    let Some(plc) = plc else {
        eprintln!("a --plc= argument is required");
        return Err(usage());
    };
    if plc.requires_path() && route.is_empty() {
        eprintln!("this PLC type requires a --path argument");
        return Err(usage());
    }
    if tags.is_empty() {
        eprintln!("at least one --tag is required");
        return Err(usage());
    }

    Ok(Args { plc, route, tags, reject_fo, debug })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(a) => a,
        Err(code) => return code,
    };

    let _guard = match init_logger() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("logger setup failed: {e}");
            return ExitCode::from(1);
        },
    };
    set_debug_level(if args.debug { 5 } else { 2 });

    let plc = Arc::new(ServerPlc::new(args.plc, &args.route));
    plc.set_reject_fo(args.reject_fo);
    for spec in &args.tags {
        if let Err(e) = plc.add_tag(spec) {
            eprintln!("bad tag {spec}: {e}");
            return ExitCode::from(1);
        }
    }

    let server = match AbServer::bind(plc, LISTEN_ADDR).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("server start failed: {e}");
            return ExitCode::from(1);
        },
    };
    info!("simulating a {} PLC on {LISTEN_ADDR}", args.plc);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            server.shutdown();
        },
        _ = server.run_until_cancelled() => {},
    }

    ExitCode::SUCCESS
}
