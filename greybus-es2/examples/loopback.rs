// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! ES2 loopback demo
//!
//! Attaches to a simulated bridge, sends CPort messages and echoes them
//! back as received data.
//! ```
//! cargo run --example loopback -- -v --count 4
//! ```

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use std::sync::Arc;

use anyhow::{bail, Result};
use log::LevelFilter;

use greybus::{
    AllocHint, CPortId, Cookie, HostDriver, HostHandler, SvcMsg,
    TransferStatus,
};
use greybus_es2::sim::SimBridge;
use greybus_es2::Es2Host;

/** ES2 simulated loopback
 */
#[derive(argh::FromArgs)]
struct Args {
    #[argh(switch, short = 'v')]
    /// verbose
    verbose: bool,

    #[argh(switch)]
    /// trace, extra verbose
    trace: bool,

    #[argh(option, default = "3")]
    /// number of messages to send
    count: usize,

    #[argh(option, default = "1")]
    /// destination cport
    cport: u16,
}

struct Printer;

impl HostHandler for Printer {
    fn data_received(&self, cport: CPortId, data: &[u8]) {
        info!("cport {cport} received {data:02x?}");
    }

    fn svc_message(&self, msg: &[u8]) {
        info!("svc message {msg:02x?}");
    }

    fn data_sent(
        &self,
        cookie: Cookie,
        payload: &[u8],
        status: TransferStatus,
    ) {
        info!("sent {cookie}, {} bytes: {status}", payload.len());
    }

    fn host_removed(&self) {
        info!("host removed");
    }
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    let level = if args.trace {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let conf = simplelog::ConfigBuilder::new().build();
    simplelog::SimpleLogger::init(level, conf)?;

    let sim = Arc::new(SimBridge::new());
    let host = Es2Host::attach(sim.clone(), Arc::new(Printer))?;
    info!("buffer constraints {:?}", host.buffer_constraints());

    let hello = SvcMsg::new(0x01, 0x02, b"hello")?;
    host.submit_svc(&hello)?;

    for i in 0..args.count {
        let payload = format!("message {i}");
        host.send(CPortId(args.cport), payload.as_bytes(), AllocHint::Normal)?;
    }

    let n = sim.loopback();
    if n != args.count {
        bail!("echoed {n} of {} messages", args.count);
    }
    info!("stats {:?}", host.stats());

    host.detach();
    Ok(())
}
