// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Drives an `Es2Host` through a simulated bridge.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use proptest::prelude::*;

use greybus::{
    AllocHint, BufferConstraints, CPortId, Cookie, Error, HostDriver,
    HostHandler, SvcMsg, TransferStatus, CPORT_ID_BAD,
};
use greybus_es2::config::{
    CONTROL_TIMEOUT_MS, MAX_PAYLOAD, NUM_CPORT_IN, NUM_CPORT_OUT,
    SVC_BUFFER_SIZE,
};
use greybus_es2::sim::{SimBridge, SIM_CPORT_IN, SIM_CPORT_OUT, SIM_SVC_IN};
use greybus_es2::{
    ControlSetup, EndpointDescriptor, Es2Host, HostStats, TransferType,
};

fn start_log() {
    let _ = env_logger::Builder::new()
        .filter(None, log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Data(CPortId, Vec<u8>),
    Svc(Vec<u8>),
    Sent(Cookie, Vec<u8>, TransferStatus),
    Removed,
}

/// Records every upcall
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn push(&self, ev: Event) {
        self.events.lock().unwrap().push(ev)
    }

    fn take(&self) -> Vec<Event> {
        core::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl HostHandler for Recorder {
    fn data_received(&self, cport: CPortId, data: &[u8]) {
        self.push(Event::Data(cport, data.to_vec()))
    }

    fn svc_message(&self, msg: &[u8]) {
        self.push(Event::Svc(msg.to_vec()))
    }

    fn data_sent(
        &self,
        cookie: Cookie,
        payload: &[u8],
        status: TransferStatus,
    ) {
        self.push(Event::Sent(cookie, payload.to_vec(), status))
    }

    fn host_removed(&self) {
        self.push(Event::Removed)
    }
}

type Host = Es2Host<SimBridge, Recorder>;

fn attach() -> (Arc<SimBridge>, Arc<Recorder>, Host) {
    start_log();
    let sim = Arc::new(SimBridge::new());
    let rec = Arc::new(Recorder::default());
    let host = Es2Host::attach(sim.clone(), rec.clone()).unwrap();
    (sim, rec, host)
}

fn bulk(address: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        address,
        transfer_type: TransferType::Bulk,
        max_packet_size: 512,
        interval: 0,
    }
}

#[test]
fn attach_arms_inbound() {
    let (sim, rec, host) = attach();

    assert_eq!(sim.armed(SIM_SVC_IN), 1);
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN);
    assert_eq!(sim.armed(SIM_CPORT_OUT), 0);
    assert_eq!(
        host.stats(),
        HostStats {
            pool_busy: 0,
            overflow: 0,
            inbound_armed: NUM_CPORT_IN + 1,
        }
    );
    assert_eq!(host.endpoints().svc_interval, 4);
    assert_eq!(
        host.buffer_constraints(),
        BufferConstraints {
            header_len: 1,
            size_max: MAX_PAYLOAD,
        }
    );
    assert!(rec.take().is_empty());
}

#[test]
fn attach_missing_endpoint() {
    start_log();
    // No bulk out
    let sim = Arc::new(SimBridge::with_endpoints(&[
        EndpointDescriptor {
            address: 0x81,
            transfer_type: TransferType::Interrupt,
            max_packet_size: 64,
            interval: 1,
        },
        bulk(0x82),
    ]));
    let rec = Arc::new(Recorder::default());

    let r = Es2Host::attach(sim.clone(), rec.clone());
    assert!(matches!(r, Err(Error::MissingEndpoint("bulk out"))));
    assert_eq!(sim.submitted(), 0);
    assert!(rec.take().is_empty());
    assert_eq!(Arc::strong_count(&sim), 1);
}

#[test]
fn attach_unwinds_on_submit_failure() {
    start_log();
    // Fail the svc transfer, then each cport in transfer in turn
    for n in 0..=NUM_CPORT_IN {
        let sim = Arc::new(SimBridge::new());
        let rec = Arc::new(Recorder::default());
        sim.fail_submit_after(n);

        let r = Es2Host::attach(sim.clone(), rec.clone());
        assert!(matches!(r, Err(Error::TxFailure)), "n {n}");
        drop(r);

        assert_eq!(sim.submitted(), n);
        assert_eq!(sim.in_flight(), 0);
        assert_eq!(sim.completed(), sim.submitted());
        assert_eq!(rec.take(), [Event::Removed]);
        assert_eq!(Arc::strong_count(&sim), 1);
        assert_eq!(Arc::strong_count(&rec), 1);
    }
}

#[test]
fn send_completes_once() {
    let (sim, rec, host) = attach();

    for c in [0u16, 1, 7, 255] {
        let payload = [c as u8 ^ 0x5a, 0x01, 0x02];
        let cookie =
            host.send(CPortId(c), &payload, AllocHint::Normal).unwrap();
        assert_eq!(host.stats().pool_busy, 1);

        let frame = sim.complete_out(TransferStatus::Completed).unwrap();
        assert_eq!(frame[0], c as u8);
        assert_eq!(&frame[1..], &payload);

        assert_eq!(
            rec.take(),
            [Event::Sent(cookie, payload.to_vec(), TransferStatus::Completed)]
        );
        assert_eq!(host.stats().pool_busy, 0);
    }
    assert!(sim.complete_out(TransferStatus::Completed).is_none());
    assert!(rec.take().is_empty());
}

#[test]
fn send_max_payload() {
    let (sim, rec, host) = attach();

    let payload = vec![0xa5; MAX_PAYLOAD + 1];
    let submitted = sim.submitted();
    let r = host.send(CPortId(3), &payload, AllocHint::Normal);
    assert!(matches!(r, Err(Error::BadArgument)));
    assert_eq!(sim.submitted(), submitted);

    let cookie = host
        .send(CPortId(3), &payload[..MAX_PAYLOAD], AllocHint::Normal)
        .unwrap();
    let frame = sim.complete_out(TransferStatus::Completed).unwrap();
    assert_eq!(frame.len(), MAX_PAYLOAD + 1);
    let ev = rec.take();
    assert!(
        matches!(&ev[..], [Event::Sent(c, p, TransferStatus::Completed)]
            if *c == cookie && p.len() == MAX_PAYLOAD)
    );

    // Empty payloads are fine
    host.send(CPortId(4), &[], AllocHint::Normal).unwrap();
    assert_eq!(sim.complete_out(TransferStatus::Completed).unwrap(), [4]);
}

#[test]
fn send_reserved_cport() {
    let (sim, rec, host) = attach();
    let submitted = sim.submitted();

    let r = host.send(CPORT_ID_BAD, &[1, 2, 3], AllocHint::Normal);
    assert!(matches!(r, Err(Error::BadArgument)));
    let r = host.buffer_send(CPORT_ID_BAD, &[], AllocHint::Atomic);
    assert!(matches!(r, Err(Error::BadArgument)));

    assert_eq!(sim.submitted(), submitted);
    assert_eq!(sim.armed(SIM_CPORT_OUT), 0);
    assert!(rec.take().is_empty());
}

proptest! {
    #[test]
    fn send_wide_cport(c in 256u16..0xffff) {
        let (sim, _rec, host) = attach();
        let submitted = sim.submitted();
        let r = host.send(CPortId(c), &[0x11], AllocHint::Normal);
        prop_assert!(matches!(r, Err(Error::BadArgument)));
        prop_assert_eq!(sim.submitted(), submitted);
    }

    #[test]
    fn send_any(
        c in 0u16..=255,
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let (sim, rec, host) = attach();
        let cookie =
            host.send(CPortId(c), &payload, AllocHint::Normal).unwrap();
        let frame = sim.complete_out(TransferStatus::Completed).unwrap();
        prop_assert_eq!(frame[0] as u16, c);
        prop_assert_eq!(
            rec.take(),
            vec![Event::Sent(cookie, payload, TransferStatus::Completed)]
        );
    }
}

#[test]
fn pool_overflow() {
    let (sim, rec, host) = attach();

    let mut cookies = Vec::new();
    for i in 0..NUM_CPORT_OUT + 3 {
        // Atomic overflow allocations succeed here too
        let hint = if i % 2 == 0 {
            AllocHint::Normal
        } else {
            AllocHint::Atomic
        };
        let c = host.send(CPortId(9), &[i as u8], hint).unwrap();
        cookies.push(c);
        assert!(host.stats().pool_busy <= NUM_CPORT_OUT);
    }
    assert_eq!(
        host.stats(),
        HostStats {
            pool_busy: NUM_CPORT_OUT,
            overflow: 3,
            inbound_armed: NUM_CPORT_IN + 1,
        }
    );
    assert_eq!(sim.armed(SIM_CPORT_OUT), NUM_CPORT_OUT + 3);

    while sim.complete_out(TransferStatus::Completed).is_some() {}

    let expect = cookies
        .iter()
        .enumerate()
        .map(|(i, c)| Event::Sent(*c, vec![i as u8], TransferStatus::Completed))
        .collect::<Vec<_>>();
    assert_eq!(rec.take(), expect);

    let stats = host.stats();
    assert_eq!((stats.pool_busy, stats.overflow), (0, 0));

    // Cookies are never reused
    let mut sorted = cookies.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), cookies.len());
}

#[test]
fn cancel() {
    let (sim, rec, host) = attach();

    let c1 = host.send(CPortId(2), &[0xaa], AllocHint::Normal).unwrap();
    host.cancel(c1);
    assert_eq!(
        rec.take(),
        [Event::Sent(c1, vec![0xaa], TransferStatus::Killed)]
    );
    assert_eq!(host.stats().pool_busy, 0);

    // Again, no effect
    host.cancel(c1);
    assert!(rec.take().is_empty());

    // After completion
    let c2 = host.send(CPortId(2), &[0xbb], AllocHint::Normal).unwrap();
    sim.complete_out(TransferStatus::Completed).unwrap();
    host.buffer_cancel(c2);
    assert_eq!(
        rec.take(),
        [Event::Sent(c2, vec![0xbb], TransferStatus::Completed)]
    );

    // A stale cookie doesn't touch a later send on the same slot
    let c3 = host.send(CPortId(2), &[0xcc], AllocHint::Normal).unwrap();
    host.cancel(c1);
    host.cancel(c2);
    assert_eq!(sim.armed(SIM_CPORT_OUT), 1);
    assert!(rec.take().is_empty());
    sim.complete_out(TransferStatus::Completed).unwrap();
    assert_eq!(
        rec.take(),
        [Event::Sent(c3, vec![0xcc], TransferStatus::Completed)]
    );
}

#[test]
fn cancel_inbound_cookie() {
    let (sim, rec, host) = attach();

    // The svc transfer is the first submission, cport in follow
    host.cancel(Cookie::from_raw(1));
    host.buffer_cancel(Cookie::from_raw(2));
    host.cancel(Cookie::from_raw(u64::MAX));

    assert_eq!(sim.armed(SIM_SVC_IN), 1);
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN);
    assert_eq!(host.stats().inbound_armed, NUM_CPORT_IN + 1);
    assert!(rec.take().is_empty());

    // Still delivering
    assert!(sim.deliver_svc(TransferStatus::Completed, &[0x10]));
    assert_eq!(rec.take(), [Event::Svc(vec![0x10])]);
}

#[test]
fn send_submit_failure() {
    let (sim, rec, host) = attach();

    sim.fail_submit_after(0);
    let r = host.send(CPortId(6), &[0x01], AllocHint::Normal);
    assert!(matches!(r, Err(Error::TxFailure)));
    assert_eq!(host.stats().pool_busy, 0);
    assert_eq!(sim.armed(SIM_CPORT_OUT), 0);
    assert!(rec.take().is_empty());

    // The slot went back to the pool
    let mut cookies = Vec::new();
    for i in 0..NUM_CPORT_OUT {
        let c = host.send(CPortId(6), &[i as u8], AllocHint::Normal);
        cookies.push(c.unwrap());
    }
    assert_eq!(host.stats().pool_busy, NUM_CPORT_OUT);
    assert_eq!(host.stats().overflow, 0);

    // Failed overflow send
    sim.fail_submit_after(0);
    let r = host.send(CPortId(6), &[0xff], AllocHint::Atomic);
    assert!(matches!(r, Err(Error::TxFailure)));
    assert_eq!(host.stats().overflow, 0);
    assert_eq!(sim.armed(SIM_CPORT_OUT), NUM_CPORT_OUT);
    assert!(rec.take().is_empty());

    while sim.complete_out(TransferStatus::Completed).is_some() {}
    let expect = cookies
        .iter()
        .enumerate()
        .map(|(i, c)| Event::Sent(*c, vec![i as u8], TransferStatus::Completed))
        .collect::<Vec<_>>();
    assert_eq!(rec.take(), expect);
    let stats = host.stats();
    assert_eq!((stats.pool_busy, stats.overflow), (0, 0));
}

#[test]
fn cport_in_demux() {
    let (sim, rec, _host) = attach();
    let submitted = sim.submitted();

    assert!(sim.deliver_cport(TransferStatus::Completed, &[5, 0xaa, 0xbb]));
    assert_eq!(rec.take(), [Event::Data(CPortId(5), vec![0xaa, 0xbb])]);
    // Re-armed before the completion returned
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN);
    assert_eq!(sim.submitted(), submitted + 1);

    assert!(sim.deliver_cport(TransferStatus::Completed, &[0xff]));
    assert_eq!(rec.take(), [Event::Data(CPortId(255), vec![])]);

    // Empty frame is dropped
    assert!(sim.deliver_cport(TransferStatus::Completed, &[]));
    assert!(rec.take().is_empty());
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN);
}

#[test]
fn cport_in_full_frame() {
    let (sim, rec, _host) = attach();

    let mut frame = vec![7u8; MAX_PAYLOAD + 1];
    assert!(sim.deliver_cport(TransferStatus::Completed, &frame));
    let ev = rec.take();
    assert!(matches!(
        &ev[..],
        [Event::Data(CPortId(7), d)] if d.len() == MAX_PAYLOAD
    ));

    // Too large for the buffer
    frame.push(7);
    assert!(sim.deliver_cport(TransferStatus::Completed, &frame));
    assert!(rec.take().is_empty());
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN);
}

#[test]
fn inbound_errors_rearm() {
    let (sim, rec, host) = attach();

    for status in [
        TransferStatus::Protocol,
        TransferStatus::Again,
        TransferStatus::Overflow,
        TransferStatus::Stall,
        TransferStatus::Other(-71),
    ] {
        assert!(sim.deliver_cport(status, &[1, 2]));
        assert!(sim.deliver_svc(status, &[1, 2]));
        assert!(rec.take().is_empty(), "{status}");
        assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN, "{status}");
        assert_eq!(sim.armed(SIM_SVC_IN), 1, "{status}");
    }
    assert_eq!(host.stats().inbound_armed, NUM_CPORT_IN + 1);
}

#[test]
fn failed_rearm_leaves_slot_idle() {
    let (sim, rec, host) = attach();

    // Data is passed up before the re-arm fails
    sim.fail_submit_after(0);
    assert!(sim.deliver_cport(TransferStatus::Completed, &[3, 1]));
    assert_eq!(rec.take(), [Event::Data(CPortId(3), vec![1])]);
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN - 1);
    assert_eq!(host.stats().inbound_armed, NUM_CPORT_IN);

    sim.fail_submit_after(0);
    assert!(sim.deliver_svc(TransferStatus::Completed, &[9]));
    assert_eq!(rec.take(), [Event::Svc(vec![9])]);
    assert_eq!(sim.armed(SIM_SVC_IN), 0);
    assert_eq!(host.stats().inbound_armed, NUM_CPORT_IN - 1);

    // Detach kills only the transfers still armed
    host.detach();
    assert_eq!(rec.take(), [Event::Removed]);
    assert_eq!(sim.in_flight(), 0);
}

#[test]
fn inbound_departure() {
    let (sim, rec, host) = attach();

    let departing = [
        TransferStatus::Reset,
        TransferStatus::Killed,
        TransferStatus::Shutdown,
        TransferStatus::Sequence,
    ];
    for (i, status) in departing.into_iter().enumerate() {
        if i >= NUM_CPORT_IN {
            break;
        }
        assert!(sim.deliver_cport(status, &[1, 2]));
        assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN - i - 1);
    }
    assert!(sim.deliver_svc(TransferStatus::Shutdown, &[]));
    assert_eq!(sim.armed(SIM_SVC_IN), 0);
    assert!(rec.take().is_empty());

    let c = host.send(CPortId(1), &[0x42], AllocHint::Normal).unwrap();
    sim.disconnect();
    assert_eq!(
        rec.take(),
        [Event::Sent(c, vec![0x42], TransferStatus::Shutdown)]
    );
    assert_eq!(sim.in_flight(), 0);
    assert_eq!(host.stats().inbound_armed, 0);

    // Fails at submission
    let r = host.send(CPortId(1), &[0x43], AllocHint::Normal);
    assert!(matches!(r, Err(Error::NoDevice)));
    assert_eq!(host.stats().pool_busy, 0);
    assert!(rec.take().is_empty());

    let msg = SvcMsg::new(1, 1, &[]).unwrap();
    assert!(matches!(host.submit_svc(&msg), Err(Error::NoDevice)));

    host.detach();
    assert_eq!(rec.take(), [Event::Removed]);
}

#[test]
fn svc_in() {
    let (sim, rec, _host) = attach();

    assert!(sim.deliver_svc(TransferStatus::Completed, &[1, 2, 3]));
    assert!(sim.deliver_svc(TransferStatus::Completed, &[]));
    assert_eq!(rec.take(), [Event::Svc(vec![1, 2, 3]), Event::Svc(vec![])]);
    assert_eq!(sim.armed(SIM_SVC_IN), 1);

    let big = vec![0x3c; SVC_BUFFER_SIZE];
    assert!(sim.deliver_svc(TransferStatus::Completed, &big));
    assert_eq!(rec.take(), [Event::Svc(big)]);

    // Overflows the buffer
    let bigger = vec![0x3c; SVC_BUFFER_SIZE + 1];
    assert!(sim.deliver_svc(TransferStatus::Completed, &bigger));
    assert!(rec.take().is_empty());
    assert_eq!(sim.armed(SIM_SVC_IN), 1);
}

#[test]
fn svc_out() {
    let (sim, _rec, host) = attach();

    let msg = SvcMsg::new(0x02, 0x05, &[9, 8, 7]).unwrap();
    host.submit_svc(&msg).unwrap();
    HostDriver::submit_svc(&host, &msg).unwrap();

    let setup = ControlSetup {
        request_type: 0x41,
        request: 0x01,
        value: 0,
        index: 0,
    };
    let sent = sim.control_messages();
    assert_eq!(sent.len(), 2);
    for (s, data) in sent {
        assert_eq!(s, setup);
        assert_eq!(data, msg.to_bytes());
        assert_eq!(data.len(), greybus::SVC_MSG_SIZE);
    }

    sim.short_control(true);
    assert!(matches!(host.submit_svc(&msg), Err(Error::TxFailure)));
}

#[test]
fn svc_out_timeout() {
    let (sim, _rec, host) = attach();
    sim.hang_control(true);

    let msg = SvcMsg::new(0x02, 0x05, &[]).unwrap();
    let start = Instant::now();
    let r = host.submit_svc(&msg);
    assert!(matches!(r, Err(Error::TimedOut)));
    let timeout = Duration::from_millis(CONTROL_TIMEOUT_MS as u64);
    assert!(start.elapsed() >= timeout);
    assert!(sim.control_messages().is_empty());

    // Recovers once the device responds
    sim.hang_control(false);
    host.submit_svc(&msg).unwrap();
}

#[test]
fn detach_releases_everything() {
    let (sim, rec, host) = attach();

    let mut cookies = Vec::new();
    for i in 0..NUM_CPORT_OUT + 1 {
        let c = host.send(CPortId(i as u16), &[i as u8], AllocHint::Normal);
        cookies.push(c.unwrap());
    }
    // One completes normally
    sim.complete_out(TransferStatus::Completed).unwrap();
    let ev = rec.take();
    assert_eq!(ev.len(), 1);

    host.detach();

    let ev = rec.take();
    assert_eq!(ev.len(), NUM_CPORT_OUT + 1);
    assert_eq!(ev.last(), Some(&Event::Removed));
    let mut killed = ev[..NUM_CPORT_OUT]
        .iter()
        .map(|e| match e {
            Event::Sent(c, _, TransferStatus::Killed) => *c,
            e => panic!("unexpected {e:?}"),
        })
        .collect::<Vec<_>>();
    killed.sort();
    assert_eq!(killed, cookies[1..]);

    assert_eq!(sim.in_flight(), 0);
    assert_eq!(sim.completed(), sim.submitted());
    assert_eq!(Arc::strong_count(&sim), 1);
    assert_eq!(Arc::strong_count(&rec), 1);

    // Nothing left to complete
    assert!(!sim.deliver_cport(TransferStatus::Completed, &[1, 2]));
    assert!(!sim.deliver_svc(TransferStatus::Completed, &[1, 2]));
    assert!(sim.complete_out(TransferStatus::Completed).is_none());
    assert!(rec.take().is_empty());
}

#[test]
fn drop_detaches() {
    let (sim, rec, host) = attach();
    host.send(CPortId(3), &[1], AllocHint::Normal).unwrap();
    drop(host);

    let ev = rec.take();
    assert!(matches!(
        &ev[..],
        [Event::Sent(_, _, TransferStatus::Killed), Event::Removed]
    ));
    assert_eq!(sim.in_flight(), 0);
    assert_eq!(Arc::strong_count(&sim), 1);
}

#[test]
fn loopback() {
    let (sim, rec, host) = attach();

    let c: Vec<_> = (1..=3u16)
        .map(|i| {
            host.send(CPortId(i), &[i as u8; 4], AllocHint::Normal)
                .unwrap()
        })
        .collect();
    assert_eq!(sim.loopback(), 3);

    let mut expect = Vec::new();
    for (i, cookie) in (1..=3u16).zip(c) {
        let payload = vec![i as u8; 4];
        expect.push(Event::Sent(cookie, payload, TransferStatus::Completed));
        expect.push(Event::Data(CPortId(i), vec![i as u8; 4]));
    }
    assert_eq!(rec.take(), expect);
    assert_eq!(sim.armed(SIM_CPORT_IN), NUM_CPORT_IN);
}

#[test]
fn concurrent_sends() {
    let (sim, rec, host) = attach();
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let host = &host;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    let payload = [t as u8, i as u8];
                    host.send(CPortId(t as u16), &payload, AllocHint::Normal)
                        .unwrap();
                    assert!(host.stats().pool_busy <= NUM_CPORT_OUT);
                }
            });
        }

        let sim = &sim;
        s.spawn(move || {
            let mut done = 0;
            while done < THREADS * PER_THREAD {
                if sim.complete_out(TransferStatus::Completed).is_some() {
                    done += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });
    });

    let ev = rec.take();
    assert_eq!(ev.len(), THREADS * PER_THREAD);
    let mut cookies = ev
        .iter()
        .map(|e| match e {
            Event::Sent(c, p, TransferStatus::Completed) => {
                assert_eq!(p.len(), 2);
                *c
            }
            e => panic!("unexpected {e:?}"),
        })
        .collect::<Vec<_>>();
    cookies.sort();
    cookies.dedup();
    assert_eq!(cookies.len(), THREADS * PER_THREAD);

    let stats = host.stats();
    assert_eq!((stats.pool_busy, stats.overflow), (0, 0));
    assert_eq!(sim.in_flight(), NUM_CPORT_IN + 1);
}
