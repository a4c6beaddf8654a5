// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Inbound CPort data and SVC message receivers.
//!
//! Each inbound transfer is armed for the lifetime of the host. A
//! completion forwards the received data upwards then re-arms the same
//! transfer, unless the device has gone away.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use core::cell::RefCell;

use greybus::{CPortId, Error, HostHandler, Result, TransferStatus};

use crate::config::NUM_CPORT_IN;
use crate::host::HostInner;
use crate::transfer::{InSlot, Rejected, Transfer, TransferId, UsbDevice};

type RawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
type BlockingMutex<T> =
    embassy_sync::blocking_mutex::Mutex<RawMutex, RefCell<T>>;

/// What to do with a completed transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Disposition {
    /// Process the data
    Ok,
    /// Transient failure, re-arm quietly
    Retry,
    /// The device is going away, don't re-arm
    Gone,
    /// Not expected, log and re-arm
    Unexpected,
}

/// Classifies a completion status.
pub(crate) fn check_status(status: TransferStatus) -> Disposition {
    use TransferStatus::*;
    match status {
        Completed => Disposition::Ok,
        Protocol | Again => Disposition::Retry,
        Reset | Killed | Shutdown | Sequence => Disposition::Gone,
        Overflow | Stall | Other(_) => Disposition::Unexpected,
    }
}

/// Splits a CPort frame into its ID prefix and payload.
///
/// Returns `None` for an empty frame.
pub(crate) fn split_frame(frame: &[u8]) -> Option<(CPortId, &[u8])> {
    let (&id, data) = frame.split_first()?;
    Some((CPortId(id as u16), data))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InState {
    /// Submitted with this ID
    Armed(TransferId),
    /// Completion is being processed
    Busy,
    /// Not submitted, and won't be again
    Idle,
}

#[derive(Debug)]
struct Inner {
    cport: [InState; NUM_CPORT_IN],
    svc: InState,
    closed: bool,
}

impl Inner {
    fn state(&mut self, slot: InSlot) -> &mut InState {
        match slot {
            InSlot::Svc => &mut self.svc,
            InSlot::CPort(i) => &mut self.cport[i],
        }
    }
}

/// Arming state of the inbound transfers.
pub(crate) struct InSlots {
    inner: BlockingMutex<Inner>,
}

impl InSlots {
    pub fn new() -> Self {
        Self {
            inner: BlockingMutex::new(RefCell::new(Inner {
                cport: [InState::Idle; NUM_CPORT_IN],
                svc: InState::Idle,
                closed: false,
            })),
        }
    }

    /// Marks `slot` armed with `id`, prior to submission.
    ///
    /// Returns `false` once closed, leaving the slot idle.
    pub fn arm(&self, slot: InSlot, id: TransferId) -> bool {
        self.inner.lock(|i| {
            let mut i = i.borrow_mut();
            let closed = i.closed;
            let s = i.state(slot);
            if closed {
                *s = InState::Idle;
                false
            } else {
                *s = InState::Armed(id);
                true
            }
        })
    }

    /// Marks `slot` idle, after a failed submission or departure.
    pub fn disarm(&self, slot: InSlot) {
        self.inner.lock(|i| *i.borrow_mut().state(slot) = InState::Idle)
    }

    /// A completion for `slot` is being processed.
    pub fn completed(&self, slot: InSlot) {
        self.inner.lock(|i| {
            let mut i = i.borrow_mut();
            let s = i.state(slot);
            if matches!(s, InState::Armed(_)) {
                *s = InState::Busy;
            }
        })
    }

    /// Closes all slots, returning the armed IDs to kill.
    ///
    /// Data slots come first, then the SVC slot.
    pub fn close(&self) -> heapless::Vec<TransferId, { NUM_CPORT_IN + 1 }> {
        self.inner.lock(|i| {
            let mut i = i.borrow_mut();
            i.closed = true;
            let mut ids = heapless::Vec::new();
            let Inner { cport, svc, .. } = &mut *i;
            for s in cport.iter_mut().chain(core::iter::once(svc)) {
                if let InState::Armed(id) = *s {
                    // capacity is the number of slots
                    let _ = ids.push(id);
                    *s = InState::Idle;
                }
            }
            ids
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock(|i| i.borrow().closed)
    }

    /// Number of armed transfers, data and SVC
    pub fn armed(&self) -> usize {
        self.inner.lock(|i| {
            let i = i.borrow();
            i.cport
                .iter()
                .chain(core::iter::once(&i.svc))
                .filter(|s| matches!(s, InState::Armed(_)))
                .count()
        })
    }
}

impl<D: UsbDevice, H: HostHandler + 'static> HostInner<D, H> {
    /// Submits an inbound transfer for `slot`.
    ///
    /// The transfer is dropped on failure, leaving the slot idle.
    pub(crate) fn submit_in(
        &self,
        slot: InSlot,
        mut xfer: Transfer,
    ) -> Result<()> {
        let id = self.next_id();
        if !self.inbound.arm(slot, id) {
            return Err(Error::NoDevice);
        }
        xfer.rearm(id);

        if let Err(Rejected { transfer, error }) = self.dev.submit(xfer) {
            self.inbound.disarm(slot);
            drop(transfer);
            return Err(error);
        }

        // Raced with teardown, which may have missed this submission
        if self.inbound.is_closed() {
            self.dev.kill(id);
        }
        Ok(())
    }

    /// Completion of an inbound transfer.
    pub(crate) fn in_complete(&self, slot: InSlot, xfer: Transfer) {
        self.inbound.completed(slot);

        let status = xfer.status();
        match check_status(status) {
            Disposition::Ok => {
                if !self.inbound.is_closed() {
                    match slot {
                        InSlot::Svc => self.svc_in_data(&xfer),
                        InSlot::CPort(_) => self.cport_in_data(&xfer),
                    }
                }
            }
            Disposition::Retry => (),
            Disposition::Gone => {
                debug!("{slot:?} in: device departing, {status}");
                self.inbound.disarm(slot);
                return;
            }
            Disposition::Unexpected => {
                error!("{slot:?} in: unexpected status {status}");
            }
        }

        match self.submit_in(slot, xfer) {
            Ok(()) => (),
            Err(Error::NoDevice) if self.inbound.is_closed() => (),
            Err(e) => error!("{slot:?} in: failed to resubmit: {e}"),
        }
    }

    fn cport_in_data(&self, xfer: &Transfer) {
        let Some((cport, data)) = split_frame(xfer.received()) else {
            error!("cport in: empty frame received");
            return;
        };
        trace!("cport {cport} in: {} bytes", data.len());
        self.handler.data_received(cport, data);
    }

    fn svc_in_data(&self, xfer: &Transfer) {
        let msg = xfer.received();
        trace!("svc in: {} bytes", msg.len());
        self.handler.svc_message(msg);
    }
}
