// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! The ES2 host driver, attach/detach and CPort sends.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use greybus::{
    AllocHint, BufferConstraints, CPortId, Cookie, Error, HostDriver,
    HostHandler, Result, SvcMsg, CPORT_ID_BAD,
};

use crate::config::{
    CPORT_FRAME_MAX, CPORT_HEADER_LEN, MAX_PAYLOAD, NUM_CPORT_IN,
    NUM_CPORT_OUT, SVC_BUFFER_SIZE,
};
use crate::endpoint::Endpoints;
use crate::inbound::{check_status, Disposition, InSlots};
use crate::pool::{OutPool, SlotRef};
use crate::transfer::{
    Complete, Context, InSlot, Rejected, Transfer, TransferId, TransferType,
    UsbDevice,
};

/// Shared state of an attached host.
///
/// Transfers refer back to this through a `Weak`, so the only strong
/// reference is held by [`Es2Host`].
pub(crate) struct HostInner<D: UsbDevice, H: HostHandler + 'static> {
    pub(crate) dev: Arc<D>,
    pub(crate) handler: Arc<H>,
    pub(crate) eps: Endpoints,
    pub(crate) pool: OutPool,
    pub(crate) inbound: InSlots,
    next_id: AtomicU64,
    pub(crate) detached: AtomicBool,
    weak: Weak<Self>,
}

impl<D: UsbDevice, H: HostHandler + 'static> HostInner<D, H> {
    /// A fresh ID for each submission. Zero is never used.
    pub(crate) fn next_id(&self) -> TransferId {
        TransferId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn completer(&self) -> Weak<dyn Complete> {
        self.weak.clone()
    }

    /// Allocates and arms the inbound transfers, then fills the
    /// outbound pool.
    fn setup(&self) -> Result<()> {
        let eps = &self.eps;

        let svc = Transfer::new_in(
            eps.svc_in,
            TransferType::Interrupt,
            eps.svc_interval,
            SVC_BUFFER_SIZE,
            Context::In(InSlot::Svc),
            self.completer(),
        )?;
        self.submit_in(InSlot::Svc, svc).inspect_err(|e| {
            error!("failed to submit svc in transfer: {e}");
        })?;

        for i in 0..NUM_CPORT_IN {
            let t = Transfer::new_in(
                eps.cport_in,
                TransferType::Bulk,
                0,
                CPORT_FRAME_MAX,
                Context::In(InSlot::CPort(i)),
                self.completer(),
            )?;
            self.submit_in(InSlot::CPort(i), t).inspect_err(|e| {
                error!("failed to submit cport in transfer {i}: {e}");
            })?;
        }

        for i in 0..NUM_CPORT_OUT {
            let ctx = Context::CPortOut {
                slot: SlotRef::Pool(i),
                cookie: Cookie::from_raw(0),
            };
            let t = Transfer::new_out(
                eps.cport_out,
                CPORT_FRAME_MAX,
                AllocHint::Normal,
                ctx,
                self.completer(),
            )?;
            let idx = self.pool.add(t).map_err(|_| Error::NoSpace)?;
            debug_assert_eq!(idx, i);
        }
        Ok(())
    }

    fn send(
        &self,
        cport: CPortId,
        payload: &[u8],
        hint: AllocHint,
    ) -> Result<Cookie> {
        if payload.len() > MAX_PAYLOAD {
            error!(
                "cport {cport}: payload of {} bytes exceeds {MAX_PAYLOAD}",
                payload.len()
            );
            return Err(Error::BadArgument);
        }
        if cport == CPORT_ID_BAD {
            error!("request to send to the reserved cport");
            return Err(Error::BadArgument);
        }
        // Only a single byte for the CPort ID on the wire
        let Ok(wire_id) = u8::try_from(cport.0) else {
            error!("cport {cport} out of range for the bridge");
            return Err(Error::BadArgument);
        };
        if self.detached.load(Ordering::Acquire) {
            return Err(Error::NoDevice);
        }

        let id = self.next_id();
        let cookie = Cookie::from_raw(id.raw());

        let (slot, mut xfer) = match self.pool.acquire(id)? {
            Some(s) => s,
            None => {
                warn!("cport out transfers exhausted, allocating another");
                let ctx = Context::CPortOut {
                    slot: SlotRef::Overflow,
                    cookie,
                };
                let t = Transfer::new_out(
                    self.eps.cport_out,
                    payload.len() + CPORT_HEADER_LEN,
                    hint,
                    ctx,
                    self.completer(),
                )?;
                self.pool.track_overflow(id)?;
                (SlotRef::Overflow, t)
            }
        };

        let ctx = Context::CPortOut { slot, cookie };
        xfer.fill_frame(id, wire_id, payload, ctx);
        trace!("cport {cport} out: {} bytes, {cookie}", payload.len());

        if let Err(Rejected { transfer, error }) = self.dev.submit(xfer) {
            debug!("cport {cport} out: submit failed, {error}");
            self.pool.release(slot, transfer);
            return Err(error);
        }

        // Raced with teardown, which may have missed this submission
        if self.pool.is_closed() {
            self.dev.kill(id);
        }
        Ok(cookie)
    }

    /// Completion of an outbound transfer.
    fn cport_out_complete(
        &self,
        slot: SlotRef,
        cookie: Cookie,
        xfer: Transfer,
    ) {
        let status = xfer.status();
        match check_status(status) {
            Disposition::Ok => trace!("cport out {cookie} sent"),
            Disposition::Retry | Disposition::Gone => {
                debug!("cport out {cookie}: {status}")
            }
            Disposition::Unexpected => {
                error!("cport out {cookie}: unexpected status {status}")
            }
        }

        let payload = xfer.buffer().get(CPORT_HEADER_LEN..).unwrap_or_default();
        self.handler.data_sent(cookie, payload, status);
        self.pool.release(slot, xfer);
    }

    /// Releases everything. Idempotent.
    ///
    /// Outbound transfers are killed first, then CPort in and the SVC
    /// transfer. Kills complete synchronously, so no transfer is in
    /// flight once this returns.
    fn teardown(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("tearing down");

        for id in self.pool.close() {
            self.dev.kill(id);
        }
        for id in self.inbound.close() {
            self.dev.kill(id);
        }

        self.handler.host_removed();
        info!("ES2 host detached");
    }
}

impl<D: UsbDevice, H: HostHandler + 'static> Complete for HostInner<D, H> {
    fn complete(&self, transfer: Transfer) {
        match transfer.context() {
            Context::CPortOut { slot, cookie } => {
                self.cport_out_complete(slot, cookie, transfer)
            }
            Context::In(slot) => self.in_complete(slot, transfer),
        }
    }
}

/// Transfer accounting, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Pool transfers currently in flight
    pub pool_busy: usize,
    /// Overflow transfers currently in flight
    pub overflow: usize,
    /// Armed inbound transfers, CPort and SVC
    pub inbound_armed: usize,
}

/// A Greybus host driver for an ES2 USB bridge.
///
/// `D` is the USB device and `H` the Greybus core receiving data and
/// completions. All methods take `&self` and may be called from
/// multiple threads.
///
/// Dropping the host detaches it.
pub struct Es2Host<D: UsbDevice, H: HostHandler + 'static> {
    inner: Arc<HostInner<D, H>>,
}

impl<D: UsbDevice, H: HostHandler + 'static> Es2Host<D, H> {
    /// Attach to a bridge device.
    ///
    /// Binds the endpoints and arms all inbound transfers. On failure
    /// anything already set up is torn down (including a call to
    /// [`HostHandler::host_removed`] once endpoints were found) and the
    /// error returned.
    pub fn attach(dev: Arc<D>, handler: Arc<H>) -> Result<Self> {
        let eps = Endpoints::discover(dev.endpoints())?;

        let inner = Arc::new_cyclic(|weak| HostInner {
            dev,
            handler,
            eps,
            pool: OutPool::new(),
            inbound: InSlots::new(),
            next_id: AtomicU64::new(1),
            detached: AtomicBool::new(false),
            weak: weak.clone(),
        });
        let host = Self { inner };

        // On error the host is dropped, which tears down.
        host.inner.setup()?;
        info!(
            "ES2 host attached, svc in {:#04x}, cport in {:#04x}, out {:#04x}",
            eps.svc_in, eps.cport_in, eps.cport_out
        );
        Ok(host)
    }

    /// Send a payload to a CPort.
    ///
    /// Returns a cookie once the transfer is submitted. Completion is
    /// reported with [`HostHandler::data_sent`].
    pub fn send(
        &self,
        cport: CPortId,
        payload: &[u8],
        hint: AllocHint,
    ) -> Result<Cookie> {
        self.inner.send(cport, payload, hint)
    }

    /// Cancel an in-flight send.
    ///
    /// If the send is still in flight, its `data_sent` with
    /// [`TransferStatus::Killed`](greybus::TransferStatus::Killed) is
    /// called before this returns. Completed, stale or unknown cookies
    /// are ignored.
    pub fn cancel(&self, cookie: Cookie) {
        let id = TransferId(cookie.raw());
        // Only sends may be killed, never the inbound transfers
        if !self.inner.pool.owns(id) {
            debug!("cancel {cookie}: not an in-flight send");
            return;
        }
        trace!("cancel {cookie}");
        self.inner.dev.kill(id);
    }

    /// Send a message to the SVC over the control pipe.
    ///
    /// Blocks until sent, or until
    /// [`CONTROL_TIMEOUT_MS`](crate::config::CONTROL_TIMEOUT_MS) has passed.
    pub fn submit_svc(&self, msg: &SvcMsg) -> Result<()> {
        self.inner.submit_svc(msg)
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.eps
    }

    pub fn device(&self) -> &Arc<D> {
        &self.inner.dev
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            pool_busy: self.inner.pool.busy(),
            overflow: self.inner.pool.overflow(),
            inbound_armed: self.inner.inbound.armed(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire)
    }

    /// Detach from the device.
    ///
    /// All in-flight transfers are killed, then
    /// [`HostHandler::host_removed`] is called. The device and handler
    /// references are released.
    pub fn detach(self) {
        self.inner.teardown()
    }
}

impl<D: UsbDevice, H: HostHandler + 'static> Drop for Es2Host<D, H> {
    fn drop(&mut self) {
        self.inner.teardown()
    }
}

impl<D: UsbDevice, H: HostHandler + 'static> HostDriver for Es2Host<D, H> {
    fn buffer_constraints(&self) -> BufferConstraints {
        BufferConstraints {
            header_len: CPORT_HEADER_LEN,
            size_max: MAX_PAYLOAD,
        }
    }

    fn buffer_send(
        &self,
        cport: CPortId,
        payload: &[u8],
        hint: AllocHint,
    ) -> Result<Cookie> {
        self.send(cport, payload, hint)
    }

    fn buffer_cancel(&self, cookie: Cookie) {
        self.cancel(cookie)
    }

    fn submit_svc(&self, msg: &SvcMsg) -> Result<()> {
        Es2Host::submit_svc(self, msg)
    }
}
