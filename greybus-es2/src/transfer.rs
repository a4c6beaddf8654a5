// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! USB transfers and the device interface they are submitted to.

#[allow(unused)]
use log::{debug, error, info, trace, warn};

use core::future::Future;
use std::sync::Weak;

use greybus::{AllocHint, Cookie, Error, Result, TransferStatus};

use crate::pool::SlotRef;

/// Endpoint address direction bit, set for IN endpoints.
pub const USB_DIR_IN: u8 = 0x80;
/// Default control pipe address.
pub const USB_EP0: u8 = 0x00;

/// Identifies a single submission of a [`Transfer`].
///
/// A new ID is assigned each time a transfer is submitted, so an ID
/// never refers to a later reuse of the same transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TransferId(pub(crate) u64);

impl TransferId {
    /// Returns the raw value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// USB endpoint transfer type
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// An endpoint of the device's active interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndpointDescriptor {
    /// `bEndpointAddress`, including the direction bit
    pub address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    /// Polling interval, for interrupt endpoints
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn is_in(&self) -> bool {
        self.address & USB_DIR_IN != 0
    }

    pub fn is_int_in(&self) -> bool {
        self.is_in() && self.transfer_type == TransferType::Interrupt
    }

    pub fn is_bulk_in(&self) -> bool {
        self.is_in() && self.transfer_type == TransferType::Bulk
    }

    pub fn is_bulk_out(&self) -> bool {
        !self.is_in() && self.transfer_type == TransferType::Bulk
    }
}

/// Setup packet fields for a control transfer.
///
/// `wLength` is taken from the data passed alongside.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Which host slot a transfer belongs to, for the completion handler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Context {
    CPortOut { slot: SlotRef, cookie: Cookie },
    In(InSlot),
}

/// An inbound transfer slot
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum InSlot {
    Svc,
    CPort(usize),
}

/// Receives transfers given back by the device.
pub(crate) trait Complete: Send + Sync {
    fn complete(&self, transfer: Transfer);
}

/// An asynchronous USB transfer.
///
/// A transfer owns its buffer. It is moved to the [`UsbDevice`] with
/// [`submit()`](UsbDevice::submit), and the device hands it back with
/// [`give_back()`](Transfer::give_back) once finished.
pub struct Transfer {
    id: TransferId,
    endpoint: u8,
    typ: TransferType,
    interval: u8,
    // transfer length is buf.len()
    buf: Vec<u8>,
    actual_length: usize,
    status: TransferStatus,
    context: Context,
    // Weak so that transfers held by a device don't keep a host alive.
    handler: Weak<dyn Complete>,
}

impl Transfer {
    /// An inbound transfer with a zeroed buffer of `len` bytes.
    pub(crate) fn new_in(
        endpoint: u8,
        typ: TransferType,
        interval: u8,
        len: usize,
        context: Context,
        handler: Weak<dyn Complete>,
    ) -> Result<Self> {
        debug_assert!(endpoint & USB_DIR_IN != 0);
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| Error::NoMemory)?;
        buf.resize(len, 0);
        Ok(Self::new(endpoint, typ, interval, buf, context, handler))
    }

    /// An outbound bulk transfer with room for `capacity` bytes.
    ///
    /// With [`AllocHint::Atomic`] the allocation may fail rather than
    /// abort.
    pub(crate) fn new_out(
        endpoint: u8,
        capacity: usize,
        hint: AllocHint,
        context: Context,
        handler: Weak<dyn Complete>,
    ) -> Result<Self> {
        debug_assert!(endpoint & USB_DIR_IN == 0);
        let buf = match hint {
            AllocHint::Normal => Vec::with_capacity(capacity),
            AllocHint::Atomic => {
                let mut b = Vec::new();
                b.try_reserve_exact(capacity).map_err(|_| Error::NoMemory)?;
                b
            }
        };
        Ok(Self::new(endpoint, TransferType::Bulk, 0, buf, context, handler))
    }

    fn new(
        endpoint: u8,
        typ: TransferType,
        interval: u8,
        buf: Vec<u8>,
        context: Context,
        handler: Weak<dyn Complete>,
    ) -> Self {
        Self {
            id: TransferId(0),
            endpoint,
            typ,
            interval,
            buf,
            actual_length: 0,
            status: TransferStatus::Completed,
            context,
            handler,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Endpoint address, including the direction bit
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn transfer_type(&self) -> TransferType {
        self.typ
    }

    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn is_in(&self) -> bool {
        self.endpoint & USB_DIR_IN != 0
    }

    /// The transfer buffer.
    ///
    /// For OUT transfers this is the data to send.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// The transfer buffer, for the device to fill an IN transfer.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Bytes transferred, as set by the device.
    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    /// Set by the device before [`give_back()`](Self::give_back).
    ///
    /// Clamped to the buffer length.
    pub fn set_actual_length(&mut self, len: usize) {
        self.actual_length = len.min(self.buf.len());
    }

    /// Data received by an IN transfer
    pub fn received(&self) -> &[u8] {
        &self.buf[..self.actual_length]
    }

    /// Status of the last completion
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub(crate) fn context(&self) -> Context {
        self.context
    }

    /// Hand a finished transfer back to its host.
    ///
    /// Called by the device from its completion context, without
    /// holding any locks that submit() or kill() take. If the host has
    /// gone the transfer is freed.
    pub fn give_back(mut self, status: TransferStatus) {
        self.status = status;
        match self.handler.upgrade() {
            Some(h) => h.complete(self),
            None => {
                trace!("transfer {:?} given back after host removal", self.id)
            }
        }
    }

    /// Prepare an inbound transfer for (re)submission
    pub(crate) fn rearm(&mut self, id: TransferId) {
        self.id = id;
        self.actual_length = 0;
        self.status = TransferStatus::Completed;
    }

    /// Fill an outbound transfer with a CPort frame
    pub(crate) fn fill_frame(
        &mut self,
        id: TransferId,
        cport: u8,
        payload: &[u8],
        context: Context,
    ) {
        self.id = id;
        self.context = context;
        self.actual_length = 0;
        self.status = TransferStatus::Completed;
        self.buf.clear();
        self.buf.push(cport);
        self.buf.extend_from_slice(payload);
    }
}

impl core::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("endpoint", &format_args!("{:#04x}", self.endpoint))
            .field("typ", &self.typ)
            .field("len", &self.buf.len())
            .field("actual_length", &self.actual_length)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// A submission refused by the device.
///
/// The transfer is returned to the submitter.
#[derive(Debug)]
pub struct Rejected {
    pub transfer: Transfer,
    pub error: Error,
}

/// The USB device a bridge host runs over.
///
/// Implemented by a USB stack binding (or a simulation, see
/// [`SimBridge`](crate::sim::SimBridge)).
pub trait UsbDevice: Send + Sync + 'static {
    /// Endpoints of the active interface altsetting.
    ///
    /// The default control pipe is not included.
    fn endpoints(&self) -> &[EndpointDescriptor];

    /// Submit a transfer asynchronously.
    ///
    /// On success the device owns the transfer until it calls
    /// [`Transfer::give_back`], from any thread. `give_back` must not be
    /// called from within `submit()`.
    fn submit(&self, transfer: Transfer) -> core::result::Result<(), Rejected>;

    /// Kill an in-flight transfer.
    ///
    /// If the transfer is still in flight, it is given back with
    /// [`TransferStatus::Killed`] before `kill()` returns. Unknown or
    /// completed IDs are ignored.
    fn kill(&self, id: TransferId);

    /// Perform a control OUT transfer on the default pipe.
    ///
    /// Returns the number of bytes transferred.
    fn control_out(
        &self,
        setup: ControlSetup,
        data: &[u8],
    ) -> impl Future<Output = Result<usize>>;
}
