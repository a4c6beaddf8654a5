// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Greybus host transport common types and traits.
 *
 * Copyright (c) 2025 Code Construct
 */

// Tests may use std
#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Greybus host transport
//!
//! This crate provides common types and traits shared by a Greybus core and
//! the host drivers that carry its messages over a physical bridge.
//!
//! A host driver implements [`HostDriver`] so the core can send CPort data
//! and SVC messages. The core implements [`HostHandler`] to be told about
//! received data, received SVC messages and finished sends.

/// Greybus CPort identifier
///
/// A logical channel multiplexed over a host driver's physical pipes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CPortId(pub u16);

/// Reserved CPort ID, never a valid send destination.
pub const CPORT_ID_BAD: CPortId = CPortId(u16::MAX);

impl core::fmt::Display for CPortId {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Identifies an in-flight buffer send.
///
/// Returned from [`HostDriver::buffer_send`], and may be passed to
/// [`HostDriver::buffer_cancel`]. Cookies are unique for the lifetime of
/// a host driver instance, so a stale cookie never refers to a later send.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Cookie(u64);

impl Cookie {
    /// Create a cookie from a raw value.
    ///
    /// For host driver implementations.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    ///
    /// For host driver implementations.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Cookie {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "#{}", self.0)
    }
}

/// Completion status of a physical transfer.
///
/// Modelled on the statuses a USB host controller reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransferStatus {
    /// Transfer completed normally
    Completed,
    /// Protocol error on the bus (bitstuff, CRC), usually transient
    Protocol,
    /// The controller asked for the transfer to be retried
    Again,
    /// The device sent more data than the buffer could hold
    Overflow,
    /// Endpoint halted
    Stall,
    /// Transfer was unlinked asynchronously
    Reset,
    /// Transfer was killed synchronously
    Killed,
    /// The device or host controller has gone away
    Shutdown,
    /// Sequence error, typically a device that stopped responding
    Sequence,
    /// Any other status, as a negative errno style code
    Other(i32),
}

impl TransferStatus {
    /// Returns `true` for [`Completed`](Self::Completed).
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Other(code) => write!(fmt, "status {}", code),
            _ => write!(fmt, "{:?}", self),
        }
    }
}

/// Allocation context of a send request.
///
/// Host drivers with a fixed transfer pool only allocate when the pool is
/// exhausted. `Atomic` requests must not block in that allocation and may
/// fail with [`Error::NoMemory`] instead.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AllocHint {
    /// The caller may block
    #[default]
    Normal,
    /// The caller must not block
    Atomic,
}

/// Limits on buffers passed to [`HostDriver::buffer_send`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufferConstraints {
    /// Bytes of framing the host driver adds in front of each payload.
    ///
    /// Added by the driver into its own transfer buffers; callers don't
    /// reserve any space for it.
    pub header_len: usize,
    /// Maximum payload length, not including `header_len`.
    pub size_max: usize,
}

/// Size of the [`SvcMsg`] header
pub const SVC_MSG_HEADER_LEN: usize = 4;
/// Maximum [`SvcMsg`] body length
pub const SVC_MSG_BODY_MAX: usize = 60;
/// Encoded size of every [`SvcMsg`]
pub const SVC_MSG_SIZE: usize = SVC_MSG_HEADER_LEN + SVC_MSG_BODY_MAX;

/// A message from the AP to the SVC.
///
/// These are a fixed-size record on the wire, a 4 byte header
/// (function, message type, little endian body length) followed by a
/// zero padded body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SvcMsg {
    /// SVC function ID
    pub function: u8,
    /// Message type within the function
    pub typ: u8,
    body: heapless::Vec<u8, SVC_MSG_BODY_MAX>,
}

impl SvcMsg {
    /// Create a new message.
    ///
    /// Returns [`Error::NoSpace`] if `body` is longer than
    /// [`SVC_MSG_BODY_MAX`].
    pub fn new(function: u8, typ: u8, body: &[u8]) -> Result<Self> {
        let body =
            heapless::Vec::from_slice(body).map_err(|_| Error::NoSpace)?;
        Ok(Self {
            function,
            typ,
            body,
        })
    }

    /// The message body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Encode to the fixed-size wire record.
    pub fn to_bytes(&self) -> [u8; SVC_MSG_SIZE] {
        let mut out = [0u8; SVC_MSG_SIZE];
        let (hdr, body) = out.split_at_mut(SVC_MSG_HEADER_LEN);
        hdr[0] = self.function;
        hdr[1] = self.typ;
        // body length is bounded by SVC_MSG_BODY_MAX
        hdr[2..].copy_from_slice(&(self.body.len() as u16).to_le_bytes());
        body[..self.body.len()].copy_from_slice(&self.body);
        out
    }

    /// Decode a wire record.
    ///
    /// `buf` may be longer than [`SVC_MSG_SIZE`], trailing bytes are
    /// ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < SVC_MSG_HEADER_LEN {
            return Err(Error::BadArgument);
        }
        let (hdr, rest) = buf.split_at(SVC_MSG_HEADER_LEN);
        let len = u16::from_le_bytes([hdr[2], hdr[3]]) as usize;
        let body = rest.get(..len).ok_or(Error::BadArgument)?;
        Self::new(hdr[0], hdr[1], body)
    }
}

/// An error type for Greybus host drivers
///
/// Errors are returned synchronously by [`HostDriver`] calls. Failures of
/// a transfer after it has been submitted are reported through
/// [`HostHandler::data_sent`] instead.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failure in transmit path, typically transport-specific
    TxFailure,
    /// Timed out waiting for the device
    TimedOut,
    /// Bad argument
    BadArgument,
    /// Memory allocation failed
    NoMemory,
    /// Provided buffer is too small
    NoSpace,
    /// The device has gone away, or the host driver is detached
    NoDevice,
    /// A required endpoint was not found on the device
    MissingEndpoint(&'static str),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::MissingEndpoint(role) => {
                write!(fmt, "Greybus Error: no {} endpoint found", role)
            }
            _ => write!(fmt, "Greybus Error: {:?}", self),
        }
    }
}

#[cfg(feature = "std")]
impl From<Error> for std::io::Error {
    fn from(e: Error) -> std::io::Error {
        std::io::Error::other(e)
    }
}

/// Greybus result type
pub type Result<T> = core::result::Result<T, Error>;

/// Operations a host driver provides to the Greybus core.
pub trait HostDriver {
    /// Returns the buffer limits for [`buffer_send`](Self::buffer_send).
    fn buffer_constraints(&self) -> BufferConstraints;

    /// Send a buffer to a CPort.
    ///
    /// Returns once the transfer has been queued with the hardware.
    /// Completion, successful or not, is reported later with
    /// [`HostHandler::data_sent`]. There is no timeout or retry at this
    /// level, round trip operations above are expected to handle that.
    fn buffer_send(
        &self,
        cport: CPortId,
        payload: &[u8],
        hint: AllocHint,
    ) -> Result<Cookie>;

    /// Cancel an in-flight buffer.
    ///
    /// A cookie that has already completed is ignored.
    fn buffer_cancel(&self, cookie: Cookie);

    /// Send a message to the SVC, blocking until it has been transferred.
    fn submit_svc(&self, msg: &SvcMsg) -> Result<()>;
}

/// Callbacks a host driver makes into the Greybus core.
///
/// These are called from the host driver's completion context. They must
/// not block, longer processing should be deferred.
pub trait HostHandler: Send + Sync {
    /// Data received for a CPort.
    fn data_received(&self, cport: CPortId, data: &[u8]);

    /// A message received from the SVC.
    fn svc_message(&self, msg: &[u8]);

    /// A buffer send has finished, with `status`.
    ///
    /// Called exactly once for each successful
    /// [`buffer_send`](HostDriver::buffer_send), including cancelled sends.
    fn data_sent(&self, cookie: Cookie, payload: &[u8], status: TransferStatus);

    /// The host driver is being removed.
    ///
    /// No further callbacks follow.
    fn host_removed(&self) {}
}
