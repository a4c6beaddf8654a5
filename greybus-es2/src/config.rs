// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

//! Build-time configuration.
//!
//! Each value may be overridden by setting the named environment variable
//! when building, for example `GREYBUS_ES2_NUM_CPORT_OUT=16`.

use core::time::Duration;

/// A `usize` from a build-time environment variable, or `$default`.
///
/// Values below `$min` fail the build. Usable in a const context.
macro_rules! build_var {
    ($name:literal, $default:expr, $min:expr) => {{
        let v = match option_env!($name) {
            Some(v) => {
                let Ok(v) = usize::from_str_radix(v, 10) else {
                    panic!(concat!("Bad value for ", $name));
                };
                v
            }
            None => $default,
        };
        assert!(v >= $min, concat!($name, " is too small"));
        v
    }};
}

/// Number of pre-allocated CPort OUT transfers.
///
/// Sends beyond this many in flight allocate a transfer dynamically,
/// with a warning. Increase if that warning shows up in the log.
///
/// `GREYBUS_ES2_NUM_CPORT_OUT`
pub const NUM_CPORT_OUT: usize = build_var!("GREYBUS_ES2_NUM_CPORT_OUT", 8, 1);

/// Number of CPort IN transfers kept in flight.
///
/// Increase if the bridge stalls for lack of receive buffers.
///
/// `GREYBUS_ES2_NUM_CPORT_IN`
pub const NUM_CPORT_IN: usize = build_var!("GREYBUS_ES2_NUM_CPORT_IN", 4, 1);

/// Timeout for a SVC control transfer, in milliseconds.
///
/// `GREYBUS_ES2_CONTROL_TIMEOUT_MS`
pub const CONTROL_TIMEOUT_MS: usize =
    build_var!("GREYBUS_ES2_CONTROL_TIMEOUT_MS", 500, 1);

/// Maximum CPort payload, excluding the CPort ID byte.
///
/// `GREYBUS_ES2_MAX_PAYLOAD`
pub const MAX_PAYLOAD: usize = build_var!("GREYBUS_ES2_MAX_PAYLOAD", 4096, 1);

/// Length of the CPort ID prefix on each bulk transfer
pub const CPORT_HEADER_LEN: usize = 1;

/// Largest bulk transfer in either direction
pub const CPORT_FRAME_MAX: usize = MAX_PAYLOAD + CPORT_HEADER_LEN;

/// Receive buffer for SVC messages on the interrupt endpoint
pub const SVC_BUFFER_SIZE: usize = greybus::SVC_MSG_SIZE + 64 * 1024;

pub(crate) const CONTROL_TIMEOUT: Duration =
    Duration::from_millis(CONTROL_TIMEOUT_MS as u64);
