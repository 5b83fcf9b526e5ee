// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC over UDP.

mod channel;
mod codec;

pub use channel::{Handler, OscChannel, OscSender};
pub use codec::{decode_packet, encode_message, OscArg, OscError, OscMessage};
