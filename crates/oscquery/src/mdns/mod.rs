// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast DNS transport: wire codec and group socket.

mod socket;
pub mod wire;

pub use socket::{bind_multicast, group_addr, MDNS_GROUP, MDNS_PORT};
pub use wire::{DnsName, Message, Question, Record, RecordData, WireError};
