// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast socket on the mDNS group.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// mDNS IPv4 group (RFC 6762 section 3).
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// Destination for multicast queries and announcements.
pub fn group_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(MDNS_GROUP, MDNS_PORT))
}

/// Bind `0.0.0.0:5353` shared with other responders on the host, join the
/// group on `interface` and hand the socket to tokio.
///
/// Must be called inside a tokio runtime.
pub fn bind_multicast(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT);
    socket.bind(&SocketAddr::V4(bind_addr).into())?;

    // Loopback has no multicast route; fall back to the default interface.
    let iface = if interface.is_unspecified() || interface.is_loopback() {
        Ipv4Addr::UNSPECIFIED
    } else {
        interface
    };
    socket.join_multicast_v4(&MDNS_GROUP, &iface)?;
    if !iface.is_unspecified() {
        socket.set_multicast_if_v4(&iface)?;
    }
    socket.set_multicast_loop_v4(true)?;
    socket.set_multicast_ttl_v4(255)?;
    socket.set_nonblocking(true)?;

    tracing::debug!(
        "mDNS socket bound on {} group={} iface={}",
        bind_addr,
        MDNS_GROUP,
        iface
    );

    UdpSocket::from_std(socket.into())
}
