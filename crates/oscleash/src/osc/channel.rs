// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC datagram channel: one connected send socket plus an optional receive
//! loop dispatching messages to per-address handlers.

use super::codec::{decode_packet, encode_message, OscArg, OscError, OscMessage};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const MAX_DATAGRAM: usize = 65_536;

/// Callback run for every inbound message on its address.
pub type Handler = Arc<dyn Fn(&OscMessage) + Send + Sync>;

/// Outbound side of a channel.
pub trait OscSender: Send + Sync {
    /// Send one single-argument message.
    fn send_value(&self, address: &str, value: OscArg) -> Result<(), OscError>;
}

type HandlerMap = Arc<RwLock<HashMap<String, Handler>>>;

/// Connected OSC channel.
pub struct OscChannel {
    /// Blocking connected socket; a UDP send never waits on the peer.
    socket: std::net::UdpSocket,
    peer: SocketAddr,
    handlers: HandlerMap,
    cancel: CancellationToken,
    local: Option<SocketAddr>,
}

impl OscChannel {
    /// Open a send socket connected to `peer`.
    pub fn connect(peer: SocketAddr) -> Result<Self, OscError> {
        let any = match peer.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = std::net::UdpSocket::bind(SocketAddr::new(any, 0))?;
        socket.connect(peer)?;

        debug!("OSC channel sending to {}", peer);
        Ok(Self {
            socket,
            peer,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
            local: None,
        })
    }

    /// Address every send goes to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Address the receive loop is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Bind `local` (shared with `SO_REUSEADDR`) and spawn the receive loop.
    /// Requires a tokio runtime.
    pub fn listen(&mut self, local: SocketAddr) -> Result<(), OscError> {
        let socket = bind_reusable(local)?;
        let bound = socket.local_addr()?;
        let handlers = Arc::clone(&self.handlers);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    recv = socket.recv_from(&mut buf) => match recv {
                        Ok((len, from)) => dispatch_packet(&handlers, &buf[..len], from),
                        Err(e) => warn!("OSC receive on {} failed: {}", bound, e),
                    },
                }
            }
            debug!("OSC receive loop on {} stopped", bound);
        });

        debug!("OSC channel listening on {}", bound);
        self.local = Some(bound);
        Ok(())
    }

    /// Register the handler for `address`, replacing any previous one.
    pub fn add_handler<F>(&self, address: impl Into<String>, handler: F)
    where
        F: Fn(&OscMessage) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(address.into(), Arc::new(handler));
    }

    /// Stop the receive loop. Sending stays possible until drop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl OscSender for OscChannel {
    fn send_value(&self, address: &str, value: OscArg) -> Result<(), OscError> {
        let msg = OscMessage::new(address, vec![value]);
        let bytes = encode_message(&msg)?;
        self.socket.send(&bytes)?;
        Ok(())
    }
}

impl Drop for OscChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn bind_reusable(local: SocketAddr) -> Result<UdpSocket, OscError> {
    let domain = match local {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&local.into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn dispatch_packet(handlers: &HandlerMap, packet: &[u8], from: SocketAddr) {
    let messages = match decode_packet(packet) {
        Ok(messages) => messages,
        Err(e) => {
            debug!("Dropping OSC packet from {}: {}", from, e);
            return;
        }
    };

    for msg in messages {
        let handler = handlers.read().get(&msg.address).cloned();
        match handler {
            Some(handler) => handler(&msg),
            None => trace!("No handler for {}", msg.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn test_first_send_after_connect_is_delivered() {
        let peer = UdpSocket::bind(loopback(0)).await.unwrap();
        let channel = OscChannel::connect(peer.local_addr().unwrap()).unwrap();
        assert_eq!(channel.peer(), peer.local_addr().unwrap());

        channel
            .send_value("/input/Vertical", OscArg::Float(0.0))
            .unwrap();

        let mut buf = vec![0u8; 1500];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let msg = decode_packet(&buf[..len]).unwrap().remove(0);
        assert_eq!(msg.address, "/input/Vertical");
        assert_eq!(msg.first_arg(), Some(&OscArg::Float(0.0)));
    }

    #[tokio::test]
    async fn test_send_reaches_handler() {
        let receiver_peer = loopback(9);
        let mut receiver = OscChannel::connect(receiver_peer).unwrap();
        receiver.listen(loopback(0)).unwrap();
        let local = receiver.local_addr().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        receiver.add_handler("/avatar/parameters/Leash_Stretch", move |msg| {
            let _ = tx.send(msg.clone());
        });

        let sender = OscChannel::connect(local).unwrap();
        sender
            .send_value("/avatar/parameters/Leash_Other", OscArg::Float(0.1))
            .unwrap();
        sender
            .send_value("/avatar/parameters/Leash_Stretch", OscArg::Float(0.4))
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.address, "/avatar/parameters/Leash_Stretch");
        assert_eq!(msg.first_arg(), Some(&OscArg::Float(0.4)));
    }

    #[tokio::test]
    async fn test_port_can_be_rebound_while_open() {
        let mut first = OscChannel::connect(loopback(9)).unwrap();
        first.listen(loopback(0)).unwrap();
        let local = first.local_addr().unwrap();

        let mut second = OscChannel::connect(loopback(9)).unwrap();
        second.listen(local).unwrap();
        assert_eq!(second.local_addr(), Some(local));
        first.close();
    }

    #[test]
    fn test_dispatch_ignores_garbage() {
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        handlers.write().insert(
            "/x".into(),
            Arc::new(move |_: &OscMessage| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );

        dispatch_packet(&handlers, b"not osc", loopback(1));
        let packet = encode_message(&OscMessage::new("/x", vec![OscArg::Nil])).unwrap();
        dispatch_packet(&handlers, &packet, loopback(1));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
