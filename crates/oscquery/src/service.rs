// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSCQuery host service.
//!
//! Binds the HTTP and OSC ports, serves the query documents, advertises both
//! services over mDNS and follows target peers:
//!
//! ```text
//! mDNS response -> ServiceBrowser -> ?HOST_INFO -> PeerFound
//!                                               -> tree fetch -> ParametersUpdated
//! ```

use crate::client::{ParameterUpdate, QueryClient, QueryError};
use crate::discovery::{
    DiscoveredPeer, Responder, ServiceBrowser, ServiceProfile, DEFAULT_TARGET_PREFIX,
    HTTP_SERVICE, OSC_SERVICE,
};
use crate::host_info::HostInfo;
use crate::mdns::{self, Message};
use crate::server::{QueryDocuments, QueryServer};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Gap between the two unsolicited announcements.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);
const ANNOUNCE_COUNT: u32 = 2;
const MAX_PACKET: usize = 9000;

/// Errors raised while binding the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("query client: {0}")]
    Query(#[from] QueryError),

    #[error("document serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mDNS advertisement needs an IPv4 address, got {0}")]
    NotIpv4(IpAddr),
}

/// Settings of an [`OscQueryService`].
#[derive(Debug, Clone)]
pub struct QueryServiceConfig {
    /// Instance name advertised for both services.
    pub service_name: String,
    /// Address bound and advertised.
    pub ip: IpAddr,
    /// Instance prefix of the peers to follow.
    pub target_prefix: String,
    /// Fixed OSC receive port; a free port is picked when `None`.
    pub osc_port: Option<u16>,
}

impl QueryServiceConfig {
    pub fn new(service_name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            service_name: service_name.into(),
            ip,
            target_prefix: DEFAULT_TARGET_PREFIX.to_string(),
            osc_port: None,
        }
    }
}

/// A target peer with both of its endpoints resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub instance: String,
    pub http: SocketAddr,
    pub osc: SocketAddr,
}

/// Notifications emitted by a running service.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    PeerFound(PeerEndpoint),
    ParametersUpdated(ParameterUpdate),
}

/// Bound but not yet running service.
pub struct OscQueryService {
    config: QueryServiceConfig,
    ipv4: Ipv4Addr,
    listener: TcpListener,
    http_port: u16,
    osc_port: u16,
    mdns: UdpSocket,
    client: Arc<QueryClient>,
}

impl OscQueryService {
    /// Bind the HTTP listener, pick the OSC port and join the mDNS group.
    pub async fn bind(config: QueryServiceConfig) -> Result<Self, ServiceError> {
        let ipv4 = match config.ip {
            IpAddr::V4(ip) => ip,
            other => return Err(ServiceError::NotIpv4(other)),
        };

        let listener = TcpListener::bind(SocketAddr::new(config.ip, 0)).await?;
        let http_port = listener.local_addr()?.port();
        let osc_port = match config.osc_port {
            Some(port) => port,
            None => probe_udp_port(config.ip)?,
        };
        let mdns = mdns::bind_multicast(ipv4)?;
        let client = Arc::new(QueryClient::new()?);

        debug!(
            "OSCQuery service {} bound http={} osc={}",
            config.service_name, http_port, osc_port
        );

        Ok(Self {
            config,
            ipv4,
            listener,
            http_port,
            osc_port,
            mdns,
            client,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn ip(&self) -> IpAddr {
        self.config.ip
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Port peers should send OSC to; the session binds it for receiving.
    pub fn osc_port(&self) -> u16 {
        self.osc_port
    }

    pub fn client(&self) -> Arc<QueryClient> {
        Arc::clone(&self.client)
    }

    /// Host descriptor served on `?HOST_INFO`.
    pub fn host_info(&self) -> HostInfo {
        HostInfo::udp(&self.config.service_name, self.config.ip, self.osc_port)
    }

    fn responder(&self) -> Responder {
        let name = &self.config.service_name;
        Responder::new(vec![
            ServiceProfile::new(name.as_str(), HTTP_SERVICE, self.http_port, self.ipv4),
            ServiceProfile::new(name.as_str(), OSC_SERVICE, self.osc_port, self.ipv4),
        ])
    }

    /// Spawn the HTTP server and the mDNS task. Both stop when `cancel` fires.
    pub fn start(
        self,
        events: mpsc::Sender<QueryEvent>,
        cancel: CancellationToken,
    ) -> Result<ServiceHandle, ServiceError> {
        let docs = QueryDocuments::new(&self.host_info(), &QueryDocuments::skeleton_tree())?;
        let responder = self.responder();

        let mut browser = ServiceBrowser::new(self.config.target_prefix.clone());
        for profile in responder.profiles() {
            if profile.service_type == HTTP_SERVICE {
                browser.seed(profile.id());
            }
        }

        let server = QueryServer::new(docs);
        let server_cancel = cancel.clone();
        let listener = self.listener;
        let http_task = tokio::spawn(async move {
            if let Err(e) = server.serve(listener, server_cancel).await {
                error!("HTTP query server failed: {}", e);
            }
        });

        let mdns_task = tokio::spawn(run_mdns(MdnsTask {
            socket: self.mdns,
            responder,
            browser,
            client: self.client,
            events,
            cancel: cancel.clone(),
        }));

        info!(
            "Advertising {} ({} on {}, {} on {})",
            self.config.service_name, HTTP_SERVICE, self.http_port, OSC_SERVICE, self.osc_port
        );

        Ok(ServiceHandle {
            cancel,
            tasks: vec![http_task, mdns_task],
        })
    }
}

/// Running service.
pub struct ServiceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Stop advertising and serving; the goodbye is sent before the task ends.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("OSCQuery task ended abnormally: {}", e);
            }
        }
    }
}

/// Bind an ephemeral UDP port on `ip` and release it.
fn probe_udp_port(ip: IpAddr) -> io::Result<u16> {
    let socket = std::net::UdpSocket::bind(SocketAddr::new(ip, 0))?;
    Ok(socket.local_addr()?.port())
}

struct MdnsTask {
    socket: UdpSocket,
    responder: Responder,
    browser: ServiceBrowser,
    client: Arc<QueryClient>,
    events: mpsc::Sender<QueryEvent>,
    cancel: CancellationToken,
}

async fn run_mdns(mut task: MdnsTask) {
    let group = mdns::group_addr();
    send_message(&task.socket, &task.responder.browse_query(), group).await;

    let mut announce = tokio::time::interval(ANNOUNCE_INTERVAL);
    let mut announced = 0;
    let mut buf = vec![0u8; MAX_PACKET];

    loop {
        tokio::select! {
            _ = task.cancel.cancelled() => break,
            _ = announce.tick(), if announced < ANNOUNCE_COUNT => {
                announced += 1;
                send_message(&task.socket, &task.responder.announcement(), group).await;
            }
            recv = task.socket.recv_from(&mut buf) => match recv {
                Ok((len, from)) => handle_packet(&mut task, &buf[..len], from).await,
                Err(e) => warn!("mDNS receive failed: {}", e),
            },
        }
    }

    send_message(&task.socket, &task.responder.goodbye(), group).await;
    debug!("mDNS task stopped");
}

async fn handle_packet(task: &mut MdnsTask, packet: &[u8], from: SocketAddr) {
    let msg = match Message::decode(packet) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("mDNS: dropping malformed packet from {}: {}", from, e);
            return;
        }
    };

    if !msg.is_response() {
        if let Some(reply) = task.responder.answer(&msg) {
            let unicast = msg.questions.iter().any(|q| q.unicast_response);
            let dest = if unicast { from } else { mdns::group_addr() };
            send_message(&task.socket, &reply, dest).await;
        }
        return;
    }

    for peer in task.browser.observe(&msg) {
        info!("Found peer {} at {}", peer.instance, peer.http);
        tokio::spawn(follow_peer(
            Arc::clone(&task.client),
            task.events.clone(),
            peer,
        ));
    }
}

/// Resolve the OSC endpoint of a new peer, report it, then fetch its
/// parameters.
async fn follow_peer(
    client: Arc<QueryClient>,
    events: mpsc::Sender<QueryEvent>,
    peer: DiscoveredPeer,
) {
    let osc = match client.resolve_osc_endpoint(peer.http).await {
        Ok(osc) => osc,
        Err(e) => {
            error!("Host info from {} unusable: {}", peer.http, e);
            return;
        }
    };

    let endpoint = PeerEndpoint {
        instance: peer.instance,
        http: peer.http,
        osc,
    };
    if events.send(QueryEvent::PeerFound(endpoint)).await.is_err() {
        debug!("Event receiver gone, dropping peer {}", peer.http);
        return;
    }

    if let Some(update) = client.refresh_parameters(peer.http).await {
        let _ = events.send(QueryEvent::ParametersUpdated(update)).await;
    }
}

async fn send_message(socket: &UdpSocket, msg: &Message, dest: SocketAddr) {
    let bytes = match msg.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("mDNS: cannot encode message: {}", e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, dest).await {
        warn!("mDNS: send to {} failed: {}", dest, e);
    }
}
