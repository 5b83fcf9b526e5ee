// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer session lifecycle.
//!
//! A session is one OSC channel to the peer plus the control loop driving it.
//! Every `PeerFound` tears the current session down and builds a new one;
//! sessions are never patched in place.

use crate::config::LeashAddresses;
use crate::control::{ControlLoop, ControlSettings};
use crate::leash::{LeashField, LeashHandle};
use crate::osc::{OscArg, OscChannel, OscError, OscMessage};
use oscquery::{ParameterUpdate, QueryClient, QueryEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Address on which the peer reports avatar switches.
pub const AVATAR_CHANGE_ADDRESS: &str = "/avatar/change";

/// Session setup errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot open OSC channel to {peer}: {source}")]
    Channel {
        peer: SocketAddr,
        #[source]
        source: OscError,
    },
}

struct Session {
    token: CancellationToken,
    channel: Arc<OscChannel>,
    control: JoinHandle<()>,
}

/// Parameter refresh wiring for the `/avatar/change` handler.
struct Refresh {
    client: Arc<QueryClient>,
    events: mpsc::Sender<QueryEvent>,
}

/// Owner of the single active session.
pub struct SessionManager {
    leash: LeashHandle,
    settings: ControlSettings,
    addresses: LeashAddresses,
    listen_addr: SocketAddr,
    refresh: Option<Refresh>,
    current: Option<Session>,
    retiring: Vec<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(
        leash: LeashHandle,
        settings: ControlSettings,
        addresses: LeashAddresses,
        listen_addr: SocketAddr,
    ) -> Self {
        Self {
            leash,
            settings,
            addresses,
            listen_addr,
            refresh: None,
            current: None,
            retiring: Vec::new(),
        }
    }

    /// Refresh parameters through `client` on avatar change and report the
    /// result on `events`.
    #[must_use]
    pub fn with_parameter_refresh(
        mut self,
        client: Arc<QueryClient>,
        events: mpsc::Sender<QueryEvent>,
    ) -> Self {
        self.refresh = Some(Refresh { client, events });
        self
    }

    /// Peer of the active session.
    pub fn active_peer(&self) -> Option<SocketAddr> {
        self.current.as_ref().map(|s| s.channel.peer())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Replace the active session with one sending to `peer`.
    ///
    /// On error no session is active.
    pub fn start_session(&mut self, peer: SocketAddr) -> Result<(), SessionError> {
        self.retire_current();
        self.retiring.retain(|task| !task.is_finished());

        let token = CancellationToken::new();
        let channel = self
            .open_channel(peer)
            .map_err(|source| SessionError::Channel { peer, source })?;
        let channel = Arc::new(channel);

        let control = ControlLoop::new(self.leash.clone(), Arc::clone(&channel), self.settings);
        let control = tokio::spawn(control.run(token.clone()));

        info!(
            "Session started: sending to {}, listening on {}",
            peer, self.listen_addr
        );
        self.current = Some(Session {
            token,
            channel,
            control,
        });
        Ok(())
    }

    fn open_channel(&self, peer: SocketAddr) -> Result<OscChannel, OscError> {
        let mut channel = OscChannel::connect(peer)?;
        self.register_handlers(&channel);
        channel.listen(self.listen_addr)?;
        Ok(channel)
    }

    fn register_handlers(&self, channel: &OscChannel) {
        let addrs = &self.addresses;
        for (address, field) in [
            (&addrs.z_positive, LeashField::ZPositive),
            (&addrs.z_negative, LeashField::ZNegative),
            (&addrs.x_positive, LeashField::XPositive),
            (&addrs.x_negative, LeashField::XNegative),
            (&addrs.stretch, LeashField::Stretch),
        ] {
            let leash = self.leash.clone();
            channel.add_handler(address.as_str(), move |msg: &OscMessage| {
                match msg.first_arg() {
                    Some(OscArg::Float(value)) => leash.set_float(field, *value),
                    other => warn!("Expected a float on {}, got {:?}", msg.address, other),
                }
            });
        }

        let leash = self.leash.clone();
        channel.add_handler(addrs.grabbed.as_str(), move |msg: &OscMessage| {
            match msg.first_arg() {
                Some(OscArg::Bool(grabbed)) => leash.set_grabbed(*grabbed),
                other => warn!("Expected a bool on {}, got {:?}", msg.address, other),
            }
        });

        if let Some(refresh) = &self.refresh {
            let client = Arc::clone(&refresh.client);
            let events = refresh.events.clone();
            channel.add_handler(AVATAR_CHANGE_ADDRESS, move |msg: &OscMessage| {
                debug!("Avatar changed: {:?}", msg.first_arg());
                let client = Arc::clone(&client);
                let events = events.clone();
                tokio::spawn(async move {
                    if let Some(update) = client.get_parameters().await {
                        let _ = events.send(QueryEvent::ParametersUpdated(update)).await;
                    }
                });
            });
        }
    }

    fn retire_current(&mut self) {
        if let Some(session) = self.current.take() {
            debug!("Tearing down session to {}", session.channel.peer());
            session.token.cancel();
            session.channel.close();
            self.retiring.push(session.control);
        }
    }

    /// Cancel the active session and wait for every control loop to exit.
    pub async fn stop(&mut self) {
        self.retire_current();
        for task in self.retiring.drain(..) {
            if let Err(e) = task.await {
                warn!("Control loop ended abnormally: {}", e);
            }
        }
    }

    /// React to query events until `shutdown` fires or the sender side closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<QueryEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(QueryEvent::PeerFound(peer)) => {
                        info!("Peer {} found, OSC endpoint {}", peer.instance, peer.osc);
                        if let Err(e) = self.start_session(peer.osc) {
                            error!("{}", e);
                        }
                    }
                    Some(QueryEvent::ParametersUpdated(update)) => log_parameters(&update),
                    None => break,
                },
            }
        }

        self.stop().await;
        info!("Session manager stopped");
    }
}

fn log_parameters(update: &ParameterUpdate) {
    if update.parameters.is_empty() {
        warn!("Parameter snapshot is empty");
        return;
    }
    info!(
        "Received {} parameters for avatar {}",
        update.parameters.len(),
        update.avatar_id
    );
    for (path, value) in update.parameters.iter() {
        match value {
            Some(value) => debug!("  {} = {}", path, value),
            None => debug!("  {} (no value)", path),
        }
    }
}
