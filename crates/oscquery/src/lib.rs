// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSCQuery host
//!
//! Advertises an OSC receiver over mDNS, serves its OSCQuery documents over
//! HTTP and follows peers whose instance name carries a target prefix.
//!
//! # Features
//!
//! - **Advertisement**: `_oscjson._tcp` and `_osc._udp` DNS-SD services,
//!   answered on query, announced at start, withdrawn on shutdown
//! - **Discovery**: passive browsing with goodbye handling
//! - **Query server**: `GET /` returns the namespace tree, `GET /?HOST_INFO`
//!   the host descriptor
//! - **Query client**: peer descriptor lookup and flattened parameter snapshot
//!
//! # Quick Start
//!
//! ```no_run
//! use oscquery::{OscQueryService, QueryEvent, QueryServiceConfig};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueryServiceConfig::new("Leash-OSC-12345A", "127.0.0.1".parse()?);
//! let service = OscQueryService::bind(config).await?;
//! let (tx, mut rx) = mpsc::channel(16);
//! let handle = service.start(tx, CancellationToken::new())?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let QueryEvent::PeerFound(peer) = event {
//!         println!("peer {} sends OSC from {}", peer.instance, peer.osc);
//!     }
//! }
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod discovery;
pub mod host_info;
pub mod mdns;
pub mod node;
pub mod server;
pub mod service;

pub use client::{ParameterSnapshot, ParameterUpdate, QueryClient, QueryError};
pub use discovery::{
    DiscoveredPeer, Responder, ServiceBrowser, ServiceId, ServiceProfile, DEFAULT_TARGET_PREFIX,
    HTTP_SERVICE, OSC_SERVICE,
};
pub use host_info::{HostExtensions, HostInfo, OscTransport};
pub use node::{AccessMode, OscNode, ParamValue, TreeError};
pub use server::{QueryDocuments, QueryServer};
pub use service::{
    OscQueryService, PeerEndpoint, QueryEvent, QueryServiceConfig, ServiceError, ServiceHandle,
};
