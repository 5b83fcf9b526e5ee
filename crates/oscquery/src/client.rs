// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP query client.
//!
//! Fetches a peer's host descriptor and parameter tree. The flattened
//! parameters are kept as a snapshot that every fetch replaces wholesale:
//! the new mapping on success, an empty one on any failure.

use crate::host_info::HostInfo;
use crate::node::{OscNode, ParamValue};
use arc_swap::{ArcSwap, ArcSwapOption};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Timeout applied to every query request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const PARAMETERS_PATH: &str = "avatar/parameters";
const AVATAR_CHANGE_PATH: &str = "avatar/change";

/// Query client errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("host descriptor has no OSC_PORT")]
    MissingOscPort,

    #[error("tree has no /avatar/parameters node")]
    MissingParameters,
}

/// Flattened `full_path -> first value` mapping of a peer's parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSnapshot(BTreeMap<String, Option<ParamValue>>);

impl ParameterSnapshot {
    /// Flatten the `/avatar/parameters` subtree of a peer's tree.
    pub fn from_tree(root: &OscNode) -> Result<Self, QueryError> {
        let params = root
            .descend(PARAMETERS_PATH)
            .ok_or(QueryError::MissingParameters)?;
        Ok(Self(params.flatten()))
    }

    pub fn get(&self, path: &str) -> Option<&ParamValue> {
        self.0.get(path)?.as_ref()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ParamValue>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

/// Result of a parameter fetch, emitted on success and on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub parameters: Arc<ParameterSnapshot>,
    /// First value of `/avatar/change`, empty when unknown.
    pub avatar_id: String,
}

impl ParameterUpdate {
    fn empty() -> Self {
        Self {
            parameters: Arc::new(ParameterSnapshot::default()),
            avatar_id: String::new(),
        }
    }
}

/// Latch released on drop.
struct FetchGuard<'a>(&'a AtomicBool);

impl<'a> FetchGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Client side of the query protocol.
pub struct QueryClient {
    http: reqwest::Client,
    snapshot: ArcSwap<ParameterSnapshot>,
    last_peer: ArcSwapOption<SocketAddr>,
    fetching: AtomicBool,
}

impl QueryClient {
    pub fn new() -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            snapshot: ArcSwap::from_pointee(ParameterSnapshot::default()),
            last_peer: ArcSwapOption::empty(),
            fetching: AtomicBool::new(false),
        })
    }

    async fn get_document(&self, url: &str) -> Result<String, QueryError> {
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    /// GET `http://<peer>/?HOST_INFO`.
    pub async fn fetch_host_info(&self, peer: SocketAddr) -> Result<HostInfo, QueryError> {
        let url = format!("http://{}/?HOST_INFO", peer);
        debug!("Fetching host info from {}", url);
        let body = self.get_document(&url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// GET `http://<peer>/`.
    pub async fn fetch_tree(&self, peer: SocketAddr) -> Result<OscNode, QueryError> {
        let url = format!("http://{}/", peer);
        debug!("Fetching parameters from {}", url);
        let body = self.get_document(&url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// OSC endpoint advertised by `peer`, falling back to its HTTP address
    /// when no `OSC_IP` is given.
    pub async fn resolve_osc_endpoint(&self, peer: SocketAddr) -> Result<SocketAddr, QueryError> {
        let info = self.fetch_host_info(peer).await?;
        info.osc_endpoint(peer.ip())
            .ok_or(QueryError::MissingOscPort)
    }

    /// Fetch and flatten `peer`'s parameters, replacing the snapshot.
    ///
    /// Returns `None` without doing anything while another fetch is running.
    pub async fn refresh_parameters(&self, peer: SocketAddr) -> Option<ParameterUpdate> {
        let _guard = FetchGuard::try_acquire(&self.fetching)?;
        self.last_peer.store(Some(Arc::new(peer)));

        let result = match self.fetch_tree(peer).await {
            Ok(tree) => ParameterSnapshot::from_tree(&tree).map(|params| (params, tree)),
            Err(e) => Err(e),
        };

        match result {
            Ok((params, tree)) => {
                let avatar_id = tree
                    .descend(AVATAR_CHANGE_PATH)
                    .and_then(OscNode::first_value)
                    .and_then(ParamValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                let parameters = Arc::new(params);
                self.snapshot.store(Arc::clone(&parameters));
                debug!(
                    "Fetched {} parameters from {} (avatar {})",
                    parameters.len(),
                    peer,
                    avatar_id
                );
                Some(ParameterUpdate {
                    parameters,
                    avatar_id,
                })
            }
            Err(e) => {
                error!("Parameter fetch from {} failed: {}", peer, e);
                self.last_peer.store(None);
                let update = ParameterUpdate::empty();
                self.snapshot.store(Arc::clone(&update.parameters));
                Some(update)
            }
        }
    }

    /// Re-fetch from the last peer whose tree was requested.
    pub async fn get_parameters(&self) -> Option<ParameterUpdate> {
        let Some(peer) = self.last_peer() else {
            warn!("No peer to refresh parameters from");
            return None;
        };
        self.refresh_parameters(peer).await
    }

    pub fn last_peer(&self) -> Option<SocketAddr> {
        self.last_peer.load_full().map(|peer| *peer)
    }

    /// Current flattened parameters.
    pub fn snapshot(&self) -> Arc<ParameterSnapshot> {
        self.snapshot.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AccessMode;

    fn tree() -> OscNode {
        let params = OscNode::branch("/avatar/parameters", AccessMode::NoValue)
            .with_child(
                "Leash_Stretch",
                OscNode::leaf(
                    "/avatar/parameters/Leash_Stretch",
                    AccessMode::ReadWrite,
                    ParamValue::Float(0.5),
                    "f",
                ),
            )
            .with_child(
                "Leash_IsGrabbed",
                OscNode::leaf(
                    "/avatar/parameters/Leash_IsGrabbed",
                    AccessMode::ReadWrite,
                    ParamValue::Bool(false),
                    "F",
                ),
            );
        let avatar = OscNode::branch("/avatar", AccessMode::WriteOnly)
            .with_child("parameters", params)
            .with_child(
                "change",
                OscNode::leaf(
                    "/avatar/change",
                    AccessMode::ReadWrite,
                    ParamValue::Text("avtr_1".into()),
                    "s",
                ),
            );
        OscNode::branch("/", AccessMode::NoValue).with_child("avatar", avatar)
    }

    #[test]
    fn test_snapshot_from_tree() {
        let snapshot = ParameterSnapshot::from_tree(&tree()).expect("params");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get("/avatar/parameters/Leash_Stretch"),
            Some(&ParamValue::Float(0.5))
        );
        assert!(!snapshot.contains("/avatar/change"));
    }

    #[test]
    fn test_snapshot_requires_parameters_node() {
        let root = OscNode::branch("/", AccessMode::NoValue);
        assert!(matches!(
            ParameterSnapshot::from_tree(&root),
            Err(QueryError::MissingParameters)
        ));
    }

    #[test]
    fn test_fetch_guard_single_flight() {
        let flag = AtomicBool::new(false);
        let guard = FetchGuard::try_acquire(&flag).expect("first");
        assert!(FetchGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(FetchGuard::try_acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let body = serde_json::to_string(&tree()).expect("json");
        let app = axum::Router::new().route(
            "/",
            axum::routing::get(move || {
                let body = body.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    body
                }
            }),
        );
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let client = QueryClient::new().expect("client");
        let (first, second) = tokio::join!(
            client.refresh_parameters(addr),
            client.refresh_parameters(addr)
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        let update = results.into_iter().flatten().next().expect("one fetch ran");
        assert_eq!(update.parameters.len(), 2);
        assert_eq!(update.avatar_id, "avtr_1");

        // Latch released once the fetch is done.
        assert!(client.refresh_parameters(addr).await.is_some());
        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_peer_yields_empty_update() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = QueryClient::new().expect("client");
        let update = client.refresh_parameters(addr).await.expect("update");
        assert!(update.parameters.is_empty());
        assert!(update.avatar_id.is_empty());
        assert!(client.snapshot().is_empty());
        assert_eq!(client.last_peer(), None);
        assert!(client.get_parameters().await.is_none());
    }
}
