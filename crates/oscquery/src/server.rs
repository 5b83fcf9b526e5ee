// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP query server.
//!
//! Single route `GET /`. A request whose target contains `HOST_INFO` gets the
//! host descriptor, anything else gets the namespace tree. Both documents are
//! serialized once at construction.

use crate::host_info::HostInfo;
use crate::node::{AccessMode, OscNode};
use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const HOST_INFO_MARKER: &str = "HOST_INFO";

/// Pre-serialized documents served by [`QueryServer`].
#[derive(Debug, Clone)]
pub struct QueryDocuments {
    host_info: String,
    tree: String,
}

impl QueryDocuments {
    pub fn new(host_info: &HostInfo, tree: &OscNode) -> Result<Self, serde_json::Error> {
        Ok(Self {
            host_info: serde_json::to_string(host_info)?,
            tree: serde_json::to_string(tree)?,
        })
    }

    /// Tree advertised by this host: `/` with a write-only `/avatar` child.
    pub fn skeleton_tree() -> OscNode {
        OscNode::branch("/", AccessMode::NoValue)
            .with_child("avatar", OscNode::empty("/avatar", AccessMode::WriteOnly))
    }

    pub fn host_info_json(&self) -> &str {
        &self.host_info
    }

    pub fn tree_json(&self) -> &str {
        &self.tree
    }

    /// Document selected by a request target.
    pub fn select(&self, uri: &Uri) -> &str {
        if wants_host_info(uri) {
            &self.host_info
        } else {
            &self.tree
        }
    }
}

fn wants_host_info(uri: &Uri) -> bool {
    uri.to_string()
        .to_ascii_uppercase()
        .contains(HOST_INFO_MARKER)
}

/// axum server over [`QueryDocuments`].
#[derive(Debug, Clone)]
pub struct QueryServer {
    docs: Arc<QueryDocuments>,
}

impl QueryServer {
    pub fn new(docs: QueryDocuments) -> Self {
        Self {
            docs: Arc::new(docs),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(serve_document))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.docs))
    }

    /// Serve on `listener` until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> io::Result<()> {
        let addr = listener.local_addr()?;
        info!("HTTP query server listening at http://{}/", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        debug!("HTTP query server on {} stopped", addr);
        Ok(())
    }
}

async fn serve_document(State(docs): State<Arc<QueryDocuments>>, uri: Uri) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        docs.select(&uri).to_owned(),
    )
        .into_response()
}
