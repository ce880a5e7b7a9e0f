//! HTTP receiver that lets out-of-band actors resolve pending completions.
//!
//! One listener serves every graph of a completer. A pending completion is
//! registered under an opaque path; `POST {prefix}{path}/complete` resolves it
//! with the captured request as a success, `POST {prefix}{path}/fail` as a
//! failure. Everything else is 404. The listener starts lazily on the first
//! registration and shuts down deterministically: stop accepting, drain
//! in-flight requests, then fail whatever is still pending with `stage_lost`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use dashmap::DashMap;
use datum_core::{CompletionError, Datum, ErrorKind, Headers, HttpMethod, StageResult};
use graph_engine::{CompletionUris, CompletionWriter, ExternalRendezvous, PlatformError};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Listener configuration; the defaults are the protocol's fixed values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Address the listener binds; use port 0 to let the OS pick.
    pub bind: SocketAddr,
    /// Host advertised in completion URIs.
    pub advertised_host: String,
    /// Path prefix, with leading and trailing slash.
    pub path_prefix: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 11979)),
            advertised_host: "localhost".to_string(),
            path_prefix: "/completions/".to_string(),
        }
    }
}

type PendingMap = Arc<DashMap<String, Mutex<Option<CompletionWriter>>>>;

struct ListenerState {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Axum-backed [`ExternalRendezvous`] implementation.
pub struct HttpRendezvous {
    config: ReceiverConfig,
    pending: PendingMap,
    listener: tokio::sync::Mutex<Option<ListenerState>>,
}

impl HttpRendezvous {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            pending: Arc::new(DashMap::new()),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    /// Address the listener is bound to, once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|s| s.local_addr)
    }

    /// Bind and serve the router if not already running.
    async fn ensure_started(&self) -> Result<SocketAddr, PlatformError> {
        let mut guard = self.listener.lock().await;
        if let Some(state) = guard.as_ref() {
            return Ok(state.local_addr);
        }

        let listener =
            TcpListener::bind(self.config.bind)
                .await
                .map_err(|source| PlatformError::ListenerBind {
                    addr: self.config.bind,
                    source,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| PlatformError::ListenerBind {
                addr: self.config.bind,
                source,
            })?;

        let route = format!("{}{{path}}/{{action}}", self.config.path_prefix);
        let router = Router::new()
            .route(&route, any(handle_completion))
            .with_state(Arc::clone(&self.pending));

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                warn!(%err, "external completion listener terminated");
            }
        });

        info!(%local_addr, "external completion listener started");
        *guard = Some(ListenerState {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, drain in-flight requests, then fail every completion
    /// that is still pending with `stage_lost`.
    pub async fn shutdown(&self) {
        let state = self.listener.lock().await.take();
        if let Some(state) = state {
            state.shutdown.cancel();
            if state.task.await.is_err() {
                warn!("external completion listener task panicked during shutdown");
            }
            info!("external completion listener stopped");
        }

        let paths: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for path in paths {
            if let Some((_, slot)) = self.pending.remove(&path) {
                if let Ok(Some(writer)) = slot.into_inner() {
                    writer.resolve(Err(CompletionError::failure(
                        ErrorKind::StageLost,
                        "external completion receiver stopped",
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl ExternalRendezvous for HttpRendezvous {
    async fn register(
        &self,
        path: &str,
        writer: CompletionWriter,
    ) -> Result<CompletionUris, PlatformError> {
        let local_addr = self.ensure_started().await?;
        self.pending
            .insert(path.to_string(), Mutex::new(Some(writer)));

        let base = format!(
            "http://{}:{}{}{}",
            self.config.advertised_host,
            local_addr.port(),
            self.config.path_prefix,
            path
        );
        Ok(CompletionUris {
            complete: format!("{base}/complete"),
            fail: format!("{base}/fail"),
        })
    }
}

#[instrument(name = "rendezvous.completion", skip_all, fields(path = %path, action = %action))]
async fn handle_completion(
    State(pending): State<PendingMap>,
    Path((path, action)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if method != Method::POST {
        return StatusCode::NOT_FOUND;
    }
    let success = match action.as_str() {
        "complete" => true,
        "fail" => false,
        _ => return StatusCode::NOT_FOUND,
    };

    let Some(entry) = pending.get(&path) else {
        warn!("no pending completion for path");
        return StatusCode::NOT_FOUND;
    };
    let Ok(mut slot) = entry.value().lock() else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    let Some(writer) = slot.take() else {
        // Already resolved; resolve-once wins and repeats are acknowledged.
        return StatusCode::OK;
    };

    let datum = Datum::HttpReq {
        method: HttpMethod::Post,
        headers: collect_headers(&headers),
        body: body.to_vec(),
    };
    let completion = if success {
        Ok(StageResult::success(datum))
    } else {
        Err(CompletionError::Faulted(StageResult::failure(datum)))
    };
    writer.resolve(completion);
    StatusCode::OK
}

/// Flatten the header map, joining repeated values with `;`.
fn collect_headers(headers: &HeaderMap) -> Headers {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect::<Vec<_>>()
                .join(";");
            (name.as_str().to_string(), joined)
        })
        .collect()
}
