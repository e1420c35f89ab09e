//! JSON-RPC server over stdin/stdout.
//!
//! One request per line in, one response per line out. Requests are handled
//! concurrently; a single writer task owns stdout so lines never interleave.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::generation::Orchestrator;

use super::methods::handle_request;
use super::types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ReadyParams, JSONRPC_VERSION,
};

/// State shared across all request handlers.
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    /// Configuration currently in effect; replaced on reload.
    config: Mutex<DaemonConfig>,
    shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: DaemonConfig) -> Self {
        Self {
            orchestrator,
            config: Mutex::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> DaemonConfig {
        match self.config.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_config(&self, config: DaemonConfig) {
        match self.config.lock() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Runs the JSON-RPC server until stdin closes or `shutdown` is called.
pub async fn run_server(state: Arc<ServerState>) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(rx));

    let (_, active) = state.orchestrator.list_pipelines();
    send_notification(
        &tx,
        "ready",
        ReadyParams {
            version: env!("CARGO_PKG_VERSION"),
            pipeline: active,
            backends: state.orchestrator.list_backends().len(),
        },
    );
    tracing::info!("JSON-RPC server started, waiting for requests");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => {
                tracing::info!("Server shutdown requested");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading stdin");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let state = Arc::clone(&state);
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = process_request(&line, &state).await {
                let _ = tx.send(response);
            }
        });

        // reap finished handlers so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    state.orchestrator.shutdown().await;

    drop(tx);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "stdout writer ended abnormally");
    }
    tracing::info!("JSON-RPC server stopped");
    Ok(())
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::error!(error = %e, "Error writing stdout");
            break;
        }
    }
}

/// Processes a single JSON-RPC request line.
pub(crate) async fn process_request(line: &str, state: &ServerState) -> Option<String> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                None,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            );
            return serde_json::to_string(&error).ok();
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let error = JsonRpcErrorResponse::new(
            Some(request.id),
            JsonRpcError::invalid_request("Invalid JSON-RPC version (expected 2.0)"),
        );
        return serde_json::to_string(&error).ok();
    }

    tracing::debug!(method = %request.method, "Handling request");
    match handle_request(&request.method, request.params, state).await {
        Ok(result) => serde_json::to_string(&JsonRpcResponse::new(request.id, result)).ok(),
        Err(error) => {
            tracing::debug!(method = %request.method, code = error.code, message = %error.message, "Request failed");
            serde_json::to_string(&JsonRpcErrorResponse::new(Some(request.id), error)).ok()
        }
    }
}

/// Queues a JSON-RPC notification for stdout.
pub fn send_notification<T: serde::Serialize>(
    tx: &mpsc::UnboundedSender<String>,
    method: &'static str,
    params: T,
) {
    let notification = JsonRpcNotification::new(method, params);
    if let Ok(json) = serde_json::to_string(&notification) {
        let _ = tx.send(json);
    }
}
