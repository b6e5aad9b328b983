//! TCP server exposing a [`Backend`] to remote clients.
//!
//! Each accepted connection gets three pieces:
//!
//! - a listener task that reads and validates requests and pushes them onto
//!   the connection's [`TaskQueue`];
//! - a worker task that pops them, runs them against the connection's
//!   [`ObjectRegistry`] and writes the responses;
//! - an entry in the [`ConnectionTable`], so shutdown can reach its queue.
//!
//! One listener, one queue and one worker per connection keep responses in
//! request order.

pub mod connection;
pub mod listener;
pub mod worker;

pub use connection::{ConnectionId, ConnectionState, ConnectionTable};

use crate::backend::Backend;
use crate::config::ServerConfig;
use crate::protocol::Request;
use crate::queue::TaskQueue;
use crate::registry::ObjectRegistry;
use crate::{Result, RpcError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

/// One decoded request waiting for its connection's worker.
#[derive(Debug)]
pub struct ServerTask {
    pub connection: ConnectionId,
    pub request: Request,
}

/// Handle to a running server. Dropping shuts down the server.
pub struct RpcServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    connections: ConnectionTable,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections currently registered.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Shut down the server.
    ///
    /// Stops accepting, tells every listener to stop reading and shuts down
    /// every connection queue. Requests already executing finish; queued
    /// ones are discarded.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        let discarded = self.connections.close_all();
        if discarded > 0 {
            debug!("Discarded {} queued requests on shutdown", discarded);
        }
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Tensor RPC server.
pub struct RpcServer;

impl RpcServer {
    /// Bind to the configured address and start serving `backend`.
    ///
    /// Port 0 picks a free port; read it back from the returned handle.
    pub async fn start(config: ServerConfig, backend: Arc<dyn Backend>) -> Result<RpcServerHandle> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()?).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!(
            "Tensor RPC server listening on {} (backend: {}, max connections: {})",
            addr,
            backend.name(),
            config.max_connections
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let connections = ConnectionTable::new();

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            backend,
            config,
            connections.clone(),
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(RpcServerHandle {
            addr,
            port,
            connections,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        backend: Arc<dyn Backend>,
        config: ServerConfig,
        connections: ConnectionTable,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Tensor RPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if connections.len() >= config.max_connections {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    config.max_connections
                                );
                                continue;
                            }

                            tokio::spawn(Self::handle_connection(
                                stream,
                                peer_addr,
                                backend.clone(),
                                connections.clone(),
                                config.max_message_size,
                                conn_shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        backend: Arc<dyn Backend>,
        connections: ConnectionTable,
        max_message_size: u64,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        let (mut reader, writer) = stream.into_split();

        let queue = Arc::new(TaskQueue::new());
        let id = connections.register(peer_addr, queue.clone());
        info!("Connection {} accepted from {}", id, peer_addr);

        let worker = tokio::spawn(worker::run(
            id,
            queue.clone(),
            ObjectRegistry::new(backend),
            Arc::new(Mutex::new(writer)),
        ));

        let result = tokio::select! {
            result = listener::listen(id, &mut reader, &queue, max_message_size) => result,
            _ = shutdown_rx.changed() => Ok(()),
        };
        match result {
            Ok(()) => debug!("Connection {}: listener finished", id),
            Err(RpcError::ConnectionClosed) => {
                debug!("Connection {}: peer closed mid-request", id)
            }
            Err(e) if e.is_fatal() => warn!("Connection {} from {} dropped: {}", id, peer_addr, e),
            Err(e) => error!("Connection {}: listener stopped unexpectedly: {}", id, e),
        }

        match connections.begin_close(id) {
            Ok(0) => {}
            Ok(discarded) => debug!("Connection {}: discarded {} queued requests", id, discarded),
            // Already closing because the server is shutting down
            Err(_) => {}
        }
        drop(reader);

        if let Err(e) = worker.await {
            error!("Connection {}: worker task failed: {}", id, e);
        }
        if let Err(e) = connections.finish_close(id) {
            warn!("Connection {}: {}", id, e);
        }
        info!("Connection {} closed", id);
    }
}
