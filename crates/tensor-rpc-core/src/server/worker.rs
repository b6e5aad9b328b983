//! Request execution for one connection.

use super::{ConnectionId, ServerTask};
use crate::protocol::frame::write_message;
use crate::queue::TaskQueue;
use crate::registry::ObjectRegistry;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Execute queued requests in order and write their responses.
///
/// Handlers run on the blocking pool; the registry moves into each blocking
/// call and back out. Returns once the queue is shut down, dropping the
/// registry and with it every buffer the connection still owns.
pub async fn run<W>(
    id: ConnectionId,
    queue: Arc<TaskQueue<ServerTask>>,
    mut registry: ObjectRegistry,
    writer: Arc<Mutex<W>>,
) where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(task) = queue.pop().await {
        let command = task.request.command();

        let executed = tokio::task::spawn_blocking(move || {
            let frame = registry.execute(task.request);
            (registry, frame)
        })
        .await;
        let frame = match executed {
            Ok((returned, frame)) => {
                registry = returned;
                frame
            }
            Err(e) => {
                error!("Connection {}: {} handler aborted: {}", id, command, e);
                queue.shutdown();
                return;
            }
        };

        let bytes = frame.encode();
        let mut writer = writer.lock().await;
        if let Err(e) = write_message(&mut *writer, &bytes).await {
            warn!("Connection {}: failed to send {} response: {}", id, command, e);
            continue;
        }
        debug!(
            "Connection {}: {} answered ({} bytes, ok={})",
            id,
            command,
            bytes.len(),
            frame.ok
        );
    }
    debug!(
        "Connection {}: worker stopped with {} buffers live",
        id,
        registry.live_buffers()
    );
}
