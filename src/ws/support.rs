use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::StreamExt;
use tokio::sync::oneshot;

/// Splits a freshly-accepted `WebSocket` into its send half plus a
/// liveness flag backed by a concurrently-running reader task.
///
/// The reader task starts immediately — it *is* `spec.md` §4.5 step 6's
/// "Receive loop" (inbound frames are keepalive/no-ops) — but it also
/// gives every other step a way to answer "is the client still connected"
/// without itself trying to read: the Connection Manager's backfill path
/// polls `connected.load()` before emitting anything (§4.5 steps 3e/4),
/// and the live loop `select!`s on `closed` to stop promptly on
/// disconnect rather than waiting for a failed send.
pub fn split_and_watch(socket: WebSocket) -> (SplitSink<WebSocket, Message>, Arc<AtomicBool>, oneshot::Receiver<()>) {
    let (sink, mut stream) = socket.split();
    let connected = Arc::new(AtomicBool::new(true));
    let connected_reader = connected.clone();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        connected_reader.store(false, Ordering::Relaxed);
        let _ = closed_tx.send(());
    });

    (sink, connected, closed_rx)
}
