//! Live websocket connections and the single broadcast dispatcher.
//!
//! Every connection owns an outbox channel drained by its own writer task.
//! The registry maps connection ids to outboxes behind one mutex; the lock is
//! never held across a socket write. Broadcasts go through one FIFO queue and
//! one dispatcher, so all connections see broadcasts in the same order.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};

pub const CLIENT_CONNECTED: &str = "CLIENT_CONNECTED";
pub const CLIENT_DISCONNECTED: &str = "CLIENT_DISCONNECTED";
pub const ANNOUNCEMENT: &str = "ANNOUNCEMENT";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsEvent {
    pub event: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub sender: String,
}

impl WsEvent {
    pub fn new(event: &str, data: &str, sender: &str) -> Self {
        Self {
            event: event.to_string(),
            data: data.to_string(),
            sender: sender.to_string(),
        }
    }

    pub fn welcome() -> Self {
        Self::new("connected", "Welcome to the server", "YourServer")
    }
}

/// Hooks fired for client-originated events. Registered once when the hub
/// starts.
pub trait HubObserver: Send + Sync {
    fn on_connect(&self, sender: &str, data: &str);
    fn on_disconnect(&self, sender: &str, data: &str);
    fn on_announcement(&self, sender: &str, data: &str);
}

pub struct LogObserver;

impl HubObserver for LogObserver {
    fn on_connect(&self, sender: &str, data: &str) {
        info!(sender, data, "Client connected");
    }

    fn on_disconnect(&self, sender: &str, data: &str) {
        info!(sender, data, "Client disconnected");
    }

    fn on_announcement(&self, sender: &str, data: &str) {
        info!(sender, data, "Announcement");
    }
}

pub type ConnectionId = u64;

#[derive(Default)]
struct Registry {
    clients: Mutex<HashMap<ConnectionId, UnboundedSender<WsEvent>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, UnboundedSender<WsEvent>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands the event to every outbox. A closed outbox means its writer
    /// failed, so the connection is dropped on the spot.
    fn deliver(&self, event: &WsEvent) -> usize {
        let mut clients = self.lock();
        clients.retain(|id, outbox| match outbox.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(connection = *id, "Dropping unreachable connection");
                false
            }
        });
        clients.len()
    }
}

async fn dispatch(registry: Arc<Registry>, mut pending: UnboundedReceiver<WsEvent>) {
    while let Some(event) = pending.recv().await {
        let delivered = registry.deliver(&event);
        debug!(event = %event.event, delivered, "Broadcast event");
    }
}

/// Drains one outbox into its socket. A failed write removes the connection
/// from the registry before the loop returns.
async fn write_loop<S>(
    registry: Arc<Registry>,
    id: ConnectionId,
    mut sink: S,
    mut outbox: UnboundedReceiver<WsEvent>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display + Send,
{
    while let Some(event) = outbox.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection = id, error = %e, "Failed to encode event");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::text(text)).await {
            warn!(connection = id, error = %e, "Websocket error");
            registry.lock().remove(&id);
            return;
        }
    }
    let _ = sink.close().await;
}

pub struct Hub {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    queue: UnboundedSender<WsEvent>,
    observer: Arc<dyn HubObserver>,
}

impl Hub {
    /// Creates the hub and spawns its dispatcher on the current runtime.
    pub fn start(observer: Arc<dyn HubObserver>) -> Arc<Self> {
        let registry = Arc::new(Registry::default());
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(registry.clone(), pending));

        Arc::new(Self {
            registry,
            next_id: AtomicU64::new(1),
            queue,
            observer,
        })
    }

    pub fn register(&self, outbox: UnboundedSender<WsEvent>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(id, outbox);
        id
    }

    pub fn deregister(&self, id: ConnectionId) -> bool {
        self.registry.lock().remove(&id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Queues an event for every connection. Never blocks.
    pub fn send(&self, event: WsEvent) {
        if self.queue.send(event).is_err() {
            warn!("Broadcast dispatcher has stopped; event dropped");
        }
    }

    pub fn handle_incoming(&self, event: WsEvent) {
        debug!(event = %event.event, sender = %event.sender, "Received event");

        match event.event.as_str() {
            CLIENT_CONNECTED => self.observer.on_connect(&event.sender, &event.data),
            CLIENT_DISCONNECTED => self.observer.on_disconnect(&event.sender, &event.data),
            ANNOUNCEMENT => {
                self.observer.on_announcement(&event.sender, &event.data);
                self.send(event);
            }
            _ => {}
        }
    }

    /// Runs one upgraded socket until it closes or fails.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket) {
        let (sink, incoming) = socket.split();
        self.run_connection(sink, incoming).await;
    }

    /// Whichever side stops first ends the connection: the peer closing or
    /// sending garbage ends the read loop, a failed write ends the writer.
    /// Either way the connection is deregistered and the disconnect hook
    /// fires once.
    async fn run_connection<Si, St, E>(&self, sink: Si, incoming: St)
    where
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (outbox, pending) = mpsc::unbounded_channel();

        // Queued ahead of registration so it is always the first frame
        let _ = outbox.send(WsEvent::welcome());
        let id = self.register(outbox);
        info!(connection = id, "Peer connected");

        let mut writer = tokio::spawn(write_loop(self.registry.clone(), id, sink, pending));
        tokio::select! {
            _ = self.read_loop(id, incoming) => {}
            _ = &mut writer => {}
        }

        // Dropping the outbox lets a still-running writer close the socket
        self.deregister(id);
        info!(connection = id, "Connection closed");
        self.observer.on_disconnect("Unknown/System", "Connection lost");
    }

    async fn read_loop<S, E>(&self, id: ConnectionId, mut incoming: S)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        while let Some(frame) = incoming.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(connection = id, error = %e, "Read error");
                    break;
                }
            };
            if msg.is_close() {
                break;
            }
            // ping, pong and binary frames carry no events
            let Ok(text) = msg.to_str() else {
                continue;
            };
            match serde_json::from_str::<WsEvent>(text) {
                Ok(event) => self.handle_incoming(event),
                Err(e) => {
                    warn!(connection = id, error = %e, "Malformed event, closing connection");
                    break;
                }
            }
        }
    }
}
