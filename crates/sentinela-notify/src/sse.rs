// SSE hub: real-time dashboard channel over broker pub/sub
//
// Events are published to the broker channel and every instance rebroadcasts
// to its locally connected clients, so dashboards behind any instance see
// every occurrence. Client outboxes are bounded and sends never block; a
// full outbox drops the event for that client only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sentinela_core::sse::SseEvent;
use sentinela_core::{
    NewNotificationRecord, NotificationChannel, NotificationLog, Publisher, Subscriber,
};

/// Broker pub/sub channel shared by all instances
pub const SSE_CHANNEL: &str = "sidot:sse_events";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const OUTBOX_CAPACITY: usize = 100;

struct ClientHandle {
    tx: mpsc::Sender<SseEvent>,
    /// Last successful send; a client that cannot absorb anything for the
    /// timeout window is disconnected. Mutex so broadcasts update it under
    /// the registry's read lock.
    last_ok: Mutex<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connected_clients: usize,
    pub events_broadcast: u64,
    pub events_dropped: u64,
}

pub struct SseHub {
    publisher: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
    log: Arc<dyn NotificationLog>,
    clients: RwLock<HashMap<Uuid, ClientHandle>>,
    broadcast_count: AtomicU64,
    dropped_count: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SseHub {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
        log: Arc<dyn NotificationLog>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            publisher,
            subscriber,
            log,
            clients: RwLock::new(HashMap::new()),
            broadcast_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a dashboard client; the receiver ends when the hub
    /// disconnects it
    pub fn register(&self) -> (Uuid, mpsc::Receiver<SseEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = Uuid::now_v7();
        self.clients.write().insert(
            id,
            ClientHandle {
                tx,
                last_ok: Mutex::new(Instant::now()),
            },
        );
        debug!(client_id = %id, "sse client connected");
        (id, rx)
    }

    pub fn unregister(&self, id: Uuid) {
        if self.clients.write().remove(&id).is_some() {
            debug!(client_id = %id, "sse client disconnected");
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connected_clients: self.clients.read().len(),
            events_broadcast: self.broadcast_count.load(Ordering::Relaxed),
            events_dropped: self.dropped_count.load(Ordering::Relaxed),
        }
    }

    /// Publish a new-occurrence event to the broker channel and record the
    /// dashboard outcome
    pub async fn publish_new_occurrence(&self, event: &SseEvent, occurrence_id: Uuid) {
        let record = match serde_json::to_string(event) {
            Ok(payload) => match self.publisher.publish(SSE_CHANNEL, &payload).await {
                Ok(()) => NewNotificationRecord::sent(
                    occurrence_id,
                    NotificationChannel::Dashboard,
                    serde_json::json!({ "channel": SSE_CHANNEL }),
                ),
                Err(err) => {
                    warn!(%occurrence_id, %err, "sse publish failed");
                    NewNotificationRecord::failed(
                        occurrence_id,
                        NotificationChannel::Dashboard,
                        err.to_string(),
                        serde_json::json!({}),
                    )
                }
            },
            Err(err) => {
                warn!(%occurrence_id, %err, "sse event serialization failed");
                return;
            }
        };
        if let Err(err) = self.log.record(record).await {
            warn!(%occurrence_id, %err, "failed to record dashboard outcome");
        }
    }

    /// Fan an event out to every locally connected client without blocking
    ///
    /// Sends run under the registry's read lock so new registrations never
    /// queue behind a broadcast; closed clients are removed afterwards.
    fn broadcast_local(&self, event: &SseEvent) {
        let now = Instant::now();
        let mut closed = Vec::new();
        {
            let clients = self.clients.read();
            for (id, client) in clients.iter() {
                match client.tx.try_send(event.clone()) {
                    Ok(()) => {
                        *client.last_ok.lock() = now;
                        self.broadcast_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Slow consumer: drop this event for this client only
                        self.dropped_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(client_id = %id, "sse client gone, removing");
                        closed.push(*id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in closed {
                clients.remove(&id);
            }
        }
    }

    /// Disconnect clients that absorbed nothing for the timeout window
    fn prune_stalled(&self) {
        let now = Instant::now();
        let mut clients = self.clients.write();
        clients.retain(|id, client| {
            let alive = now.duration_since(*client.last_ok.lock()) < CLIENT_TIMEOUT;
            if !alive {
                warn!(client_id = %id, "sse client stalled past timeout, disconnecting");
            }
            alive
        });
    }

    /// Spawn the rebroadcast and heartbeat loops; idempotent per instance
    pub async fn start(self: &Arc<Self>) {
        info!(channel = SSE_CHANNEL, "starting sse hub");

        let mut rx = match self.subscriber.subscribe(SSE_CHANNEL).await {
            Ok(rx) => rx,
            Err(err) => {
                warn!(%err, "sse hub could not subscribe; dashboard channel degraded");
                return;
            }
        };

        let hub = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let rebroadcast = tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = rx.recv() => {
                        let Some(payload) = payload else { break };
                        match serde_json::from_str::<SseEvent>(&payload) {
                            Ok(event) => hub.broadcast_local(&event),
                            Err(err) => warn!(%err, "dropping unparseable sse payload"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let hub = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        hub.broadcast_local(&SseEvent::heartbeat());
                        hub.prune_stalled();
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.push(rebroadcast);
        handles.push(heartbeat);
    }

    /// Stop the loops and disconnect every client
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.clients.write().clear();
        info!("sse hub stopped");
    }
}
