// Redis-backed broker ports
//
// - RedisBroker: the death-event stream (consumer groups) and pub/sub
// - RedisQueue: one reliable delivery queue (pending list + processing list)
//
// All commands go through a cloned multiplexed connection; pub/sub needs a
// dedicated connection and gets one per subscription.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sentinela_core::{
    DeliveryQueue, EventStream, PublishError, Publisher, QueueError, QueueItem, StreamEntry,
    StreamError, Subscriber,
};

/// Field under which the event payload travels in a stream entry
const PAYLOAD_FIELD: &str = "data";

#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    /// A reliable queue rooted at `name` (`{name}:pending` / `{name}:processing`)
    pub fn queue(&self, name: &str) -> RedisQueue {
        RedisQueue {
            conn: self.conn.clone(),
            pending: format!("{name}:pending"),
            processing: format!("{name}:processing"),
        }
    }
}

#[async_trait]
impl EventStream for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match result {
            Ok(()) => Ok(()),
            // Group already exists from a previous run
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(StreamError::Connection(err.to_string())),
        }
    }

    async fn read_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        // Nil on block timeout
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(|e| StreamError::Read(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                match id.map.get(PAYLOAD_FIELD) {
                    Some(value) => match redis::from_redis_value::<String>(value) {
                        Ok(payload) => entries.push(StreamEntry {
                            id: id.id,
                            payload,
                        }),
                        Err(err) => {
                            warn!(entry_id = %id.id, %err, "stream entry payload is not a string");
                        }
                    },
                    None => {
                        warn!(entry_id = %id.id, "stream entry missing payload field");
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream, group, &[entry_id])
            .await
            .map_err(|e| StreamError::Ack(e.to_string()))?;
        Ok(())
    }

    async fn append(&self, stream: &str, payload: &str) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| StreamError::Append(e.to_string()))?;
        Ok(id)
    }
}

#[async_trait]
impl Publisher for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PublishError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| PublishError::Publish(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for RedisBroker {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, PublishError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| PublishError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| PublishError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%err, "dropping non-string pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    debug!("pub/sub receiver dropped, ending subscription");
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Reliable queue over two Redis lists
///
/// RPOPLPUSH moves an item from pending to processing in one step, so an
/// item being sent is never invisible to recovery.
pub struct RedisQueue {
    conn: redis::aio::MultiplexedConnection,
    pending: String,
    processing: String,
}

#[async_trait]
impl DeliveryQueue for RedisQueue {
    async fn enqueue(&self, item: &QueueItem) -> Result<(), QueueError> {
        let raw = serde_json::to_string(item).map_err(|e| QueueError::Enqueue(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lpush(&self.pending, raw)
            .await
            .map_err(|e| QueueError::Enqueue(e.to_string()))?;
        Ok(())
    }

    async fn pull_to_inflight(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .rpoplpush(&self.pending, &self.processing)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(raw)
    }

    async fn requeue(&self, raw: &str, item: &QueueItem) -> Result<(), QueueError> {
        let updated =
            serde_json::to_string(item).map_err(|e| QueueError::Operation(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lrem(&self.processing, 1, raw)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let _: i64 = conn
            .lpush(&self.pending, updated)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn remove_inflight(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lrem(&self.processing, 1, raw)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn recover_inflight(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .rpoplpush(&self.processing, &self.pending)
                .await
                .map_err(|e| QueueError::Operation(e.to_string()))?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn pending_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .llen(&self.pending)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(len)
    }

    async fn inflight_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .llen(&self.processing)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(len)
    }
}
