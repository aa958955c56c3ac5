use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::{info, warn};

use crate::errors::Result;
use crate::queue::{MessageQueue, QueueMessage};

/// Moves one in-flight message back to the queue, only if it is still in flight.
const RELEASE_SCRIPT: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) > 0 then
    return redis.call('RPUSH', KEYS[2], ARGV[1])
end
return 0
"#;

/// Reliable queue on two Redis lists: `{name}` holds visible messages and
/// `{name}:processing` holds received ones until they are deleted or released.
/// The receipt handle is the message body itself.
#[derive(Clone)]
pub struct RedisQueue {
    /// Used only for `BLMOVE`, which parks the connection while waiting.
    blocking: MultiplexedConnection,
    conn: MultiplexedConnection,
    name: String,
    processing: String,
}

impl RedisQueue {
    pub async fn connect(client: &Client, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let blocking = client.get_multiplexed_async_connection().await?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Redis queue '{name}' connected");
        Ok(Self {
            blocking,
            conn,
            processing: format!("{name}:processing"),
            name,
        })
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn send(&self, body: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(&self.name, body).await?;
        Ok(())
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let mut blocking = self.blocking.clone();
        let first: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.name)
            .arg(&self.processing)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(wait.as_secs_f64())
            .query_async(&mut blocking)
            .await?;

        let Some(first) = first else {
            return Ok(Vec::new());
        };

        let mut bodies = vec![first];
        let mut conn = self.conn.clone();
        while bodies.len() < max_messages {
            let next: Option<String> = redis::cmd("LMOVE")
                .arg(&self.name)
                .arg(&self.processing)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            match next {
                Some(body) => bodies.push(body),
                None => break,
            }
        }

        Ok(bodies
            .into_iter()
            .map(|body| QueueMessage {
                receipt_handle: body.clone(),
                body,
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(&self.processing, 1, receipt_handle).await?;
        if removed == 0 {
            warn!("Message was no longer in flight on '{}' when deleted", self.name);
        }
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.processing)
            .key(&self.name)
            .arg(receipt_handle)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        loop {
            // Newest first onto the head, so the original order is kept.
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing)
                .arg(&self.name)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        if recovered > 0 {
            info!("Requeued {recovered} in-flight messages on '{}'", self.name);
        }
        Ok(recovered)
    }
}
