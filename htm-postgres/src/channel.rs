//! Database-backed pub/sub channel for robot-group synchronization.
//!
//! A thin protocol over PostgreSQL NOTIFY/LISTEN. Events are JSON
//! payloads on a channel named for the group; a background listener
//! task owns a dedicated connection and delivers decoded notifications
//! to registered callbacks under a lock. Decode errors are logged and
//! skipped; connection errors back off briefly and re-listen until the
//! channel is stopped.

use crate::types::map_db_error;
use chrono::Utc;
use htm_core::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix of every group channel name.
const CHANNEL_PREFIX: &str = "htm_wm_";

/// Wait-for-notify timeout so the listener can observe the stop flag
/// promptly.
const LISTEN_POLL: Duration = Duration::from_millis(500);

/// Back-off before re-listening after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Working-memory change event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    /// A node entered the shared working memory
    Added,
    /// A node was evicted from a member's working memory
    Evicted,
    /// The shared working memory was cleared
    Cleared,
}

impl GroupEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Evicted => "evicted",
            Self::Cleared => "cleared",
        }
    }

    /// Parse a wire name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "added" => Ok(Self::Added),
            "evicted" => Ok(Self::Evicted),
            "cleared" => Ok(Self::Cleared),
            other => Err(Error::Validation(format!("unknown group event '{other}'"))),
        }
    }
}

/// Wire payload of a group notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventPayload {
    event: String,
    node_id: Option<i64>,
    robot_id: i64,
    timestamp: String,
}

/// Callback invoked for each decoded notification.
pub type ChangeCallback = Box<dyn Fn(GroupEvent, Option<i64>, i64) + Send + Sync>;

/// Listener delivery statistics.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// Notifications delivered to callbacks
    pub delivered: u64,
    /// Payloads that failed to decode and were skipped
    pub decode_errors: u64,
}

/// Sanitize a group name into a channel identifier: lowercased, with
/// anything outside `[a-z0-9_]` replaced by `_`.
#[must_use]
pub fn channel_name(group_name: &str) -> String {
    let sanitized: String = group_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{CHANNEL_PREFIX}{sanitized}")
}

/// NOTIFY/LISTEN channel for one robot group.
pub struct PubSubChannel {
    pool: PgPool,
    channel: String,
    callbacks: Arc<Mutex<Vec<ChangeCallback>>>,
    stop_requested: Arc<AtomicBool>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    delivered: Arc<AtomicU64>,
    decode_errors: Arc<AtomicU64>,
}

impl PubSubChannel {
    /// Create a channel for the named group.
    #[must_use]
    pub fn new(pool: PgPool, group_name: &str) -> Self {
        Self {
            pool,
            channel: channel_name(group_name),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            stop_requested: Arc::new(AtomicBool::new(false)),
            listener_task: Mutex::new(None),
            delivered: Arc::new(AtomicU64::new(0)),
            decode_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The sanitized channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish an event on the channel.
    pub async fn notify(
        &self,
        event: GroupEvent,
        node_id: Option<i64>,
        robot_id: i64,
    ) -> Result<()> {
        let payload = EventPayload {
            event: event.as_str().to_string(),
            node_id,
            robot_id,
            timestamp: Utc::now().to_rfc3339(),
        };
        let encoded = serde_json::to_string(&payload)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&encoded)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        debug!("Published {} on {}", event.as_str(), self.channel);
        Ok(())
    }

    /// Register a callback for decoded notifications.
    pub fn on_change(&self, callback: ChangeCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Start the background listener task. Idempotent.
    pub fn start_listening(&self) -> Result<()> {
        let mut task = self.listener_task.lock();
        if task.is_some() {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let pool = self.pool.clone();
        let channel = self.channel.clone();
        let callbacks = Arc::clone(&self.callbacks);
        let stop = Arc::clone(&self.stop_requested);
        let delivered = Arc::clone(&self.delivered);
        let decode_errors = Arc::clone(&self.decode_errors);

        let handle = tokio::spawn(async move {
            info!("Listening on {}", channel);
            while !stop.load(Ordering::SeqCst) {
                let mut listener = match PgListener::connect_with(&pool).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        warn!("Listener connect failed on {}: {}", channel, e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                if let Err(e) = listener.listen(&channel).await {
                    warn!("LISTEN failed on {}: {}", channel, e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }

                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match tokio::time::timeout(LISTEN_POLL, listener.recv()).await {
                        Err(_elapsed) => {} // poll tick; re-check the stop flag
                        Ok(Err(e)) => {
                            warn!("Listener error on {}: {}, reconnecting", channel, e);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            break;
                        }
                        Ok(Ok(notification)) => {
                            match serde_json::from_str::<EventPayload>(notification.payload()) {
                                Ok(payload) => match GroupEvent::parse(&payload.event) {
                                    Ok(event) => {
                                        let callbacks = callbacks.lock();
                                        for callback in callbacks.iter() {
                                            callback(event, payload.node_id, payload.robot_id);
                                        }
                                        delivered.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(e) => {
                                        decode_errors.fetch_add(1, Ordering::Relaxed);
                                        warn!("Skipping unknown event on {}: {}", channel, e);
                                    }
                                },
                                Err(e) => {
                                    decode_errors.fetch_add(1, Ordering::Relaxed);
                                    warn!("Skipping undecodable payload on {}: {}", channel, e);
                                }
                            }
                        }
                    }
                }
            }
            info!("Listener on {} stopped", channel);
        });

        *task = Some(handle);
        Ok(())
    }

    /// Stop the listener task, waiting for it to exit.
    pub async fn stop_listening(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let handle = self.listener_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether the listener task is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener_task.lock().is_some()
    }

    /// Delivery statistics.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_sanitized() {
        assert_eq!(channel_name("fleet"), "htm_wm_fleet");
        assert_eq!(channel_name("Fleet Alpha-7"), "htm_wm_fleet_alpha_7");
        assert_eq!(channel_name("ops/east.1"), "htm_wm_ops_east_1");
    }

    #[test]
    fn event_wire_names_roundtrip() {
        for event in [GroupEvent::Added, GroupEvent::Evicted, GroupEvent::Cleared] {
            assert_eq!(GroupEvent::parse(event.as_str()).unwrap(), event);
        }
        assert!(GroupEvent::parse("renamed").is_err());
    }

    #[test]
    fn payload_shape_matches_the_wire_contract() {
        let payload = EventPayload {
            event: "added".to_string(),
            node_id: Some(42),
            robot_id: 7,
            timestamp: "2026-07-15T12:00:00+00:00".to_string(),
        };
        let encoded = serde_json::to_string(&payload).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["event"], "added");
        assert_eq!(value["node_id"], 42);
        assert_eq!(value["robot_id"], 7);
        assert!(value["timestamp"].is_string());

        // null node_id for cleared events
        let cleared = EventPayload {
            event: "cleared".to_string(),
            node_id: None,
            robot_id: 7,
            timestamp: "2026-07-15T12:00:00+00:00".to_string(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&cleared).unwrap()).unwrap();
        assert!(value["node_id"].is_null());
    }
}
