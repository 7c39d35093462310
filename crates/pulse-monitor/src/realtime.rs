// Per-user fan-out of realtime events to connected WebSocket clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::Platform;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub level: Level,
}

/// Messages sent to clients, serialized as JSON objects tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ConnectionEstablished {
        message: String,
        user_id: i64,
    },
    PlatformUpdate {
        platform: Platform,
        timestamp: DateTime<Utc>,
        data: Value,
    },
    MonitoringUpdate {
        entity_type: String,
        entity_id: i64,
        timestamp: DateTime<Utc>,
        status: Value,
    },
    AnalyticsUpdate {
        analytics_type: String,
        timestamp: DateTime<Utc>,
        data: Value,
    },
    Notification {
        timestamp: DateTime<Utc>,
        notification: Notification,
    },
    Pong,
    Subscribed {
        channel: Option<String>,
        message: String,
    },
    Echo {
        data: Value,
    },
    Error {
        message: String,
    },
}

impl Event {
    pub fn connection_established(user_id: i64) -> Self {
        Event::ConnectionEstablished {
            message: "WebSocket connected successfully".into(),
            user_id,
        }
    }

    pub fn platform_update(platform: Platform, data: Value) -> Self {
        Event::PlatformUpdate {
            platform,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn monitoring_update(entity_type: &str, entity_id: i64, status: Value) -> Self {
        Event::MonitoringUpdate {
            entity_type: entity_type.to_string(),
            entity_id,
            timestamp: Utc::now(),
            status,
        }
    }

    pub fn analytics_update(analytics_type: &str, data: Value) -> Self {
        Event::AnalyticsUpdate {
            analytics_type: analytics_type.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn notification(level: Level, title: &str, message: impl Into<String>) -> Self {
        Event::Notification {
            timestamp: Utc::now(),
            notification: Notification {
                title: title.to_string(),
                message: message.into(),
                level,
            },
        }
    }

    pub fn subscribed(channel: Option<String>) -> Self {
        let message = format!("Subscribed to {}", channel.as_deref().unwrap_or("None"));
        Event::Subscribed { channel, message }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant holds JSON-safe data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

pub type ConnectionId = u64;

/// Events queued per connection before it counts as stalled.
pub const CONNECTION_BUFFER: usize = 256;

type ConnectionMap = HashMap<i64, Vec<(ConnectionId, mpsc::Sender<Event>)>>;

/// Tracks open connections per user. A user may hold several (one per
/// browser tab); events go to all of them.
#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<ConnectionMap>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionMap> {
        self.connections.lock().expect("connection map mutex poisoned")
    }

    /// Register a connection for `user_id`; events arrive on the returned
    /// receiver.
    pub fn connect(&self, user_id: i64) -> (ConnectionId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().entry(user_id).or_default().push((id, tx));
        debug!(user_id, connection = id, "client connected");
        (id, rx)
    }

    /// Remove one connection. The user's entry goes once it is empty.
    pub fn disconnect(&self, user_id: i64, connection: ConnectionId) {
        let mut map = self.lock();
        if let Some(conns) = map.get_mut(&user_id) {
            conns.retain(|(id, _)| *id != connection);
            if conns.is_empty() {
                map.remove(&user_id);
            }
        }
        debug!(user_id, connection, "client disconnected");
    }

    /// Deliver `event` to every connection of `user_id`. Connections whose
    /// receiver is gone or whose buffer is full are dropped. Returns the
    /// number of deliveries.
    pub fn send_to_user(&self, user_id: i64, event: &Event) -> usize {
        let mut map = self.lock();
        let Some(conns) = map.get_mut(&user_id) else {
            return 0;
        };
        conns.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id, connection = *id, "dropping stalled client");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        let delivered = conns.len();
        if conns.is_empty() {
            map.remove(&user_id);
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn user_connection_count(&self, user_id: i64) -> usize {
        self.lock().get(&user_id).map_or(0, Vec::len)
    }

    pub fn active_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self.lock().keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn is_user_connected(&self, user_id: i64) -> bool {
        self.lock().contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_tagged_by_type() {
        let v = serde_json::to_value(Event::Pong).unwrap();
        assert_eq!(v, json!({ "type": "pong" }));

        let v = serde_json::to_value(Event::platform_update(Platform::Twitch, json!({"live": true})))
            .unwrap();
        assert_eq!(v["type"], "platform_update");
        assert_eq!(v["platform"], "twitch");
        assert_eq!(v["data"]["live"], true);
        let ts = v["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn notification_shape() {
        let v = serde_json::to_value(Event::notification(Level::Warning, "Collection failed", "boom"))
            .unwrap();
        assert_eq!(v["type"], "notification");
        assert_eq!(v["notification"]["level"], "warning");
        assert_eq!(v["notification"]["title"], "Collection failed");
        assert_eq!(v["notification"]["message"], "boom");
    }

    #[test]
    fn subscribed_message() {
        let v = serde_json::to_value(Event::subscribed(Some("twitter".into()))).unwrap();
        assert_eq!(v["channel"], "twitter");
        assert_eq!(v["message"], "Subscribed to twitter");
    }

    #[tokio::test]
    async fn fan_out_reaches_every_connection_of_user() {
        let mgr = ConnectionManager::new();
        let (_, mut a1) = mgr.connect(1);
        let (_, mut a2) = mgr.connect(1);
        let (_, mut b) = mgr.connect(2);

        assert_eq!(mgr.send_to_user(1, &Event::Pong), 2);
        assert_eq!(a1.recv().await, Some(Event::Pong));
        assert_eq!(a2.recv().await, Some(Event::Pong));
        assert!(b.try_recv().is_err());

        assert_eq!(mgr.connection_count(), 3);
        assert_eq!(mgr.user_connection_count(1), 2);
        assert_eq!(mgr.active_users(), vec![1, 2]);
    }

    #[test]
    fn disconnect_removes_empty_users() {
        let mgr = ConnectionManager::new();
        let (c1, _r1) = mgr.connect(7);
        let (c2, _r2) = mgr.connect(7);

        mgr.disconnect(7, c1);
        assert!(mgr.is_user_connected(7));
        mgr.disconnect(7, c2);
        assert!(!mgr.is_user_connected(7));
        assert_eq!(mgr.connection_count(), 0);
        // Unknown ids are ignored.
        mgr.disconnect(7, 99);
    }

    #[test]
    fn dead_receivers_are_pruned_on_send() {
        let mgr = ConnectionManager::new();
        let (_, live) = mgr.connect(3);
        let (_, dead) = mgr.connect(3);
        drop(dead);

        assert_eq!(mgr.send_to_user(3, &Event::Pong), 1);
        assert_eq!(mgr.user_connection_count(3), 1);

        drop(live);
        assert_eq!(mgr.send_to_user(3, &Event::Pong), 0);
        assert!(!mgr.is_user_connected(3));
    }

    #[test]
    fn stalled_connections_are_dropped() {
        let mgr = ConnectionManager::new();
        let (_, mut reader) = mgr.connect(5);
        let (_, _stalled) = mgr.connect(5);

        for _ in 0..CONNECTION_BUFFER {
            assert_eq!(mgr.send_to_user(5, &Event::Pong), 2);
            assert_eq!(reader.try_recv().unwrap(), Event::Pong);
        }
        // The second connection never read; its buffer is now full.
        assert_eq!(mgr.send_to_user(5, &Event::Pong), 1);
        assert_eq!(mgr.user_connection_count(5), 1);
        assert_eq!(reader.try_recv().unwrap(), Event::Pong);
    }

    #[test]
    fn sending_to_unknown_user_is_a_noop() {
        let mgr = ConnectionManager::new();
        assert_eq!(mgr.send_to_user(42, &Event::Pong), 0);
    }
}
