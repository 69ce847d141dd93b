//! Configuration for the cache and the tracking client.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time after which cached values are treated as absent.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Configuration for a [`FetchCache`](crate::FetchCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries at least this old are never served.
    pub stale_threshold: Duration,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

/// How handlers registered for the same message type interact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerMode {
    /// Every handler registered for a message type is invoked.
    #[default]
    FanOut,
    /// Only the most recently registered handler is tracked per message type.
    ///
    /// Older handlers are not unregistered from the transport when replaced, so they keep
    /// firing until the connection is closed. This mirrors the behaviour of older clients.
    Replace,
}

/// Configuration for a [`LiveTrackingClient`](crate::LiveTrackingClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Event sent to join an order room.
    pub join_event: String,
    /// Event sent to leave an order room.
    pub leave_event: String,
    /// Event pushed by the server when an order changes.
    pub update_event: String,
    pub listener_mode: ListenerMode,
    /// Replay joins for all joined rooms whenever the transport reconnects.
    pub rejoin_on_reconnect: bool,
}

impl TrackingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_listener_mode(mut self, mode: ListenerMode) -> Self {
        self.listener_mode = mode;
        self
    }

    #[must_use]
    pub fn with_rejoin_on_reconnect(mut self, rejoin: bool) -> Self {
        self.rejoin_on_reconnect = rejoin;
        self
    }

    #[must_use]
    pub fn with_events(
        mut self,
        join: impl Into<String>,
        leave: impl Into<String>,
        update: impl Into<String>,
    ) -> Self {
        self.join_event = join.into();
        self.leave_event = leave.into();
        self.update_event = update.into();
        self
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            join_event: "joinOrderRoom".into(),
            leave_event: "leaveOrderRoom".into(),
            update_event: "orderStatusUpdate".into(),
            listener_mode: ListenerMode::FanOut,
            rejoin_on_reconnect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_is_five_minutes() {
        assert_eq!(CacheConfig::default().stale_threshold, Duration::from_secs(300));
    }

    #[test]
    fn partial_tracking_config_uses_defaults() {
        let config: TrackingConfig =
            serde_json::from_str(r#"{"listener_mode": "replace"}"#).unwrap();
        assert_eq!(config.listener_mode, ListenerMode::Replace);
        assert_eq!(config.join_event, "joinOrderRoom");
        assert!(config.rejoin_on_reconnect);
    }
}
