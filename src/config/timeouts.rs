//! Protocol timeout configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::application::Timeouts;

use super::error::ValidationError;

/// Timeouts in seconds, all optional with protocol defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_handshake")]
    pub handshake_secs: u64,
    #[serde(default = "default_ack")]
    pub ack_secs: u64,
    #[serde(default = "default_typing")]
    pub typing_secs: u64,
    #[serde(default = "default_presence_grace")]
    pub presence_grace_secs: u64,
    #[serde(default = "default_ring")]
    pub ring_secs: u64,
    #[serde(default = "default_call_reconnect_grace")]
    pub call_reconnect_grace_secs: u64,
    #[serde(default = "default_ai_wall_clock")]
    pub ai_wall_clock_secs: u64,
    #[serde(default = "default_ai_idle")]
    pub ai_idle_secs: u64,
}

fn default_handshake() -> u64 {
    5
}
fn default_ack() -> u64 {
    5
}
fn default_typing() -> u64 {
    5
}
fn default_presence_grace() -> u64 {
    5
}
fn default_ring() -> u64 {
    30
}
fn default_call_reconnect_grace() -> u64 {
    10
}
fn default_ai_wall_clock() -> u64 {
    120
}
fn default_ai_idle() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake(),
            ack_secs: default_ack(),
            typing_secs: default_typing(),
            presence_grace_secs: default_presence_grace(),
            ring_secs: default_ring(),
            call_reconnect_grace_secs: default_call_reconnect_grace(),
            ai_wall_clock_secs: default_ai_wall_clock(),
            ai_idle_secs: default_ai_idle(),
        }
    }
}

impl TimeoutsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("timeouts.handshake_secs", self.handshake_secs),
            ("timeouts.ack_secs", self.ack_secs),
            ("timeouts.typing_secs", self.typing_secs),
            ("timeouts.presence_grace_secs", self.presence_grace_secs),
            ("timeouts.ring_secs", self.ring_secs),
            (
                "timeouts.call_reconnect_grace_secs",
                self.call_reconnect_grace_secs,
            ),
            ("timeouts.ai_wall_clock_secs", self.ai_wall_clock_secs),
            ("timeouts.ai_idle_secs", self.ai_idle_secs),
        ] {
            if value == 0 {
                return Err(ValidationError::new(field, "must be at least 1 second"));
            }
        }
        Ok(())
    }

    /// Converts to the application layer's duration set.
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            handshake: Duration::from_secs(self.handshake_secs),
            ack: Duration::from_secs(self.ack_secs),
            typing: Duration::from_secs(self.typing_secs),
            presence_grace: Duration::from_secs(self.presence_grace_secs),
            ring: Duration::from_secs(self.ring_secs),
            call_reconnect_grace: Duration::from_secs(self.call_reconnect_grace_secs),
            ai_wall_clock: Duration::from_secs(self.ai_wall_clock_secs),
            ai_idle: Duration::from_secs(self.ai_idle_secs),
        }
    }
}
