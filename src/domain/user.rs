//! Local mirror of identity-provider users.
//!
//! Identity is external; the core keeps a profile row per `UserId` so
//! conversations can render names and presence without calling out.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId};

/// Profile mirror for a known user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    /// Derived from the connection registry; persisted for offline reads.
    pub is_online: bool,
    pub last_seen_at: Option<Timestamp>,
}

impl UserProfile {
    /// Creates an offline profile mirror.
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
            bio: None,
            is_online: false,
            last_seen_at: None,
        }
    }

    /// Sets the avatar reference.
    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}
