use dashmap::DashMap;

use civic_core::wire::{RegisterRequest, UserPresence};

/// Users that registered with this gateway, keyed by user id. Held in memory
/// only; a restart forgets everyone.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: DashMap<String, UserPresence>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration at `now`. Registering again refreshes
    /// `lastSeen` and the role, and keeps `registeredAt`.
    pub fn register(&self, req: &RegisterRequest, now: i64) -> UserPresence {
        let mut entry = self
            .users
            .entry(req.user_id.clone())
            .or_insert_with(|| UserPresence {
                user_id: req.user_id.clone(),
                user_role: req.user_role.clone(),
                registered_at: now,
                last_seen: now,
            });
        entry.user_role = req.user_role.clone();
        entry.last_seen = entry.last_seen.max(now);
        entry.clone()
    }

    /// Every registered user, ordered by id.
    pub fn list(&self) -> Vec<UserPresence> {
        let mut users: Vec<UserPresence> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
