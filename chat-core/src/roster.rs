//! Contact roster and presence views.
//!
//! Both are passthrough state: the roster is replaced wholesale on every
//! directory refresh (never merged incrementally), and the presence set is
//! replaced wholesale on every snapshot pushed by the stream.

use std::collections::HashSet;

use chat_types::{User, UserId};

/// The contact list, excluding the session user.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    contacts: Vec<User>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster with a freshly fetched contact list.
    ///
    /// The session user is excluded by id; server responses include the
    /// caller on some deployments.
    pub fn replace(&mut self, users: Vec<User>, session_user: Option<&UserId>) {
        self.contacts = match session_user {
            Some(self_id) => users.into_iter().filter(|u| u.id != *self_id).collect(),
            None => users,
        };
    }

    /// The current contacts, in server order.
    pub fn contacts(&self) -> &[User] {
        &self.contacts
    }

    /// Look up a contact by id.
    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.contacts.iter().find(|u| u.id == *id)
    }

    /// Number of contacts.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Check whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Drop all contacts. Used on session teardown only.
    pub fn clear(&mut self) {
        self.contacts.clear();
    }
}

/// The set of currently online user ids.
#[derive(Debug, Clone, Default)]
pub struct PresenceSet {
    online: HashSet<UserId>,
}

impl PresenceSet {
    /// Create an empty presence set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the online set with a full snapshot.
    pub fn replace(&mut self, ids: Vec<UserId>) {
        self.online = ids.into_iter().collect();
    }

    /// Check whether a user is online.
    pub fn contains(&self, id: &UserId) -> bool {
        self.online.contains(id)
    }

    /// Snapshot of all online ids.
    pub fn snapshot(&self) -> Vec<UserId> {
        self.online.iter().copied().collect()
    }

    /// Drop all presence info. Used on logout.
    pub fn clear(&mut self) {
        self.online.clear();
    }
}
