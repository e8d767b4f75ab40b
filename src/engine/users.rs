use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::model::*;

use super::{Engine, EngineError};

/// Registered accounts, indexed by id, username and email.
#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<UserId, User>,
    by_username: DashMap<String, UserId>,
    by_email: DashMap<String, UserId>,
    /// Serializes registrations so the uniqueness checks can't race.
    register_lock: Mutex<()>,
}

fn email_key(email: &str) -> String {
    email.to_ascii_lowercase()
}

impl UserDirectory {
    pub(super) fn from_events(events: &[Event]) -> Self {
        let directory = Self::default();
        for event in events {
            if let Event::UserRegistered { user } = event {
                directory.apply(user);
            }
        }
        directory
    }

    fn apply(&self, user: &User) {
        self.by_username.insert(user.username.clone(), user.id);
        self.by_email.insert(email_key(&user.email), user.id);
        self.users.insert(user.id, user.clone());
    }

    pub fn get(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    pub fn find_by_username(&self, username: &str) -> Option<User> {
        let id = *self.by_username.get(username)?;
        self.get(id)
    }

    pub fn username(&self, id: UserId) -> Option<String> {
        self.users.get(&id).map(|u| u.username.clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
            .into_iter()
            .map(|user| Event::UserRegistered { user })
            .collect()
    }
}

impl Engine {
    /// Persist a new account. Username is case-sensitive; email is not.
    pub async fn register_user(&self, user: User) -> Result<User, EngineError> {
        let _serial = self.users.register_lock.lock().await;
        if self.users.by_username.contains_key(&user.username) {
            return Err(EngineError::AlreadyExists("username"));
        }
        if self.users.by_email.contains_key(&email_key(&user.email)) {
            return Err(EngineError::AlreadyExists("email"));
        }
        let event = Event::UserRegistered { user: user.clone() };
        self.wal().commit(&event, || self.users.apply(&user)).await?;
        tracing::info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }
}
