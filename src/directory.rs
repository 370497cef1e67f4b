use std::{collections::HashMap, sync::RwLock};

use crate::account::UserId;

/// Maps the caller's opaque identity onto a user id. Resolution is trusted;
/// the ledger never checks credentials itself.
pub trait UserDirectory: Send + Sync {
    fn resolve(&self, identity: &str) -> Option<UserId>;

    fn email(&self, user: UserId) -> Option<String>;
}

#[derive(Debug, Default)]
struct Users {
    ids: HashMap<String, UserId>,
    emails: HashMap<UserId, String>,
}

/// Directory kept in memory: identities map to ids, ids to e-mails.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<Users>,
}

impl InMemoryDirectory {
    /// Registers `identity`, replacing any previous registration. The e-mail
    /// of `id` is the one given last.
    pub fn register(&self, identity: impl Into<String>, id: UserId, email: impl Into<String>) {
        let mut users = self
            .users
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        users.ids.insert(identity.into(), id);
        users.emails.insert(id, email.into());
    }
}

impl UserDirectory for InMemoryDirectory {
    fn resolve(&self, identity: &str) -> Option<UserId> {
        self.users
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .ids
            .get(identity)
            .copied()
    }

    fn email(&self, user: UserId) -> Option<String> {
        self.users
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .emails
            .get(&user)
            .cloned()
    }
}
