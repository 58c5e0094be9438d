//! Directory of online peers.
//!
//! The hub is the single process-wide mapping from public-key token to
//! connected client. A peer is *online* exactly while its token is in this
//! map. All operations are atomic under one lock; no operation ever
//! overwrites an existing registration.
//!
//! The `Arc<Client>` returned by [`Hub::lookup`] stays valid memory, but the
//! peer may disconnect at any moment afterwards - callers must treat a
//! failed attach as "peer offline" at the routine level rather than holding
//! the lookup result across suspension points.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use lantern_proto::PublicKey;

use crate::client::Client;

/// Errors from directory operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// A client is already registered under this public key.
    #[error("client with public key already exists")]
    AlreadyRegistered,

    /// No client is registered under this public key.
    #[error("client with public key does not exist")]
    NotRegistered,
}

/// The process-wide peer directory.
#[derive(Default)]
pub struct Hub {
    clients: Mutex<HashMap<PublicKey, Arc<Client>>>,
}

impl Hub {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under `key`. Never overwrites.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyRegistered`] if the key is taken.
    pub fn register(&self, key: PublicKey, client: Arc<Client>) -> Result<(), HubError> {
        let mut clients = self.clients.lock().expect("hub lock poisoned");
        if clients.contains_key(&key) {
            return Err(HubError::AlreadyRegistered);
        }
        clients.insert(key, client);
        Ok(())
    }

    /// Look up the client registered under `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &PublicKey) -> Option<Arc<Client>> {
        self.clients.lock().expect("hub lock poisoned").get(key).cloned()
    }

    /// Is a client registered under `key`?
    #[must_use]
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.clients.lock().expect("hub lock poisoned").contains_key(key)
    }

    /// Remove the registration for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotRegistered`] if the key is absent.
    pub fn unregister(&self, key: &PublicKey) -> Result<(), HubError> {
        let mut clients = self.clients.lock().expect("hub lock poisoned");
        match clients.remove(key) {
            Some(_) => Ok(()),
            None => Err(HubError::NotRegistered),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.clients.lock().expect("hub lock poisoned").len();
        f.debug_struct("Hub").field("online", &count).finish()
    }
}
