use crate::storage::persistence::{PersistenceBackend, PersistenceError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const USERS_KEY: &str = "_users.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

/// The resolved caller of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    /// Device the caller is acting through, if any
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: None,
            role: Role::User,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: None,
            role: Role::Admin,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}/{}", self.name, device),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    key: String,
    #[serde(flatten)]
    identity: Identity,
}

/// API key to identity table
pub struct UserRegistry {
    users: DashMap<String, Identity>,
    backend: Option<Arc<dyn PersistenceBackend>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            backend: None,
        }
    }

    /// Load the registry from a backend; later changes are written back to it
    pub fn open(backend: Arc<dyn PersistenceBackend>) -> Result<Self, PersistenceError> {
        let users = DashMap::new();

        if let Some(data) = backend.read(USERS_KEY)? {
            let records: Vec<UserRecord> = serde_json::from_slice(&data)
                .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
            for record in records {
                users.insert(record.key, record.identity);
            }
        }

        Ok(Self {
            users,
            backend: Some(backend),
        })
    }

    /// Register a key. Returns false if the key is already taken.
    pub fn add(&self, key: impl Into<String>, identity: Identity) -> Result<bool, PersistenceError> {
        let key = key.into();
        match self.users.entry(key.clone()) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(identity);
            }
        }
        if let Err(e) = self.save() {
            // A key that never reached disk must not authenticate
            self.users.remove(&key);
            return Err(e);
        }
        Ok(true)
    }

    pub fn authenticate(&self, key: &str) -> Option<Identity> {
        self.users.get(key).map(|e| e.value().clone())
    }

    /// All identities, sorted by name
    pub fn list(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.users.iter().map(|e| e.value().clone()).collect();
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        identities
    }

    pub fn admins(&self) -> Vec<Identity> {
        self.list().into_iter().filter(|i| i.is_admin()).collect()
    }

    fn save(&self) -> Result<(), PersistenceError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let records: Vec<UserRecord> = self
            .users
            .iter()
            .map(|e| UserRecord {
                key: e.key().clone(),
                identity: e.value().clone(),
            })
            .collect();
        let data = serde_json::to_vec_pretty(&records)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        backend.write(USERS_KEY, &data)
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
