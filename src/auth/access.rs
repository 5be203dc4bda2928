use super::identity::Identity;
use crate::data::StreamPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Class of operation being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Insert,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Insert => write!(f, "insert"),
        }
    }
}

/// Who a single permission is granted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grant {
    /// Admins only
    Nobody,
    /// The owner acting through the stream's own device
    Device,
    /// The owner through any device
    Owner,
    /// The owner and the listed users
    Users(BTreeSet<String>),
    /// Any authenticated caller
    Public,
}

impl Grant {
    pub fn allows(&self, identity: &Identity, path: &StreamPath) -> bool {
        if identity.is_admin() {
            return true;
        }

        let is_owner = identity.name == path.owner;
        match self {
            Grant::Nobody => false,
            Grant::Device => is_owner && identity.device.as_deref() == Some(path.device.as_str()),
            Grant::Owner => is_owner,
            Grant::Users(users) => is_owner || users.contains(&identity.name),
            Grant::Public => true,
        }
    }
}

/// Access-control descriptor attached to every stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDescriptor {
    pub read: Grant,
    pub insert: Grant,
}

impl Default for AccessDescriptor {
    fn default() -> Self {
        Self {
            read: Grant::Owner,
            insert: Grant::Owner,
        }
    }
}

impl AccessDescriptor {
    pub fn new(read: Grant, insert: Grant) -> Self {
        Self { read, insert }
    }


    pub fn permits(&self, identity: &Identity, path: &StreamPath, action: Action) -> bool {
        match action {
            Action::Read => self.read.allows(identity, path),
            Action::Insert => self.insert.allows(identity, path),
        }
    }
}
