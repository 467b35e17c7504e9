use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::model::{Id, UserContext};

/// Decides whether a caller may read a node
pub trait PermissionChecker: Send + Sync {
    fn can_read(&self, user: &UserContext, node_id: &Id) -> bool;
}

/// Grants read access on everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn can_read(&self, _user: &UserContext, _node_id: &Id) -> bool {
        true
    }
}

/// Read access granted by default and revoked per (user, node).
/// Admins bypass every revocation.
#[derive(Debug, Default)]
pub struct AccessList {
    revoked: RwLock<HashMap<String, HashSet<Id>>>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke_read(&self, user_id: &str, node_id: &Id) {
        self.revoked
            .write()
            .entry(user_id.to_string())
            .or_default()
            .insert(node_id.clone());
    }

    pub fn grant_read(&self, user_id: &str, node_id: &Id) {
        if let Some(nodes) = self.revoked.write().get_mut(user_id) {
            nodes.remove(node_id);
        }
    }
}

impl PermissionChecker for AccessList {
    fn can_read(&self, user: &UserContext, node_id: &Id) -> bool {
        if user.admin {
            return true;
        }
        !self
            .revoked
            .read()
            .get(&user.user_id)
            .map(|nodes| nodes.contains(node_id))
            .unwrap_or(false)
    }
}
