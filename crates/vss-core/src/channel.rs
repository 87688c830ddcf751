//! Per-connection channel state.
//!
//! A `Channel` is owned by the transport for the lifetime of one WebSocket
//! connection and mutated only from that connection's handling task. The
//! subscription worker never touches it; `conn_id` is captured by value when
//! a subscription is created.

use std::collections::HashMap;

/// Read/write capability for one concrete leaf path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
}

impl Permission {
    /// Parse the claim notation: "r", "w" or "rw".
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "r" => Some(Self {
                read: true,
                write: false,
            }),
            "w" => Some(Self {
                read: false,
                write: true,
            }),
            "rw" => Some(Self {
                read: true,
                write: true,
            }),
            _ => None,
        }
    }

    /// Combine grants from overlapping claim patterns.
    pub fn merge(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }
}

/// Per-connection state: identity, authorization and resolved permissions.
#[derive(Debug, Clone)]
pub struct Channel {
    conn_id: u32,
    authorized: bool,
    token_expiry: i64,
    permissions: HashMap<String, Permission>,
    modify_tree: bool,
}

impl Channel {
    pub fn new(conn_id: u32) -> Self {
        Self {
            conn_id,
            authorized: false,
            token_expiry: 0,
            permissions: HashMap::new(),
            modify_tree: false,
        }
    }

    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Unix-seconds expiry of the installed token; 0 when unauthorized.
    pub fn token_expiry(&self) -> i64 {
        self.token_expiry
    }

    pub fn can_modify_tree(&self) -> bool {
        self.modify_tree
    }

    /// Install the outcome of a successful token validation. `permissions`
    /// maps canonical leaf paths to their grants, pre-expanded against the
    /// tree so the checks below are plain lookups.
    pub fn authorize(
        &mut self,
        token_expiry: i64,
        permissions: HashMap<String, Permission>,
        modify_tree: bool,
    ) {
        self.authorized = true;
        self.token_expiry = token_expiry;
        self.permissions = permissions;
        self.modify_tree = modify_tree;
    }

    /// Drop every granted capability (token expired or explicitly reset).
    pub fn deauthorize(&mut self) {
        self.authorized = false;
        self.token_expiry = 0;
        self.permissions.clear();
        self.modify_tree = false;
    }

    pub fn can_read(&self, path: &str) -> bool {
        self.authorized && self.permissions.get(path).is_some_and(|p| p.read)
    }

    pub fn can_write(&self, path: &str) -> bool {
        self.authorized && self.permissions.get(path).is_some_and(|p| p.write)
    }
}
