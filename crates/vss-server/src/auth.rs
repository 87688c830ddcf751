//! Token validation and permission installation.
//!
//! Clients present a signed JWT via the `authorize` action. On success the
//! token's path-pattern claims are expanded against the signal tree and the
//! resulting grants are installed into the channel, so every later access
//! check is a plain set-membership lookup. A failed validation never touches
//! the channel.

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;
use vss_core::{Channel, Path, Permission, SignalTree};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("verification key rejected: {0}")]
    BadKey(String),
}

/// JWT claims understood by the server.
#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
    #[serde(default)]
    sub: Option<String>,
    /// Path patterns mapped to "r" | "w" | "rw".
    #[serde(rename = "kuksa-vss", default)]
    permissions: HashMap<String, String>,
    #[serde(rename = "modifyTree", default)]
    modify_tree: bool,
}

/// Verifies capability tokens and answers expiry queries.
pub struct Authenticator {
    algorithm: Algorithm,
    default_key: DecodingKey,
    /// Key installed by `kuksa-authorize`; cleared by plain `authorize`.
    override_key: RwLock<Option<DecodingKey>>,
}

impl Authenticator {
    pub fn new(algorithm: Algorithm, default_key: DecodingKey) -> Self {
        Self {
            algorithm,
            default_key,
            override_key: RwLock::new(None),
        }
    }

    /// RS256 verification with a PEM public key, the default deployment.
    pub fn rs256_from_pem(pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| AuthError::BadKey(e.to_string()))?;
        Ok(Self::new(Algorithm::RS256, key))
    }

    /// HS256 verification with a shared secret, for tests and development.
    pub fn hs256_from_secret(secret: &[u8]) -> Self {
        Self::new(Algorithm::HS256, DecodingKey::from_secret(secret))
    }

    /// Replace the verification key used by subsequent validations. An empty
    /// key restores the key configured at startup.
    pub fn update_pub_key(&self, key: &str) -> Result<(), AuthError> {
        let parsed = if key.is_empty() {
            None
        } else {
            Some(match self.algorithm {
                Algorithm::HS256 => DecodingKey::from_secret(key.as_bytes()),
                _ => DecodingKey::from_rsa_pem(key.as_bytes())
                    .map_err(|e| AuthError::BadKey(e.to_string()))?,
            })
        };
        let mut guard = self
            .override_key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = parsed;
        Ok(())
    }

    /// Verify a token and install its grants into the channel. The channel is
    /// left untouched on any failure. Returns the seconds until expiry.
    pub fn validate(
        &self,
        channel: &mut Channel,
        tree: &SignalTree,
        token: &str,
    ) -> Result<i64, AuthError> {
        let key = {
            let guard = self
                .override_key
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.clone().unwrap_or_else(|| self.default_key.clone())
        };
        let validation = Validation::new(self.algorithm);
        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        let claims = data.claims;

        let ttl = claims.exp - Utc::now().timestamp();
        if ttl <= 0 {
            return Err(AuthError::Invalid("token already expired".to_string()));
        }

        let permissions = resolve_permissions(tree, &claims.permissions);
        debug!(
            subject = claims.sub.as_deref().unwrap_or("-"),
            paths = permissions.len(),
            modify_tree = claims.modify_tree,
            "token accepted"
        );
        channel.authorize(claims.exp, permissions, claims.modify_tree);
        Ok(ttl)
    }

    /// True while the channel's cached token expiry lies in the future.
    pub fn is_still_valid(&self, channel: &Channel) -> bool {
        channel.is_authorized() && channel.token_expiry() > Utc::now().timestamp()
    }
}

/// Expand claim path patterns against the tree so later checks are O(1).
/// Unknown modes and unparsable patterns are skipped, not fatal.
fn resolve_permissions(
    tree: &SignalTree,
    claims: &HashMap<String, String>,
) -> HashMap<String, Permission> {
    let mut resolved = HashMap::new();
    for (pattern, mode) in claims {
        let Some(permission) = Permission::parse(mode) else {
            debug!(%pattern, %mode, "skipping claim with unknown mode");
            continue;
        };
        let Ok(path) = Path::parse(pattern) else {
            debug!(%pattern, "skipping unparsable claim pattern");
            continue;
        };
        for leaf in tree.get_leaf_paths(&path) {
            let entry = resolved
                .entry(leaf.as_str().to_string())
                .or_insert_with(Permission::default);
            *entry = entry.merge(permission);
        }
    }
    resolved
}
