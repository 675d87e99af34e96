//! Identity provider, consulted once per join to resolve display names.

use crate::model::Identity;
use crate::store::BoxFuture;
use std::collections::HashMap;
use std::sync::RwLock;

/// Name shown for identities the provider does not know.
pub const ANONYMOUS: &str = "Anonymous";

/// Resolves identities to display names.
pub trait IdentityProvider: Send + Sync {
    /// The display name for `identity`, if known.
    fn display_name(&self, identity: &Identity) -> BoxFuture<'_, Option<String>>;
}

/// Identity provider backed by an in-memory map.
#[derive(Default)]
pub struct MemoryIdentities {
    names: RwLock<HashMap<Identity, String>>,
}

impl MemoryIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or rename an identity. Blank names are ignored.
    pub fn register(&self, identity: Identity, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if let Ok(mut names) = self.names.write() {
            names.insert(identity, name.to_string());
        }
    }
}

impl IdentityProvider for MemoryIdentities {
    fn display_name(&self, identity: &Identity) -> BoxFuture<'_, Option<String>> {
        let name = self
            .names
            .read()
            .ok()
            .and_then(|names| names.get(identity).cloned());
        Box::pin(async move { name })
    }
}
