//! Process-wide copy of the access token for synchronous request paths.

use std::sync::{Arc, PoisonError, RwLock};

/// Single slot holding the current access token.
///
/// Readers never block on the store. The reconciler repairs it whenever it
/// drifts from the cookie.
#[derive(Clone, Default)]
pub struct TokenCache {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the token. Empty values clear the slot.
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let mut slot = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *slot = if token.is_empty() { None } else { Some(token) };
    }

    /// Clear the slot.
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("present", &self.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_slot() {
        let cache = TokenCache::new();
        let other = cache.clone();
        cache.set("tok-1234567890");
        assert_eq!(other.get().as_deref(), Some("tok-1234567890"));
        other.set("");
        assert!(cache.get().is_none());
    }
}
