//! Handler registry: three ordered, hash-keyed handler maps.
//!
//! Each tier behaves as an insertion-ordered map keyed by handler hash:
//!
//! - a **new** hash lands where the [`InsertOp`] says
//! - an **existing** hash is replaced in place and keeps its position,
//!   whatever operation was used
//!
//! Every registration hands back an [`UnregisterToken`] bound to the
//! `(tier, hash)` slot, not to the handler instance it registered.
//!
//! # Example
//!
//! ```
//! use trigger_pipeline::{ControlSignal, Handler, Registry, Tier};
//!
//! let registry = Registry::new();
//! let tokens = registry.push([
//!     Handler::new("a", |_ctx| async { Ok(ControlSignal::Continue) }),
//!     Handler::new("b", |_ctx| async { Ok(ControlSignal::Continue) }),
//! ]);
//!
//! // Re-registering "a" at the front keeps its original position.
//! registry.unshift([Handler::new("a", |_ctx| async { Ok(ControlSignal::Stop) })]);
//! assert_eq!(registry.hashes(Tier::Regular), vec!["a", "b"]);
//!
//! assert!(tokens[0].unregister());
//! assert!(!tokens[0].unregister());
//! assert_eq!(registry.hashes(Tier::Regular), vec!["b"]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::{Handler, Tier};

/// Where a newly seen hash is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOp {
    /// After every existing handler.
    Append,
    /// Before every existing handler.
    Prepend,
    /// At the given index, clamped to the current length.
    InsertAt(usize),
}

/// One tier: order of hashes plus the current occupant of each hash.
#[derive(Default)]
struct OrderedTier {
    order: Vec<Arc<str>>,
    entries: HashMap<Arc<str>, Arc<Handler>>,
}

impl OrderedTier {
    fn upsert(&mut self, op: InsertOp, handler: Handler) {
        if let Some(slot) = self.entries.get_mut(handler.hash()) {
            *slot = Arc::new(handler);
            return;
        }

        let key: Arc<str> = Arc::from(handler.hash());
        let index = match op {
            InsertOp::Append => self.order.len(),
            InsertOp::Prepend => 0,
            InsertOp::InsertAt(i) => i.min(self.order.len()),
        };
        self.order.insert(index, key.clone());
        self.entries.insert(key, Arc::new(handler));
    }

    fn remove(&mut self, hash: &str) -> bool {
        if self.entries.remove(hash).is_none() {
            return false;
        }
        // Linear in the tier length; tiers hold a handful of handlers.
        if let Some(index) = self.order.iter().position(|key| key.as_ref() == hash) {
            self.order.remove(index);
        }
        true
    }

    fn ordered(&self) -> Vec<Arc<Handler>> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }
}

#[derive(Default)]
struct Tiers {
    regular: OrderedTier,
    wildcard: OrderedTier,
    fallback: OrderedTier,
}

impl Tiers {
    fn get(&self, tier: Tier) -> &OrderedTier {
        match tier {
            Tier::Regular => &self.regular,
            Tier::Wildcard => &self.wildcard,
            Tier::ErrorFallback => &self.fallback,
        }
    }

    fn get_mut(&mut self, tier: Tier) -> &mut OrderedTier {
        match tier {
            Tier::Regular => &mut self.regular,
            Tier::Wildcard => &mut self.wildcard,
            Tier::ErrorFallback => &mut self.fallback,
        }
    }
}

fn lock(tiers: &Mutex<Tiers>) -> MutexGuard<'_, Tiers> {
    tiers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Capability to remove whatever handler occupies a `(tier, hash)` slot.
///
/// Clones share one "spent" flag: the first `unregister` through any of them
/// acts, later ones are no-ops. Tokens issued by other registrations of the
/// same hash are independent.
#[derive(Debug, Clone)]
pub struct UnregisterToken {
    tier: Tier,
    hash: Arc<str>,
    registry: Weak<Mutex<Tiers>>,
    spent: Arc<AtomicBool>,
}

impl UnregisterToken {
    /// Remove the current occupant of this token's slot.
    ///
    /// Returns `true` if a handler was removed.
    pub fn unregister(&self) -> bool {
        if self.spent.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.registry.upgrade() {
            Some(tiers) => lock(&tiers).get_mut(self.tier).remove(&self.hash),
            None => false,
        }
    }

    /// Hash this token is bound to.
    #[inline]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Tier this token is bound to.
    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Whether `unregister` has already been called on this token.
    pub fn is_spent(&self) -> bool {
        self.spent.load(Ordering::Acquire)
    }
}

/// Read-only ordered view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Regular tier, in order.
    pub regular: Vec<Arc<Handler>>,
    /// Wildcard tier, in order.
    pub wildcard: Vec<Arc<Handler>>,
    /// Error-fallback tier, in registration order.
    pub fallback: Vec<Arc<Handler>>,
}

impl Snapshot {
    /// Handlers of one tier.
    pub fn tier(&self, tier: Tier) -> &[Arc<Handler>] {
        match tier {
            Tier::Regular => &self.regular,
            Tier::Wildcard => &self.wildcard,
            Tier::ErrorFallback => &self.fallback,
        }
    }
}

/// Registry holding the three handler tiers.
///
/// `Registry` is a cheap handle: clones share the same handlers.
#[derive(Clone, Default)]
pub struct Registry {
    tiers: Arc<Mutex<Tiers>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&self, tier: Tier, hash: &str) -> UnregisterToken {
        UnregisterToken {
            tier,
            hash: Arc::from(hash),
            registry: Arc::downgrade(&self.tiers),
            spent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a handler into `tier`.
    ///
    /// A hash already present in `tier` is replaced in place; `op` only
    /// applies to hashes the tier has not seen.
    pub fn register(&self, op: InsertOp, tier: Tier, handler: Handler) -> UnregisterToken {
        let handler = handler.tier(tier);
        let token = self.token(tier, handler.hash());
        lock(&self.tiers).get_mut(tier).upsert(op, handler);
        token
    }

    /// Append handlers, each into its own declared tier.
    pub fn push(&self, handlers: impl IntoIterator<Item = Handler>) -> Vec<UnregisterToken> {
        let mut tiers = lock(&self.tiers);
        handlers
            .into_iter()
            .map(|handler| {
                let tier = handler.declared_tier();
                let token = self.token(tier, handler.hash());
                tiers.get_mut(tier).upsert(InsertOp::Append, handler);
                token
            })
            .collect()
    }

    /// Prepend handlers, each into its own declared tier.
    ///
    /// The handlers keep their argument order: the first one ends up first.
    pub fn unshift(&self, handlers: impl IntoIterator<Item = Handler>) -> Vec<UnregisterToken> {
        let handlers: Vec<Handler> = handlers.into_iter().collect();
        let tokens = handlers
            .iter()
            .map(|handler| self.token(handler.declared_tier(), handler.hash()))
            .collect();

        let mut tiers = lock(&self.tiers);
        for handler in handlers.into_iter().rev() {
            let tier = handler.declared_tier();
            tiers.get_mut(tier).upsert(InsertOp::Prepend, handler);
        }
        tokens
    }

    /// Remove the occupant of the token's slot. Same as [`UnregisterToken::unregister`].
    ///
    /// A token issued by another registry is left untouched and `false` is
    /// returned.
    pub fn unregister(&self, token: &UnregisterToken) -> bool {
        if !Weak::ptr_eq(&token.registry, &Arc::downgrade(&self.tiers)) {
            return false;
        }
        token.unregister()
    }

    /// Copy the current ordered handler lists.
    pub fn snapshot(&self) -> Snapshot {
        let tiers = lock(&self.tiers);
        Snapshot {
            regular: tiers.regular.ordered(),
            wildcard: tiers.wildcard.ordered(),
            fallback: tiers.fallback.ordered(),
        }
    }

    /// Number of handlers in a tier.
    pub fn len(&self, tier: Tier) -> usize {
        lock(&self.tiers).get(tier).order.len()
    }

    /// True if no tier holds any handler.
    pub fn is_empty(&self) -> bool {
        let tiers = lock(&self.tiers);
        tiers.regular.order.is_empty()
            && tiers.wildcard.order.is_empty()
            && tiers.fallback.order.is_empty()
    }

    /// Whether `tier` holds a handler under `hash`.
    pub fn contains(&self, tier: Tier, hash: &str) -> bool {
        lock(&self.tiers).get(tier).entries.contains_key(hash)
    }

    /// Hashes of a tier, in order.
    pub fn hashes(&self, tier: Tier) -> Vec<String> {
        lock(&self.tiers)
            .get(tier)
            .order
            .iter()
            .map(|key| key.to_string())
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("regular", &self.hashes(Tier::Regular))
            .field("wildcard", &self.hashes(Tier::Wildcard))
            .field("fallback", &self.hashes(Tier::ErrorFallback))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Context, ControlSignal};

    fn handler(hash: &str) -> Handler {
        Handler::new(hash, |_ctx| async { Ok(ControlSignal::Continue) })
    }

    fn stopping(hash: &str) -> Handler {
        Handler::new(hash, |_ctx| async { Ok(ControlSignal::Stop) })
    }

    #[test]
    fn test_append_and_prepend() {
        let registry = Registry::new();
        registry.register(InsertOp::Append, Tier::Regular, handler("b"));
        registry.register(InsertOp::Append, Tier::Regular, handler("c"));
        registry.register(InsertOp::Prepend, Tier::Regular, handler("a"));

        assert_eq!(registry.hashes(Tier::Regular), vec!["a", "b", "c"]);
        assert_eq!(registry.len(Tier::Regular), 3);
    }

    #[test]
    fn test_insert_at_clamps() {
        let registry = Registry::new();
        registry.push([handler("a"), handler("c")]);
        registry.register(InsertOp::InsertAt(1), Tier::Regular, handler("b"));
        registry.register(InsertOp::InsertAt(99), Tier::Regular, handler("z"));

        assert_eq!(registry.hashes(Tier::Regular), vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn test_upsert_keeps_first_position() {
        let registry = Registry::new();
        registry.push([handler("a"), handler("b")]);
        registry.register(InsertOp::Prepend, Tier::Regular, handler("b"));
        registry.push([handler("c")]);
        registry.register(InsertOp::InsertAt(0), Tier::Regular, handler("c"));
        registry.push([handler("a")]);

        assert_eq!(registry.hashes(Tier::Regular), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_definition() {
        let registry = Registry::new();
        registry.push([handler("a")]);
        registry.push([stopping("a")]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.regular.len(), 1);
        let signal = snapshot.regular[0]
            .call_handle(Context::detached())
            .await
            .unwrap();
        assert_eq!(signal, ControlSignal::Stop);
    }

    #[test]
    fn test_unshift_keeps_argument_order() {
        let registry = Registry::new();
        registry.push([handler("x")]);
        let tokens = registry.unshift([handler("a"), handler("b")]);

        assert_eq!(registry.hashes(Tier::Regular), vec!["a", "b", "x"]);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].hash(), "a");
        assert_eq!(tokens[1].hash(), "b");
    }

    #[test]
    fn test_push_uses_declared_tier() {
        let registry = Registry::new();
        registry.push([
            handler("r"),
            handler("w").tier(Tier::Wildcard),
            handler("e").tier(Tier::ErrorFallback),
        ]);

        assert!(registry.contains(Tier::Regular, "r"));
        assert!(registry.contains(Tier::Wildcard, "w"));
        assert!(registry.contains(Tier::ErrorFallback, "e"));
        assert!(!registry.contains(Tier::Regular, "w"));
    }

    #[test]
    fn test_register_overrides_declared_tier() {
        let registry = Registry::new();
        let token = registry.register(InsertOp::Append, Tier::Wildcard, handler("h"));

        assert_eq!(token.tier(), Tier::Wildcard);
        assert!(registry.contains(Tier::Wildcard, "h"));
        assert_eq!(
            registry.snapshot().wildcard[0].declared_tier(),
            Tier::Wildcard
        );
    }

    #[test]
    fn test_tiers_are_independent() {
        let registry = Registry::new();
        registry.register(InsertOp::Append, Tier::Regular, handler("same"));
        let wildcard = registry.register(InsertOp::Append, Tier::Wildcard, handler("same"));

        assert!(wildcard.unregister());
        assert!(registry.contains(Tier::Regular, "same"));
        assert!(!registry.contains(Tier::Wildcard, "same"));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        let tokens = registry.push([handler("a"), handler("b")]);

        assert!(registry.unregister(&tokens[0]));
        assert!(tokens[0].is_spent());
        assert!(!registry.unregister(&tokens[0]));
        assert!(!tokens[0].clone().unregister());
        assert_eq!(registry.hashes(Tier::Regular), vec!["b"]);
    }

    #[test]
    fn test_stale_token_removes_current_occupant() {
        let registry = Registry::new();
        let first = registry.push([handler("a")]).remove(0);
        let second = registry.push([stopping("a")]).remove(0);
        registry.push([handler("b")]);

        // The first token removes whatever now lives under "a".
        assert!(first.unregister());
        assert_eq!(registry.hashes(Tier::Regular), vec!["b"]);

        // The slot is empty, so the second token has nothing to remove.
        assert!(!second.unregister());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_changes() {
        let registry = Registry::new();
        let tokens = registry.push([handler("a"), handler("b")]);
        let snapshot = registry.snapshot();

        tokens[0].unregister();
        registry.push([handler("c")]);

        let hashes: Vec<&str> = snapshot.regular.iter().map(|h| h.hash()).collect();
        assert_eq!(hashes, vec!["a", "b"]);
        assert_eq!(registry.hashes(Tier::Regular), vec!["b", "c"]);
    }

    #[test]
    fn test_foreign_token_is_rejected() {
        let owner = Registry::new();
        let other = Registry::new();
        other.push([handler("a")]);
        let token = owner.push([handler("a")]).remove(0);

        assert!(!other.unregister(&token));
        assert!(!token.is_spent());
        assert!(other.contains(Tier::Regular, "a"));
        assert!(owner.contains(Tier::Regular, "a"));

        assert!(owner.unregister(&token));
        assert!(!owner.contains(Tier::Regular, "a"));
    }

    #[test]
    fn test_token_outliving_registry() {
        let registry = Registry::new();
        let token = registry.push([handler("a")]).remove(0);
        drop(registry);

        assert!(!token.unregister());
    }

    #[test]
    fn test_clones_share_handlers() {
        let registry = Registry::new();
        let clone = registry.clone();
        clone.push([handler("a")]);

        assert!(!registry.is_empty());
        assert_eq!(registry.snapshot().tier(Tier::Regular).len(), 1);
        assert!(registry.snapshot().tier(Tier::Wildcard).is_empty());
    }
}
