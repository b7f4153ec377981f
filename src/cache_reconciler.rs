//! Decides how a freshly fetched paywall replaces or updates the cached one.
use std::collections::{HashMap, HashSet};

use crate::PaywallDefinition;

/// A paywall as held by the cache store. Two instances are compared only by `cache_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPaywall {
    pub identifier: String,
    pub cache_key: String,
    /// Opaque content. The core never inspects it.
    pub content: serde_json::Value,
}

/// Action to apply to the cache entry and its rendered paywall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// (Re)load the paywall content into its rendering surface.
    LoadContent,
    /// Make the presenting caller the paywall's delegate.
    AttachPresentationDelegate,
    /// Store the new paywall in place of the cached one.
    ReplaceCachedEntry,
    /// Apply updated fields onto the cached instance without reloading.
    UpdateExistingEntry,
}

/// Reconcile `new` against the cached `old` paywall.
///
/// Outside of a presentation flow nothing is touched. Changed content replaces the entry and is
/// reloaded, taking over the delegate unless this is a preload. Unchanged content is updated in
/// place when presenting and left alone when preloading.
pub fn reconcile(
    new: &CachedPaywall,
    old: &CachedPaywall,
    is_preloading: bool,
    is_for_presentation: bool,
) -> Vec<CacheAction> {
    if !is_for_presentation {
        return Vec::new();
    }

    if new.cache_key != old.cache_key {
        let mut actions = vec![CacheAction::ReplaceCachedEntry, CacheAction::LoadContent];
        if !is_preloading {
            actions.push(CacheAction::AttachPresentationDelegate);
        }
        actions
    } else if !is_preloading {
        vec![
            CacheAction::AttachPresentationDelegate,
            CacheAction::UpdateExistingEntry,
        ]
    } else {
        Vec::new()
    }
}

/// Like [`reconcile`], but also handles an empty cache slot.
///
/// A paywall that is not cached yet is always stored and loaded (this is what preloading is for);
/// it gets the presentation delegate only when presented for real.
pub fn reconcile_with_cached(
    new: &CachedPaywall,
    old: Option<&CachedPaywall>,
    is_preloading: bool,
    is_for_presentation: bool,
) -> Vec<CacheAction> {
    match old {
        Some(old) => reconcile(new, old, is_preloading, is_for_presentation),
        None => {
            let mut actions = vec![CacheAction::ReplaceCachedEntry, CacheAction::LoadContent];
            if is_for_presentation && !is_preloading {
                actions.push(CacheAction::AttachPresentationDelegate);
            }
            actions
        }
    }
}

/// Identifiers of paywalls that were removed from configuration or whose content changed.
///
/// Cached entries for these identifiers are stale after a configuration refresh.
pub fn removed_or_changed_paywall_ids(
    old_paywalls: &[PaywallDefinition],
    new_paywalls: &[PaywallDefinition],
) -> HashSet<String> {
    let old_cache_keys: HashMap<&str, &str> = old_paywalls
        .iter()
        .map(|p| (p.identifier.as_str(), p.cache_key.as_str()))
        .collect();
    let new_ids: HashSet<&str> = new_paywalls.iter().map(|p| p.identifier.as_str()).collect();

    let removed = old_cache_keys
        .keys()
        .filter(|id| !new_ids.contains(*id))
        .map(|id| id.to_string());
    let changed = new_paywalls
        .iter()
        .filter(|p| {
            old_cache_keys
                .get(p.identifier.as_str())
                .is_some_and(|old_key| *old_key != p.cache_key)
        })
        .map(|p| p.identifier.clone());

    removed.chain(changed).collect()
}
