//! Deterministic selection steps over scanned memory candidates.
//!
//! The order of the steps is part of the contract: similarity reorder, weight
//! sort, recency floor, per-kind cap, global limit. Weighting runs before the
//! hard filters, so it biases order and never inclusion.

use std::collections::{BTreeMap, HashMap};

use crate::core::memory::{MemoryItem, MemoryKind};
use crate::core::plan::SelectorProfile;

/// Put candidates found in `neighbors` first, in neighbor rank order.
///
/// Candidates missing from `neighbors` follow in their original order. An
/// empty neighbor list leaves the candidates untouched.
pub fn reorder_by_similarity(
    candidates: Vec<MemoryItem>,
    neighbors: &[(String, f32)],
) -> Vec<MemoryItem> {
    if neighbors.is_empty() {
        return candidates;
    }
    let mut rank: HashMap<&str, usize> = HashMap::new();
    for (idx, (id, _distance)) in neighbors.iter().enumerate() {
        rank.entry(id.as_str()).or_insert(idx);
    }
    let (mut ranked, rest): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|item| rank.contains_key(item.id.as_str()));
    ranked.sort_by_key(|item| rank.get(item.id.as_str()).copied().unwrap_or(usize::MAX));
    ranked.extend(rest);
    ranked
}

/// Stable sort by `(-weight, -created_at, original_index)`.
///
/// Kinds without a weight count as `0.0`. No-op when `weights` is empty.
pub fn sort_by_weight(
    candidates: Vec<MemoryItem>,
    weights: &BTreeMap<MemoryKind, f64>,
) -> Vec<MemoryItem> {
    if weights.is_empty() {
        return candidates;
    }
    let mut indexed: Vec<(usize, MemoryItem)> = candidates.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        let wa = weights.get(&a.kind).copied().unwrap_or(0.0);
        let wb = weights.get(&b.kind).copied().unwrap_or(0.0);
        wb.total_cmp(&wa)
            .then_with(|| b.created_at().total_cmp(&a.created_at()))
            .then_with(|| ia.cmp(ib))
    });
    indexed.into_iter().map(|(_, item)| item).collect()
}

/// Apply the recency floor, per-kind caps and the global limit in one walk.
pub fn apply_filters(
    candidates: Vec<MemoryItem>,
    profile: &SelectorProfile,
    limit: Option<usize>,
) -> Vec<MemoryItem> {
    let mut kept = Vec::new();
    let mut per_kind: HashMap<MemoryKind, usize> = HashMap::new();
    for item in candidates {
        if limit.is_some_and(|max| kept.len() >= max) {
            break;
        }
        if let Some(window) = profile.recency_window
            && item.created_at() < window as f64
        {
            continue;
        }
        let count = per_kind.entry(item.kind).or_insert(0);
        if profile
            .per_kind_limit
            .get(&item.kind)
            .is_some_and(|cap| *count >= *cap)
        {
            continue;
        }
        *count += 1;
        kept.push(item);
    }
    kept
}

/// Run every step after the scan. `neighbors` is the similarity search result,
/// if one was available.
pub fn select_from(
    candidates: Vec<MemoryItem>,
    profile: &SelectorProfile,
    neighbors: &[(String, f32)],
    limit: Option<usize>,
) -> Vec<MemoryItem> {
    let ordered = reorder_by_similarity(candidates, neighbors);
    let weighted = sort_by_weight(ordered, &profile.weights);
    apply_filters(weighted, profile, limit)
}
