//! Fine reordering of selected memory items.

use std::collections::HashMap;

use crate::core::memory::MemoryItem;
use crate::core::plan::RerankHints;

/// Score items from hints and stable-sort them descending.
///
/// Without hints the input order is returned unchanged.
pub fn heuristic_rerank(items: Vec<MemoryItem>, hints: Option<&RerankHints>) -> Vec<MemoryItem> {
    let Some(hints) = hints else {
        return items;
    };
    let mut scored: Vec<(f64, MemoryItem)> = items
        .into_iter()
        .map(|item| (score(&item, hints), item))
        .collect();
    scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
    scored.into_iter().map(|(_, item)| item).collect()
}

fn score(item: &MemoryItem, hints: &RerankHints) -> f64 {
    let mut total = 0.0;
    if hints.prefer_recent {
        total += item.created_at();
    }
    if let Some(boosts) = &hints.boost_dimensions {
        for (key, weight) in boosts {
            if item.dimensions.contains_key(key) {
                total += weight;
            }
        }
    }
    total
}

/// Apply an externally supplied id ordering.
///
/// Items named in `ranked_ids` come first in that order; the rest follow in
/// input order. Returns `None` when the ranking names none of the items, so
/// the caller can take the heuristic path instead.
pub fn apply_external_order(
    items: Vec<MemoryItem>,
    ranked_ids: &[String],
) -> Option<Vec<MemoryItem>> {
    let mut rank: HashMap<&str, usize> = HashMap::new();
    for (idx, id) in ranked_ids.iter().enumerate() {
        rank.entry(id.as_str()).or_insert(idx);
    }
    if !items.iter().any(|item| rank.contains_key(item.id.as_str())) {
        return None;
    }
    let (mut ranked, rest): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| rank.contains_key(item.id.as_str()));
    ranked.sort_by_key(|item| rank.get(item.id.as_str()).copied().unwrap_or(usize::MAX));
    ranked.extend(rest);
    Some(ranked)
}
