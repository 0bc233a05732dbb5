//! Memory retrieval over the stores: selection, reranking and focus.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::focus::derive_focus;
use crate::core::memory::MemoryItem;
use crate::core::plan::{FocusSpec, RerankHints, SelectorProfile};
use crate::core::reranker::{apply_external_order, heuristic_rerank};
use crate::core::selector::select_from;
use crate::core::types::{FallbackReason, JsonMap, Sourced};
use crate::core::views::FocusView;
use crate::io::capability::{RankingOracle, SimilarityIndex};
use crate::io::store::MemoryStore;

/// Scans the memory table and applies the selection steps in order.
pub struct MemorySelector<'a> {
    store: &'a dyn MemoryStore,
    index: &'a dyn SimilarityIndex,
    scan_limit: usize,
}

impl<'a> MemorySelector<'a> {
    pub fn new(store: &'a dyn MemoryStore, index: &'a dyn SimilarityIndex, scan_limit: usize) -> Self {
        Self {
            store,
            index,
            scan_limit,
        }
    }

    /// Select memory for `profile`.
    ///
    /// The scan is bounded by the configured scan limit, never by `limit`, so
    /// weighting sees the whole candidate set. A failing similarity index
    /// leaves the scan order unchanged.
    #[instrument(skip_all, fields(limit = ?limit, has_query = query.is_some()))]
    pub fn select(
        &self,
        profile: &SelectorProfile,
        filters: Option<&JsonMap>,
        query: Option<&[f32]>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>> {
        let empty = JsonMap::new();
        let candidates = self
            .store
            .query_by_dimensions(filters.unwrap_or(&empty), self.scan_limit)
            .context("scan memory candidates")?;

        let neighbors = match query {
            Some(query) if !candidates.is_empty() => {
                match self.index.search(query, candidates.len()) {
                    Ok(neighbors) => neighbors,
                    Err(err) => {
                        warn!(err = %format!("{err:#}"), "similarity search failed, keeping scan order");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let selected = select_from(candidates, profile, &neighbors, limit);
        debug!(
            selected = selected.len(),
            neighbors = neighbors.len(),
            "memory selected"
        );
        Ok(selected)
    }
}

/// Orders selected memory, asking the ranking oracle first when worthwhile.
pub struct MemoryReranker<'a> {
    oracle: &'a dyn RankingOracle,
    min_external_items: usize,
}

impl<'a> MemoryReranker<'a> {
    pub fn new(oracle: &'a dyn RankingOracle, min_external_items: usize) -> Self {
        Self {
            oracle,
            min_external_items,
        }
    }

    /// Rerank `items`. Never fails: every oracle problem takes the heuristic
    /// path, and the returned origin says which path produced the order.
    #[instrument(skip_all, fields(items = items.len()))]
    pub fn rerank(
        &self,
        items: Vec<MemoryItem>,
        hints: Option<&RerankHints>,
    ) -> Sourced<Vec<MemoryItem>> {
        if items.len() < self.min_external_items {
            return Sourced::fallback(heuristic_rerank(items, hints), FallbackReason::Skipped);
        }
        let request: Vec<Value> = items
            .iter()
            .map(|item| json!({"id": item.id, "kind": item.kind, "snippet": item.snippet}))
            .collect();
        let reason = match self.oracle.rank(&request) {
            Ok(Some(ranked_ids)) => match apply_external_order(items.clone(), &ranked_ids) {
                Some(ordered) => {
                    debug!(ranked = ranked_ids.len(), "external ranking applied");
                    return Sourced::external(ordered);
                }
                None => {
                    warn!(ranked = ranked_ids.len(), "external ranking named no known items");
                    FallbackReason::Invalid
                }
            },
            Ok(None) => FallbackReason::NoAnswer,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "external ranking failed");
                FallbackReason::Failed
            }
        };
        Sourced::fallback(heuristic_rerank(items, hints), reason)
    }
}

/// Selection, then reranking, then focus derivation.
pub struct FocusViewBuilder<'a> {
    selector: &'a MemorySelector<'a>,
    reranker: &'a MemoryReranker<'a>,
}

impl<'a> FocusViewBuilder<'a> {
    pub fn new(selector: &'a MemorySelector<'a>, reranker: &'a MemoryReranker<'a>) -> Self {
        Self { selector, reranker }
    }

    #[instrument(skip_all, fields(task_type = %spec.task_type))]
    pub fn build(
        &self,
        spec: &FocusSpec,
        profile: &SelectorProfile,
        hints: Option<&RerankHints>,
        filters: Option<&JsonMap>,
    ) -> Result<FocusView> {
        let selected = self.selector.select(profile, filters, None, None)?;
        let ranked = self.reranker.rerank(selected, hints);
        let focus = derive_focus(&ranked.value, spec);
        debug!(
            files = focus.files.len(),
            modules = focus.modules.len(),
            tests = focus.tests.len(),
            "focus derived"
        );
        Ok(focus)
    }
}
