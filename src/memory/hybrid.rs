use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::store::{MemoryRecord, MemoryStore};
use crate::config::MemoryConfig;

/// Semantic refinement step over keyword hits. Implementations may fail;
/// the retriever degrades to keyword-only results when they do.
pub trait Reranker: Send + Sync {
    fn rerank(
        &self,
        query: &str,
        candidates: &[MemoryRecord],
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>>;
}

/// Hybrid retrieval: keyword recall, optional semantic rerank, exact-text
/// dedup, bounded output. Every path returns a (possibly empty) vec.
pub struct HybridRetriever {
    store: Arc<MemoryStore>,
    reranker: Option<Arc<dyn Reranker>>,
    max_candidates: usize,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<MemoryStore>,
        reranker: Option<Arc<dyn Reranker>>,
        max_candidates: usize,
    ) -> Self {
        Self {
            store,
            reranker,
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        // Over-fetch so the rerank step has something to reorder.
        let keyword_hits = self.store.search(&query, limit * 2);
        if keyword_hits.is_empty() {
            return Vec::new();
        }

        let candidates = &keyword_hits[..keyword_hits.len().min(self.max_candidates)];
        let reranked = match &self.reranker {
            Some(reranker) => match reranker.rerank(&query, candidates, limit) {
                Ok(hits) => hits,
                Err(e) => {
                    debug!(error = %e, "rerank failed, degrading to keyword results");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for record in keyword_hits.iter().chain(reranked.iter()) {
            if seen.insert(record.text.clone()) {
                merged.push(record.clone());
                if merged.len() >= limit {
                    break;
                }
            }
        }
        merged
    }
}

/// Built-in reranker: token-overlap scoring with a bounded token-set
/// cache. A stand-in for an embedding model that keeps the same shape
/// and the same failure contract.
pub struct LexicalReranker {
    cache: Mutex<HashMap<String, Arc<HashSet<String>>>>,
    cache_cap: usize,
}

impl LexicalReranker {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            cache_cap: config.score_cache.max(1),
        }
    }

    fn tokens(&self, text: &str) -> Arc<HashSet<String>> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(tokens) = cache.get(text) {
            return Arc::clone(tokens);
        }
        let tokens: Arc<HashSet<String>> = Arc::new(
            text.to_lowercase()
                .split_whitespace()
                .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        );
        if cache.len() >= self.cache_cap {
            // Bounded cache: evict an arbitrary entry rather than grow.
            if let Some(key) = cache.keys().next().cloned() {
                cache.remove(&key);
            }
        }
        cache.insert(text.to_string(), Arc::clone(&tokens));
        tokens
    }
}

impl Reranker for LexicalReranker {
    fn rerank(
        &self,
        query: &str,
        candidates: &[MemoryRecord],
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>> {
        let query_tokens = self.tokens(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, &MemoryRecord)> = candidates
            .iter()
            .map(|record| {
                let tokens = self.tokens(&record.text);
                let overlap = tokens.intersection(&query_tokens).count() as f64;
                let union = tokens.union(&query_tokens).count().max(1) as f64;
                (overlap / union, record)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
