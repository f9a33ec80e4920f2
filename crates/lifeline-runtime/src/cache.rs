//! Response cache for degraded-service fallbacks.
//!
//! Responses are keyed by prompt fingerprint and looked up with four
//! strategies of decreasing confidence:
//!
//! | Strategy  | Match                                   | Confidence            |
//! |-----------|-----------------------------------------|-----------------------|
//! | exact     | same fingerprint                        | stored                |
//! | semantic  | best token Jaccard above threshold      | stored × score        |
//! | partial   | cached prompt contains the prompt prefix | stored × 0.7         |
//! | template  | shares the prompt's template tag        | stored × 0.5          |
//!
//! A miss is `Ok(None)`, never an error.

use lifeline_core::similarity::{jaccard_sets, token_set};
use lifeline_core::{fingerprint, CachedResponse, TemplateTag};
use moka::future::Cache;
use std::path::PathBuf;

use crate::config::CacheConfig;
use crate::storage::{RecordStore, StoreError};

/// Durable prompt → response cache.
pub struct ResponseCache {
    store: RecordStore<CachedResponse>,
    /// Hot layer in front of exact lookups
    hot: Cache<String, CachedResponse>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Open the cache described by `config`; memory-only when no path is set.
    pub async fn open(config: CacheConfig) -> Result<Self, StoreError> {
        let store = match &config.path {
            Some(path) => RecordStore::open(path.clone()).await?,
            None => RecordStore::in_memory(),
        };
        Ok(Self::with_store(store, config))
    }

    pub fn in_memory(config: CacheConfig) -> Self {
        Self::with_store(RecordStore::in_memory(), config)
    }

    fn with_store(store: RecordStore<CachedResponse>, config: CacheConfig) -> Self {
        let hot = Cache::builder()
            .max_capacity(config.hot_capacity)
            .time_to_live(config.hot_ttl)
            .build();
        Self { store, hot, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.store.path().map(|p| p.to_path_buf())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Every cached entry, in fingerprint order.
    pub fn entries(&self) -> Vec<CachedResponse> {
        self.store.values()
    }

    /// Insert or replace the response for `prompt`. Returns the fingerprint.
    ///
    /// Re-caching a prompt resets its feedback counters and confidence.
    pub async fn put(
        &self,
        prompt: &str,
        response: &str,
        source: &str,
        tags: impl IntoIterator<Item = String>,
    ) -> Result<String, StoreError> {
        let entry = CachedResponse::new(prompt, response, source, tags);
        let hash = entry.prompt_hash.clone();

        self.store.upsert(hash.clone(), entry).await?;
        self.hot.invalidate(&hash).await;

        tracing::debug!(prompt_hash = %hash, source, "Cached response");
        Ok(hash)
    }

    /// Entry with the same fingerprint as `prompt`.
    pub async fn get_exact(&self, prompt: &str) -> Result<Option<CachedResponse>, StoreError> {
        let hash = fingerprint(prompt);

        let entry = match self.hot.get(&hash).await {
            Some(entry) => Some(entry),
            None => {
                let entry = self.store.get(&hash);
                if let Some(entry) = &entry {
                    self.remember(hash, entry).await;
                }
                entry
            }
        };

        Ok(entry.map(|e| self.with_effective_confidence(e, 1.0)))
    }

    /// Fill the hot layer with an entry read from the store.
    ///
    /// A writer may replace the record between the read and the insert. Its
    /// invalidation then lands before our insert, so the store is read again
    /// and the hot copy dropped if it no longer matches.
    async fn remember(&self, hash: String, entry: &CachedResponse) {
        self.hot.insert(hash.clone(), entry.clone()).await;
        if self.store.get(&hash).as_ref() != Some(entry) {
            self.hot.invalidate(&hash).await;
        }
    }

    /// Entry whose prompt has the highest token Jaccard score, if above threshold.
    pub async fn get_semantic(&self, prompt: &str) -> Result<Option<CachedResponse>, StoreError> {
        let wanted = token_set(prompt);

        let best = self
            .store
            .values()
            .into_iter()
            .map(|entry| {
                let score = jaccard_sets(&wanted, &token_set(&entry.original_prompt));
                (score, entry)
            })
            .filter(|(score, _)| *score > self.config.semantic_threshold)
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        Ok(best.map(|(score, entry)| {
            tracing::debug!(prompt_hash = %entry.prompt_hash, score, "Semantic cache match");
            self.with_effective_confidence(entry, score)
        }))
    }

    /// First entry whose prompt contains the leading characters of `prompt`.
    pub async fn get_partial(&self, prompt: &str) -> Result<Option<CachedResponse>, StoreError> {
        let needle: String = prompt
            .trim()
            .chars()
            .take(self.config.partial_prefix_chars)
            .collect::<String>()
            .to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let found = self
            .store
            .values()
            .into_iter()
            .find(|entry| entry.original_prompt.to_lowercase().contains(&needle));

        Ok(found.map(|e| self.with_effective_confidence(e, self.config.partial_penalty)))
    }

    /// First entry tagged with a template category of `prompt`.
    ///
    /// Categories are tried in marker order; a category with no tagged entry
    /// moves on to the next one the prompt matches.
    pub async fn get_template(&self, prompt: &str) -> Result<Option<CachedResponse>, StoreError> {
        let tags = TemplateTag::detect_all(prompt);
        if tags.is_empty() {
            return Ok(None);
        }

        let entries = self.store.values();
        let found = tags.iter().find_map(|tag| {
            entries
                .iter()
                .find(|entry| entry.has_tag(tag.as_str()))
                .cloned()
        });

        Ok(found.map(|e| self.with_effective_confidence(e, self.config.template_penalty)))
    }

    /// Record caller feedback for a cached entry. Returns false when absent.
    ///
    /// Under [`ConfidencePolicy::Static`](crate::config::ConfidencePolicy::Static)
    /// the counters are informational only.
    pub async fn update_stats(&self, prompt_hash: &str, success: bool) -> Result<bool, StoreError> {
        let updated = self
            .store
            .update(prompt_hash, |entry| {
                if success {
                    entry.success_count += 1;
                } else {
                    entry.failure_count += 1;
                }
            })
            .await?;

        if updated {
            self.hot.invalidate(prompt_hash).await;
        }
        Ok(updated)
    }

    fn with_effective_confidence(&self, entry: CachedResponse, factor: f64) -> CachedResponse {
        let base = self.config.confidence_policy.effective(
            entry.confidence_score,
            entry.success_count,
            entry.failure_count,
        );
        CachedResponse {
            confidence_score: base * factor,
            ..entry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidencePolicy;

    fn cache() -> ResponseCache {
        ResponseCache::in_memory(CacheConfig::default())
    }

    #[tokio::test]
    async fn test_exact_hit_keeps_stored_confidence() {
        let cache = cache();
        cache.put("What is 2+2?", "4", "llama3.2:1b", vec![]).await.unwrap();

        let hit = cache.get_exact("What is 2+2?").await.unwrap().unwrap();
        assert_eq!(hit.response, "4");
        assert_eq!(hit.confidence_score, 1.0);
        assert_eq!(hit.source, "llama3.2:1b");

        assert!(cache.get_exact("What is 2+3?").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_upserts_by_fingerprint() {
        let cache = cache();
        let first = cache.put("What is 2+2?", "four", "a", vec![]).await.unwrap();
        let second = cache.put("what is   2+2?", "4", "b", vec![]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        let hit = cache.get_exact("What is 2+2?").await.unwrap().unwrap();
        assert_eq!(hit.response, "4");
    }

    #[tokio::test]
    async fn test_semantic_picks_best_match() {
        let cache = cache();
        cache.put("What is two plus two?", "4", "m", vec![]).await.unwrap();
        cache.put("What is the capital of France?", "Paris", "m", vec![]).await.unwrap();

        let hit = cache.get_semantic("What is two plus three?").await.unwrap().unwrap();
        assert_eq!(hit.response, "4");
        assert!((hit.confidence_score - 4.0 / 6.0).abs() < 1e-9);

        assert!(cache.get_semantic("Tell me a joke").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_match_on_prefix() {
        let cache = cache();
        cache
            .put("Summarize the loan agreement for applicant 42 please", "Summary", "m", vec![])
            .await
            .unwrap();

        let hit = cache.get_partial("summarize the loan agreement").await.unwrap().unwrap();
        assert_eq!(hit.response, "Summary");
        assert!((hit.confidence_score - 0.7).abs() < 1e-9);

        assert!(cache.get_partial("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_template_match_by_tag() {
        let cache = cache();
        cache
            .put("What is escrow?", "Escrow holds funds.", "m", vec!["definition".to_string()])
            .await
            .unwrap();

        let hit = cache.get_template("What is a lien?").await.unwrap().unwrap();
        assert_eq!(hit.response, "Escrow holds funds.");
        assert!((hit.confidence_score - 0.5).abs() < 1e-9);

        assert!(cache.get_template("how to appeal").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_template_tries_every_matching_tag() {
        let cache = cache();
        let tags = vec!["explanation".to_string()];
        cache
            .put("Explain compound interest", "Interest on interest.", "m", tags)
            .await
            .unwrap();

        // "what is" matches first but nothing carries the definition tag
        let hit = cache
            .get_template("What is APR, and explain the fees")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.response, "Interest on interest.");
    }

    #[tokio::test]
    async fn test_stale_read_never_sticks_in_hot_layer() {
        let cache = cache();
        let hash = cache.put("What is 2+2?", "old", "m", vec![]).await.unwrap();
        let stale = cache.store.get(&hash).unwrap();

        // A reader that fetched `stale` loses the race with this write
        cache.put("What is 2+2?", "new", "m", vec![]).await.unwrap();
        cache.remember(hash, &stale).await;

        let hit = cache.get_exact("What is 2+2?").await.unwrap().unwrap();
        assert_eq!(hit.response, "new");
    }

    #[tokio::test]
    async fn test_update_stats_counts_feedback() {
        let cache = cache();
        let hash = cache.put("What is 2+2?", "4", "m", vec![]).await.unwrap();

        // Warm the hot layer, then make sure feedback is visible through it
        cache.get_exact("What is 2+2?").await.unwrap();
        assert!(cache.update_stats(&hash, true).await.unwrap());
        assert!(cache.update_stats(&hash, false).await.unwrap());
        assert!(!cache.update_stats("0000000000000000", true).await.unwrap());

        let hit = cache.get_exact("What is 2+2?").await.unwrap().unwrap();
        assert_eq!(hit.success_count, 1);
        assert_eq!(hit.failure_count, 1);
        assert_eq!(hit.confidence_score, 1.0);
    }

    #[tokio::test]
    async fn test_feedback_policy_degrades_confidence() {
        let config = CacheConfig {
            confidence_policy: ConfidencePolicy::Feedback,
            ..Default::default()
        };
        let cache = ResponseCache::in_memory(config);
        let hash = cache.put("What is 2+2?", "5", "m", vec![]).await.unwrap();
        for _ in 0..3 {
            cache.update_stats(&hash, false).await.unwrap();
        }

        let hit = cache.get_exact("What is 2+2?").await.unwrap().unwrap();
        // (0 + 1) / (3 + 2) / 0.5 = 0.4
        assert!((hit.confidence_score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_durable_cache_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            path: Some(dir.path().join("cache.json")),
            ..Default::default()
        };

        let cache = ResponseCache::open(config.clone()).await.unwrap();
        cache.put("What is 2+2?", "4", "m", vec![]).await.unwrap();
        drop(cache);

        let reopened = ResponseCache::open(config).await.unwrap();
        assert!(reopened.get_exact("What is 2+2?").await.unwrap().is_some());
    }
}
