//! T3 — semantic similarity against curated example utterances.
//!
//! Examples are embedded once and cached; the cache is keyed by a
//! fingerprint of the example set so a config reload re-embeds lazily on
//! the next classification instead of eagerly at reload time.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use rainbow_providers::{cosine_similarity, EmbeddingProvider, ProviderError};

const TOP_K: usize = 5;

struct ExampleIndex {
    fingerprint: u64,
    /// (intent, example embedding) — one row per example utterance.
    entries: Vec<(String, Vec<f32>)>,
}

pub struct SemanticMatcher {
    embedder: Arc<dyn EmbeddingProvider>,
    index: RwLock<Option<ExampleIndex>>,
}

impl SemanticMatcher {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            index: RwLock::new(None),
        }
    }

    /// Classify `text` against `examples`. Returns the best intent whose
    /// aggregated top-k similarity clears `threshold`.
    pub async fn classify(
        &self,
        text: &str,
        examples: &BTreeMap<String, Vec<String>>,
        threshold: f64,
    ) -> Result<Option<(String, f64)>, ProviderError> {
        if examples.is_empty() {
            return Ok(None);
        }

        self.ensure_index(examples).await?;

        let query = self.embedder.embed(&[text.to_string()]).await?;
        let query = query
            .first()
            .ok_or_else(|| ProviderError::Parse("empty embedding batch".to_string()))?;

        let guard = self.index.read().await;
        let Some(index) = guard.as_ref() else {
            return Ok(None);
        };

        // Top-k most similar examples, then aggregate mean similarity per
        // intent and take the best.
        let mut scored: Vec<(&str, f32)> = index
            .entries
            .iter()
            .map(|(intent, vec)| (intent.as_str(), cosine_similarity(query, vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(TOP_K);

        let mut by_intent: HashMap<&str, (f32, u32)> = HashMap::new();
        for (intent, sim) in scored.iter().copied() {
            let entry = by_intent.entry(intent).or_insert((0.0, 0));
            entry.0 += sim;
            entry.1 += 1;
        }

        let best = by_intent
            .into_iter()
            .map(|(intent, (sum, n))| (intent.to_string(), (sum / n as f32) as f64))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((intent, score)) if score >= threshold => {
                debug!(intent = %intent, score, "semantic tier accepted");
                Ok(Some((intent, score)))
            }
            Some((intent, score)) => {
                debug!(intent = %intent, score, threshold, "semantic tier below threshold");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// (Re)build the example index when the example set changed.
    async fn ensure_index(
        &self,
        examples: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), ProviderError> {
        let fingerprint = fingerprint_of(examples);
        {
            let guard = self.index.read().await;
            if guard.as_ref().is_some_and(|i| i.fingerprint == fingerprint) {
                return Ok(());
            }
        }

        let mut intents: Vec<String> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for (intent, utterances) in examples {
            for u in utterances {
                intents.push(intent.clone());
                texts.push(u.clone());
            }
        }
        if texts.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            warn!(
                expected = texts.len(),
                got = vectors.len(),
                "embedding batch size mismatch, skipping index build"
            );
            return Err(ProviderError::Parse(
                "embedding batch size mismatch".to_string(),
            ));
        }

        let entries = intents.into_iter().zip(vectors).collect();
        *self.index.write().await = Some(ExampleIndex {
            fingerprint,
            entries,
        });
        debug!(examples = texts.len(), "semantic example index rebuilt");
        Ok(())
    }
}

fn fingerprint_of(examples: &BTreeMap<String, Vec<String>>) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    examples.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Deterministic toy embedder: maps known phrases onto fixed axes.
    struct ToyEmbedder {
        calls: AtomicU32,
    }

    impl ToyEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }

        fn vector_for(text: &str) -> Vec<f32> {
            let t = text.to_lowercase();
            let booking = ["book", "reserve", "stay", "night"]
                .iter()
                .filter(|w| t.contains(*w))
                .count() as f32;
            let wifi = ["wifi", "internet", "password"]
                .iter()
                .filter(|w| t.contains(*w))
                .count() as f32;
            let greet = ["hello", "hi", "morning"]
                .iter()
                .filter(|w| t.contains(*w))
                .count() as f32;
            vec![booking, wifi, greet, 0.1]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ToyEmbedder {
        fn name(&self) -> &str {
            "toy"
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    fn examples() -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert(
            "booking".to_string(),
            vec![
                "I want to book a night".to_string(),
                "can I reserve a stay".to_string(),
            ],
        );
        map.insert(
            "wifi_password".to_string(),
            vec!["what is the wifi password".to_string()],
        );
        map
    }

    #[tokio::test]
    async fn accepts_similar_message_above_threshold() {
        let matcher = SemanticMatcher::new(Arc::new(ToyEmbedder::new()));
        let hit = matcher
            .classify("could I book a stay tonight", &examples(), 0.7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.0, "booking");
        assert!(hit.1 >= 0.7);
    }

    #[tokio::test]
    async fn below_threshold_must_not_accept() {
        let matcher = SemanticMatcher::new(Arc::new(ToyEmbedder::new()));
        let result = matcher
            .classify("completely unrelated gibberish", &examples(), 0.7)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn example_index_is_cached_between_calls() {
        let embedder = Arc::new(ToyEmbedder::new());
        let matcher = SemanticMatcher::new(embedder.clone());
        let ex = examples();

        matcher.classify("book a night", &ex, 0.7).await.unwrap();
        matcher.classify("reserve a stay", &ex, 0.7).await.unwrap();
        // 1 index build + 2 query embeddings.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_example_set_returns_none() {
        let matcher = SemanticMatcher::new(Arc::new(ToyEmbedder::new()));
        let result = matcher
            .classify("anything", &BTreeMap::new(), 0.7)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
